//! Scalar semantics of MIR operators. Constant folding and the VM both
//! evaluate through these, so a folded result is always what execution would
//! have produced.

use crate::middle::mir::{BinaryOperator, ComparePredicate, Constant, Type, UnaryOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticFault {
    DivisionByZero,
    RemainderByZero,
}

/// Integer operators wrap at 64 bits. Shift amounts are masked to 0..63 and
/// `shr` is arithmetic.
pub fn int_binary(operator: BinaryOperator, lhs: i64, rhs: i64) -> Result<i64, ArithmeticFault> {
    Ok(match operator {
        BinaryOperator::Add => lhs.wrapping_add(rhs),
        BinaryOperator::Sub => lhs.wrapping_sub(rhs),
        BinaryOperator::Mul => lhs.wrapping_mul(rhs),
        BinaryOperator::Div => {
            if rhs == 0 {
                return Err(ArithmeticFault::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        BinaryOperator::Rem => {
            if rhs == 0 {
                return Err(ArithmeticFault::RemainderByZero);
            }
            lhs.wrapping_rem(rhs)
        }
        BinaryOperator::And => lhs & rhs,
        BinaryOperator::Or => lhs | rhs,
        BinaryOperator::Xor => lhs ^ rhs,
        BinaryOperator::Shl => lhs.wrapping_shl((rhs & 63) as u32),
        BinaryOperator::Shr => lhs.wrapping_shr((rhs & 63) as u32),
        _ => unreachable!("{operator} is not an integer operator"),
    })
}

pub fn float_binary(operator: BinaryOperator, lhs: f64, rhs: f64) -> f64 {
    match operator {
        BinaryOperator::FAdd => lhs + rhs,
        BinaryOperator::FSub => lhs - rhs,
        BinaryOperator::FMul => lhs * rhs,
        BinaryOperator::FDiv => lhs / rhs,
        // Same as C's fmod
        BinaryOperator::FRem => lhs % rhs,
        _ => unreachable!("{operator} is not a float operator"),
    }
}

pub fn unary(operator: UnaryOperator, operand: &Constant) -> Option<Constant> {
    Some(match (operator, operand) {
        (UnaryOperator::Neg, Constant::Int(v)) => Constant::Int(v.wrapping_neg()),
        (UnaryOperator::Complement, Constant::Int(v)) => Constant::Int(!v),
        (UnaryOperator::FNeg, Constant::Float(v)) => Constant::Float(-v),
        (UnaryOperator::Not, Constant::Bool(v)) => Constant::Bool(!v),
        _ => return None,
    })
}

/// Float to int saturates at the bounds of `i64`, NaN becomes 0
pub fn cast(operand: &Constant, to: &Type) -> Option<Constant> {
    Some(match (operand, to) {
        (Constant::Int(v), Type::Float) => Constant::Float(*v as f64),
        (Constant::Float(v), Type::Int) => Constant::Int(*v as i64),
        (Constant::Bool(v), Type::Int) => Constant::Int(i64::from(*v)),
        (Constant::Int(v), Type::Bool) => Constant::Bool(*v != 0),
        (value, ty) if value.ty() == *ty => value.clone(),
        _ => return None,
    })
}

/// Strings compare bytewise, floats by IEEE rules (every comparison with NaN
/// except `ne` is false).
pub fn compare(predicate: ComparePredicate, lhs: &Constant, rhs: &Constant) -> Option<bool> {
    Some(match (lhs, rhs) {
        (Constant::Int(a), Constant::Int(b)) => predicate.evaluate(a, b),
        (Constant::Float(a), Constant::Float(b)) => predicate.evaluate(a, b),
        (Constant::Bool(a), Constant::Bool(b)) => predicate.evaluate(a, b),
        (Constant::String(a), Constant::String(b)) => {
            predicate.evaluate(&a.as_bytes(), &b.as_bytes())
        }
        _ => return None,
    })
}

/// Evaluates a binary operator over constants. Returns `Ok(None)` when the
/// operands are not of the operator's type.
pub fn binary(
    operator: BinaryOperator,
    lhs: &Constant,
    rhs: &Constant,
) -> Result<Option<Constant>, ArithmeticFault> {
    Ok(match (lhs, rhs) {
        (Constant::Int(a), Constant::Int(b)) if !operator.is_float() && operator != BinaryOperator::Concat => {
            Some(Constant::Int(int_binary(operator, *a, *b)?))
        }
        (Constant::Float(a), Constant::Float(b)) if operator.is_float() => {
            Some(Constant::Float(float_binary(operator, *a, *b)))
        }
        (Constant::String(a), Constant::String(b)) if operator == BinaryOperator::Concat => {
            Some(Constant::String(format!("{a}{b}")))
        }
        _ => None,
    })
}

/// Process exit status for an integer result: the low 8 bits
pub fn exit_status(value: i64) -> u8 {
    value as u8
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn division_edge_cases() {
        assert_eq!(int_binary(BinaryOperator::Div, i64::MIN, -1), Ok(i64::MIN));
        assert_eq!(int_binary(BinaryOperator::Rem, i64::MIN, -1), Ok(0));
        assert_eq!(int_binary(BinaryOperator::Div, -7, 2), Ok(-3));
        assert_eq!(int_binary(BinaryOperator::Rem, -7, 2), Ok(-1));
        assert_eq!(
            int_binary(BinaryOperator::Div, 1, 0),
            Err(ArithmeticFault::DivisionByZero)
        );
        assert_eq!(
            int_binary(BinaryOperator::Rem, 1, 0),
            Err(ArithmeticFault::RemainderByZero)
        );
    }

    #[test]
    fn bitwise_scenarios() {
        assert_eq!(int_binary(BinaryOperator::And, 12, 10), Ok(8));
        assert_eq!(unary(UnaryOperator::Complement, &Constant::Int(12)), Some(Constant::Int(-13)));
        assert_eq!(int_binary(BinaryOperator::Shl, 1, 65), Ok(2));
        assert_eq!(int_binary(BinaryOperator::Shr, -16, 2), Ok(-4));
    }

    #[test]
    fn float_to_int_saturates() {
        assert_eq!(cast(&Constant::Float(f64::NAN), &Type::Int), Some(Constant::Int(0)));
        assert_eq!(cast(&Constant::Float(1e300), &Type::Int), Some(Constant::Int(i64::MAX)));
        assert_eq!(cast(&Constant::Float(-1e300), &Type::Int), Some(Constant::Int(i64::MIN)));
        assert_eq!(cast(&Constant::Float(-2.9), &Type::Int), Some(Constant::Int(-2)));
    }

    #[test]
    fn exit_status_truncates() {
        assert_eq!(exit_status(-5), 251);
        assert_eq!(exit_status(15), 15);
        assert_eq!(exit_status(256 + 9), 9);
    }

    proptest! {
        #[test]
        fn addition_wraps(a: i64, b: i64) {
            prop_assert_eq!(int_binary(BinaryOperator::Add, a, b), Ok(a.wrapping_add(b)));
        }

        #[test]
        fn division_and_remainder_recombine(a: i64, b in any::<i64>().prop_filter("nonzero", |b| *b != 0)) {
            let quotient = int_binary(BinaryOperator::Div, a, b).unwrap();
            let remainder = int_binary(BinaryOperator::Rem, a, b).unwrap();
            prop_assert_eq!(quotient.wrapping_mul(b).wrapping_add(remainder), a);
        }

        #[test]
        fn exit_status_is_low_byte(value: i64) {
            prop_assert_eq!(i64::from(exit_status(value)), value.rem_euclid(256));
        }
    }
}
