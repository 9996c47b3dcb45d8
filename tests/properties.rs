use kiln::{
    frontend::ast::{BinaryOperatorKind as Op, Module, Type as T, build::*},
    middle::passes::Pipeline,
    runner,
    vm::{self, FaultKind, Value, exit_code},
};
use proptest::prelude::*;

const OPERATORS: [Op; 10] = [
    Op::Add,
    Op::Subtract,
    Op::Multiply,
    Op::Divide,
    Op::Modulus,
    Op::BitwiseAnd,
    Op::BitwiseOr,
    Op::BitwiseXor,
    Op::ShiftLeft,
    Op::ShiftRight,
];

fn reference(operator: Op, lhs: i64, rhs: i64) -> Option<i64> {
    Some(match operator {
        Op::Add => lhs.wrapping_add(rhs),
        Op::Subtract => lhs.wrapping_sub(rhs),
        Op::Multiply => lhs.wrapping_mul(rhs),
        Op::Divide => lhs.checked_div(rhs).or_else(|| (rhs == -1).then_some(lhs.wrapping_neg()))?,
        Op::Modulus => lhs.checked_rem(rhs).or_else(|| (rhs == -1).then_some(0))?,
        Op::BitwiseAnd => lhs & rhs,
        Op::BitwiseOr => lhs | rhs,
        Op::BitwiseXor => lhs ^ rhs,
        Op::ShiftLeft => lhs << (rhs & 63),
        Op::ShiftRight => lhs >> (rhs & 63),
        _ => unreachable!(),
    })
}

/// `main` computes `lhs op rhs` on literals, which folding can evaluate
fn folded(operator: Op, lhs: i64, rhs: i64) -> Module {
    module(
        "folded",
        vec![function(
            "main",
            &[],
            T::Int,
            vec![ret(binary(operator, int(lhs), int(rhs)))],
        )],
    )
}

/// The same computation behind a call, so only the interpreter evaluates it
fn computed(operator: Op, lhs: i64, rhs: i64) -> Module {
    module(
        "computed",
        vec![
            function(
                "apply",
                &[("a", T::Int), ("b", T::Int)],
                T::Int,
                vec![ret(binary(operator, var("a", T::Int), var("b", T::Int)))],
            ),
            function(
                "main",
                &[],
                T::Int,
                vec![ret(call("apply", T::Int, vec![int(lhs), int(rhs)]))],
            ),
        ],
    )
}

fn evaluate(tree: &Module, mut pipeline: Pipeline) -> Result<Value, FaultKind> {
    let module = runner::compile(tree, &mut pipeline).unwrap();
    vm::execute(&module, "main", None).map_err(|fault| fault.kind)
}

fn operand() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(0),
        Just(-1),
        Just(i64::MIN),
        Just(i64::MAX),
        -300i64..300,
        any::<i64>(),
    ]
}

proptest! {
    #[test]
    fn integer_operators_wrap(
        operator in proptest::sample::select(OPERATORS.to_vec()),
        lhs in operand(),
        rhs in operand(),
    ) {
        let result = evaluate(&computed(operator, lhs, rhs), Pipeline::runner());
        match reference(operator, lhs, rhs) {
            Some(expected) => prop_assert_eq!(result, Ok(Value::Int(expected))),
            None => prop_assert!(matches!(
                result,
                Err(FaultKind::DivisionByZero | FaultKind::RemainderByZero)
            )),
        }
    }

    #[test]
    fn folding_agrees_with_the_interpreter(
        operator in proptest::sample::select(OPERATORS.to_vec()),
        lhs in operand(),
        rhs in operand(),
    ) {
        let optimized = evaluate(&folded(operator, lhs, rhs), Pipeline::optimizing());
        let interpreted = evaluate(&computed(operator, lhs, rhs), Pipeline::runner());
        prop_assert_eq!(optimized, interpreted);
    }

    #[test]
    fn exit_codes_keep_the_low_byte(value in any::<i64>()) {
        prop_assert_eq!(i64::from(exit_code(&Value::Int(value))), value.rem_euclid(256));
    }

    #[test]
    fn returned_integers_become_the_exit_status(value in -1000i64..1000) {
        let tree = module(
            "exit",
            vec![function("main", &[], T::Int, vec![ret(int(value))])],
        );
        let module = runner::compile(&tree, &mut Pipeline::runner()).unwrap();
        let outcome = runner::run(&module, "main", &Default::default(), None).unwrap();
        prop_assert_eq!(i64::from(outcome.status), value.rem_euclid(256));
    }
}

#[test]
fn minus_five_exits_with_251() {
    assert_eq!(exit_code(&Value::Int(-5)), 251);
}
