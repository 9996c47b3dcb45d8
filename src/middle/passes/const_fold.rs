use hashbrown::HashMap;

use super::{Pass, PassError};
use crate::middle::mir::{
    Constant, Function, Instruction, Module, ValueId, arithmetic,
    cfg::reverse_postorder,
};

/// Replaces operations on constants with their result. Division and
/// remainder by zero are left alone so they fault when executed.
pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "const-fold"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for function in module.functions.values_mut() {
            changed |= fold_function(function);
        }
        Ok(changed)
    }
}

fn fold_function(function: &mut Function) -> bool {
    let mut constants: HashMap<ValueId, Constant> = HashMap::new();
    let mut folded = 0;

    // Definitions dominate their uses, so one walk in reverse postorder sees
    // every constant operand before the instruction using it
    for block_id in reverse_postorder(function) {
        let values = &function.values;
        let Some(block) = function.blocks.get_mut(&block_id) else {
            continue;
        };

        for instruction in &mut block.instructions {
            let Some(destination) = instruction.destination() else {
                continue;
            };

            let value = match &*instruction {
                Instruction::Const { value, .. } => {
                    constants.insert(destination, value.clone());
                    continue;
                }
                Instruction::Unary { operator, operand, .. } => constants
                    .get(operand)
                    .and_then(|operand| arithmetic::unary(*operator, operand)),
                Instruction::Binary {
                    operator, lhs, rhs, ..
                } => match (constants.get(lhs), constants.get(rhs)) {
                    (Some(lhs), Some(rhs)) => arithmetic::binary(*operator, lhs, rhs).ok().flatten(),
                    _ => None,
                },
                Instruction::Compare {
                    predicate, lhs, rhs, ..
                } => match (constants.get(lhs), constants.get(rhs)) {
                    (Some(lhs), Some(rhs)) => {
                        arithmetic::compare(*predicate, lhs, rhs).map(Constant::Bool)
                    }
                    _ => None,
                },
                Instruction::Cast { operand, .. } => constants
                    .get(operand)
                    .and_then(|operand| arithmetic::cast(operand, &values[destination])),
                _ => None,
            };

            let Some(value) = value else {
                continue;
            };

            tracing::trace!(function = %function.name, %destination, ?value, "folded");
            constants.insert(destination, value.clone());
            *instruction = Instruction::Const { destination, value };
            folded += 1;
        }
    }

    folded > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{BinaryOperator, BlockId, Terminator, Type};

    fn function_of(operator: BinaryOperator, lhs: i64, rhs: i64) -> Function {
        let mut function = Function::new("main", Type::Int);
        let a = function.new_value(Type::Int);
        let b = function.new_value(Type::Int);
        let result = function.new_value(Type::Int);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions = vec![
            Instruction::Const {
                destination: a,
                value: Constant::Int(lhs),
            },
            Instruction::Const {
                destination: b,
                value: Constant::Int(rhs),
            },
            Instruction::Binary {
                operator,
                destination: result,
                lhs: a,
                rhs: b,
            },
        ];
        entry.terminator = Some(Terminator::Return {
            value: Some(result),
        });
        function
    }

    #[test]
    fn folds_wrapping_arithmetic() {
        let mut function = function_of(BinaryOperator::Add, i64::MAX, 1);
        assert!(fold_function(&mut function));
        assert_eq!(
            function.block(BlockId::ENTRY).instructions[2],
            Instruction::Const {
                destination: ValueId(2),
                value: Constant::Int(i64::MIN),
            }
        );
    }

    #[test]
    fn leaves_division_by_zero_alone() {
        let mut function = function_of(BinaryOperator::Div, 1, 0);
        assert!(!fold_function(&mut function));
        assert!(matches!(
            function.block(BlockId::ENTRY).instructions[2],
            Instruction::Binary { .. }
        ));
    }

    #[test]
    fn folds_chains_in_one_run() {
        let mut function = function_of(BinaryOperator::Mul, 6, 7);
        let doubled = function.new_value(Type::Bool);
        let result = ValueId(2);
        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions.push(Instruction::Compare {
            predicate: crate::middle::mir::ComparePredicate::Eq,
            destination: doubled,
            lhs: result,
            rhs: result,
        });

        assert!(fold_function(&mut function));
        assert_eq!(
            function.block(BlockId::ENTRY).instructions[3],
            Instruction::Const {
                destination: doubled,
                value: Constant::Bool(true),
            }
        );
    }
}
