use hashbrown::{HashMap, HashSet};

use super::{Pass, PassError};
use crate::middle::mir::{Function, Module, ValueId};

/// Removes instructions without side effects whose result nobody reads
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for function in module.functions.values_mut() {
            changed |= eliminate_dead_code(function);
        }
        Ok(changed)
    }
}

/// Values a side effect or a terminator depends on, directly or through
/// other values. Phis that only feed each other around a loop stay dead.
fn live_values(function: &Function) -> HashSet<ValueId> {
    let mut definitions = HashMap::new();
    let mut worklist = Vec::new();
    for block in function.blocks.values() {
        for instruction in &block.instructions {
            match instruction.destination() {
                Some(destination) if instruction.is_pure() => {
                    definitions.insert(destination, instruction);
                }
                _ => instruction.for_each_operand(|v| worklist.push(v)),
            }
        }
        if let Some(value) = block.terminator.as_ref().and_then(|t| t.operand()) {
            worklist.push(value);
        }
    }

    let mut live = HashSet::new();
    while let Some(value) = worklist.pop() {
        if !live.insert(value) {
            continue;
        }
        if let Some(instruction) = definitions.get(&value) {
            instruction.for_each_operand(|v| worklist.push(v));
        }
    }
    live
}

fn eliminate_dead_code(function: &mut Function) -> bool {
    let live = live_values(function);
    let mut removed = 0;

    for block in function.blocks.values_mut() {
        let count = block.instructions.len();
        block.instructions.retain(|instruction| {
            !instruction.is_pure()
                || instruction
                    .destination()
                    .is_none_or(|destination| live.contains(&destination))
        });
        removed += count - block.instructions.len();
    }

    if removed > 0 {
        tracing::trace!(function = %function.name, removed, "removed dead instructions");
    }
    removed > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{
        BinaryOperator, BlockId, Constant, Instruction, Terminator, Type,
    };

    #[test]
    fn removes_unused_chains_but_keeps_faulting_division() {
        let mut function = Function::new("main", Type::Void);
        let a = function.new_value(Type::Int);
        let b = function.new_value(Type::Int);
        let sum = function.new_value(Type::Int);
        let quotient = function.new_value(Type::Int);

        let entry = function.block_mut(BlockId::ENTRY);
        entry.instructions = vec![
            Instruction::Const {
                destination: a,
                value: Constant::Int(1),
            },
            Instruction::Const {
                destination: b,
                value: Constant::Int(0),
            },
            Instruction::Binary {
                operator: BinaryOperator::Add,
                destination: sum,
                lhs: a,
                rhs: a,
            },
            Instruction::Binary {
                operator: BinaryOperator::Div,
                destination: quotient,
                lhs: a,
                rhs: b,
            },
        ];
        entry.terminator = Some(Terminator::Return { value: None });

        assert!(eliminate_dead_code(&mut function));
        let instructions = &function.block(BlockId::ENTRY).instructions;
        assert_eq!(instructions.len(), 3);
        assert!(instructions.iter().all(|i| i.destination() != Some(sum)));
        assert!(!eliminate_dead_code(&mut function));
    }

    #[test]
    fn removes_phis_that_only_feed_each_other() {
        let mut function = Function::new("main", Type::Int);
        let header = function.add_block("loop_header");
        let body = function.add_block("loop_body");
        let exit = function.add_block("exit");

        let zero = function.new_value(Type::Int);
        let one = function.new_value(Type::Int);
        let condition = function.new_value(Type::Bool);
        let counter = function.new_value(Type::Int);
        let next = function.new_value(Type::Int);

        function.block_mut(BlockId::ENTRY).instructions = vec![
            Instruction::Const {
                destination: zero,
                value: Constant::Int(0),
            },
            Instruction::Const {
                destination: one,
                value: Constant::Int(1),
            },
            Instruction::Const {
                destination: condition,
                value: Constant::Bool(false),
            },
        ];
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Jump { destination: header });
        function.add_edge(BlockId::ENTRY, header);

        function.block_mut(header).instructions = vec![Instruction::Phi {
            destination: counter,
            incoming: vec![(BlockId::ENTRY, zero), (body, next)],
        }];
        function.block_mut(header).terminator = Some(Terminator::Branch {
            condition,
            positive: body,
            negative: exit,
        });
        function.add_edge(header, body);
        function.add_edge(header, exit);

        function.block_mut(body).instructions = vec![Instruction::Binary {
            operator: BinaryOperator::Add,
            destination: next,
            lhs: counter,
            rhs: one,
        }];
        function.block_mut(body).terminator = Some(Terminator::Jump { destination: header });
        function.add_edge(body, header);

        function.block_mut(exit).terminator = Some(Terminator::Return { value: Some(zero) });

        assert!(eliminate_dead_code(&mut function));
        assert!(function.block(header).instructions.is_empty());
        assert!(function.block(body).instructions.is_empty());
        let entry = &function.block(BlockId::ENTRY).instructions;
        assert_eq!(entry.len(), 2);
        assert!(entry.iter().all(|i| i.destination() != Some(one)));
    }
}
