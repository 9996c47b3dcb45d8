use hashbrown::{HashMap, HashSet};

use super::{Pass, PassError};
use crate::middle::mir::{
    BlockId, Constant, Function, Instruction, Module, Terminator, ValueId,
    cfg::reverse_postorder,
};

/// Folds constant branches, deletes unreachable blocks and merges straight
/// line chains of blocks.
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn is_structural(&self) -> bool {
        true
    }

    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for function in module.functions.values_mut() {
            let mut function_changed = fold_constant_branches(function);
            function_changed |= remove_unreachable_blocks(function);
            function_changed |= merge_blocks(function);

            if function_changed {
                tracing::debug!(function = %function.name, blocks = function.blocks.len(), "simplified");
            }
            changed |= function_changed;
        }
        Ok(changed)
    }
}

fn constant_conditions(function: &Function) -> HashMap<ValueId, bool> {
    function
        .blocks
        .values()
        .flat_map(|b| &b.instructions)
        .filter_map(|i| match i {
            Instruction::Const {
                destination,
                value: Constant::Bool(value),
            } => Some((*destination, *value)),
            _ => None,
        })
        .collect()
}

/// A branch on a known condition becomes a jump to the arm that is taken
fn fold_constant_branches(function: &mut Function) -> bool {
    let conditions = constant_conditions(function);
    let mut folded = Vec::new();

    for block in function.blocks.values_mut() {
        let Some(Terminator::Branch {
            condition,
            positive,
            negative,
        }) = block.terminator
        else {
            continue;
        };
        let Some(value) = conditions.get(&condition) else {
            continue;
        };

        let (taken, dropped) = if *value {
            (positive, negative)
        } else {
            (negative, positive)
        };
        block.terminator = Some(Terminator::Jump { destination: taken });
        folded.push((block.id, dropped));
    }

    for (block, dropped) in &folded {
        function.remove_edge(*block, *dropped);
    }

    !folded.is_empty()
}

fn remove_unreachable_blocks(function: &mut Function) -> bool {
    let reachable = reverse_postorder(function).into_iter().collect::<HashSet<_>>();
    let unreachable = function
        .blocks
        .keys()
        .copied()
        .filter(|b| !reachable.contains(b))
        .collect::<Vec<_>>();

    for block in &unreachable {
        for successor in function.block(*block).successors() {
            function.remove_edge(*block, successor);
        }
    }
    for block in &unreachable {
        function.blocks.remove(block);
    }

    !unreachable.is_empty()
}

/// Appends a block to its only predecessor when that predecessor jumps
/// nowhere else. The block's phis have a single operand and are replaced by
/// it.
fn merge_blocks(function: &mut Function) -> bool {
    let mut merged = false;

    loop {
        let candidate = function.blocks.values().find_map(|block| {
            let Some(Terminator::Jump { destination }) = block.terminator else {
                return None;
            };
            let successor = function.blocks.get(&destination)?;
            (destination != block.id
                && destination != function.entry
                && successor.predecessors.len() == 1)
                .then_some((block.id, destination))
        });

        let Some((predecessor, block_id)) = candidate else {
            break;
        };
        let Some(block) = function.blocks.remove(&block_id) else {
            break;
        };

        let mut replacements = HashMap::new();
        let mut instructions = Vec::with_capacity(block.instructions.len());
        for instruction in block.instructions {
            match instruction {
                Instruction::Phi {
                    destination,
                    incoming,
                } => {
                    if let Some((_, value)) = incoming.first() {
                        replacements.insert(destination, *value);
                    }
                }
                other => instructions.push(other),
            }
        }

        for successor in block.terminator.iter().flat_map(Terminator::successors) {
            rename_predecessor(function, successor, block_id, predecessor);
        }

        let target = function.block_mut(predecessor);
        target.instructions.extend(instructions);
        target.terminator = block.terminator;

        function.replace_uses(&replacements);
        merged = true;
    }

    merged
}

fn rename_predecessor(function: &mut Function, block: BlockId, from: BlockId, to: BlockId) {
    let Some(block) = function.blocks.get_mut(&block) else {
        return;
    };

    for predecessor in &mut block.predecessors {
        if *predecessor == from {
            *predecessor = to;
        }
    }
    for instruction in &mut block.instructions {
        if let Instruction::Phi { incoming, .. } = instruction {
            for (predecessor, _) in incoming {
                if *predecessor == from {
                    *predecessor = to;
                }
            }
        }
    }
}
