//! Control flow queries over a function: derived edges, reverse postorder
//! and dominators.

use hashbrown::{HashMap, HashSet};

use crate::middle::mir::{BlockId, Function};

/// Derived predecessor lists, one entry per edge. Blocks are scanned in id
/// order so the result is deterministic.
pub fn derived_predecessors(function: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut predecessors: HashMap<BlockId, Vec<BlockId>> =
        function.blocks.keys().map(|id| (*id, Vec::new())).collect();

    for block in function.blocks.values() {
        for successor in block.successors() {
            if let Some(list) = predecessors.get_mut(&successor) {
                list.push(block.id);
            }
        }
    }

    predecessors
}

/// Reachable blocks in reverse postorder starting at the entry block.
pub fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut postorder = Vec::new();
    // (block, index of the next successor to visit)
    let mut stack = vec![(function.entry, 0usize)];
    visited.insert(function.entry);

    while let Some((block_id, next)) = stack.last().copied() {
        let successors = function
            .blocks
            .get(&block_id)
            .map(|b| b.successors())
            .unwrap_or_default();

        if let Some(successor) = successors.get(next) {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if function.blocks.contains_key(successor) && visited.insert(*successor) {
                stack.push((*successor, 0));
            }
        } else {
            postorder.push(block_id);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}

#[derive(Debug, Clone)]
pub struct DominatorTree {
    immediate_dominators: HashMap<BlockId, BlockId>,
    order: HashMap<BlockId, usize>,
    entry: BlockId,
}

impl DominatorTree {
    /// Cooper, Harvey and Kennedy's iterative algorithm over the reverse
    /// postorder.
    pub fn compute(function: &Function) -> Self {
        let rpo = reverse_postorder(function);
        let order: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let predecessors = derived_predecessors(function);

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(function.entry, function.entry);

        let mut changed = true;
        while changed {
            changed = false;

            for block in rpo.iter().skip(1) {
                let mut new_idom = None;

                for predecessor in &predecessors[block] {
                    if !idom.contains_key(predecessor) {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => *predecessor,
                        Some(current) => intersect(&idom, &order, *predecessor, current),
                    });
                }

                let Some(new_idom) = new_idom else {
                    continue;
                };

                if idom.get(block) != Some(&new_idom) {
                    idom.insert(*block, new_idom);
                    changed = true;
                }
            }
        }

        Self {
            immediate_dominators: idom,
            order,
            entry: function.entry,
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.order.contains_key(&block)
    }

    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.immediate_dominators.get(&block).copied()
    }

    /// Whether `a` dominates `b`. Every block dominates itself. Unreachable
    /// blocks are dominated by everything.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return true;
        }

        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    order: &HashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while order[&a] > order[&b] {
            a = idom[&a];
        }
        while order[&b] > order[&a] {
            b = idom[&b];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{Terminator, Type};

    /// entry -> header -> (body -> header | exit), plus an orphan block
    fn loop_function() -> (Function, [BlockId; 4]) {
        let mut function = Function::new("f", Type::Void);
        let condition = function.new_value(Type::Bool);
        let header = function.add_block("loop_header");
        let body = function.add_block("loop_body");
        let exit = function.add_block("loop_exit");
        let orphan = function.add_block("orphan");

        function.block_mut(BlockId::ENTRY).terminator =
            Some(Terminator::Jump { destination: header });
        function.block_mut(header).terminator = Some(Terminator::Branch {
            condition,
            positive: body,
            negative: exit,
        });
        function.block_mut(body).terminator = Some(Terminator::Jump { destination: header });
        function.block_mut(exit).terminator = Some(Terminator::Return { value: None });
        function.block_mut(orphan).terminator = Some(Terminator::Jump { destination: exit });

        (function, [header, body, exit, orphan])
    }

    #[test]
    fn reverse_postorder_skips_unreachable_blocks() {
        let (function, [header, body, exit, orphan]) = loop_function();
        let rpo = reverse_postorder(&function);

        assert_eq!(rpo[0], BlockId::ENTRY);
        assert_eq!(rpo[1], header);
        assert!(rpo.contains(&body) && rpo.contains(&exit));
        assert!(!rpo.contains(&orphan));
    }

    #[test]
    fn loop_header_dominates_body_and_exit() {
        let (function, [header, body, exit, orphan]) = loop_function();
        let tree = DominatorTree::compute(&function);

        assert!(tree.dominates(header, body));
        assert!(tree.dominates(header, exit));
        assert!(!tree.dominates(body, exit));
        assert_eq!(tree.immediate_dominator(exit), Some(header));
        assert!(!tree.is_reachable(orphan));
    }

    #[test]
    fn derived_predecessors_count_every_edge() {
        let (function, [header, body, exit, orphan]) = loop_function();
        let predecessors = derived_predecessors(&function);

        assert_eq!(predecessors[&header], vec![BlockId::ENTRY, body]);
        assert_eq!(predecessors[&exit], vec![header, orphan]);
    }
}
