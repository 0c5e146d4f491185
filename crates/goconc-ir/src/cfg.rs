//! CFG navigation helpers over deserialized front-end data.
//!
//! Provides the reachability queries (block reachability and
//! instruction ordering) the partitioner needs over the CFG built by
//! go/ssa in the front-end.

use crate::ir::{BasicBlock, Function};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Position of an instruction inside a function: block id and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrPos {
    pub block: u32,
    pub index: usize,
}

/// A traversable view of a function's CFG
pub struct Cfg<'a> {
    func: &'a Function,
    successors: HashMap<u32, Vec<u32>>,
    block_map: HashMap<u32, &'a BasicBlock>,
    /// Blocks reachable through at least one edge, cached per block.
    after: HashMap<u32, HashSet<u32>>,
}

impl<'a> Cfg<'a> {
    /// Build traversal indices from a deserialized function
    pub fn from_function(func: &'a Function) -> Self {
        let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut block_map = HashMap::new();

        for block in &func.blocks {
            block_map.insert(block.id, block);
            successors.entry(block.id).or_default();
        }

        for edge in &func.cfg_edges {
            successors
                .entry(edge.from_block)
                .or_default()
                .push(edge.to_block);
        }

        let mut cfg = Self {
            func,
            successors,
            block_map,
            after: HashMap::new(),
        };
        let after = func
            .blocks
            .iter()
            .map(|b| (b.id, cfg.compute_reachable_after(b.id)))
            .collect();
        cfg.after = after;
        cfg
    }

    pub fn function(&self) -> &'a Function {
        self.func
    }

    /// Entry block (always block 0 in go/ssa)
    pub fn entry_block(&self) -> Option<&'a BasicBlock> {
        self.block_map.get(&0).copied()
    }

    /// Get block by ID
    pub fn block(&self, id: u32) -> Option<&'a BasicBlock> {
        self.block_map.get(&id).copied()
    }

    /// Successors of a block
    pub fn successors(&self, block_id: u32) -> &[u32] {
        self.successors
            .get(&block_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Find all blocks reachable from a given block, including itself
    pub fn reachable_from(&self, start: u32) -> HashSet<u32> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(id) = queue.pop_front() {
            if visited.insert(id) {
                for &succ_id in self.successors(id) {
                    queue.push_back(succ_id);
                }
            }
        }

        visited
    }

    fn compute_reachable_after(&self, start: u32) -> HashSet<u32> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<u32> = self.successors(start).iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if visited.insert(id) {
                for &succ_id in self.successors(id) {
                    queue.push_back(succ_id);
                }
            }
        }

        visited
    }

    /// Blocks reachable through at least one edge. Contains `block` itself
    /// only if it sits on a cycle.
    pub fn reachable_after(&self, block: u32) -> Option<&HashSet<u32>> {
        self.after.get(&block)
    }

    /// True if an execution can reach `to` strictly after executing `from`.
    pub fn precedes(&self, from: InstrPos, to: InstrPos) -> bool {
        if from.block == to.block && from.index < to.index {
            return true;
        }
        self.reachable_after(from.block)
            .map(|blocks| blocks.contains(&to.block))
            .unwrap_or(false)
    }

    /// Detect if the CFG has cycles (loops)
    pub fn has_cycle(&self) -> bool {
        self.after.iter().any(|(id, blocks)| blocks.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn block(id: u32, name: &str) -> BasicBlock {
        BasicBlock {
            id,
            name: name.into(),
            instructions: vec![],
        }
    }

    fn edge(from_block: u32, to_block: u32, kind: EdgeKind) -> CfgEdge {
        CfgEdge {
            from_block,
            to_block,
            kind,
        }
    }

    fn func(name: &str, blocks: Vec<BasicBlock>, cfg_edges: Vec<CfgEdge>) -> Function {
        Function {
            name: format!("test.{name}"),
            short_name: name.into(),
            span: None,
            params: vec![],
            free_vars: vec![],
            blocks,
            cfg_edges,
        }
    }

    fn make_linear_func() -> Function {
        func(
            "Linear",
            vec![block(0, "entry"), block(1, "body"), block(2, "exit")],
            vec![
                edge(0, 1, EdgeKind::Unconditional),
                edge(1, 2, EdgeKind::Unconditional),
            ],
        )
    }

    fn make_branch_func() -> Function {
        func(
            "Branch",
            vec![block(0, "entry"), block(1, "if.then"), block(2, "if.else")],
            vec![edge(0, 1, EdgeKind::CondTrue), edge(0, 2, EdgeKind::CondFalse)],
        )
    }

    fn make_loop_func() -> Function {
        func(
            "Loop",
            vec![
                block(0, "entry"),
                block(1, "loop.head"),
                block(2, "loop.body"),
                block(3, "exit"),
            ],
            vec![
                edge(0, 1, EdgeKind::Unconditional),
                edge(1, 2, EdgeKind::CondTrue),
                edge(1, 3, EdgeKind::CondFalse),
                edge(2, 1, EdgeKind::Unconditional), // back edge
            ],
        )
    }

    fn pos(block: u32, index: usize) -> InstrPos {
        InstrPos { block, index }
    }

    #[test]
    fn test_linear_cfg() {
        let func = make_linear_func();
        let cfg = Cfg::from_function(&func);

        assert_eq!(cfg.entry_block().unwrap().name, "entry");
        assert_eq!(cfg.successors(0), &[1]);
        assert!(cfg.successors(2).is_empty());
        assert!(!cfg.has_cycle());
        assert!(cfg.precedes(pos(0, 3), pos(2, 0)));
        assert!(!cfg.precedes(pos(2, 0), pos(0, 3)));
    }

    #[test]
    fn test_same_block_order() {
        let func = make_linear_func();
        let cfg = Cfg::from_function(&func);

        assert!(cfg.precedes(pos(1, 0), pos(1, 1)));
        assert!(!cfg.precedes(pos(1, 1), pos(1, 0)));
        assert!(!cfg.precedes(pos(1, 1), pos(1, 1)));
    }

    #[test]
    fn test_branches_do_not_precede_each_other() {
        let func = make_branch_func();
        let cfg = Cfg::from_function(&func);

        assert!(cfg.precedes(pos(0, 0), pos(1, 0)));
        assert!(cfg.precedes(pos(0, 0), pos(2, 0)));
        assert!(!cfg.precedes(pos(1, 0), pos(2, 0)));
        assert!(!cfg.precedes(pos(2, 0), pos(1, 0)));
    }

    #[test]
    fn test_loop_cfg() {
        let func = make_loop_func();
        let cfg = Cfg::from_function(&func);

        assert!(cfg.has_cycle());
        // Inside the loop every instruction can follow every other one.
        assert!(cfg.precedes(pos(2, 1), pos(2, 0)));
        assert!(cfg.precedes(pos(2, 0), pos(2, 0)));
        assert!(cfg.precedes(pos(2, 0), pos(1, 0)));
        assert!(!cfg.precedes(pos(3, 0), pos(1, 0)));
        assert!(cfg.reachable_after(2).unwrap().contains(&2));
        assert!(!cfg.reachable_after(0).unwrap().contains(&0));
    }

    #[test]
    fn test_reachable_from() {
        let func = make_branch_func();
        let cfg = Cfg::from_function(&func);

        let reachable = cfg.reachable_from(0);
        assert_eq!(reachable.len(), 3); // all blocks reachable from entry

        let reachable_from_then = cfg.reachable_from(1);
        assert_eq!(reachable_from_then.len(), 1);
    }
}
