//! Call graph helpers for inter-procedural analysis.
//!
//! Provides indexed access to the call graph edges produced by the
//! front-end, pruning to the part reachable from the analysis entry, and
//! the dominator tree over the pruned graph.

use crate::ir::{CallEdge, Program, ValueId};
use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Indexed call graph
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Edges indexed by caller function name
    callers: HashMap<String, Vec<CallEdge>>,
    /// Edges indexed by callee function name
    callees: HashMap<String, Vec<CallEdge>>,
    /// Edges indexed by call site
    sites: HashMap<ValueId, Vec<CallEdge>>,
    /// All unique function names in the call graph
    functions: BTreeSet<String>,
}

impl CallGraph {
    /// Build a call graph index from all packages' call edges
    pub fn from_program(program: &Program) -> Self {
        Self::from_edges(program.call_edges().cloned())
    }

    pub fn from_edges(edges: impl IntoIterator<Item = CallEdge>) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    fn add_edge(&mut self, edge: CallEdge) {
        self.functions.insert(edge.caller.clone());
        self.functions.insert(edge.callee.clone());
        if let Some(site) = edge.site {
            self.sites.entry(site).or_default().push(edge.clone());
        }
        self.callees
            .entry(edge.callee.clone())
            .or_default()
            .push(edge.clone());
        self.callers.entry(edge.caller.clone()).or_default().push(edge);
    }

    /// Get all call edges where `func_name` is the caller
    pub fn calls_from(&self, func_name: &str) -> &[CallEdge] {
        self.callers
            .get(func_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get all call edges where `func_name` is the callee
    pub fn calls_to(&self, func_name: &str) -> &[CallEdge] {
        self.callees
            .get(func_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get all call edges originating from one call instruction
    pub fn calls_at(&self, site: ValueId) -> &[CallEdge] {
        self.sites.get(&site).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Get all function names in the call graph
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }

    pub fn contains(&self, func_name: &str) -> bool {
        self.functions.contains(func_name)
    }

    /// Get the number of edges in the call graph
    pub fn edge_count(&self) -> usize {
        self.callers.values().map(|v| v.len()).sum()
    }

    /// Find all functions transitively reachable from the given function
    pub fn transitive_callees(&self, func_name: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(func_name.to_string());

        while let Some(name) = queue.pop_front() {
            if visited.insert(name.clone()) {
                for edge in self.calls_from(&name) {
                    if !visited.contains(&edge.callee) {
                        queue.push_back(edge.callee.clone());
                    }
                }
            }
        }

        // Remove the starting function itself
        visited.remove(func_name);
        visited
    }

    /// The sub-graph reachable from `roots`, keeping only callees accepted
    /// by `keep` (typically: functions with a body in the program).
    pub fn pruned(&self, roots: &[&str], keep: impl Fn(&str) -> bool) -> CallGraph {
        let mut pruned = CallGraph::default();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<String> = roots.iter().map(|r| r.to_string()).collect();

        for root in roots {
            pruned.functions.insert(root.to_string());
        }

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            for edge in self.calls_from(&name) {
                if !keep(&edge.callee) {
                    continue;
                }
                pruned.add_edge(edge.clone());
                if !visited.contains(&edge.callee) {
                    queue.push_back(edge.callee.clone());
                }
            }
        }

        pruned
    }

    /// Dominator tree of the call graph rooted at `root`. Functions not
    /// reachable from `root` are absent from the tree.
    pub fn dominator_tree(&self, root: &str) -> DominatorTree {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for name in self.functions.iter().map(String::as_str).chain([root]) {
            if !nodes.contains_key(name) {
                nodes.insert(name, graph.add_node(name));
            }
        }
        for (caller, edges) in &self.callers {
            for edge in edges {
                graph.add_edge(nodes[caller.as_str()], nodes[edge.callee.as_str()], ());
            }
        }

        let doms = dominators::simple_fast(&graph, nodes[root]);

        let mut idom = HashMap::new();
        for (&name, &node) in &nodes {
            if let Some(parent) = doms.immediate_dominator(node) {
                idom.insert(name.to_string(), graph[parent].to_string());
            }
        }

        DominatorTree::new(root.to_string(), idom)
    }
}

/// Dominator tree over functions.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    root: String,
    idom: HashMap<String, String>,
    depth: HashMap<String, usize>,
}

impl DominatorTree {
    /// Build from an immediate-dominator map. Entries whose chain does not
    /// end at `root` are ignored.
    pub fn new(root: String, idom: HashMap<String, String>) -> Self {
        let mut depth = HashMap::new();
        depth.insert(root.clone(), 0);

        for start in idom.keys() {
            let mut chain = vec![start.as_str()];
            let mut current = start.as_str();
            let base = loop {
                if let Some(&d) = depth.get(current) {
                    break Some(d);
                }
                match idom.get(current) {
                    Some(parent) if !chain.contains(&parent.as_str()) => {
                        current = parent.as_str();
                        chain.push(current);
                    }
                    _ => break None,
                }
            };
            let Some(base) = base else { continue };
            // chain = [start, ..., current]; current already has a depth
            chain.pop();
            for (i, name) in chain.iter().rev().enumerate() {
                depth.insert(name.to_string(), base + i + 1);
            }
        }

        let idom = idom
            .into_iter()
            .filter(|(name, _)| depth.contains_key(name))
            .collect();
        Self { root, idom, depth }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn contains(&self, func: &str) -> bool {
        self.depth.contains_key(func)
    }

    pub fn immediate_dominator(&self, func: &str) -> Option<&str> {
        self.idom.get(func).map(String::as_str)
    }

    pub fn depth(&self, func: &str) -> Option<usize> {
        self.depth.get(func).copied()
    }

    /// True if `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: &str, b: &str) -> bool {
        let (Some(da), Some(mut db)) = (self.depth(a), self.depth(b)) else {
            return false;
        };
        let mut current = b;
        while db > da {
            match self.immediate_dominator(current) {
                Some(parent) => {
                    current = parent;
                    db -= 1;
                }
                None => return false,
            }
        }
        current == a
    }

    /// Deepest function dominating both `a` and `b`.
    pub fn lowest_common_ancestor<'a>(&'a self, a: &'a str, b: &'a str) -> Option<&'a str> {
        let (mut da, mut db) = (self.depth(a)?, self.depth(b)?);
        let (mut a, mut b) = (a, b);
        while da > db {
            a = self.immediate_dominator(a)?;
            da -= 1;
        }
        while db > da {
            b = self.immediate_dominator(b)?;
            db -= 1;
        }
        while a != b {
            a = self.immediate_dominator(a)?;
            b = self.immediate_dominator(b)?;
        }
        Some(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(caller: &str, callee: &str, site: u32) -> CallEdge {
        CallEdge {
            caller: caller.into(),
            callee: callee.into(),
            site: Some(ValueId(site)),
            span: None,
            is_dynamic: false,
            is_go: false,
            is_defer: false,
        }
    }

    /// main -> a -> c, main -> b -> c, a -> d, b -> db.Save
    fn make_test_graph() -> CallGraph {
        CallGraph::from_edges(vec![
            call("main", "a", 1),
            call("main", "b", 2),
            call("a", "c", 3),
            call("b", "c", 4),
            call("a", "d", 5),
            call("b", "db.Save", 6),
            call("unreachable", "d", 7),
        ])
    }

    #[test]
    fn test_calls_from_and_to() {
        let cg = make_test_graph();
        assert_eq!(cg.calls_from("main").len(), 2);
        assert_eq!(cg.calls_to("c").len(), 2);
        assert!(cg.calls_to("main").is_empty());
        assert_eq!(cg.calls_at(ValueId(3))[0].callee, "c");
        assert!(cg.calls_at(ValueId(99)).is_empty());
    }

    #[test]
    fn test_edge_count() {
        let cg = make_test_graph();
        assert_eq!(cg.edge_count(), 7);
        assert!(cg.contains("db.Save"));
    }

    #[test]
    fn test_transitive_callees() {
        let cg = make_test_graph();
        let reachable = cg.transitive_callees("main");
        assert!(reachable.contains("a"));
        assert!(reachable.contains("c"));
        assert!(reachable.contains("db.Save"));
        assert!(!reachable.contains("main")); // excludes self
        assert!(!reachable.contains("unreachable"));
    }

    #[test]
    fn test_transitive_callees_recursive() {
        let cg = CallGraph::from_edges(vec![call("f", "g", 1), call("g", "f", 2)]);
        let reachable = cg.transitive_callees("f");
        assert_eq!(reachable.len(), 1);
        assert!(reachable.contains("g"));
    }

    #[test]
    fn test_pruned() {
        let cg = make_test_graph();
        let pruned = cg.pruned(&["main"], |f| f != "db.Save");
        assert!(pruned.contains("main"));
        assert!(pruned.contains("d"));
        assert!(!pruned.contains("unreachable"));
        assert!(!pruned.contains("db.Save"));
        assert_eq!(pruned.edge_count(), 5);
    }

    #[test]
    fn test_dominator_tree() {
        let cg = make_test_graph().pruned(&["main"], |_| true);
        let dom = cg.dominator_tree("main");

        assert_eq!(dom.root(), "main");
        assert_eq!(dom.immediate_dominator("a"), Some("main"));
        // c is reached through both a and b
        assert_eq!(dom.immediate_dominator("c"), Some("main"));
        assert_eq!(dom.immediate_dominator("d"), Some("a"));
        assert_eq!(dom.depth("d"), Some(2));

        assert!(dom.dominates("main", "d"));
        assert!(dom.dominates("a", "d"));
        assert!(dom.dominates("d", "d"));
        assert!(!dom.dominates("b", "d"));
        assert!(!dom.dominates("a", "c"));
        assert!(!dom.contains("unreachable"));
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let dom = make_test_graph().dominator_tree("main");

        assert_eq!(dom.lowest_common_ancestor("d", "a"), Some("a"));
        assert_eq!(dom.lowest_common_ancestor("d", "c"), Some("main"));
        assert_eq!(dom.lowest_common_ancestor("main", "main"), Some("main"));
        assert_eq!(dom.lowest_common_ancestor("d", "unreachable"), None);
    }

    #[test]
    fn test_dominator_tree_single_function() {
        let dom = CallGraph::default().dominator_tree("main");
        assert!(dom.contains("main"));
        assert_eq!(dom.immediate_dominator("main"), None);
        assert!(dom.dominates("main", "main"));
    }

    #[test]
    fn test_empty_call_graph() {
        let cg = CallGraph::default();
        assert_eq!(cg.edge_count(), 0);
        assert!(cg.functions().is_empty());
    }
}
