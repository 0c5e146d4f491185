//! Partitioning of concurrency primitives into P-sets.
//!
//! A P-set groups the primitives that have to be analysed together with
//! one primitive `p`: those whose operations can be ordered with, or raced
//! against, operations on `p` inside the region of the call graph where `p`
//! lives. Anything outside it cannot influence how `p` behaves.
//!
//! `scope(p)` is the lowest common dominator of the functions allocating
//! and using `p`. An interaction `q -> p` is recorded in a function `F` when
//! - an operation on `q` can execute before an operation on `p` in `F`,
//! - `q` and `p` are operands of different cases of one select, or
//! - `q` is used by a goroutine (or deferred call) started at a point from
//!   which an operation on `p` is reachable.
//!
//! A call site counts as an operation on every primitive its callees use.
//! P-set(p) holds `p` and every `q` with an interaction `q -> p` recorded
//! in a function dominated by `scope(p)`, as long as `scope(q)` is also
//! dominated by `scope(p)`. When instead `scope(q)` strictly encloses
//! `scope(p)`, the interaction puts `p` into P-set(q), so a pair that
//! interacts always shares a set. Each set is then closed under the
//! channels that carry its members and the lockers of its condition
//! variables.

use crate::primitives::{Primitives, UseKind};
use goconc_ir::call_graph::{CallGraph, DominatorTree};
use goconc_ir::cfg::{Cfg, InstrPos};
use goconc_ir::ir::{Program, ValueId, ValueIndex, ValueKind};
use goconc_ir::value_set::ValueSet;
use goconc_pointer::{PointerError, PointerQueryResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Ordered collection of P-sets. Sets may overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PSets(Vec<ValueSet>);

impl PSets {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValueSet> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ValueSet] {
        &self.0
    }

    /// Union of every P-set containing `v`; empty if there is none.
    pub fn get(&self, v: ValueId) -> ValueSet {
        self.0
            .iter()
            .filter(|set| set.contains(v))
            .fold(ValueSet::new(), |acc, set| acc.join(set))
    }

    /// Like [`PSets::get`], resolving `v` to the allocation sites it may
    /// denote first.
    pub fn get_aliased(
        &self,
        v: ValueId,
        pointer: &PointerQueryResult,
    ) -> Result<ValueSet, PointerError> {
        let mut result = self.get(v);
        for root in pointer.roots(v)? {
            result = result.join(&self.get(root));
        }
        Ok(result)
    }

    pub fn display(&self, index: &ValueIndex) -> String {
        self.0
            .iter()
            .enumerate()
            .map(|(i, set)| format!("P-set {i}: {}", set.display(index)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for PSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sets: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", sets.join(", "))
    }
}

impl<'a> IntoIterator for &'a PSets {
    type Item = &'a ValueSet;
    type IntoIter = std::slice::Iter<'a, ValueSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An operation inside one function, on one or more primitives.
struct Event {
    pos: InstrPos,
    primitives: BTreeSet<ValueId>,
    /// Select instruction the operation is a case of.
    select: Option<ValueId>,
    /// Runs detached from the current point: `go` or `defer`.
    detached: bool,
}

/// Compute the P-sets of the primitives reachable from `entry`.
///
/// `call_graph` is the pruned graph the dominator tree was built from.
pub fn compute_psets(
    program: &Program,
    entry: &str,
    call_graph: &CallGraph,
    dom: &DominatorTree,
    prims: &Primitives,
) -> PSets {
    let index = program.value_index();

    let scopes: BTreeMap<ValueId, String> = prims
        .allocations
        .keys()
        .map(|&p| (p, scope_of(dom, prims, p, entry)))
        .collect();

    let interactions = record_interactions(program, call_graph, dom, prims);

    let mut order: Vec<ValueId> = prims.allocations.keys().copied().collect();
    order.sort_by_cached_key(|&v| index.sort_key(v));

    // Members of each P-set before closing it.
    let mut members: BTreeMap<ValueId, ValueSet> =
        order.iter().map(|&p| (p, ValueSet::unit(p))).collect();
    for (&p, sources) in &interactions {
        let Some(scope) = scopes.get(&p) else { continue };
        for (&q, functions) in sources {
            let Some(outer) = scopes.get(&q) else { continue };
            if !functions.iter().any(|f| dom.dominates(scope, f)) {
                continue;
            }
            // An interaction with a primitive from an enclosing scope lands in
            // that primitive's P-set instead.
            let owner = if dom.dominates(scope, outer) {
                Some((p, q))
            } else if dom.dominates(outer, scope) {
                Some((q, p))
            } else {
                None
            };
            if let Some((owner, member)) = owner {
                if let Some(set) = members.get_mut(&owner) {
                    *set = set.insert(member);
                }
            }
        }
    }

    let mut psets: Vec<ValueSet> = Vec::new();
    for &p in &order {
        let scope = scopes[&p].as_str();
        let set = close(members[&p].clone(), prims);
        tracing::debug!(
            primitive = %index.describe(p),
            scope = %scope,
            size = set.len(),
            "P-set"
        );
        if !psets.contains(&set) {
            psets.push(set);
        }
    }

    tracing::info!(
        primitives = prims.len(),
        psets = psets.len(),
        "computed P-sets"
    );
    PSets(psets)
}

/// Lowest common dominator of the functions allocating and using `p`.
fn scope_of(dom: &DominatorTree, prims: &Primitives, p: ValueId, entry: &str) -> String {
    let mut scope: Option<String> = None;
    for func in prims.functions_of(p) {
        if !dom.contains(func) {
            continue;
        }
        scope = Some(match scope {
            None => func.to_string(),
            Some(s) => dom
                .lowest_common_ancestor(&s, func)
                .unwrap_or(dom.root())
                .to_string(),
        });
    }
    scope.unwrap_or_else(|| {
        if dom.contains(entry) { entry } else { dom.root() }.to_string()
    })
}

/// Add carriers of members and lockers of condition variables until
/// nothing changes.
fn close(mut set: ValueSet, prims: &Primitives) -> ValueSet {
    let mut work: Vec<ValueId> = set.entries();
    while let Some(v) = work.pop() {
        let extra = prims
            .carriers
            .get(&v)
            .into_iter()
            .chain(prims.lockers.get(&v))
            .flatten();
        for &w in extra {
            if !set.contains(w) {
                set = set.insert(w);
                work.push(w);
            }
        }
    }
    set
}

/// p -> q -> functions where `q -> p` was recorded.
type Interactions = BTreeMap<ValueId, BTreeMap<ValueId, BTreeSet<String>>>;

fn record_interactions(
    program: &Program,
    call_graph: &CallGraph,
    dom: &DominatorTree,
    prims: &Primitives,
) -> Interactions {
    // Primitives used directly in each function.
    let mut direct: HashMap<&str, BTreeSet<ValueId>> = HashMap::new();
    for site in &prims.sites {
        direct
            .entry(site.function.as_str())
            .or_default()
            .extend(site.primitives.iter().copied());
    }
    let mut effective: HashMap<String, BTreeSet<ValueId>> = HashMap::new();
    let mut effective_of = |callee: &str| -> BTreeSet<ValueId> {
        effective
            .entry(callee.to_string())
            .or_insert_with(|| {
                let mut set = direct.get(callee).cloned().unwrap_or_default();
                for f in call_graph.transitive_callees(callee) {
                    if let Some(used) = direct.get(f.as_str()) {
                        set.extend(used.iter().copied());
                    }
                }
                set
            })
            .clone()
    };

    let mut interactions = Interactions::new();
    let mut record = |q: ValueId, p: ValueId, func: &str| {
        if q != p {
            interactions
                .entry(p)
                .or_default()
                .entry(q)
                .or_default()
                .insert(func.to_string());
        }
    };

    for func in program.functions() {
        if !dom.contains(&func.name) {
            continue;
        }

        let mut events: Vec<Event> = prims
            .sites
            .iter()
            .filter(|s| s.function == func.name)
            .map(|s| Event {
                pos: s.pos,
                primitives: s.primitives.clone(),
                select: match s.kind {
                    UseKind::Select { .. } => Some(s.instr),
                    _ => None,
                },
                detached: false,
            })
            .collect();
        for block in &func.blocks {
            for (i, instr) in block.instructions.iter().enumerate() {
                let detached = match instr.kind {
                    ValueKind::Call => false,
                    ValueKind::Go | ValueKind::Defer => true,
                    _ => continue,
                };
                let mut primitives = BTreeSet::new();
                for edge in call_graph.calls_at(instr.id) {
                    primitives.extend(effective_of(&edge.callee));
                }
                if !primitives.is_empty() {
                    events.push(Event {
                        pos: InstrPos {
                            block: block.id,
                            index: i,
                        },
                        primitives,
                        select: None,
                        detached,
                    });
                }
            }
        }
        if events.is_empty() {
            continue;
        }

        let cfg = Cfg::from_function(func);
        for (i, a) in events.iter().enumerate() {
            for (j, b) in events.iter().enumerate() {
                if i == j {
                    continue;
                }
                let same_select = a.select.is_some() && a.select == b.select;
                let ordered = cfg.precedes(a.pos, b.pos);
                for &q in &a.primitives {
                    for &p in &b.primitives {
                        if ordered || same_select {
                            record(q, p, &func.name);
                        }
                        if ordered && a.detached {
                            record(p, q, &func.name);
                        }
                    }
                }
            }
        }
    }

    interactions
}
