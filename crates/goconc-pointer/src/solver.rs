//! Interface to the points-to solver.
//!
//! The fixpoint algorithm lives outside this workspace. The analysis only
//! registers queries on a [`PointerConfig`] and reads back, per query
//! handle, the set of abstract objects the queried pointer may point to.

use crate::access_path::{self, AccessStep};
use goconc_ir::call_graph::CallGraph;
use goconc_ir::ir::{Program, TypeId, ValueId};
use goconc_ir::types::TypeTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Handle for one registered query. Opaque, totally ordered and usable as a
/// map key; two lookups of the same query yield the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointerId(u32);

impl fmt::Display for PointerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// An abstract object: the allocation site that created it and, for
/// objects nested inside aggregates, the access path reaching them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub value: ValueId,
    #[serde(default)]
    pub path: String,
}

impl Label {
    pub fn new(value: ValueId) -> Self {
        Self {
            value,
            path: String::new(),
        }
    }

    pub fn with_path(value: ValueId, path: &str) -> Self {
        Self {
            value,
            path: path.to_string(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.path)
    }
}

pub type PointsToSet = BTreeSet<Label>;

/// A query on a value following an access path (`x.L`, `x.Object.ch`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedQuery {
    pub value: ValueId,
    /// The query text, rooted at `x`.
    pub query: String,
    pub steps: Vec<AccessStep>,
}

/// Queries and options handed to the solver.
#[derive(Debug, Clone, Default)]
pub struct PointerConfig {
    /// Entry functions of the whole-program analysis.
    pub mains: Vec<String>,
    pub build_call_graph: bool,
    queries: BTreeMap<ValueId, PointerId>,
    indirect_queries: BTreeMap<ValueId, PointerId>,
    extended_queries: BTreeMap<(ValueId, String), (PointerId, ExtendedQuery)>,
    next_id: u32,
}

impl PointerConfig {
    pub fn new(mains: Vec<String>) -> Self {
        Self {
            mains,
            ..Self::default()
        }
    }

    fn fresh(&mut self) -> PointerId {
        let id = PointerId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Query what `value` points to.
    pub fn add_query(&mut self, value: ValueId) -> PointerId {
        if let Some(&id) = self.queries.get(&value) {
            return id;
        }
        let id = self.fresh();
        self.queries.insert(value, id);
        id
    }

    /// Query what `*value` points to.
    pub fn add_indirect_query(&mut self, value: ValueId) -> PointerId {
        if let Some(&id) = self.indirect_queries.get(&value) {
            return id;
        }
        let id = self.fresh();
        self.indirect_queries.insert(value, id);
        id
    }

    /// Query what the location reached from `value` by `query` points to.
    /// The query must be valid for `value_type`.
    pub fn add_extended_query(
        &mut self,
        types: &TypeTable,
        value: ValueId,
        value_type: TypeId,
        query: &str,
    ) -> Result<PointerId, access_path::AccessPathError> {
        let key = (value, query.to_string());
        if let Some((id, _)) = self.extended_queries.get(&key) {
            return Ok(*id);
        }
        let steps = access_path::validate_extended_query(types, value_type, query)?;
        let id = self.fresh();
        let extended = ExtendedQuery {
            value,
            query: query.to_string(),
            steps,
        };
        self.extended_queries.insert(key, (id, extended));
        Ok(id)
    }

    pub fn queries(&self) -> &BTreeMap<ValueId, PointerId> {
        &self.queries
    }

    pub fn indirect_queries(&self) -> &BTreeMap<ValueId, PointerId> {
        &self.indirect_queries
    }

    pub fn extended_queries(&self) -> impl Iterator<Item = (PointerId, &ExtendedQuery)> {
        self.extended_queries.values().map(|(id, q)| (*id, q))
    }

    pub fn query_count(&self) -> usize {
        self.queries.len() + self.indirect_queries.len() + self.extended_queries.len()
    }
}

/// What the solver returns.
#[derive(Debug, Clone, Default)]
pub struct SolverResult {
    pub points_to: BTreeMap<PointerId, PointsToSet>,
    /// Call graph discovered on the fly, when requested.
    pub call_graph: Option<CallGraph>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SolverError(pub String);

pub trait PointsToSolver {
    fn analyze(&self, program: &Program, config: &PointerConfig)
        -> Result<SolverResult, SolverError>;
}

/// Solver answering queries from declared facts.
///
/// Allocation sites without declared facts point to themselves, which is
/// what a real solver reports for `make(chan T)` and `new(T)`.
#[cfg(any(test, feature = "test-fixtures"))]
#[derive(Debug, Clone, Default)]
pub struct StaticSolver {
    direct: BTreeMap<ValueId, PointsToSet>,
    indirect: BTreeMap<ValueId, PointsToSet>,
    extended: BTreeMap<(ValueId, String), PointsToSet>,
    failure: Option<String>,
}

#[cfg(any(test, feature = "test-fixtures"))]
impl StaticSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// `value` may point to each of `labels`.
    pub fn points_to(mut self, value: ValueId, labels: impl IntoIterator<Item = Label>) -> Self {
        self.direct.entry(value).or_default().extend(labels);
        self
    }

    /// `value` may point to the allocation sites `sites`.
    pub fn points_to_sites(self, value: ValueId, sites: &[ValueId]) -> Self {
        self.points_to(value, sites.iter().map(|&s| Label::new(s)))
    }

    pub fn points_to_indirect(
        mut self,
        value: ValueId,
        labels: impl IntoIterator<Item = Label>,
    ) -> Self {
        self.indirect.entry(value).or_default().extend(labels);
        self
    }

    /// The location `query` (e.g. `x.ch`) reached from `value` may point to
    /// each of `labels`.
    pub fn points_to_path(
        mut self,
        value: ValueId,
        query: &str,
        labels: impl IntoIterator<Item = Label>,
    ) -> Self {
        self.extended
            .entry((value, query.to_string()))
            .or_default()
            .extend(labels);
        self
    }
}

#[cfg(any(test, feature = "test-fixtures"))]
impl PointsToSolver for StaticSolver {
    fn analyze(
        &self,
        program: &Program,
        config: &PointerConfig,
    ) -> Result<SolverResult, SolverError> {
        use goconc_ir::ir::ValueKind;

        if let Some(message) = &self.failure {
            return Err(SolverError(message.clone()));
        }
        let index = program.value_index();
        let is_site = |v: ValueId| {
            index
                .get(v)
                .and_then(|info| info.kind())
                .is_some_and(|k| matches!(k, ValueKind::MakeChan | ValueKind::Alloc))
        };
        let own = |v: ValueId| -> PointsToSet {
            if is_site(v) {
                PointsToSet::from([Label::new(v)])
            } else {
                PointsToSet::new()
            }
        };

        let mut points_to = BTreeMap::new();
        for (&value, &id) in config.queries() {
            let pts = self.direct.get(&value).cloned().unwrap_or_else(|| own(value));
            points_to.insert(id, pts);
        }
        for (&value, &id) in config.indirect_queries() {
            points_to.insert(id, self.indirect.get(&value).cloned().unwrap_or_default());
        }
        for (id, query) in config.extended_queries() {
            let key = (query.value, query.query.clone());
            let pts = match self.extended.get(&key) {
                Some(pts) => pts.clone(),
                // `x` alone is the value itself.
                None if query.steps.is_empty() => self
                    .direct
                    .get(&query.value)
                    .cloned()
                    .unwrap_or_else(|| own(query.value)),
                None => PointsToSet::new(),
            };
            points_to.insert(id, pts);
        }

        let call_graph = config
            .build_call_graph
            .then(|| CallGraph::from_program(program));
        Ok(SolverResult {
            points_to,
            call_graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconc_ir::builder::ProgramBuilder;

    #[test]
    fn test_query_ids_are_idempotent() {
        let mut config = PointerConfig::new(vec!["main.main".into()]);
        let a = config.add_query(ValueId(1));
        let b = config.add_query(ValueId(2));
        assert_ne!(a, b);
        assert_eq!(config.add_query(ValueId(1)), a);

        let i = config.add_indirect_query(ValueId(1));
        assert_ne!(i, a);
        assert_eq!(config.add_indirect_query(ValueId(1)), i);
        assert_eq!(config.query_count(), 3);
    }

    #[test]
    fn test_extended_query_validation() {
        let mut pb = ProgramBuilder::new();
        let cond = pb.ty("sync.Cond");
        let ptr_cond = pb.pointer_to(cond);
        let types = TypeTable::from_program(&pb.build());

        let mut config = PointerConfig::default();
        let id = config
            .add_extended_query(&types, ValueId(4), ptr_cond, "x.L")
            .unwrap();
        assert_eq!(
            config
                .add_extended_query(&types, ValueId(4), ptr_cond, "x.L")
                .unwrap(),
            id
        );
        assert!(config
            .add_extended_query(&types, ValueId(4), ptr_cond, "x.Missing")
            .is_err());

        let (qid, query) = config.extended_queries().next().unwrap();
        assert_eq!(qid, id);
        assert_eq!(query.steps, vec![AccessStep::Field("L".into())]);
    }

    #[test]
    fn test_static_solver_defaults_to_allocation_sites() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let (mut ch, mut phi) = (ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            ch = f.make_chan(chan_int);
            phi = f.phi(&[ch], chan_int);
        });
        let program = pb.build();

        let mut config = PointerConfig::default();
        config.build_call_graph = true;
        let q_ch = config.add_query(ch);
        let q_phi = config.add_query(phi);

        let result = StaticSolver::new().analyze(&program, &config).unwrap();
        assert_eq!(result.points_to[&q_ch], PointsToSet::from([Label::new(ch)]));
        assert!(result.points_to[&q_phi].is_empty());
        assert!(result.call_graph.is_some());

        let solver = StaticSolver::new().points_to_sites(phi, &[ch]);
        let result = solver.analyze(&program, &config).unwrap();
        assert_eq!(result.points_to[&q_phi], PointsToSet::from([Label::new(ch)]));
    }

    #[test]
    fn test_static_solver_failure() {
        let program = ProgramBuilder::new().build();
        let err = StaticSolver::failing("no main package")
            .analyze(&program, &PointerConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "no main package");
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label::with_path(ValueId(3), ".ch").to_string(), "v3.ch");
        assert_eq!(PointerId(2).to_string(), "p2");
    }
}
