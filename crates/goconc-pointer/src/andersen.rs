//! Points-to facade: collect queries, run the solver once, keep the maps.

use crate::access_path;
use crate::include::IncludeType;
use crate::queries::{collect_queries, CollectorOptions};
use crate::solver::{Label, PointerConfig, PointerId, PointsToSet, PointsToSolver, SolverResult};
use crate::PointerError;
use goconc_ir::ir::{Program, ValueId};
use std::collections::{BTreeMap, BTreeSet};

/// Solver result together with the handles of every registered query.
#[derive(Debug, Clone, Default)]
pub struct PointerQueryResult {
    pub result: SolverResult,
    pub queries: BTreeMap<ValueId, PointerId>,
    pub indirect_queries: BTreeMap<ValueId, PointerId>,
    /// `sync.Cond` allocation -> its `L` field.
    pub cond_queries: BTreeMap<ValueId, PointerId>,
    /// Sent value -> channels nested in it.
    pub payload_queries: BTreeMap<ValueId, Vec<PointerId>>,
}

static EMPTY: PointsToSet = PointsToSet::new();

impl PointerQueryResult {
    pub fn class(&self, id: PointerId) -> &PointsToSet {
        self.result.points_to.get(&id).unwrap_or(&EMPTY)
    }

    /// Direct points-to set of `value`, if it was queried.
    pub fn points_to(&self, value: ValueId) -> Option<&PointsToSet> {
        self.queries.get(&value).map(|&id| self.class(id))
    }

    pub fn points_to_indirect(&self, value: ValueId) -> Option<&PointsToSet> {
        self.indirect_queries.get(&value).map(|&id| self.class(id))
    }

    /// Allocation sites `value` may denote.
    pub fn roots(&self, value: ValueId) -> Result<BTreeSet<ValueId>, PointerError> {
        match self.points_to(value) {
            Some(pts) => label_roots(pts),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Allocation sites the locker of a `sync.Cond` may denote.
    pub fn cond_lockers(&self, cond: ValueId) -> Result<BTreeSet<ValueId>, PointerError> {
        match self.cond_queries.get(&cond) {
            Some(&id) => label_roots(self.class(id)),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Every abstract object nested in a sent value.
    pub fn payload_labels(&self, payload: ValueId) -> impl Iterator<Item = &Label> {
        self.payload_queries
            .get(&payload)
            .into_iter()
            .flatten()
            .flat_map(|&id| self.class(id).iter())
    }

    pub fn may_alias(&self, a: ValueId, b: ValueId) -> bool {
        match (self.points_to(a), self.points_to(b)) {
            (Some(pa), Some(pb)) => !pa.is_disjoint(pb),
            _ => false,
        }
    }
}

/// Roots of the labels in `pts`, failing on any malformed label path.
pub fn label_roots(pts: &PointsToSet) -> Result<BTreeSet<ValueId>, PointerError> {
    let mut roots = BTreeSet::new();
    for label in pts {
        let (root, _) = access_path::decode(label)?;
        roots.insert(root);
    }
    Ok(roots)
}

/// Run the points-to analysis on `program`, querying the values selected by
/// `include`. A solver failure is returned as an error; there is no partial
/// result.
pub fn andersen<S: PointsToSolver + ?Sized>(
    program: &Program,
    solver: &S,
    mains: &[String],
    include: IncludeType,
    options: CollectorOptions,
) -> Result<PointerQueryResult, PointerError> {
    let mut config = PointerConfig::new(mains.to_vec());
    config.build_call_graph = true;

    let extended = collect_queries(program, &mut config, include, options)?;
    tracing::info!(
        queries = config.queries().len(),
        indirect = config.indirect_queries().len(),
        cond = extended.cond_queries.len(),
        payload = extended.payload_queries.len(),
        "running points-to analysis"
    );

    let result = solver.analyze(program, &config).map_err(|err| {
        tracing::error!(error = %err, "points-to analysis failed");
        PointerError::Solver(err)
    })?;

    Ok(PointerQueryResult {
        result,
        queries: config.queries().clone(),
        indirect_queries: config.indirect_queries().clone(),
        cond_queries: extended.cond_queries,
        payload_queries: extended.payload_queries,
    })
}

/// Points-to results for channels, functions and interfaces.
pub fn standard_queries<S: PointsToSolver + ?Sized>(
    program: &Program,
    solver: &S,
    mains: &[String],
    options: CollectorOptions,
) -> Result<PointerQueryResult, PointerError> {
    andersen(program, solver, mains, IncludeType::standard(), options)
}

/// Points-to results for every pointer-like value.
pub fn total_queries<S: PointsToSolver + ?Sized>(
    program: &Program,
    solver: &S,
    mains: &[String],
    options: CollectorOptions,
) -> Result<PointerQueryResult, PointerError> {
    andersen(program, solver, mains, IncludeType::total(), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::StaticSolver;
    use goconc_ir::builder::ProgramBuilder;

    fn mains() -> Vec<String> {
        vec!["main.main".to_string()]
    }

    #[test]
    fn test_standard_queries_resolve_phi() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let (mut ch1, mut ch2, mut phi) = (ValueId(0), ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            ch1 = f.make_chan(chan_int);
            ch2 = f.make_chan(chan_int);
            phi = f.phi(&[ch1, ch2], chan_int);
        });
        let program = pb.build();
        let solver = StaticSolver::new().points_to_sites(phi, &[ch1, ch2]);

        let res = standard_queries(&program, &solver, &mains(), CollectorOptions::default()).unwrap();
        assert_eq!(res.roots(phi).unwrap(), BTreeSet::from([ch1, ch2]));
        assert_eq!(res.roots(ch1).unwrap(), BTreeSet::from([ch1]));
        assert!(res.may_alias(phi, ch2));
        assert!(!res.may_alias(ch1, ch2));
        assert!(res.result.call_graph.is_some());
    }

    #[test]
    fn test_cond_lockers_and_payloads() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let object_struct = pb.struct_of("struct{ch chan int}", &[("ch", chan_int)]);
        let object = pb.named("main.Object", object_struct);
        let ptr_object = pb.pointer_to(object);
        let chan_obj = pb.chan_of(ptr_object);
        let (mut mu, mut cond, mut obj, mut inner) = (ValueId(0), ValueId(0), ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            mu = f.new_sync("Mutex");
            cond = f.new_sync("Cond");
            inner = f.make_chan(chan_int);
            obj = f.alloc(ptr_object);
            let ch = f.make_chan(chan_obj);
            f.send(ch, obj);
        });
        let program = pb.build();
        let solver = StaticSolver::new()
            .points_to_path(cond, "x.L", [Label::new(mu)])
            .points_to_path(obj, "x.ch", [Label::new(inner)]);

        let res = total_queries(&program, &solver, &mains(), CollectorOptions::default()).unwrap();
        assert_eq!(res.cond_lockers(cond).unwrap(), BTreeSet::from([mu]));
        assert!(res.cond_lockers(mu).unwrap().is_empty());
        let payload: Vec<&Label> = res.payload_labels(obj).collect();
        assert_eq!(payload, vec![&Label::new(inner)]);
        assert_eq!(res.payload_labels(inner).count(), 0);
    }

    #[test]
    fn test_solver_failure_is_an_error() {
        let program = ProgramBuilder::new().build();
        let err = standard_queries(
            &program,
            &StaticSolver::failing("no main function"),
            &mains(),
            CollectorOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PointerError::Solver(_)));
        assert!(err.to_string().contains("no main function"));
    }

    #[test]
    fn test_malformed_label_is_an_error() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let mut phi = ValueId(0);
        pb.function("main.main", |f| {
            phi = f.phi(&[], chan_int);
        });
        let program = pb.build();
        let solver = StaticSolver::new().points_to(phi, [Label::with_path(ValueId(1), "ch")]);

        let res = standard_queries(&program, &solver, &mains(), CollectorOptions::default()).unwrap();
        assert!(matches!(res.roots(phi), Err(PointerError::AccessPath(_))));
    }
}
