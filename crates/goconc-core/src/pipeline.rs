//! Analysis pipeline: points-to queries -> solver -> primitives -> P-sets.

use crate::config::Config;
use goconc_ir::call_graph::{CallGraph, DominatorTree};
use goconc_ir::ir::{IrError, Program};
use goconc_pointer::{andersen, PointerError, PointerQueryResult, PointsToSolver};
use goconc_topo::{collect_primitives, compute_psets, PSets, Primitives};
use std::path::Path;

/// Everything computed for one entry function.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub entry: String,
    pub pointer: PointerQueryResult,
    /// Call graph reachable from the entry, restricted to program functions.
    pub call_graph: CallGraph,
    pub dominators: DominatorTree,
    pub primitives: Primitives,
    pub psets: PSets,
}

/// Summary statistics for an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AnalysisSummary {
    pub functions: usize,
    pub queries: usize,
    pub primitives: usize,
    pub uses: usize,
    pub psets: usize,
    pub largest_pset: usize,
}

impl Analysis {
    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            functions: self.call_graph.functions().len(),
            queries: self.pointer.queries.len()
                + self.pointer.indirect_queries.len()
                + self.pointer.cond_queries.len()
                + self.pointer.payload_queries.values().map(Vec::len).sum::<usize>(),
            primitives: self.primitives.len(),
            uses: self.primitives.sites.len(),
            psets: self.psets.len(),
            largest_pset: self.psets.iter().map(|s| s.len()).max().unwrap_or(0),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("entry function {0} not found in program")]
    UnknownEntry(String),
    #[error("failed to load program: {0}")]
    Ir(#[from] IrError),
    #[error(transparent)]
    Pointer(#[from] PointerError),
}

/// Run the whole pipeline on an already loaded program.
pub fn analyze_program<S: PointsToSolver + ?Sized>(
    program: &Program,
    solver: &S,
    config: &Config,
) -> Result<Analysis, PipelineError> {
    let Some(entry) = config.psets.resolve_entry(program) else {
        tracing::error!(entry = %config.psets.entry, "entry function not found");
        return Err(PipelineError::UnknownEntry(config.psets.entry.clone()));
    };

    let pointer = andersen(
        program,
        solver,
        std::slice::from_ref(&entry),
        config.pointer.include_type(),
        config.pointer.collector_options(),
    )?;

    let full = match &pointer.result.call_graph {
        Some(cg) => cg.clone(),
        None => {
            tracing::warn!("solver built no call graph, using static call edges");
            CallGraph::from_program(program)
        }
    };
    let call_graph = full.pruned(&[entry.as_str()], |f| program.function(f).is_some());
    for func in call_graph.functions() {
        for edge in full.calls_from(func) {
            if program.function(&edge.callee).is_none() {
                tracing::debug!(caller = %func, callee = %edge.callee, "callee outside the program");
            }
        }
    }
    let dominators = call_graph.dominator_tree(&entry);

    let primitives = collect_primitives(
        program,
        &entry,
        &pointer,
        &call_graph,
        config.pointer.skip_sync,
    )?;
    let psets = compute_psets(program, &entry, &call_graph, &dominators, &primitives);

    let analysis = Analysis {
        entry,
        pointer,
        call_graph,
        dominators,
        primitives,
        psets,
    };
    let summary = analysis.summary();
    tracing::info!(
        entry = %analysis.entry,
        functions = summary.functions,
        queries = summary.queries,
        primitives = summary.primitives,
        uses = summary.uses,
        psets = summary.psets,
        largest = summary.largest_pset,
        "analysis complete"
    );
    Ok(analysis)
}

/// Load a front-end JSON file and analyze it.
pub fn analyze_file<S: PointsToSolver + ?Sized>(
    path: &Path,
    solver: &S,
    config: &Config,
) -> Result<Analysis, PipelineError> {
    let program = goconc_ir::load_json_file(path)?;
    analyze_program(&program, solver, config)
}
