//! goconc pointer: points-to queries for concurrency analysis.
//!
//! - Access paths inside points-to labels
//! - Type based selection of query targets
//! - Query collection, including extended queries on `sync.Cond` lockers
//!   and on channels nested in sent values
//! - The solver interface and the facade running it

pub mod access_path;
pub mod andersen;
pub mod include;
pub mod queries;
pub mod solver;

pub use andersen::{andersen, standard_queries, total_queries, PointerQueryResult};
pub use include::{IncludeType, TargetType};
pub use queries::CollectorOptions;
pub use solver::{Label, PointerConfig, PointerId, PointsToSet, PointsToSolver, SolverError};

use goconc_ir::ir::ValueId;

#[derive(Debug, thiserror::Error)]
pub enum PointerError {
    #[error("failed to add extended query {query:?} on {value}: {source}")]
    ExtendedQuery {
        value: ValueId,
        query: String,
        #[source]
        source: access_path::AccessPathError,
    },
    #[error(transparent)]
    AccessPath(#[from] access_path::AccessPathError),
    #[error("points-to analysis failed: {0}")]
    Solver(#[from] SolverError),
}
