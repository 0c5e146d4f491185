//! goconc topo - concurrency primitives and P-set partitioning

pub mod primitives;
pub mod pset;

pub use primitives::{collect_primitives, Primitives, SyncOp, UseKind, UseSite};
pub use pset::{compute_psets, PSets};
