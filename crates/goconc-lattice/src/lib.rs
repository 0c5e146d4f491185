//! goconc lattice - abstract memory over allocation-site locations
//!
//! - Goroutine and call-context identities
//! - Allocation-site and Top locations
//! - Persistent memory with multi-allocation tracking

pub mod location; // Memory cell identities
pub mod memory; // Persistent abstract memory
pub mod value; // Abstract value lattices

pub use location::{AddressableLocation, AllocationSiteLocation, CallContext, Goroutine};
pub use memory::Memory;
pub use value::{BasicValue, Lattice};
