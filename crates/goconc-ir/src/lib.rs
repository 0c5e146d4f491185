//! goconc IR: the whole-program view of a Go program for concurrency analysis.
//!
//! The IR is built by the Go front-end (go/ssa) and deserialized in Rust.
//! This crate provides:
//! - High-level IR wrappers matching the front-end JSON output
//! - CFG navigation helpers
//! - Type system helpers
//! - Call graph and dominator tree
//! - Persistent value sets

pub mod call_graph; // Call graph queries
pub mod cfg; // CFG navigation helpers
pub mod ir; // High-level IR wrappers
pub mod types; // Type system helpers
pub mod value_set; // Immutable sets of SSA values

#[cfg(any(test, feature = "test-fixtures"))]
pub mod builder;

/// Load a front-end JSON file into the owned IR.
pub fn load_json_file(path: &std::path::Path) -> Result<ir::Program, ir::IrError> {
    let data = std::fs::read_to_string(path)?;
    let program = ir::Program::from_json(&data)?;
    tracing::debug!(
        path = %path.display(),
        packages = program.packages.len(),
        "loaded program"
    );
    Ok(program)
}
