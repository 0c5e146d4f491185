//! Abstract value lattices stored in memory cells.

use serde::Serialize;
use std::fmt;

/// A join-semilattice with a least element.
pub trait Lattice: Clone + PartialEq {
    fn bottom() -> Self;

    fn join(&self, other: &Self) -> Self;

    fn leq(&self, other: &Self) -> bool {
        &self.join(other) == other
    }
}

/// Flat lattice over integer constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BasicValue {
    Bottom,
    Const(i64),
    Top,
}

impl Lattice for BasicValue {
    fn bottom() -> Self {
        BasicValue::Bottom
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (BasicValue::Bottom, x) | (x, BasicValue::Bottom) => *x,
            (BasicValue::Const(a), BasicValue::Const(b)) if a == b => *self,
            _ => BasicValue::Top,
        }
    }
}

impl fmt::Display for BasicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasicValue::Bottom => write!(f, "⊥"),
            BasicValue::Const(c) => write!(f, "{c}"),
            BasicValue::Top => write!(f, "⊤"),
        }
    }
}
