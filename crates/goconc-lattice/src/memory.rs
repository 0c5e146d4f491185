//! Persistent abstract memory.
//!
//! Every cell records whether its location may stand for more than one
//! runtime object. Writes through such a location are weak updates (joined
//! with the old contents); others overwrite. The Top location is always
//! multi-allocated.

use crate::location::AddressableLocation;
use crate::value::Lattice;
use im::OrdMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cell<V> {
    value: V,
    multialloc: bool,
}

/// Immutable map from locations to abstract values. Every operation
/// returns a new memory sharing structure with the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory<V: Lattice> {
    cells: OrdMap<AddressableLocation, Cell<V>>,
}

impl<V: Lattice> Default for Memory<V> {
    fn default() -> Self {
        Self {
            cells: OrdMap::new(),
        }
    }
}

impl<V: Lattice> Memory<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an allocation of `loc` holding `value`. Allocating a location
    /// that is already mapped joins the values and marks it multi-allocated.
    pub fn allocate(&self, loc: impl Into<AddressableLocation>, value: V, force_multialloc: bool) -> Self {
        let loc = loc.into();
        let cell = match self.cells.get(&loc) {
            Some(old) => Cell {
                value: old.value.join(&value),
                multialloc: true,
            },
            None => Cell {
                value,
                multialloc: force_multialloc,
            },
        };
        Self {
            cells: self.cells.update(loc, cell),
        }
    }

    pub fn is_multialloc(&self, loc: &AddressableLocation) -> bool {
        loc.is_top() || self.cells.get(loc).is_some_and(|c| c.multialloc)
    }

    pub fn get(&self, loc: &AddressableLocation) -> Option<&V> {
        self.cells.get(loc).map(|c| &c.value)
    }

    /// Store `value` at `loc`: a strong update unless `loc` is
    /// multi-allocated, in which case the old contents are kept as well.
    pub fn update(&self, loc: impl Into<AddressableLocation>, value: V) -> Self {
        let loc = loc.into();
        let weak = self.is_multialloc(&loc);
        let cell = match self.cells.get(&loc) {
            Some(old) if weak => Cell {
                value: old.value.join(&value),
                multialloc: true,
            },
            Some(old) => Cell {
                value,
                multialloc: old.multialloc,
            },
            None => Cell {
                value,
                multialloc: weak,
            },
        };
        Self {
            cells: self.cells.update(loc, cell),
        }
    }

    /// Pointwise join; a location multi-allocated on either side stays so.
    pub fn join(&self, other: &Self) -> Self {
        let cells = self.cells.clone().union_with(other.cells.clone(), |a, b| Cell {
            value: a.value.join(&b.value),
            multialloc: a.multialloc || b.multialloc,
        });
        Self { cells }
    }

    pub fn locations(&self) -> impl Iterator<Item = &AddressableLocation> {
        self.cells.keys()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<V: Lattice + fmt::Display> fmt::Display for Memory<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self
            .cells
            .iter()
            .map(|(loc, cell)| {
                let mark = if self.is_multialloc(loc) { "*" } else { "" };
                format!("{loc}{mark} ↦ {}", cell.value)
            })
            .collect();
        write!(f, "[{}]", cells.join(", "))
    }
}
