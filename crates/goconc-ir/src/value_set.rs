//! Immutable sets of SSA values.
//!
//! Backed by a persistent ordered tree: every update returns a new set
//! sharing structure with the old one, iteration order is the value id
//! order, and hashing is structural.

use crate::ir::{ValueId, ValueIndex};
use im::OrdSet;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSet(OrdSet<ValueId>);

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit(v: ValueId) -> Self {
        Self(OrdSet::unit(v))
    }

    /// s ∪ {v}
    #[must_use]
    pub fn insert(&self, v: ValueId) -> Self {
        Self(self.0.update(v))
    }

    /// s \ {v}
    #[must_use]
    pub fn remove(&self, v: ValueId) -> Self {
        Self(self.0.without(&v))
    }

    /// s1 ∪ s2
    #[must_use]
    pub fn join(&self, other: &ValueSet) -> Self {
        Self(self.0.clone().union(other.0.clone()))
    }

    /// s1 ∩ s2
    #[must_use]
    pub fn meet(&self, other: &ValueSet) -> Self {
        if self == other {
            return self.clone();
        }
        Self(self.0.clone().intersection(other.0.clone()))
    }

    pub fn contains(&self, v: ValueId) -> bool {
        self.0.contains(&v)
    }

    pub fn is_subset(&self, other: &ValueSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.0.iter().copied()
    }

    pub fn entries(&self) -> Vec<ValueId> {
        self.iter().collect()
    }

    /// Entries in canonical (position, name) order.
    pub fn sorted_entries(&self, index: &ValueIndex) -> Vec<ValueId> {
        let mut vs = self.entries();
        vs.sort_by_cached_key(|&v| index.sort_key(v));
        vs
    }

    /// Human readable rendering with source positions.
    pub fn display(&self, index: &ValueIndex) -> String {
        let strs: Vec<String> = self
            .sorted_entries(index)
            .into_iter()
            .map(|v| index.describe(v))
            .collect();
        format!("{{ {} }}", strs.join("\n"))
    }
}

impl FromIterator<ValueId> for ValueSet {
    fn from_iter<I: IntoIterator<Item = ValueId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl fmt::Display for ValueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strs: Vec<String> = self.iter().map(|v| v.to_string()).collect();
        write!(f, "{{ {} }}", strs.join(", "))
    }
}
