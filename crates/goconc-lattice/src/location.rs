//! Identities of abstract memory cells.

use goconc_ir::ir::ValueId;
use serde::Serialize;
use std::fmt;

/// A goroutine, identified by the chain of `go` sites that spawned it.
/// The main goroutine has an empty chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Goroutine(Vec<ValueId>);

impl Goroutine {
    pub fn main() -> Self {
        Self::default()
    }

    /// The goroutine started by `site` from this one.
    pub fn spawn(&self, site: ValueId) -> Self {
        let mut chain = self.0.clone();
        chain.push(site);
        Self(chain)
    }

    pub fn is_main(&self) -> bool {
        self.0.is_empty()
    }

    pub fn spawn_sites(&self) -> &[ValueId] {
        &self.0
    }
}

impl fmt::Display for Goroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "main")?;
        for site in &self.0 {
            write!(f, ">{site}")?;
        }
        Ok(())
    }
}

/// Chain of call sites leading to the current function.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CallContext(Vec<ValueId>);

impl CallContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn call(&self, site: ValueId) -> Self {
        let mut chain = self.0.clone();
        chain.push(site);
        Self(chain)
    }

    /// Keep only the innermost `k` call sites.
    pub fn truncate(&self, k: usize) -> Self {
        let start = self.0.len().saturating_sub(k);
        Self(self.0[start..].to_vec())
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn sites(&self) -> &[ValueId] {
        &self.0
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sites: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", sites.join(" "))
    }
}

/// A memory cell created by one allocation site, in one goroutine and
/// calling context. Equal iff all three parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AllocationSiteLocation {
    pub goro: Goroutine,
    pub context: CallContext,
    pub site: ValueId,
}

impl AllocationSiteLocation {
    pub fn new(goro: Goroutine, context: CallContext, site: ValueId) -> Self {
        Self {
            goro,
            context,
            site,
        }
    }
}

impl fmt::Display for AllocationSiteLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.site, self.goro, self.context)
    }
}

/// Location a pointer may address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AddressableLocation {
    Allocation(AllocationSiteLocation),
    /// Any object the analysis could not resolve precisely.
    Top,
}

impl AddressableLocation {
    pub fn is_top(&self) -> bool {
        matches!(self, AddressableLocation::Top)
    }

    pub fn as_allocation(&self) -> Option<&AllocationSiteLocation> {
        match self {
            AddressableLocation::Allocation(al) => Some(al),
            AddressableLocation::Top => None,
        }
    }
}

impl From<AllocationSiteLocation> for AddressableLocation {
    fn from(al: AllocationSiteLocation) -> Self {
        AddressableLocation::Allocation(al)
    }
}

impl fmt::Display for AddressableLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressableLocation::Allocation(al) => al.fmt(f),
            AddressableLocation::Top => write!(f, "⊤"),
        }
    }
}
