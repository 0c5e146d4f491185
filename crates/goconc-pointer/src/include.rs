//! Which values get a points-to query, decided by their static type.

use goconc_ir::ir::{TypeId, TypeKind};
use goconc_ir::types::TypeTable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named/pointer nesting deeper than this is treated as untargeted.
const MAX_DEPTH: usize = 64;

/// Pointer-like type categories to query. `all` supersedes the other flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeType {
    pub all: bool,
    pub chan: bool,
    pub interface: bool,
    pub function: bool,
    pub map: bool,
    pub slice: bool,
    pub pointer: bool,
}

/// How a value of some type takes part in the points-to analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    NotTargeted,
    /// Query the value itself.
    Direct,
    /// Query what the value points to.
    Indirect,
    DirectAndIndirect,
}

impl TargetType {
    fn from_flags(direct: bool, indirect: bool) -> Self {
        match (direct, indirect) {
            (false, false) => TargetType::NotTargeted,
            (true, false) => TargetType::Direct,
            (false, true) => TargetType::Indirect,
            (true, true) => TargetType::DirectAndIndirect,
        }
    }

    pub fn is_targeted(self) -> bool {
        self != TargetType::NotTargeted
    }

    pub fn is_direct(self) -> bool {
        matches!(self, TargetType::Direct | TargetType::DirectAndIndirect)
    }

    pub fn is_indirect(self) -> bool {
        matches!(self, TargetType::Indirect | TargetType::DirectAndIndirect)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetType::NotTargeted => "NotTargeted",
            TargetType::Direct => "Direct",
            TargetType::Indirect => "Indirect",
            TargetType::DirectAndIndirect => "Direct+Indirect",
        };
        f.write_str(s)
    }
}

impl IncludeType {
    /// Channels, functions and interfaces.
    pub fn standard() -> Self {
        Self {
            chan: true,
            function: true,
            interface: true,
            ..Self::default()
        }
    }

    /// Every pointer-like category.
    pub fn total() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn check_type(&self, types: &TypeTable, ty: TypeId) -> TargetType {
        self.check(types, ty, 0)
    }

    fn check(&self, types: &TypeTable, ty: TypeId, depth: usize) -> TargetType {
        if depth > MAX_DEPTH {
            return TargetType::NotTargeted;
        }
        let direct_if = |flag: bool| TargetType::from_flags(self.all || flag, false);

        match types.kind(ty) {
            TypeKind::Named => match types.get(ty).map(|t| t.underlying) {
                Some(u) if u != 0 => self.check(types, u, depth + 1),
                _ => TargetType::NotTargeted,
            },
            TypeKind::Chan => direct_if(self.chan),
            TypeKind::Signature => direct_if(self.function),
            TypeKind::Interface => direct_if(self.interface),
            TypeKind::Map => direct_if(self.map),
            TypeKind::Slice => direct_if(self.slice),
            TypeKind::Pointer => {
                let indirect = types
                    .elem(ty)
                    .map(|elem| self.check(types, elem, depth + 1).is_targeted())
                    .unwrap_or(false);
                TargetType::from_flags(self.all || self.pointer, indirect)
            }
            _ => TargetType::NotTargeted,
        }
    }
}
