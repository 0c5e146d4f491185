//! Type system helpers for working with Go types from front-end data.

use crate::ir::{FieldRef, Program, TypeId, TypeKind, TypeRef};
use std::collections::HashMap;

/// Sync types whose values are concurrency primitives.
pub const SYNC_PRIMITIVES: &[&str] = &["Mutex", "RWMutex", "Cond", "WaitGroup", "Once"];

/// Type lookup table for the whole program
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: HashMap<TypeId, TypeRef>,
}

impl TypeTable {
    pub fn from_program(program: &Program) -> Self {
        let types = program
            .packages
            .iter()
            .flat_map(|p| p.types.iter())
            .map(|t| (t.id, t.clone()))
            .collect();
        Self { types }
    }

    pub fn get(&self, id: TypeId) -> Option<&TypeRef> {
        self.types.get(&id)
    }

    /// Kind of the type itself (without unwrapping names).
    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types.get(&id).map(|t| t.kind).unwrap_or(TypeKind::Unknown)
    }

    pub fn name(&self, id: TypeId) -> &str {
        self.types.get(&id).map(|t| t.name.as_str()).unwrap_or("?")
    }

    /// Follow `Named` types down to their underlying type.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        let mut current = id;
        // Bounded: malformed input with a naming cycle must not hang.
        for _ in 0..=self.types.len() {
            match self.types.get(&current) {
                Some(t) if t.kind == TypeKind::Named && t.underlying != 0 => {
                    current = t.underlying;
                }
                _ => return current,
            }
        }
        current
    }

    pub fn underlying_kind(&self, id: TypeId) -> TypeKind {
        self.kind(self.underlying(id))
    }

    /// Element type of a pointer, slice, array, channel or map.
    pub fn elem(&self, id: TypeId) -> Option<TypeId> {
        self.types.get(&id).map(|t| t.elem).filter(|&e| e != 0)
    }

    /// Pointee of a pointer type (after unwrapping names).
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        let u = self.underlying(id);
        if self.kind(u) == TypeKind::Pointer {
            self.elem(u)
        } else {
            None
        }
    }

    /// Struct fields of the type (after unwrapping names).
    pub fn fields(&self, id: TypeId) -> &[FieldRef] {
        let u = self.underlying(id);
        match self.types.get(&u) {
            Some(t) if t.kind == TypeKind::Struct => &t.fields,
            _ => &[],
        }
    }

    pub fn field(&self, id: TypeId, name: &str) -> Option<&FieldRef> {
        self.fields(id).iter().find(|f| f.name == name)
    }

    /// True if `id` is the named type `pkg.name`.
    pub fn is_named(&self, id: TypeId, pkg: &str, name: &str) -> bool {
        self.types
            .get(&id)
            .map(|t| {
                t.kind == TypeKind::Named
                    && t.name
                        .strip_prefix(pkg)
                        .and_then(|rest| rest.strip_prefix('.'))
                        == Some(name)
            })
            .unwrap_or(false)
    }

    pub fn is_chan(&self, id: TypeId) -> bool {
        self.underlying_kind(id) == TypeKind::Chan
    }

    /// `sync.Mutex`, `sync.Cond`, ... (the value type, not a pointer to it).
    pub fn is_sync_primitive(&self, id: TypeId) -> bool {
        SYNC_PRIMITIVES.iter().any(|n| self.is_named(id, "sync", n))
    }

    /// True if a value of this type holds a sync primitive inline, through
    /// struct fields and array elements (never through pointers).
    pub fn contains_sync_primitive(&self, id: TypeId) -> bool {
        let mut stack = vec![id];
        let mut seen = std::collections::HashSet::new();
        while let Some(t) = stack.pop() {
            if !seen.insert(t) {
                continue;
            }
            if self.is_sync_primitive(t) {
                return true;
            }
            let u = self.underlying(t);
            match self.kind(u) {
                TypeKind::Struct => stack.extend(self.fields(u).iter().map(|f| f.type_id)),
                TypeKind::Array => stack.extend(self.elem(u)),
                _ => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Package;

    fn ty(id: TypeId, kind: TypeKind, name: &str) -> TypeRef {
        TypeRef {
            id,
            kind,
            name: name.into(),
            underlying: 0,
            elem: 0,
            key: 0,
            fields: vec![],
        }
    }

    fn field(name: &str, type_id: TypeId) -> FieldRef {
        FieldRef {
            name: name.into(),
            type_id,
            embedded: false,
        }
    }

    fn make_type_table() -> TypeTable {
        let mutex = TypeRef {
            underlying: 3,
            ..ty(2, TypeKind::Named, "sync.Mutex")
        };
        let mutex_struct = TypeRef {
            fields: vec![field("state", 1)],
            ..ty(3, TypeKind::Struct, "struct{state int}")
        };
        let protected = TypeRef {
            underlying: 5,
            ..ty(4, TypeKind::Named, "main.ProtectedInt")
        };
        let protected_struct = TypeRef {
            fields: vec![field("mu", 2), field("value", 1)],
            ..ty(5, TypeKind::Struct, "struct{mu sync.Mutex; value int}")
        };
        let ptr_protected = TypeRef {
            elem: 4,
            ..ty(6, TypeKind::Pointer, "*main.ProtectedInt")
        };
        let chan_int = TypeRef {
            elem: 1,
            ..ty(7, TypeKind::Chan, "chan int")
        };
        let holder = TypeRef {
            fields: vec![field("p", 6), field("ch", 7)],
            ..ty(8, TypeKind::Struct, "struct{p *main.ProtectedInt; ch chan int}")
        };
        let mutex_array = TypeRef {
            elem: 2,
            ..ty(9, TypeKind::Array, "[2]sync.Mutex")
        };

        let program = Program {
            go_version: String::new(),
            packages: vec![Package {
                import_path: "main".into(),
                name: "main".into(),
                types: vec![
                    ty(1, TypeKind::Basic, "int"),
                    mutex,
                    mutex_struct,
                    protected,
                    protected_struct,
                    ptr_protected,
                    chan_int,
                    holder,
                    mutex_array,
                ],
                functions: vec![],
                call_edges: vec![],
                globals: vec![],
            }],
        };
        TypeTable::from_program(&program)
    }

    #[test]
    fn test_underlying_and_kinds() {
        let tt = make_type_table();
        assert_eq!(tt.underlying(4), 5);
        assert_eq!(tt.underlying(1), 1);
        assert_eq!(tt.underlying_kind(2), TypeKind::Struct);
        assert_eq!(tt.kind(2), TypeKind::Named);
        assert_eq!(tt.kind(100), TypeKind::Unknown);
        assert!(tt.is_chan(7));
        assert!(!tt.is_chan(6));
    }

    #[test]
    fn test_pointee_and_fields() {
        let tt = make_type_table();
        assert_eq!(tt.pointee(6), Some(4));
        assert_eq!(tt.pointee(4), None);
        assert_eq!(tt.fields(4).len(), 2);
        assert_eq!(tt.field(4, "mu").map(|f| f.type_id), Some(2));
        assert!(tt.field(4, "missing").is_none());
        assert!(tt.fields(1).is_empty());
    }

    #[test]
    fn test_named_matching() {
        let tt = make_type_table();
        assert!(tt.is_named(2, "sync", "Mutex"));
        assert!(!tt.is_named(2, "sync", "Cond"));
        assert!(!tt.is_named(2, "syn", "c.Mutex"));
        assert!(!tt.is_named(3, "sync", "Mutex"));
    }

    #[test]
    fn test_sync_primitive_containment() {
        let tt = make_type_table();
        assert!(tt.is_sync_primitive(2));
        assert!(tt.contains_sync_primitive(2));
        assert!(tt.contains_sync_primitive(4)); // mutex field inline
        assert!(tt.contains_sync_primitive(9)); // array of mutexes
        assert!(!tt.contains_sync_primitive(8)); // only behind a pointer
        assert!(!tt.contains_sync_primitive(6));
        assert!(!tt.contains_sync_primitive(7));
    }
}
