//! Access paths inside points-to labels.
//!
//! A label is a root value plus a raw path such as `.ch` or `.items[*].mu`:
//! `.<name>` selects a struct field and `[*]` selects any element of an array
//! or slice (the analysis does not distinguish indices).

use crate::solver::Label;
use goconc_ir::ir::{TypeId, TypeKind, ValueId};
use goconc_ir::types::TypeTable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root name used by extended queries, e.g. `x.L` or `x.Object.ch`.
pub const QUERY_ROOT: &str = "x";

const ARRAY_TOKEN: &str = "[*]";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessStep {
    /// `.name`
    Field(String),
    /// `[*]`
    Array,
}

impl fmt::Display for AccessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessStep::Field(name) => write!(f, ".{name}"),
            AccessStep::Array => f.write_str(ARRAY_TOKEN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessPathError {
    #[error("path match was not full: {path:?} (matched {matched:?})")]
    Mismatch { path: String, matched: String },
    #[error("extended query {query:?} does not start with \"x\"")]
    MissingRoot { query: String },
    #[error("extended query {query:?} is invalid for type {type_name}: {reason}")]
    InvalidQuery {
        query: String,
        type_name: String,
        reason: String,
    },
}

/// Split a raw path into steps. Every character of `path` must belong to a
/// token; anything else means the label and the query disagree.
pub fn split_path(path: &str) -> Result<Vec<AccessStep>, AccessPathError> {
    let mut steps = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix(ARRAY_TOKEN) {
            steps.push(AccessStep::Array);
            rest = after;
            continue;
        }
        if let Some(after_dot) = rest.strip_prefix('.') {
            let len = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            if len > 0 {
                steps.push(AccessStep::Field(after_dot[..len].to_string()));
                rest = &after_dot[len..];
                continue;
            }
        }
        return Err(AccessPathError::Mismatch {
            path: path.to_string(),
            matched: encode(&steps),
        });
    }

    Ok(steps)
}

/// Decompose a label into its root value and access steps.
pub fn decode(label: &Label) -> Result<(ValueId, Vec<AccessStep>), AccessPathError> {
    if label.path.is_empty() {
        return Ok((label.value, Vec::new()));
    }
    Ok((label.value, split_path(&label.path)?))
}

pub fn encode(steps: &[AccessStep]) -> String {
    steps.iter().map(|s| s.to_string()).collect()
}

/// Extended queries reaching every channel held inline by a value of type
/// `root`. A pointer at the top level is looked through once; nested
/// pointers and interfaces are not followed. Struct fields and fixed-size
/// array elements are descended, the latter with a `[*]` step
/// (`x.chans[*]`), so channels stored in an inline array are found too.
pub fn discover_paths(types: &TypeTable, root: TypeId) -> Vec<String> {
    let mut t = types.underlying(root);
    if types.kind(t) == TypeKind::Pointer {
        if let Some(elem) = types.elem(t) {
            t = elem;
        }
    }

    let mut paths = Vec::new();
    let mut stack = Vec::new();
    collect_channel_paths(types, t, QUERY_ROOT.to_string(), &mut stack, &mut paths);
    paths
}

fn collect_channel_paths(
    types: &TypeTable,
    ty: TypeId,
    prefix: String,
    stack: &mut Vec<TypeId>,
    out: &mut Vec<String>,
) {
    let u = types.underlying(ty);
    // A struct cannot contain itself inline; only malformed input recurses.
    if stack.contains(&u) {
        return;
    }
    match types.kind(u) {
        TypeKind::Chan => out.push(prefix),
        TypeKind::Struct => {
            stack.push(u);
            for field in types.fields(u) {
                let path = format!("{prefix}.{}", field.name);
                collect_channel_paths(types, field.type_id, path, stack, out);
            }
            stack.pop();
        }
        TypeKind::Array => {
            if let Some(elem) = types.elem(u) {
                stack.push(u);
                collect_channel_paths(types, elem, format!("{prefix}{ARRAY_TOKEN}"), stack, out);
                stack.pop();
            }
        }
        _ => {}
    }
}

/// Check that an extended query is well formed for a root of type `root`
/// and return its steps. Field selection looks through pointers, like a Go
/// selector expression.
pub fn validate_extended_query(
    types: &TypeTable,
    root: TypeId,
    query: &str,
) -> Result<Vec<AccessStep>, AccessPathError> {
    let path = query
        .strip_prefix(QUERY_ROOT)
        .ok_or_else(|| AccessPathError::MissingRoot {
            query: query.to_string(),
        })?;
    let steps = split_path(path)?;
    let invalid = |reason: String| AccessPathError::InvalidQuery {
        query: query.to_string(),
        type_name: types.name(root).to_string(),
        reason,
    };

    let mut current = root;
    for step in &steps {
        if let Some(pointee) = types.pointee(current) {
            current = pointee;
        }
        current = match step {
            AccessStep::Field(name) => types
                .field(current, name)
                .map(|f| f.type_id)
                .ok_or_else(|| invalid(format!("no field {name} in {}", types.name(current))))?,
            AccessStep::Array => match types.underlying_kind(current) {
                TypeKind::Array | TypeKind::Slice => types
                    .elem(types.underlying(current))
                    .ok_or_else(|| invalid(format!("{} has no element type", types.name(current))))?,
                _ => {
                    return Err(invalid(format!(
                        "{} is not an array or slice",
                        types.name(current)
                    )))
                }
            },
        };
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconc_ir::builder::ProgramBuilder;
    use proptest::prelude::*;

    fn field(name: &str) -> AccessStep {
        AccessStep::Field(name.into())
    }

    #[test]
    fn test_decode_empty_path() {
        let label = Label::new(ValueId(3));
        let (root, steps) = decode(&label).unwrap();
        assert_eq!(root, ValueId(3));
        assert!(steps.is_empty());
    }

    #[test]
    fn test_decode_fields_and_arrays() {
        let label = Label::with_path(ValueId(1), ".items[*].mu");
        let (root, steps) = decode(&label).unwrap();
        assert_eq!(root, ValueId(1));
        assert_eq!(steps, vec![field("items"), AccessStep::Array, field("mu")]);
        assert_eq!(encode(&steps), ".items[*].mu");
    }

    #[test]
    fn test_decode_field_names_with_odd_characters() {
        let steps = split_path(".a*b].c").unwrap();
        assert_eq!(steps, vec![field("a*b]"), field("c")]);
    }

    #[test]
    fn test_decode_mismatch_is_an_error() {
        for bad in ["x", ".", "..a", ".a[", "[0]", ".a[*", "[*]]"] {
            let err = split_path(bad).unwrap_err();
            assert!(
                matches!(err, AccessPathError::Mismatch { .. }),
                "expected mismatch for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_discover_paths() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let object_struct = pb.struct_of("struct{ch chan int; n int}", &[("ch", chan_int), ("n", int)]);
        let object = pb.named("main.Object", object_struct);
        let ptr_object = pb.pointer_to(object);
        let wrapper_struct = pb.struct_of("struct{Object}", &[("Object", object)]);
        let wrapper = pb.named("main.Wrapper", wrapper_struct);
        let holder = pb.struct_of("struct{p *main.Object}", &[("p", ptr_object)]);
        let chan_array = pb.array_of(chan_int);
        let holder_fixed = pb.struct_of(
            "struct{p *main.Object; chans [N]chan int}",
            &[("p", ptr_object), ("chans", chan_array)],
        );
        let types = TypeTable::from_program(&pb.build());

        assert_eq!(discover_paths(&types, chan_int), vec!["x"]);
        assert_eq!(discover_paths(&types, object), vec!["x.ch"]);
        assert_eq!(discover_paths(&types, ptr_object), vec!["x.ch"]);
        assert_eq!(discover_paths(&types, wrapper), vec!["x.Object.ch"]);
        assert!(discover_paths(&types, int).is_empty());
        // The pointer field is not followed.
        assert!(discover_paths(&types, holder).is_empty());
        assert_eq!(discover_paths(&types, holder_fixed), vec!["x.chans[*]"]);
    }

    #[test]
    fn test_validate_extended_query() {
        let mut pb = ProgramBuilder::new();
        let cond = pb.ty("sync.Cond");
        let ptr_cond = pb.pointer_to(cond);
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let slice = pb.slice_of(chan_int);
        let types = TypeTable::from_program(&pb.build());

        assert_eq!(
            validate_extended_query(&types, ptr_cond, "x.L").unwrap(),
            vec![field("L")]
        );
        assert!(validate_extended_query(&types, chan_int, "x").unwrap().is_empty());
        assert_eq!(
            validate_extended_query(&types, slice, "x[*]").unwrap(),
            vec![AccessStep::Array]
        );
        assert!(matches!(
            validate_extended_query(&types, ptr_cond, "y.L"),
            Err(AccessPathError::MissingRoot { .. })
        ));
        assert!(matches!(
            validate_extended_query(&types, ptr_cond, "x.M"),
            Err(AccessPathError::InvalidQuery { .. })
        ));
        assert!(matches!(
            validate_extended_query(&types, chan_int, "x[*]"),
            Err(AccessPathError::InvalidQuery { .. })
        ));
    }

    fn step_strategy() -> impl Strategy<Value = AccessStep> {
        prop_oneof![
            Just(AccessStep::Array),
            "[a-zA-Z_][a-zA-Z0-9_*\\]]{0,8}".prop_map(AccessStep::Field),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_reproduces_tokens(steps in prop::collection::vec(step_strategy(), 0..8)) {
            let raw = encode(&steps);
            let label = Label::with_path(ValueId(7), &raw);
            let (root, decoded) = decode(&label).unwrap();
            prop_assert_eq!(root, ValueId(7));
            prop_assert_eq!(encode(&decoded), raw);
            prop_assert_eq!(decoded, steps);
        }
    }
}
