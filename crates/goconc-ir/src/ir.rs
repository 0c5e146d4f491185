//! High-level IR wrappers for whole-program Go concurrency analysis.
//!
//! These types mirror the JSON schema produced by the Go front-end
//! (SSA form, one entry per package) and are the only view of the program
//! the analysis passes ever get.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of an SSA value: a parameter, a captured free variable, a
/// global, or the result of an instruction. Two values are the same value
/// iff their ids are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Type ids are assigned by the front-end and unique across the program.
/// Id `0` means "no type".
pub type TypeId = u32;

#[derive(Debug, thiserror::Error)]
pub enum IrError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid IR json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Root type: the whole program as emitted by the front-end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub packages: Vec<Package>,
    #[serde(default)]
    pub go_version: String,
}

/// A Go package with full SSA IR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub import_path: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeRef>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub call_edges: Vec<CallEdge>,
    /// Package-level variables.
    #[serde(default)]
    pub globals: Vec<Variable>,
}

/// Type reference with unique ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: TypeId,
    pub kind: TypeKind,
    pub name: String,
    /// For `Named`: the underlying type.
    #[serde(default)]
    pub underlying: TypeId,
    /// Element type of pointers, slices, arrays, channels and maps.
    #[serde(default)]
    pub elem: TypeId,
    #[serde(default)]
    pub key: TypeId,
    /// For `Struct`: the fields in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Basic,
    Named,
    Pointer,
    Slice,
    Array,
    Map,
    Chan,
    Struct,
    Interface,
    Signature,
    Tuple,
    #[serde(other)]
    Unknown,
}

/// A struct field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
    pub type_id: TypeId,
    #[serde(default)]
    pub embedded: bool,
}

/// A named value that is not an instruction: parameters, free variables
/// and globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: ValueId,
    pub name: String,
    pub type_id: TypeId,
    #[serde(default)]
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChanDir {
    Send,
    Recv,
}

/// A select case in a Select instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectCase {
    pub dir: ChanDir,
    /// Channel operand; `None` only for the default case.
    #[serde(default)]
    pub channel: Option<ValueId>,
    /// Value sent, for send cases.
    #[serde(default)]
    pub value: Option<ValueId>,
    #[serde(default)]
    pub is_default: bool,
}

/// Source location span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default)]
    pub end_col: u32,
}

impl Span {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            start_line: line,
            start_col: col,
            end_line: line,
            end_col: col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.start_line, self.start_col)
    }
}

/// SSA Instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub kind: ValueKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub type_id: TypeId,
    #[serde(default)]
    pub span: Option<Span>,
    /// Operands. `Send`: `[chan, payload]`. `Call`/`Go`/`Defer`: the call
    /// arguments (receiver first for methods). `Store`: `[addr, value]`.
    #[serde(default)]
    pub operands: Vec<ValueId>,

    // Call-specific
    /// Statically known callee name, e.g. `"(*sync.Mutex).Lock"` or `"close"`.
    #[serde(default)]
    pub callee: Option<String>,
    /// The invoked function value (`Call.Common().Value` in go/ssa).
    #[serde(default)]
    pub callee_value: Option<ValueId>,

    /// Operator of `UnOp`/`BinOp`, e.g. `"<-"` for a channel receive.
    #[serde(default)]
    pub op: Option<String>,

    // Alloc-specific
    #[serde(default)]
    pub is_heap: bool,

    // Select-specific
    #[serde(default)]
    pub select_cases: Vec<SelectCase>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Const,
    Parameter,
    Alloc,
    FieldAddr,
    Field,
    IndexAddr,
    Index,
    Call,
    BinOp,
    UnOp,
    Phi,
    Extract,
    TypeAssert,
    MakeChan,
    MakeMap,
    MakeSlice,
    MakeInterface,
    MakeClosure,
    Lookup,
    Range,
    Next,
    Slice,
    Convert,
    ChangeInterface,
    ChangeType,
    FreeVar,
    Global,
    Builtin,
    Function,
    Return,
    If,
    Jump,
    Panic,
    Go,
    Defer,
    Send,
    Store,
    RunDefers,
    Select,
    MapUpdate,
    DebugRef,
    #[serde(other)]
    Unknown,
}

impl ValueKind {
    /// True for instruction kinds that define an SSA register.
    pub fn produces_value(self) -> bool {
        !matches!(
            self,
            ValueKind::Return
                | ValueKind::If
                | ValueKind::Jump
                | ValueKind::Panic
                | ValueKind::Go
                | ValueKind::Defer
                | ValueKind::Send
                | ValueKind::Store
                | ValueKind::RunDefers
                | ValueKind::MapUpdate
                | ValueKind::DebugRef
                | ValueKind::Unknown
        )
    }
}

impl Instruction {
    pub fn is_call(&self) -> bool {
        self.kind == ValueKind::Call
    }

    pub fn is_send(&self) -> bool {
        self.kind == ValueKind::Send
    }

    /// `<-ch` receive expression.
    pub fn is_receive(&self) -> bool {
        self.kind == ValueKind::UnOp && self.op.as_deref() == Some("<-")
    }

    pub fn produces_value(&self) -> bool {
        self.kind.produces_value()
    }

    /// For `Send`: the destination channel and the payload.
    pub fn send_operands(&self) -> Option<(ValueId, ValueId)> {
        match (self.kind, self.operands.as_slice()) {
            (ValueKind::Send, [chan, payload, ..]) => Some((*chan, *payload)),
            _ => None,
        }
    }
}

/// CFG edge between basic blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from_block: u32,
    pub to_block: u32,
    #[serde(default = "default_edge_kind")]
    pub kind: EdgeKind,
}

fn default_edge_kind() -> EdgeKind {
    EdgeKind::Unconditional
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EdgeKind {
    Unconditional,
    CondTrue,
    CondFalse,
    SelectCase,
    DefaultCase,
    #[serde(other)]
    Unknown,
}

/// SSA Basic Block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub instructions: Vec<Instruction>,
}

/// SSA Function with full CFG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub params: Vec<Variable>,
    /// Free variables captured by this closure.
    #[serde(default)]
    pub free_vars: Vec<Variable>,
    pub blocks: Vec<BasicBlock>,
    #[serde(default)]
    pub cfg_edges: Vec<CfgEdge>,
}

impl Function {
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }
}

/// Static call graph edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEdge {
    pub caller: String,
    pub callee: String,
    /// The `Call`/`Go`/`Defer` instruction this edge originates from.
    #[serde(default)]
    pub site: Option<ValueId>,
    #[serde(default)]
    pub span: Option<Span>,
    #[serde(default)]
    pub is_dynamic: bool,
    /// True if this call is via a `go` statement.
    #[serde(default)]
    pub is_go: bool,
    /// True if this call is via a `defer` statement.
    #[serde(default)]
    pub is_defer: bool,
}

impl Program {
    pub fn from_json(data: &str) -> Result<Self, IrError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.packages.iter().flat_map(|p| p.functions.iter())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions().find(|f| f.name == name)
    }

    /// Function `short_name` of a package named `main`, whatever its
    /// import path.
    pub fn main_function(&self, short_name: &str) -> Option<&Function> {
        self.packages
            .iter()
            .filter(|p| p.name == "main")
            .flat_map(|p| p.functions.iter())
            .find(|f| f.short_name == short_name)
    }

    pub fn call_edges(&self) -> impl Iterator<Item = &CallEdge> {
        self.packages.iter().flat_map(|p| p.call_edges.iter())
    }

    /// Build the id -> value metadata index.
    pub fn value_index(&self) -> ValueIndex {
        let mut values = HashMap::new();
        for pkg in &self.packages {
            for global in &pkg.globals {
                values.insert(
                    global.id,
                    ValueInfo::from_variable(global, ValueOrigin::Global, &pkg.import_path),
                );
            }
            for func in &pkg.functions {
                for param in &func.params {
                    values.insert(
                        param.id,
                        ValueInfo::from_variable(param, ValueOrigin::Parameter, &func.name),
                    );
                }
                for fv in &func.free_vars {
                    values.insert(
                        fv.id,
                        ValueInfo::from_variable(fv, ValueOrigin::FreeVar, &func.name),
                    );
                }
                for block in &func.blocks {
                    for (index, instr) in block.instructions.iter().enumerate() {
                        values.insert(
                            instr.id,
                            ValueInfo {
                                id: instr.id,
                                name: instr.name.clone(),
                                type_id: instr.type_id,
                                function: func.name.clone(),
                                span: instr.span.clone(),
                                operands: instr.operands.clone(),
                                origin: ValueOrigin::Instruction {
                                    kind: instr.kind,
                                    block: block.id,
                                    index,
                                },
                            },
                        );
                    }
                }
            }
        }
        ValueIndex { values }
    }
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
    Parameter,
    FreeVar,
    Global,
    Instruction {
        kind: ValueKind,
        block: u32,
        index: usize,
    },
}

/// Metadata about one value.
#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub id: ValueId,
    pub name: String,
    pub type_id: TypeId,
    /// Parent function (import path for globals).
    pub function: String,
    pub span: Option<Span>,
    /// Instruction operands; empty for parameters, free variables and globals.
    pub operands: Vec<ValueId>,
    pub origin: ValueOrigin,
}

impl ValueInfo {
    fn from_variable(var: &Variable, origin: ValueOrigin, parent: &str) -> Self {
        Self {
            id: var.id,
            name: var.name.clone(),
            type_id: var.type_id,
            function: parent.to_string(),
            span: var.span.clone(),
            operands: Vec::new(),
            origin,
        }
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self.origin {
            ValueOrigin::Instruction { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.span.as_ref().map(|s| s.start_line)
    }
}

/// Lookup table from value ids to their metadata.
#[derive(Debug, Clone, Default)]
pub struct ValueIndex {
    values: HashMap<ValueId, ValueInfo>,
}

impl ValueIndex {
    pub fn get(&self, id: ValueId) -> Option<&ValueInfo> {
        self.values.get(&id)
    }

    pub fn type_of(&self, id: ValueId) -> Option<TypeId> {
        self.values.get(&id).map(|v| v.type_id)
    }

    pub fn operands(&self, id: ValueId) -> Option<&[ValueId]> {
        self.values.get(&id).map(|v| v.operands.as_slice())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Canonical ordering key: position first, then name, then identity.
    pub fn sort_key(&self, id: ValueId) -> (Option<Span>, String, ValueId) {
        match self.values.get(&id) {
            Some(info) => (info.span.clone(), info.name.clone(), id),
            None => (None, String::new(), id),
        }
    }

    /// `name = kind at file:line:col (function)`
    pub fn describe(&self, id: ValueId) -> String {
        match self.values.get(&id) {
            Some(info) => {
                let mut s = format!("{} = {:?}", info.name, info.kind().unwrap_or(ValueKind::Unknown));
                if let Some(span) = &info.span {
                    s.push_str(&format!(" at {span}"));
                }
                s.push_str(&format!(" ({})", info.function));
                s
            }
            None => id.to_string(),
        }
    }
}
