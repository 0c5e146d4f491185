//! Concurrency primitives and their use sites.
//!
//! A primitive is identified by its allocation site: a `make(chan T)` or an
//! allocation of (a value holding inline) a `sync` primitive. Uses are the
//! channel operations and `sync` method calls, resolved to allocation sites
//! through the points-to result.

use goconc_ir::call_graph::CallGraph;
use goconc_ir::cfg::InstrPos;
use goconc_ir::ir::{ChanDir, Function, Instruction, Program, ValueId, ValueIndex, ValueKind};
use goconc_ir::types::{TypeTable, SYNC_PRIMITIVES};
use goconc_pointer::{PointerError, PointerQueryResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Method of a `sync` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SyncOp {
    Lock,
    Unlock,
    RLock,
    RUnlock,
    TryLock,
    Wait,
    Signal,
    Broadcast,
    Add,
    Done,
    Do,
}

impl SyncOp {
    fn from_method(name: &str) -> Option<Self> {
        Some(match name {
            "Lock" => SyncOp::Lock,
            "Unlock" => SyncOp::Unlock,
            "RLock" => SyncOp::RLock,
            "RUnlock" => SyncOp::RUnlock,
            "TryLock" | "TryRLock" => SyncOp::TryLock,
            "Wait" => SyncOp::Wait,
            "Signal" => SyncOp::Signal,
            "Broadcast" => SyncOp::Broadcast,
            "Add" => SyncOp::Add,
            "Done" => SyncOp::Done,
            "Do" => SyncOp::Do,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum UseKind {
    Send,
    Receive,
    Range,
    /// Case `case` of a select.
    Select { case: usize },
    Close,
    Sync(SyncOp),
}

impl fmt::Display for UseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UseKind::Select { case } => write!(f, "select case {case}"),
            UseKind::Sync(op) => write!(f, "{op:?}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// One operation on a primitive operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UseSite {
    pub function: String,
    pub instr: ValueId,
    pub pos: InstrPos,
    pub kind: UseKind,
    pub operand: ValueId,
    /// Allocation sites the operand may denote. More than one means the
    /// operand is ambiguous.
    pub primitives: BTreeSet<ValueId>,
}

/// Primitives reachable from an entry function.
#[derive(Debug, Clone, Default)]
pub struct Primitives {
    /// Primitive -> function allocating it.
    pub allocations: BTreeMap<ValueId, String>,
    pub sites: Vec<UseSite>,
    /// Primitive sent as (part of) a payload -> channels it is sent on.
    pub carriers: BTreeMap<ValueId, BTreeSet<ValueId>>,
    /// `sync.Cond` -> primitives its locker may denote.
    pub lockers: BTreeMap<ValueId, BTreeSet<ValueId>>,
}

impl Primitives {
    pub fn contains(&self, v: ValueId) -> bool {
        self.allocations.contains_key(&v)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn uses(&self, prim: ValueId) -> impl Iterator<Item = &UseSite> {
        self.sites.iter().filter(move |s| s.primitives.contains(&prim))
    }

    /// Primitive -> its use sites; primitives without uses map to nothing.
    pub fn uses_by_primitive(&self) -> BTreeMap<ValueId, Vec<&UseSite>> {
        let mut map: BTreeMap<ValueId, Vec<&UseSite>> =
            self.allocations.keys().map(|&p| (p, Vec::new())).collect();
        for site in &self.sites {
            for p in &site.primitives {
                map.entry(*p).or_default().push(site);
            }
        }
        map
    }

    /// Functions where `prim` is allocated or used.
    pub fn functions_of(&self, prim: ValueId) -> BTreeSet<&str> {
        self.allocations
            .get(&prim)
            .map(String::as_str)
            .into_iter()
            .chain(self.uses(prim).map(|s| s.function.as_str()))
            .collect()
    }
}

/// `"(*sync.Mutex).Lock"` -> `Lock`. Calls through `sync.Locker` count too.
pub fn sync_op(callee: &str) -> Option<SyncOp> {
    let rest = callee
        .strip_prefix("(*sync.")
        .or_else(|| callee.strip_prefix("(sync."))?;
    let (ty, method) = rest.split_once(").")?;
    if SYNC_PRIMITIVES.contains(&ty) || ty == "Locker" {
        SyncOp::from_method(method)
    } else {
        None
    }
}

/// Find every primitive allocated in a function reachable from `entry` and
/// every use of one.
pub fn collect_primitives(
    program: &Program,
    entry: &str,
    pointer: &PointerQueryResult,
    call_graph: &CallGraph,
    skip_sync: bool,
) -> Result<Primitives, PointerError> {
    let types = TypeTable::from_program(program);
    let index = program.value_index();

    let mut reachable = call_graph.transitive_callees(entry);
    reachable.insert(entry.to_string());
    let mut functions: Vec<&Function> = program
        .functions()
        .filter(|f| reachable.contains(&f.name))
        .collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name));

    let mut prims = Primitives::default();
    for func in &functions {
        for instr in func.instructions() {
            if is_allocation_site(&types, instr, skip_sync) {
                prims.allocations.insert(instr.id, func.name.clone());
            }
        }
    }

    let resolver = Resolver {
        pointer,
        index: &index,
        prims: &prims,
    };
    let mut sites = Vec::new();
    let mut carriers: BTreeMap<ValueId, BTreeSet<ValueId>> = BTreeMap::new();
    for func in &functions {
        for block in &func.blocks {
            for (i, instr) in block.instructions.iter().enumerate() {
                let pos = InstrPos {
                    block: block.id,
                    index: i,
                };
                for (kind, operand) in use_operands(&types, &index, instr, skip_sync) {
                    let primitives = resolver.resolve(operand)?;
                    if primitives.is_empty() {
                        tracing::warn!(
                            func = %func.name,
                            operand = %index.describe(operand),
                            kind = %kind,
                            "use operand does not resolve to a primitive"
                        );
                        continue;
                    }
                    sites.push(UseSite {
                        function: func.name.clone(),
                        instr: instr.id,
                        pos,
                        kind,
                        operand,
                        primitives,
                    });
                }
                for (chan, payload) in sent_values(instr) {
                    let carried = resolver.payload(payload)?;
                    if carried.is_empty() {
                        continue;
                    }
                    let chans = resolver.resolve(chan)?;
                    for p in carried {
                        carriers.entry(p).or_default().extend(chans.iter().copied());
                    }
                }
            }
        }
    }

    let mut lockers = BTreeMap::new();
    for &cond in pointer.cond_queries.keys() {
        if !prims.contains(cond) {
            continue;
        }
        let locks: BTreeSet<ValueId> = pointer
            .cond_lockers(cond)?
            .into_iter()
            .filter(|l| prims.contains(*l))
            .collect();
        if !locks.is_empty() {
            lockers.insert(cond, locks);
        }
    }

    prims.sites = sites;
    prims.carriers = carriers;
    prims.lockers = lockers;
    tracing::debug!(
        primitives = prims.len(),
        uses = prims.sites.len(),
        "collected primitives"
    );
    Ok(prims)
}

fn is_allocation_site(types: &TypeTable, instr: &Instruction, skip_sync: bool) -> bool {
    match instr.kind {
        ValueKind::MakeChan => true,
        ValueKind::Alloc if !skip_sync => types
            .pointee(instr.type_id)
            .is_some_and(|t| types.contains_sync_primitive(t)),
        _ => false,
    }
}

/// Primitive operands used by `instr`, with the kind of use.
fn use_operands(
    types: &TypeTable,
    index: &ValueIndex,
    instr: &Instruction,
    skip_sync: bool,
) -> Vec<(UseKind, ValueId)> {
    let first = instr.operands.first().copied();
    match instr.kind {
        ValueKind::Send => first.map(|ch| vec![(UseKind::Send, ch)]).unwrap_or_default(),
        ValueKind::UnOp if instr.is_receive() => {
            first.map(|ch| vec![(UseKind::Receive, ch)]).unwrap_or_default()
        }
        ValueKind::Range => first
            .filter(|&x| index.type_of(x).is_some_and(|t| types.is_chan(t)))
            .map(|ch| vec![(UseKind::Range, ch)])
            .unwrap_or_default(),
        ValueKind::Select => instr
            .select_cases
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_default)
            .filter_map(|(case, c)| c.channel.map(|ch| (UseKind::Select { case }, ch)))
            .collect(),
        ValueKind::Call | ValueKind::Go | ValueKind::Defer => {
            let Some(callee) = instr.callee.as_deref() else {
                return vec![];
            };
            let kind = if callee == "close" {
                UseKind::Close
            } else if skip_sync {
                return vec![];
            } else {
                match sync_op(callee) {
                    Some(op) => UseKind::Sync(op),
                    None => return vec![],
                }
            };
            first.map(|x| vec![(kind, x)]).unwrap_or_default()
        }
        _ => vec![],
    }
}

/// `(channel, payload)` pairs of a send or of the send cases of a select.
fn sent_values(instr: &Instruction) -> Vec<(ValueId, ValueId)> {
    match instr.kind {
        ValueKind::Send => instr.send_operands().into_iter().collect(),
        ValueKind::Select => instr
            .select_cases
            .iter()
            .filter(|c| c.dir == ChanDir::Send && !c.is_default)
            .filter_map(|c| Some((c.channel?, c.value?)))
            .collect(),
        _ => vec![],
    }
}

struct Resolver<'a> {
    pointer: &'a PointerQueryResult,
    index: &'a ValueIndex,
    prims: &'a Primitives,
}

impl Resolver<'_> {
    /// Allocation sites `operand` may denote.
    fn resolve(&self, operand: ValueId) -> Result<BTreeSet<ValueId>, PointerError> {
        let mut roots: BTreeSet<ValueId> = self
            .pointer
            .roots(operand)?
            .into_iter()
            .filter(|r| self.prims.contains(*r))
            .collect();
        if roots.is_empty() {
            if let Some(site) = self.local_root(operand) {
                roots.insert(site);
            }
        }
        Ok(roots)
    }

    /// Follow field and element addressing back to an allocation site in
    /// the same function.
    fn local_root(&self, mut v: ValueId) -> Option<ValueId> {
        for _ in 0..16 {
            if self.prims.contains(v) {
                return Some(v);
            }
            let info = self.index.get(v)?;
            match info.kind()? {
                ValueKind::FieldAddr | ValueKind::IndexAddr | ValueKind::ChangeType => {
                    v = *self.index.operands(v)?.first()?;
                }
                _ => return None,
            }
        }
        None
    }

    /// Primitives nested in a sent value.
    fn payload(&self, payload: ValueId) -> Result<BTreeSet<ValueId>, PointerError> {
        let mut out = BTreeSet::new();
        for label in self.pointer.payload_labels(payload) {
            let (root, _) = goconc_pointer::access_path::decode(label)?;
            if self.prims.contains(root) {
                out.insert(root);
            }
        }
        Ok(out)
    }
}
