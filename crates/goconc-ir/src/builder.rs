//! Programmatic construction of IR programs for tests.
//!
//! Mirrors what the front-end would emit for small Go programs: every
//! instruction gets a source line so tests can talk about values by line,
//! the way the Go sources they model would.

use crate::ir::*;
use std::collections::HashMap;

const FILE: &str = "main.go";

pub struct ProgramBuilder {
    next_value: u32,
    next_type: TypeId,
    types: Vec<TypeRef>,
    type_names: HashMap<String, TypeId>,
    functions: Vec<Function>,
    call_edges: Vec<CallEdge>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let mut pb = Self {
            next_value: 1,
            next_type: 1,
            types: vec![],
            type_names: HashMap::new(),
            functions: vec![],
            call_edges: vec![],
        };
        let int = pb.basic("int");
        pb.basic("bool");
        let state = pb.struct_of("struct{state int}", &[("state", int)]);
        for name in ["Mutex", "RWMutex", "WaitGroup", "Once"] {
            pb.named(&format!("sync.{name}"), state);
        }
        let locker = pb.add_type(TypeKind::Interface, "sync.Locker.iface", 0, 0, vec![]);
        let locker = pb.named("sync.Locker", locker);
        let cond = pb.struct_of("struct{L sync.Locker}", &[("L", locker)]);
        pb.named("sync.Cond", cond);
        pb
    }

    fn add_type(
        &mut self,
        kind: TypeKind,
        name: &str,
        elem: TypeId,
        underlying: TypeId,
        fields: Vec<FieldRef>,
    ) -> TypeId {
        if let Some(&id) = self.type_names.get(name) {
            return id;
        }
        let id = self.next_type;
        self.next_type += 1;
        self.types.push(TypeRef {
            id,
            kind,
            name: name.to_string(),
            underlying,
            elem,
            key: 0,
            fields,
        });
        self.type_names.insert(name.to_string(), id);
        id
    }

    /// Look a type up by its display name (`"int"`, `"sync.Mutex"`, ...).
    pub fn ty(&self, name: &str) -> TypeId {
        self.type_names.get(name).copied().unwrap_or(0)
    }

    fn type_name(&self, id: TypeId) -> String {
        self.types
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| "?".into())
    }

    pub fn basic(&mut self, name: &str) -> TypeId {
        self.add_type(TypeKind::Basic, name, 0, 0, vec![])
    }

    pub fn named(&mut self, name: &str, underlying: TypeId) -> TypeId {
        self.add_type(TypeKind::Named, name, 0, underlying, vec![])
    }

    pub fn struct_of(&mut self, name: &str, fields: &[(&str, TypeId)]) -> TypeId {
        let fields = fields
            .iter()
            .map(|&(name, type_id)| FieldRef {
                name: name.to_string(),
                type_id,
                embedded: false,
            })
            .collect();
        self.add_type(TypeKind::Struct, name, 0, 0, fields)
    }

    pub fn pointer_to(&mut self, elem: TypeId) -> TypeId {
        let name = format!("*{}", self.type_name(elem));
        self.add_type(TypeKind::Pointer, &name, elem, 0, vec![])
    }

    pub fn chan_of(&mut self, elem: TypeId) -> TypeId {
        let name = format!("chan {}", self.type_name(elem));
        self.add_type(TypeKind::Chan, &name, elem, 0, vec![])
    }

    pub fn slice_of(&mut self, elem: TypeId) -> TypeId {
        let name = format!("[]{}", self.type_name(elem));
        self.add_type(TypeKind::Slice, &name, elem, 0, vec![])
    }

    pub fn array_of(&mut self, elem: TypeId) -> TypeId {
        let name = format!("[N]{}", self.type_name(elem));
        self.add_type(TypeKind::Array, &name, elem, 0, vec![])
    }

    pub fn map_of(&mut self, key: TypeId, elem: TypeId) -> TypeId {
        let name = format!("map[{}]{}", self.type_name(key), self.type_name(elem));
        let id = self.add_type(TypeKind::Map, &name, elem, 0, vec![]);
        if let Some(t) = self.types.iter_mut().find(|t| t.id == id) {
            t.key = key;
        }
        id
    }

    pub fn signature(&mut self, name: &str) -> TypeId {
        self.add_type(TypeKind::Signature, name, 0, 0, vec![])
    }

    pub fn interface(&mut self, name: &str) -> TypeId {
        self.add_type(TypeKind::Interface, name, 0, 0, vec![])
    }

    pub fn tuple(&mut self, name: &str) -> TypeId {
        self.add_type(TypeKind::Tuple, name, 0, 0, vec![])
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Build a function with a single entry block; `body` adds instructions.
    pub fn function(&mut self, name: &str, body: impl FnOnce(&mut FunctionBuilder<'_>)) {
        let short_name = name.rsplit('.').next().unwrap_or(name).to_string();
        let mut fb = FunctionBuilder {
            func: Function {
                name: name.to_string(),
                short_name,
                span: None,
                params: vec![],
                free_vars: vec![],
                blocks: vec![BasicBlock {
                    id: 0,
                    name: "entry".into(),
                    instructions: vec![],
                }],
                cfg_edges: vec![],
            },
            current: 0,
            line: 1,
            pb: self,
        };
        body(&mut fb);
        let func = fb.func;
        self.functions.push(func);
    }

    pub fn build(self) -> Program {
        Program {
            go_version: "go1.21".into(),
            packages: vec![Package {
                import_path: "main".into(),
                name: "main".into(),
                types: self.types,
                functions: self.functions,
                call_edges: self.call_edges,
                globals: vec![],
            }],
        }
    }
}

pub struct FunctionBuilder<'a> {
    pb: &'a mut ProgramBuilder,
    func: Function,
    current: u32,
    line: u32,
}

impl FunctionBuilder<'_> {
    pub fn types(&mut self) -> &mut ProgramBuilder {
        &mut *self.pb
    }

    /// Source line for the following instructions.
    pub fn at(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    fn span(&self) -> Option<Span> {
        Some(Span::new(FILE, self.line, 1))
    }

    pub fn param(&mut self, name: &str, type_id: TypeId) -> ValueId {
        let id = self.pb.fresh_value();
        let span = self.span();
        self.func.params.push(Variable {
            id,
            name: name.to_string(),
            type_id,
            span,
        });
        id
    }

    pub fn free_var(&mut self, name: &str, type_id: TypeId) -> ValueId {
        let id = self.pb.fresh_value();
        let span = self.span();
        self.func.free_vars.push(Variable {
            id,
            name: name.to_string(),
            type_id,
            span,
        });
        id
    }

    /// Create a new (empty) block; does not switch to it.
    pub fn block(&mut self) -> u32 {
        let id = self.func.blocks.len() as u32;
        self.func.blocks.push(BasicBlock {
            id,
            name: format!("b{id}"),
            instructions: vec![],
        });
        id
    }

    pub fn switch_to(&mut self, block: u32) {
        self.current = block;
    }

    pub fn edge(&mut self, from_block: u32, to_block: u32) {
        self.func.cfg_edges.push(CfgEdge {
            from_block,
            to_block,
            kind: EdgeKind::Unconditional,
        });
    }

    /// Append a raw instruction to the current block.
    pub fn push(&mut self, mut instr: Instruction) -> ValueId {
        if instr.span.is_none() {
            instr.span = self.span();
        }
        let id = instr.id;
        let current = self.current as usize;
        self.func.blocks[current].instructions.push(instr);
        id
    }

    pub fn instr(&mut self, kind: ValueKind, type_id: TypeId, operands: &[ValueId]) -> ValueId {
        let id = self.pb.fresh_value();
        self.push(Instruction {
            id,
            kind,
            name: format!("t{}", id.0),
            type_id,
            span: None,
            operands: operands.to_vec(),
            callee: None,
            callee_value: None,
            op: None,
            is_heap: false,
            select_cases: vec![],
        })
    }

    fn with(&mut self, id: ValueId, edit: impl FnOnce(&mut Instruction)) -> ValueId {
        let current = self.current as usize;
        if let Some(instr) = self.func.blocks[current]
            .instructions
            .iter_mut()
            .find(|i| i.id == id)
        {
            edit(instr);
        }
        id
    }

    pub fn make_chan(&mut self, chan_type: TypeId) -> ValueId {
        self.instr(ValueKind::MakeChan, chan_type, &[])
    }

    /// `new(T)` / `&T{}`: a heap allocation of pointer type `ptr_type`.
    pub fn alloc(&mut self, ptr_type: TypeId) -> ValueId {
        let id = self.instr(ValueKind::Alloc, ptr_type, &[]);
        self.with(id, |i| i.is_heap = true)
    }

    /// `var x T` that does not escape.
    pub fn local(&mut self, ptr_type: TypeId) -> ValueId {
        self.instr(ValueKind::Alloc, ptr_type, &[])
    }

    /// Heap allocation of `sync.<name>`.
    pub fn new_sync(&mut self, name: &str) -> ValueId {
        let t = self.pb.ty(&format!("sync.{name}"));
        let ptr = self.pb.pointer_to(t);
        self.alloc(ptr)
    }

    pub fn send(&mut self, chan: ValueId, payload: ValueId) -> ValueId {
        self.instr(ValueKind::Send, 0, &[chan, payload])
    }

    pub fn recv(&mut self, chan: ValueId, elem_type: TypeId) -> ValueId {
        let id = self.instr(ValueKind::UnOp, elem_type, &[chan]);
        self.with(id, |i| i.op = Some("<-".into()))
    }

    pub fn load(&mut self, addr: ValueId, type_id: TypeId) -> ValueId {
        let id = self.instr(ValueKind::UnOp, type_id, &[addr]);
        self.with(id, |i| i.op = Some("*".into()))
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) -> ValueId {
        self.instr(ValueKind::Store, 0, &[addr, value])
    }

    pub fn field(&mut self, x: ValueId, type_id: TypeId) -> ValueId {
        self.instr(ValueKind::Field, type_id, &[x])
    }

    pub fn field_addr(&mut self, x: ValueId, ptr_type: TypeId) -> ValueId {
        self.instr(ValueKind::FieldAddr, ptr_type, &[x])
    }

    pub fn phi(&mut self, edges: &[ValueId], type_id: TypeId) -> ValueId {
        self.instr(ValueKind::Phi, type_id, edges)
    }

    pub fn select(&mut self, cases: Vec<SelectCase>) -> ValueId {
        let tuple = self.pb.tuple("(int, bool)");
        let id = self.instr(ValueKind::Select, tuple, &[]);
        self.with(id, |i| i.select_cases = cases)
    }

    /// `select` over receive cases on `chans`.
    pub fn select_recv(&mut self, chans: &[ValueId], with_default: bool) -> ValueId {
        let mut cases: Vec<SelectCase> = chans
            .iter()
            .map(|&ch| SelectCase {
                dir: ChanDir::Recv,
                channel: Some(ch),
                value: None,
                is_default: false,
            })
            .collect();
        if with_default {
            cases.push(SelectCase {
                dir: ChanDir::Recv,
                channel: None,
                value: None,
                is_default: true,
            });
        }
        self.select(cases)
    }

    /// Call to a function (or builtin) by name with no call-graph edge.
    pub fn call_named(&mut self, callee: &str, args: &[ValueId], result: TypeId) -> ValueId {
        let id = self.instr(ValueKind::Call, result, args);
        self.with(id, |i| i.callee = Some(callee.to_string()))
    }

    /// Static call to a program function; records the call-graph edge.
    pub fn call(&mut self, callee: &str, args: &[ValueId], result: TypeId) -> ValueId {
        let id = self.call_named(callee, args, result);
        self.edge_to(id, callee, false);
        id
    }

    /// Dynamic call through a function value.
    pub fn call_value(&mut self, func: ValueId, args: &[ValueId], result: TypeId) -> ValueId {
        let id = self.instr(ValueKind::Call, result, args);
        self.with(id, |i| i.callee_value = Some(func))
    }

    /// `go callee(args...)`
    pub fn go(&mut self, callee: &str, args: &[ValueId]) -> ValueId {
        let id = self.instr(ValueKind::Go, 0, args);
        self.with(id, |i| i.callee = Some(callee.to_string()));
        self.edge_to(id, callee, true);
        id
    }

    fn edge_to(&mut self, site: ValueId, callee: &str, is_go: bool) {
        let span = self.span();
        self.pb.call_edges.push(CallEdge {
            caller: self.func.name.clone(),
            callee: callee.to_string(),
            site: Some(site),
            span,
            is_dynamic: false,
            is_go,
            is_defer: false,
        });
    }

    pub fn close(&mut self, chan: ValueId) -> ValueId {
        self.call_named("close", &[chan], 0)
    }

    pub fn lock(&mut self, mutex: ValueId) -> ValueId {
        self.call_named("(*sync.Mutex).Lock", &[mutex], 0)
    }

    pub fn unlock(&mut self, mutex: ValueId) -> ValueId {
        self.call_named("(*sync.Mutex).Unlock", &[mutex], 0)
    }

    /// Split the current block into `then`/`else` blocks joined at a new
    /// block; returns `(then, else, join)` and leaves the builder on `join`.
    pub fn branch(
        &mut self,
        then_body: impl FnOnce(&mut Self),
        else_body: impl FnOnce(&mut Self),
    ) -> (u32, u32, u32) {
        let from = self.current;
        let then_block = self.block();
        let else_block = self.block();
        let join = self.block();
        self.func.cfg_edges.push(CfgEdge {
            from_block: from,
            to_block: then_block,
            kind: EdgeKind::CondTrue,
        });
        self.func.cfg_edges.push(CfgEdge {
            from_block: from,
            to_block: else_block,
            kind: EdgeKind::CondFalse,
        });

        self.switch_to(then_block);
        then_body(self);
        let then_end = self.current;
        self.edge(then_end, join);

        self.switch_to(else_block);
        else_body(self);
        let else_end = self.current;
        self.edge(else_end, join);

        self.switch_to(join);
        (then_block, else_block, join)
    }

    /// Wrap `body` in a loop: `head -> body -> head`, `head -> exit`.
    pub fn looping(&mut self, body: impl FnOnce(&mut Self)) {
        let from = self.current;
        let head = self.block();
        let body_block = self.block();
        let exit = self.block();
        self.edge(from, head);
        self.edge(head, body_block);
        self.edge(head, exit);
        self.switch_to(body_block);
        body(self);
        let end = self.current;
        self.edge(end, head);
        self.switch_to(exit);
    }

    pub fn ret(&mut self) -> ValueId {
        self.instr(ValueKind::Return, 0, &[])
    }
}
