//! Points-to query collection.
//!
//! Walks every function of the program and registers queries on the values
//! whose type makes them interesting, plus extended queries for the locker
//! of each `sync.Cond` and for channels nested inside values sent on
//! channels.

use crate::access_path::discover_paths;
use crate::include::IncludeType;
use crate::solver::{PointerConfig, PointerId};
use crate::PointerError;
use goconc_ir::ir::{ChanDir, Function, Instruction, Program, TypeId, ValueId, ValueIndex, ValueKind};
use goconc_ir::types::TypeTable;
use std::collections::BTreeMap;

/// Query for the `L` field of a `sync.Cond`.
pub const COND_LOCKER_QUERY: &str = "x.L";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Emit a debug event for every queried value.
    pub verbose: bool,
    /// Leave `sync` primitives out of the analysis.
    pub skip_sync: bool,
}

/// Extended query handles recorded while collecting.
#[derive(Debug, Clone, Default)]
pub struct ExtendedQueries {
    /// `sync.Cond` allocation -> handle of its `L` field.
    pub cond_queries: BTreeMap<ValueId, PointerId>,
    /// Sent value -> handles of the channels nested in it.
    pub payload_queries: BTreeMap<ValueId, Vec<PointerId>>,
}

/// Register queries for `program` on `config` according to `include`.
pub fn collect_queries(
    program: &Program,
    config: &mut PointerConfig,
    include: IncludeType,
    options: CollectorOptions,
) -> Result<ExtendedQueries, PointerError> {
    let mut collector = QueryCollector {
        types: TypeTable::from_program(program),
        index: program.value_index(),
        include,
        options,
        config,
        out: ExtendedQueries::default(),
    };
    for func in program.functions() {
        collector.visit_function(func)?;
    }
    Ok(collector.out)
}

struct QueryCollector<'a> {
    types: TypeTable,
    index: ValueIndex,
    include: IncludeType,
    options: CollectorOptions,
    config: &'a mut PointerConfig,
    out: ExtendedQueries,
}

impl QueryCollector<'_> {
    fn visit_function(&mut self, func: &Function) -> Result<(), PointerError> {
        if self.options.verbose {
            tracing::debug!(func = %func.name, "collecting channels and functions");
        }
        for var in func.params.iter().chain(&func.free_vars) {
            self.maybe_add(var.id, var.type_id, false)?;
        }

        for instr in func.instructions() {
            match instr.kind {
                ValueKind::Call => {
                    if let Some(callee) = instr.callee_value {
                        if let Some(ty) = self.index.type_of(callee) {
                            self.maybe_add(callee, ty, false)?;
                        }
                    }
                    self.maybe_add(instr.id, instr.type_id, false)?;
                }
                ValueKind::Range => {}
                ValueKind::Send => {
                    if let Some((_, payload)) = instr.send_operands() {
                        self.add_payload_queries(payload)?;
                    }
                }
                ValueKind::Select => {
                    for payload in select_payloads(instr) {
                        self.add_payload_queries(payload)?;
                    }
                    self.maybe_add(instr.id, instr.type_id, false)?;
                }
                _ if instr.produces_value() => {
                    let heap_alloc = instr.kind == ValueKind::Alloc && instr.is_heap;
                    self.maybe_add(instr.id, instr.type_id, heap_alloc)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn maybe_add(&mut self, value: ValueId, ty: TypeId, heap_alloc: bool) -> Result<(), PointerError> {
        let target = self.include.check_type(&self.types, ty);
        if !target.is_targeted() {
            return Ok(());
        }
        if self.options.verbose {
            let pos = self
                .index
                .get(value)
                .and_then(|info| info.span.as_ref())
                .map(|span| span.to_string())
                .unwrap_or_default();
            tracing::debug!(
                value = %value,
                pos = %pos,
                ty = self.types.name(ty),
                underlying = self.types.name(self.types.underlying(ty)),
                target = %target,
                "query target"
            );
        }

        if target.is_direct() {
            self.config.add_query(value);
            if heap_alloc && !self.options.skip_sync && self.is_cond_pointer(ty) {
                let id = self.extended(value, ty, COND_LOCKER_QUERY)?;
                self.out.cond_queries.insert(value, id);
            }
        }
        if target.is_indirect() {
            self.config.add_indirect_query(value);
        }
        Ok(())
    }

    fn is_cond_pointer(&self, ty: TypeId) -> bool {
        self.types
            .pointee(ty)
            .is_some_and(|elem| self.types.is_named(elem, "sync", "Cond"))
    }

    fn add_payload_queries(&mut self, payload: ValueId) -> Result<(), PointerError> {
        let Some(ty) = self.index.type_of(payload) else {
            tracing::warn!(value = %payload, "sent value has no type information");
            return Ok(());
        };
        for query in discover_paths(&self.types, ty) {
            let id = self.extended(payload, ty, &query)?;
            let ids = self.out.payload_queries.entry(payload).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(())
    }

    fn extended(&mut self, value: ValueId, ty: TypeId, query: &str) -> Result<PointerId, PointerError> {
        self.config
            .add_extended_query(&self.types, value, ty, query)
            .map_err(|source| PointerError::ExtendedQuery {
                value,
                query: query.to_string(),
                source,
            })
    }
}

/// Values sent by the send cases of a select.
fn select_payloads(instr: &Instruction) -> impl Iterator<Item = ValueId> + '_ {
    instr
        .select_cases
        .iter()
        .filter(|case| case.dir == ChanDir::Send && !case.is_default)
        .filter_map(|case| case.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use goconc_ir::builder::ProgramBuilder;
    use goconc_ir::ir::SelectCase;

    fn collect(program: &Program, include: IncludeType, options: CollectorOptions) -> (PointerConfig, ExtendedQueries) {
        let mut config = PointerConfig::new(vec!["main.main".into()]);
        let out = collect_queries(program, &mut config, include, options).unwrap();
        (config, out)
    }

    #[test]
    fn test_channels_params_and_free_vars() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let (mut param, mut free, mut ch, mut n) = (ValueId(0), ValueId(0), ValueId(0), ValueId(0));
        pb.function("main.worker", |f| {
            param = f.param("in", chan_int);
            free = f.free_var("out", chan_int);
            ch = f.make_chan(chan_int);
            n = f.recv(ch, int);
        });
        let program = pb.build();

        let (config, out) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        let queried: Vec<ValueId> = config.queries().keys().copied().collect();
        assert_eq!(queried, vec![param, free, ch]);
        assert!(!config.queries().contains_key(&n));
        assert!(config.indirect_queries().is_empty());
        assert!(out.cond_queries.is_empty());
    }

    #[test]
    fn test_calls_query_callee_and_result() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let sig = pb.signature("func() chan int");
        let (mut fn_value, mut call) = (ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            fn_value = f.param("mk", sig);
            call = f.call_value(fn_value, &[], chan_int);
        });
        let program = pb.build();

        let (config, _) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        assert!(config.queries().contains_key(&fn_value));
        assert!(config.queries().contains_key(&call));
    }

    #[test]
    fn test_pointers_get_indirect_queries() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let ptr_chan = pb.pointer_to(chan_int);
        let mut local = ValueId(0);
        pb.function("main.main", |f| {
            local = f.local(ptr_chan);
        });
        let program = pb.build();

        let (config, _) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        assert!(config.indirect_queries().contains_key(&local));
        assert!(!config.queries().contains_key(&local));

        let (config, _) = collect(&program, IncludeType::total(), CollectorOptions::default());
        assert!(config.indirect_queries().contains_key(&local));
        assert!(config.queries().contains_key(&local));
    }

    #[test]
    fn test_cond_locker_query() {
        let mut pb = ProgramBuilder::new();
        let (mut cond, mut mu) = (ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            mu = f.new_sync("Mutex");
            cond = f.new_sync("Cond");
        });
        let program = pb.build();

        let (_, out) = collect(&program, IncludeType::total(), CollectorOptions::default());
        assert_eq!(out.cond_queries.len(), 1);
        assert!(out.cond_queries.contains_key(&cond));
        assert!(!out.cond_queries.contains_key(&mu));

        let skip = CollectorOptions {
            skip_sync: true,
            ..CollectorOptions::default()
        };
        let (_, out) = collect(&program, IncludeType::total(), skip);
        assert!(out.cond_queries.is_empty());

        // Pointers are not direct targets under the standard preset.
        let (_, out) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        assert!(out.cond_queries.is_empty());
    }

    #[test]
    fn test_payload_queries() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let object_struct = pb.struct_of("struct{ch chan int}", &[("ch", chan_int)]);
        let object = pb.named("main.Object", object_struct);
        let ptr_object = pb.pointer_to(object);
        let chan_obj = pb.chan_of(ptr_object);
        let chan_chan = pb.chan_of(chan_int);
        let (mut obj, mut inner, mut n) = (ValueId(0), ValueId(0), ValueId(0));
        pb.function("main.main", |f| {
            let outer = f.make_chan(chan_obj);
            obj = f.alloc(ptr_object);
            f.send(outer, obj);
            f.send(outer, obj);
            let carrier = f.make_chan(chan_chan);
            inner = f.make_chan(chan_int);
            f.send(carrier, inner);
            let plain = f.make_chan(chan_int);
            n = f.param("n", int);
            f.send(plain, n);
        });
        let program = pb.build();

        let (config, out) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        assert_eq!(out.payload_queries[&obj].len(), 1);
        assert_eq!(out.payload_queries[&inner].len(), 1);
        assert!(!out.payload_queries.contains_key(&n));

        let texts: Vec<(ValueId, String)> = config
            .extended_queries()
            .map(|(_, q)| (q.value, q.query.clone()))
            .collect();
        assert!(texts.contains(&(obj, "x.ch".to_string())));
        assert!(texts.contains(&(inner, "x".to_string())));
    }

    #[test]
    fn test_select_send_payloads() {
        let mut pb = ProgramBuilder::new();
        let int = pb.ty("int");
        let chan_int = pb.chan_of(int);
        let chan_chan = pb.chan_of(chan_int);
        let mut inner = ValueId(0);
        pb.function("main.main", |f| {
            let carrier = f.make_chan(chan_chan);
            inner = f.make_chan(chan_int);
            f.select(vec![SelectCase {
                dir: ChanDir::Send,
                channel: Some(carrier),
                value: Some(inner),
                is_default: false,
            }]);
        });
        let program = pb.build();

        let (_, out) = collect(&program, IncludeType::standard(), CollectorOptions::default());
        assert!(out.payload_queries.contains_key(&inner));
    }

    #[test]
    fn test_invalid_payload_query_is_an_error() {
        let mut config = PointerConfig::default();
        let program = ProgramBuilder::new().build();
        let types = TypeTable::from_program(&program);
        let mut collector = QueryCollector {
            types,
            index: program.value_index(),
            include: IncludeType::standard(),
            options: CollectorOptions::default(),
            config: &mut config,
            out: ExtendedQueries::default(),
        };
        let err = collector.extended(ValueId(1), 0, "x.nothing").unwrap_err();
        assert!(matches!(err, PointerError::ExtendedQuery { .. }));
    }
}
