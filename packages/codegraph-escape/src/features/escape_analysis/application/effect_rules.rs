//! Effect Rules
//!
//! Classifies every instruction kind into the graph effect the builder
//! applies for it. The match over `InstKind` is exhaustive: a new
//! instruction kind does not compile until it is classified here.
//!
//! Projections and casts come first: their result shares the node of its
//! base, so they have no effect of their own. Results that are constant
//! addresses have none either. Everything else gets its per-kind rule, with
//! `EscapeAll` as the explicit fallback.

use crate::features::escape_analysis::infrastructure::FunctionContext;
use crate::shared::ir::{ContainerOp, InstId, InstKind, ValueId};

/// Graph effect of one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to record
    None,

    /// A fresh object or stack slot
    Allocate { result: ValueId },

    /// The result is the memory `address` points to. Loads, field and tail
    /// addresses of objects, box projections.
    MapToContent { result: ValueId, address: ValueId },

    /// `*address = value`
    Store { value: ValueId, address: ValueId },

    /// `*dest = *src`
    CopyAddr { src: ValueId, dest: ValueId },

    /// The result is a copy of `operand`; escapes if the operand has no node
    Copy { result: ValueId, operand: ValueId },

    /// The result may be any of `operands`: aggregates, closures, selects
    Defer { result: ValueId, operands: Vec<ValueId> },

    /// Both addresses refer to the same memory after the cast
    DeferAddresses { dest: ValueId, src: ValueId },

    /// The last reference to `operand` may be released here
    Release { operand: ValueId },

    /// The value stored at `address` is destroyed
    DestroyAddr { address: ValueId },

    Return { value: ValueId },

    /// A call site, possibly a well-known container operation
    Call { container: Option<ContainerOp> },

    /// Every pointer operand and result escapes
    EscapeAll,
}

/// Classify instruction `inst` of the function in `ctx`
pub fn classify(ctx: &FunctionContext<'_>, inst: InstId) -> Effect {
    use InstKind::*;

    let instruction = ctx.function.inst(inst);
    let result = instruction.results.first().copied();
    if let Some(result) = result {
        if ctx.pointer_base(result).is_some() || ctx.is_non_writable_address(result) {
            return Effect::None;
        }
    }

    match &instruction.kind {
        Apply { semantics, .. } => Effect::Call {
            container: *semantics,
        },
        StrongRelease { operand } | ReleaseValue { operand } | DestroyValue { operand } => {
            Effect::Release { operand: *operand }
        }

        AllocStack { .. } | AllocRef { .. } | AllocBox { .. } => match result {
            Some(result) => Effect::Allocate { result },
            None => Effect::None,
        },

        DeallocStack { .. }
        | DeallocRef { .. }
        | DeallocBox { .. }
        | StrongRetain { .. }
        | RetainValue { .. }
        | FixLifetime { .. }
        | DebugValue { .. }
        | EndBorrow { .. }
        | EndAccess { .. }
        | IntegerLiteral { .. }
        | StringLiteral
        | FunctionRef { .. }
        | Branch { .. }
        | CondBranch { .. }
        | Switch { .. }
        | Unreachable => Effect::None,

        Load { address } => match result {
            Some(result) if ctx.is_pointer(result) => Effect::MapToContent {
                result,
                address: *address,
            },
            _ => Effect::None,
        },
        RefElementAddr { object: address, .. }
        | RefTailAddr { object: address }
        | ProjectBox { boxed: address } => match result {
            Some(result) => Effect::MapToContent {
                result,
                address: *address,
            },
            None => Effect::None,
        },

        Store { value, address } => Effect::Store {
            value: *value,
            address: *address,
        },
        CopyAddr { src, dest, is_init } => {
            if *is_init {
                Effect::CopyAddr {
                    src: *src,
                    dest: *dest,
                }
            } else {
                Effect::EscapeAll
            }
        }
        DestroyAddr { address } => Effect::DestroyAddr { address: *address },

        CopyValue { operand } | BeginBorrow { operand } => match result {
            Some(result) => Effect::Copy {
                result,
                operand: *operand,
            },
            None => Effect::None,
        },

        PartialApply { callee, args } => {
            defer_result(result, std::iter::once(*callee).chain(args.iter().copied()))
        }
        Select { cases, default, .. } => {
            defer_result(result, cases.iter().copied().chain(default.iter().copied()))
        }
        Struct { elements } | Tuple { elements } => defer_result(result, elements.iter().copied()),
        Enum { payload } => defer_result(result, payload.iter().copied()),

        UncheckedRefCastAddr { src, dest } => Effect::DeferAddresses {
            dest: *dest,
            src: *src,
        },

        Return { value } => match value {
            Some(value) => Effect::Return { value: *value },
            None => Effect::None,
        },

        // Projections that reach here lost their pointer identity, e.g. a
        // cast between pointer kinds
        StructExtract { .. }
        | TupleExtract { .. }
        | UncheckedEnumData { .. }
        | Upcast { .. }
        | UncheckedRefCast { .. }
        | UncheckedAddrCast { .. }
        | RefToRawPointer { .. }
        | RawPointerToRef { .. }
        | CheckedCast { .. }
        | MarkDependence { .. }
        | StructElementAddr { .. }
        | TupleElementAddr { .. }
        | IndexAddr { .. }
        | BeginAccess { .. }
        | GlobalAddr { .. }
        | Builtin { .. }
        | Throw { .. } => Effect::EscapeAll,
    }
}

fn defer_result(result: Option<ValueId>, operands: impl Iterator<Item = ValueId>) -> Effect {
    match result {
        Some(result) => Effect::Defer {
            result,
            operands: operands.collect(),
        },
        None => Effect::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ir::{Callee, ClassType, FunctionId, Module, Param, Type};

    fn classify_all(module: &Module, f: FunctionId) -> Vec<Effect> {
        let ctx = FunctionContext::new(module, f).unwrap();
        let entry = ctx.function.entry_block();
        ctx.function
            .block(entry)
            .insts
            .iter()
            .map(|i| classify(&ctx, *i))
            .collect()
    }

    #[test]
    fn test_basic_memory_effects() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let f = module.declare_function("f", vec![Param::guaranteed(obj)], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.arg(0);
        let s = b.alloc_stack(entry, obj);
        b.store(entry, x, s);
        let l = b.load(entry, s);
        b.strong_retain(entry, l);
        b.strong_release(entry, l);
        b.ret(entry, Some(l));

        let effects = classify_all(&module, f);
        assert_eq!(effects[0], Effect::Allocate { result: s });
        assert_eq!(effects[1], Effect::Store { value: x, address: s });
        assert_eq!(effects[2], Effect::MapToContent { result: l, address: s });
        assert_eq!(effects[3], Effect::None);
        assert_eq!(effects[4], Effect::Release { operand: l });
        assert_eq!(effects[5], Effect::Return { value: l });
    }

    #[test]
    fn test_projection_has_no_effect() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let f = module.declare_function("f", vec![], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.alloc_ref(entry, obj);
        b.upcast(entry, x, obj);
        b.ret(entry, None);

        let effects = classify_all(&module, f);
        assert_eq!(effects[1], Effect::None);
    }

    #[test]
    fn test_unmodeled_kinds_escape() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let raw = module.types.intern(Type::RawPointer);
        let f = module.declare_function("f", vec![Param::guaranteed(obj)], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.arg(0);
        b.builtin(entry, "opaque", vec![x], Some(raw));
        b.global_addr(entry, "counter", obj, false);
        b.global_addr(entry, "table", obj, true);
        let s = b.alloc_stack(entry, obj);
        b.copy_addr(entry, s, s, false);
        b.ret(entry, None);

        let effects = classify_all(&module, f);
        assert_eq!(effects[0], Effect::EscapeAll);
        assert_eq!(effects[1], Effect::EscapeAll);
        assert_eq!(effects[2], Effect::None);
        assert_eq!(effects[4], Effect::EscapeAll);
    }

    #[test]
    fn test_calls_carry_container_semantics() {
        let mut module = Module::new();
        let int = module.types.scalar();
        let obj = module.types.intern(Type::Class(ClassType::new("Array")));
        let callee = module.declare_function("count", vec![], Some(int));
        let f = module.declare_function("f", vec![Param::guaranteed(obj)], None);
        let mut b = module.builder(f);
        let entry = b.entry();
        let x = b.arg(0);
        b.apply(entry, Callee::Direct(callee), vec![x], Some(int));
        b.apply_semantics(entry, Callee::Direct(callee), ContainerOp::GetCount, vec![x], Some(int));
        b.ret(entry, None);

        let effects = classify_all(&module, f);
        assert_eq!(effects[0], Effect::Call { container: None });
        assert_eq!(
            effects[1],
            Effect::Call {
                container: Some(ContainerOp::GetCount)
            }
        );
    }

    #[test]
    fn test_select_skips_condition() {
        let mut module = Module::new();
        let obj = module.types.intern(Type::Class(ClassType::new("Obj")));
        let int = module.types.scalar();
        let pair = module.types.intern(Type::Aggregate(vec![obj, obj]));
        let f = module.declare_function(
            "f",
            vec![Param::guaranteed(int), Param::guaranteed(obj), Param::guaranteed(obj)],
            None,
        );
        let mut b = module.builder(f);
        let entry = b.entry();
        let (c, x, y) = (b.arg(0), b.arg(1), b.arg(2));
        let sel = b.select(entry, c, vec![x], Some(y), obj);
        let agg = b.struct_(entry, pair, vec![x, y]);
        b.ret(entry, None);

        let effects = classify_all(&module, f);
        assert_eq!(
            effects[0],
            Effect::Defer {
                result: sel,
                operands: vec![x, y]
            }
        );
        assert_eq!(
            effects[1],
            Effect::Defer {
                result: agg,
                operands: vec![x, y]
            }
        );
    }
}
