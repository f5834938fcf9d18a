//! IR queries the connection graph needs about values
//!
//! Pointer identity through projections, pointer kinds and value origins.

use crate::shared::ir::{
    Function, FunctionId, InstKind, Module, PointerKind, Type, TypeId, ValueDef, ValueId,
};

/// A function together with the module it lives in
#[derive(Clone, Copy)]
pub struct FunctionContext<'a> {
    pub module: &'a Module,
    pub function: &'a Function,
    pub id: FunctionId,
}

impl<'a> FunctionContext<'a> {
    pub fn new(module: &'a Module, id: FunctionId) -> Option<Self> {
        module.function(id).map(|function| Self {
            module,
            function,
            id,
        })
    }

    #[inline]
    pub fn value_type(&self, v: ValueId) -> TypeId {
        self.function.value_type(v)
    }

    #[inline]
    pub fn pointer_kind(&self, v: ValueId) -> PointerKind {
        self.module.types.pointer_kind(self.value_type(v))
    }

    #[inline]
    pub fn is_pointer(&self, v: ValueId) -> bool {
        self.pointer_kind(v).is_pointer()
    }

    #[inline]
    pub fn is_address(&self, v: ValueId) -> bool {
        self.module.types.is_address(self.value_type(v))
    }

    /// True if a reference-typed value points to memory holding only
    /// references
    pub fn has_reference_only(&self, v: ValueId) -> bool {
        self.pointer_kind(v) == PointerKind::ReferenceOnly
    }

    /// The operand whose pointer identity `v` shares, if `v` is a
    /// projection, cast or single-pointer aggregate
    pub fn pointer_base(&self, v: ValueId) -> Option<ValueId> {
        let kind = self.function.defining_kind(v)?;
        match kind {
            InstKind::StructExtract { operand, .. }
            | InstKind::TupleExtract { operand, .. }
            | InstKind::UncheckedEnumData { operand }
            | InstKind::Upcast { operand }
            | InstKind::UncheckedRefCast { operand }
            | InstKind::UncheckedAddrCast { operand }
            | InstKind::RefToRawPointer { operand }
            | InstKind::RawPointerToRef { operand } => Some(*operand),
            InstKind::StructElementAddr { address, .. }
            | InstKind::TupleElementAddr { address, .. }
            | InstKind::BeginAccess { address } => Some(*address),
            InstKind::IndexAddr { base, .. } => Some(*base),
            InstKind::MarkDependence { value, .. } => Some(*value),
            InstKind::CheckedCast { operand } => {
                (self.pointer_kind(*operand) == self.pointer_kind(v)).then_some(*operand)
            }
            InstKind::Struct { elements } | InstKind::Tuple { elements } => {
                self.single_pointer_operand(elements)
            }
            InstKind::Enum { payload } => payload.filter(|p| self.is_pointer(*p)),
            _ => None,
        }
    }

    fn single_pointer_operand(&self, operands: &[ValueId]) -> Option<ValueId> {
        let mut pointers = operands.iter().copied().filter(|o| self.is_pointer(*o));
        let first = pointers.next()?;
        pointers.next().is_none().then_some(first)
    }

    /// Follow `pointer_base` to its end
    pub fn pointer_root(&self, mut v: ValueId) -> ValueId {
        while let Some(base) = self.pointer_base(v) {
            v = base;
        }
        v
    }

    pub fn is_argument(&self, v: ValueId) -> bool {
        self.function.argument_index(v).is_some()
    }

    pub fn is_undef(&self, v: ValueId) -> bool {
        matches!(self.function.value(v).def, ValueDef::Undef)
    }

    pub fn is_exclusive_argument(&self, v: ValueId) -> bool {
        self.function.is_exclusive_argument(v)
    }

    /// Thin function references never get a node
    pub fn is_function_ref(&self, v: ValueId) -> bool {
        matches!(
            self.function.defining_kind(v),
            Some(InstKind::FunctionRef { .. })
        )
    }

    /// Addresses that can never be written, so nothing escapes through them
    pub fn is_non_writable_address(&self, v: ValueId) -> bool {
        matches!(
            self.function.defining_kind(v),
            Some(InstKind::FunctionRef { .. })
                | Some(InstKind::StringLiteral)
                | Some(InstKind::GlobalAddr { constant: true, .. })
        )
    }

    /// Root allocation of `v`, if it is a local object
    pub fn local_object_root(&self, v: ValueId) -> Option<&'a InstKind> {
        let root = self.pointer_root(v);
        let kind = self.function.defining_kind(root)?;
        matches!(
            kind,
            InstKind::AllocStack { .. } | InstKind::AllocRef { .. } | InstKind::AllocBox { .. }
        )
        .then_some(kind)
    }

    pub fn points_to_local_object(&self, v: ValueId) -> bool {
        self.local_object_root(v).is_some()
    }

    /// A fresh allocation or an exclusive argument: nothing else in the
    /// function can alias it without deriving it from `v`
    pub fn is_uniquely_identified(&self, v: ValueId) -> bool {
        let root = self.pointer_root(v);
        self.points_to_local_object(root) || self.is_exclusive_argument(root)
    }

    /// Exact class of a locally allocated object
    pub fn local_object_class(&self, v: ValueId) -> Option<TypeId> {
        match self.local_object_root(v)? {
            InstKind::AllocRef { class } => Some(*class),
            _ => None,
        }
    }

    pub fn type_of(&self, ty: TypeId) -> &'a Type {
        self.module.types.get(ty)
    }
}
