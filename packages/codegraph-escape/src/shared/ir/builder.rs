//! Instruction builder
//!
//! Appends instructions to a function's blocks and computes result types.
//! Value-producing helpers return the result, everything else returns the
//! instruction.

use super::{
    BlockId, Callee, ContainerOp, Function, FunctionId, InstId, InstKind, Instruction, Module,
    Type, TypeId, ValueDef, ValueId,
};

pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: FunctionId,
}

impl<'m> FunctionBuilder<'m> {
    pub(super) fn new(module: &'m mut Module, func: FunctionId) -> Self {
        Self { module, func }
    }

    fn current_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.func.0 as usize]
    }

    fn current(&self) -> &Function {
        &self.module.functions[self.func.0 as usize]
    }

    pub fn id(&self) -> FunctionId {
        self.func
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Parameter `idx` of the function
    ///
    /// # Panics
    /// If the function has fewer parameters.
    pub fn arg(&self, idx: usize) -> ValueId {
        self.current().arguments()[idx]
    }

    pub fn value_type(&self, v: ValueId) -> TypeId {
        self.current().value_type(v)
    }

    pub fn types(&mut self) -> &mut super::TypeTable {
        &mut self.module.types
    }

    /// Create a block with arguments of the given types
    pub fn new_block(&mut self, arg_types: &[TypeId]) -> BlockId {
        let func = self.current_mut();
        let block = BlockId(func.blocks.len() as u32);
        func.blocks.push(Default::default());
        for (index, ty) in arg_types.iter().enumerate() {
            let v = func.new_value(*ty, ValueDef::BlockArg { block, index });
            func.blocks[block.0 as usize].args.push(v);
        }
        block
    }

    pub fn block_arg(&self, block: BlockId, idx: usize) -> ValueId {
        self.current().block(block).args[idx]
    }

    /// An undefined value of the given type
    pub fn undef(&mut self, ty: TypeId) -> ValueId {
        self.current_mut().new_value(ty, ValueDef::Undef)
    }

    /// Append any instruction with explicit result types
    pub fn push(&mut self, block: BlockId, kind: InstKind, result_types: &[TypeId]) -> InstId {
        let func = self.current_mut();
        let inst = InstId(func.insts.len() as u32);
        let results = result_types
            .iter()
            .enumerate()
            .map(|(index, ty)| func.new_value(*ty, ValueDef::Result { inst, index }))
            .collect();
        func.insts.push(Instruction {
            kind,
            results,
            block,
            deleted: false,
        });
        func.blocks[block.0 as usize].insts.push(inst);
        inst
    }

    fn push_value(&mut self, block: BlockId, kind: InstKind, ty: TypeId) -> ValueId {
        let inst = self.push(block, kind, &[ty]);
        self.current().insts[inst.0 as usize].results[0]
    }

    pub fn result(&self, inst: InstId) -> Option<ValueId> {
        self.current().result(inst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Allocation
    // ═══════════════════════════════════════════════════════════════════════

    pub fn alloc_stack(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        let addr = self.module.types.address_of(ty);
        self.push_value(block, InstKind::AllocStack { ty }, addr)
    }

    pub fn alloc_ref(&mut self, block: BlockId, class: TypeId) -> ValueId {
        self.push_value(block, InstKind::AllocRef { class }, class)
    }

    pub fn alloc_box(&mut self, block: BlockId, boxed: TypeId) -> ValueId {
        let ty = self.module.types.box_of(boxed);
        self.push_value(block, InstKind::AllocBox { boxed }, ty)
    }

    pub fn dealloc_stack(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::DeallocStack { operand }, &[])
    }

    pub fn dealloc_ref(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::DeallocRef { operand }, &[])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Memory
    // ═══════════════════════════════════════════════════════════════════════

    pub fn load(&mut self, block: BlockId, address: ValueId) -> ValueId {
        let addr_ty = self.value_type(address);
        let ty = self.pointee_or_opaque(addr_ty);
        self.push_value(block, InstKind::Load { address }, ty)
    }

    pub fn store(&mut self, block: BlockId, value: ValueId, address: ValueId) -> InstId {
        self.push(block, InstKind::Store { value, address }, &[])
    }

    pub fn copy_addr(&mut self, block: BlockId, src: ValueId, dest: ValueId, is_init: bool) -> InstId {
        self.push(block, InstKind::CopyAddr { src, dest, is_init }, &[])
    }

    pub fn destroy_addr(&mut self, block: BlockId, address: ValueId) -> InstId {
        self.push(block, InstKind::DestroyAddr { address }, &[])
    }

    /// Address of stored property `field` of a class instance
    pub fn ref_element_addr(&mut self, block: BlockId, object: ValueId, field: usize) -> ValueId {
        let obj_ty = self.value_type(object);
        let field_ty = self
            .module
            .types
            .class(obj_ty)
            .and_then(|c| c.fields.get(field).copied());
        let field_ty = match field_ty {
            Some(ty) => ty,
            None => self.module.types.intern_unique(Type::Opaque),
        };
        let ty = self.module.types.address_of(field_ty);
        self.push_value(block, InstKind::RefElementAddr { object, field }, ty)
    }

    pub fn ref_tail_addr(&mut self, block: BlockId, object: ValueId, element: TypeId) -> ValueId {
        let ty = self.module.types.address_of(element);
        self.push_value(block, InstKind::RefTailAddr { object }, ty)
    }

    pub fn project_box(&mut self, block: BlockId, boxed: ValueId) -> ValueId {
        let box_ty = self.value_type(boxed);
        let inner = match self.module.types.get(box_ty) {
            Type::Box(inner) => Some(*inner),
            _ => None,
        };
        let inner = match inner {
            Some(ty) => ty,
            None => self.module.types.intern_unique(Type::Opaque),
        };
        let ty = self.module.types.address_of(inner);
        self.push_value(block, InstKind::ProjectBox { boxed }, ty)
    }

    pub fn struct_element_addr(
        &mut self,
        block: BlockId,
        address: ValueId,
        field: usize,
        field_ty: TypeId,
    ) -> ValueId {
        let ty = self.module.types.address_of(field_ty);
        self.push_value(block, InstKind::StructElementAddr { address, field }, ty)
    }

    pub fn index_addr(&mut self, block: BlockId, base: ValueId, index: ValueId) -> ValueId {
        let ty = self.value_type(base);
        self.push_value(block, InstKind::IndexAddr { base, index }, ty)
    }

    pub fn begin_access(&mut self, block: BlockId, address: ValueId) -> ValueId {
        let ty = self.value_type(address);
        self.push_value(block, InstKind::BeginAccess { address }, ty)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Aggregates, projections and casts
    // ═══════════════════════════════════════════════════════════════════════

    pub fn struct_(&mut self, block: BlockId, ty: TypeId, elements: Vec<ValueId>) -> ValueId {
        self.push_value(block, InstKind::Struct { elements }, ty)
    }

    pub fn tuple(&mut self, block: BlockId, ty: TypeId, elements: Vec<ValueId>) -> ValueId {
        self.push_value(block, InstKind::Tuple { elements }, ty)
    }

    pub fn enum_(&mut self, block: BlockId, ty: TypeId, payload: Option<ValueId>) -> ValueId {
        self.push_value(block, InstKind::Enum { payload }, ty)
    }

    pub fn struct_extract(&mut self, block: BlockId, operand: ValueId, field: usize, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::StructExtract { operand, field }, ty)
    }

    pub fn tuple_extract(&mut self, block: BlockId, operand: ValueId, index: usize, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::TupleExtract { operand, index }, ty)
    }

    pub fn select(
        &mut self,
        block: BlockId,
        condition: ValueId,
        cases: Vec<ValueId>,
        default: Option<ValueId>,
        ty: TypeId,
    ) -> ValueId {
        self.push_value(
            block,
            InstKind::Select {
                condition,
                cases,
                default,
            },
            ty,
        )
    }

    pub fn upcast(&mut self, block: BlockId, operand: ValueId, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::Upcast { operand }, ty)
    }

    pub fn unchecked_ref_cast(&mut self, block: BlockId, operand: ValueId, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::UncheckedRefCast { operand }, ty)
    }

    pub fn unchecked_addr_cast(&mut self, block: BlockId, operand: ValueId, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::UncheckedAddrCast { operand }, ty)
    }

    pub fn checked_cast(&mut self, block: BlockId, operand: ValueId, ty: TypeId) -> ValueId {
        self.push_value(block, InstKind::CheckedCast { operand }, ty)
    }

    pub fn ref_to_raw_pointer(&mut self, block: BlockId, operand: ValueId) -> ValueId {
        let ty = self.module.types.intern_unique(Type::RawPointer);
        self.push_value(block, InstKind::RefToRawPointer { operand }, ty)
    }

    pub fn unchecked_ref_cast_addr(&mut self, block: BlockId, src: ValueId, dest: ValueId) -> InstId {
        self.push(block, InstKind::UncheckedRefCastAddr { src, dest }, &[])
    }

    pub fn mark_dependence(&mut self, block: BlockId, value: ValueId, base: ValueId) -> ValueId {
        let ty = self.value_type(value);
        self.push_value(block, InstKind::MarkDependence { value, base }, ty)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ownership
    // ═══════════════════════════════════════════════════════════════════════

    pub fn copy_value(&mut self, block: BlockId, operand: ValueId) -> ValueId {
        let ty = self.value_type(operand);
        self.push_value(block, InstKind::CopyValue { operand }, ty)
    }

    pub fn begin_borrow(&mut self, block: BlockId, operand: ValueId) -> ValueId {
        let ty = self.value_type(operand);
        self.push_value(block, InstKind::BeginBorrow { operand }, ty)
    }

    pub fn strong_retain(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::StrongRetain { operand }, &[])
    }

    pub fn strong_release(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::StrongRelease { operand }, &[])
    }

    pub fn release_value(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::ReleaseValue { operand }, &[])
    }

    pub fn destroy_value(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::DestroyValue { operand }, &[])
    }

    pub fn fix_lifetime(&mut self, block: BlockId, operand: ValueId) -> InstId {
        self.push(block, InstKind::FixLifetime { operand }, &[])
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Literals, references and calls
    // ═══════════════════════════════════════════════════════════════════════

    pub fn integer_literal(&mut self, block: BlockId, value: i64) -> ValueId {
        let ty = self.module.types.scalar();
        self.push_value(block, InstKind::IntegerLiteral { value }, ty)
    }

    pub fn string_literal(&mut self, block: BlockId) -> ValueId {
        let ty = self.module.types.intern_unique(Type::RawPointer);
        self.push_value(block, InstKind::StringLiteral, ty)
    }

    pub fn global_addr(&mut self, block: BlockId, name: &str, ty: TypeId, constant: bool) -> ValueId {
        let addr = self.module.types.address_of(ty);
        let kind = InstKind::GlobalAddr {
            name: name.to_string(),
            constant,
        };
        self.push_value(block, kind, addr)
    }

    pub fn function_ref(&mut self, block: BlockId, function: FunctionId) -> ValueId {
        let ty = self
            .module
            .types
            .intern_unique(Type::Function { thick: false });
        self.push_value(block, InstKind::FunctionRef { function }, ty)
    }

    /// Closure capturing `args` as the trailing parameters of `callee`
    pub fn partial_apply(&mut self, block: BlockId, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let ty = self
            .module
            .types
            .intern_unique(Type::Function { thick: true });
        self.push_value(block, InstKind::PartialApply { callee, args }, ty)
    }

    pub fn apply(
        &mut self,
        block: BlockId,
        callee: Callee,
        args: Vec<ValueId>,
        result_ty: Option<TypeId>,
    ) -> InstId {
        let kind = InstKind::Apply {
            callee,
            args,
            semantics: None,
        };
        let results: Vec<TypeId> = result_ty.into_iter().collect();
        self.push(block, kind, &results)
    }

    /// Call to a function with known container semantics
    pub fn apply_semantics(
        &mut self,
        block: BlockId,
        callee: Callee,
        op: ContainerOp,
        args: Vec<ValueId>,
        result_ty: Option<TypeId>,
    ) -> InstId {
        let kind = InstKind::Apply {
            callee,
            args,
            semantics: Some(op),
        };
        let results: Vec<TypeId> = result_ty.into_iter().collect();
        self.push(block, kind, &results)
    }

    pub fn builtin(
        &mut self,
        block: BlockId,
        name: &str,
        args: Vec<ValueId>,
        result_ty: Option<TypeId>,
    ) -> InstId {
        let kind = InstKind::Builtin {
            name: name.to_string(),
            args,
        };
        let results: Vec<TypeId> = result_ty.into_iter().collect();
        self.push(block, kind, &results)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Terminators
    // ═══════════════════════════════════════════════════════════════════════

    pub fn br(&mut self, block: BlockId, target: BlockId, args: Vec<ValueId>) -> InstId {
        self.push(block, InstKind::Branch { target, args }, &[])
    }

    pub fn cond_br(
        &mut self,
        block: BlockId,
        condition: ValueId,
        true_target: BlockId,
        true_args: Vec<ValueId>,
        false_target: BlockId,
        false_args: Vec<ValueId>,
    ) -> InstId {
        let kind = InstKind::CondBranch {
            condition,
            true_target,
            true_args,
            false_target,
            false_args,
        };
        self.push(block, kind, &[])
    }

    pub fn switch(&mut self, block: BlockId, operand: ValueId, targets: Vec<BlockId>) -> InstId {
        self.push(block, InstKind::Switch { operand, targets }, &[])
    }

    pub fn ret(&mut self, block: BlockId, value: Option<ValueId>) -> InstId {
        self.push(block, InstKind::Return { value }, &[])
    }

    pub fn unreachable(&mut self, block: BlockId) -> InstId {
        self.push(block, InstKind::Unreachable, &[])
    }

    fn pointee_or_opaque(&mut self, addr_ty: TypeId) -> TypeId {
        match self.module.types.pointee(addr_ty) {
            Some(ty) => ty,
            None => self.module.types.intern_unique(Type::Opaque),
        }
    }
}
