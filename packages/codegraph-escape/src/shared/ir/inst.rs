//! Instruction set
//!
//! A closed enum of the instruction kinds the escape analysis understands.
//! `Builtin` stands in for everything else; the analysis treats it
//! conservatively.

use super::{BlockId, FunctionId, TypeId, ValueId};
use serde::{Deserialize, Serialize};

/// Call target of an `apply`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    /// Statically known function
    Direct(FunctionId),
    /// Function value: a `function_ref`, a closure or anything else
    Value(ValueId),
}

/// Well-known container operations carried on `apply` instructions
///
/// The last argument of such a call is the container itself (`self`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerOp {
    IsNativeTypeChecked,
    CheckSubscript,
    CheckIndex,
    GetCount,
    GetCapacity,
    MakeMutable,
    /// `(elementAddrOrNone, index, self)`; the loaded element is the result
    /// or, for address-only elements, written to the first argument
    GetElement,
    /// `(index, self)` returning the element address
    GetElementAddress,
    /// `(element, index, self)`
    SetElement,
    /// `(closure, self)`
    WithUnsafeMutableBufferPointer,
}

impl ContainerOp {
    /// Operations that never capture or release anything
    pub fn has_no_effect(self) -> bool {
        matches!(
            self,
            ContainerOp::IsNativeTypeChecked
                | ContainerOp::CheckSubscript
                | ContainerOp::CheckIndex
                | ContainerOp::GetCount
                | ContainerOp::GetCapacity
                | ContainerOp::MakeMutable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    // Allocation
    AllocStack { ty: TypeId },
    AllocRef { class: TypeId },
    AllocBox { boxed: TypeId },
    DeallocStack { operand: ValueId },
    DeallocRef { operand: ValueId },
    DeallocBox { operand: ValueId },

    // Memory access
    Load { address: ValueId },
    Store { value: ValueId, address: ValueId },
    CopyAddr { src: ValueId, dest: ValueId, is_init: bool },
    DestroyAddr { address: ValueId },
    RefElementAddr { object: ValueId, field: usize },
    RefTailAddr { object: ValueId },
    ProjectBox { boxed: ValueId },
    StructElementAddr { address: ValueId, field: usize },
    TupleElementAddr { address: ValueId, index: usize },
    IndexAddr { base: ValueId, index: ValueId },
    BeginAccess { address: ValueId },
    EndAccess { access: ValueId },

    // Aggregates and projections
    Struct { elements: Vec<ValueId> },
    Tuple { elements: Vec<ValueId> },
    Enum { payload: Option<ValueId> },
    StructExtract { operand: ValueId, field: usize },
    TupleExtract { operand: ValueId, index: usize },
    UncheckedEnumData { operand: ValueId },
    Select { condition: ValueId, cases: Vec<ValueId>, default: Option<ValueId> },

    // Casts
    Upcast { operand: ValueId },
    UncheckedRefCast { operand: ValueId },
    UncheckedAddrCast { operand: ValueId },
    RefToRawPointer { operand: ValueId },
    RawPointerToRef { operand: ValueId },
    CheckedCast { operand: ValueId },
    UncheckedRefCastAddr { src: ValueId, dest: ValueId },
    MarkDependence { value: ValueId, base: ValueId },

    // Ownership
    CopyValue { operand: ValueId },
    BeginBorrow { operand: ValueId },
    EndBorrow { operand: ValueId },
    StrongRetain { operand: ValueId },
    RetainValue { operand: ValueId },
    StrongRelease { operand: ValueId },
    ReleaseValue { operand: ValueId },
    DestroyValue { operand: ValueId },
    FixLifetime { operand: ValueId },
    DebugValue { operand: ValueId },

    // Literals and references
    FunctionRef { function: FunctionId },
    StringLiteral,
    IntegerLiteral { value: i64 },
    GlobalAddr { name: String, constant: bool },

    // Calls
    PartialApply { callee: ValueId, args: Vec<ValueId> },
    Apply { callee: Callee, args: Vec<ValueId>, semantics: Option<ContainerOp> },
    /// Any other operation, opaque to the analysis
    Builtin { name: String, args: Vec<ValueId> },

    // Terminators
    Branch { target: BlockId, args: Vec<ValueId> },
    CondBranch {
        condition: ValueId,
        true_target: BlockId,
        true_args: Vec<ValueId>,
        false_target: BlockId,
        false_args: Vec<ValueId>,
    },
    Switch { operand: ValueId, targets: Vec<BlockId> },
    Return { value: Option<ValueId> },
    Throw { value: ValueId },
    Unreachable,
}

impl InstKind {
    /// All value operands, in operand order
    pub fn operands(&self) -> Vec<ValueId> {
        use InstKind::*;
        match self {
            AllocStack { .. } | AllocRef { .. } | AllocBox { .. } => vec![],
            FunctionRef { .. } | StringLiteral | IntegerLiteral { .. } | GlobalAddr { .. } => {
                vec![]
            }
            Unreachable => vec![],
            DeallocStack { operand }
            | DeallocRef { operand }
            | DeallocBox { operand }
            | StructExtract { operand, .. }
            | TupleExtract { operand, .. }
            | UncheckedEnumData { operand }
            | Upcast { operand }
            | UncheckedRefCast { operand }
            | UncheckedAddrCast { operand }
            | RefToRawPointer { operand }
            | RawPointerToRef { operand }
            | CheckedCast { operand }
            | CopyValue { operand }
            | BeginBorrow { operand }
            | EndBorrow { operand }
            | StrongRetain { operand }
            | RetainValue { operand }
            | StrongRelease { operand }
            | ReleaseValue { operand }
            | DestroyValue { operand }
            | FixLifetime { operand }
            | DebugValue { operand }
            | Switch { operand, .. } => vec![*operand],
            Load { address }
            | DestroyAddr { address }
            | StructElementAddr { address, .. }
            | TupleElementAddr { address, .. }
            | BeginAccess { address } => vec![*address],
            EndAccess { access } => vec![*access],
            RefElementAddr { object, .. } | RefTailAddr { object } => vec![*object],
            ProjectBox { boxed } => vec![*boxed],
            Store { value, address } => vec![*value, *address],
            CopyAddr { src, dest, .. } | UncheckedRefCastAddr { src, dest } => vec![*src, *dest],
            IndexAddr { base, index } => vec![*base, *index],
            MarkDependence { value, base } => vec![*value, *base],
            Struct { elements } | Tuple { elements } => elements.clone(),
            Enum { payload } => payload.iter().copied().collect(),
            Select {
                condition,
                cases,
                default,
            } => std::iter::once(*condition)
                .chain(cases.iter().copied())
                .chain(default.iter().copied())
                .collect(),
            PartialApply { callee, args } => {
                std::iter::once(*callee).chain(args.iter().copied()).collect()
            }
            Apply { callee, args, .. } => match callee {
                Callee::Direct(_) => args.clone(),
                Callee::Value(v) => std::iter::once(*v).chain(args.iter().copied()).collect(),
            },
            Builtin { args, .. } => args.clone(),
            Branch { args, .. } => args.clone(),
            CondBranch {
                condition,
                true_args,
                false_args,
                ..
            } => std::iter::once(*condition)
                .chain(true_args.iter().copied())
                .chain(false_args.iter().copied())
                .collect(),
            Return { value } => value.iter().copied().collect(),
            Throw { value } => vec![*value],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Branch { .. }
                | InstKind::CondBranch { .. }
                | InstKind::Switch { .. }
                | InstKind::Return { .. }
                | InstKind::Throw { .. }
                | InstKind::Unreachable
        )
    }

    /// Successor blocks of a terminator
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Branch { target, .. } => vec![*target],
            InstKind::CondBranch {
                true_target,
                false_target,
                ..
            } => vec![*true_target, *false_target],
            InstKind::Switch { targets, .. } => targets.clone(),
            _ => vec![],
        }
    }

    /// Outgoing CFG edges with the values passed to the target's block
    /// arguments. `None` means the terminator does not pass them explicitly.
    pub fn outgoing_edges(&self) -> Vec<(BlockId, Option<&[ValueId]>)> {
        match self {
            InstKind::Branch { target, args } => vec![(*target, Some(args.as_slice()))],
            InstKind::CondBranch {
                true_target,
                true_args,
                false_target,
                false_args,
                ..
            } => vec![
                (*true_target, Some(true_args.as_slice())),
                (*false_target, Some(false_args.as_slice())),
            ],
            InstKind::Switch { targets, .. } => targets.iter().map(|t| (*t, None)).collect(),
            _ => vec![],
        }
    }

    /// Instructions that end the lifetime of a reference and may run a deinit
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            InstKind::StrongRelease { .. }
                | InstKind::ReleaseValue { .. }
                | InstKind::DestroyValue { .. }
        )
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, InstKind::Apply { .. })
    }
}
