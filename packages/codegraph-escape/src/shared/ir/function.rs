//! Functions, basic blocks and SSA values

use super::{BlockId, InstId, InstKind, TypeId, ValueId};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Parameter passing convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    Owned,
    Guaranteed,
    /// Inout-like address argument that cannot alias anything else in the
    /// function
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub ty: TypeId,
    pub convention: Convention,
}

impl Param {
    pub fn owned(ty: TypeId) -> Self {
        Self {
            ty,
            convention: Convention::Owned,
        }
    }

    pub fn guaranteed(ty: TypeId) -> Self {
        Self {
            ty,
            convention: Convention::Guaranteed,
        }
    }

    pub fn exclusive(ty: TypeId) -> Self {
        Self {
            ty,
            convention: Convention::Exclusive,
        }
    }
}

/// Where an SSA value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueDef {
    /// Function parameter (entry block argument)
    Argument(usize),
    BlockArg { block: BlockId, index: usize },
    Result { inst: InstId, index: usize },
    Undef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValueData {
    pub ty: TypeId,
    pub def: ValueDef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub args: Vec<ValueId>,
    pub insts: Vec<InstId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstKind,
    pub results: Vec<ValueId>,
    pub block: BlockId,
    /// Set once the instruction was removed from its block
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: Option<TypeId>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) insts: Vec<Instruction>,
    pub(crate) values: Vec<ValueData>,
}

impl Function {
    pub(crate) fn new(name: String, params: Vec<Param>, return_ty: Option<TypeId>) -> Self {
        let mut func = Self {
            name,
            params,
            return_ty,
            blocks: vec![BasicBlock::default()],
            insts: Vec::new(),
            values: Vec::new(),
        };
        for idx in 0..func.params.len() {
            let ty = func.params[idx].ty;
            let v = func.new_value(ty, ValueDef::Argument(idx));
            func.blocks[0].args.push(v);
        }
        func
    }

    pub(crate) fn new_value(&mut self, ty: TypeId, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { ty, def });
        id
    }

    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    /// Parameter values in order
    pub fn arguments(&self) -> &[ValueId] {
        &self.blocks[0].args
    }

    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.0 as usize]
    }

    pub fn value_type(&self, v: ValueId) -> TypeId {
        self.value(v).ty
    }

    pub fn inst(&self, i: InstId) -> &Instruction {
        &self.insts[i.0 as usize]
    }

    pub fn block(&self, b: BlockId) -> &BasicBlock {
        &self.blocks[b.0 as usize]
    }

    /// The instruction defining `v`, if it is an instruction result
    pub fn defining_inst(&self, v: ValueId) -> Option<InstId> {
        match self.value(v).def {
            ValueDef::Result { inst, .. } => Some(inst),
            _ => None,
        }
    }

    pub fn defining_kind(&self, v: ValueId) -> Option<&InstKind> {
        self.defining_inst(v).map(|i| &self.inst(i).kind)
    }

    /// First result of an instruction
    pub fn result(&self, i: InstId) -> Option<ValueId> {
        self.inst(i).results.first().copied()
    }

    pub fn argument_index(&self, v: ValueId) -> Option<usize> {
        match self.value(v).def {
            ValueDef::Argument(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn terminator(&self, b: BlockId) -> Option<InstId> {
        let last = *self.block(b).insts.last()?;
        self.inst(last).kind.is_terminator().then_some(last)
    }

    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        self.terminator(b)
            .map(|t| self.inst(t).kind.successors())
            .unwrap_or_default()
    }

    /// Blocks reachable from the entry, in breadth-first order. A block is
    /// always listed after every block that dominates it.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::new();
        queue.push_back(self.entry_block());
        seen.insert(self.entry_block());
        while let Some(b) = queue.pop_front() {
            order.push(b);
            for succ in self.successors(b) {
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        order
    }

    /// Values flowing into argument `index` of `block` from every reachable
    /// predecessor edge. `None` if some predecessor does not pass it.
    pub fn incoming_values(
        &self,
        reachable: &[BlockId],
        block: BlockId,
        index: usize,
    ) -> Option<Vec<ValueId>> {
        let mut incoming = Vec::new();
        for &pred in reachable {
            let Some(term) = self.terminator(pred) else {
                continue;
            };
            for (target, args) in self.inst(term).kind.outgoing_edges() {
                if target != block {
                    continue;
                }
                incoming.push(*args?.get(index)?);
            }
        }
        Some(incoming)
    }

    pub fn is_exclusive_argument(&self, v: ValueId) -> bool {
        self.argument_index(v)
            .is_some_and(|idx| self.params[idx].convention == Convention::Exclusive)
    }

    /// Remove an instruction from its block. Its results and operands stay
    /// addressable so late observers can still inspect them.
    pub fn remove_instruction(&mut self, i: InstId) {
        let block = self.insts[i.0 as usize].block;
        self.blocks[block.0 as usize].insts.retain(|x| *x != i);
        self.insts[i.0 as usize].deleted = true;
    }
}
