//! SSA intermediate representation consumed by the escape analysis
//!
//! Only the surface the analysis needs: typed values, basic blocks with
//! block arguments, and a closed instruction set. Functions are built with
//! [`FunctionBuilder`].

mod builder;
mod function;
mod inst;
mod types;

pub use builder::FunctionBuilder;
pub use function::{BasicBlock, Convention, Function, Instruction, Param, ValueData, ValueDef};
pub use inst::{Callee, ContainerOp, InstKind};
pub use types::{ClassType, PointerKind, Type, TypeId, TypeTable};

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// SSA value, unique within one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Instruction, unique within one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@f{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Module
// ═══════════════════════════════════════════════════════════════════════════

/// A whole program: interned types plus all functions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub types: TypeTable,
    functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function with an empty entry block holding its parameters
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<Param>,
        return_ty: Option<TypeId>,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions
            .push(Function::new(name.into(), params, return_ty));
        id
    }

    pub fn function(&self, f: FunctionId) -> Option<&Function> {
        self.functions.get(f.0 as usize)
    }

    pub fn function_mut(&mut self, f: FunctionId) -> Option<&mut Function> {
        self.functions.get_mut(f.0 as usize)
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|idx| FunctionId(idx as u32))
    }

    /// Start appending instructions to `f`
    ///
    /// # Panics
    /// If `f` was not declared in this module.
    pub fn builder(&mut self, f: FunctionId) -> FunctionBuilder<'_> {
        assert!((f.0 as usize) < self.functions.len(), "unknown function {f}");
        FunctionBuilder::new(self, f)
    }
}
