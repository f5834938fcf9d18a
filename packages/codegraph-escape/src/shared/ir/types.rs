//! Interned types and their pointer classification
//!
//! Every type is interned once into a [`TypeTable`]. The pointer kind of a
//! type is computed at interning time, so the escape analysis can ask
//! "is this value a pointer?" without walking aggregate structure again.

use super::FunctionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of an interned type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$T{}", self.0)
    }
}

/// What kind of pointers a value of some type may contain
///
/// Ordered so that `join` is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PointerKind {
    /// Trivial data, no pointers at all
    NoPointer,

    /// Only strong references to objects
    ReferenceOnly,

    /// Addresses, raw pointers or anything not statically known
    AnyPointer,
}

impl PointerKind {
    #[inline]
    pub fn join(self, other: PointerKind) -> PointerKind {
        self.max(other)
    }

    #[inline]
    pub fn is_pointer(self) -> bool {
        self != PointerKind::NoPointer
    }
}

/// A reference-counted class type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassType {
    pub name: String,

    /// Stored properties, in declaration order
    pub fields: Vec<TypeId>,

    /// The destructor, if it is a known function in the module
    pub deinit: Option<FunctionId>,
}

impl ClassType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            deinit: None,
        }
    }

    pub fn with_field(mut self, ty: TypeId) -> Self {
        self.fields.push(ty);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    /// Integers, floats, booleans
    Scalar,
    RawPointer,
    Class(ClassType),
    /// Heap box holding a single value of the inner type
    Box(TypeId),
    /// Address of a value of the inner type
    Address(TypeId),
    /// Struct, tuple or enum of the element types
    Aggregate(Vec<TypeId>),
    /// A thin function reference or a thick closure with a context
    Function { thick: bool },
    /// Address-only or generic type whose layout is unknown
    Opaque,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TypeEntry {
    ty: Type,
    pointer_kind: PointerKind,
}

/// Type interner with cached pointer kinds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type. Element and field types must already be interned.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        let pointer_kind = self.compute_pointer_kind(&ty);
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry { ty, pointer_kind });
        id
    }

    /// Intern a structural type once, returning the existing id if present
    pub fn intern_unique(&mut self, ty: Type) -> TypeId {
        match self.entries.iter().position(|e| e.ty == ty) {
            Some(idx) => TypeId(idx as u32),
            None => self.intern(ty),
        }
    }

    pub fn scalar(&mut self) -> TypeId {
        self.intern_unique(Type::Scalar)
    }

    pub fn address_of(&mut self, pointee: TypeId) -> TypeId {
        self.intern_unique(Type::Address(pointee))
    }

    pub fn box_of(&mut self, boxed: TypeId) -> TypeId {
        self.intern_unique(Type::Box(boxed))
    }

    /// Replace the stored properties of a class after interning it.
    ///
    /// Classes are reference-only regardless of their fields, so cached
    /// pointer kinds stay valid and self-referential classes are possible.
    pub fn set_class_fields(&mut self, class: TypeId, fields: Vec<TypeId>) {
        if let Some(TypeEntry {
            ty: Type::Class(c), ..
        }) = self.entries.get_mut(class.0 as usize)
        {
            c.fields = fields;
        }
    }

    pub fn set_class_deinit(&mut self, class: TypeId, deinit: FunctionId) {
        if let Some(TypeEntry {
            ty: Type::Class(c), ..
        }) = self.entries.get_mut(class.0 as usize)
        {
            c.deinit = Some(deinit);
        }
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.entries[id.0 as usize].ty
    }

    pub fn pointer_kind(&self, id: TypeId) -> PointerKind {
        self.entries
            .get(id.0 as usize)
            .map_or(PointerKind::AnyPointer, |e| e.pointer_kind)
    }

    pub fn is_address(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Address(_))
    }

    /// The pointee of an address type
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Address(inner) => Some(*inner),
            _ => None,
        }
    }

    pub fn class(&self, id: TypeId) -> Option<&ClassType> {
        match self.get(id) {
            Type::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Pointer kind of everything stored inside a reference-counted object
    ///
    /// For a class this joins its fields; for a box it is the boxed type.
    /// Anything else is unknown and therefore `AnyPointer`.
    pub fn stored_pointer_kind(&self, id: TypeId) -> PointerKind {
        match self.get(id) {
            Type::Class(c) => c
                .fields
                .iter()
                .fold(PointerKind::NoPointer, |acc, f| acc.join(self.pointer_kind(*f))),
            Type::Box(inner) => self.pointer_kind(*inner),
            _ => PointerKind::AnyPointer,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compute_pointer_kind(&self, ty: &Type) -> PointerKind {
        match ty {
            Type::Scalar => PointerKind::NoPointer,
            Type::Function { thick: false } => PointerKind::NoPointer,
            Type::Class(_) | Type::Box(_) | Type::Function { thick: true } => {
                PointerKind::ReferenceOnly
            }
            Type::RawPointer | Type::Address(_) | Type::Opaque => PointerKind::AnyPointer,
            Type::Aggregate(elements) => elements
                .iter()
                .fold(PointerKind::NoPointer, |acc, e| acc.join(self.pointer_kind(*e))),
        }
    }
}
