//! # IR Type Universe
//!
//! Types are interned in a per-module [`TypeContext`] and referenced by
//! [`TypeId`]. Two interning disciplines coexist, mirroring the usual
//! compiler-IR split:
//!
//! - **Structural kinds** (`Void`, `Int`, `Pointer`, `Array`, `Function`)
//!   are uniqued: interning the same shape twice yields the same id.
//! - **Named aggregates** (`Struct`) have identity: every call to
//!   [`TypeContext::create_struct`] produces a distinct type, and a
//!   colliding name is disambiguated with a numeric suffix (`Name.0`,
//!   `Name.1`, ...). This is what makes a handle aggregate structurally
//!   unique even if some other single-`i32` struct exists in the module.
//!
//! Struct names are stored in a string interner; the context also keeps a
//! name -> type index so passes can look aggregates up by qualified name.

use std::collections::HashMap;
use std::fmt;

use string_interner::{DefaultStringInterner, DefaultSymbol};

/// A unique identifier for a type within one [`TypeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Create a new TypeId.
    pub const fn new(id: u32) -> Self {
        TypeId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ty{}", self.0)
    }
}

/// The kind of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// The void type (function results and store instructions).
    Void,
    /// An integer type of the given bit width (`i1`, `i32`, ...).
    Int(u32),
    /// A pointer to another type.
    Pointer(TypeId),
    /// A fixed-length array.
    Array { element: TypeId, len: u64 },
    /// A named aggregate. Field order is layout order.
    Struct {
        name: DefaultSymbol,
        fields: Vec<TypeId>,
        packed: bool,
    },
    /// A function type.
    Function {
        ret: TypeId,
        params: Vec<TypeId>,
        varargs: bool,
    },
}

/// The per-module type table.
#[derive(Debug, Clone)]
pub struct TypeContext {
    kinds: Vec<TypeKind>,
    /// Uniquing table for structural kinds; named structs are never entered.
    interned: HashMap<TypeKind, TypeId>,
    names: DefaultStringInterner,
    by_name: HashMap<DefaultSymbol, TypeId>,
    /// Named structs in creation order, for deterministic serialization.
    struct_order: Vec<TypeId>,
}

impl TypeContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            kinds: Vec::new(),
            interned: HashMap::new(),
            names: DefaultStringInterner::new(),
            by_name: HashMap::new(),
            struct_order: Vec::new(),
        }
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId::new(self.kinds.len() as u32);
        self.kinds.push(kind);
        id
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = self.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    /// The void type.
    pub fn void(&mut self) -> TypeId {
        self.intern(TypeKind::Void)
    }

    /// An integer type of the given bit width.
    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(TypeKind::Int(bits))
    }

    /// A pointer to `pointee`.
    pub fn ptr_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(pointee))
    }

    /// A fixed-length array type.
    pub fn array(&mut self, element: TypeId, len: u64) -> TypeId {
        self.intern(TypeKind::Array { element, len })
    }

    /// A function type.
    pub fn func(&mut self, ret: TypeId, params: Vec<TypeId>, varargs: bool) -> TypeId {
        self.intern(TypeKind::Function {
            ret,
            params,
            varargs,
        })
    }

    /// Create a fresh named aggregate.
    ///
    /// The new type never aliases an existing one. If `name` is already
    /// taken, a numeric suffix is appended until the name is free.
    pub fn create_struct(&mut self, name: &str, fields: Vec<TypeId>) -> TypeId {
        let unique = self.unique_struct_name(name);
        let sym = self.names.get_or_intern(&unique);
        let id = self.push(TypeKind::Struct {
            name: sym,
            fields,
            packed: false,
        });
        self.by_name.insert(sym, id);
        self.struct_order.push(id);
        id
    }

    fn unique_struct_name(&mut self, name: &str) -> String {
        if self.struct_by_name(name).is_none() {
            return name.to_string();
        }
        let mut n = 0u32;
        loop {
            let candidate = format!("{}.{}", name, n);
            if self.struct_by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Look up a named aggregate by its qualified name.
    pub fn struct_by_name(&self, name: &str) -> Option<TypeId> {
        let sym = self.names.get(name)?;
        self.by_name.get(&sym).copied()
    }

    /// Get the kind of a type.
    pub fn kind(&self, t: TypeId) -> &TypeKind {
        &self.kinds[t.index()]
    }

    /// The name of a named aggregate, or `None` for any other kind.
    pub fn struct_name(&self, t: TypeId) -> Option<&str> {
        match self.kind(t) {
            TypeKind::Struct { name, .. } => self.names.resolve(*name),
            _ => None,
        }
    }

    /// The field types of an aggregate, or `None` for any other kind.
    pub fn struct_fields(&self, t: TypeId) -> Option<&[TypeId]> {
        match self.kind(t) {
            TypeKind::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Check if a type is a pointer.
    pub fn is_pointer(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Pointer(_))
    }

    /// The pointee of a pointer type, or `None` for any other kind.
    pub fn pointee(&self, t: TypeId) -> Option<TypeId> {
        match self.kind(t) {
            TypeKind::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    /// Check if a type is the void type.
    pub fn is_void(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Void)
    }

    /// Check if a type is an integer type.
    pub fn is_int(&self, t: TypeId) -> bool {
        matches!(self.kind(t), TypeKind::Int(_))
    }

    /// Split a function type into (return, params, varargs).
    pub fn fn_parts(&self, t: TypeId) -> Option<(TypeId, &[TypeId], bool)> {
        match self.kind(t) {
            TypeKind::Function {
                ret,
                params,
                varargs,
            } => Some((*ret, params, *varargs)),
            _ => None,
        }
    }

    /// Named aggregates in creation order.
    pub fn named_structs(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.struct_order.iter().copied()
    }
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
