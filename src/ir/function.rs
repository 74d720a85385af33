//! # Functions
//!
//! A [`Function`] owns its signature-level properties (type, linkage,
//! address space, comdat, attributes, metadata) plus its parameter values
//! and ordered basic-block list. A function with an empty block list is a
//! declaration.
//!
//! [`FunctionBuilder`] is the construction API used by tests and by code
//! that plays the role of a front end: it appends blocks and instructions
//! through the module's arena, keeping an insertion cursor the way IR
//! builders usually do.

use std::collections::BTreeSet;
use std::fmt;

use super::module::Module;
use super::types::TypeId;
use super::value::{BinOpKind, BlockId, IcmpPred, InstKind, ValueId};

/// A unique identifier for a function within one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// Create a new FunctionId.
    pub const fn new(id: u32) -> Self {
        FunctionId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Symbol linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Externally visible (the default).
    External,
    /// Visible only within the module.
    Internal,
    /// Like internal, but omitted from the symbol table.
    Private,
    /// May be replaced at link time.
    Weak,
    /// Merged with identically-named definitions at link time.
    LinkOnce,
}

impl Linkage {
    /// Keyword used in the textual form; `None` for the default linkage.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Linkage::External => None,
            Linkage::Internal => Some("internal"),
            Linkage::Private => Some("private"),
            Linkage::Weak => Some("weak"),
            Linkage::LinkOnce => Some("linkonce"),
        }
    }
}

/// A function, return, or parameter attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attribute {
    AlwaysInline,
    NoInline,
    NoUnwind,
    OptimizeNone,
    ReadOnly,
    WriteOnly,
    ZeroExt,
    SignExt,
    NoAlias,
    NoCapture,
    NonNull,
    NoUndef,
}

impl Attribute {
    /// Keyword used in the textual form.
    pub fn keyword(self) -> &'static str {
        match self {
            Attribute::AlwaysInline => "alwaysinline",
            Attribute::NoInline => "noinline",
            Attribute::NoUnwind => "nounwind",
            Attribute::OptimizeNone => "optnone",
            Attribute::ReadOnly => "readonly",
            Attribute::WriteOnly => "writeonly",
            Attribute::ZeroExt => "zeroext",
            Attribute::SignExt => "signext",
            Attribute::NoAlias => "noalias",
            Attribute::NoCapture => "nocapture",
            Attribute::NonNull => "nonnull",
            Attribute::NoUndef => "noundef",
        }
    }
}

/// An ordered set of attributes.
///
/// Ordering is the derived attribute order, which keeps the textual form
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrSet(BTreeSet<Attribute>);

impl AttrSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute.
    pub fn insert(&mut self, attr: Attribute) {
        self.0.insert(attr);
    }

    /// Remove an attribute.
    pub fn remove(&mut self, attr: Attribute) {
        self.0.remove(&attr);
    }

    /// Check membership.
    pub fn contains(&self, attr: Attribute) -> bool {
        self.0.contains(&attr)
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = Attribute> + '_ {
        self.0.iter().copied()
    }
}

/// The full attribute state of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    /// Function-level attributes.
    pub fn_attrs: AttrSet,
    /// Return-value attributes.
    pub ret_attrs: AttrSet,
    /// Per-parameter attribute sets, positionally.
    pub param_attrs: Vec<AttrSet>,
}

impl AttributeList {
    /// An empty list sized for `param_count` parameters.
    pub fn sized_for(param_count: usize) -> Self {
        Self {
            fn_attrs: AttrSet::new(),
            ret_attrs: AttrSet::new(),
            param_attrs: vec![AttrSet::new(); param_count],
        }
    }
}

/// A function in the module's arena.
#[derive(Debug, Clone)]
pub struct Function {
    /// The symbol name; empty while the function is unnamed.
    pub name: String,
    /// The function type (a `TypeKind::Function`).
    pub ty: TypeId,
    /// Symbol linkage.
    pub linkage: Linkage,
    /// Address space of the function symbol.
    pub address_space: u32,
    /// Optional comdat group.
    pub comdat: Option<String>,
    /// Function, return, and parameter attributes.
    pub attrs: AttributeList,
    /// Metadata attachments as (kind, payload) pairs.
    pub metadata: Vec<(String, String)>,
    /// Argument values, one per parameter.
    pub params: Vec<ValueId>,
    /// Ordered basic-block list; empty for declarations.
    pub blocks: Vec<BlockId>,
}

impl Function {
    /// Check if this function has no body.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Cursor-style instruction builder over a module's arena.
pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: FunctionId,
    block: Option<BlockId>,
}

impl<'m> FunctionBuilder<'m> {
    /// Create a builder positioned nowhere.
    pub fn new(module: &'m mut Module, func: FunctionId) -> Self {
        Self {
            module,
            func,
            block: None,
        }
    }

    /// The function being built.
    pub fn func(&self) -> FunctionId {
        self.func
    }

    /// The `index`-th argument value.
    pub fn arg(&self, index: usize) -> ValueId {
        self.module.function(self.func).params[index]
    }

    /// Append a new block and move the cursor to it.
    pub fn append_block(&mut self, name: &str) -> BlockId {
        let bb = self.module.create_block(self.func, Some(name.to_string()));
        self.block = Some(bb);
        bb
    }

    /// Move the cursor to the end of `block`.
    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = Some(block);
    }

    fn push(&mut self, kind: InstKind, ty: TypeId, name: Option<&str>) -> ValueId {
        let block = self
            .block
            .expect("builder has no current block; call append_block first");
        let v = self.module.new_inst(kind, ty, name.map(str::to_string));
        self.module.push_inst(block, v);
        v
    }

    /// Build an `alloca`.
    pub fn alloca(&mut self, allocated: TypeId, align: u32, name: &str) -> ValueId {
        let ty = self.module.types.ptr_to(allocated);
        self.push(InstKind::Alloca { allocated, align }, ty, Some(name))
    }

    /// Build a `load` of `ty` through `ptr`.
    pub fn load(&mut self, ty: TypeId, ptr: ValueId, align: u32, name: &str) -> ValueId {
        self.push(InstKind::Load { ptr, align }, ty, Some(name))
    }

    /// Build a `store` of `value` through `ptr`.
    pub fn store(&mut self, value: ValueId, ptr: ValueId, align: u32) -> ValueId {
        let void = self.module.types.void();
        self.push(InstKind::Store { value, ptr, align }, void, None)
    }

    /// Build an inbounds `getelementptr` with constant `i32` indices.
    pub fn gep(&mut self, base: ValueId, indices: &[i128], name: &str) -> ValueId {
        let i32_ty = self.module.types.int(32);
        let index_values: Vec<ValueId> = indices
            .iter()
            .map(|&i| self.module.const_int(i32_ty, i))
            .collect();
        let base_ty = self.module.value(base).ty;
        let elem = self
            .module
            .gep_pointee_type(base_ty, &index_values)
            .expect("invalid getelementptr indices");
        let ty = self.module.types.ptr_to(elem);
        self.push(
            InstKind::GetElementPtr {
                base,
                indices: index_values,
                inbounds: true,
            },
            ty,
            Some(name),
        )
    }

    /// Build a call to `callee`.
    pub fn call(&mut self, callee: FunctionId, args: &[ValueId], name: &str) -> ValueId {
        let callee_ty = self.module.function(callee).ty;
        let (ret, _, _) = self
            .module
            .types
            .fn_parts(callee_ty)
            .expect("callee has a non-function type");
        let name = if self.module.types.is_void(ret) {
            None
        } else {
            Some(name)
        };
        self.push(
            InstKind::Call {
                callee,
                args: args.to_vec(),
            },
            ret,
            name,
        )
    }

    /// Build a `ret`.
    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        let void = self.module.types.void();
        self.push(InstKind::Ret { value }, void, None)
    }

    /// Build an unconditional branch.
    pub fn br(&mut self, dest: BlockId) -> ValueId {
        let void = self.module.types.void();
        self.push(InstKind::Br { dest }, void, None)
    }

    /// Build a conditional branch.
    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) -> ValueId {
        let void = self.module.types.void();
        self.push(
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            void,
            None,
        )
    }

    /// Build an integer binary operation.
    pub fn binop(&mut self, op: BinOpKind, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        let ty = self.module.value(lhs).ty;
        self.push(InstKind::BinOp { op, lhs, rhs }, ty, Some(name))
    }

    /// Build an integer comparison.
    pub fn icmp(&mut self, pred: IcmpPred, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        let i1 = self.module.types.int(1);
        self.push(InstKind::Icmp { pred, lhs, rhs }, i1, Some(name))
    }
}

// ============================================================================
// Tests
// ============================================================================
