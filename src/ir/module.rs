//! # IR Module
//!
//! The module owns everything: the type context, the value and block
//! arenas, and the ordered function list with its symbol table. Passes are
//! transient mutators; every edit they perform goes through the
//! construction/erasure API here rather than touching arena internals.
//!
//! ## Mutation contract
//!
//! The API preserves use-count discipline: [`Module::erase_inst`] and
//! [`Module::erase_function`] refuse to remove a value or function that is
//! still referenced, returning a [`ModuleError`] instead. Replacement
//! helpers ([`Module::replace_inst_with_inst`],
//! [`Module::replace_all_uses_with`]) rewrite the uses first, so a pass
//! that sequences its edits correctly never observes a refusal. This is
//! the supported path; there is no "unchecked" variant.
//!
//! ## Iteration
//!
//! [`Module::function_ids`] returns a snapshot of the current function
//! order. A pass that erases the function it just visited (or any other)
//! keeps iterating safely over the snapshot and checks liveness with
//! [`Module::contains_function`].

use std::collections::HashMap;

use thiserror::Error;

use super::function::{AttributeList, Function, FunctionId, Linkage};
use super::types::{TypeContext, TypeId, TypeKind};
use super::value::{BlockId, ConstKind, InstKind, ValueData, ValueId, ValueKind};

/// Errors reported by the module mutation API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("symbol `{0}` is already defined")]
    DuplicateSymbol(String),

    #[error("`{0}` is not a function type")]
    NotAFunctionType(String),

    #[error("symbol `{name}` exists with a different signature")]
    SignatureMismatch { name: String },

    #[error("value {0} still has uses and cannot be erased")]
    ValueInUse(ValueId),

    #[error("function `{0}` still has call sites and cannot be erased")]
    FunctionInUse(String),

    #[error("value {0} is not an instruction")]
    NotAnInstruction(ValueId),

    #[error("instruction {0} is not attached to a block")]
    DetachedInstruction(ValueId),

    #[error("instruction {0} is already attached to a block")]
    AlreadyAttached(ValueId),

    #[error("getelementptr is malformed: {0}")]
    InvalidGep(String),
}

/// A basic block: a name, a parent function, and an instruction list.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Optional label used by the textual form.
    pub name: Option<String>,
    /// The function this block belongs to.
    pub func: FunctionId,
    /// Instructions in program order.
    pub insts: Vec<ValueId>,
}

/// An IR module.
#[derive(Debug, Clone)]
pub struct Module {
    /// The module identifier.
    pub name: String,
    /// The type table.
    pub types: TypeContext,
    values: Vec<Option<ValueData>>,
    blocks: Vec<Option<BlockData>>,
    functions: Vec<Option<Function>>,
    /// Function list order; drives iteration and serialization.
    order: Vec<FunctionId>,
    /// Symbol table: name -> function.
    symbols: HashMap<String, FunctionId>,
    /// Uniquing cache for integer constants.
    const_cache: HashMap<(TypeId, i128), ValueId>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            types: TypeContext::new(),
            values: Vec::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            order: Vec::new(),
            symbols: HashMap::new(),
            const_cache: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(Some(data));
        id
    }

    /// Get a value.
    pub fn value(&self, v: ValueId) -> &ValueData {
        self.values[v.index()].as_ref().expect("stale ValueId")
    }

    /// Get a value mutably.
    pub fn value_mut(&mut self, v: ValueId) -> &mut ValueData {
        self.values[v.index()].as_mut().expect("stale ValueId")
    }

    /// Check whether a value is still live.
    pub fn contains_value(&self, v: ValueId) -> bool {
        self.values
            .get(v.index())
            .map_or(false, |slot| slot.is_some())
    }

    /// Get or create the integer constant `value` of type `ty`.
    pub fn const_int(&mut self, ty: TypeId, value: i128) -> ValueId {
        if let Some(&id) = self.const_cache.get(&(ty, value)) {
            return id;
        }
        let id = self.push_value(ValueData {
            ty,
            name: None,
            kind: ValueKind::Const(ConstKind::Int(value)),
            block: None,
        });
        self.const_cache.insert((ty, value), id);
        id
    }

    /// Create a detached instruction.
    ///
    /// The instruction exists in the arena but belongs to no block until
    /// it is attached with [`Module::push_inst`],
    /// [`Module::insert_inst_before`], or
    /// [`Module::replace_inst_with_inst`].
    pub fn new_inst(&mut self, kind: InstKind, ty: TypeId, name: Option<String>) -> ValueId {
        self.push_value(ValueData {
            ty,
            name,
            kind: ValueKind::Inst(kind),
            block: None,
        })
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// Get a function.
    pub fn function(&self, f: FunctionId) -> &Function {
        self.functions[f.index()].as_ref().expect("stale FunctionId")
    }

    /// Get a function mutably.
    pub fn function_mut(&mut self, f: FunctionId) -> &mut Function {
        self.functions[f.index()].as_mut().expect("stale FunctionId")
    }

    /// Check whether a function is still live.
    pub fn contains_function(&self, f: FunctionId) -> bool {
        self.functions
            .get(f.index())
            .map_or(false, |slot| slot.is_some())
    }

    /// Snapshot of the function list order.
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.order.clone()
    }

    /// Iterate over live functions in list order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.order
            .iter()
            .filter_map(|&id| self.functions[id.index()].as_ref().map(|f| (id, f)))
    }

    /// Look up a function by symbol name.
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.symbols.get(name).copied()
    }

    fn make_function(&mut self, name: String, ty: TypeId, linkage: Linkage) -> Result<FunctionId, ModuleError> {
        let param_tys = match self.types.fn_parts(ty) {
            Some((_, params, _)) => params.to_vec(),
            None => return Err(ModuleError::NotAFunctionType(name)),
        };

        let id = FunctionId::new(self.functions.len() as u32);
        let args: Vec<ValueId> = param_tys
            .iter()
            .enumerate()
            .map(|(i, &pty)| {
                self.push_value(ValueData {
                    ty: pty,
                    name: None,
                    kind: ValueKind::Argument { index: i as u32 },
                    block: None,
                })
            })
            .collect();

        let attrs = AttributeList::sized_for(param_tys.len());
        self.functions.push(Some(Function {
            name,
            ty,
            linkage,
            address_space: 0,
            comdat: None,
            attrs,
            metadata: Vec::new(),
            params: args,
            blocks: Vec::new(),
        }));
        self.order.push(id);
        Ok(id)
    }

    /// Add a named function to the end of the function list.
    ///
    /// The function starts without blocks; adding blocks turns it into a
    /// definition.
    pub fn add_function(
        &mut self,
        name: &str,
        ty: TypeId,
        linkage: Linkage,
    ) -> Result<FunctionId, ModuleError> {
        if self.symbols.contains_key(name) {
            return Err(ModuleError::DuplicateSymbol(name.to_string()));
        }
        let id = self.make_function(name.to_string(), ty, linkage)?;
        self.symbols.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add an unnamed function to the end of the function list.
    ///
    /// Unnamed functions are not in the symbol table; they are expected to
    /// take over another function's name via [`Module::take_name`].
    pub fn add_unnamed_function(
        &mut self,
        ty: TypeId,
        linkage: Linkage,
    ) -> Result<FunctionId, ModuleError> {
        self.make_function(String::new(), ty, linkage)
    }

    /// Get or insert a declaration `name : (params...) -> ret`.
    ///
    /// Idempotent: a second request for the same name returns the existing
    /// function after validating that its signature matches.
    pub fn get_or_insert_function(
        &mut self,
        name: &str,
        ret: TypeId,
        params: Vec<TypeId>,
    ) -> Result<FunctionId, ModuleError> {
        if let Some(&existing) = self.symbols.get(name) {
            let ty = self.function(existing).ty;
            match self.types.fn_parts(ty) {
                Some((r, p, false)) if r == ret && p == params.as_slice() => {
                    return Ok(existing);
                }
                _ => {
                    return Err(ModuleError::SignatureMismatch {
                        name: name.to_string(),
                    });
                }
            }
        }
        let ty = self.types.func(ret, params, false);
        self.add_function(name, ty, Linkage::External)
    }

    /// Reposition `func` immediately before `anchor` in the function list.
    pub fn move_before(&mut self, func: FunctionId, anchor: FunctionId) {
        self.order.retain(|&id| id != func);
        let pos = self
            .order
            .iter()
            .position(|&id| id == anchor)
            .unwrap_or(self.order.len());
        self.order.insert(pos, func);
    }

    /// Transfer `from`'s name to `to`, leaving `from` unnamed.
    pub fn take_name(&mut self, to: FunctionId, from: FunctionId) {
        let name = std::mem::take(&mut self.function_mut(from).name);
        if !name.is_empty() {
            self.symbols.insert(name.clone(), to);
        }
        self.function_mut(to).name = name;
    }

    /// Move the entire block list from `from` to `to`.
    pub fn transfer_blocks(&mut self, to: FunctionId, from: FunctionId) {
        let moved = std::mem::take(&mut self.function_mut(from).blocks);
        for &bb in &moved {
            self.block_mut(bb).func = to;
        }
        self.function_mut(to).blocks = moved;
    }

    /// Number of instructions in a function. Zero for declarations.
    pub fn inst_count(&self, f: FunctionId) -> usize {
        self.function(f)
            .blocks
            .iter()
            .map(|&bb| self.block(bb).insts.len())
            .sum()
    }

    /// Erase a function, its arguments, and its remaining body.
    ///
    /// Fails if any live instruction still calls the function.
    pub fn erase_function(&mut self, f: FunctionId) -> Result<(), ModuleError> {
        let callers = self.live_insts().any(|(_, inst)| {
            matches!(inst, InstKind::Call { callee, .. } if *callee == f)
        });
        if callers {
            return Err(ModuleError::FunctionInUse(self.function(f).name.clone()));
        }

        let func = self.functions[f.index()].take().expect("stale FunctionId");
        for arg in func.params {
            self.values[arg.index()] = None;
        }
        for bb in func.blocks {
            let block = self.blocks[bb.index()].take().expect("stale BlockId");
            for inst in block.insts {
                self.values[inst.index()] = None;
            }
        }
        self.order.retain(|&id| id != f);
        if !func.name.is_empty() && self.symbols.get(&func.name) == Some(&f) {
            self.symbols.remove(&func.name);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks and instruction placement
    // ------------------------------------------------------------------

    /// Get a block.
    pub fn block(&self, bb: BlockId) -> &BlockData {
        self.blocks[bb.index()].as_ref().expect("stale BlockId")
    }

    /// Get a block mutably.
    pub fn block_mut(&mut self, bb: BlockId) -> &mut BlockData {
        self.blocks[bb.index()].as_mut().expect("stale BlockId")
    }

    /// Append a new block to `func`.
    pub fn create_block(&mut self, func: FunctionId, name: Option<String>) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(Some(BlockData {
            name,
            func,
            insts: Vec::new(),
        }));
        self.function_mut(func).blocks.push(id);
        id
    }

    /// Attach a detached instruction at the end of `block`.
    pub fn push_inst(&mut self, block: BlockId, inst: ValueId) {
        debug_assert!(self.value(inst).block.is_none());
        self.block_mut(block).insts.push(inst);
        self.value_mut(inst).block = Some(block);
    }

    /// Attach a detached instruction immediately before `anchor`.
    pub fn insert_inst_before(&mut self, anchor: ValueId, inst: ValueId) -> Result<(), ModuleError> {
        if self.value(inst).block.is_some() {
            return Err(ModuleError::AlreadyAttached(inst));
        }
        let block = self
            .value(anchor)
            .block
            .ok_or(ModuleError::DetachedInstruction(anchor))?;
        let pos = self
            .block(block)
            .insts
            .iter()
            .position(|&v| v == anchor)
            .ok_or(ModuleError::DetachedInstruction(anchor))?;
        self.block_mut(block).insts.insert(pos, inst);
        self.value_mut(inst).block = Some(block);
        Ok(())
    }

    fn live_insts(&self) -> impl Iterator<Item = (ValueId, &InstKind)> {
        self.blocks
            .iter()
            .filter_map(|slot| slot.as_ref())
            .flat_map(|block| block.insts.iter())
            .filter_map(|&v| self.value(v).as_inst().map(|inst| (v, inst)))
    }

    /// Check whether any live instruction uses `v` as an operand.
    pub fn has_uses(&self, v: ValueId) -> bool {
        self.live_insts()
            .any(|(_, inst)| inst.operands().contains(&v))
    }

    /// Redirect every use of `old` to `new`, module-wide.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        let targets: Vec<ValueId> = self
            .live_insts()
            .filter(|(_, inst)| inst.operands().contains(&old))
            .map(|(v, _)| v)
            .collect();
        for v in targets {
            if let ValueKind::Inst(inst) = &mut self.value_mut(v).kind {
                inst.replace_operand(old, new);
            }
        }
    }

    /// Replace an attached instruction with a detached one, in place.
    ///
    /// `new` takes `old`'s position in the block, every use of `old` is
    /// redirected to `new`, and `old` is removed from the arena.
    pub fn replace_inst_with_inst(&mut self, old: ValueId, new: ValueId) -> Result<(), ModuleError> {
        if self.value(new).block.is_some() {
            return Err(ModuleError::AlreadyAttached(new));
        }
        if !self.value(old).is_inst() {
            return Err(ModuleError::NotAnInstruction(old));
        }
        let block = self
            .value(old)
            .block
            .ok_or(ModuleError::DetachedInstruction(old))?;
        let pos = self
            .block(block)
            .insts
            .iter()
            .position(|&v| v == old)
            .ok_or(ModuleError::DetachedInstruction(old))?;

        self.block_mut(block).insts[pos] = new;
        self.value_mut(new).block = Some(block);
        self.replace_all_uses_with(old, new);
        self.values[old.index()] = None;
        Ok(())
    }

    /// Remove an instruction from its block and from the arena.
    ///
    /// Fails while any live instruction still uses the value.
    pub fn erase_inst(&mut self, v: ValueId) -> Result<(), ModuleError> {
        if !self.value(v).is_inst() {
            return Err(ModuleError::NotAnInstruction(v));
        }
        if self.has_uses(v) {
            return Err(ModuleError::ValueInUse(v));
        }
        let block = self
            .value(v)
            .block
            .ok_or(ModuleError::DetachedInstruction(v))?;
        self.block_mut(block).insts.retain(|&i| i != v);
        self.values[v.index()] = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Type computation
    // ------------------------------------------------------------------

    /// The element type addressed by a `getelementptr` with the given
    /// base pointer type and index values. The instruction's own type is a
    /// pointer to this.
    ///
    /// The first index steps over the pointee as a whole; each further
    /// index selects a struct field (which requires a constant in-range
    /// index) or an array element.
    pub fn gep_pointee_type(
        &self,
        base_ty: TypeId,
        indices: &[ValueId],
    ) -> Result<TypeId, ModuleError> {
        let mut cur = self
            .types
            .pointee(base_ty)
            .ok_or_else(|| ModuleError::InvalidGep("base is not a pointer".to_string()))?;
        if indices.is_empty() {
            return Err(ModuleError::InvalidGep("no indices".to_string()));
        }
        for &idx in &indices[1..] {
            cur = match self.types.kind(cur) {
                TypeKind::Struct { fields, .. } => {
                    let k = self
                        .value(idx)
                        .as_const_int()
                        .ok_or_else(|| {
                            ModuleError::InvalidGep("struct index is not a constant".to_string())
                        })?;
                    let k = usize::try_from(k).map_err(|_| {
                        ModuleError::InvalidGep(format!("struct index {} is negative", k))
                    })?;
                    *fields.get(k).ok_or_else(|| {
                        ModuleError::InvalidGep(format!("struct index {} out of range", k))
                    })?
                }
                TypeKind::Array { element, .. } => *element,
                _ => {
                    return Err(ModuleError::InvalidGep(
                        "indexing into a non-aggregate".to_string(),
                    ))
                }
            };
        }
        Ok(cur)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::FunctionBuilder;

    fn int_module() -> (Module, TypeId) {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        (m, i32_ty)
    }

    #[test]
    fn test_const_int_is_uniqued() {
        let (mut m, i32_ty) = int_module();
        let a = m.const_int(i32_ty, 0);
        let b = m.const_int(i32_ty, 0);
        let c = m.const_int(i32_ty, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_add_function_rejects_duplicate() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        m.add_function("f", fn_ty, Linkage::External).unwrap();
        assert_eq!(
            m.add_function("f", fn_ty, Linkage::External),
            Err(ModuleError::DuplicateSymbol("f".to_string()))
        );
    }

    #[test]
    fn test_get_or_insert_function_is_idempotent() {
        let (mut m, i32_ty) = int_module();
        let a = m
            .get_or_insert_function("get_field_0_in_MyStruct_ffi", i32_ty, vec![i32_ty])
            .unwrap();
        let b = m
            .get_or_insert_function("get_field_0_in_MyStruct_ffi", i32_ty, vec![i32_ty])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(m.function_ids().len(), 1);
    }

    #[test]
    fn test_get_or_insert_function_validates_signature() {
        let (mut m, i32_ty) = int_module();
        let i1_ty = m.types.int(1);
        m.get_or_insert_function("acc", i32_ty, vec![i32_ty])
            .unwrap();
        let clash = m.get_or_insert_function("acc", i1_ty, vec![i32_ty]);
        assert_eq!(
            clash,
            Err(ModuleError::SignatureMismatch {
                name: "acc".to_string()
            })
        );
    }

    #[test]
    fn test_take_name_moves_symbol() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let old = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let new = m.add_unnamed_function(fn_ty, Linkage::External).unwrap();

        m.take_name(new, old);
        assert_eq!(m.function(new).name, "f");
        assert_eq!(m.function(old).name, "");
        assert_eq!(m.function_by_name("f"), Some(new));
    }

    #[test]
    fn test_move_before() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let a = m.add_function("a", fn_ty, Linkage::External).unwrap();
        let b = m.add_function("b", fn_ty, Linkage::External).unwrap();
        m.move_before(b, a);
        assert_eq!(m.function_ids(), vec![b, a]);
    }

    #[test]
    fn test_replace_all_uses_with() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![i32_ty], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        let arg = b.arg(0);
        b.append_block("entry");
        let slot = b.alloca(i32_ty, 4, "slot");
        b.store(arg, slot, 4);
        b.ret(Some(arg));

        let other = m.const_int(i32_ty, 7);
        m.replace_all_uses_with(arg, other);
        assert!(!m.has_uses(arg));
        assert!(m.has_uses(other));
    }

    #[test]
    fn test_erase_inst_refuses_while_used() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        b.append_block("entry");
        let slot = b.alloca(i32_ty, 4, "slot");
        let val = b.load(i32_ty, slot, 4, "val");
        b.ret(Some(val));

        assert_eq!(m.erase_inst(slot), Err(ModuleError::ValueInUse(slot)));

        // erase the consumer first, then the slot
        let ret = *m
            .block(m.function(f).blocks[0])
            .insts
            .last()
            .expect("block is non-empty");
        m.erase_inst(ret).unwrap();
        m.erase_inst(val).unwrap();
        m.erase_inst(slot).unwrap();
        assert_eq!(m.inst_count(f), 0);
    }

    #[test]
    fn test_replace_inst_with_inst() {
        let (mut m, i32_ty) = int_module();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        b.append_block("entry");
        let slot = b.alloca(i32_ty, 4, "slot");
        let val = b.load(i32_ty, slot, 4, "val");
        b.ret(Some(val));

        let i1_ty = m.types.int(1);
        let new_slot_ty = m.types.ptr_to(i1_ty);
        let new_slot = m.new_inst(
            InstKind::Alloca {
                allocated: i1_ty,
                align: 1,
            },
            new_slot_ty,
            Some("flag".to_string()),
        );
        m.replace_inst_with_inst(slot, new_slot).unwrap();

        assert!(!m.contains_value(slot));
        let entry = m.function(f).blocks[0];
        assert_eq!(m.block(entry).insts[0], new_slot);
        // the load's pointer operand was redirected
        match m.value(val).as_inst().expect("load survives") {
            InstKind::Load { ptr, .. } => assert_eq!(*ptr, new_slot),
            other => panic!("expected load, found {:?}", other),
        }
    }

    #[test]
    fn test_erase_function_refuses_while_called() {
        let (mut m, i32_ty) = int_module();
        let callee_ty = m.types.func(i32_ty, vec![], false);
        let callee = m.add_function("callee", callee_ty, Linkage::External).unwrap();
        let caller_ty = m.types.func(i32_ty, vec![], false);
        let caller = m.add_function("caller", caller_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, caller);
        b.append_block("entry");
        let r = b.call(callee, &[], "r");
        b.ret(Some(r));

        assert!(matches!(
            m.erase_function(callee),
            Err(ModuleError::FunctionInUse(_))
        ));
        m.erase_function(caller).unwrap();
        m.erase_function(callee).unwrap();
        assert!(m.function_ids().is_empty());
    }

    #[test]
    fn test_gep_pointee_type() {
        let (mut m, i32_ty) = int_module();
        let i1_ty = m.types.int(1);
        let s = m.types.create_struct("struct.Pair", vec![i32_ty, i1_ty]);
        let s_ptr = m.types.ptr_to(s);
        let zero = m.const_int(i32_ty, 0);
        let one = m.const_int(i32_ty, 1);

        assert_eq!(m.gep_pointee_type(s_ptr, &[zero, zero]).unwrap(), i32_ty);
        assert_eq!(m.gep_pointee_type(s_ptr, &[zero, one]).unwrap(), i1_ty);

        let two = m.const_int(i32_ty, 2);
        assert!(m.gep_pointee_type(s_ptr, &[zero, two]).is_err());
        assert!(m.gep_pointee_type(i32_ty, &[zero]).is_err());
    }
}
