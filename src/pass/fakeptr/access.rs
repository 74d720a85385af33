//! Access-site rewriting.
//!
//! Recognizes the canonical field-access idiom inside a rewritten
//! function
//!
//! ```text
//! %0 = load %struct.T*, %FakePtr* %handle.slot      ; inner load
//! %f = getelementptr %struct.T, %struct.T* %0, i32 0, i32 k
//! %v = load i32, i32* %f                            ; field read
//! store i32 %x, i32* %f                             ; or: field write
//! ```
//!
//! and rewrites each match into a load of the handle's integer value
//! followed by a call to the foreign accessor for field `k`:
//!
//! ```text
//! %1 = getelementptr inbounds %FakePtr, %FakePtr* %handle.slot, i32 0, i32 0
//! %2 = load i32, i32* %1
//! %v = call i32 @get_field_k_in_T_ffi(i32 %2)
//! ```
//!
//! Matching and rewriting are separate phases: one traversal collects the
//! read queue and the write queue, then the queues are rewritten. Editing
//! during the traversal could invalidate the walk, and one rewrite can
//! make a later match disappear.

use tracing::debug;

use crate::ir::function::FunctionId;
use crate::ir::module::Module;
use crate::ir::types::TypeId;
use crate::ir::value::{InstKind, ValueId};

use super::diag::{DiagnosticSink, SkipReason};
use super::type_query::{is_struct_ptr_with_name, stripped_struct_name};

/// A matched access site: the outer load or store, the address-of-field
/// feeding it, and the inner load that produced the record pointer.
#[derive(Debug, Clone, Copy)]
struct AccessMatch {
    outer: ValueId,
    gep: ValueId,
    inner_load: ValueId,
}

/// Rewrite every recognized field access in `func`.
pub fn rewrite_accesses(
    module: &mut Module,
    func: FunctionId,
    protected: &[String],
    handle_ty: TypeId,
    sink: &mut DiagnosticSink,
) {
    let handle_ptr_ty = module.types.ptr_to(handle_ty);
    let fname = module.function(func).name.clone();

    let mut reads: Vec<AccessMatch> = Vec::new();
    let mut writes: Vec<AccessMatch> = Vec::new();

    for &bb in &module.function(func).blocks.clone() {
        for &inst_id in &module.block(bb).insts.clone() {
            let Some(inst) = module.value(inst_id).as_inst() else {
                continue;
            };
            let (addr, is_store) = match inst {
                InstKind::Load { ptr, .. } => (*ptr, false),
                InstKind::Store { ptr, .. } => (*ptr, true),
                _ => continue,
            };
            let Some(m) = match_access(module, &fname, inst_id, addr, protected, handle_ptr_ty, sink)
            else {
                continue;
            };
            if is_store {
                writes.push(m);
            } else {
                reads.push(m);
            }
        }
    }

    debug!(
        function = %fname,
        reads = reads.len(),
        writes = writes.len(),
        "collected access sites"
    );

    for m in reads {
        rewrite_read(module, &fname, m, sink);
    }
    for m in writes {
        rewrite_write(module, &fname, m, sink);
    }
}

/// Classify the address feeding a load or store.
///
/// A match requires: the address is an address-of-field whose
/// pointer-operand type is a protected record pointer, and whose own base
/// is a prior load. A base load whose pointer-operand type is not
/// pointer-to-handle is tolerated with a diagnostic: the site is left
/// untouched and the verifier reports any residual inconsistency.
fn match_access(
    module: &Module,
    fname: &str,
    outer: ValueId,
    addr: ValueId,
    protected: &[String],
    handle_ptr_ty: TypeId,
    sink: &mut DiagnosticSink,
) -> Option<AccessMatch> {
    let Some(InstKind::GetElementPtr { base, .. }) = module.value(addr).as_inst() else {
        return None;
    };
    let base = *base;
    let base_ty = module.value(base).ty;
    if !is_struct_ptr_with_name(&module.types, base_ty, protected) {
        return None;
    }
    let Some(InstKind::Load { ptr, .. }) = module.value(base).as_inst() else {
        return None;
    };
    if module.value(*ptr).ty != handle_ptr_ty {
        sink.skip(fname, SkipReason::HandleLoadTypeMismatch);
        return None;
    }
    Some(AccessMatch {
        outer,
        gep: addr,
        inner_load: base,
    })
}

/// The constant trailing index of a matched address-of-field, plus the
/// unqualified record name.
fn field_index_and_name(
    module: &Module,
    fname: &str,
    m: AccessMatch,
    sink: &mut DiagnosticSink,
) -> Option<(u64, String)> {
    let Some(InstKind::GetElementPtr { base, indices, .. }) = module.value(m.gep).as_inst()
    else {
        return None;
    };
    let last = *indices.last()?;
    let Some(k) = module.value(last).as_const_int().and_then(|v| u64::try_from(v).ok())
    else {
        sink.skip(fname, SkipReason::NonConstantFieldIndex);
        return None;
    };
    let base_ty = module.value(*base).ty;
    let name = stripped_struct_name(&module.types, base_ty).to_string();
    Some((k, name))
}

/// Build the handle reload (`{0,0}` address-of-field plus `i32` load) that
/// every accessor call takes as its first argument.
fn build_handle_reload(module: &mut Module, m: AccessMatch) -> Option<(ValueId, ValueId)> {
    let i32_ty = module.types.int(32);
    let i32_ptr_ty = module.types.ptr_to(i32_ty);
    let slot = match module.value(m.inner_load).as_inst() {
        Some(InstKind::Load { ptr, .. }) => *ptr,
        _ => return None,
    };
    let zero = module.const_int(i32_ty, 0);
    let addr = module.new_inst(
        InstKind::GetElementPtr {
            base: slot,
            indices: vec![zero, zero],
            inbounds: true,
        },
        i32_ptr_ty,
        Some("handle.addr".to_string()),
    );
    let load = module.new_inst(
        InstKind::Load { ptr: addr, align: 4 },
        i32_ty,
        Some("handle".to_string()),
    );
    Some((addr, load))
}

/// Commit one rewrite: replace the outer instruction with `call`, insert
/// the handle reload before it, and erase the matched pair.
fn commit(
    module: &mut Module,
    fname: &str,
    m: AccessMatch,
    addr: ValueId,
    load: ValueId,
    call: ValueId,
    sink: &mut DiagnosticSink,
) {
    let result = module
        .replace_inst_with_inst(m.outer, call)
        .and_then(|_| module.insert_inst_before(call, load))
        .and_then(|_| module.insert_inst_before(load, addr))
        .and_then(|_| module.erase_inst(m.gep))
        .and_then(|_| module.erase_inst(m.inner_load));
    if let Err(e) = result {
        sink.skip(
            fname,
            SkipReason::EditRejected {
                detail: e.to_string(),
            },
        );
    }
}

fn rewrite_read(module: &mut Module, fname: &str, m: AccessMatch, sink: &mut DiagnosticSink) {
    let Some((k, sname)) = field_index_and_name(module, fname, m, sink) else {
        return;
    };
    let Some((addr, load)) = build_handle_reload(module, m) else {
        return;
    };
    let i32_ty = module.types.int(32);
    let ret_ty = module.value(m.outer).ty;

    let accessor = format!("get_field_{}_in_{}_ffi", k, sname);
    let callee = match module.get_or_insert_function(&accessor, ret_ty, vec![i32_ty]) {
        Ok(id) => id,
        Err(e) => {
            sink.skip(
                fname,
                SkipReason::AccessorSignatureClash {
                    detail: e.to_string(),
                },
            );
            return;
        }
    };
    let call = module.new_inst(
        InstKind::Call {
            callee,
            args: vec![load],
        },
        ret_ty,
        None,
    );
    commit(module, fname, m, addr, load, call, sink);
    debug!(function = %fname, %accessor, "rewrote field read");
}

fn rewrite_write(module: &mut Module, fname: &str, m: AccessMatch, sink: &mut DiagnosticSink) {
    let Some((k, sname)) = field_index_and_name(module, fname, m, sink) else {
        return;
    };
    let stored = match module.value(m.outer).as_inst() {
        Some(InstKind::Store { value, .. }) => *value,
        _ => return,
    };
    let Some((addr, load)) = build_handle_reload(module, m) else {
        return;
    };
    let i32_ty = module.types.int(32);
    let void = module.types.void();
    let stored_ty = module.value(stored).ty;

    let accessor = format!("set_field_{}_in_{}_ffi", k, sname);
    let callee = match module.get_or_insert_function(&accessor, void, vec![i32_ty, stored_ty]) {
        Ok(id) => id,
        Err(e) => {
            sink.skip(
                fname,
                SkipReason::AccessorSignatureClash {
                    detail: e.to_string(),
                },
            );
            return;
        }
    };
    let call = module.new_inst(
        InstKind::Call {
            callee,
            args: vec![load, stored],
        },
        void,
        None,
    );
    commit(module, fname, m, addr, load, call, sink);
    debug!(function = %fname, %accessor, "rewrote field write");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::{FunctionBuilder, Linkage};
    use crate::ir::verify::verify_module;
    use crate::pass::fakeptr::prologue::fix_entry_slots;
    use crate::pass::fakeptr::signature::rewrite_signature;

    fn protected() -> Vec<String> {
        vec!["struct.MyStruct".to_string()]
    }

    /// i32 read_x(%struct.MyStruct* %p) in the canonical lowering, plus
    /// the pieces the earlier stages produce.
    fn prepared_getter() -> (Module, super::super::signature::SignatureRewrite, TypeId) {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let i1_ty = m.types.int(1);
        let s = m.types.create_struct("struct.MyStruct", vec![i32_ty, i1_ty]);
        let s_ptr = m.types.ptr_to(s);
        let fn_ty = m.types.func(i32_ty, vec![s_ptr], false);
        let f = m.add_function("read_x", fn_ty, Linkage::External).unwrap();

        let mut b = FunctionBuilder::new(&mut m, f);
        let p = b.arg(0);
        b.append_block("entry");
        let slot = b.alloca(s_ptr, 8, "p.addr");
        b.store(p, slot, 8);
        let loaded = b.load(s_ptr, slot, 8, "p.val");
        let field = b.gep(loaded, &[0, 0], "x.addr");
        let x = b.load(i32_ty, field, 4, "x");
        b.ret(Some(x));

        let handle = m.types.create_struct("FakePtr", vec![i32_ty]);
        let rw = rewrite_signature(&mut m, f, &protected(), i32_ty).unwrap();
        let mut sink = DiagnosticSink::new();
        fix_entry_slots(&mut m, &rw, handle, &mut sink);
        assert!(sink.is_empty());
        (m, rw, handle)
    }

    #[test]
    fn test_read_becomes_accessor_call() {
        let (mut m, rw, handle) = prepared_getter();
        let mut sink = DiagnosticSink::new();
        rewrite_accesses(&mut m, rw.new_func, &protected(), handle, &mut sink);
        assert!(sink.is_empty());

        let getter = m.function_by_name("get_field_0_in_MyStruct_ffi");
        assert!(getter.is_some());

        // entry: alloca, gep {0,0}, store, gep {0,0}, load handle, call, ret
        let entry = m.function(rw.new_func).blocks[0];
        let insts = m.block(entry).insts.clone();
        assert_eq!(insts.len(), 7);
        match m.value(insts[5]).as_inst().unwrap() {
            InstKind::Call { callee, args } => {
                assert_eq!(*callee, getter.unwrap());
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, found {:?}", other),
        }
        // the return now flows from the call
        match m.value(insts[6]).as_inst().unwrap() {
            InstKind::Ret { value } => assert_eq!(*value, Some(insts[5])),
            other => panic!("expected ret, found {:?}", other),
        }

        m.erase_function(rw.old_func).unwrap();
        assert_eq!(verify_module(&m), Ok(()));
    }

    #[test]
    fn test_no_protected_geps_survive() {
        let (mut m, rw, handle) = prepared_getter();
        let mut sink = DiagnosticSink::new();
        rewrite_accesses(&mut m, rw.new_func, &protected(), handle, &mut sink);

        let names = protected();
        for &bb in &m.function(rw.new_func).blocks {
            for &inst in &m.block(bb).insts {
                if let Some(InstKind::GetElementPtr { base, .. }) = m.value(inst).as_inst() {
                    let base_ty = m.value(*base).ty;
                    assert!(!is_struct_ptr_with_name(&m.types, base_ty, &names));
                }
            }
        }
    }

    #[test]
    fn test_write_becomes_setter_call() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let i1_ty = m.types.int(1);
        let s = m.types.create_struct("struct.MyStruct", vec![i32_ty, i1_ty]);
        let s_ptr = m.types.ptr_to(s);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![s_ptr, i1_ty], false);
        let f = m.add_function("write_y", fn_ty, Linkage::External).unwrap();

        let mut b = FunctionBuilder::new(&mut m, f);
        let p = b.arg(0);
        let v = b.arg(1);
        b.append_block("entry");
        let slot = b.alloca(s_ptr, 8, "p.addr");
        b.store(p, slot, 8);
        let loaded = b.load(s_ptr, slot, 8, "p.val");
        let field = b.gep(loaded, &[0, 1], "y.addr");
        b.store(v, field, 1);
        b.ret(None);

        let handle = m.types.create_struct("FakePtr", vec![i32_ty]);
        let rw = rewrite_signature(&mut m, f, &protected(), i32_ty).unwrap();
        let mut sink = DiagnosticSink::new();
        fix_entry_slots(&mut m, &rw, handle, &mut sink);
        rewrite_accesses(&mut m, rw.new_func, &protected(), handle, &mut sink);
        assert!(sink.is_empty());

        let setter = m
            .function_by_name("set_field_1_in_MyStruct_ffi")
            .expect("setter declared");
        let (ret, params, _) = m.types.fn_parts(m.function(setter).ty).unwrap();
        assert!(m.types.is_void(ret));
        assert_eq!(params, &[i32_ty, i1_ty]);

        m.erase_function(rw.old_func).unwrap();
        assert_eq!(verify_module(&m), Ok(()));
    }

    #[test]
    fn test_unrelated_gep_is_untouched() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let s = m.types.create_struct("struct.Other", vec![i32_ty]);
        let s_ptr = m.types.ptr_to(s);
        let my = m.types.create_struct("struct.MyStruct", vec![i32_ty]);
        let my_ptr = m.types.ptr_to(my);
        let fn_ty = m.types.func(i32_ty, vec![my_ptr, s_ptr], false);
        let f = m.add_function("mixed", fn_ty, Linkage::External).unwrap();

        let mut b = FunctionBuilder::new(&mut m, f);
        let p = b.arg(0);
        let q = b.arg(1);
        b.append_block("entry");
        let slot = b.alloca(my_ptr, 8, "p.addr");
        b.store(p, slot, 8);
        let field = b.gep(q, &[0, 0], "o.addr");
        let x = b.load(i32_ty, field, 4, "o");
        b.ret(Some(x));

        let handle = m.types.create_struct("FakePtr", vec![i32_ty]);
        let rw = rewrite_signature(&mut m, f, &protected(), i32_ty).unwrap();
        let mut sink = DiagnosticSink::new();
        fix_entry_slots(&mut m, &rw, handle, &mut sink);
        rewrite_accesses(&mut m, rw.new_func, &protected(), handle, &mut sink);

        // the struct.Other access survives untouched; no accessor appears
        assert!(sink.is_empty());
        assert!(m.function_by_name("get_field_0_in_Other_ffi").is_none());
        m.erase_function(rw.old_func).unwrap();
        assert_eq!(verify_module(&m), Ok(()));
    }

    #[test]
    fn test_mismatched_inner_load_is_diagnosed() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let s = m.types.create_struct("struct.MyStruct", vec![i32_ty]);
        let s_ptr = m.types.ptr_to(s);
        let s_ptr_ptr = m.types.ptr_to(s_ptr);
        let fn_ty = m.types.func(i32_ty, vec![s_ptr, s_ptr_ptr], false);
        let f = m.add_function("aliased", fn_ty, Linkage::External).unwrap();

        let mut b = FunctionBuilder::new(&mut m, f);
        let p = b.arg(0);
        let pp = b.arg(1);
        b.append_block("entry");
        let slot = b.alloca(s_ptr, 8, "p.addr");
        b.store(p, slot, 8);
        // this load does not go through the entry slot, so after the
        // prologue fix its pointer-operand type is not pointer-to-handle
        let other = b.load(s_ptr, pp, 8, "alias");
        let field = b.gep(other, &[0, 0], "x.addr");
        let x = b.load(i32_ty, field, 4, "x");
        b.ret(Some(x));

        let handle = m.types.create_struct("FakePtr", vec![i32_ty]);
        let rw = rewrite_signature(&mut m, f, &protected(), i32_ty).unwrap();
        let mut sink = DiagnosticSink::new();
        fix_entry_slots(&mut m, &rw, handle, &mut sink);
        rewrite_accesses(&mut m, rw.new_func, &protected(), handle, &mut sink);

        assert_eq!(
            sink.entries()
                .iter()
                .filter(|d| d.reason == SkipReason::HandleLoadTypeMismatch)
                .count(),
            1
        );
        assert!(m.function_by_name("get_field_0_in_MyStruct_ffi").is_none());
    }
}
