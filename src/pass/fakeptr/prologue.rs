//! Entry prologue fixing.
//!
//! The canonical front-end lowering of a by-pointer parameter is
//!
//! ```text
//! %p.addr = alloca %struct.T*
//! store %struct.T* %p, %struct.T** %p.addr
//! ```
//!
//! After the signature rewrite the argument is a handle, so the slot must
//! hold the handle aggregate instead: the alloca is replaced in place by
//! an alloca of the handle type, and the initial store is redirected at
//! the handle's integer field through a `{0, 0}` address-of-field. Every
//! later load of the slot then observes a well-formed handle.

use tracing::debug;

use crate::ir::module::Module;
use crate::ir::types::TypeId;
use crate::ir::value::{InstKind, ValueId, ValueKind};

use super::diag::{DiagnosticSink, SkipReason};
use super::signature::SignatureRewrite;

/// Retype the entry slot of every changed argument.
pub fn fix_entry_slots(
    module: &mut Module,
    rw: &SignatureRewrite,
    handle_ty: TypeId,
    sink: &mut DiagnosticSink,
) {
    let i32_ty = module.types.int(32);
    let handle_ptr_ty = module.types.ptr_to(handle_ty);
    let i32_ptr_ty = module.types.ptr_to(i32_ty);
    let void = module.types.void();
    let fname = module.function(rw.new_func).name.clone();

    for &argi in &rw.changed_args {
        let arg = module.function(rw.new_func).params[argi];
        let Some(store) = first_store_of(module, rw.new_func, arg) else {
            // the argument is never spilled; nothing to retype
            continue;
        };
        let dest = match module.value(store).as_inst() {
            Some(InstKind::Store { ptr, .. }) => *ptr,
            _ => continue,
        };
        let dest_is_alloca = matches!(
            module.value(dest).as_inst(),
            Some(InstKind::Alloca { .. })
        );
        if !dest_is_alloca {
            sink.skip(&fname, SkipReason::EntryStoreNotAlloca { arg_index: argi });
            continue;
        }

        let new_slot = module.new_inst(
            InstKind::Alloca {
                allocated: handle_ty,
                align: 4,
            },
            handle_ptr_ty,
            Some("handle.slot".to_string()),
        );
        if let Err(e) = module.replace_inst_with_inst(dest, new_slot) {
            sink.skip(
                &fname,
                SkipReason::EditRejected {
                    detail: e.to_string(),
                },
            );
            continue;
        }

        let zero = module.const_int(i32_ty, 0);
        let field_addr = module.new_inst(
            InstKind::GetElementPtr {
                base: new_slot,
                indices: vec![zero, zero],
                inbounds: true,
            },
            i32_ptr_ty,
            Some("handle.addr".to_string()),
        );
        let new_store = module.new_inst(
            InstKind::Store {
                value: arg,
                ptr: field_addr,
                align: 4,
            },
            void,
            None,
        );
        let result = module
            .insert_inst_before(store, field_addr)
            .and_then(|_| module.replace_inst_with_inst(store, new_store));
        if let Err(e) = result {
            sink.skip(
                &fname,
                SkipReason::EditRejected {
                    detail: e.to_string(),
                },
            );
            continue;
        }
        debug!(function = %fname, arg = argi, "retyped entry slot");
    }
}

/// The first instruction, in program order, that stores `arg`.
fn first_store_of(module: &Module, func: crate::ir::FunctionId, arg: ValueId) -> Option<ValueId> {
    for &bb in &module.function(func).blocks {
        for &inst in &module.block(bb).insts {
            if let ValueKind::Inst(InstKind::Store { value, .. }) = &module.value(inst).kind {
                if *value == arg {
                    return Some(inst);
                }
            }
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
