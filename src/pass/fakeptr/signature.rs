//! Function signature rewriting.
//!
//! For a defined function whose parameter list mentions a protected record
//! pointer, this builds a replacement function whose affected parameter
//! slots carry the 32-bit handle argument type instead, and migrates the
//! body into it. The return type is preserved.
//!
//! The replacement keeps everything else the old function had: linkage,
//! address space, comdat, function- and return-level attributes, each
//! parameter's attribute set positionally, the varargs flag, and metadata
//! attachments. It is inserted immediately before the old function in the
//! module's function list and takes over its name; the old function is
//! left as an empty, unnamed husk for the driver to erase once the body
//! fixups are done.

use tracing::debug;

use crate::ir::function::FunctionId;
use crate::ir::module::Module;
use crate::ir::types::TypeId;

use super::type_query::correct_type;

/// The outcome of rewriting one function's signature.
#[derive(Debug, Clone)]
pub struct SignatureRewrite {
    /// The husk left behind; erase after body fixups.
    pub old_func: FunctionId,
    /// The replacement that now owns the name and the body.
    pub new_func: FunctionId,
    /// Parameter indices whose type was replaced by the handle type.
    pub changed_args: Vec<usize>,
}

/// Rewrite `func`'s signature if it mentions a protected record pointer.
///
/// Returns `None` (and leaves the module untouched) when no parameter
/// needs correction.
pub fn rewrite_signature(
    module: &mut Module,
    func: FunctionId,
    protected: &[String],
    handle_arg_ty: TypeId,
) -> Option<SignatureRewrite> {
    let old_ty = module.function(func).ty;
    let (ret, old_params, varargs) = {
        let (r, p, v) = module.types.fn_parts(old_ty)?;
        (r, p.to_vec(), v)
    };

    let mut changed_args = Vec::new();
    let mut new_params = Vec::with_capacity(old_params.len());
    for (i, &pty) in old_params.iter().enumerate() {
        let corrected = correct_type(&module.types, pty, protected, handle_arg_ty);
        if corrected != pty {
            changed_args.push(i);
        }
        new_params.push(corrected);
    }

    let new_ty = module.types.func(ret, new_params, varargs);
    if new_ty == old_ty {
        return None;
    }

    let (linkage, address_space, comdat, attrs, metadata) = {
        let old = module.function(func);
        (
            old.linkage,
            old.address_space,
            old.comdat.clone(),
            old.attrs.clone(),
            old.metadata.clone(),
        )
    };

    let new_func = match module.add_unnamed_function(new_ty, linkage) {
        Ok(id) => id,
        // new_ty came from the type table, so this cannot be a
        // non-function type; treat failure as "nothing to do"
        Err(_) => return None,
    };
    {
        let new = module.function_mut(new_func);
        new.address_space = address_space;
        new.comdat = comdat;
        new.attrs = attrs;
        new.metadata = metadata;
    }

    module.move_before(new_func, func);
    module.take_name(new_func, func);
    module.transfer_blocks(new_func, func);

    let old_args = module.function(func).params.clone();
    let new_args = module.function(new_func).params.clone();
    for (&old_arg, &new_arg) in old_args.iter().zip(new_args.iter()) {
        module.replace_all_uses_with(old_arg, new_arg);
        let name = module.value_mut(old_arg).name.take();
        module.value_mut(new_arg).name = name;
    }

    debug!(
        function = %module.function(new_func).name,
        changed = changed_args.len(),
        "rewrote signature"
    );

    Some(SignatureRewrite {
        old_func: func,
        new_func,
        changed_args,
    })
}

// ============================================================================
// Tests
// ============================================================================
