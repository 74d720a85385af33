//! # FakePtr Protection Pass
//!
//! A module transform that interposes a trust boundary on a configured
//! family of record types. After the pass, code in the module can no
//! longer dereference raw memory for those records: every parameter of a
//! protected record-pointer type becomes an opaque 32-bit handle, and
//! every field read or write through such a pointer becomes a call to a
//! foreign accessor (`get_field_<k>_in_<S>_ffi` /
//! `set_field_<k>_in_<S>_ffi`) whose implementation lives outside the
//! module, typically in a memory-safe runtime.
//!
//! ## Stages
//!
//! Per defined function, three cooperating stages run in order:
//!
//! 1. [`signature::rewrite_signature`] retypes protected pointer
//!    parameters to the handle argument type and migrates the body.
//! 2. [`prologue::fix_entry_slots`] retypes each changed argument's entry
//!    stack slot to the handle aggregate.
//! 3. [`access::rewrite_accesses`] rewrites every recognized field access
//!    into a foreign accessor call.
//!
//! The driver then strips `optnone` from the replacement, erases the old
//! function, and finally verifies the whole module. A failure at one site
//! never aborts the others; the verifier is the single source of truth
//! for correctness.
//!
//! ## Handle layout
//!
//! The handle is a named aggregate `FakePtr` with a single `i32` field,
//! un-packed, 4 bytes, alignment 4. Its meaning is entirely the runtime's
//! concern; the pass only ever stores the handle value through it.

use serde::Deserialize;
use tracing::{debug, error};

use crate::ir::function::{Attribute, FunctionId};
use crate::ir::module::Module;
use crate::ir::types::{TypeContext, TypeId};
use crate::ir::verify::{verify_module, VerifyError};

use super::ModulePass;

pub mod access;
pub mod diag;
pub mod prologue;
pub mod signature;
pub mod type_query;

pub use diag::{DiagnosticSink, PassDiagnostic, SkipReason};

/// Bit width of the handle value.
pub const FAKEPTR_NUM_BITS: u32 = 32;

/// Name the handle aggregate is interned under.
pub const FAKEPTR_TYPE_NAME: &str = "FakePtr";

/// Pass configuration: which record types are protected.
///
/// Names are qualified the way the front end qualifies them
/// (`struct.MyStruct`). The set is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FakePtrConfig {
    /// Qualified names of the protected record types, in order.
    pub protected: Vec<String>,
}

impl Default for FakePtrConfig {
    fn default() -> Self {
        Self {
            protected: vec!["struct.MyStruct".to_string()],
        }
    }
}

impl FakePtrConfig {
    /// Parse a configuration from TOML text.
    ///
    /// ```toml
    /// protected = ["struct.MyStruct", "struct.Session"]
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// The FakePtr protection pass.
pub struct FakePtrPass {
    config: FakePtrConfig,
    sink: DiagnosticSink,
    verify_errors: Vec<VerifyError>,
}

impl FakePtrPass {
    /// Create the pass with an explicit protected set.
    pub fn new(config: FakePtrConfig) -> Self {
        Self {
            config,
            sink: DiagnosticSink::new(),
            verify_errors: Vec::new(),
        }
    }

    /// Create the pass with the default protected set.
    pub fn with_default_config() -> Self {
        Self::new(FakePtrConfig::default())
    }

    /// Diagnostics recorded by the most recent run.
    pub fn diagnostics(&self) -> &[PassDiagnostic] {
        self.sink.entries()
    }

    /// Verifier findings from the most recent run.
    pub fn verifier_findings(&self) -> &[VerifyError] {
        &self.verify_errors
    }

    /// Look up, or intern, the handle aggregate in `types`.
    ///
    /// Reusing an existing `FakePtr` with the expected body keeps the pass
    /// idempotent: a second run neither duplicates the type nor renames
    /// it.
    fn handle_type(types: &mut TypeContext) -> TypeId {
        let i32_ty = types.int(FAKEPTR_NUM_BITS);
        if let Some(existing) = types.struct_by_name(FAKEPTR_TYPE_NAME) {
            if types.struct_fields(existing) == Some(&[i32_ty][..]) {
                return existing;
            }
        }
        types.create_struct(FAKEPTR_TYPE_NAME, vec![i32_ty])
    }

    fn run_on_function(&mut self, module: &mut Module, func: FunctionId) -> bool {
        // declarations (and intrinsics) carry no body to rewrite
        if module.inst_count(func) == 0 {
            return false;
        }

        let fn_ty = module.function(func).ty;
        if let Some((ret, _, _)) = module.types.fn_parts(fn_ty) {
            if type_query::is_struct_ptr_with_name(&module.types, ret, &self.config.protected) {
                let name = module.function(func).name.clone();
                self.sink.skip(&name, SkipReason::ProtectedReturnType);
            }
        }

        let handle_arg_ty = module.types.int(FAKEPTR_NUM_BITS);
        let Some(rw) =
            signature::rewrite_signature(module, func, &self.config.protected, handle_arg_ty)
        else {
            return false;
        };

        // interned on first use so an untouched module stays untouched
        let handle_ty = Self::handle_type(&mut module.types);

        prologue::fix_entry_slots(module, &rw, handle_ty, &mut self.sink);
        access::rewrite_accesses(
            module,
            rw.new_func,
            &self.config.protected,
            handle_ty,
            &mut self.sink,
        );

        module
            .function_mut(rw.new_func)
            .attrs
            .fn_attrs
            .remove(Attribute::OptimizeNone);

        if let Err(e) = module.erase_function(rw.old_func) {
            let name = module.function(rw.new_func).name.clone();
            self.sink.skip(
                &name,
                SkipReason::EditRejected {
                    detail: e.to_string(),
                },
            );
        }
        true
    }
}

impl ModulePass for FakePtrPass {
    fn name(&self) -> &'static str {
        "fakeptr"
    }

    fn description(&self) -> &'static str {
        "FakePtr protection"
    }

    fn run_on_module(&mut self, module: &mut Module) -> bool {
        self.sink.clear();
        self.verify_errors.clear();

        debug!(module = %module.name, protected = ?self.config.protected, "running");

        let mut changed = false;
        // snapshot the list so erasing the just-visited function cannot
        // invalidate the cursor
        for func in module.function_ids() {
            if !module.contains_function(func) {
                continue;
            }
            changed |= self.run_on_function(module, func);
        }

        if let Err(errors) = verify_module(module) {
            for e in &errors {
                error!(finding = %e, "verifier rejected the module");
            }
            self.verify_errors = errors;
        }
        changed
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Linkage;
    use crate::ir::types::TypeKind;

    #[test]
    fn test_default_config() {
        let config = FakePtrConfig::default();
        assert_eq!(config.protected, vec!["struct.MyStruct".to_string()]);
    }

    #[test]
    fn test_config_from_toml() {
        let config =
            FakePtrConfig::from_toml_str("protected = [\"struct.A\", \"struct.B\"]").unwrap();
        assert_eq!(
            config.protected,
            vec!["struct.A".to_string(), "struct.B".to_string()]
        );
        assert!(FakePtrConfig::from_toml_str("protected = 3").is_err());
    }

    #[test]
    fn test_pass_registration_strings() {
        let pass = FakePtrPass::with_default_config();
        assert_eq!(pass.name(), "fakeptr");
        assert_eq!(pass.description(), "FakePtr protection");
    }

    #[test]
    fn test_handle_type_is_interned_once() {
        let mut types = TypeContext::new();
        let a = FakePtrPass::handle_type(&mut types);
        let b = FakePtrPass::handle_type(&mut types);
        assert_eq!(a, b);
        assert_eq!(types.struct_name(a), Some(FAKEPTR_TYPE_NAME));
        let i32_ty = types.int(32);
        assert_eq!(types.struct_fields(a), Some(&[i32_ty][..]));
    }

    #[test]
    fn test_handle_type_does_not_reuse_foreign_fakeptr() {
        let mut types = TypeContext::new();
        let i1 = types.int(1);
        let foreign = types.create_struct(FAKEPTR_TYPE_NAME, vec![i1, i1]);
        let handle = FakePtrPass::handle_type(&mut types);
        assert_ne!(handle, foreign);
        assert!(matches!(
            types.kind(handle),
            TypeKind::Struct { fields, .. } if fields.len() == 1
        ));
    }

    #[test]
    fn test_untouched_module_reports_unchanged() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let fn_ty = m.types.func(i32_ty, vec![i32_ty], false);
        m.add_function("plain", fn_ty, Linkage::External).unwrap();

        let mut pass = FakePtrPass::with_default_config();
        assert!(!pass.run_on_module(&mut m));
        assert!(pass.diagnostics().is_empty());
        assert!(pass.verifier_findings().is_empty());
    }
}
