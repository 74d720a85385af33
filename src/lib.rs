//! # FakePtr
//!
//! A module-level compiler transform that interposes a trust boundary on
//! designated record types. Raw pointers to protected records are replaced
//! by opaque 32-bit handles, and every field read and write through those
//! pointers is redirected to a foreign accessor routine whose
//! implementation lives outside the transformed module.
//!
//! ## What the pass does
//!
//! Given a function in the canonical front-end lowering
//!
//! ```text
//! define i32 @read_x(%struct.MyStruct* %p) {
//! entry:
//!   %p.addr = alloca %struct.MyStruct*, align 8
//!   store %struct.MyStruct* %p, %struct.MyStruct** %p.addr, align 8
//!   %0 = load %struct.MyStruct*, %struct.MyStruct** %p.addr, align 8
//!   %x = getelementptr inbounds %struct.MyStruct, %struct.MyStruct* %0, i32 0, i32 0
//!   %1 = load i32, i32* %x, align 4
//!   ret i32 %1
//! }
//! ```
//!
//! the pass produces
//!
//! ```text
//! define i32 @read_x(i32 %p) {
//! entry:
//!   %handle.slot = alloca %FakePtr, align 4
//!   %handle.addr = getelementptr inbounds %FakePtr, %FakePtr* %handle.slot, i32 0, i32 0
//!   store i32 %p, i32* %handle.addr, align 4
//!   %handle.addr.1 = getelementptr inbounds %FakePtr, %FakePtr* %handle.slot, i32 0, i32 0
//!   %handle = load i32, i32* %handle.addr.1, align 4
//!   %0 = call i32 @get_field_0_in_MyStruct_ffi(i32 %handle)
//!   ret i32 %0
//! }
//!
//! declare i32 @get_field_0_in_MyStruct_ffi(i32)
//! ```
//!
//! The accessor implementations are the runtime's concern; the pass only
//! emits their declarations.
//!
//! ## Quick Start
//!
//! ```rust
//! use fakeptr::ir::{FunctionBuilder, Linkage, Module};
//! use fakeptr::pass::fakeptr::FakePtrPass;
//! use fakeptr::pass::ModulePass;
//!
//! let mut module = Module::new("demo");
//! let i32_ty = module.types.int(32);
//! let s = module.types.create_struct("struct.MyStruct", vec![i32_ty]);
//! let s_ptr = module.types.ptr_to(s);
//! let fn_ty = module.types.func(i32_ty, vec![s_ptr], false);
//! let f = module.add_function("read_x", fn_ty, Linkage::External).unwrap();
//!
//! let mut b = FunctionBuilder::new(&mut module, f);
//! let p = b.arg(0);
//! b.append_block("entry");
//! let slot = b.alloca(s_ptr, 8, "p.addr");
//! b.store(p, slot, 8);
//! let loaded = b.load(s_ptr, slot, 8, "p.val");
//! let field = b.gep(loaded, &[0, 0], "x.addr");
//! let x = b.load(i32_ty, field, 4, "x");
//! b.ret(Some(x));
//!
//! let mut pass = FakePtrPass::with_default_config();
//! assert!(pass.run_on_module(&mut module));
//! assert!(pass.verifier_findings().is_empty());
//! ```
//!
//! ## Module Overview
//!
//! - [`ir`] - The typed SSA IR the pass operates on
//! - [`pass`] - Module-transform trait and the FakePtr pass itself

pub mod ir;
pub mod pass;

// Re-export commonly used types
pub use ir::{Module, ModuleError, TypeContext, TypeId, VerifyError};
pub use pass::fakeptr::{FakePtrConfig, FakePtrPass, PassDiagnostic, SkipReason};
pub use pass::ModulePass;
