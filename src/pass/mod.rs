//! Module transforms.
//!
//! A transform implements [`ModulePass`]: given a module, mutate it in
//! place and report whether anything changed. Registration data (the
//! short identifier and the human-readable description) lives on the
//! trait so a host pipeline can list and select passes by name.

use crate::ir::Module;

pub mod fakeptr;

/// A transform over a whole module.
pub trait ModulePass {
    /// Short identifier used to select the pass (e.g. `fakeptr`).
    fn name(&self) -> &'static str;

    /// Human-readable description.
    fn description(&self) -> &'static str;

    /// Mutate `module` in place. Returns true iff anything changed.
    fn run_on_module(&mut self, module: &mut Module) -> bool;
}
