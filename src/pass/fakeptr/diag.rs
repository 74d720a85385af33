//! Skip reasons and the diagnostic sink.
//!
//! A site the pass leaves unchanged is either benign (no note) or
//! diagnosed: an enumerated [`SkipReason`] recorded against the function
//! it occurred in. The sink keeps every entry for inspection after the
//! run and logs each one as it is recorded.

use thiserror::Error;

/// Why a function, argument, or access site was left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    /// The first store of a changed argument does not target a stack
    /// allocation, so the entry slot cannot be retyped.
    #[error("first store of argument {arg_index} does not target a stack allocation")]
    EntryStoreNotAlloca { arg_index: usize },

    /// The load feeding a protected field address does not read from a
    /// handle slot; the site is not the canonical idiom.
    #[error("load feeding the field address does not read a handle slot")]
    HandleLoadTypeMismatch,

    /// The trailing index of the address-of-field is not a compile-time
    /// constant, so no accessor name can be formed.
    #[error("address-of-field has a non-constant trailing index")]
    NonConstantFieldIndex,

    /// The function returns a protected record pointer; return rewriting
    /// is not performed, the function keeps its original return type.
    #[error("return type is a protected record pointer and is preserved")]
    ProtectedReturnType,

    /// An accessor symbol already exists with a different signature.
    #[error("accessor declaration clash: {detail}")]
    AccessorSignatureClash { detail: String },

    /// The module API rejected an edit (for example erasing a value that
    /// still has uses).
    #[error("edit rejected: {detail}")]
    EditRejected { detail: String },
}

/// A recorded skip, attributed to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDiagnostic {
    /// The function the skip occurred in.
    pub function: String,
    /// Why the site was left unchanged.
    pub reason: SkipReason,
}

/// Collects every diagnostic the pass emits during one run.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Vec<PassDiagnostic>,
}

impl DiagnosticSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skip and log it.
    pub fn skip(&mut self, function: &str, reason: SkipReason) {
        tracing::warn!(function, %reason, "site left unchanged");
        self.entries.push(PassDiagnostic {
            function: function.to_string(),
            reason,
        });
    }

    /// All entries recorded so far.
    pub fn entries(&self) -> &[PassDiagnostic] {
        &self.entries
    }

    /// Check whether nothing was diagnosed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
