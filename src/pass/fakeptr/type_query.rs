//! Type inspection predicates.
//!
//! These are the only functions that interpret the `struct.` prefix the
//! front end puts on qualified aggregate names; everything downstream
//! works in terms of their results. All four are pure.

use crate::ir::types::{TypeContext, TypeId, TypeKind};

/// True iff `t` is a named aggregate whose qualified name is in `names`.
pub fn is_struct_with_name(types: &TypeContext, t: TypeId, names: &[String]) -> bool {
    match types.struct_name(t) {
        Some(name) => names.iter().any(|n| n == name),
        None => false,
    }
}

/// True iff `t` is a pointer to a named aggregate whose qualified name is
/// in `names`.
pub fn is_struct_ptr_with_name(types: &TypeContext, t: TypeId, names: &[String]) -> bool {
    match types.pointee(t) {
        Some(pointee) => is_struct_with_name(types, pointee, names),
        None => false,
    }
}

/// The unqualified name of an aggregate or pointer-to-aggregate.
///
/// Strips a `struct.` prefix when present; an unprefixed aggregate name is
/// returned as-is. Any other shape yields the empty string.
pub fn stripped_struct_name<'a>(types: &'a TypeContext, t: TypeId) -> &'a str {
    match types.kind(t) {
        TypeKind::Struct { .. } => {
            let name = types.struct_name(t).unwrap_or("");
            name.strip_prefix("struct.").unwrap_or(name)
        }
        TypeKind::Pointer(pointee) => stripped_struct_name(types, *pointee),
        _ => "",
    }
}

/// `replacement` when `t` is a protected record pointer, `t` otherwise.
pub fn correct_type(
    types: &TypeContext,
    t: TypeId,
    names: &[String],
    replacement: TypeId,
) -> TypeId {
    if is_struct_ptr_with_name(types, t, names) {
        replacement
    } else {
        t
    }
}

// ============================================================================
// Tests
// ============================================================================
