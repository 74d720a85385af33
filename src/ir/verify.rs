//! IR verification pass.
//!
//! Checks modules for well-formedness after transformation, catching
//! malformed IR with attributable findings rather than letting it produce
//! wrong code downstream. All findings are collected; verification never
//! stops at the first problem.

use thiserror::Error;

use super::function::FunctionId;
use super::module::Module;
use super::types::TypeKind;
use super::value::{BlockId, InstKind, ValueId, ValueKind};

/// A well-formedness finding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("function `{function}` has a body but entry block {block} is empty")]
    EmptyBlock { function: String, block: BlockId },

    #[error("function `{function}`: block {block} has no terminator")]
    MissingTerminator { function: String, block: BlockId },

    #[error("function `{function}`: block {block} has a terminator before its end")]
    TerminatorNotAtEnd { function: String, block: BlockId },

    #[error("function `{function}`: instruction {inst} references a dead value {operand}")]
    StaleOperand {
        function: String,
        inst: ValueId,
        operand: ValueId,
    },

    #[error("function `{function}`: instruction {inst} uses {operand} from another function")]
    CrossFunctionOperand {
        function: String,
        inst: ValueId,
        operand: ValueId,
    },

    #[error("function `{function}`: instruction {inst} uses {operand} before it is defined")]
    UseBeforeDef {
        function: String,
        inst: ValueId,
        operand: ValueId,
    },

    #[error("function `{function}`: instruction {inst} is ill-typed: {detail}")]
    TypeMismatch {
        function: String,
        inst: ValueId,
        detail: String,
    },

    #[error("function `{function}`: call {inst} does not match callee `{callee}` signature")]
    CallSignatureMismatch {
        function: String,
        inst: ValueId,
        callee: String,
    },

    #[error("function `{function}`: branch {inst} targets a block of another function")]
    ForeignBranchTarget { function: String, inst: ValueId },

    #[error("symbol table entry `{name}` does not match the function list")]
    SymbolTableMismatch { name: String },
}

/// Verify a whole module. Returns every finding, or `Ok` if clean.
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();

    for (id, func) in module.functions() {
        if module.function_by_name(&func.name) != Some(id) && !func.name.is_empty() {
            errors.push(VerifyError::SymbolTableMismatch {
                name: func.name.clone(),
            });
        }
        verify_function(module, id, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Verify a single function, appending findings to `errors`.
pub fn verify_function(module: &Module, f: FunctionId, errors: &mut Vec<VerifyError>) {
    let func = module.function(f);
    if func.is_declaration() {
        return;
    }
    let fname = func.name.clone();

    // Values visible inside this function: arguments and instructions of
    // its blocks, with per-block positions for ordering checks.
    let mut local_defs: Vec<ValueId> = func.params.clone();
    let mut positions: Vec<(ValueId, BlockId, usize)> = Vec::new();
    for &bb in &func.blocks {
        let block = module.block(bb);
        for (pos, &inst) in block.insts.iter().enumerate() {
            local_defs.push(inst);
            positions.push((inst, bb, pos));
        }
    }
    let position_of = |v: ValueId| positions.iter().find(|&&(id, _, _)| id == v).copied();

    for &bb in &func.blocks {
        let block = module.block(bb);
        if block.insts.is_empty() {
            errors.push(VerifyError::EmptyBlock {
                function: fname.clone(),
                block: bb,
            });
            continue;
        }
        for (pos, &inst_id) in block.insts.iter().enumerate() {
            let last = pos + 1 == block.insts.len();
            let Some(inst) = module.value(inst_id).as_inst() else {
                continue;
            };
            if inst.is_terminator() && !last {
                errors.push(VerifyError::TerminatorNotAtEnd {
                    function: fname.clone(),
                    block: bb,
                });
            }
            if last && !inst.is_terminator() {
                errors.push(VerifyError::MissingTerminator {
                    function: fname.clone(),
                    block: bb,
                });
            }

            for operand in inst.operands() {
                if !module.contains_value(operand) {
                    errors.push(VerifyError::StaleOperand {
                        function: fname.clone(),
                        inst: inst_id,
                        operand,
                    });
                    continue;
                }
                let data = module.value(operand);
                match &data.kind {
                    ValueKind::Const(_) => {}
                    _ => {
                        if !local_defs.contains(&operand) {
                            errors.push(VerifyError::CrossFunctionOperand {
                                function: fname.clone(),
                                inst: inst_id,
                                operand,
                            });
                        } else if let Some((_, def_bb, def_pos)) = position_of(operand) {
                            if def_bb == bb && def_pos >= pos {
                                errors.push(VerifyError::UseBeforeDef {
                                    function: fname.clone(),
                                    inst: inst_id,
                                    operand,
                                });
                            }
                        }
                    }
                }
            }

            check_inst_types(module, f, inst_id, errors);
        }
    }
}

fn check_inst_types(
    module: &Module,
    f: FunctionId,
    inst_id: ValueId,
    errors: &mut Vec<VerifyError>,
) {
    let func = module.function(f);
    let fname = &func.name;
    let data = module.value(inst_id);
    let Some(inst) = data.as_inst() else { return };

    let mismatch = |detail: String| VerifyError::TypeMismatch {
        function: fname.clone(),
        inst: inst_id,
        detail,
    };

    match inst {
        InstKind::Alloca { allocated, .. } => {
            if module.types.pointee(data.ty) != Some(*allocated) {
                errors.push(mismatch("alloca result is not a pointer to the allocated type".to_string()));
            }
        }
        InstKind::Load { ptr, .. } => {
            if !module.contains_value(*ptr) {
                return;
            }
            let ptr_ty = module.value(*ptr).ty;
            if module.types.pointee(ptr_ty) != Some(data.ty) {
                errors.push(mismatch(
                    "load result type does not match the pointer's pointee".to_string(),
                ));
            }
        }
        InstKind::Store { value, ptr, .. } => {
            if !module.contains_value(*ptr) || !module.contains_value(*value) {
                return;
            }
            let ptr_ty = module.value(*ptr).ty;
            let value_ty = module.value(*value).ty;
            if module.types.pointee(ptr_ty) != Some(value_ty) {
                errors.push(mismatch(
                    "stored value type does not match the pointer's pointee".to_string(),
                ));
            }
        }
        InstKind::GetElementPtr { base, indices, .. } => {
            if !module.contains_value(*base) {
                return;
            }
            let base_ty = module.value(*base).ty;
            match module.gep_pointee_type(base_ty, indices) {
                Ok(elem) => {
                    if module.types.pointee(data.ty) != Some(elem) {
                        errors.push(mismatch(
                            "getelementptr result type does not match the addressed field"
                                .to_string(),
                        ));
                    }
                }
                Err(e) => errors.push(mismatch(e.to_string())),
            }
        }
        InstKind::Call { callee, args } => {
            if !module.contains_function(*callee) {
                errors.push(VerifyError::CallSignatureMismatch {
                    function: fname.clone(),
                    inst: inst_id,
                    callee: "<erased>".to_string(),
                });
                return;
            }
            let callee_fn = module.function(*callee);
            let Some((ret, params, varargs)) = module.types.fn_parts(callee_fn.ty) else {
                errors.push(VerifyError::CallSignatureMismatch {
                    function: fname.clone(),
                    inst: inst_id,
                    callee: callee_fn.name.clone(),
                });
                return;
            };
            let arity_ok = if varargs {
                args.len() >= params.len()
            } else {
                args.len() == params.len()
            };
            let args_ok = arity_ok
                && params
                    .iter()
                    .zip(args.iter())
                    .all(|(&p, &a)| module.contains_value(a) && module.value(a).ty == p);
            if !args_ok || data.ty != ret {
                errors.push(VerifyError::CallSignatureMismatch {
                    function: fname.clone(),
                    inst: inst_id,
                    callee: callee_fn.name.clone(),
                });
            }
        }
        InstKind::Ret { value } => {
            let Some((ret, _, _)) = module.types.fn_parts(func.ty) else {
                return;
            };
            match value {
                None => {
                    if !module.types.is_void(ret) {
                        errors.push(mismatch(
                            "ret void in a function with a non-void return type".to_string(),
                        ));
                    }
                }
                Some(v) => {
                    if module.contains_value(*v) && module.value(*v).ty != ret {
                        errors.push(mismatch(
                            "returned value type does not match the return type".to_string(),
                        ));
                    }
                }
            }
        }
        InstKind::Br { dest } => {
            if module.block(*dest).func != f {
                errors.push(VerifyError::ForeignBranchTarget {
                    function: fname.clone(),
                    inst: inst_id,
                });
            }
        }
        InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } => {
            if module.contains_value(*cond) {
                let cond_ty = module.value(*cond).ty;
                if !matches!(module.types.kind(cond_ty), TypeKind::Int(1)) {
                    errors.push(mismatch("branch condition is not an i1".to_string()));
                }
            }
            if module.block(*then_dest).func != f || module.block(*else_dest).func != f {
                errors.push(VerifyError::ForeignBranchTarget {
                    function: fname.clone(),
                    inst: inst_id,
                });
            }
        }
        InstKind::BinOp { lhs, rhs, .. } => {
            if !module.contains_value(*lhs) || !module.contains_value(*rhs) {
                return;
            }
            let lt = module.value(*lhs).ty;
            let rt = module.value(*rhs).ty;
            if lt != rt || lt != data.ty || !module.types.is_int(lt) {
                errors.push(mismatch("integer binop operand mismatch".to_string()));
            }
        }
        InstKind::Icmp { lhs, rhs, .. } => {
            if !module.contains_value(*lhs) || !module.contains_value(*rhs) {
                return;
            }
            let lt = module.value(*lhs).ty;
            let rt = module.value(*rhs).ty;
            let ok = lt == rt && matches!(module.types.kind(data.ty), TypeKind::Int(1));
            if !ok {
                errors.push(mismatch("icmp operand mismatch".to_string()));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::{FunctionBuilder, Linkage};
    use crate::ir::value::InstKind;

    fn getter_module() -> Module {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let i1_ty = m.types.int(1);
        let s = m.types.create_struct("struct.Pair", vec![i32_ty, i1_ty]);
        let s_ptr = m.types.ptr_to(s);
        let fn_ty = m.types.func(i32_ty, vec![s_ptr], false);
        let f = m.add_function("read", fn_ty, Linkage::External).unwrap();

        let mut b = FunctionBuilder::new(&mut m, f);
        let arg = b.arg(0);
        b.append_block("entry");
        let slot = b.alloca(s_ptr, 8, "p.addr");
        b.store(arg, slot, 8);
        let loaded = b.load(s_ptr, slot, 8, "p.val");
        let field = b.gep(loaded, &[0, 0], "x.addr");
        let x = b.load(i32_ty, field, 4, "x");
        b.ret(Some(x));
        m
    }

    #[test]
    fn test_accepts_canonical_getter() {
        let m = getter_module();
        assert_eq!(verify_module(&m), Ok(()));
    }

    #[test]
    fn test_detects_missing_terminator() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        b.append_block("entry");
        b.alloca(i32_ty, 4, "x");

        let errs = verify_module(&m).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, VerifyError::MissingTerminator { .. })));
    }

    #[test]
    fn test_detects_store_type_mismatch() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let i1_ty = m.types.int(1);
        let void = m.types.void();
        let fn_ty = m.types.func(void, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        b.append_block("entry");
        let slot = b.alloca(i1_ty, 1, "flag");
        let v = m.const_int(i32_ty, 5);
        let entry = m.function(f).blocks[0];
        let mut b = FunctionBuilder::new(&mut m, f);
        b.position_at_end(entry);
        b.store(v, slot, 4);
        b.ret(None);

        let errs = verify_module(&m).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, VerifyError::TypeMismatch { .. })));
    }

    #[test]
    fn test_detects_use_before_def() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();
        let mut b = FunctionBuilder::new(&mut m, f);
        b.append_block("entry");
        let slot = b.alloca(i32_ty, 4, "x");
        let val = b.load(i32_ty, slot, 4, "v");
        b.ret(Some(val));

        // move the load above its alloca by hand
        let entry = m.function(f).blocks[0];
        m.block_mut(entry).insts.swap(0, 1);
        let errs = verify_module(&m).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, VerifyError::UseBeforeDef { .. })));
    }

    #[test]
    fn test_detects_call_arity_mismatch() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        let callee_ty = m.types.func(i32_ty, vec![i32_ty], false);
        let callee = m.add_function("g", callee_ty, Linkage::External).unwrap();
        let fn_ty = m.types.func(i32_ty, vec![], false);
        let f = m.add_function("f", fn_ty, Linkage::External).unwrap();

        let void = m.types.void();
        let bb = m.create_block(f, Some("entry".to_string()));
        let call = m.new_inst(
            InstKind::Call {
                callee,
                args: vec![],
            },
            i32_ty,
            None,
        );
        m.push_inst(bb, call);
        let ret = m.new_inst(InstKind::Ret { value: Some(call) }, void, None);
        m.push_inst(bb, ret);

        let errs = verify_module(&m).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, VerifyError::CallSignatureMismatch { .. })));
    }

    #[test]
    fn test_declaration_is_clean() {
        let mut m = Module::new("t");
        let i32_ty = m.types.int(32);
        m.get_or_insert_function("ext", i32_ty, vec![i32_ty])
            .unwrap();
        assert_eq!(verify_module(&m), Ok(()));
    }
}
