//! Textual serialization of modules.
//!
//! The output is deterministic: named aggregates print in creation order,
//! functions in list order, and unnamed values number upward per function
//! (arguments first, then block labels and instruction results in program
//! order). Duplicate value names are disambiguated with a numeric suffix
//! at print time, the way the textual IR form usually does it.
//!
//! Determinism is what makes "the pass did not touch this function"
//! checkable by string comparison.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use super::function::{Function, FunctionId};
use super::module::Module;
use super::types::{TypeContext, TypeId, TypeKind};
use super::value::{BlockId, ConstKind, InstKind, ValueId, ValueKind};

/// Render a type.
pub fn type_str(types: &TypeContext, t: TypeId) -> String {
    match types.kind(t) {
        TypeKind::Void => "void".to_string(),
        TypeKind::Int(bits) => format!("i{}", bits),
        TypeKind::Pointer(p) => format!("{}*", type_str(types, *p)),
        TypeKind::Array { element, len } => {
            format!("[{} x {}]", len, type_str(types, *element))
        }
        TypeKind::Struct { .. } => match types.struct_name(t) {
            Some(name) => format!("%{}", name),
            None => "%<anon>".to_string(),
        },
        TypeKind::Function {
            ret,
            params,
            varargs,
        } => {
            let mut s = format!("{} (", type_str(types, *ret));
            for (i, &p) in params.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                s.push_str(&type_str(types, p));
            }
            if *varargs {
                if !params.is_empty() {
                    s.push_str(", ");
                }
                s.push_str("...");
            }
            s.push(')');
            s
        }
    }
}

/// Per-function naming state: `%N` numbering and name deduplication.
struct Namer {
    value_names: HashMap<ValueId, String>,
    block_names: HashMap<BlockId, String>,
    used: HashMap<String, u32>,
    counter: u32,
}

impl Namer {
    fn for_function(module: &Module, func: &Function) -> Self {
        let mut namer = Self {
            value_names: HashMap::new(),
            block_names: HashMap::new(),
            used: HashMap::new(),
            counter: 0,
        };
        for &arg in &func.params {
            namer.assign_value(module, arg);
        }
        for &bb in &func.blocks {
            let label = match &module.block(bb).name {
                Some(name) => namer.unique(name),
                None => namer.next_number(),
            };
            namer.block_names.insert(bb, label);
            for &inst in &module.block(bb).insts {
                if !module.types.is_void(module.value(inst).ty) {
                    namer.assign_value(module, inst);
                }
            }
        }
        namer
    }

    fn assign_value(&mut self, module: &Module, v: ValueId) {
        let name = match &module.value(v).name {
            Some(name) => self.unique(name),
            None => self.next_number(),
        };
        self.value_names.insert(v, name);
    }

    fn unique(&mut self, name: &str) -> String {
        match self.used.get(name).copied() {
            None => {
                self.used.insert(name.to_string(), 0);
                name.to_string()
            }
            Some(mut n) => loop {
                n += 1;
                let candidate = format!("{}.{}", name, n);
                if !self.used.contains_key(&candidate) {
                    self.used.insert(name.to_string(), n);
                    self.used.insert(candidate.clone(), 0);
                    break candidate;
                }
            },
        }
    }

    fn next_number(&mut self) -> String {
        let n = self.counter;
        self.counter += 1;
        n.to_string()
    }

    /// Render a value reference (without its type).
    fn value_ref(&self, module: &Module, v: ValueId) -> String {
        let data = module.value(v);
        match &data.kind {
            ValueKind::Const(ConstKind::Int(i)) => i.to_string(),
            ValueKind::Const(ConstKind::Null) => "null".to_string(),
            ValueKind::Const(ConstKind::Undef) => "undef".to_string(),
            _ => match self.value_names.get(&v) {
                Some(name) => format!("%{}", name),
                None => format!("%{}", v),
            },
        }
    }

    /// Render `<type> <value>`.
    fn typed_ref(&self, module: &Module, v: ValueId) -> String {
        format!(
            "{} {}",
            type_str(&module.types, module.value(v).ty),
            self.value_ref(module, v)
        )
    }

    fn block_ref(&self, bb: BlockId) -> String {
        match self.block_names.get(&bb) {
            Some(name) => format!("%{}", name),
            None => format!("%{}", bb),
        }
    }
}

fn write_attr_words(out: &mut String, attrs: impl Iterator<Item = &'static str>) {
    for word in attrs {
        out.push(' ');
        out.push_str(word);
    }
}

fn print_inst(module: &Module, namer: &Namer, inst_id: ValueId, out: &mut String) {
    let data = module.value(inst_id);
    let inst = match data.as_inst() {
        Some(inst) => inst,
        None => return,
    };
    out.push_str("  ");
    if !module.types.is_void(data.ty) {
        let _ = write!(out, "{} = ", namer.value_ref(module, inst_id));
    }
    match inst {
        InstKind::Alloca { allocated, align } => {
            let _ = write!(
                out,
                "alloca {}, align {}",
                type_str(&module.types, *allocated),
                align
            );
        }
        InstKind::Load { ptr, align } => {
            let _ = write!(
                out,
                "load {}, {}, align {}",
                type_str(&module.types, data.ty),
                namer.typed_ref(module, *ptr),
                align
            );
        }
        InstKind::Store { value, ptr, align } => {
            let _ = write!(
                out,
                "store {}, {}, align {}",
                namer.typed_ref(module, *value),
                namer.typed_ref(module, *ptr),
                align
            );
        }
        InstKind::GetElementPtr {
            base,
            indices,
            inbounds,
        } => {
            let base_ty = module.value(*base).ty;
            let src = module
                .types
                .pointee(base_ty)
                .map(|p| type_str(&module.types, p))
                .unwrap_or_else(|| "<bad>".to_string());
            let _ = write!(
                out,
                "getelementptr{} {}, {}",
                if *inbounds { " inbounds" } else { "" },
                src,
                namer.typed_ref(module, *base)
            );
            for &idx in indices {
                let _ = write!(out, ", {}", namer.typed_ref(module, idx));
            }
        }
        InstKind::Call { callee, args } => {
            let callee_fn = module.function(*callee);
            let _ = write!(
                out,
                "call {} @{}(",
                type_str(&module.types, data.ty),
                callee_fn.name
            );
            for (i, &arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&namer.typed_ref(module, arg));
            }
            out.push(')');
        }
        InstKind::Ret { value } => match value {
            None => out.push_str("ret void"),
            Some(v) => {
                let _ = write!(out, "ret {}", namer.typed_ref(module, *v));
            }
        },
        InstKind::Br { dest } => {
            let _ = write!(out, "br label {}", namer.block_ref(*dest));
        }
        InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } => {
            let _ = write!(
                out,
                "br {}, label {}, label {}",
                namer.typed_ref(module, *cond),
                namer.block_ref(*then_dest),
                namer.block_ref(*else_dest)
            );
        }
        InstKind::BinOp { op, lhs, rhs } => {
            let _ = write!(
                out,
                "{} {}, {}",
                op.mnemonic(),
                namer.typed_ref(module, *lhs),
                namer.value_ref(module, *rhs)
            );
        }
        InstKind::Icmp { pred, lhs, rhs } => {
            let _ = write!(
                out,
                "icmp {} {}, {}",
                pred.mnemonic(),
                namer.typed_ref(module, *lhs),
                namer.value_ref(module, *rhs)
            );
        }
    }
    out.push('\n');
}

fn print_function(module: &Module, id: FunctionId, out: &mut String) {
    let func = module.function(id);
    let types = &module.types;
    let (ret, param_tys, varargs) = match types.fn_parts(func.ty) {
        Some(parts) => parts,
        None => return,
    };
    let param_tys = param_tys.to_vec();

    if func.is_declaration() {
        out.push_str("declare");
        if let Some(word) = func.linkage.keyword() {
            out.push(' ');
            out.push_str(word);
        }
        write_attr_words(out, func.attrs.ret_attrs.iter().map(|a| a.keyword()));
        let _ = write!(out, " {} @{}(", type_str(types, ret), func.name);
        for (i, &p) in param_tys.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&type_str(types, p));
            if let Some(attrs) = func.attrs.param_attrs.get(i) {
                write_attr_words(out, attrs.iter().map(|a| a.keyword()));
            }
        }
        if varargs {
            if !param_tys.is_empty() {
                out.push_str(", ");
            }
            out.push_str("...");
        }
        out.push_str(")\n");
        return;
    }

    let namer = Namer::for_function(module, func);

    out.push_str("define");
    if let Some(word) = func.linkage.keyword() {
        out.push(' ');
        out.push_str(word);
    }
    write_attr_words(out, func.attrs.ret_attrs.iter().map(|a| a.keyword()));
    let _ = write!(out, " {} @{}(", type_str(types, ret), func.name);
    for (i, &arg) in func.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&type_str(types, module.value(arg).ty));
        if let Some(attrs) = func.attrs.param_attrs.get(i) {
            write_attr_words(out, attrs.iter().map(|a| a.keyword()));
        }
        let _ = write!(out, " {}", namer.value_ref(module, arg));
    }
    if varargs {
        if !func.params.is_empty() {
            out.push_str(", ");
        }
        out.push_str("...");
    }
    out.push(')');
    if func.address_space != 0 {
        let _ = write!(out, " addrspace({})", func.address_space);
    }
    write_attr_words(out, func.attrs.fn_attrs.iter().map(|a| a.keyword()));
    if let Some(comdat) = &func.comdat {
        let _ = write!(out, " comdat(${})", comdat);
    }
    for (kind, payload) in &func.metadata {
        let _ = write!(out, " !{} !\"{}\"", kind, payload);
    }
    out.push_str(" {\n");

    for (i, &bb) in func.blocks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let label = namer
            .block_names
            .get(&bb)
            .cloned()
            .unwrap_or_else(|| bb.to_string());
        let _ = write!(out, "{}:\n", label);
        for &inst in &module.block(bb).insts {
            print_inst(module, &namer, inst, out);
        }
    }
    out.push_str("}\n");
}

impl Module {
    /// Serialize one function (or declaration) to text.
    pub fn function_to_string(&self, id: FunctionId) -> String {
        let mut out = String::new();
        print_function(self, id, &mut out);
        out
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;

        let structs: Vec<TypeId> = self.types.named_structs().collect();
        if !structs.is_empty() {
            writeln!(f)?;
            for t in structs {
                let name = self.types.struct_name(t).unwrap_or("<anon>");
                let fields = self.types.struct_fields(t).unwrap_or(&[]);
                let body: Vec<String> = fields
                    .iter()
                    .map(|&ft| type_str(&self.types, ft))
                    .collect();
                writeln!(f, "%{} = type {{ {} }}", name, body.join(", "))?;
            }
        }

        for id in self.function_ids() {
            if !self.contains_function(id) {
                continue;
            }
            writeln!(f)?;
            f.write_str(&self.function_to_string(id))?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
