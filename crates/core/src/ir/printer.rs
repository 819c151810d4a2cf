//! Textual form of a module.
//!
//! The output is LLVM-flavoured and stable; the report measures its byte size
//! and tests grep it for leaked plaintext. It is not meant to be re-parsed.

use super::{
    BasicBlock, BinOp, BlockId, Callee, Const, FnAttr, Function, Global, GlobalInit, IcmpPred,
    Inst, Linkage, Module, Operand, Ordering, Terminator, Ty, UnsupportedKind,
};
use std::fmt::{self, Display, Formatter, Write as _};

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::I1 => write!(f, "i1"),
            Ty::I8 => write!(f, "i8"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::Ptr => write!(f, "ptr"),
            Ty::Array(elem, n) => write!(f, "[{n} x {elem}]"),
        }
    }
}

fn linkage_str(l: Linkage) -> &'static str {
    match l {
        Linkage::External => "",
        Linkage::Internal => "internal ",
        Linkage::Private => "private ",
        Linkage::AvailableExternally => "available_externally ",
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{b:02X}");
        }
    }
    out
}

fn operand_str(op: &Operand) -> String {
    match op {
        Operand::Value(v) => format!("%v{}", v.0),
        Operand::Arg(i) => format!("%arg{i}"),
        Operand::Const(c) => match c {
            Const::Int { ty: Ty::I1, value } => {
                if *value == 0 { "false" } else { "true" }.to_string()
            }
            Const::Int { value, .. } => format!("{value}"),
            Const::Global(name) => format!("@{name}"),
            Const::Func(name) => format!("@{name}"),
            Const::Null => "null".to_string(),
            Const::Undef(_) => "undef".to_string(),
        },
    }
}

fn label(func: &Function, id: BlockId) -> String {
    format!("%{}.{}", func.block(id).name, id.0)
}

fn bin_op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::URem => "urem",
    }
}

fn pred_str(pred: IcmpPred) -> &'static str {
    match pred {
        IcmpPred::Eq => "eq",
        IcmpPred::Ne => "ne",
        IcmpPred::Slt => "slt",
        IcmpPred::Sle => "sle",
        IcmpPred::Sgt => "sgt",
        IcmpPred::Sge => "sge",
        IcmpPred::Ult => "ult",
    }
}

fn ordering_str(o: Ordering) -> &'static str {
    match o {
        Ordering::Monotonic => "monotonic",
        Ordering::Acquire => "acquire",
        Ordering::Release => "release",
        Ordering::SeqCst => "seq_cst",
    }
}

fn write_inst(f: &mut Formatter<'_>, func: &Function, inst: &Inst) -> fmt::Result {
    write!(f, "  ")?;
    match inst {
        Inst::Alloca { dest, ty, name } => {
            write!(f, "%v{} = alloca {ty}", dest.0)?;
            if !name.is_empty() {
                write!(f, " ; {name}")?;
            }
            Ok(())
        }
        Inst::Load { dest, ty, ptr } => {
            write!(f, "%v{} = load {ty}, {}", dest.0, operand_str(ptr))
        }
        Inst::Store { val, ptr, volatile } => {
            let v = if *volatile { "volatile " } else { "" };
            write!(f, "store {v}{}, {}", operand_str(val), operand_str(ptr))
        }
        Inst::Bin {
            dest, op, ty, lhs, rhs,
        } => write!(
            f,
            "%v{} = {} {ty} {}, {}",
            dest.0,
            bin_op_str(*op),
            operand_str(lhs),
            operand_str(rhs)
        ),
        Inst::Icmp { dest, pred, lhs, rhs } => write!(
            f,
            "%v{} = icmp {} {}, {}",
            dest.0,
            pred_str(*pred),
            operand_str(lhs),
            operand_str(rhs)
        ),
        Inst::Select {
            dest,
            ty,
            cond,
            on_true,
            on_false,
        } => write!(
            f,
            "%v{} = select {ty} {}, {}, {}",
            dest.0,
            operand_str(cond),
            operand_str(on_true),
            operand_str(on_false)
        ),
        Inst::Cast { dest, to, src } => {
            write!(f, "%v{} = cast {} to {to}", dest.0, operand_str(src))
        }
        Inst::Gep {
            dest, elem, base, index,
        } => write!(
            f,
            "%v{} = getelementptr {elem}, {}, {}",
            dest.0,
            operand_str(base),
            operand_str(index)
        ),
        Inst::Phi { dest, ty, incoming } => {
            write!(f, "%v{} = phi {ty} ", dest.0)?;
            for (i, (op, pred)) in incoming.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[ {}, {} ]", operand_str(op), label(func, *pred))?;
            }
            Ok(())
        }
        Inst::Call {
            dest, ret, callee, args,
        } => {
            if let Some(d) = dest {
                write!(f, "%v{} = ", d.0)?;
            }
            match callee {
                Callee::Direct(name) => write!(f, "call {ret} @{name}(")?,
                Callee::Indirect(ptr) => write!(f, "call {ret} {}(", operand_str(ptr))?,
                Callee::Asm(template) => write!(f, "call {ret} asm \"{template}\"(")?,
            }
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", operand_str(a))?;
            }
            write!(f, ")")
        }
        Inst::Cmpxchg {
            dest,
            ptr,
            expected,
            desired,
            ordering,
        } => write!(
            f,
            "%v{} = cmpxchg {}, {}, {} {}",
            dest.0,
            operand_str(ptr),
            operand_str(expected),
            operand_str(desired),
            ordering_str(*ordering)
        ),
    }
}

fn write_term(f: &mut Formatter<'_>, func: &Function, term: &Terminator) -> fmt::Result {
    write!(f, "  ")?;
    match term {
        Terminator::Br { target } => write!(f, "br label {}", label(func, *target)),
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
        } => write!(
            f,
            "br i1 {}, label {}, label {}",
            operand_str(cond),
            label(func, *on_true),
            label(func, *on_false)
        ),
        Terminator::Switch {
            value,
            default,
            cases,
        } => {
            write!(
                f,
                "switch {}, label {} [",
                operand_str(value),
                label(func, *default)
            )?;
            for (val, target) in cases {
                write!(f, " {val}, label {}", label(func, *target))?;
            }
            write!(f, " ]")
        }
        Terminator::Ret { value: Some(v) } => write!(f, "ret {}", operand_str(v)),
        Terminator::Ret { value: None } => write!(f, "ret void"),
        Terminator::Unreachable => write!(f, "unreachable"),
        Terminator::Unsupported { kind, .. } => {
            let k = match kind {
                UnsupportedKind::Invoke => "invoke",
                UnsupportedKind::IndirectBr => "indirectbr",
                UnsupportedKind::CallBr => "callbr",
            };
            write!(f, "{k} ...")
        }
    }
}

fn write_block(f: &mut Formatter<'_>, func: &Function, id: BlockId, block: &BasicBlock) -> fmt::Result {
    writeln!(f, "{}.{}:", block.name, id.0)?;
    for inst in &block.insts {
        write_inst(f, func, inst)?;
        writeln!(f)?;
    }
    if let Some(term) = &block.term {
        write_term(f, func, term)?;
        writeln!(f)?;
    }
    Ok(())
}

impl Display for Global {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = if self.is_constant { "constant" } else { "global" };
        write!(f, "@{} = {}{kind} {}", self.name, linkage_str(self.linkage), self.ty)?;
        match &self.init {
            GlobalInit::Zero => write!(f, " zeroinitializer")?,
            GlobalInit::Bytes(bytes) => write!(f, " c\"{}\"", escape_bytes(bytes))?,
            GlobalInit::Int { value, .. } => write!(f, " {value}")?,
            GlobalInit::FuncAddr(name) => write!(f, " @{name}")?,
        }
        if let Some(align) = self.align {
            write!(f, ", align {align}")?;
        }
        Ok(())
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} %arg{i}", p.ty))
            .collect();
        if self.is_declaration {
            return writeln!(f, "declare {} @{}({})", self.ret, self.name, params.join(", "));
        }
        write!(
            f,
            "define {}{} @{}({})",
            linkage_str(self.linkage),
            self.ret,
            self.name,
            params.join(", ")
        )?;
        for attr in &self.attrs {
            match attr {
                FnAttr::NoInline => write!(f, " noinline")?,
                FnAttr::OptimizeNone => write!(f, " optnone")?,
            }
        }
        writeln!(f, " {{")?;
        for id in self.block_ids() {
            write_block(f, self, id, self.block(id))?;
        }
        writeln!(f, "}}")
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;
        writeln!(f, "target triple = \"{}\"", self.target_triple)?;
        writeln!(f)?;
        for g in &self.globals {
            writeln!(f, "{g}")?;
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for func in &self.functions {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}
