//! Direct evaluator over the IR.
//!
//! Single-threaded reference semantics: byte-addressed storage for globals
//! and stack slots, little-endian integer encoding, pointer cells tracked
//! out-of-band so function addresses survive load/store/cmpxchg. `puts` and
//! `putchar` externs append to a captured output buffer, which is how the
//! end-to-end tests observe side effects.

use crate::ir::{
    BinOp, BlockId, Callee, Const, Function, GlobalInit, IcmpPred, Inst, Module, Operand,
    Terminator, Ty, Value,
};
use crate::result::{Error, Result};
use std::collections::HashMap;

const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    /// Integer of `bits` width, held zero-extended.
    Int { bits: u32, v: u64 },
    /// Pointer into an object.
    Ptr { obj: ObjId, off: i64 },
    /// Address of a function.
    Func(String),
    Null,
    Undef,
}

impl Val {
    pub fn i32(v: i32) -> Val {
        Val::Int {
            bits: 32,
            v: v as u32 as u64,
        }
    }

    /// Interpret an integer value as signed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Val::Int { bits, v } => Some(sign_extend(*v, *bits)),
            _ => None,
        }
    }
}

/// Identity of a memory object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjId {
    Global(String),
    Stack(usize),
}

/// One allocation: raw bytes plus out-of-band pointer cells keyed by offset.
#[derive(Debug, Clone, Default)]
struct MemObj {
    bytes: Vec<u8>,
    ptrs: HashMap<usize, Val>,
}

fn sign_extend(v: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}

fn truncate(v: u64, bits: u32) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

/// Evaluator state for one run over a module.
pub struct Evaluator<'m> {
    module: &'m Module,
    globals: HashMap<String, MemObj>,
    stack: Vec<MemObj>,
    steps: u64,
    step_limit: u64,
    /// Captured output of `puts`/`putchar` calls.
    pub output: String,
}

impl<'m> Evaluator<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut globals = HashMap::new();
        for g in &module.globals {
            let size = g.ty.size();
            let mut obj = MemObj {
                bytes: vec![0u8; size],
                ptrs: HashMap::new(),
            };
            match &g.init {
                GlobalInit::Zero => {}
                GlobalInit::Bytes(bytes) => {
                    obj.bytes[..bytes.len()].copy_from_slice(bytes);
                }
                GlobalInit::Int { ty, value } => {
                    let n = ty.size().min(8);
                    obj.bytes[..n].copy_from_slice(&value.to_le_bytes()[..n]);
                }
                GlobalInit::FuncAddr(name) => {
                    obj.ptrs.insert(0, Val::Func(name.clone()));
                }
            }
            globals.insert(g.name.clone(), obj);
        }
        Self {
            module,
            globals,
            stack: Vec::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            output: String::new(),
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Read the bytes of a global as currently stored.
    pub fn global_bytes(&self, name: &str) -> Option<&[u8]> {
        self.globals.get(name).map(|o| o.bytes.as_slice())
    }

    /// Call a function by name.
    pub fn call(&mut self, name: &str, args: &[Val]) -> Result<Val> {
        let f = self
            .module
            .function(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        if f.is_declaration {
            return self.call_extern(name, args);
        }
        self.run_function(f, args)
    }

    fn run_function(&mut self, f: &'m Function, args: &[Val]) -> Result<Val> {
        let mut regs: HashMap<Value, Val> = HashMap::new();
        let mut cur = f.entry();
        let mut prev: Option<BlockId> = None;

        loop {
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(Error::StepLimitExceeded(self.step_limit));
            }

            let block = f.block(cur);

            // Phis are parallel copies on block entry.
            let phi_vals: Vec<(Value, Val)> = block
                .insts
                .iter()
                .take_while(|i| matches!(i, Inst::Phi { .. }))
                .map(|inst| {
                    let Inst::Phi { dest, incoming, .. } = inst else {
                        unreachable!()
                    };
                    let pred = prev.ok_or_else(|| {
                        Error::Eval(format!("phi in entry block of '{}'", f.name))
                    })?;
                    let (op, _) = incoming
                        .iter()
                        .find(|(_, p)| *p == pred)
                        .ok_or_else(|| Error::Eval("phi has no entry for predecessor".into()))?;
                    Ok((*dest, self.eval_operand(op, args, &regs)?))
                })
                .collect::<Result<_>>()?;
            for (dest, val) in phi_vals {
                regs.insert(dest, val);
            }

            for inst in block
                .insts
                .iter()
                .skip_while(|i| matches!(i, Inst::Phi { .. }))
            {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(Error::StepLimitExceeded(self.step_limit));
                }
                self.exec_inst(f, inst, args, &mut regs)?;
            }

            let term = block
                .term
                .as_ref()
                .ok_or_else(|| Error::Eval("block without terminator".into()))?;
            match term {
                Terminator::Br { target } => {
                    prev = Some(cur);
                    cur = *target;
                }
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                } => {
                    let c = self.eval_operand(cond, args, &regs)?;
                    let taken = match c {
                        Val::Int { v, .. } => v != 0,
                        _ => return Err(Error::Eval("non-integer branch condition".into())),
                    };
                    prev = Some(cur);
                    cur = if taken { *on_true } else { *on_false };
                }
                Terminator::Switch {
                    value,
                    default,
                    cases,
                } => {
                    let v = match self.eval_operand(value, args, &regs)? {
                        Val::Int { v, .. } => v,
                        _ => return Err(Error::Eval("non-integer switch value".into())),
                    };
                    prev = Some(cur);
                    cur = cases
                        .iter()
                        .find(|(c, _)| *c == v)
                        .map(|(_, b)| *b)
                        .unwrap_or(*default);
                }
                Terminator::Ret { value } => {
                    return match value {
                        Some(op) => self.eval_operand(op, args, &regs),
                        None => Ok(Val::Undef),
                    };
                }
                Terminator::Unreachable => {
                    return Err(Error::Eval(format!(
                        "executed unreachable in '{}'",
                        f.name
                    )))
                }
                Terminator::Unsupported { .. } => {
                    return Err(Error::Eval(format!(
                        "executed unsupported terminator in '{}'",
                        f.name
                    )))
                }
            }
        }
    }

    fn exec_inst(
        &mut self,
        f: &'m Function,
        inst: &Inst,
        args: &[Val],
        regs: &mut HashMap<Value, Val>,
    ) -> Result<()> {
        match inst {
            Inst::Alloca { dest, ty, .. } => {
                self.stack.push(MemObj {
                    bytes: vec![0u8; ty.size()],
                    ptrs: HashMap::new(),
                });
                regs.insert(
                    *dest,
                    Val::Ptr {
                        obj: ObjId::Stack(self.stack.len() - 1),
                        off: 0,
                    },
                );
            }
            Inst::Load { dest, ty, ptr } => {
                let p = self.eval_operand(ptr, args, regs)?;
                let val = self.load_from(&p, ty)?;
                regs.insert(*dest, val);
            }
            Inst::Store { val, ptr, .. } => {
                let v = self.eval_operand(val, args, regs)?;
                let p = self.eval_operand(ptr, args, regs)?;
                self.store_to(&p, v)?;
            }
            Inst::Bin {
                dest, op, ty, lhs, rhs,
            } => {
                let bits = ty
                    .bits()
                    .ok_or_else(|| Error::Eval("non-integer ALU type".into()))?;
                let l = self.int_operand(lhs, args, regs)?;
                let r = self.int_operand(rhs, args, regs)?;
                let raw = match op {
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::Xor => l ^ r,
                    BinOp::Shl => {
                        if r >= bits as u64 {
                            0
                        } else {
                            l << r
                        }
                    }
                    BinOp::LShr => {
                        if r >= bits as u64 {
                            0
                        } else {
                            truncate(l, bits) >> r
                        }
                    }
                    BinOp::And => l & r,
                    BinOp::Or => l | r,
                    BinOp::URem => {
                        if r == 0 {
                            return Err(Error::Eval("urem by zero".into()));
                        }
                        truncate(l, bits) % truncate(r, bits)
                    }
                };
                regs.insert(
                    *dest,
                    Val::Int {
                        bits,
                        v: truncate(raw, bits),
                    },
                );
            }
            Inst::Icmp { dest, pred, lhs, rhs } => {
                let l = self.eval_operand(lhs, args, regs)?;
                let r = self.eval_operand(rhs, args, regs)?;
                let res = match (&l, &r) {
                    (Val::Int { bits, v: lv }, Val::Int { v: rv, .. }) => {
                        let (ls, rs) = (sign_extend(*lv, *bits), sign_extend(*rv, *bits));
                        let (lu, ru) = (truncate(*lv, *bits), truncate(*rv, *bits));
                        match pred {
                            IcmpPred::Eq => lu == ru,
                            IcmpPred::Ne => lu != ru,
                            IcmpPred::Slt => ls < rs,
                            IcmpPred::Sle => ls <= rs,
                            IcmpPred::Sgt => ls > rs,
                            IcmpPred::Sge => ls >= rs,
                            IcmpPred::Ult => lu < ru,
                        }
                    }
                    _ => match pred {
                        IcmpPred::Eq => l == r,
                        IcmpPred::Ne => l != r,
                        _ => return Err(Error::Eval("ordered compare on pointers".into())),
                    },
                };
                regs.insert(
                    *dest,
                    Val::Int {
                        bits: 1,
                        v: res as u64,
                    },
                );
            }
            Inst::Select {
                dest,
                cond,
                on_true,
                on_false,
                ..
            } => {
                let c = match self.eval_operand(cond, args, regs)? {
                    Val::Int { v, .. } => v != 0,
                    _ => return Err(Error::Eval("non-integer select condition".into())),
                };
                let v = if c {
                    self.eval_operand(on_true, args, regs)?
                } else {
                    self.eval_operand(on_false, args, regs)?
                };
                regs.insert(*dest, v);
            }
            Inst::Cast { dest, to, src } => {
                let v = self.eval_operand(src, args, regs)?;
                let out = match (&v, to.bits()) {
                    (Val::Int { bits, v: raw }, Some(to_bits)) => {
                        let widened = if to_bits >= *bits {
                            truncate(*raw, *bits)
                        } else {
                            truncate(*raw, to_bits)
                        };
                        Val::Int {
                            bits: to_bits,
                            v: widened,
                        }
                    }
                    // Pointer-shaped casts pass through untouched.
                    _ => v,
                };
                regs.insert(*dest, out);
            }
            Inst::Gep {
                dest, elem, base, index,
            } => {
                let base = self.eval_operand(base, args, regs)?;
                let idx = self
                    .eval_operand(index, args, regs)?
                    .as_i64()
                    .ok_or_else(|| Error::Eval("non-integer gep index".into()))?;
                let (obj, off) = match base {
                    Val::Ptr { obj, off } => (obj, off),
                    _ => return Err(Error::Eval("gep base is not a pointer".into())),
                };
                regs.insert(
                    *dest,
                    Val::Ptr {
                        obj,
                        off: off + idx * elem.size() as i64,
                    },
                );
            }
            Inst::Phi { .. } => {
                return Err(Error::Eval("phi below non-phi instructions".into()));
            }
            Inst::Call {
                dest, callee, args: call_args, ..
            } => {
                let mut vals = Vec::with_capacity(call_args.len());
                for a in call_args {
                    vals.push(self.eval_operand(a, args, regs)?);
                }
                let ret = match callee {
                    Callee::Direct(name) => self.call(name, &vals)?,
                    Callee::Indirect(ptr) => {
                        let target = self.eval_operand(ptr, args, regs)?;
                        match target {
                            Val::Func(name) => self.call(&name, &vals)?,
                            _ => {
                                return Err(Error::Eval(
                                    "indirect call through non-function value".into(),
                                ))
                            }
                        }
                    }
                    Callee::Asm(_) => {
                        return Err(Error::Eval(format!(
                            "inline assembly reached at runtime in '{}'",
                            f.name
                        )))
                    }
                };
                if let Some(d) = dest {
                    regs.insert(*d, ret);
                }
            }
            Inst::Cmpxchg {
                dest,
                ptr,
                expected,
                desired,
                ..
            } => {
                let p = self.eval_operand(ptr, args, regs)?;
                let exp = self.eval_operand(expected, args, regs)?;
                let des = self.eval_operand(desired, args, regs)?;
                let current = self.load_from(&p, &Ty::Ptr)?;
                let swapped = current == exp;
                if swapped {
                    self.store_to(&p, des)?;
                }
                regs.insert(
                    *dest,
                    Val::Int {
                        bits: 1,
                        v: swapped as u64,
                    },
                );
            }
        }
        Ok(())
    }

    fn eval_operand(
        &self,
        op: &Operand,
        args: &[Val],
        regs: &HashMap<Value, Val>,
    ) -> Result<Val> {
        Ok(match op {
            Operand::Value(v) => regs
                .get(v)
                .cloned()
                .ok_or_else(|| Error::Eval(format!("read of unset register %v{}", v.0)))?,
            Operand::Arg(i) => args
                .get(*i)
                .cloned()
                .ok_or_else(|| Error::Eval(format!("missing argument {i}")))?,
            Operand::Const(c) => match c {
                Const::Int { ty, value } => Val::Int {
                    bits: ty.bits().unwrap_or(64),
                    v: *value,
                },
                Const::Global(name) => Val::Ptr {
                    obj: ObjId::Global(name.clone()),
                    off: 0,
                },
                Const::Func(name) => Val::Func(name.clone()),
                Const::Null => Val::Null,
                Const::Undef(_) => Val::Undef,
            },
        })
    }

    fn int_operand(
        &self,
        op: &Operand,
        args: &[Val],
        regs: &HashMap<Value, Val>,
    ) -> Result<u64> {
        match self.eval_operand(op, args, regs)? {
            Val::Int { v, .. } => Ok(v),
            other => Err(Error::Eval(format!("expected integer, got {other:?}"))),
        }
    }

    fn object(&mut self, obj: &ObjId) -> Result<&mut MemObj> {
        match obj {
            ObjId::Global(name) => self
                .globals
                .get_mut(name)
                .ok_or_else(|| Error::UnknownGlobal(name.clone())),
            ObjId::Stack(i) => self
                .stack
                .get_mut(*i)
                .ok_or_else(|| Error::Eval("dangling stack pointer".into())),
        }
    }

    fn load_from(&mut self, ptr: &Val, ty: &Ty) -> Result<Val> {
        let (obj, off) = match ptr {
            Val::Ptr { obj, off } => (obj.clone(), *off),
            _ => return Err(Error::Eval("load through non-pointer".into())),
        };
        let mem = self.object(&obj)?;
        if *ty == Ty::Ptr {
            return Ok(mem
                .ptrs
                .get(&(off as usize))
                .cloned()
                .unwrap_or(Val::Null));
        }
        let bits = ty
            .bits()
            .ok_or_else(|| Error::Eval("load of aggregate type".into()))?;
        let size = ty.size();
        let off = off as usize;
        if off + size > mem.bytes.len() {
            return Err(Error::Eval("out-of-bounds load".into()));
        }
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(&mem.bytes[off..off + size]);
        Ok(Val::Int {
            bits,
            v: truncate(u64::from_le_bytes(raw), bits),
        })
    }

    fn store_to(&mut self, ptr: &Val, val: Val) -> Result<()> {
        let (obj, off) = match ptr {
            Val::Ptr { obj, off } => (obj.clone(), *off as usize),
            _ => return Err(Error::Eval("store through non-pointer".into())),
        };
        let mem = self.object(&obj)?;
        match val {
            Val::Int { bits, v } => {
                let size = (bits as usize).div_ceil(8);
                if off + size > mem.bytes.len() {
                    return Err(Error::Eval("out-of-bounds store".into()));
                }
                mem.bytes[off..off + size].copy_from_slice(&v.to_le_bytes()[..size]);
                mem.ptrs.remove(&off);
            }
            v @ (Val::Ptr { .. } | Val::Func(_) | Val::Null) => {
                mem.ptrs.insert(off, v);
            }
            Val::Undef => {
                mem.ptrs.remove(&off);
            }
        }
        Ok(())
    }

    fn call_extern(&mut self, name: &str, args: &[Val]) -> Result<Val> {
        match name {
            "puts" => {
                let s = self.read_c_string(args.first())?;
                self.output.push_str(&s);
                self.output.push('\n');
                Ok(Val::i32(0))
            }
            "putchar" => {
                let c = args
                    .first()
                    .and_then(Val::as_i64)
                    .ok_or_else(|| Error::Eval("putchar without integer argument".into()))?;
                self.output.push((c as u8) as char);
                Ok(Val::i32(c as i32))
            }
            // setjmp/longjmp never execute in transformed code paths the
            // tests drive; modelling them is out of scope.
            other => Err(Error::Eval(format!("call to unknown extern '{other}'"))),
        }
    }

    fn read_c_string(&mut self, ptr: Option<&Val>) -> Result<String> {
        let Some(Val::Ptr { obj, off }) = ptr else {
            return Err(Error::Eval("expected a string pointer".into()));
        };
        let obj = obj.clone();
        let start = *off as usize;
        let mem = self.object(&obj)?;
        let end = mem.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .ok_or_else(|| Error::Eval("unterminated string".into()))?;
        Ok(String::from_utf8_lossy(&mem.bytes[start..end]).into_owned())
    }
}

/// Run `function` in a fresh evaluator. Returns the result and the captured
/// output stream.
pub fn run(module: &Module, function: &str, args: &[Val]) -> Result<(Val, String)> {
    let mut eval = Evaluator::new(module);
    let ret = eval.call(function, args)?;
    Ok((ret, eval.output))
}
