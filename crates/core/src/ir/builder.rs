//! Positional instruction builder.
//!
//! Wraps one function and a current block; every emit method appends to that
//! block and returns the defined register. Terminator methods seal the block.

use super::{
    BasicBlock, BinOp, BlockId, Callee, Const, Function, IcmpPred, Inst, Operand, Ordering,
    Terminator, Ty, Value,
};

pub struct Builder<'f> {
    func: &'f mut Function,
    block: BlockId,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function, block: BlockId) -> Self {
        Self { func, block }
    }

    /// Move the insertion point to another block.
    pub fn set_block(&mut self, block: BlockId) {
        self.block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.block
    }

    pub fn func(&mut self) -> &mut Function {
        self.func
    }

    fn cur(&mut self) -> &mut BasicBlock {
        self.func.block_mut(self.block)
    }

    fn push(&mut self, inst: Inst) {
        self.cur().insts.push(inst);
    }

    pub fn alloca(&mut self, ty: Ty, name: &str) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Alloca {
            dest,
            ty,
            name: name.to_string(),
        });
        dest
    }

    pub fn load(&mut self, ty: Ty, ptr: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Load { dest, ty, ptr });
        dest
    }

    pub fn store(&mut self, val: Operand, ptr: Operand) {
        self.push(Inst::Store {
            val,
            ptr,
            volatile: false,
        });
    }

    pub fn store_volatile(&mut self, val: Operand, ptr: Operand) {
        self.push(Inst::Store {
            val,
            ptr,
            volatile: true,
        });
    }

    pub fn bin(&mut self, op: BinOp, ty: Ty, lhs: Operand, rhs: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Bin {
            dest,
            op,
            ty,
            lhs,
            rhs,
        });
        dest
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: Operand, rhs: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Icmp { dest, pred, lhs, rhs });
        dest
    }

    pub fn select(&mut self, ty: Ty, cond: Operand, on_true: Operand, on_false: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Select {
            dest,
            ty,
            cond,
            on_true,
            on_false,
        });
        dest
    }

    pub fn cast(&mut self, to: Ty, src: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Cast { dest, to, src });
        dest
    }

    pub fn gep(&mut self, elem: Ty, base: Operand, index: Operand) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Gep {
            dest,
            elem,
            base,
            index,
        });
        dest
    }

    /// A phi with its incoming list; use [`Builder::phi_add_incoming`] for
    /// edges that do not exist yet.
    pub fn phi(&mut self, ty: Ty, incoming: Vec<(Operand, BlockId)>) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Phi { dest, ty, incoming });
        dest
    }

    /// Append an incoming edge to a previously created phi.
    pub fn phi_add_incoming(&mut self, block: BlockId, phi: Value, val: Operand, pred: BlockId) {
        for inst in &mut self.func.block_mut(block).insts {
            if let Inst::Phi { dest, incoming, .. } = inst {
                if *dest == phi {
                    incoming.push((val, pred));
                    return;
                }
            }
        }
        panic!("phi {phi:?} not found in block {block:?}");
    }

    pub fn call(&mut self, ret: Ty, callee: Callee, args: Vec<Operand>) -> Option<Value> {
        let dest = if ret == Ty::Void {
            None
        } else {
            Some(self.func.fresh_value())
        };
        self.push(Inst::Call {
            dest,
            ret,
            callee,
            args,
        });
        dest
    }

    pub fn call_direct(&mut self, ret: Ty, name: &str, args: Vec<Operand>) -> Option<Value> {
        self.call(ret, Callee::Direct(name.to_string()), args)
    }

    pub fn cmpxchg(
        &mut self,
        ptr: Operand,
        expected: Operand,
        desired: Operand,
        ordering: Ordering,
    ) -> Value {
        let dest = self.func.fresh_value();
        self.push(Inst::Cmpxchg {
            dest,
            ptr,
            expected,
            desired,
            ordering,
        });
        dest
    }

    pub fn br(&mut self, target: BlockId) {
        self.cur().term = Some(Terminator::Br { target });
    }

    pub fn cond_br(&mut self, cond: Operand, on_true: BlockId, on_false: BlockId) {
        self.cur().term = Some(Terminator::CondBr {
            cond,
            on_true,
            on_false,
        });
    }

    pub fn switch(&mut self, value: Operand, default: BlockId, cases: Vec<(u64, BlockId)>) {
        self.cur().term = Some(Terminator::Switch {
            value,
            default,
            cases,
        });
    }

    pub fn ret(&mut self, value: Operand) {
        self.cur().term = Some(Terminator::Ret { value: Some(value) });
    }

    pub fn ret_void(&mut self) {
        self.cur().term = Some(Terminator::Ret { value: None });
    }

    pub fn unreachable(&mut self) {
        self.cur().term = Some(Terminator::Unreachable);
    }

    /// Shorthand for an i32 constant operand.
    pub fn i32(&self, v: u32) -> Operand {
        Operand::Const(Const::i32(v))
    }

    /// Shorthand for an i8 constant operand.
    pub fn i8(&self, v: u8) -> Operand {
        Operand::Const(Const::i8(v))
    }
}
