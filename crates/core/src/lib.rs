//! Core IR and supporting machinery for the Chakravyuha obfuscator.
//!
//! The [`ir`] module is the typed SSA representation the passes rewrite;
//! [`interp`] evaluates it, [`seed`] drives deterministic randomness, and
//! [`ir::verify`] rejects malformed input before any pass touches it.

pub mod interp;
pub mod ir;
pub mod result;
pub mod seed;

pub use ir::{
    is_string_global, verify_module, BasicBlock, BinOp, BlockId, Builder, Callee, Const, FnAttr,
    Function, Global, GlobalInit, IcmpPred, Inst, Linkage, Module, Operand, Ordering, Param,
    Terminator, Ty, UnsupportedKind, Value,
};
pub use result::{Error, Result};
