//! Structural well-formedness checks.
//!
//! Malformed input is a fatal error surfaced to the host before any pass
//! runs; the passes themselves assume these invariants and re-establish them.

use super::{Const, Function, Inst, Module, Operand};
use crate::result::{Error, Result};
use std::collections::HashSet;

/// Verify the whole module. Returns the first violation found.
pub fn verify_module(module: &Module) -> Result<()> {
    let mut names = HashSet::new();
    for g in &module.globals {
        if !names.insert(g.name.as_str()) {
            return Err(Error::DuplicateSymbol(g.name.clone()));
        }
    }
    let mut fn_names = HashSet::new();
    for f in &module.functions {
        if !fn_names.insert(f.name.as_str()) {
            return Err(Error::DuplicateSymbol(f.name.clone()));
        }
    }

    for f in &module.functions {
        verify_function(module, f)?;
    }
    Ok(())
}

fn verify_function(module: &Module, f: &Function) -> Result<()> {
    if f.is_declaration {
        if f.block_count() != 0 {
            return Err(Error::Malformed(format!(
                "declaration '{}' has a body",
                f.name
            )));
        }
        return Ok(());
    }
    if f.block_count() == 0 {
        return Err(Error::Malformed(format!(
            "definition '{}' has no blocks",
            f.name
        )));
    }

    // Every defined register is defined exactly once.
    let mut defs: HashSet<_> = HashSet::new();
    for id in f.block_ids() {
        for inst in &f.block(id).insts {
            if let Some(dest) = inst.dest() {
                if !defs.insert(dest) {
                    return Err(Error::Malformed(format!(
                        "'{}' defines %v{} twice",
                        f.name, dest.0
                    )));
                }
            }
        }
    }

    for id in f.block_ids() {
        let block = f.block(id);
        let term = block.term.as_ref().ok_or_else(|| {
            Error::Malformed(format!(
                "block '{}.{}' in '{}' has no terminator",
                block.name, id.0, f.name
            ))
        })?;

        for succ in term.successors() {
            if !f.has_block(succ) {
                return Err(Error::UnknownBlock {
                    function: f.name.clone(),
                    block: succ.0,
                });
            }
        }

        // Phis lead the block and match the predecessor set.
        let preds: HashSet<_> = f.predecessors(id).into_iter().collect();
        let first_non_phi = block.first_insertion_idx();
        for (idx, inst) in block.insts.iter().enumerate() {
            if let Inst::Phi { incoming, dest, .. } = inst {
                if idx >= first_non_phi {
                    return Err(Error::Malformed(format!(
                        "'{}' has a phi %v{} below non-phi instructions",
                        f.name, dest.0
                    )));
                }
                let incoming_preds: HashSet<_> = incoming.iter().map(|(_, p)| *p).collect();
                if incoming_preds != preds {
                    return Err(Error::Malformed(format!(
                        "phi %v{} in '{}' does not cover its predecessors",
                        dest.0, f.name
                    )));
                }
            }
        }

        let check_op = |op: &Operand| -> Result<()> {
            match op {
                Operand::Value(v) => {
                    if !defs.contains(v) {
                        return Err(Error::Malformed(format!(
                            "'{}' uses undefined %v{}",
                            f.name, v.0
                        )));
                    }
                }
                Operand::Arg(i) => {
                    if *i >= f.params.len() {
                        return Err(Error::Malformed(format!(
                            "'{}' references argument {i} of {}",
                            f.name,
                            f.params.len()
                        )));
                    }
                }
                Operand::Const(Const::Global(name)) => {
                    if module.global(name).is_none() {
                        return Err(Error::UnknownGlobal(name.clone()));
                    }
                }
                Operand::Const(Const::Func(name)) => {
                    if module.function(name).is_none() {
                        return Err(Error::UnknownFunction(name.clone()));
                    }
                }
                Operand::Const(_) => {}
            }
            Ok(())
        };

        for inst in &block.insts {
            for op in inst.operands() {
                check_op(op)?;
            }
            if let Inst::Call {
                callee: super::Callee::Direct(name),
                ..
            } = inst
            {
                if module.function(name).is_none() {
                    return Err(Error::UnknownFunction(name.clone()));
                }
            }
        }
        for op in term.operands() {
            check_op(op)?;
        }
    }
    Ok(())
}
