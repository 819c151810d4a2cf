//! Control-flow flattening.
//!
//! Rewrites a function's CFG into a switch-dispatched state machine: the
//! entry block computes an initial state, every original non-entry block ends
//! by storing its successor's state id and jumping back to a central
//! dispatcher, and the dispatcher switches on the state to pick the next
//! block. Edge structure disappears from the static CFG; only the state
//! writes carry it.

mod demote;

pub use demote::demote_values_to_memory;

use crate::safety::{has_unsupported_control_flow, SafetyOracle};
use crate::{PassContext, Result, Transform};
use chakravyuha_core::{
    BlockId, Const, Function, IcmpPred, Inst, Module, Operand, Terminator, Ty,
};
use std::collections::HashMap;
use tracing::debug;

pub struct ControlFlowFlattening;

impl Transform for ControlFlowFlattening {
    fn name(&self) -> &'static str {
        "ControlFlowFlattening"
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        cx.report.enable_control_flow_flattening = true;
        cx.report.passes_run.push("ControlFlowFlattening".to_string());

        let oracle = SafetyOracle::for_module(module);
        let mut changed = false;
        let mut flattened_functions = 0u32;
        let mut flattened_blocks = 0u32;
        let mut skipped_functions = 0u32;

        for f in &mut module.functions {
            if f.is_declaration || f.is_intrinsic {
                continue;
            }
            if f.block_count() < 2 {
                continue;
            }
            if !oracle.may_transform(f) || has_unsupported_control_flow(f) {
                debug!("flatten: skipping '{}'", f.name);
                skipped_functions += 1;
                continue;
            }

            let blocks_before = f.block_count() as u32;
            if flatten_function(f) {
                changed = true;
                flattened_functions += 1;
                flattened_blocks += blocks_before - 1;
            } else {
                debug!("flatten: abandoned '{}' untouched", f.name);
                skipped_functions += 1;
            }
        }

        cx.report.flattened_functions += flattened_functions;
        cx.report.flattened_blocks += flattened_blocks;
        cx.report.skipped_functions += skipped_functions;

        if changed || skipped_functions > 0 {
            eprintln!(
                "CFF_METRICS:{{\"flattenedFunctions\":{flattened_functions},\"flattenedBlocks\":{flattened_blocks},\"skippedFunctions\":{skippedFunctions}}}",
                skippedFunctions = skipped_functions
            );
        }
        Ok(changed)
    }
}

/// Flatten one function. All-or-nothing: work happens on a scratch copy that
/// only replaces the original once every terminator has been rewritten.
pub fn flatten_function(f: &mut Function) -> bool {
    let mut work = f.clone();
    if !flatten_in_place(&mut work) {
        return false;
    }
    *f = work;
    true
}

fn flatten_in_place(f: &mut Function) -> bool {
    demote_values_to_memory(f);

    let entry = f.entry();
    let targets: Vec<BlockId> = f
        .block_ids()
        .into_iter()
        .filter(|&b| b != entry)
        .collect();
    if targets.is_empty() {
        return false;
    }

    // Non-zero ids, densely assigned in layout order.
    let ids: HashMap<BlockId, u32> = targets
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i as u32 + 1))
        .collect();

    let state = f.fresh_value();
    let idx = f.block(entry).first_insertion_idx();
    f.block_mut(entry).insts.insert(
        idx,
        Inst::Alloca {
            dest: state,
            ty: Ty::I32,
            name: "cff.state".to_string(),
        },
    );

    let dispatcher = f.add_block("cff.dispatch");
    let default_block = f.add_block("cff.default");
    f.block_mut(default_block).term = Some(Terminator::Unreachable);

    // The entry terminator becomes the state initializer.
    let Some(entry_term) = f.block(entry).term.clone() else {
        return false;
    };
    let Some(init) = build_next_state(f, entry, &entry_term, &ids) else {
        return false;
    };
    f.block_mut(entry).insts.push(Inst::Store {
        val: init,
        ptr: Operand::Value(state),
        volatile: false,
    });
    f.block_mut(entry).term = Some(Terminator::Br { target: dispatcher });

    // Dispatcher: load the state, switch to the matching block. The default
    // arm is unreachable because the state is only ever written from `ids`.
    let current = f.fresh_value();
    f.block_mut(dispatcher).insts.push(Inst::Load {
        dest: current,
        ty: Ty::I32,
        ptr: Operand::Value(state),
    });
    let cases: Vec<(u64, BlockId)> = targets.iter().map(|&b| (ids[&b] as u64, b)).collect();
    f.block_mut(dispatcher).term = Some(Terminator::Switch {
        value: Operand::Value(current),
        default: default_block,
        cases,
    });

    // Every dispatched block now hands control back through the state slot.
    for &b in &targets {
        let Some(term) = f.block(b).term.clone() else {
            return false;
        };
        if matches!(term, Terminator::Ret { .. } | Terminator::Unreachable) {
            continue;
        }
        let Some(next) = build_next_state(f, b, &term, &ids) else {
            return false;
        };
        f.block_mut(b).insts.push(Inst::Store {
            val: next,
            ptr: Operand::Value(state),
            volatile: false,
        });
        f.block_mut(b).term = Some(Terminator::Br { target: dispatcher });
    }

    f.remove_unreachable_blocks();
    true
}

/// Compute the next-state operand for a terminator, appending any needed
/// select/icmp instructions to `block`. `None` means a successor had no id
/// and the flattening of this function must be abandoned.
fn build_next_state(
    f: &mut Function,
    block: BlockId,
    term: &Terminator,
    ids: &HashMap<BlockId, u32>,
) -> Option<Operand> {
    match term {
        Terminator::Br { target } => {
            let id = *ids.get(target)?;
            Some(Operand::Const(Const::i32(id)))
        }
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
        } => {
            let t = *ids.get(on_true)?;
            let e = *ids.get(on_false)?;
            let sel = f.fresh_value();
            f.block_mut(block).insts.push(Inst::Select {
                dest: sel,
                ty: Ty::I32,
                cond: cond.clone(),
                on_true: Operand::Const(Const::i32(t)),
                on_false: Operand::Const(Const::i32(e)),
            });
            Some(Operand::Value(sel))
        }
        Terminator::Switch {
            value,
            default,
            cases,
        } => {
            // Fold the case list into a select cascade, default first.
            let mut acc = Operand::Const(Const::i32(*ids.get(default)?));
            for (case_value, target) in cases {
                let id = *ids.get(target)?;
                let is_case = f.fresh_value();
                f.block_mut(block).insts.push(Inst::Icmp {
                    dest: is_case,
                    pred: IcmpPred::Eq,
                    lhs: value.clone(),
                    rhs: Operand::Const(Const::i64(*case_value)),
                });
                let sel = f.fresh_value();
                f.block_mut(block).insts.push(Inst::Select {
                    dest: sel,
                    ty: Ty::I32,
                    cond: Operand::Value(is_case),
                    on_true: Operand::Const(Const::i32(id)),
                    on_false: acc,
                });
                acc = Operand::Value(sel);
            }
            Some(acc)
        }
        Terminator::Ret { .. } | Terminator::Unreachable | Terminator::Unsupported { .. } => None,
    }
}
