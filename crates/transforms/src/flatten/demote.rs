//! SSA-to-memory demotion.
//!
//! Flattening reshuffles the CFG so thoroughly that keeping dominance intact
//! for SSA registers is hopeless. Before touching any edge we therefore move
//! every value that crosses a block boundary into a stack slot: phis become
//! slot stores at each incoming edge plus one reload where the phi stood, and
//! any remaining register used outside its defining block is spilled right
//! after its definition and reloaded in front of each remote user. Afterwards
//! every non-entry block is self-contained.

use chakravyuha_core::{BlockId, Function, Inst, Operand, Ty, Value};

/// Demote phis first, then cross-block scalars. Leaves no phi behind.
pub fn demote_values_to_memory(f: &mut Function) {
    demote_phis(f);
    demote_cross_block_values(f);
}

fn demote_phis(f: &mut Function) {
    loop {
        let Some((block, idx)) = find_first_phi(f) else {
            break;
        };
        let Inst::Phi { dest, ty, incoming } = f.block_mut(block).insts.remove(idx) else {
            unreachable!()
        };

        let slot = new_entry_slot(f, ty.clone(), "phi.slot");

        // The incoming value is stored where the edge decides: at the tail of
        // each predecessor.
        for (op, pred) in incoming {
            f.block_mut(pred).insts.push(Inst::Store {
                val: op,
                ptr: Operand::Value(slot),
                volatile: false,
            });
        }

        // One reload where the phi stood. The slot was written by whichever
        // predecessor just ran, so this load carries exactly the merged value;
        // remote users of it are picked up by the scalar demotion below.
        let reload = f.fresh_value();
        let insert_at = f.block(block).first_insertion_idx();
        f.block_mut(block).insts.insert(
            insert_at,
            Inst::Load {
                dest: reload,
                ty,
                ptr: Operand::Value(slot),
            },
        );
        f.replace_value_uses(dest, &Operand::Value(reload));
    }
}

fn find_first_phi(f: &Function) -> Option<(BlockId, usize)> {
    for id in f.block_ids() {
        for (idx, inst) in f.block(id).insts.iter().enumerate() {
            if matches!(inst, Inst::Phi { .. }) {
                return Some((id, idx));
            }
        }
    }
    None
}

fn demote_cross_block_values(f: &mut Function) {
    // Allocas stay: they live in the entry block, which keeps dominating
    // everything after flattening.
    let candidates: Vec<(BlockId, Value, Ty)> = f
        .block_ids()
        .iter()
        .flat_map(|&id| {
            f.block(id)
                .insts
                .iter()
                .filter(|inst| !matches!(inst, Inst::Alloca { .. }))
                .filter_map(|inst| Some((id, inst.dest()?, inst.dest_ty()?)))
                .collect::<Vec<_>>()
        })
        .filter(|&(id, v, _)| used_outside(f, id, v))
        .collect();

    for (def_block, value, ty) in candidates {
        let slot = new_entry_slot(f, ty.clone(), "spill.slot");

        // Spill immediately after the definition.
        let def_idx = f
            .block(def_block)
            .insts
            .iter()
            .position(|i| i.dest() == Some(value))
            .expect("definition vanished during demotion");
        f.block_mut(def_block).insts.insert(
            def_idx + 1,
            Inst::Store {
                val: Operand::Value(value),
                ptr: Operand::Value(slot),
                volatile: false,
            },
        );

        // Reload in front of every remote user.
        for user_block in f.block_ids() {
            if user_block == def_block {
                continue;
            }
            let mut i = 0;
            while i < f.block(user_block).insts.len() {
                if uses_value(&f.block(user_block).insts[i], value) {
                    let reload = f.fresh_value();
                    f.block_mut(user_block).insts.insert(
                        i,
                        Inst::Load {
                            dest: reload,
                            ty: ty.clone(),
                            ptr: Operand::Value(slot),
                        },
                    );
                    rewrite_inst(&mut f.block_mut(user_block).insts[i + 1], value, reload);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            let term_uses = f
                .block(user_block)
                .term
                .as_ref()
                .is_some_and(|t| t.operands().iter().any(|op| **op == Operand::Value(value)));
            if term_uses {
                let reload = f.fresh_value();
                f.block_mut(user_block).insts.push(Inst::Load {
                    dest: reload,
                    ty: ty.clone(),
                    ptr: Operand::Value(slot),
                });
                if let Some(term) = &mut f.block_mut(user_block).term {
                    for op in term.operands_mut() {
                        if *op == Operand::Value(value) {
                            *op = Operand::Value(reload);
                        }
                    }
                }
            }
        }
    }
}

fn new_entry_slot(f: &mut Function, ty: Ty, name: &str) -> Value {
    let slot = f.fresh_value();
    let entry = f.entry();
    let idx = f.block(entry).first_insertion_idx();
    f.block_mut(entry).insts.insert(
        idx,
        Inst::Alloca {
            dest: slot,
            ty,
            name: name.to_string(),
        },
    );
    slot
}

fn used_outside(f: &Function, def_block: BlockId, value: Value) -> bool {
    f.block_ids().iter().any(|&id| {
        if id == def_block {
            return false;
        }
        let block = f.block(id);
        block
            .insts
            .iter()
            .any(|inst| uses_value(inst, value))
            || block
                .term
                .as_ref()
                .is_some_and(|t| t.operands().iter().any(|op| **op == Operand::Value(value)))
    })
}

fn uses_value(inst: &Inst, value: Value) -> bool {
    inst.operands().iter().any(|op| **op == Operand::Value(value))
}

fn rewrite_inst(inst: &mut Inst, from: Value, to: Value) {
    for op in inst.operands_mut() {
        if *op == Operand::Value(from) {
            *op = Operand::Value(to);
        }
    }
}
