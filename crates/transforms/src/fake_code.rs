//! Fake code insertion.
//!
//! Splits single-successor edges with a branch on a literal false condition
//! whose taken arm leads into a freshly synthesized junk block. The junk is
//! plain 32-bit arithmetic over a growing operand pool, ended by a volatile
//! store into a per-function sink slot so the block survives trivial
//! dead-store elimination.

use crate::safety::SafetyOracle;
use crate::{PassContext, Result, Transform};
use chakravyuha_core::{
    BinOp, BlockId, Const, Function, Inst, Linkage, Module, Operand, Terminator, Ty, Value,
};
use rand::{rngs::StdRng, Rng};
use tracing::debug;

const MAX_FAKE_BLOCKS_PER_FUNCTION: u32 = 15;
const MAX_FAKE_INSTRUCTIONS_PER_BLOCK: u32 = 30;

const JUNK_OPS: [BinOp; 5] = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Xor, BinOp::Shl];

pub struct FakeCodeInsertion;

impl Transform for FakeCodeInsertion {
    fn name(&self) -> &'static str {
        "FakeCodeInsertion"
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        cx.report.enable_fake_code_insertion = true;
        cx.report.passes_run.push("FakeCodeInsertion".to_string());

        let oracle = SafetyOracle::for_module(module);
        let mut changed = false;
        for f in &mut module.functions {
            if f.is_declaration
                || f.linkage == Linkage::AvailableExternally
                || f.block_count() == 0
                || !oracle.may_transform(f)
            {
                continue;
            }
            let inserted = add_fake_code(f, &mut cx.rng, cx.report.fake_code_blocks_inserted);
            if inserted > 0 {
                cx.report.fake_code_blocks_inserted += inserted;
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Insert up to [`MAX_FAKE_BLOCKS_PER_FUNCTION`] junk blocks. Returns how
/// many were inserted; `block_counter` seeds the fake block names so they
/// stay unique module-wide.
fn add_fake_code(f: &mut Function, rng: &mut StdRng, block_counter: u32) -> u32 {
    // Splittable predecessors: a lone successor whose head is not a phi,
    // since splitting a phi edge would force incoming-list surgery.
    let mut eligible: Vec<BlockId> = f
        .block_ids()
        .into_iter()
        .filter(|&id| {
            single_successor(f, id)
                .is_some_and(|succ| !matches!(f.block(succ).insts.first(), Some(Inst::Phi { .. })))
        })
        .collect();
    if eligible.is_empty() {
        return 0;
    }

    let sink = {
        let slot = f.fresh_value();
        let entry = f.entry();
        let idx = f.block(entry).first_insertion_idx();
        f.block_mut(entry).insts.insert(
            idx,
            Inst::Alloca {
                dest: slot,
                ty: Ty::I32,
                name: "fake.sink".to_string(),
            },
        );
        slot
    };

    let planned = rng.random_range(1..=MAX_FAKE_BLOCKS_PER_FUNCTION);
    let mut inserted = 0u32;
    for _ in 0..planned {
        if eligible.is_empty() {
            break;
        }
        let pick = rng.random_range(0..eligible.len());
        let parent = eligible.swap_remove(pick);
        let Some(successor) = single_successor(f, parent) else {
            continue;
        };

        let fake = f.insert_block_before(
            successor,
            &format!("fake.block.{}", block_counter + inserted),
        );
        populate_with_junk(f, fake, successor, sink, rng);

        // Literal false: the fake block sits on the never-taken arm.
        f.block_mut(parent).term = Some(Terminator::CondBr {
            cond: Operand::Const(Const::bool(false)),
            on_true: fake,
            on_false: successor,
        });
        inserted += 1;
    }

    if inserted > 0 {
        debug!("fake-code: inserted {inserted} junk block(s) into '{}'", f.name);
    }
    inserted
}

fn single_successor(f: &Function, id: BlockId) -> Option<BlockId> {
    match f.block(id).term.as_ref()? {
        Terminator::Br { target } => Some(*target),
        Terminator::Switch { default, cases, .. } if cases.is_empty() => Some(*default),
        _ => None,
    }
}

/// Fill `block` with junk arithmetic and terminate it into `successor`.
fn populate_with_junk(
    f: &mut Function,
    block: BlockId,
    successor: BlockId,
    sink: Value,
    rng: &mut StdRng,
) {
    let count = rng.random_range(2..=MAX_FAKE_INSTRUCTIONS_PER_BLOCK);
    let mut pool: Vec<Operand> = vec![Operand::Const(Const::i32(42))];
    let mut last: Option<Value> = None;

    for _ in 0..count {
        let lhs = pool[rng.random_range(0..pool.len())].clone();
        let rhs = pool[rng.random_range(0..pool.len())].clone();
        pool.push(Operand::Const(Const::i32(rng.random::<u32>())));

        let op = JUNK_OPS[rng.random_range(0..JUNK_OPS.len())];
        let dest = f.fresh_value();
        f.block_mut(block).insts.push(Inst::Bin {
            dest,
            op,
            ty: Ty::I32,
            lhs,
            rhs,
        });
        pool.push(Operand::Value(dest));
        last = Some(dest);
    }

    if let Some(result) = last {
        f.block_mut(block).insts.push(Inst::Store {
            val: Operand::Value(result),
            ptr: Operand::Value(sink),
            volatile: true,
        });
    }
    f.block_mut(block).term = Some(Terminator::Br { target: successor });
}
