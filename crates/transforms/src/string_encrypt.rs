//! String encryption.
//!
//! Every constant NUL-terminated byte-array global is replaced by a
//! ciphertext global plus a pair of dispatch stubs behind a function-pointer
//! global. The first caller claims the pointer with a compare-and-swap,
//! decrypts the buffer in place, and flips the pointer to a stub that just
//! returns the (now plaintext) buffer, so later calls pay one indirect call.
//! Each string independently draws one of four cipher schemes and its own key
//! material, and the stored key is itself obfuscated per scheme.

use crate::safety::SafetyOracle;
use crate::{PassContext, Result, Transform};
use chakravyuha_core::{
    is_string_global, BinOp, Builder, Callee, Const, FnAttr, Function, Global, GlobalInit,
    IcmpPred, Inst, Linkage, Module, Operand, Ordering, Ty, Value,
};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, RngCore};
use tracing::debug;

const KEY_LENGTH: usize = 16;
const SBOX_SIZE: usize = 256;

const METHOD: &str = "Fully Polymorphic On-Demand Decryption via Self-Modifying Pointers \
                      and Data-in-Code Stubs";

/// Per-string cipher choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    XorWithIndex,
    AddWithIndex,
    SubFromConstant,
    SBox,
}

impl Scheme {
    fn pick(rng: &mut StdRng) -> Scheme {
        match rng.random_range(0..4) {
            0 => Scheme::XorWithIndex,
            1 => Scheme::AddWithIndex,
            2 => Scheme::SubFromConstant,
            _ => Scheme::SBox,
        }
    }
}

/// XOR the plaintext against a repeating key. Its own inverse.
pub fn encrypt_with_xor(plain: &[u8], key: &[u8]) -> Vec<u8> {
    plain
        .iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % KEY_LENGTH])
        .collect()
}

/// Add a repeating key byte-wise; decryption subtracts.
pub fn encrypt_with_add(plain: &[u8], key: &[u8]) -> Vec<u8> {
    plain
        .iter()
        .enumerate()
        .map(|(i, &b)| b.wrapping_add(key[i % KEY_LENGTH]))
        .collect()
}

/// Substitute every byte through a permutation of 0..=255.
pub fn encrypt_with_sbox(plain: &[u8], sbox: &[u8; SBOX_SIZE]) -> Vec<u8> {
    plain.iter().map(|&b| sbox[b as usize]).collect()
}

/// A random byte permutation and its inverse.
pub fn generate_sbox(rng: &mut StdRng) -> ([u8; SBOX_SIZE], [u8; SBOX_SIZE]) {
    let mut sbox = [0u8; SBOX_SIZE];
    for (i, slot) in sbox.iter_mut().enumerate() {
        *slot = i as u8;
    }
    sbox.shuffle(rng);
    let mut inv = [0u8; SBOX_SIZE];
    for (i, &mapped) in sbox.iter().enumerate() {
        inv[mapped as usize] = i as u8;
    }
    (sbox, inv)
}

/// The form the key takes inside the binary. The stub undoes this at entry.
pub fn obfuscate_key(scheme: Scheme, key: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    let mut out = [0u8; KEY_LENGTH];
    for (i, &k) in key.iter().enumerate() {
        out[i] = match scheme {
            Scheme::XorWithIndex => k ^ i as u8,
            Scheme::AddWithIndex => k.wrapping_add(i as u8),
            Scheme::SubFromConstant => 0xFF - k,
            Scheme::SBox => unreachable!("sbox carries no key"),
        };
    }
    out
}

pub struct StringEncryption;

impl Transform for StringEncryption {
    fn name(&self) -> &'static str {
        "StringEncrypt"
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        cx.report.enable_string_encryption = true;
        cx.report.passes_run.push("StringEncrypt".to_string());

        let candidates: Vec<String> = module
            .globals
            .iter()
            .filter(|g| is_string_global(g))
            // Inverse S-Box tables from an earlier run are constant byte
            // arrays too; re-encrypting one would corrupt its decryptor.
            .filter(|g| !g.name.starts_with("inv_sbox_"))
            .map(|g| g.name.clone())
            .collect();
        if candidates.is_empty() {
            cx.report.string_method = METHOD.to_string();
            return Ok(false);
        }

        let oracle = SafetyOracle::for_module(module);
        let mut changed = false;
        let mut string_id = module
            .globals
            .iter()
            .filter(|g| g.name.starts_with("dispatch_ptr_"))
            .count();

        for name in candidates {
            let Some(global) = module.global(&name) else {
                continue;
            };
            let GlobalInit::Bytes(plain) = global.init.clone() else {
                continue;
            };
            if plain.is_empty() {
                continue;
            }
            let linkage = global.linkage;
            let align = global.align;

            let users = module.functions_using_global(&name);
            if users.iter().any(|u| oracle.is_unsafe(u)) {
                debug!("strenc: '{name}' used from unsafe function, left in plaintext");
                continue;
            }

            cx.report.strings_encrypted += 1;
            cx.report.original_ir_string_data_size += plain.len() as u64;

            let scheme = Scheme::pick(&mut cx.rng);
            let decrypt_name = format!("chakravyuha_decrypt_{string_id}");
            let cipher = match scheme {
                Scheme::SBox => {
                    let (sbox, inv) = generate_sbox(&mut cx.rng);
                    let inv_name = format!("inv_sbox_{string_id}");
                    module.add_global(Global {
                        name: inv_name.clone(),
                        ty: Ty::i8_array(SBOX_SIZE),
                        is_constant: true,
                        linkage: Linkage::Private,
                        align: None,
                        init: GlobalInit::Bytes(inv.to_vec()),
                    });
                    module.add_function(build_decrypt_stub(
                        &decrypt_name,
                        scheme,
                        None,
                        Some(&inv_name),
                    ));
                    encrypt_with_sbox(&plain, &sbox)
                }
                _ => {
                    let mut key = [0u8; KEY_LENGTH];
                    cx.rng.fill_bytes(&mut key);
                    let obfuscated = obfuscate_key(scheme, &key);
                    module.add_function(build_decrypt_stub(
                        &decrypt_name,
                        scheme,
                        Some(&obfuscated),
                        None,
                    ));
                    match scheme {
                        Scheme::AddWithIndex => encrypt_with_add(&plain, &key),
                        _ => encrypt_with_xor(&plain, &key),
                    }
                }
            };
            cx.report.obfuscated_ir_string_data_size += cipher.len() as u64;

            // In-place decryption mutates the buffer, so the ciphertext
            // global must not be constant.
            let enc_name = format!("{name}.enc");
            let cipher_len = cipher.len();
            module.add_global(Global {
                name: enc_name.clone(),
                ty: Ty::i8_array(cipher_len),
                is_constant: false,
                linkage,
                align,
                init: GlobalInit::Bytes(cipher),
            });

            let ptr_name = format!("dispatch_ptr_{string_id}");
            let fast_name = format!("dispatch_fast_{string_id}");
            let slow_name = format!("dispatch_slow_{string_id}");
            module.add_global(Global {
                name: ptr_name.clone(),
                ty: Ty::Ptr,
                is_constant: false,
                linkage: Linkage::Private,
                align: None,
                init: GlobalInit::FuncAddr(slow_name.clone()),
            });
            module.add_function(build_fast_dispatch(&fast_name, &enc_name));
            module.add_function(build_slow_dispatch(
                &slow_name,
                &fast_name,
                &enc_name,
                cipher_len as u32,
                &decrypt_name,
                &ptr_name,
            ));

            rewrite_users(module, &name, &ptr_name);

            if !module.global_has_uses(&name) {
                module.erase_global(&name);
                changed = true;
            }
            string_id += 1;
        }

        cx.report.string_method = METHOD.to_string();
        Ok(changed)
    }
}

/// The per-string decryption loop: recompute the key from its obfuscated
/// form, then walk the buffer byte by byte.
fn build_decrypt_stub(
    name: &str,
    scheme: Scheme,
    obfuscated_key: Option<&[u8; KEY_LENGTH]>,
    inv_sbox: Option<&str>,
) -> Function {
    let mut f = Function::new(
        name,
        vec![
            Function::param("s", Ty::Ptr),
            Function::param("len", Ty::I32),
        ],
        Ty::Void,
    );
    f.linkage = Linkage::Private;
    f.attrs = vec![FnAttr::NoInline, FnAttr::OptimizeNone];

    let entry = f.add_block("entry");
    let header = f.add_block("loop_header");
    let body = f.add_block("loop_body");
    let exit = f.add_block("loop_exit");

    let mut b = Builder::new(&mut f, entry);
    let mut key_slot: Option<Value> = None;
    if let Some(obfuscated) = obfuscated_key {
        let slot = b.alloca(Ty::i8_array(KEY_LENGTH), "dec_key");
        for (i, &kb) in obfuscated.iter().enumerate() {
            let recovered = match scheme {
                Scheme::XorWithIndex => b.bin(BinOp::Xor, Ty::I8, b.i8(kb), b.i8(i as u8)),
                Scheme::AddWithIndex => b.bin(BinOp::Sub, Ty::I8, b.i8(kb), b.i8(i as u8)),
                Scheme::SubFromConstant => b.bin(BinOp::Sub, Ty::I8, b.i8(0xFF), b.i8(kb)),
                Scheme::SBox => unreachable!("sbox stub takes no key"),
            };
            let dst = b.gep(Ty::I8, Operand::Value(slot), b.i32(i as u32));
            b.store(Operand::Value(recovered), Operand::Value(dst));
        }
        key_slot = Some(slot);
    }
    b.br(header);

    b.set_block(header);
    let index = b.phi(Ty::I32, vec![(b.i32(0), entry)]);
    let in_range = b.icmp(IcmpPred::Slt, Operand::Value(index), Operand::Arg(1));
    b.cond_br(Operand::Value(in_range), body, exit);

    b.set_block(body);
    let src = b.gep(Ty::I8, Operand::Arg(0), Operand::Value(index));
    match scheme {
        Scheme::SBox => {
            let encrypted = b.load(Ty::I8, Operand::Value(src));
            let wide = b.cast(Ty::I64, Operand::Value(encrypted));
            let lookup = b.gep(
                Ty::I8,
                Operand::global(inv_sbox.expect("sbox stub needs its table")),
                Operand::Value(wide),
            );
            let decrypted = b.load(Ty::I8, Operand::Value(lookup));
            b.store(Operand::Value(decrypted), Operand::Value(src));
        }
        _ => {
            let key_index = b.bin(
                BinOp::URem,
                Ty::I32,
                Operand::Value(index),
                b.i32(KEY_LENGTH as u32),
            );
            let key_ptr = b.gep(
                Ty::I8,
                Operand::Value(key_slot.expect("keyed stub needs its key")),
                Operand::Value(key_index),
            );
            let key_byte = b.load(Ty::I8, Operand::Value(key_ptr));
            let loaded = b.load(Ty::I8, Operand::Value(src));
            let decrypted = match scheme {
                Scheme::AddWithIndex => b.bin(
                    BinOp::Sub,
                    Ty::I8,
                    Operand::Value(loaded),
                    Operand::Value(key_byte),
                ),
                _ => b.bin(
                    BinOp::Xor,
                    Ty::I8,
                    Operand::Value(loaded),
                    Operand::Value(key_byte),
                ),
            };
            b.store(Operand::Value(decrypted), Operand::Value(src));
        }
    }
    let next = b.bin(BinOp::Add, Ty::I32, Operand::Value(index), b.i32(1));
    b.phi_add_incoming(header, index, Operand::Value(next), body);
    b.br(header);

    b.set_block(exit);
    b.ret_void();
    f
}

/// The steady-state stub: return a pointer to the decrypted buffer.
fn build_fast_dispatch(name: &str, enc_name: &str) -> Function {
    let mut f = Function::new(name, vec![], Ty::Ptr);
    f.linkage = Linkage::Private;
    let entry = f.add_block("entry");
    let mut b = Builder::new(&mut f, entry);
    let ptr = b.gep(Ty::I8, Operand::global(enc_name), b.i32(0));
    b.ret(Operand::Value(ptr));
    f
}

/// The first-call stub. The compare-and-swap both claims the decryption and
/// publishes the fast path, so the buffer is decrypted exactly once even
/// under concurrent first callers.
fn build_slow_dispatch(
    name: &str,
    fast_name: &str,
    enc_name: &str,
    len: u32,
    decrypt_name: &str,
    ptr_name: &str,
) -> Function {
    let mut f = Function::new(name, vec![], Ty::Ptr);
    f.linkage = Linkage::Private;
    let entry = f.add_block("entry");
    let decrypt = f.add_block("decrypt");
    let done = f.add_block("done");

    let mut b = Builder::new(&mut f, entry);
    let won = b.cmpxchg(
        Operand::global(ptr_name),
        Operand::func(name),
        Operand::func(fast_name),
        Ordering::Monotonic,
    );
    b.cond_br(Operand::Value(won), decrypt, done);

    b.set_block(decrypt);
    let buf = b.gep(Ty::I8, Operand::global(enc_name), b.i32(0));
    b.call_direct(
        Ty::Void,
        decrypt_name,
        vec![Operand::Value(buf), b.i32(len)],
    );
    b.br(done);

    b.set_block(done);
    let out = b.gep(Ty::I8, Operand::global(enc_name), b.i32(0));
    b.ret(Operand::Value(out));
    f
}

/// Swap every use of the plaintext global for a call through the dispatch
/// pointer, casting the returned pointer to the shape the user expected.
fn rewrite_users(module: &mut Module, orig: &str, ptr_name: &str) {
    for f in &mut module.functions {
        for id in f.block_ids() {
            // Phi incomings are evaluated on the edge; their replacement
            // sequence belongs at the tail of the matching predecessor.
            let phi_edges: Vec<(usize, usize)> = f
                .block(id)
                .insts
                .iter()
                .enumerate()
                .filter_map(|(inst_idx, inst)| match inst {
                    Inst::Phi { incoming, .. } => {
                        let hits: Vec<usize> = incoming
                            .iter()
                            .enumerate()
                            .filter(|(_, (op, _))| op.as_global() == Some(orig))
                            .map(|(edge_idx, _)| edge_idx)
                            .collect();
                        Some(hits.into_iter().map(move |e| (inst_idx, e)))
                    }
                    _ => None,
                })
                .flatten()
                .collect();
            for (inst_idx, edge_idx) in phi_edges {
                let Inst::Phi { incoming, .. } = &f.block(id).insts[inst_idx] else {
                    continue;
                };
                let pred = incoming[edge_idx].1;
                let replacement = emit_dispatch_call(f, pred, None, ptr_name);
                if let Inst::Phi { incoming, .. } = &mut f.block_mut(id).insts[inst_idx] {
                    incoming[edge_idx].0 = Operand::Value(replacement);
                }
            }

            let mut i = 0;
            while i < f.block(id).insts.len() {
                let is_phi = matches!(f.block(id).insts[i], Inst::Phi { .. });
                let uses = !is_phi
                    && f.block(id).insts[i]
                        .operands()
                        .iter()
                        .any(|op| op.as_global() == Some(orig));
                if uses {
                    let replacement = emit_dispatch_call(f, id, Some(i), ptr_name);
                    for op in f.block_mut(id).insts[i + 3].operands_mut() {
                        if op.as_global() == Some(orig) {
                            *op = Operand::Value(replacement);
                        }
                    }
                    i += 4;
                } else {
                    i += 1;
                }
            }

            let term_uses = f
                .block(id)
                .term
                .as_ref()
                .is_some_and(|t| t.operands().iter().any(|op| op.as_global() == Some(orig)));
            if term_uses {
                let replacement = emit_dispatch_call(f, id, None, ptr_name);
                if let Some(term) = &mut f.block_mut(id).term {
                    for op in term.operands_mut() {
                        if op.as_global() == Some(orig) {
                            *op = Operand::Value(replacement);
                        }
                    }
                }
            }
        }
    }
}

/// Emit `load dispatch ptr; call through it; cast` at `at` (or the block
/// tail) and return the cast result standing in for the plaintext pointer.
fn emit_dispatch_call(
    f: &mut Function,
    block: chakravyuha_core::BlockId,
    at: Option<usize>,
    ptr_name: &str,
) -> Value {
    let fp = f.fresh_value();
    let called = f.fresh_value();
    let cast = f.fresh_value();
    let seq = [
        Inst::Load {
            dest: fp,
            ty: Ty::Ptr,
            ptr: Operand::Const(Const::Global(ptr_name.to_string())),
        },
        Inst::Call {
            dest: Some(called),
            ret: Ty::Ptr,
            callee: Callee::Indirect(Operand::Value(fp)),
            args: vec![],
        },
        Inst::Cast {
            dest: cast,
            to: Ty::Ptr,
            src: Operand::Value(called),
        },
    ];
    let insts = &mut f.block_mut(block).insts;
    let idx = at.unwrap_or(insts.len());
    for (offset, inst) in seq.into_iter().enumerate() {
        insts.insert(idx + offset, inst);
    }
    cast
}
