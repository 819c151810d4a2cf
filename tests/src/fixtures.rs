//! Shared module fixtures, built the way a C front end would emit them.

use chakravyuha_core::{
    BinOp, Builder, Callee, Function, Global, IcmpPred, Module, Operand, Ty,
};

pub const TRIPLE: &str = "x86_64-unknown-linux-gnu";

/// Debug logging for a test run; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .try_init();
}

/// `int id(int x) { return x; }`, a single-block function.
pub fn id_module() -> Module {
    let mut m = Module::new("id.c", TRIPLE);
    m.add_function(id_function());
    m
}

pub fn id_function() -> Function {
    let mut f = Function::new("id", vec![Function::param("x", Ty::I32)], Ty::I32);
    let entry = f.add_block("entry");
    Builder::new(&mut f, entry).ret(Operand::Arg(0));
    f
}

/// `int abs(int x) { return x < 0 ? -x : x; }` with a phi merge.
pub fn abs_module() -> Module {
    let mut m = Module::new("abs.c", TRIPLE);
    m.add_function(abs_function());
    m
}

pub fn abs_function() -> Function {
    let mut f = Function::new("abs", vec![Function::param("x", Ty::I32)], Ty::I32);
    let entry = f.add_block("entry");
    let neg = f.add_block("neg");
    let done = f.add_block("done");

    let mut b = Builder::new(&mut f, entry);
    let is_neg = b.icmp(IcmpPred::Slt, Operand::Arg(0), b.i32(0));
    b.cond_br(Operand::Value(is_neg), neg, done);

    b.set_block(neg);
    let negated = b.bin(BinOp::Sub, Ty::I32, b.i32(0), Operand::Arg(0));
    b.br(done);

    b.set_block(done);
    let merged = b.phi(
        Ty::I32,
        vec![(Operand::Arg(0), entry), (Operand::Value(negated), neg)],
    );
    b.ret(Operand::Value(merged));
    f
}

/// A switch returning 100/200/300 for 1/2/3, 500 for 4 and 5 (the C source
/// had a 4→5 fallthrough), -1 otherwise.
pub fn switch_module() -> Module {
    let mut m = Module::new("switch.c", TRIPLE);
    let mut f = Function::new("pick", vec![Function::param("x", Ty::I32)], Ty::I32);
    let entry = f.add_block("entry");
    let c1 = f.add_block("case1");
    let c2 = f.add_block("case2");
    let c3 = f.add_block("case3");
    let c45 = f.add_block("case45");
    let def = f.add_block("default");

    let mut b = Builder::new(&mut f, entry);
    b.switch(
        Operand::Arg(0),
        def,
        vec![(1, c1), (2, c2), (3, c3), (4, c45), (5, c45)],
    );
    for (block, val) in [(c1, 100u32), (c2, 200), (c3, 300), (c45, 500)] {
        b.set_block(block);
        b.ret(b.i32(val));
    }
    b.set_block(def);
    b.ret(b.i32(-1i32 as u32));
    m.add_function(f);
    m
}

/// A straight-line chain of `len` blocks that passes its argument through.
/// Every block but the last is a splittable single-successor edge.
pub fn chain_function(name: &str, len: usize) -> Function {
    let mut f = Function::new(name, vec![Function::param("x", Ty::I32)], Ty::I32);
    let blocks: Vec<_> = (0..len).map(|i| f.add_block(&format!("step{i}"))).collect();
    let mut b = Builder::new(&mut f, blocks[0]);
    for window in blocks.windows(2) {
        b.set_block(window[0]);
        b.br(window[1]);
    }
    b.set_block(*blocks.last().unwrap());
    b.ret(Operand::Arg(0));
    f
}

pub fn chain_module(len: usize) -> Module {
    let mut m = Module::new("chain.c", TRIPLE);
    m.add_function(chain_function("through", len));
    m
}

/// A module whose `main` passes a string literal to `puts`.
pub fn hello_module(text: &str) -> Module {
    let mut m = Module::new("hello.c", TRIPLE);
    m.add_global(Global::string(".str", text));
    m.add_function(Function::declaration(
        "puts",
        vec![Function::param("s", Ty::Ptr)],
        Ty::I32,
    ));

    let mut f = Function::new("main", vec![], Ty::I32);
    let entry = f.add_block("entry");
    let tail = f.add_block("tail");
    let mut b = Builder::new(&mut f, entry);
    b.call_direct(Ty::I32, "puts", vec![Operand::global(".str")]);
    b.br(tail);
    b.set_block(tail);
    b.ret(b.i32(0));
    m.add_function(f);
    m
}

/// A function with inline assembly that reads a local string global, plus an
/// innocent sibling. Mirrors hand-written interrupt glue.
pub fn inline_asm_module() -> Module {
    let mut m = Module::new("asm.c", TRIPLE);
    m.add_global(Global::string(".asm_str", "ASM_LOCAL"));

    let mut f = Function::new("port_io", vec![], Ty::Void);
    let entry = f.add_block("entry");
    let out = f.add_block("out");
    let mut b = Builder::new(&mut f, entry);
    b.call(
        Ty::Void,
        Callee::Asm("outb %al, $0x80".into()),
        vec![Operand::global(".asm_str")],
    );
    b.br(out);
    b.set_block(out);
    b.ret_void();
    m.add_function(f);

    m.add_function(abs_function());
    m
}

/// `checkpoint` calls `setjmp`; `caller` calls `checkpoint` and is the only
/// user of a string literal. The taint must reach `caller` transitively.
pub fn setjmp_module() -> Module {
    let mut m = Module::new("sj.c", TRIPLE);
    m.add_global(Global::string(".sj_str", "SETJMP_PATH"));
    m.add_function(Function::declaration(
        "setjmp",
        vec![Function::param("env", Ty::Ptr)],
        Ty::I32,
    ));
    m.add_function(Function::declaration(
        "puts",
        vec![Function::param("s", Ty::Ptr)],
        Ty::I32,
    ));

    let mut f = Function::new("checkpoint", vec![], Ty::I32);
    let entry = f.add_block("entry");
    let out = f.add_block("out");
    let mut b = Builder::new(&mut f, entry);
    let env = b.alloca(Ty::i8_array(200), "env");
    let r = b
        .call_direct(Ty::I32, "setjmp", vec![Operand::Value(env)])
        .unwrap();
    b.br(out);
    b.set_block(out);
    b.ret(Operand::Value(r));
    m.add_function(f);

    let mut f = Function::new("caller", vec![], Ty::I32);
    let entry = f.add_block("entry");
    let out = f.add_block("out");
    let mut b = Builder::new(&mut f, entry);
    let r = b.call_direct(Ty::I32, "checkpoint", vec![]).unwrap();
    b.call_direct(Ty::I32, "puts", vec![Operand::global(".sj_str")]);
    b.br(out);
    b.set_block(out);
    b.ret(Operand::Value(r));
    m.add_function(f);
    m
}
