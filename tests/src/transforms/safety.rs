use crate::fixtures;
use chakravyuha_core::interp::{run, Val};
use chakravyuha_transform::pass::{run_named, PipelineConfig};

#[test]
fn inline_asm_function_is_skipped_but_siblings_flatten() {
    let mut m = fixtures::inline_asm_module();
    let before = m.function("port_io").unwrap().clone();

    let (_, report) =
        run_named(&mut m, "chakravyuha-control-flow-flatten", &PipelineConfig::default()).unwrap();
    assert_eq!(report.skipped_functions, 1, "port_io must be skipped");
    assert_eq!(report.flattened_functions, 1, "abs must still flatten");
    assert_eq!(m.function("port_io").unwrap(), &before, "skip means untouched");

    let (ret, _) = run(&m, "abs", &[Val::i32(-3)]).unwrap();
    assert_eq!(ret.as_i64(), Some(3));
}

#[test]
fn inline_asm_keeps_its_string_in_plaintext() {
    let mut m = fixtures::inline_asm_module();
    let (_, report) =
        run_named(&mut m, "chakravyuha-string-encrypt", &PipelineConfig::default()).unwrap();
    assert_eq!(report.strings_encrypted, 0);
    assert!(m.global(".asm_str").is_some());
    assert!(m.to_string().contains("ASM_LOCAL"));
}

#[test]
fn setjmp_taints_callers_transitively() {
    let mut m = fixtures::setjmp_module();
    let checkpoint_before = m.function("checkpoint").unwrap().clone();
    let caller_before = m.function("caller").unwrap().clone();

    // Neither function may be flattened; both count as skipped.
    let (_, report) =
        run_named(&mut m, "chakravyuha-control-flow-flatten", &PipelineConfig::default()).unwrap();
    assert_eq!(report.flattened_functions, 0);
    assert_eq!(report.skipped_functions, 2);
    assert_eq!(m.function("checkpoint").unwrap(), &checkpoint_before);
    assert_eq!(m.function("caller").unwrap(), &caller_before);

    // The string used only from the tainted caller stays plaintext.
    let (_, report) =
        run_named(&mut m, "chakravyuha-string-encrypt", &PipelineConfig::default()).unwrap();
    assert_eq!(report.strings_encrypted, 0);
    assert!(m.to_string().contains("SETJMP_PATH"));

    // Fake code also keeps its hands off.
    run_named(&mut m, "chakravyuha-fake-code-insertion", &PipelineConfig::default()).unwrap();
    assert_eq!(m.function("checkpoint").unwrap(), &checkpoint_before);
    assert_eq!(m.function("caller").unwrap(), &caller_before);
}
