use crate::fixtures;
use chakravyuha_core::interp::{run, Val};
use chakravyuha_core::verify_module;

#[test]
fn fixtures_are_well_formed() {
    for module in [
        fixtures::id_module(),
        fixtures::abs_module(),
        fixtures::switch_module(),
        fixtures::hello_module("TEAM_CHAKRAVYUHA"),
        fixtures::inline_asm_module(),
        fixtures::setjmp_module(),
    ] {
        verify_module(&module).expect("fixture must verify");
    }
}

#[test]
fn fixtures_behave_as_specified_before_any_pass() {
    let m = fixtures::abs_module();
    for (x, want) in [(-5, 5), (0, 0), (9, 9)] {
        let (ret, _) = run(&m, "abs", &[Val::i32(x)]).unwrap();
        assert_eq!(ret.as_i64(), Some(want));
    }

    let m = fixtures::switch_module();
    for (x, want) in [(1, 100), (2, 200), (3, 300), (4, 500), (5, 500), (42, -1)] {
        let (ret, _) = run(&m, "pick", &[Val::i32(x)]).unwrap();
        assert_eq!(ret.as_i64(), Some(want));
    }

    let m = fixtures::hello_module("TEAM_CHAKRAVYUHA");
    let (_, output) = run(&m, "main", &[]).unwrap();
    assert_eq!(output, "TEAM_CHAKRAVYUHA\n");
}

#[test]
fn printed_module_carries_plaintext_before_encryption() {
    let m = fixtures::hello_module("TEAM_CHAKRAVYUHA");
    assert!(m.to_string().contains("TEAM_CHAKRAVYUHA"));
}
