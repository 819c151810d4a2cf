use crate::fixtures;
use chakravyuha_core::interp::{run, Val};
use chakravyuha_core::seed::Seed;
use chakravyuha_core::verify_module;
use chakravyuha_transform::pass::{run_named, PipelineConfig};

/// One module holding everything the scenarios exercise: a trivial identity,
/// a branch, a switch, a chain, and a printed string literal.
fn composite_module() -> chakravyuha_core::Module {
    let mut m = fixtures::hello_module("TEAM_CHAKRAVYUHA");
    m.add_function(fixtures::id_function());
    m.add_function(fixtures::abs_function());
    m.add_function(fixtures::chain_function("through", 5));
    m
}

fn assert_composite_behavior(m: &chakravyuha_core::Module) {
    for x in [-2, 0, 7, i32::MAX] {
        let (ret, _) = run(m, "id", &[Val::i32(x)]).unwrap();
        assert_eq!(ret.as_i64(), Some(x as i64), "id({x})");
    }
    for (x, want) in [(-5, 5), (0, 0), (9, 9)] {
        let (ret, _) = run(m, "abs", &[Val::i32(x)]).unwrap();
        assert_eq!(ret.as_i64(), Some(want), "abs({x})");
    }
    for x in [1, 12345] {
        let (ret, _) = run(m, "through", &[Val::i32(x)]).unwrap();
        assert_eq!(ret.as_i64(), Some(x as i64));
    }
    let (_, output) = run(m, "main", &[]).unwrap();
    assert_eq!(output, "TEAM_CHAKRAVYUHA\n");
}

#[test]
fn chakravyuha_all_preserves_every_behavior() {
    fixtures::init_tracing();
    let mut m = composite_module();
    let (_, report) = run_named(&mut m, "chakravyuha-all", &PipelineConfig::default()).unwrap();
    verify_module(&m).unwrap();
    assert_composite_behavior(&m);

    assert_eq!(
        report.passes_run,
        vec!["StringEncrypt", "ControlFlowFlattening", "FakeCodeInsertion"]
    );
    assert_eq!(report.strings_encrypted, 1);
    assert!(report.flattened_functions >= 2, "abs, main and the stubs");
    assert!(report.original_ir_size > 0);
    assert!(report.enable_string_encryption);
    assert!(report.enable_control_flow_flattening);
    assert!(report.enable_fake_code_insertion);
    assert!(!m.to_string().contains("TEAM_CHAKRAVYUHA"));
}

#[test]
fn pass_order_permutations_all_preserve_behavior() {
    let orders: [[&str; 3]; 3] = [
        [
            "chakravyuha-string-encrypt",
            "chakravyuha-control-flow-flatten",
            "chakravyuha-fake-code-insertion",
        ],
        [
            "chakravyuha-fake-code-insertion",
            "chakravyuha-string-encrypt",
            "chakravyuha-control-flow-flatten",
        ],
        [
            "chakravyuha-control-flow-flatten",
            "chakravyuha-fake-code-insertion",
            "chakravyuha-string-encrypt",
        ],
    ];
    for order in orders {
        let mut m = composite_module();
        for name in order {
            run_named(&mut m, name, &PipelineConfig::default()).unwrap();
            verify_module(&m).unwrap();
        }
        assert_composite_behavior(&m);
    }
}

#[test]
fn each_pass_alone_preserves_behavior() {
    for name in [
        "chakravyuha-string-encrypt",
        "chakravyuha-control-flow-flatten",
        "chakravyuha-fake-code-insertion",
    ] {
        let mut m = composite_module();
        run_named(&mut m, name, &PipelineConfig::default()).unwrap();
        verify_module(&m).unwrap();
        assert_composite_behavior(&m);
    }
}

#[test]
fn pinned_seed_reproduces_the_module_byte_for_byte() {
    let seed = Seed::from_hex(
        "0xc0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ff",
    )
    .unwrap();
    let mut a = composite_module();
    let mut b = composite_module();
    run_named(&mut a, "chakravyuha-all", &PipelineConfig::with_seed(seed.clone())).unwrap();
    run_named(&mut b, "chakravyuha-all", &PipelineConfig::with_seed(seed)).unwrap();
    assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn obfuscation_increases_cfg_complexity() {
    let mut m = composite_module();
    let before = chakravyuha_analysis::collect_metrics(&m);
    run_named(&mut m, "chakravyuha-all", &PipelineConfig::default()).unwrap();
    let after = chakravyuha_analysis::collect_metrics(&m);
    assert!(after.block_cnt > before.block_cnt);
    assert!(after.edge_cnt > before.edge_cnt);
    assert!(after.potency > before.potency);
}

#[test]
fn report_pass_alone_emits_without_mutating() {
    let mut m = composite_module();
    let before = m.to_string();
    let (preserved, _) =
        run_named(&mut m, "chakravyuha-emit-report", &PipelineConfig::default()).unwrap();
    assert_eq!(preserved, chakravyuha_transform::PreservedAnalyses::All);
    assert_eq!(m.to_string(), before);
}
