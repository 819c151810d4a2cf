//! Pass registry and pipeline.
//!
//! Maps the literal pass names the host uses onto pass sequences and runs
//! them over one module. Each pass gets its own deterministic RNG stream
//! derived from the pipeline seed and a shared report aggregator; after a
//! pass mutates the module the pipeline logs its potency delta.

use crate::fake_code::FakeCodeInsertion;
use crate::flatten::ControlFlowFlattening;
use crate::string_encrypt::StringEncryption;
use crate::{Error, PassContext, PreservedAnalyses, Result, Transform};
use chakravyuha_analysis::report::ReportData;
use chakravyuha_analysis::{collect_metrics, compare};
use chakravyuha_core::seed::Seed;
use chakravyuha_core::{verify_module, Module};
use tracing::info;

/// Records the printed IR size before any mutation, so the final report can
/// state the growth.
pub struct InitialIrMetrics;

impl Transform for InitialIrMetrics {
    fn name(&self) -> &'static str {
        "InitialIRMetrics"
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        cx.report.original_ir_size = module.ir_size();
        Ok(false)
    }
}

/// Serializes the accumulated report to stderr. Always the last pass.
pub struct EmitReport;

impl Transform for EmitReport {
    fn name(&self) -> &'static str {
        "EmitReport"
    }

    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool> {
        cx.report.emit(module);
        Ok(false)
    }
}

/// Configuration for one pipeline run over a module.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Seed for every random decision; fresh entropy unless pinned.
    pub seed: Seed,
    /// Input file name for the report; defaults from the module.
    pub input_file: Option<String>,
    /// Output file name recorded in the report.
    pub output_file: String,
    pub obfuscation_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: Seed::generate(),
            input_file: None,
            output_file: "obfuscated.ll".to_string(),
            obfuscation_level: "medium".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Pin the seed, making the whole pipeline reproducible.
    pub fn with_seed(seed: Seed) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }
}

/// Resolve a host-visible pass name to the sequence it stands for.
pub fn passes_for(name: &str) -> Result<Vec<Box<dyn Transform>>> {
    match name {
        "chakravyuha-string-encrypt" => Ok(vec![Box::new(StringEncryption)]),
        "chakravyuha-control-flow-flatten" => Ok(vec![Box::new(ControlFlowFlattening)]),
        "chakravyuha-fake-code-insertion" => Ok(vec![Box::new(FakeCodeInsertion)]),
        "chakravyuha-initial-metrics" => Ok(vec![Box::new(InitialIrMetrics)]),
        "chakravyuha-emit-report" => Ok(vec![Box::new(EmitReport)]),
        "chakravyuha-all" => Ok(vec![
            Box::new(InitialIrMetrics),
            Box::new(StringEncryption),
            Box::new(ControlFlowFlattening),
            Box::new(FakeCodeInsertion),
            Box::new(EmitReport),
        ]),
        other => Err(Error::UnknownPass(other.to_string())),
    }
}

/// Run a pass sequence over one module. Malformed input is fatal and leaves
/// the module untouched; per-function trouble inside a pass only skips that
/// function.
pub fn run_passes(
    module: &mut Module,
    passes: &[Box<dyn Transform>],
    config: &PipelineConfig,
) -> Result<(PreservedAnalyses, ReportData)> {
    verify_module(module)?;

    let mut report = ReportData {
        input_file: config.input_file.clone().unwrap_or_default(),
        output_file: config.output_file.clone(),
        obfuscation_level: config.obfuscation_level.clone(),
        ..Default::default()
    };

    let mut preserved = PreservedAnalyses::All;
    for pass in passes {
        let before = collect_metrics(module);
        let mut cx = PassContext {
            rng: config.seed.create_labeled_rng(pass.name()),
            report: &mut report,
        };
        let mutated = pass.apply(module, &mut cx)?;
        if mutated {
            preserved = PreservedAnalyses::None;
            let after = collect_metrics(module);
            info!("{:>14} Δ{:+.2}", pass.name(), compare(&before, &after));
        }
    }
    Ok((preserved, report))
}

/// Run the pass sequence registered under `name`.
pub fn run_named(
    module: &mut Module,
    name: &str,
    config: &PipelineConfig,
) -> Result<(PreservedAnalyses, ReportData)> {
    run_passes(module, &passes_for(name)?, config)
}
