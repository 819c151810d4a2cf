//! The obfuscation report.
//!
//! [`ReportData`] is the aggregator each pass appends counters to; it is
//! owned by the pipeline and handed to passes through their context, never a
//! process-wide singleton. The emit pass finalizes defaults from the module
//! and renders one JSON object to stderr with a stable field order.

use chakravyuha_core::Module;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

/// Running counters and metadata accumulated across the pass pipeline.
#[derive(Debug, Clone)]
pub struct ReportData {
    pub input_file: String,
    pub output_file: String,
    pub target_platform: String,
    pub obfuscation_level: String,
    pub enable_string_encryption: bool,
    pub enable_control_flow_flattening: bool,
    pub enable_fake_code_insertion: bool,
    pub cycles_completed: u32,

    // String encryption
    pub strings_encrypted: u32,
    pub original_ir_string_data_size: u64,
    pub obfuscated_ir_string_data_size: u64,
    pub string_method: String,

    // Control flow flattening
    pub flattened_functions: u32,
    pub flattened_blocks: u32,
    pub skipped_functions: u32,

    // Fake code insertion
    pub fake_code_blocks_inserted: u32,

    pub passes_run: Vec<String>,

    // IR sizes, measured from the printed module
    pub original_ir_size: u64,
    pub obfuscated_ir_size: u64,
}

impl Default for ReportData {
    fn default() -> Self {
        Self {
            input_file: String::new(),
            output_file: "obfuscated.ll".to_string(),
            target_platform: String::new(),
            obfuscation_level: "medium".to_string(),
            enable_string_encryption: false,
            enable_control_flow_flattening: false,
            enable_fake_code_insertion: false,
            cycles_completed: 1,
            strings_encrypted: 0,
            original_ir_string_data_size: 0,
            obfuscated_ir_string_data_size: 0,
            string_method: String::new(),
            flattened_functions: 0,
            flattened_blocks: 0,
            skipped_functions: 0,
            fake_code_blocks_inserted: 0,
            passes_run: Vec::new(),
            original_ir_size: 0,
            obfuscated_ir_size: 0,
        }
    }
}

impl ReportData {
    /// Fill unset fields from the module: input file from the source name,
    /// target platform from the triple.
    pub fn finalize_defaults(&mut self, module: &Module) {
        if self.input_file.is_empty() {
            self.input_file = if module.name.is_empty() {
                "<stdin>".to_string()
            } else {
                module.name.clone()
            };
        }
        if self.target_platform.is_empty() {
            self.target_platform = if module.target_triple.contains("windows") {
                "windows".to_string()
            } else {
                "linux".to_string()
            };
        }
    }

    /// Snapshot the final report. Measures the obfuscated IR size now, since
    /// emission is the last thing a pipeline does.
    pub fn to_report(&mut self, module: &Module) -> Report {
        self.finalize_defaults(module);
        self.obfuscated_ir_size = module.ir_size();

        Report {
            input_file: self.input_file.clone(),
            output_file: self.output_file.clone(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            input_parameters: InputParameters {
                obfuscation_level: self.obfuscation_level.clone(),
                target_platform: self.target_platform.clone(),
                enable_string_encryption: self.enable_string_encryption,
                enable_control_flow_flattening: self.enable_control_flow_flattening,
                enable_fake_code_insertion: self.enable_fake_code_insertion,
            },
            output_attributes: OutputAttributes {
                original_ir_size: format!("{} bytes", self.original_ir_size),
                obfuscated_ir_size: format!("{} bytes", self.obfuscated_ir_size),
                total_ir_size_change: percent_change(self.original_ir_size, self.obfuscated_ir_size),
                original_ir_string_data_size: format!(
                    "{} bytes",
                    self.original_ir_string_data_size
                ),
                obfuscated_ir_string_data_size: format!(
                    "{} bytes",
                    self.obfuscated_ir_string_data_size
                ),
                string_data_size_change: percent_change(
                    self.original_ir_string_data_size,
                    self.obfuscated_ir_string_data_size,
                ),
            },
            obfuscation_metrics: ObfuscationMetrics {
                cycles_completed: self.cycles_completed,
                passes_run: self.passes_run.clone(),
                string_encryption: StringEncryptionMetrics {
                    count: self.strings_encrypted,
                    method: if self.string_method.is_empty() {
                        "N/A".to_string()
                    } else {
                        self.string_method.clone()
                    },
                },
                control_flow_flattening: ControlFlowFlatteningMetrics {
                    flattened_functions: self.flattened_functions,
                    flattened_blocks: self.flattened_blocks,
                    skipped_functions: self.skipped_functions,
                },
                fake_code_insertion: FakeCodeInsertionMetrics {
                    inserted_blocks: self.fake_code_blocks_inserted,
                },
            },
        }
    }

    /// Render the final report to stderr.
    pub fn emit(&mut self, module: &Module) {
        let report = self.to_report(module);
        match serde_json::to_string_pretty(&report) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => debug!("report serialization failed: {e}"),
        }
    }
}

fn percent_change(before: u64, after: u64) -> String {
    let pct = if before == 0 {
        0.0
    } else {
        (after as f64 - before as f64) / before as f64 * 100.0
    };
    format!("{pct:.2}%")
}

/// The emitted JSON object. Field declaration order is the wire order.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(rename = "inputFile")]
    pub input_file: String,
    #[serde(rename = "outputFile")]
    pub output_file: String,
    pub timestamp: String,
    #[serde(rename = "inputParameters")]
    pub input_parameters: InputParameters,
    #[serde(rename = "outputAttributes")]
    pub output_attributes: OutputAttributes,
    #[serde(rename = "obfuscationMetrics")]
    pub obfuscation_metrics: ObfuscationMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputParameters {
    #[serde(rename = "obfuscationLevel")]
    pub obfuscation_level: String,
    #[serde(rename = "targetPlatform")]
    pub target_platform: String,
    #[serde(rename = "enableStringEncryption")]
    pub enable_string_encryption: bool,
    #[serde(rename = "enableControlFlowFlattening")]
    pub enable_control_flow_flattening: bool,
    #[serde(rename = "enableFakeCodeInsertion")]
    pub enable_fake_code_insertion: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputAttributes {
    #[serde(rename = "originalIRSize")]
    pub original_ir_size: String,
    #[serde(rename = "obfuscatedIRSize")]
    pub obfuscated_ir_size: String,
    #[serde(rename = "totalIRSizeChange")]
    pub total_ir_size_change: String,
    #[serde(rename = "originalIRStringDataSize")]
    pub original_ir_string_data_size: String,
    #[serde(rename = "obfuscatedIRStringDataSize")]
    pub obfuscated_ir_string_data_size: String,
    #[serde(rename = "stringDataSizeChange")]
    pub string_data_size_change: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObfuscationMetrics {
    #[serde(rename = "cyclesCompleted")]
    pub cycles_completed: u32,
    #[serde(rename = "passesRun")]
    pub passes_run: Vec<String>,
    #[serde(rename = "stringEncryption")]
    pub string_encryption: StringEncryptionMetrics,
    #[serde(rename = "controlFlowFlattening")]
    pub control_flow_flattening: ControlFlowFlatteningMetrics,
    #[serde(rename = "fakeCodeInsertion")]
    pub fake_code_insertion: FakeCodeInsertionMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct StringEncryptionMetrics {
    pub count: u32,
    pub method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlFlowFlatteningMetrics {
    #[serde(rename = "flattenedFunctions")]
    pub flattened_functions: u32,
    #[serde(rename = "flattenedBlocks")]
    pub flattened_blocks: u32,
    #[serde(rename = "skippedFunctions")]
    pub skipped_functions: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FakeCodeInsertionMetrics {
    #[serde(rename = "insertedBlocks")]
    pub inserted_blocks: u32,
}
