pub mod fake_code;
pub mod flatten;
pub mod pass;
pub mod safety;
pub mod string_encrypt;

use chakravyuha_analysis::report::ReportData;
use chakravyuha_core::Module;
use rand::rngs::StdRng;
use thiserror::Error;

/// Transform error type encompassing all transform module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Core operation failed.
    #[error("core operation failed: {0}")]
    Core(#[from] chakravyuha_core::Error),
    /// Generic error.
    #[error("generic error: {0}")]
    Generic(String),
    /// No pass is registered under the requested name.
    #[error("unknown pass name: {0}")]
    UnknownPass(String),
}

/// Transform result type
pub type Result<T> = std::result::Result<T, Error>;

/// The preserved-analyses token handed back to the host after each pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    /// The pass did not mutate the module.
    All,
    /// The pass mutated the module; host analyses are invalid.
    None,
}

/// Mutable state shared by one pipeline run: the pass RNG and the report
/// aggregator every pass appends its counters to.
pub struct PassContext<'a> {
    pub rng: StdRng,
    pub report: &'a mut ReportData,
}

/// Trait for IR obfuscation transforms.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform to the module, returning whether changes were made.
    fn apply(&self, module: &mut Module, cx: &mut PassContext<'_>) -> Result<bool>;
}
