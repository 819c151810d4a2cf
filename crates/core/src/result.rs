//! Core results and error types

use thiserror::Error;

/// Core error type encompassing all core module errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A symbol (global or function) was defined twice in one module.
    #[error("duplicate symbol '{0}'")]
    DuplicateSymbol(String),

    /// Evaluation faulted (bad pointer, unreachable executed, unsupported construct).
    #[error("evaluation fault: {0}")]
    Eval(String),

    /// Invalid hexadecimal in seed.
    #[error("invalid hexadecimal in seed")]
    InvalidSeedHex,

    /// Invalid seed length.
    #[error("invalid seed length: expected 64 hex chars, got {0}")]
    InvalidSeedLength(usize),

    /// The module failed structural verification.
    #[error("malformed module: {0}")]
    Malformed(String),

    /// Evaluation exceeded its step limit.
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    /// A terminator or instruction referenced a block that does not exist.
    #[error("function '{function}' references unknown block b{block}")]
    UnknownBlock {
        /// The function containing the dangling reference.
        function: String,
        /// The raw block id.
        block: u32,
    },

    /// A call or constant referenced a function not present in the module.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// An operand referenced a global not present in the module.
    #[error("unknown global '{0}'")]
    UnknownGlobal(String),
}

/// Core result type
pub type Result<T> = std::result::Result<T, Error>;
