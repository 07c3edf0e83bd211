//! Error types for the compile-and-launch pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations.
///
/// Every variant is terminal: a failure aborts the run and propagates
/// straight to the caller. There is no retry path anywhere.
#[derive(Debug, Error)]
pub enum Error {
    /// Driver could not be initialized or no compatible device is present
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Device attribute query failed
    #[error("device attribute query failed: {0}")]
    DeviceQuery(String),

    /// Kernel source file does not exist
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Compiler subprocess failed or could not be started
    #[error("compilation failed: {message}\n{stderr}")]
    Compilation {
        /// What went wrong
        message: String,
        /// Captured compiler stderr, verbatim
        stderr: String,
    },

    /// Interrupted while waiting for the compiler subprocess
    #[error("interrupted while waiting for the compiler: {0}")]
    Interrupted(String),

    /// Compiled artifact is malformed or built for the wrong architecture
    #[error("module load failed: {0}")]
    ModuleLoad(String),

    /// Entry point is absent from the loaded module
    #[error("kernel '{0}' not found in module")]
    SymbolNotFound(String),

    /// Device memory allocation could not be satisfied
    #[error("device allocation of {bytes} bytes failed: {message}")]
    OutOfMemory {
        /// Requested allocation size
        bytes: usize,
        /// Driver message
        message: String,
    },

    /// Device rejected the launch configuration
    #[error("kernel launch rejected: {0}")]
    Launch(String),

    /// Kernel raised a runtime fault on the device
    #[error("device execution fault: {0}")]
    DeviceExecution(String),

    /// Device-to-host or host-to-device copy failed
    #[error("transfer failed: {0}")]
    Transfer(String),
}
