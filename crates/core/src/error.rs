//! The error taxonomy shared by the kernel, engine, expander, and adapters.
//!
//! Library code returns `FlowError`; the CLI boundary wraps it in
//! `anyhow::Error` (see `cli/src/main.rs`), matching the split already
//! present in the teacher between `ferri-core`/`ferri-automation` (plain
//! `io::Error`) and `ferri-agent`/`ferri-cli` (`anyhow::Result`).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("step {step_index} ({step_type}) failed: {message}")]
    StepFailure {
        step_index: usize,
        step_type: String,
        message: String,
        exit_code: Option<i32>,
    },

    #[error("step {step_index} (array) did not produce a JSON array: {message}")]
    ArrayParseFailure { step_index: usize, message: String },

    #[error("operation timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("network error: {0}")]
    Network(String),

    #[error("flow cancelled")]
    Cancelled,

    #[error("maximum flow failures reached")]
    MaxFlowFailuresExceeded,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn step_failure(
        step_index: usize,
        step_type: &str,
        message: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        FlowError::StepFailure {
            step_index,
            step_type: step_type.to_string(),
            message: message.into(),
            exit_code,
        }
    }
}

/// Renders the quarantined error file body written to
/// `errors/run_*/step_{i}_{type}.txt`.
pub fn render_error_artifact(step_type: &str, err: &FlowError) -> String {
    format!("{}\n{}\n", step_type, err)
}

/// Renders the paired `_stderr.txt` artifact body when a process exit code
/// is available.
pub fn render_stderr_artifact(exit_code: i32, stderr: &str) -> String {
    format!("exit_code: {}\n{}", exit_code, stderr)
}

/// A stable path fragment helper kept next to the error type since most
/// error artifact paths are derived from a step index and type name.
pub fn error_artifact_dir(curr_dir: &std::path::Path, run_suffix: &str) -> PathBuf {
    curr_dir.join("errors").join(format!("run_{run_suffix}"))
}
