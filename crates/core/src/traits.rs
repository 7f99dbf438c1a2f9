//! Trait seams for the two external collaborators the Step Kernel dispatches
//! to. Keeping these as traits (rather than hard-wiring `reqwest`/`codex`
//! calls into the kernel) lets tests plug in deterministic fakes, per the
//! design note in `spec.md` §9 ("LLM client optionality").

use crate::error::FlowError;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// One hosted-completion request. Mirrors the fields the OpenAI Responses
/// API accepts that this system cares about.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub web_search: bool,
    pub model: Option<String>,
    pub service_tier: Option<String>,
    pub reasoning_effort: Option<String>,
}

pub trait LlmClient: Send + Sync {
    /// Returns the full response document as a JSON value (`output[0]
    /// .content[0].text` is the primary text, per `spec.md` §4.1).
    fn call(&self, request: &LlmRequest) -> Result<Value, FlowError>;
}

pub trait CliClient: Send + Sync {
    /// Runs the external CLI tool in `curr_dir`, returning the final
    /// message text and the path to the file it was written to.
    fn call(&self, prompt: &str, curr_dir: &Path) -> Result<(String, PathBuf), FlowError>;
}
