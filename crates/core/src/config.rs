//! The step/flow configuration schema produced by the Flow Expander and
//! consumed by the Step Kernel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// One unit of work within a flow. Immutable once a flow is materialized.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepSpec {
    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub prmpt_file: Option<PathBuf>,

    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub array: bool,

    #[serde(default)]
    pub web_search: bool,

    #[serde(default)]
    pub inputs: Option<Vec<InputRef>>,

    #[serde(default)]
    pub stdin_file: Option<PathBuf>,

    #[serde(default)]
    pub exit_on_empty_response: bool,

    #[serde(default)]
    pub exit_on_response_contains: Option<String>,

    #[serde(default)]
    pub response_buckets: Option<ResponseBuckets>,

    #[serde(default)]
    pub primary_bucket: Option<String>,
}

impl StepSpec {
    /// The display label used in status lines and error artifacts: the
    /// declared `name`, falling back to the step type's tag.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.step_type.as_str().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Codex,
    Openai,
    Cmd,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Codex => "codex",
            StepType::Openai => "openai",
            StepType::Cmd => "cmd",
        }
    }
}

/// A reference into a preceding step's recorded output: by `name` or by
/// absolute step index.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputRef {
    Name(String),
    Index(usize),
}

/// `response_buckets` may be given as a bare array of bucket names, or as a
/// JSON object mapping bucket name to a per-bucket options value. `spec.md`
/// leaves the shape of those options open; the Kernel only ever consumes
/// the bucket names in declaration order (see DESIGN.md).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResponseBuckets {
    Names(Vec<String>),
    WithOptions(serde_json::Map<String, Value>),
}

impl ResponseBuckets {
    pub fn names(&self) -> Vec<String> {
        match self {
            ResponseBuckets::Names(names) => names.clone(),
            ResponseBuckets::WithOptions(map) => map.keys().cloned().collect(),
        }
    }
}

/// A single concrete flow: an ordered list of steps plus the provenance of
/// the expansion axes that produced it.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub steps: Vec<StepSpec>,
    pub interpolated_paths: Vec<PathBuf>,
}

/// Parses the top-level JSON array config into a base list of step specs.
pub fn parse_base_config(text: &str) -> Result<Vec<StepSpec>, serde_json::Error> {
    serde_json::from_str(text)
}
