//! Per-branch execution context threaded through the Flow Engine and Step
//! Kernel.

use std::collections::HashMap;
use std::path::PathBuf;

/// State owned by one branch walk: where its artifacts land, what the
/// previous step produced, and the full history of prior steps' outputs
/// (needed to resolve `inputs` references by name or index).
#[derive(Debug, Clone)]
pub struct BranchContext {
    pub curr_dir: PathBuf,
    pub prev_output: String,
    pub prev_path: Option<PathBuf>,
    pub step_history: HashMap<usize, (String, Option<PathBuf>)>,
}

impl BranchContext {
    pub fn root(curr_dir: PathBuf) -> Self {
        Self {
            curr_dir,
            prev_output: String::new(),
            prev_path: None,
            step_history: HashMap::new(),
        }
    }

    /// Returns the context for the next step after recording this step's
    /// output in history.
    pub fn advance(&self, step_index: usize, output: String, path: Option<PathBuf>) -> Self {
        let mut step_history = self.step_history.clone();
        step_history.insert(step_index, (output.clone(), path.clone()));
        Self {
            curr_dir: self.curr_dir.clone(),
            prev_output: output,
            prev_path: path,
            step_history,
        }
    }

    /// A fresh context for an array fan-out branch: a disjoint `branch_{k}`
    /// directory, the branch's own serialized element as `prev_output`, and
    /// history inherited so far (excluding the array step itself, since it
    /// has not yet been recorded by the caller at the point a branch forks).
    pub fn fork(&self, branch_dir: PathBuf, prev_output: String) -> Self {
        Self {
            curr_dir: branch_dir,
            prev_output,
            prev_path: None,
            step_history: self.step_history.clone(),
        }
    }
}

/// The outcome of one branch walk reaching the end of the step list (or an
/// early exit / terminal failure leaf).
#[derive(Debug, Clone)]
pub struct BranchResult {
    pub output_text: String,
    pub artifact_path: Option<PathBuf>,
    pub branch_dir: PathBuf,
    /// `true` when this leaf is a quarantined step/array failure rather than
    /// a clean completion or early exit.
    pub failed: bool,
}
