//! The Flow Engine: walks one materialized flow's steps, fanning array
//! outputs into concurrent branches and quarantining failed leaves into
//! error artifacts. See `spec.md` §4.2 and §5.

use crate::status::{ActiveGuard, StatusBoard};
use crate::CancelLatch;
use flowctl_core::context::{BranchContext, BranchResult};
use flowctl_core::error::{error_artifact_dir, render_error_artifact, render_stderr_artifact};
use flowctl_core::kernel::{run_step, LlmDefaults};
use flowctl_core::util::rand_suffix;
use flowctl_core::{CliClient, FlowError, LlmClient, StepSpec};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a branch walk needs that does not change across the life of
/// one flow run. Shared across the `std::thread::spawn` boundary via `Arc`.
pub struct EngineShared {
    pub steps: Vec<StepSpec>,
    pub llm: Arc<dyn LlmClient>,
    pub cli: Arc<dyn CliClient>,
    pub defaults: LlmDefaults,
    pub cancel: Arc<CancelLatch>,
    pub status: Arc<StatusBoard>,
}

impl EngineShared {
    /// `status` is shared across every flow in a run (one counter per step
    /// index, summed across all concurrently executing flows), matching the
    /// single `step_counts` array `orchestrator.py`'s `orchestrate()` threads
    /// all increment and decrement under one lock.
    pub fn new(
        steps: Vec<StepSpec>,
        llm: Arc<dyn LlmClient>,
        cli: Arc<dyn CliClient>,
        defaults: LlmDefaults,
        cancel: Arc<CancelLatch>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            steps,
            llm,
            cli,
            defaults,
            cancel,
            status,
        }
    }
}

/// Runs one flow from its root directory, returning every terminal leaf
/// (a clean completion, an early exit, or a quarantined failure). `Err` is
/// reserved for run-wide cancellation observed mid-walk.
pub fn run_flow(shared: &Arc<EngineShared>, flow_dir: PathBuf) -> Result<Vec<BranchResult>, FlowError> {
    walk(shared, BranchContext::root(flow_dir), 0)
}

fn walk(
    shared: &Arc<EngineShared>,
    branch: BranchContext,
    step_index: usize,
) -> Result<Vec<BranchResult>, FlowError> {
    if shared.cancel.is_set() {
        return Err(FlowError::Cancelled);
    }

    if step_index == shared.steps.len() {
        return Ok(vec![BranchResult {
            output_text: branch.prev_output.clone(),
            artifact_path: branch.prev_path.clone(),
            branch_dir: branch.curr_dir.clone(),
            failed: false,
        }]);
    }

    let step = &shared.steps[step_index];

    let step_result = {
        let _guard = ActiveGuard::enter(&shared.status, step_index);
        run_step(
            step_index,
            step,
            &shared.steps,
            &branch,
            shared.llm.as_ref(),
            shared.cli.as_ref(),
            &shared.defaults,
        )
    };

    let outcome = match step_result {
        Ok(o) => o,
        Err(e) => {
            let artifact = quarantine_error(&branch, step_index, step.step_type.as_str(), &e).ok();
            return Ok(vec![BranchResult {
                output_text: String::new(),
                artifact_path: artifact,
                branch_dir: branch.curr_dir.clone(),
                failed: true,
            }]);
        }
    };

    if outcome.early_exit.is_some() {
        return Ok(vec![BranchResult {
            output_text: outcome.output_text,
            artifact_path: outcome.artifact_path,
            branch_dir: branch.curr_dir.clone(),
            failed: false,
        }]);
    }

    if step.array {
        return fan_out(shared, &branch, step_index, outcome.output_text, outcome.artifact_path);
    }

    let next = branch.advance(step_index, outcome.output_text, outcome.artifact_path);
    walk(shared, next, step_index + 1)
}

fn fan_out(
    shared: &Arc<EngineShared>,
    branch: &BranchContext,
    step_index: usize,
    output_text: String,
    artifact_path: Option<PathBuf>,
) -> Result<Vec<BranchResult>, FlowError> {
    let items = match serde_json::from_str::<Value>(&output_text) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            let err = FlowError::ArrayParseFailure {
                step_index,
                message: format!("expected a JSON array, got {other}"),
            };
            let artifact = quarantine_error(branch, step_index, "array", &err).ok();
            return Ok(vec![BranchResult {
                output_text: String::new(),
                artifact_path: artifact,
                branch_dir: branch.curr_dir.clone(),
                failed: true,
            }]);
        }
        Err(e) => {
            let err = FlowError::ArrayParseFailure {
                step_index,
                message: e.to_string(),
            };
            let artifact = quarantine_error(branch, step_index, "array", &err).ok();
            return Ok(vec![BranchResult {
                output_text: String::new(),
                artifact_path: artifact,
                branch_dir: branch.curr_dir.clone(),
                failed: true,
            }]);
        }
    };

    let next = branch.advance(step_index, output_text, artifact_path);

    let handles: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(k, item)| {
            let branch_dir = next.curr_dir.join(format!("branch_{k}"));
            let prev_output = match item {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let fork = next.fork(branch_dir, prev_output);
            let shared = Arc::clone(shared);
            std::thread::spawn(move || walk(&shared, fork, step_index + 1))
        })
        .collect();

    let mut leaves = Vec::new();
    let mut cancelled = false;
    for handle in handles {
        match handle.join().expect("branch thread panicked") {
            Ok(mut v) => leaves.append(&mut v),
            Err(FlowError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }

    if cancelled {
        return Err(FlowError::Cancelled);
    }
    Ok(leaves)
}

fn quarantine_error(
    branch: &BranchContext,
    step_index: usize,
    step_type: &str,
    err: &FlowError,
) -> Result<PathBuf, FlowError> {
    let dir = error_artifact_dir(&branch.curr_dir, &rand_suffix());
    fs::create_dir_all(&dir)?;

    let path = dir.join(format!("step_{step_index}_{step_type}.txt"));
    fs::write(&path, render_error_artifact(step_type, err))?;

    if let FlowError::StepFailure {
        exit_code: Some(code),
        message,
        ..
    } = err
    {
        let stderr_path = dir.join(format!("step_{step_index}_{step_type}_stderr.txt"));
        fs::write(&stderr_path, render_stderr_artifact(*code, message))?;
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::config::StepType;
    use flowctl_core::traits::LlmRequest;
    use std::path::Path;
    use tempfile::tempdir;

    struct EchoCli;
    impl CliClient for EchoCli {
        fn call(&self, prompt: &str, curr_dir: &Path) -> Result<(String, PathBuf), FlowError> {
            let path = curr_dir.join("codex_final.txt");
            fs::write(&path, prompt)?;
            Ok((prompt.to_string(), path))
        }
    }

    struct NullLlm;
    impl LlmClient for NullLlm {
        fn call(&self, _request: &LlmRequest) -> Result<Value, FlowError> {
            Ok(Value::Null)
        }
    }

    fn base_step(step_type: StepType) -> StepSpec {
        StepSpec {
            step_type,
            prompt: None,
            prmpt_file: None,
            cmd: None,
            name: None,
            array: false,
            web_search: false,
            inputs: None,
            stdin_file: None,
            exit_on_empty_response: false,
            exit_on_response_contains: None,
            response_buckets: None,
            primary_bucket: None,
        }
    }

    fn status_for(steps: &[StepSpec]) -> Arc<StatusBoard> {
        Arc::new(StatusBoard::new(
            steps.iter().map(StepSpec::display_name).collect(),
        ))
    }

    #[test]
    fn single_cmd_step_completes_with_no_failures() {
        let dir = tempdir().unwrap();
        let mut step = base_step(StepType::Cmd);
        step.cmd = Some("echo hello".to_string());
        let steps = vec![step];
        let status = status_for(&steps);
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            Arc::new(CancelLatch::new()),
            status,
        ));

        let leaves = run_flow(&shared, dir.path().to_path_buf()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert!(!leaves[0].failed);
        assert_eq!(leaves[0].output_text.trim(), "hello");
        assert!(shared.status.all_zero());
    }

    #[test]
    fn failing_cmd_step_is_quarantined_not_propagated() {
        let dir = tempdir().unwrap();
        let mut step = base_step(StepType::Cmd);
        step.cmd = Some("exit 3".to_string());
        let steps = vec![step];
        let status = status_for(&steps);
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            Arc::new(CancelLatch::new()),
            status,
        ));

        let leaves = run_flow(&shared, dir.path().to_path_buf()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].failed);
        let artifact = leaves[0].artifact_path.as_ref().unwrap();
        assert!(artifact.exists());
        assert!(shared.status.all_zero());
    }

    #[test]
    fn array_step_fans_out_one_branch_per_element() {
        let dir = tempdir().unwrap();
        let mut array_step = base_step(StepType::Cmd);
        array_step.cmd = Some(r#"echo '["a","b","c"]'"#.to_string());
        array_step.array = true;
        let mut leaf_step = base_step(StepType::Cmd);
        leaf_step.cmd = Some("cat".to_string());

        let steps = vec![array_step, leaf_step];
        let status = status_for(&steps);
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            Arc::new(CancelLatch::new()),
            status,
        ));

        let mut leaves = run_flow(&shared, dir.path().to_path_buf()).unwrap();
        leaves.sort_by(|a, b| a.output_text.cmp(&b.output_text));
        let texts: Vec<String> = leaves.iter().map(|l| l.output_text.trim().to_string()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(shared.status.all_zero());
    }

    #[test]
    fn cancellation_short_circuits_remaining_steps() {
        let dir = tempdir().unwrap();
        let mut step_one = base_step(StepType::Cmd);
        step_one.cmd = Some("echo one".to_string());
        let mut step_two = base_step(StepType::Cmd);
        step_two.cmd = Some("echo two".to_string());

        let steps = vec![step_one, step_two];
        let status = status_for(&steps);
        let cancel = Arc::new(CancelLatch::new());
        cancel.set();
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            cancel,
            status,
        ));

        let result = run_flow(&shared, dir.path().to_path_buf());
        assert!(matches!(result, Err(FlowError::Cancelled)));
    }

    #[test]
    fn array_parse_failure_is_quarantined() {
        let dir = tempdir().unwrap();
        let mut array_step = base_step(StepType::Cmd);
        array_step.cmd = Some("echo not-json".to_string());
        array_step.array = true;

        let steps = vec![array_step];
        let status = status_for(&steps);
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            Arc::new(CancelLatch::new()),
            status,
        ));

        let leaves = run_flow(&shared, dir.path().to_path_buf()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert!(leaves[0].failed);
    }

    #[test]
    fn active_counter_drops_before_next_step_runs() {
        let dir = tempdir().unwrap();
        let mut step_one = base_step(StepType::Cmd);
        step_one.cmd = Some("echo one".to_string());
        let mut step_two = base_step(StepType::Cmd);
        step_two.cmd = Some("sleep 0.3".to_string());

        let steps = vec![step_one, step_two];
        let status = status_for(&steps);
        let shared = Arc::new(EngineShared::new(
            steps,
            Arc::new(NullLlm),
            Arc::new(EchoCli),
            LlmDefaults::default(),
            Arc::new(CancelLatch::new()),
            status,
        ));

        let flow_dir = dir.path().to_path_buf();
        let run_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || run_flow(&run_shared, flow_dir));

        // Give step 0 time to finish and step 1 time to start, then observe
        // that step 0's counter has already returned to zero while step 1 is
        // still active. Before the fix, `_guard` for step 0 stayed alive for
        // the whole recursive call chain, so this would see count[0] == 1.
        std::thread::sleep(std::time::Duration::from_millis(150));
        let snapshot = shared.status.snapshot();
        assert_eq!(snapshot[0].1, 0, "step 0's counter should be back to zero once step 0 finishes, not held through step 1");
        assert_eq!(snapshot[1].1, 1, "step 1 should still be marked active while it runs");

        let leaves = handle.join().unwrap().unwrap();
        assert_eq!(leaves.len(), 1);
        assert!(!leaves[0].failed);
        assert!(shared.status.all_zero());
    }
}
