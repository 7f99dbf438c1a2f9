//! The Step Kernel: prompt assembly, backend dispatch, artifact writing, and
//! early-exit detection for a single step. See `spec.md` §4.1.

use crate::config::{InputRef, StepSpec, StepType};
use crate::context::BranchContext;
use crate::error::FlowError;
use crate::traits::{CliClient, LlmClient, LlmRequest};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// The run's default overrides for hosted-model requests, applied to every
/// `openai` step (the config schema carries no per-step model override).
#[derive(Debug, Clone, Default)]
pub struct LlmDefaults {
    pub model: Option<String>,
    pub service_tier: Option<String>,
    pub reasoning_effort: Option<String>,
}

/// What one successful (or cleanly early-exited) step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub output_text: String,
    pub artifact_path: Option<PathBuf>,
    /// `Some(log_path)` when `exit_on_empty_response` /
    /// `exit_on_response_contains` tripped after this step ran.
    pub early_exit: Option<PathBuf>,
}

/// Executes `step` in isolation. Returns `Err` for any exception (including
/// non-zero shell exit); the caller (Flow Engine) is responsible for
/// quarantining the error into `errors/run_*/...` artifacts.
pub fn run_step(
    step_index: usize,
    step: &StepSpec,
    all_steps: &[StepSpec],
    branch: &BranchContext,
    llm: &dyn LlmClient,
    cli: &dyn CliClient,
    defaults: &LlmDefaults,
) -> Result<StepOutcome, FlowError> {
    fs::create_dir_all(&branch.curr_dir)?;

    let prompt = assemble_prompt(step, all_steps, branch)?;

    match step.step_type {
        StepType::Cmd => run_cmd_step(step_index, step, branch),
        StepType::Openai => run_openai_step(step_index, step, branch, &prompt, llm, defaults),
        StepType::Codex => run_codex_step(step_index, step, branch, &prompt, cli),
    }
}

fn assemble_prompt(
    step: &StepSpec,
    all_steps: &[StepSpec],
    branch: &BranchContext,
) -> Result<String, FlowError> {
    let mut prompt = step.prompt.clone().unwrap_or_default();

    if prompt.is_empty() {
        if let Some(path) = &step.prmpt_file {
            prompt = fs::read_to_string(path)?;
        }
    }

    match &step.inputs {
        None => {
            if !branch.prev_output.is_empty() {
                prompt = format!("{}\n{}", prompt, branch.prev_output)
                    .trim_end()
                    .to_string();
            }
        }
        Some(refs) => {
            for r in refs {
                if let Some((text, _)) = resolve_input(r, all_steps, branch) {
                    prompt = format!("{}\n{}", prompt, text);
                }
            }
        }
    }

    Ok(prompt)
}

fn resolve_input<'a>(
    r: &InputRef,
    all_steps: &[StepSpec],
    branch: &'a BranchContext,
) -> Option<&'a (String, Option<PathBuf>)> {
    let idx = match r {
        InputRef::Index(i) => Some(*i),
        InputRef::Name(name) => all_steps
            .iter()
            .position(|s| s.name.as_deref() == Some(name.as_str())),
    }?;
    branch.step_history.get(&idx)
}

fn run_cmd_step(
    step_index: usize,
    step: &StepSpec,
    branch: &BranchContext,
) -> Result<StepOutcome, FlowError> {
    let cmd_str = step.cmd.clone().unwrap_or_default();

    let stdin_bytes = if let Some(stdin_file) = &step.stdin_file {
        fs::read(stdin_file)?
    } else {
        branch.prev_output.clone().into_bytes()
    };

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&cmd_str)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&stdin_bytes);
    }
    let output = child.wait_with_output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let stderr = if stderr.ends_with('\n') {
            stderr
        } else {
            format!("{stderr}\n")
        };
        eprint!("{stderr}");
        return Err(FlowError::step_failure(
            step_index,
            "cmd",
            stderr,
            output.status.code(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let artifact_path = branch.curr_dir.join(format!("step_{step_index}_cmd.txt"));
    fs::write(&artifact_path, &stdout)?;

    let early_exit = detect_early_exit(step_index, step, &stdout, &branch.curr_dir)?;
    Ok(StepOutcome {
        output_text: stdout,
        artifact_path: Some(artifact_path),
        early_exit,
    })
}

fn run_openai_step(
    step_index: usize,
    step: &StepSpec,
    branch: &BranchContext,
    prompt: &str,
    llm: &dyn LlmClient,
    defaults: &LlmDefaults,
) -> Result<StepOutcome, FlowError> {
    let request = LlmRequest {
        prompt: prompt.to_string(),
        web_search: step.web_search,
        model: defaults.model.clone(),
        service_tier: defaults.service_tier.clone(),
        reasoning_effort: defaults.reasoning_effort.clone(),
    };

    let response = llm.call(&request).map_err(|e| {
        FlowError::step_failure(step_index, "openai", e.to_string(), None)
    })?;

    let primary_text = response
        .get("output")
        .and_then(|o| o.get(0))
        .and_then(|o| o.get("content"))
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let response_path = branch
        .curr_dir
        .join(format!("step_{step_index}_openai_response.json"));
    fs::write(&response_path, serde_json::to_string_pretty(&response)?)?;

    let text_path = branch
        .curr_dir
        .join(format!("step_{step_index}_openai.txt"));

    let output_text = if let Some(buckets) = &step.response_buckets {
        let names = buckets.names();
        let parsed: Option<Value> = serde_json::from_str(&primary_text).ok();
        let mut bucket_values: Vec<(String, String)> = Vec::new();
        match parsed {
            Some(Value::Object(map)) => {
                for name in &names {
                    let value = map
                        .get(name)
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .unwrap_or_default();
                    bucket_values.push((name.clone(), value));
                }
            }
            Some(Value::Array(items)) => {
                for (name, item) in names.iter().zip(items.into_iter()) {
                    let value = match item {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    bucket_values.push((name.clone(), value));
                }
                for name in names.iter().skip(bucket_values.len()) {
                    bucket_values.push((name.clone(), String::new()));
                }
            }
            _ => {
                for name in &names {
                    bucket_values.push((name.clone(), String::new()));
                }
            }
        }

        for (name, value) in &bucket_values {
            let bucket_path = branch
                .curr_dir
                .join(format!("step_{step_index}_openai_bucket_{name}.txt"));
            fs::write(bucket_path, value)?;
        }

        let primary_name = step.primary_bucket.clone().or_else(|| names.first().cloned());
        primary_name
            .and_then(|name| bucket_values.iter().find(|(n, _)| n == &name).cloned())
            .map(|(_, v)| v)
            .unwrap_or_else(|| primary_text.clone())
    } else {
        primary_text.clone()
    };

    fs::write(&text_path, &output_text)?;

    let early_exit = detect_early_exit(step_index, step, &output_text, &branch.curr_dir)?;
    Ok(StepOutcome {
        output_text,
        artifact_path: Some(text_path),
        early_exit,
    })
}

fn run_codex_step(
    step_index: usize,
    step: &StepSpec,
    branch: &BranchContext,
    prompt: &str,
    cli: &dyn CliClient,
) -> Result<StepOutcome, FlowError> {
    let (final_message, final_message_path) = cli
        .call(prompt, &branch.curr_dir)
        .map_err(|e| match e {
            FlowError::StepFailure {
                message, exit_code, ..
            } => FlowError::step_failure(step_index, "codex", message, exit_code),
            other => FlowError::step_failure(step_index, "codex", other.to_string(), None),
        })?;

    let early_exit = detect_early_exit(step_index, step, &final_message, &branch.curr_dir)?;
    Ok(StepOutcome {
        output_text: final_message,
        artifact_path: Some(final_message_path),
        early_exit,
    })
}

fn detect_early_exit(
    step_index: usize,
    step: &StepSpec,
    output_text: &str,
    curr_dir: &std::path::Path,
) -> Result<Option<PathBuf>, FlowError> {
    let name = step.display_name();

    if step.exit_on_empty_response && output_text.is_empty() {
        let log_path = curr_dir.join(format!("step_{step_index}_early_exit.txt"));
        fs::write(&log_path, format!("{name} produced an empty response."))?;
        return Ok(Some(log_path));
    }

    if let Some(substr) = &step.exit_on_response_contains {
        if !substr.is_empty() && output_text.contains(substr.as_str()) {
            let log_path = curr_dir.join(format!("step_{step_index}_early_exit.txt"));
            fs::write(
                &log_path,
                format!("{name} matched exit_on_response_contains substring: '{substr}'."),
            )?;
            return Ok(Some(log_path));
        }
    }

    Ok(None)
}
