//! `flowctl`: the CLI entry point for the flow orchestrator. Parses
//! arguments, wires up the external client adapters, and hands off to
//! `flowctl_automation::orchestrate`. See `spec.md` §6.

use anyhow::{Context, Result};
use clap::Parser;
use flowctl_adapters::{CodexAdapter, OpenAiAdapter};
use flowctl_automation::{orchestrate, SupervisorOptions};
use flowctl_core::config::parse_base_config;
use flowctl_core::kernel::LlmDefaults;
use flowctl_core::{CliClient, FlowError, LlmClient, LlmRequest};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A parsed `--key name:filelist_path` flag value.
#[derive(Debug, Clone)]
struct KeyValue {
    name: String,
    path: PathBuf,
}

impl std::str::FromStr for KeyValue {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (name, path) = raw
            .split_once(':')
            .ok_or_else(|| format!("invalid --key '{raw}', expected name:filelist_path"))?;
        if name.is_empty() {
            return Err(format!("invalid --key '{raw}': name must not be empty"));
        }
        Ok(KeyValue {
            name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

#[derive(Parser)]
#[command(name = "flowctl", author, version, about = "Flow orchestrator", long_about = None)]
struct Cli {
    /// Path to the base configuration JSON file
    config: PathBuf,

    /// Maximum number of flows to run concurrently
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    /// A named filelist manifest axis, as `name:filelist_path` (repeatable)
    #[arg(long = "key", value_name = "NAME:PATH")]
    key: Vec<KeyValue>,

    /// Append each source path to its own bound text
    #[arg(long)]
    append_filepath: bool,

    /// Failure budget: cancel the run once this many flows have failed
    #[arg(long, default_value_t = 3)]
    max_flow_failures: usize,

    /// Never cancel the run on the failure budget; run every flow to completion
    #[arg(long)]
    ignore_max_failures: bool,

    /// cwd for the external CLI subprocess (required)
    #[arg(long)]
    workdir: PathBuf,

    /// Timeout in seconds for the external CLI subprocess
    #[arg(long)]
    timeout: Option<u64>,

    /// Default model for `openai` steps
    #[arg(long = "openai-model")]
    openai_model: Option<String>,

    /// Default service tier for `openai` steps
    #[arg(long = "openai-service-tier")]
    openai_service_tier: Option<String>,

    /// Default reasoning effort for `openai` steps
    #[arg(long = "openai-reasoning-effort")]
    openai_reasoning_effort: Option<String>,

    /// Don't print each flow's directory path as it is created
    #[arg(long)]
    hide_flow_paths: bool,

    /// Print each successful flow's final `codex` message path
    #[arg(long = "list-final-message-paths")]
    list_final_message_paths: bool,
}

/// A `LlmClient` that fails at call time rather than at startup, matching
/// the "LLM client optionality" design note in `spec.md` §9: the CLI never
/// hard-requires `OPENAI_API_KEY` unless a flow actually dispatches an
/// `openai` step.
struct MissingLlmClient;

impl LlmClient for MissingLlmClient {
    fn call(&self, _request: &LlmRequest) -> Result<Value, FlowError> {
        Err(FlowError::MissingDependency("OPENAI_API_KEY".to_string()))
    }
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let key_files: Vec<(String, PathBuf)> = cli
        .key
        .iter()
        .map(|kv| (kv.name.clone(), kv.path.clone()))
        .collect();

    let config_text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading config file {}", cli.config.display()))?;
    let base_steps = parse_base_config(&config_text)
        .with_context(|| format!("parsing config file {}", cli.config.display()))?;

    let llm: Arc<dyn LlmClient> = match OpenAiAdapter::from_env() {
        Ok(adapter) => Arc::new(adapter),
        Err(_) => Arc::new(MissingLlmClient),
    };

    let mut codex_adapter = CodexAdapter::new(cli.workdir.clone());
    if let Some(secs) = cli.timeout {
        codex_adapter = codex_adapter.with_timeout(Duration::from_secs(secs));
    }
    let cli_client: Arc<dyn CliClient> = Arc::new(codex_adapter);

    let defaults = LlmDefaults {
        model: cli.openai_model.clone(),
        service_tier: cli.openai_service_tier.clone(),
        reasoning_effort: cli.openai_reasoning_effort.clone(),
    };

    let generated_root = std::env::current_dir()
        .context("resolving current directory")?
        .join("generated");

    let options = SupervisorOptions {
        parallel: cli.parallel,
        max_flow_failures: cli.max_flow_failures,
        halt_on_max_failures: !cli.ignore_max_failures,
        workdir: cli.workdir,
        generated_root,
        max_flows: 0,
        print_flow_paths: !cli.hide_flow_paths,
        list_codex_final_paths: cli.list_final_message_paths,
    };

    let result = orchestrate(
        base_steps,
        &key_files,
        cli.append_filepath,
        llm,
        cli_client,
        defaults,
        options,
    );

    match result {
        Ok(report) => {
            for branch in &report.results {
                let path = branch
                    .artifact_path
                    .clone()
                    .unwrap_or_else(|| branch.branch_dir.clone());
                println!("{}", path.display());
            }
            Ok(())
        }
        Err(FlowError::MaxFlowFailuresExceeded) => {
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_valid_key_flag() {
        let kv = KeyValue::from_str("docs:manifest.txt").unwrap();
        assert_eq!(kv.name, "docs");
        assert_eq!(kv.path, PathBuf::from("manifest.txt"));
    }

    #[test]
    fn rejects_key_flag_with_no_colon() {
        assert!(KeyValue::from_str("docsmanifest.txt").is_err());
    }

    #[test]
    fn rejects_key_flag_with_empty_name() {
        assert!(KeyValue::from_str(":manifest.txt").is_err());
    }
}
