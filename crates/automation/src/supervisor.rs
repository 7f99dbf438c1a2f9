//! The Run Supervisor: expands a base configuration into concrete flows,
//! schedules them across a bounded pool of OS threads, and tallies the
//! run-wide failure budget. See `spec.md` §4.4, §5, and §8.

use crate::cancel::CancelLatch;
use crate::engine::{run_flow, EngineShared};
use crate::expander::expand_flows;
use crate::status::StatusBoard;
use flowctl_core::config::StepType;
use flowctl_core::context::BranchResult;
use flowctl_core::kernel::LlmDefaults;
use flowctl_core::util::rand_suffix;
use flowctl_core::{CliClient, FlowError, LlmClient, StepSpec};
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Period between progress-line redraws, matching `orchestrator.py`'s
/// `monitor()` poll interval.
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Interval the scheduling loop sleeps for while the active-thread pool is
/// saturated at `options.parallel`.
const THROTTLE_POLL: Duration = Duration::from_millis(100);

pub struct SupervisorOptions {
    pub parallel: usize,
    pub max_flow_failures: usize,
    pub halt_on_max_failures: bool,
    /// cwd the external CLI subprocess runs in; `cmd` steps never use this,
    /// they inherit the host process's own cwd (`spec.md` §9).
    pub workdir: PathBuf,
    /// Process-wide generated-outputs root; `run_<rand>` is created
    /// directly under it (`spec.md` §9, "inject as a constructor
    /// parameter").
    pub generated_root: PathBuf,
    /// 0 means unlimited.
    pub max_flows: usize,
    pub print_flow_paths: bool,
    pub list_codex_final_paths: bool,
}

impl SupervisorOptions {
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_flow_failures < 1 {
            return Err(FlowError::Validation(
                "max_flow_failures must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct SupervisorReport {
    pub run_dir: PathBuf,
    pub flow_dirs: Vec<PathBuf>,
    pub total_flows: usize,
    pub failed_flows: usize,
    pub cancelled: bool,
    pub final_message_paths: Vec<PathBuf>,
    /// Every branch's terminal result across every flow, in discovered
    /// (completion) order, per `spec.md` §4.4 step 8.
    pub results: Vec<BranchResult>,
}

struct FlowRecord {
    flow_dir: PathBuf,
    interpolated_paths: Vec<PathBuf>,
    last_step_type: StepType,
}

pub fn orchestrate(
    base_steps: Vec<StepSpec>,
    key_files: &[(String, PathBuf)],
    append_filepath: bool,
    llm: Arc<dyn LlmClient>,
    cli: Arc<dyn CliClient>,
    defaults: LlmDefaults,
    options: SupervisorOptions,
) -> Result<SupervisorReport, FlowError> {
    options.validate()?;

    let mut flows = expand_flows(&base_steps, key_files, append_filepath)?;

    if options.max_flows > 0 && flows.len() > options.max_flows {
        eprintln!(
            "dropping {} of {} expanded flows beyond --max-flows {}",
            flows.len() - options.max_flows,
            flows.len(),
            options.max_flows
        );
        flows.truncate(options.max_flows);
    }
    let total_flows = flows.len();

    fs::create_dir_all(&options.generated_root)?;
    let run_dir = options.generated_root.join(format!("run_{}", rand_suffix()));
    fs::create_dir_all(&run_dir)?;
    let finished_path = run_dir.join("finished.txt");
    fs::write(&finished_path, "")?;

    let cancel = Arc::new(CancelLatch::new());
    let cancel_message_printed = Arc::new(AtomicBool::new(false));
    let failed_flows = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let parallel = options.parallel.max(1);

    let step_names = base_steps.iter().map(StepSpec::display_name).collect();
    let status = Arc::new(StatusBoard::new(step_names));

    let monitor_stop = Arc::new(CancelLatch::new());
    let monitor_handle = spawn_monitor(
        Arc::clone(&status),
        Arc::clone(&finished),
        total_flows,
        Arc::clone(&monitor_stop),
    );

    let finished_lock = Arc::new(Mutex::new(()));
    let failed_flow_paths = Arc::new(Mutex::new(Vec::<String>::new()));
    let final_message_paths = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
    let results = Arc::new(Mutex::new(Vec::<BranchResult>::new()));

    let mut flow_dirs = Vec::with_capacity(total_flows);
    let mut handles = Vec::with_capacity(total_flows);

    for flow in flows {
        while active.load(Ordering::SeqCst) >= parallel {
            if cancel.is_set() {
                break;
            }
            thread::sleep(THROTTLE_POLL);
        }
        if cancel.is_set() {
            break;
        }

        let flow_dir = run_dir.join(format!("flow_{}", rand_suffix()));
        fs::create_dir_all(&flow_dir)?;
        if options.print_flow_paths {
            println!("{}", flow_dir.display());
        }
        flow_dirs.push(flow_dir.clone());

        let last_step_type = flow
            .steps
            .last()
            .map(|s| s.step_type)
            .unwrap_or(StepType::Cmd);
        let record = FlowRecord {
            flow_dir: flow_dir.clone(),
            interpolated_paths: flow.interpolated_paths.clone(),
            last_step_type,
        };

        let shared = Arc::new(EngineShared::new(
            flow.steps,
            Arc::clone(&llm),
            Arc::clone(&cli),
            defaults.clone(),
            Arc::clone(&cancel),
            Arc::clone(&status),
        ));

        active.fetch_add(1, Ordering::SeqCst);
        let active_done = Arc::clone(&active);
        let finished_done = Arc::clone(&finished);
        let finished_lock = Arc::clone(&finished_lock);
        let failed_flows = Arc::clone(&failed_flows);
        let cancel_for_worker = Arc::clone(&cancel);
        let cancel_message_printed = Arc::clone(&cancel_message_printed);
        let failed_flow_paths = Arc::clone(&failed_flow_paths);
        let final_message_paths = Arc::clone(&final_message_paths);
        let results = Arc::clone(&results);
        let finished_path = finished_path.clone();
        let halt_on_max_failures = options.halt_on_max_failures;
        let max_flow_failures = options.max_flow_failures;
        let list_codex_final_paths = options.list_codex_final_paths;

        handles.push(thread::spawn(move || -> Result<(), FlowError> {
            let run_result = run_flow(&shared, record.flow_dir.clone());
            active_done.fetch_sub(1, Ordering::SeqCst);

            let (leaves, flow_failed) = match run_result {
                Ok(leaves) => {
                    let failed = leaves.iter().any(|l| l.failed);
                    (leaves, failed)
                }
                Err(FlowError::Cancelled) => (Vec::new(), true),
                Err(e) => {
                    finished_done.fetch_add(1, Ordering::SeqCst);
                    return Err(e);
                }
            };

            if flow_failed {
                let _ = fs::write(record.flow_dir.join("flow_failed.txt"), "");
                let count = failed_flows.fetch_add(1, Ordering::SeqCst) + 1;
                if halt_on_max_failures && count >= max_flow_failures {
                    cancel_for_worker.set();
                    if !cancel_message_printed.swap(true, Ordering::SeqCst) {
                        println!("Maximum flow failures reached");
                    }
                }
                if !record.interpolated_paths.is_empty() {
                    let joined = record
                        .interpolated_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    failed_flow_paths.lock().unwrap().push(joined);
                }
            }

            if list_codex_final_paths && !flow_failed && record.last_step_type == StepType::Codex {
                for leaf in &leaves {
                    if let Some(path) = &leaf.artifact_path {
                        println!("{}", path.display());
                        final_message_paths.lock().unwrap().push(path.clone());
                    }
                }
            }

            results.lock().unwrap().extend(leaves);

            {
                let _guard = finished_lock.lock().unwrap();
                let status_word = if flow_failed { "failed" } else { "done" };
                let line = if record.interpolated_paths.is_empty() {
                    format!("{status_word}\n")
                } else {
                    let joined = record
                        .interpolated_paths
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(",");
                    format!("{status_word} {joined}\n")
                };
                let mut f = fs::OpenOptions::new()
                    .append(true)
                    .open(&finished_path)
                    .expect("finished.txt must exist");
                let _ = f.write_all(line.as_bytes());
            }

            finished_done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
    }

    for handle in handles {
        if let Err(e) = handle.join().expect("flow thread panicked") {
            monitor_stop.set();
            monitor_handle.join().expect("monitor thread panicked");
            return Err(e);
        }
    }

    monitor_stop.set();
    monitor_handle.join().expect("monitor thread panicked");

    let failed_count = failed_flows.load(Ordering::SeqCst);

    let manifest_lines = failed_flow_paths.lock().unwrap().clone();
    if !manifest_lines.is_empty() {
        fs::write(run_dir.join("failed_files"), manifest_lines.join("\n") + "\n")?;
    }

    let report = SupervisorReport {
        run_dir,
        flow_dirs,
        total_flows,
        failed_flows: failed_count,
        cancelled: cancel.is_set(),
        final_message_paths: final_message_paths.lock().unwrap().clone(),
        results: Arc::try_unwrap(results)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|arc| arc.lock().unwrap().clone()),
    };

    if options.halt_on_max_failures && failed_count >= options.max_flow_failures {
        return Err(FlowError::MaxFlowFailuresExceeded);
    }

    Ok(report)
}

/// Prints the aggregate per-step active-worker line every `MONITOR_INTERVAL`
/// until `stop` is set, then prints one final line with a trailing newline.
/// Format matches `orchestrator.py`'s `monitor()`: `"{name}: {count}"` parts
/// joined by `" -> "`, extended with a `| {finished}/{total}` suffix.
fn spawn_monitor(
    status: Arc<StatusBoard>,
    finished: Arc<AtomicUsize>,
    total_flows: usize,
    stop: Arc<CancelLatch>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let render = || {
            let parts: Vec<String> = status
                .snapshot()
                .into_iter()
                .map(|(name, count)| format!("{name}: {count}"))
                .collect();
            format!(
                "{} | {}/{total_flows}",
                parts.join(" -> "),
                finished.load(Ordering::SeqCst)
            )
        };

        while !stop.is_set() {
            print!("{}\r", render());
            let _ = std::io::stdout().flush();
            thread::sleep(MONITOR_INTERVAL);
        }
        println!("{}", render());
    })
}
