//! External CLI adapter: invokes `codex exec`, streaming its stdout to a
//! log file and collecting stderr, with manual timeout-by-polling since
//! `std::process::Child` has no native wait-with-timeout. Recovered from
//! the pre-Rust orchestrator's `run_codex_cli` helper.

use flowctl_core::util::rand_suffix;
use flowctl_core::{CliClient, FlowError};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub struct CodexAdapter {
    /// Fixed subprocess cwd for every call, set once from the run's
    /// `--workdir`; `cmd` steps never use this (`spec.md` §9).
    workdir: PathBuf,
    max_retries: u32,
    timeout: Option<Duration>,
}

impl CodexAdapter {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            workdir,
            max_retries: 3,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl CliClient for CodexAdapter {
    fn call(&self, prompt: &str, curr_dir: &Path) -> Result<(String, PathBuf), FlowError> {
        for attempt in 0..self.max_retries {
            let run_dir = curr_dir.join(format!("codex_exec_{}", rand_suffix()));
            fs::create_dir_all(&run_dir)?;
            let output_path = run_dir.join("final_message.txt");
            let stdout_path = run_dir.join("stdout.txt");
            let time_path = run_dir.join("time.txt");

            let mut child: Child = Command::new("codex")
                .arg("exec")
                .arg("--skip-git-repo-check")
                .arg("-C")
                .arg(&self.workdir)
                .arg("--output-last-message")
                .arg(&output_path)
                .arg(prompt)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()?;

            let stdout = child.stdout.take().expect("codex child stdout is piped");
            let stderr = child.stderr.take().expect("codex child stderr is piped");
            let stdout_file = fs::File::create(&stdout_path)?;

            let stdout_handle = thread::spawn(move || stream_stdout(stdout, stdout_file));
            let stderr_handle = thread::spawn(move || collect_stderr(stderr));

            let start = Instant::now();
            let status = loop {
                if let Some(status) = child.try_wait()? {
                    break Some(status);
                }
                if let Some(limit) = self.timeout {
                    if start.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                }
                thread::sleep(Duration::from_millis(50));
            };

            stdout_handle.join().expect("stdout reader thread panicked");
            let stderr_lines = stderr_handle.join().expect("stderr reader thread panicked");

            let status = match status {
                Some(status) => status,
                None => {
                    if attempt + 1 == self.max_retries {
                        return Err(FlowError::Timeout {
                            attempts: self.max_retries,
                        });
                    }
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };

            if !status.success() {
                let message = if stderr_lines.is_empty() {
                    status.code().map(|c| c.to_string()).unwrap_or_default()
                } else {
                    stderr_lines.concat()
                };
                return Err(FlowError::step_failure(0, "codex", message, status.code()));
            }

            if output_path.exists() {
                let message = fs::read_to_string(&output_path)?;
                return Ok((message, output_path));
            }
            if stdout_path.exists() {
                let message = fs::read_to_string(&stdout_path)?;
                fs::write(&output_path, &message)?;
                fs::write(
                    &time_path,
                    format!(
                        "{}\n{:.3}\n",
                        status.code().unwrap_or(0),
                        start.elapsed().as_secs_f64()
                    ),
                )?;
                return Ok((message, output_path));
            }
            return Err(FlowError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "codex CLI produced no final message file or stdout output",
            )));
        }

        unreachable!("retry loop always returns or raises")
    }
}

fn stream_stdout(reader: ChildStdout, mut file: fs::File) {
    let reader = BufReader::new(reader);
    for line in reader.lines().map_while(Result::ok) {
        let _ = writeln!(file, "{line}");
    }
}

fn collect_stderr(reader: ChildStderr) -> Vec<String> {
    let reader = BufReader::new(reader);
    reader
        .lines()
        .map_while(Result::ok)
        .map(|l| format!("{l}\n"))
        .collect()
}
