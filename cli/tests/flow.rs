//! End-to-end CLI tests exercising `flowctl` against real subprocesses.
//! Mirrors the scenarios in `spec.md` §8.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn run_dir(base: &Path) -> std::path::PathBuf {
    let generated = base.join("generated");
    let mut runs: Vec<_> = fs::read_dir(&generated)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(runs.len(), 1, "expected exactly one run dir under {generated:?}");
    runs.pop().unwrap()
}

fn flow_dirs(run_dir: &Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(run_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("flow_"))
                .unwrap_or(false)
        })
        .collect()
}

#[test]
fn array_fan_out_shell_backend() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"[
            {"type": "cmd", "cmd": "printf '[\"a\",\"b\"]'", "array": true},
            {"type": "cmd", "cmd": "cat"}
        ]"#,
    )
    .unwrap();

    Command::cargo_bin("flowctl")
        .unwrap()
        .current_dir(dir.path())
        .args(["config.json", "--workdir", "."])
        .assert()
        .success();

    let run = run_dir(dir.path());
    let flows = flow_dirs(&run);
    assert_eq!(flows.len(), 1);
    let flow_dir = &flows[0];

    assert!(!flow_dir.join("flow_failed.txt").exists());
    let step0 = fs::read_to_string(flow_dir.join("step_0_cmd.txt")).unwrap();
    assert_eq!(step0.trim(), r#"["a","b"]"#);

    let mut branch_outputs: Vec<String> = (0..2)
        .map(|k| {
            fs::read_to_string(flow_dir.join(format!("branch_{k}/step_1_cmd.txt")))
                .unwrap()
                .trim()
                .to_string()
        })
        .collect();
    branch_outputs.sort();
    assert_eq!(branch_outputs, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn explicit_inputs_reorder_step_outputs() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"[
            {"type": "cmd", "cmd": "printf alpha", "name": "first"},
            {"type": "cmd", "cmd": "printf beta", "name": "second"},
            {"type": "cmd", "cmd": "cat", "inputs": ["second", "first"]}
        ]"#,
    )
    .unwrap();

    Command::cargo_bin("flowctl")
        .unwrap()
        .current_dir(dir.path())
        .args(["config.json", "--workdir", "."])
        .assert()
        .success();

    let run = run_dir(dir.path());
    let flows = flow_dirs(&run);
    let step2 = fs::read_to_string(flows[0].join("step_2_cmd.txt")).unwrap();
    assert_eq!(step2, "beta\nalpha");
}

#[test]
fn empty_response_triggers_clean_early_exit() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(
        &config,
        r#"[
            {"type": "cmd", "cmd": "printf ''", "exit_on_empty_response": true, "name": "empty_step"},
            {"type": "cmd", "cmd": "printf done > sentinel"}
        ]"#,
    )
    .unwrap();

    Command::cargo_bin("flowctl")
        .unwrap()
        .current_dir(dir.path())
        .args(["config.json", "--workdir", "."])
        .assert()
        .success();

    assert!(!dir.path().join("sentinel").exists());

    let run = run_dir(dir.path());
    let flows = flow_dirs(&run);
    assert!(!flows[0].join("flow_failed.txt").exists());
    let log = fs::read_to_string(flows[0].join("step_0_early_exit.txt")).unwrap();
    assert!(log.contains("empty_step produced an empty response."));
}

#[test]
fn failure_budget_halts_run_and_exits_nonzero() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, r#"[{"type": "cmd", "cmd": "false"}]"#).unwrap();

    let manifest = dir.path().join("manifest.txt");
    let mut lines = Vec::new();
    for i in 0..4 {
        let f = dir.path().join(format!("f{i}.txt"));
        fs::write(&f, "x").unwrap();
        lines.push(f.display().to_string());
    }
    fs::write(&manifest, lines.join("\n")).unwrap();

    Command::cargo_bin("flowctl")
        .unwrap()
        .current_dir(dir.path())
        .args([
            "config.json",
            "--workdir",
            ".",
            "--parallel",
            "2",
            "--max-flow-failures",
            "2",
            "--key",
            &format!("name:{}", manifest.display()),
        ])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Maximum flow failures reached"));
}

#[test]
fn malformed_key_flag_is_rejected_before_any_work() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, r#"[{"type": "cmd", "cmd": "echo hi"}]"#).unwrap();

    Command::cargo_bin("flowctl")
        .unwrap()
        .current_dir(dir.path())
        .args(["config.json", "--workdir", ".", "--key", "no-colon-here"])
        .assert()
        .failure();

    assert!(!dir.path().join("generated").exists());
}
