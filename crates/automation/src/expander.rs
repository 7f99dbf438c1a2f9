//! The Flow Expander: compiles a base configuration plus named manifests
//! into the cartesian product of concrete flows. See `spec.md` §4.3.

use flowctl_core::config::FlowConfig;
use flowctl_core::placeholders::substitute;
use flowctl_core::{FlowError, StepSpec};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads a UTF-8 manifest file: one source path per line, empty lines
/// ignored.
fn read_manifest(path: &Path) -> Result<Vec<PathBuf>, FlowError> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Expands `base` into one flow per combination of key manifests and
/// per-step `stdin_file` manifests. `key_files` must be in CLI declaration
/// order — that order becomes the leading axes of `interpolated_paths`.
pub fn expand_flows(
    base: &[StepSpec],
    key_files: &[(String, PathBuf)],
    append_filepath: bool,
) -> Result<Vec<FlowConfig>, FlowError> {
    if key_files.is_empty() {
        return Ok(vec![FlowConfig {
            steps: base.to_vec(),
            interpolated_paths: Vec::new(),
        }]);
    }

    // --- Key axes ---
    let mut key_axes: Vec<(String, Vec<(PathBuf, String)>)> = Vec::new();
    for (key, manifest_path) in key_files {
        let mut values = Vec::new();
        for source_path in read_manifest(manifest_path)? {
            let mut text = fs::read_to_string(&source_path)?;
            if append_filepath {
                text = format!("{}\n{}", text, source_path.display());
            }
            values.push((source_path, text));
        }
        key_axes.push((key.clone(), values));
    }

    let key_combos = cartesian(&key_axes.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>());

    let mut flows = Vec::new();
    for combo in &key_combos {
        let bindings: Vec<(String, String)> = key_axes
            .iter()
            .zip(combo.iter())
            .map(|((name, _), (_, text))| (name.clone(), text.clone()))
            .collect();
        let key_paths: Vec<PathBuf> = combo.iter().map(|(p, _)| p.clone()).collect();

        let substituted_steps: Vec<StepSpec> =
            base.iter().map(|s| substitute_step(s, &bindings)).collect();

        // --- Per-step stdin axes, resolved after key substitution ---
        let stdin_axis_steps: Vec<usize> = substituted_steps
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.stdin_file.as_ref().map(|_| i))
            .collect();

        let mut stdin_axes: Vec<Vec<PathBuf>> = Vec::new();
        for &i in &stdin_axis_steps {
            let manifest_path = substituted_steps[i].stdin_file.clone().unwrap();
            stdin_axes.push(read_manifest(&manifest_path)?);
        }

        let stdin_combos = cartesian(&stdin_axes);

        for stdin_combo in &stdin_combos {
            let mut flow_steps = substituted_steps.clone();
            let mut interpolated_paths = key_paths.clone();

            for (&step_i, path) in stdin_axis_steps.iter().zip(stdin_combo.iter()) {
                flow_steps[step_i].stdin_file = Some(path.clone());
                interpolated_paths.push(path.clone());
            }

            for step in &mut flow_steps {
                if let Some(prmpt_file) = &step.prmpt_file {
                    let content = fs::read_to_string(prmpt_file)?;
                    step.prompt = Some(substitute(&content, &bindings));
                }
            }

            flows.push(FlowConfig {
                steps: flow_steps,
                interpolated_paths,
            });
        }
    }

    Ok(flows)
}

fn substitute_step(step: &StepSpec, bindings: &[(String, String)]) -> StepSpec {
    let mut out = step.clone();
    out.prompt = out.prompt.map(|p| substitute(&p, bindings));
    out.cmd = out.cmd.map(|c| substitute(&c, bindings));
    out.prmpt_file = out
        .prmpt_file
        .map(|p| PathBuf::from(substitute(&p.to_string_lossy(), bindings)));
    out.stdin_file = out
        .stdin_file
        .map(|p| PathBuf::from(substitute(&p.to_string_lossy(), bindings)));
    out
}

/// The cartesian product of N axes, preserving axis order in each output
/// combination. An empty `axes` list yields a single empty combination (the
/// identity element), matching how a flow with zero `stdin_file` steps
/// should still produce exactly one stdin combo per key combo.
fn cartesian<T: Clone>(axes: &[Vec<T>]) -> Vec<Vec<T>> {
    axes.iter().fold(vec![Vec::new()], |acc, axis| {
        let mut next = Vec::with_capacity(acc.len() * axis.len().max(1));
        for prefix in &acc {
            for value in axis {
                let mut combo = prefix.clone();
                combo.push(value.clone());
                next.push(combo);
            }
        }
        next
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowctl_core::config::StepType;
    use tempfile::tempdir;

    fn step(step_type: StepType) -> StepSpec {
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

    #[test]
    fn empty_key_files_yields_single_flow() {
        let base = vec![step(StepType::Cmd)];
        let flows = expand_flows(&base, &[], false).unwrap();
        assert_eq!(flows.len(), 1);
        assert!(flows[0].interpolated_paths.is_empty());
    }

    #[test]
    fn cartesian_product_across_one_key_axis() {
        let dir = tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        fs::write(&file_a, "alpha").unwrap();
        fs::write(&file_b, "beta").unwrap();

        let manifest = dir.path().join("manifest.txt");
        fs::write(&manifest, format!("{}\n{}\n", file_a.display(), file_b.display())).unwrap();

        let mut base_step = step(StepType::Cmd);
        base_step.cmd = Some("echo {{{name}}}".to_string());
        let base = vec![base_step];

        let flows = expand_flows(&base, &[("name".to_string(), manifest)], false).unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].steps[0].cmd.as_deref(), Some("echo alpha"));
        assert_eq!(flows[1].steps[0].cmd.as_deref(), Some("echo beta"));
        assert_eq!(flows[0].interpolated_paths, vec![file_a.clone()]);
        assert_eq!(flows[1].interpolated_paths, vec![file_b.clone()]);
    }

    #[test]
    fn deterministic_order_across_repeated_runs() {
        let dir = tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        fs::write(&file_a, "alpha").unwrap();
        let manifest = dir.path().join("manifest.txt");
        fs::write(&manifest, format!("{}\n", file_a.display())).unwrap();

        let base = vec![step(StepType::Cmd)];
        let key_files = vec![("name".to_string(), manifest)];
        let first = expand_flows(&base, &key_files, false).unwrap();
        let second = expand_flows(&base, &key_files, false).unwrap();
        assert_eq!(
            first[0].interpolated_paths,
            second[0].interpolated_paths
        );
    }
}
