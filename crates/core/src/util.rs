//! Small shared helpers.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// A short random, lowercase alphanumeric suffix used for `run_<rand>`,
/// `flow_<rand>`, and `codex_exec_<rand>` directory names, matching the
/// teacher's `ferri-automation::jobs::generate_job_id` pattern.
pub fn rand_suffix() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
