//! `StatusBoard`: the per-step active-worker counters read by the progress
//! monitor and mutated by the Flow Engine. See `spec.md` §9 design notes.

use std::sync::Mutex;

pub struct StatusBoard {
    counts: Mutex<Vec<i64>>,
    names: Vec<String>,
}

impl StatusBoard {
    pub fn new(names: Vec<String>) -> Self {
        let counts = Mutex::new(vec![0i64; names.len()]);
        Self { counts, names }
    }

    pub fn inc(&self, idx: usize) {
        let mut counts = self.counts.lock().unwrap();
        counts[idx] += 1;
    }

    pub fn dec(&self, idx: usize) {
        let mut counts = self.counts.lock().unwrap();
        counts[idx] -= 1;
    }

    /// A consistent `(name, count)` snapshot taken under one lock
    /// acquisition, never held across I/O.
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        let counts = self.counts.lock().unwrap();
        self.names.iter().cloned().zip(counts.iter().copied()).collect()
    }

    /// All counters are zero — used by tests to check the "every active
    /// counter returns to zero" invariant.
    pub fn all_zero(&self) -> bool {
        self.counts.lock().unwrap().iter().all(|&c| c == 0)
    }
}

/// Increments `idx` on construction, decrements on drop — guarantees the
/// counter returns to baseline on every exit path, success or error.
pub struct ActiveGuard<'a> {
    board: &'a StatusBoard,
    idx: usize,
}

impl<'a> ActiveGuard<'a> {
    pub fn enter(board: &'a StatusBoard, idx: usize) -> Self {
        board.inc(idx);
        Self { board, idx }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.board.dec(self.idx);
    }
}
