//! Scripted [`JudgeClient`] for tests. Enabled via the `test-helpers`
//! feature so downstream crates can drive the engine without network I/O.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::judge::{JudgeClient, ProblemSelection, SubmissionCheck};
use crate::problem::ProblemDescriptor;

/// Deterministic judge double. Problem selection and handle verification
/// are fixed up front; verdict checks pop scripted results per handle and
/// fall back to a default once the script runs dry.
pub struct StubJudge {
    selection: ProblemSelection,
    rejected_handles: HashSet<String>,
    scripted: Mutex<HashMap<String, VecDeque<SubmissionCheck>>>,
    default_check: SubmissionCheck,
    check_calls: AtomicUsize,
}

impl Default for StubJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl StubJudge {
    pub fn new() -> Self {
        Self {
            selection: ProblemSelection::Live(ProblemDescriptor::fallback()),
            rejected_handles: HashSet::new(),
            scripted: Mutex::new(HashMap::new()),
            default_check: SubmissionCheck::NoMatch,
            check_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_problem(mut self, problem: ProblemDescriptor) -> Self {
        self.selection = ProblemSelection::Live(problem);
        self
    }

    pub fn with_fallback_problem(mut self) -> Self {
        self.selection = ProblemSelection::Fallback(ProblemDescriptor::fallback());
        self
    }

    /// Make `verify_handle` return false for this handle.
    pub fn reject_handle(mut self, handle: &str) -> Self {
        self.rejected_handles.insert(handle.to_string());
        self
    }

    /// Result returned for a handle once its script is exhausted.
    pub fn with_default_check(mut self, check: SubmissionCheck) -> Self {
        self.default_check = check;
        self
    }

    /// Queue the next verdict-check result for a handle (FIFO).
    pub fn push_check(&self, handle: &str, check: SubmissionCheck) {
        self.scripted
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default()
            .push_back(check);
    }

    /// Total `check_recent_accept` calls observed.
    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::Relaxed)
    }
}

impl JudgeClient for StubJudge {
    async fn lookup_problem(&self, _min_rating: u32, _max_rating: u32) -> ProblemSelection {
        self.selection.clone()
    }

    async fn verify_handle(&self, handle: &str) -> bool {
        !self.rejected_handles.contains(handle)
    }

    async fn check_recent_accept(
        &self,
        handle: &str,
        _problem_id: &str,
        _after_ms: u64,
    ) -> SubmissionCheck {
        self.check_calls.fetch_add(1, Ordering::Relaxed);
        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(handle)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or_else(|| self.default_check.clone())
    }
}
