use std::future::Future;

use crate::problem::ProblemDescriptor;
use crate::submission::AcceptedSubmission;

/// Result of a problem lookup. The degraded branch is explicit so callers
/// and logs can tell a live selection from the hardcoded fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ProblemSelection {
    /// Selected live from the upstream problem set.
    Live(ProblemDescriptor),
    /// Upstream failed or had no eligible candidates; fixed fallback issued.
    Fallback(ProblemDescriptor),
}

impl ProblemSelection {
    pub fn descriptor(&self) -> &ProblemDescriptor {
        match self {
            Self::Live(p) | Self::Fallback(p) => p,
        }
    }

    pub fn into_descriptor(self) -> ProblemDescriptor {
        match self {
            Self::Live(p) | Self::Fallback(p) => p,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// Result of one recent-accept check for a handle.
///
/// `NoMatch` and `QueryFailed` are retried identically by the caller (the
/// next poll tick covers both); they are distinct variants so logging and
/// metrics can tell upstream flakiness from a match still in play.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionCheck {
    /// No accepted submission for the problem since the cutoff.
    NoMatch,
    /// First accepted submission matching problem and cutoff.
    Accepted(AcceptedSubmission),
    /// The upstream query failed (timeout, non-OK status, bad handle).
    QueryFailed(String),
}

/// Client for the external judge service that issues problems and rules on
/// submissions. The engine is generic over this seam; the production
/// implementation lives in the codeduel-codeforces adapter.
pub trait JudgeClient: Send + Sync + 'static {
    /// Select a problem with rating in `[min_rating, max_rating)`. Never
    /// fails: upstream trouble degrades to `ProblemSelection::Fallback`.
    fn lookup_problem(
        &self,
        min_rating: u32,
        max_rating: u32,
    ) -> impl Future<Output = ProblemSelection> + Send;

    /// True only if the upstream service affirms the handle exists.
    fn verify_handle(&self, handle: &str) -> impl Future<Output = bool> + Send;

    /// Look for an accepted submission by `handle` on `problem_id` at or
    /// after `after_ms` (epoch milliseconds), within the handle's most
    /// recent submissions.
    fn check_recent_accept(
        &self,
        handle: &str,
        problem_id: &str,
        after_ms: u64,
    ) -> impl Future<Output = SubmissionCheck> + Send;
}
