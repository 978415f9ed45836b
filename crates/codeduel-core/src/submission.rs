use serde::{Deserialize, Serialize};

/// An accepted submission observed on the external judge. Created exactly
/// once per completed room and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedSubmission {
    /// Submission id on the external judge.
    pub submission_id: u64,
    pub verdict: String,
    pub problem_id: String,
    pub time_ms: u64,
    pub memory_bytes: u64,
    pub language: String,
    /// Epoch milliseconds.
    pub submitted_at: u64,
}

/// Canonical link to a submission on Codeforces.
pub fn submission_url(contest_id: u32, submission_id: u64) -> String {
    format!("https://codeforces.com/contest/{contest_id}/submission/{submission_id}")
}
