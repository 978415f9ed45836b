use serde::Deserialize;

/// Configuration for the Codeforces API client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeforcesConfig {
    /// API base URL. Overridable for tests against a local stub.
    pub api_base: String,
    /// Minimum spacing between any two outbound API calls, process-wide.
    pub min_call_interval_ms: u64,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// How many of a handle's most recent submissions one verdict check
    /// inspects. Not full history.
    pub submission_window: u32,
}

impl Default for CodeforcesConfig {
    fn default() -> Self {
        Self {
            api_base: "https://codeforces.com/api".to_string(),
            min_call_interval_ms: 600,
            request_timeout_secs: 10,
            submission_window: 20,
        }
    }
}
