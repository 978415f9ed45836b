use serde::{Deserialize, Serialize};

/// A problem assigned to a room. Immutable once attached: selected at
/// room-create time and never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDescriptor {
    pub contest_id: u32,
    /// Single-letter problem index within the contest ("A".."F").
    pub index: String,
    /// Unique key: contest id + index, e.g. "1234A".
    pub problem_id: String,
    pub name: String,
    pub rating: u32,
    pub tags: Vec<String>,
    pub url: String,
}

impl ProblemDescriptor {
    pub fn new(
        contest_id: u32,
        index: impl Into<String>,
        name: impl Into<String>,
        rating: u32,
        tags: Vec<String>,
    ) -> Self {
        let index = index.into();
        Self {
            problem_id: format!("{contest_id}{index}"),
            url: format!("https://codeforces.com/problemset/problem/{contest_id}/{index}"),
            contest_id,
            index,
            name: name.into(),
            rating,
            tags,
        }
    }

    /// Known-good problem used when the upstream problem lookup fails.
    /// Keeps room creation available during outages at the cost of
    /// occasionally issuing a stale or duplicate problem.
    pub fn fallback() -> Self {
        Self::new(
            4,
            "A",
            "Watermelon",
            800,
            vec!["math".to_string(), "brute force".to_string()],
        )
    }
}
