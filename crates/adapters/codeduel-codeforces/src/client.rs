use std::time::Duration;

use serde::Deserialize;

use codeduel_core::judge::{JudgeClient, ProblemSelection, SubmissionCheck};
use codeduel_core::problem::ProblemDescriptor;
use codeduel_core::submission::AcceptedSubmission;

use crate::config::CodeforcesConfig;
use crate::rate_gate::RateGate;

/// Rate-limited client for the Codeforces API.
///
/// Every outbound call funnels through one [`RateGate`], so a single client
/// instance should be shared across the whole process.
pub struct CodeforcesClient {
    http: reqwest::Client,
    gate: RateGate,
    config: CodeforcesConfig,
}

/// Envelope wrapping every Codeforces API response.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct ApiResponse<T> {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Option<T>,
}

/// Partial response for `problemset.problems`.
#[derive(Debug, Deserialize)]
struct ProblemsetResult {
    problems: Vec<CfProblem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfProblem {
    #[serde(default)]
    contest_id: Option<u32>,
    index: String,
    name: String,
    #[serde(rename = "type")]
    problem_type: String,
    #[serde(default)]
    rating: Option<u32>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfSubmission {
    id: u64,
    creation_time_seconds: u64,
    problem: CfProblem,
    /// Absent while the submission is still testing.
    #[serde(default)]
    verdict: Option<String>,
    programming_language: String,
    #[serde(default)]
    time_consumed_millis: u64,
    #[serde(default)]
    memory_consumed_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct CfUser {
    #[allow(dead_code)]
    handle: String,
}

impl CodeforcesClient {
    pub fn new(config: CodeforcesConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("codeduel/0.1")
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        let gate = RateGate::new(Duration::from_millis(config.min_call_interval_ms));
        Self { http, gate, config }
    }

    /// Paced GET returning the unwrapped `result` payload.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, String> {
        self.gate.acquire().await;

        let url = format!("{}/{method}", self.config.api_base);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            return Err(format!("Codeforces API returned {}", resp.status()));
        }

        let body: ApiResponse<T> = resp.json().await.map_err(|e| e.to_string())?;
        if body.status != "OK" {
            return Err(body
                .comment
                .unwrap_or_else(|| "API returned non-OK status".to_string()));
        }
        body.result
            .ok_or_else(|| "API response missing result".to_string())
    }
}

impl JudgeClient for CodeforcesClient {
    /// Uniform-random pick among eligible problems; degrades to the fixed
    /// fallback on upstream failure or an empty eligible set so room
    /// creation stays available during outages.
    async fn lookup_problem(&self, min_rating: u32, max_rating: u32) -> ProblemSelection {
        match self
            .get_json::<ProblemsetResult>("problemset.problems", &[])
            .await
        {
            Ok(set) => {
                let eligible: Vec<CfProblem> = set
                    .problems
                    .into_iter()
                    .filter(|p| is_eligible(p, min_rating, max_rating))
                    .collect();
                match pick_uniform(&eligible).and_then(to_descriptor) {
                    Some(problem) => {
                        tracing::info!(
                            problem = %problem.problem_id,
                            rating = problem.rating,
                            candidates = eligible.len(),
                            "Selected problem"
                        );
                        ProblemSelection::Live(problem)
                    },
                    None => {
                        tracing::warn!(
                            min_rating,
                            max_rating,
                            "No eligible problems in rating window, using fallback"
                        );
                        ProblemSelection::Fallback(ProblemDescriptor::fallback())
                    },
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Problem lookup failed, using fallback");
                ProblemSelection::Fallback(ProblemDescriptor::fallback())
            },
        }
    }

    async fn verify_handle(&self, handle: &str) -> bool {
        match self
            .get_json::<Vec<CfUser>>("user.info", &[("handles", handle.to_string())])
            .await
        {
            Ok(users) => !users.is_empty(),
            Err(e) => {
                tracing::warn!(handle, error = %e, "Handle verification failed");
                false
            },
        }
    }

    /// Inspect the handle's most recent submissions for an accepted verdict
    /// on `problem_id` at or after `after_ms`. Upstream failures come back
    /// as `QueryFailed`; callers retry on the next poll tick either way.
    async fn check_recent_accept(
        &self,
        handle: &str,
        problem_id: &str,
        after_ms: u64,
    ) -> SubmissionCheck {
        let query = [
            ("handle", handle.to_string()),
            ("from", "1".to_string()),
            ("count", self.config.submission_window.to_string()),
        ];
        match self.get_json::<Vec<CfSubmission>>("user.status", &query).await {
            Ok(submissions) => match first_accepted(&submissions, problem_id, after_ms) {
                Some(sub) => SubmissionCheck::Accepted(sub),
                None => SubmissionCheck::NoMatch,
            },
            Err(reason) => {
                tracing::warn!(
                    handle,
                    problem = problem_id,
                    error = %reason,
                    "Submission query failed"
                );
                SubmissionCheck::QueryFailed(reason)
            },
        }
    }
}

/// Eligibility filter for duel problems: rated within `[min, max)`,
/// plain programming problems with a single-letter index, nothing
/// interactive or special.
fn is_eligible(p: &CfProblem, min_rating: u32, max_rating: u32) -> bool {
    let Some(rating) = p.rating else { return false };
    p.contest_id.is_some()
        && p.problem_type == "PROGRAMMING"
        && p.index.len() == 1
        && rating >= min_rating
        && rating < max_rating
        && !p.tags.iter().any(|t| t == "interactive" || t == "*special")
}

fn pick_uniform(eligible: &[CfProblem]) -> Option<&CfProblem> {
    use rand::Rng;
    if eligible.is_empty() {
        return None;
    }
    let mut rng = rand::rng();
    Some(&eligible[rng.random_range(0..eligible.len())])
}

fn to_descriptor(p: &CfProblem) -> Option<ProblemDescriptor> {
    let contest_id = p.contest_id?;
    Some(ProblemDescriptor::new(
        contest_id,
        p.index.clone(),
        p.name.clone(),
        p.rating.unwrap_or(0),
        p.tags.clone(),
    ))
}

/// First submission matching `problem_id`, submitted at or after `after_ms`,
/// with an accepted verdict. Matching submissions with other verdicts are
/// observed but never reported upward.
fn first_accepted(
    submissions: &[CfSubmission],
    problem_id: &str,
    after_ms: u64,
) -> Option<AcceptedSubmission> {
    for sub in submissions {
        let Some(contest_id) = sub.problem.contest_id else {
            continue;
        };
        let sub_problem_id = format!("{contest_id}{}", sub.problem.index);
        let submitted_at = sub.creation_time_seconds * 1000;
        if sub_problem_id != problem_id || submitted_at < after_ms {
            continue;
        }

        if sub.verdict.as_deref() == Some("OK") {
            return Some(AcceptedSubmission {
                submission_id: sub.id,
                verdict: "OK".to_string(),
                problem_id: sub_problem_id,
                time_ms: sub.time_consumed_millis,
                memory_bytes: sub.memory_consumed_bytes,
                language: sub.programming_language.clone(),
                submitted_at,
            });
        }

        tracing::debug!(
            submission = sub.id,
            verdict = sub.verdict.as_deref().unwrap_or("TESTING"),
            "Matching submission without accepted verdict"
        );
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(contest_id: u32, index: &str, rating: u32, tags: &[&str]) -> CfProblem {
        CfProblem {
            contest_id: Some(contest_id),
            index: index.to_string(),
            name: format!("Problem {index}"),
            problem_type: "PROGRAMMING".to_string(),
            rating: Some(rating),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn submission(
        id: u64,
        contest_id: u32,
        index: &str,
        verdict: Option<&str>,
        creation_secs: u64,
    ) -> CfSubmission {
        CfSubmission {
            id,
            creation_time_seconds: creation_secs,
            problem: problem(contest_id, index, 1200, &[]),
            verdict: verdict.map(|v| v.to_string()),
            programming_language: "GNU C++17".to_string(),
            time_consumed_millis: 100,
            memory_consumed_bytes: 1024,
        }
    }

    #[test]
    fn eligibility_rating_window_is_half_open() {
        assert!(is_eligible(&problem(1, "A", 800, &[]), 800, 1200));
        assert!(is_eligible(&problem(1, "A", 1199, &[]), 800, 1200));
        assert!(!is_eligible(&problem(1, "A", 1200, &[]), 800, 1200));
        assert!(!is_eligible(&problem(1, "A", 799, &[]), 800, 1200));
    }

    #[test]
    fn eligibility_excludes_special_shapes() {
        // Interactive and special-tagged problems are skipped
        assert!(!is_eligible(
            &problem(1, "A", 1000, &["interactive"]),
            800,
            1200
        ));
        assert!(!is_eligible(&problem(1, "A", 1000, &["*special"]), 800, 1200));

        // Multi-letter indices (A1, B2 subproblems) are skipped
        assert!(!is_eligible(&problem(1, "A1", 1000, &[]), 800, 1200));

        // Non-programming problems are skipped
        let mut quiz = problem(1, "A", 1000, &[]);
        quiz.problem_type = "QUESTION".to_string();
        assert!(!is_eligible(&quiz, 800, 1200));

        // Unrated or contest-less problems are skipped
        let mut unrated = problem(1, "A", 1000, &[]);
        unrated.rating = None;
        assert!(!is_eligible(&unrated, 800, 1200));
        let mut orphan = problem(1, "A", 1000, &[]);
        orphan.contest_id = None;
        assert!(!is_eligible(&orphan, 800, 1200));
    }

    #[test]
    fn pick_uniform_empty_is_none() {
        assert!(pick_uniform(&[]).is_none());
        let one = [problem(1, "A", 1000, &[])];
        assert_eq!(pick_uniform(&one).unwrap().index, "A");
    }

    #[test]
    fn first_accepted_returns_matching_ok() {
        let subs = [
            submission(3, 99, "B", Some("OK"), 2_000), // wrong problem
            submission(2, 42, "A", Some("OK"), 2_000),
            submission(1, 42, "A", Some("OK"), 1_500),
        ];
        let hit = first_accepted(&subs, "42A", 1_000_000).unwrap();
        assert_eq!(hit.submission_id, 2);
        assert_eq!(hit.problem_id, "42A");
        assert_eq!(hit.submitted_at, 2_000_000);
        assert_eq!(hit.language, "GNU C++17");
    }

    #[test]
    fn first_accepted_respects_cutoff() {
        // Submitted before the match started: not counted
        let subs = [submission(1, 42, "A", Some("OK"), 999)];
        assert!(first_accepted(&subs, "42A", 1_000_000).is_none());

        // Exactly at the cutoff: counted
        let subs = [submission(1, 42, "A", Some("OK"), 1_000)];
        assert!(first_accepted(&subs, "42A", 1_000_000).is_some());
    }

    #[test]
    fn first_accepted_ignores_rejections_and_pending() {
        let subs = [
            submission(1, 42, "A", Some("WRONG_ANSWER"), 2_000),
            submission(2, 42, "A", None, 2_100), // still testing
            submission(3, 42, "A", Some("TIME_LIMIT_EXCEEDED"), 2_200),
        ];
        assert!(first_accepted(&subs, "42A", 1_000_000).is_none());
    }

    #[test]
    fn response_envelope_parses() {
        let raw = r#"{"status":"FAILED","comment":"handle: User not found"}"#;
        let resp: ApiResponse<Vec<CfUser>> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.status, "FAILED");
        assert_eq!(resp.comment.as_deref(), Some("handle: User not found"));
        assert!(resp.result.is_none());
    }

    #[test]
    fn submission_json_parses() {
        let raw = r#"{
            "id": 987654,
            "contestId": 4,
            "creationTimeSeconds": 1700000000,
            "problem": {"contestId": 4, "index": "A", "name": "Watermelon",
                        "type": "PROGRAMMING", "rating": 800, "tags": ["math"]},
            "verdict": "OK",
            "programmingLanguage": "Rust 2021",
            "timeConsumedMillis": 62,
            "memoryConsumedBytes": 204800
        }"#;
        let sub: CfSubmission = serde_json::from_str(raw).unwrap();
        assert_eq!(sub.id, 987654);
        assert_eq!(sub.problem.contest_id, Some(4));
        assert_eq!(sub.verdict.as_deref(), Some("OK"));

        let hit = first_accepted(std::slice::from_ref(&sub), "4A", 0).unwrap();
        assert_eq!(hit.time_ms, 62);
        assert_eq!(hit.memory_bytes, 204_800);
    }
}
