//! GitHub API client
//!
//! REST for issue comments (the report lives in one), GraphQL for review
//! threads (unresolved bot findings). Implements the [`ReportSink`] and
//! [`ReviewToolHost`] seams so the engine never talks HTTP directly.
//!
//! Error bodies are sanitized before they reach logs or reports.

use crate::publish::{parse_sequence, ExistingReport, ReportSink};
use crate::review::{ReviewToolHost, ToolReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const GITHUB_API: &str = "https://api.github.com";
const GITHUB_GRAPHQL: &str = "https://api.github.com/graphql";
const USER_AGENT: &str = concat!("traceguard/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY: usize = 300;
const THREAD_SUMMARY_LEN: usize = 120;
const PER_PAGE: usize = 100;
const MAX_PAGES: u32 = 10;

pub struct GithubClient {
    client: reqwest::Client,
    token: String,
    owner: String,
    repo: String,
    pr_number: u64,
}

#[derive(Deserialize)]
struct IssueComment {
    id: u64,
    body: Option<String>,
    user: Actor,
}

#[derive(Deserialize)]
struct Actor {
    login: String,
}

#[derive(Deserialize)]
struct ReviewSummary {
    user: Actor,
}

impl GithubClient {
    pub fn new(token: String, repo_slug: &str, pr_number: u64) -> Result<Self> {
        let (owner, repo) = repo_slug
            .split_once('/')
            .context("repository must be owner/name")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token,
            owner: owner.to_string(),
            repo: repo.to_string(),
            pr_number,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{} failed: {} {}", what, status, sanitize_error_body(&body))
    }

    /// Fetch every page of a list endpoint, up to [`MAX_PAGES`].
    ///
    /// A busy PR can carry hundreds of comments; the marked report comment
    /// must be findable wherever it sits in the list.
    async fn get_paged<T: serde::de::DeserializeOwned>(
        &self,
        base_url: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = page_url(base_url, page);
            let response = self
                .request(reqwest::Method::GET, &url)
                .send()
                .await
                .context("Failed to reach source host")?;
            let batch: Vec<T> = Self::check(response, what)
                .await?
                .json()
                .await
                .with_context(|| format!("Failed to parse {}", what))?;
            let last = is_last_page(batch.len());
            all.extend(batch);
            if last {
                break;
            }
        }
        Ok(all)
    }

    async fn list_comments(&self) -> Result<Vec<IssueComment>> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API, self.owner, self.repo, self.pr_number
        );
        self.get_paged(&url, "listing comments").await
    }

    async fn list_reviews(&self) -> Result<Vec<ReviewSummary>> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/reviews",
            GITHUB_API, self.owner, self.repo, self.pr_number
        );
        self.get_paged(&url, "listing reviews").await
    }

    /// Unresolved review-thread summaries opened by the given login.
    async fn unresolved_threads(&self, bot_login: &str) -> Result<Vec<String>> {
        let query = r#"
        query($owner: String!, $name: String!, $pr: Int!) {
            repository(owner: $owner, name: $name) {
                pullRequest(number: $pr) {
                    reviewThreads(first: 100) {
                        nodes {
                            isResolved
                            comments(first: 1) {
                                nodes { author { login } body }
                            }
                        }
                    }
                }
            }
        }"#;

        let response = self
            .request(reqwest::Method::POST, GITHUB_GRAPHQL)
            .json(&json!({
                "query": query,
                "variables": {
                    "owner": self.owner,
                    "name": self.repo,
                    "pr": self.pr_number,
                }
            }))
            .send()
            .await
            .context("Failed to reach source host")?;

        let body: ThreadsResponse = Self::check(response, "querying review threads")
            .await?
            .json()
            .await
            .context("Failed to parse review threads")?;

        Ok(extract_unresolved(body, bot_login))
    }
}

#[derive(Deserialize)]
struct ThreadsResponse {
    data: Option<ThreadsData>,
}

#[derive(Deserialize)]
struct ThreadsData {
    repository: Option<ThreadsRepo>,
}

#[derive(Deserialize)]
struct ThreadsRepo {
    #[serde(rename = "pullRequest")]
    pull_request: Option<ThreadsPr>,
}

#[derive(Deserialize)]
struct ThreadsPr {
    #[serde(rename = "reviewThreads")]
    review_threads: ThreadNodes,
}

#[derive(Deserialize)]
struct ThreadNodes {
    nodes: Vec<ThreadNode>,
}

#[derive(Deserialize)]
struct ThreadNode {
    #[serde(rename = "isResolved")]
    is_resolved: bool,
    comments: ThreadComments,
}

#[derive(Deserialize)]
struct ThreadComments {
    nodes: Vec<ThreadComment>,
}

#[derive(Deserialize)]
struct ThreadComment {
    author: Option<Actor>,
    body: String,
}

fn extract_unresolved(body: ThreadsResponse, bot_login: &str) -> Vec<String> {
    let nodes = body
        .data
        .and_then(|d| d.repository)
        .and_then(|r| r.pull_request)
        .map(|pr| pr.review_threads.nodes)
        .unwrap_or_default();

    nodes
        .into_iter()
        .filter(|t| !t.is_resolved)
        .filter_map(|t| t.comments.nodes.into_iter().next())
        .filter(|c| {
            c.author
                .as_ref()
                .is_some_and(|a| a.login.eq_ignore_ascii_case(bot_login))
        })
        .map(|c| summarize_thread(&c.body))
        .collect()
}

/// First line of a thread body, bounded for the report.
fn summarize_thread(body: &str) -> String {
    let line = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let line = line.trim();
    if line.chars().count() <= THREAD_SUMMARY_LEN {
        return line.to_string();
    }
    let clipped: String = line.chars().take(THREAD_SUMMARY_LEN).collect();
    format!("{}…", clipped)
}

fn page_url(base_url: &str, page: u32) -> String {
    format!("{}?per_page={}&page={}", base_url, PER_PAGE, page)
}

fn is_last_page(batch_len: usize) -> bool {
    batch_len < PER_PAGE
}

/// Activity decides the report. Review bots are installed as GitHub Apps
/// and never appear among requested reviewers, so a bot with no activity
/// yet is pending, not "not configured"; the gate's wait budget bounds how
/// long a tool that never posts is waited on.
fn report_for_activity(has_reported: bool, unresolved: Vec<String>) -> ToolReport {
    if has_reported {
        ToolReport::Completed { unresolved }
    } else {
        ToolReport::Pending
    }
}

/// Keep API error bodies loggable: bounded length, no control characters.
fn sanitize_error_body(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let clipped: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
    format!("{}…", clipped)
}

#[async_trait]
impl ReviewToolHost for GithubClient {
    async fn tool_report(&self, bot_login: &str) -> Result<ToolReport> {
        let comments = self.list_comments().await?;
        let reviews = self.list_reviews().await?;

        let has_reported = comments
            .iter()
            .any(|c| c.user.login.eq_ignore_ascii_case(bot_login))
            || reviews
                .iter()
                .any(|r| r.user.login.eq_ignore_ascii_case(bot_login));

        let unresolved = if has_reported {
            self.unresolved_threads(bot_login).await?
        } else {
            Vec::new()
        };
        Ok(report_for_activity(has_reported, unresolved))
    }
}

#[async_trait]
impl ReportSink for GithubClient {
    async fn find_existing(&self) -> Result<Option<ExistingReport>> {
        let comments = self.list_comments().await?;
        Ok(comments.iter().find_map(|c| {
            let body = c.body.as_deref()?;
            parse_sequence(body).map(|sequence| ExistingReport {
                comment_id: c.id,
                sequence,
            })
        }))
    }

    async fn create(&self, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            GITHUB_API, self.owner, self.repo, self.pr_number
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("Failed to reach source host")?;
        Self::check(response, "creating comment").await?;
        Ok(())
    }

    async fn update(&self, comment_id: u64, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/issues/comments/{}",
            GITHUB_API, self.owner, self.repo, comment_id
        );
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("Failed to reach source host")?;
        Self::check(response, "updating comment").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_rejects_bad_repo_slug() {
        assert!(GithubClient::new("t".to_string(), "no-slash", 1).is_err());
        assert!(GithubClient::new("t".to_string(), "acme/widgets", 1).is_ok());
    }

    #[test]
    fn test_sanitize_error_body_strips_and_bounds() {
        assert_eq!(sanitize_error_body("  plain error  "), "plain error");
        assert_eq!(sanitize_error_body("line\none\ttwo"), "lineonetwo");
        let long = "x".repeat(1000);
        let sanitized = sanitize_error_body(&long);
        assert!(sanitized.chars().count() <= MAX_ERROR_BODY + 1);
        assert!(sanitized.ends_with('…'));
    }

    #[test]
    fn test_summarize_thread_takes_first_nonempty_line() {
        assert_eq!(
            summarize_thread("\n\nPossible SQL injection here.\nDetails follow."),
            "Possible SQL injection here."
        );
        let long = "a".repeat(500);
        assert!(summarize_thread(&long).chars().count() <= THREAD_SUMMARY_LEN + 1);
    }

    #[test]
    fn test_extract_unresolved_filters_by_author_and_resolution() {
        let json = r#"{
            "data": { "repository": { "pullRequest": { "reviewThreads": { "nodes": [
                { "isResolved": false,
                  "comments": { "nodes": [ { "author": { "login": "coderabbitai[bot]" }, "body": "Unchecked error return." } ] } },
                { "isResolved": true,
                  "comments": { "nodes": [ { "author": { "login": "coderabbitai[bot]" }, "body": "Already fixed." } ] } },
                { "isResolved": false,
                  "comments": { "nodes": [ { "author": { "login": "human-reviewer" }, "body": "Style nit." } ] } }
            ] } } } }
        }"#;
        let body: ThreadsResponse = serde_json::from_str(json).unwrap();
        let unresolved = extract_unresolved(body, "coderabbitai[bot]");
        assert_eq!(unresolved, vec!["Unchecked error return."]);
    }

    #[test]
    fn test_extract_unresolved_tolerates_missing_data() {
        let body: ThreadsResponse = serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(extract_unresolved(body, "coderabbitai[bot]").is_empty());
    }

    #[test]
    fn test_page_urls_walk_forward_from_one() {
        assert_eq!(
            page_url("https://api.github.com/repos/a/b/issues/1/comments", 1),
            "https://api.github.com/repos/a/b/issues/1/comments?per_page=100&page=1"
        );
        assert_eq!(
            page_url("base", 3),
            "base?per_page=100&page=3"
        );
    }

    #[test]
    fn test_pagination_stops_on_a_short_page_only() {
        assert!(is_last_page(0));
        assert!(is_last_page(99));
        assert!(!is_last_page(100));
    }

    #[test]
    fn test_quiet_bot_reads_as_pending_not_not_configured() {
        assert_eq!(report_for_activity(false, Vec::new()), ToolReport::Pending);
        assert_eq!(
            report_for_activity(true, vec!["unchecked error".to_string()]),
            ToolReport::Completed {
                unresolved: vec!["unchecked error".to_string()]
            }
        );
        assert_eq!(
            report_for_activity(true, Vec::new()),
            ToolReport::Completed { unresolved: vec![] }
        );
    }

    #[test]
    fn test_parse_issue_comment_list() {
        let json = r#"[
            { "id": 11, "body": "<!-- traceguard:4 -->\n## report", "user": { "login": "github-actions[bot]" } },
            { "id": 12, "body": null, "user": { "login": "someone" } }
        ]"#;
        let comments: Vec<IssueComment> = serde_json::from_str(json).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].id, 11);
        assert_eq!(parse_sequence(comments[0].body.as_deref().unwrap()), Some(4));
        assert!(comments[1].body.is_none());
    }
}
