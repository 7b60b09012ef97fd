//! Automated review tool gate
//!
//! Each required review tool is a bot account on the source host. A tool's
//! review "completes" once the bot has posted a review or comment on the PR;
//! any review threads it opened that remain unresolved are blocking. Tools
//! are polled concurrently within a shared wait budget so a slow tool does
//! not starve the others, and every tool ends in a terminal state:
//! completed, timed-out, or not-configured.

use crate::config::AuditConfig;
use crate::findings::{Category, Finding};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::{sleep, Instant};

/// Well-known review bot logins, keyed by the short name operators use in
/// the required-reviewers list.
const BOT_LOGINS: &[(&str, &str)] = &[
    ("coderabbit", "coderabbitai[bot]"),
    ("aikido", "aikido-security[bot]"),
    ("greptile", "greptile[bot]"),
];

/// What one review tool has done on the PR so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolReport {
    /// The host knows the bot is not installed on this repository.
    NotConfigured,
    /// No review from the bot yet.
    Pending,
    /// The bot has reviewed; unresolved thread summaries, if any.
    Completed { unresolved: Vec<String> },
}

/// Source of review-tool state, implemented against the source host.
#[async_trait]
pub trait ReviewToolHost: Send + Sync {
    async fn tool_report(&self, bot_login: &str) -> Result<ToolReport>;
}

/// Terminal state of a tool once the gate has finished waiting.
/// Transitions only forward: pending → completed | timed-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolState {
    Completed,
    TimedOut,
    NotConfigured,
}

impl ToolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolState::Completed => "completed",
            ToolState::TimedOut => "timed-out",
            ToolState::NotConfigured => "not-configured",
        }
    }
}

/// One tool's outcome after the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: String,
    pub state: ToolState,
    /// Unresolved thread summaries, populated only when completed.
    pub unresolved: Vec<String>,
}

/// Resolve a required-reviewer name to its bot login.
pub fn bot_login(name: &str) -> &str {
    let lower = name.to_lowercase();
    BOT_LOGINS
        .iter()
        .find(|(short, _)| *short == lower)
        .map(|(_, login)| *login)
        .unwrap_or(name)
}

/// Wait for every required tool to reach a terminal state.
///
/// Polling stops early per tool on completion or a not-configured answer;
/// a tool still pending when the budget runs out ends timed-out. The gate
/// never stalls past the deadline.
pub async fn await_tools(host: &dyn ReviewToolHost, config: &AuditConfig) -> Vec<ToolStatus> {
    if config.required_reviewers.is_empty() {
        return Vec::new();
    }

    let deadline = Instant::now() + config.tool_wait_budget;
    let waits = config
        .required_reviewers
        .iter()
        .map(|name| await_one(host, name, config, deadline));

    join_all(waits).await
}

async fn await_one(
    host: &dyn ReviewToolHost,
    name: &str,
    config: &AuditConfig,
    deadline: Instant,
) -> ToolStatus {
    let login = bot_login(name);
    let status = |state, unresolved| ToolStatus {
        name: name.to_string(),
        state,
        unresolved,
    };

    loop {
        match host.tool_report(login).await {
            Ok(ToolReport::Completed { unresolved }) => {
                return status(ToolState::Completed, unresolved);
            }
            Ok(ToolReport::NotConfigured) => {
                return status(ToolState::NotConfigured, Vec::new());
            }
            Ok(ToolReport::Pending) => {}
            Err(err) => {
                // A failed poll counts like pending: keep trying until the
                // budget runs out.
                tracing::warn!(tool = name, %err, "review tool state unavailable");
            }
        }

        if Instant::now() + config.poll_interval > deadline {
            break;
        }
        sleep(config.poll_interval).await;
    }

    status(ToolState::TimedOut, Vec::new())
}

/// Translate gate outcomes into findings.
pub fn findings(statuses: &[ToolStatus]) -> Vec<Finding> {
    let mut out = Vec::new();
    for status in statuses {
        match status.state {
            ToolState::Completed if status.unresolved.is_empty() => {
                out.push(Finding::info(
                    Category::ReviewTool,
                    format!("{} — review complete, no unresolved findings", status.name),
                ));
            }
            ToolState::Completed => {
                out.extend(status.unresolved.iter().map(|item| {
                    Finding::critical(
                        Category::ReviewTool,
                        format!("{} — unresolved: {}", status.name, item),
                    )
                }));
            }
            ToolState::TimedOut => {
                out.push(Finding::warning(
                    Category::ReviewTool,
                    format!(
                        "{} — did not report within the wait budget",
                        status.name
                    ),
                ));
            }
            ToolState::NotConfigured => {
                out.push(Finding::warning(
                    Category::ReviewTool,
                    format!("{} — not configured on this repository", status.name),
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, RawInputs, Secrets, DEFAULT_TICKET_PATTERN};
    use crate::findings::Severity;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(reviewers: &str, budget_secs: u64) -> AuditConfig {
        let raw = RawInputs {
            pr_number: Some(1),
            repo: Some("acme/widgets".to_string()),
            ticket_pattern: DEFAULT_TICKET_PATTERN.to_string(),
            confidence_threshold: 70,
            required_reviewers: reviewers.to_string(),
            target_repo: PathBuf::from("."),
            poll_interval_secs: 30,
            tool_wait_budget_secs: budget_secs,
            ..Default::default()
        };
        AuditConfig::from_inputs(raw, Secrets::default()).unwrap()
    }

    /// Host that serves a fixed report per login, `Pending` for the first
    /// `pending_rounds` polls.
    struct FakeHost {
        reports: HashMap<String, ToolReport>,
        pending_rounds: u32,
        calls: AtomicU32,
    }

    impl FakeHost {
        fn new(reports: Vec<(&str, ToolReport)>) -> Self {
            Self {
                reports: reports
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                pending_rounds: 0,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ReviewToolHost for FakeHost {
        async fn tool_report(&self, bot_login: &str) -> Result<ToolReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.pending_rounds {
                return Ok(ToolReport::Pending);
            }
            Ok(self
                .reports
                .get(bot_login)
                .cloned()
                .unwrap_or(ToolReport::NotConfigured))
        }
    }

    #[test]
    fn test_bot_login_mapping() {
        assert_eq!(bot_login("coderabbit"), "coderabbitai[bot]");
        assert_eq!(bot_login("Aikido"), "aikido-security[bot]");
        assert_eq!(bot_login("greptile"), "greptile[bot]");
        // unknown names pass through as literal logins
        assert_eq!(bot_login("custom-bot[bot]"), "custom-bot[bot]");
    }

    #[tokio::test]
    async fn test_no_required_reviewers_is_silent() {
        let host = FakeHost::new(vec![]);
        let statuses = await_tools(&host, &config("", 120)).await;
        assert!(statuses.is_empty());
        assert!(findings(&statuses).is_empty());
    }

    #[tokio::test]
    async fn test_clean_completion_is_info() {
        let host = FakeHost::new(vec![(
            "coderabbitai[bot]",
            ToolReport::Completed { unresolved: vec![] },
        )]);
        let statuses = await_tools(&host, &config("coderabbit", 120)).await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, ToolState::Completed);

        let findings = findings(&statuses);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_unresolved_threads_are_critical_each() {
        let host = FakeHost::new(vec![(
            "coderabbitai[bot]",
            ToolReport::Completed {
                unresolved: vec![
                    "possible SQL injection in query builder".to_string(),
                    "unchecked error return".to_string(),
                ],
            },
        )]);
        let statuses = await_tools(&host, &config("coderabbit", 120)).await;
        let findings = findings(&statuses);
        assert_eq!(findings.len(), 2);
        assert!(findings
            .iter()
            .all(|f| f.severity == Severity::Critical && f.category == Category::ReviewTool));
        assert!(findings[0].message.contains("SQL injection"));
    }

    #[tokio::test]
    async fn test_not_configured_is_warning() {
        let host = FakeHost::new(vec![]);
        let statuses = await_tools(&host, &config("greptile", 120)).await;
        assert_eq!(statuses[0].state, ToolState::NotConfigured);

        let findings = findings(&statuses);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].message.contains("not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_tool_completes_after_polls() {
        let host = FakeHost {
            reports: [(
                "coderabbitai[bot]".to_string(),
                ToolReport::Completed { unresolved: vec![] },
            )]
            .into_iter()
            .collect(),
            pending_rounds: 2,
            calls: AtomicU32::new(0),
        };
        let statuses = await_tools(&host, &config("coderabbit", 120)).await;
        assert_eq!(statuses[0].state, ToolState::Completed);
        assert!(host.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_times_out_instead_of_hanging() {
        let host = FakeHost {
            reports: HashMap::new(),
            pending_rounds: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let statuses = await_tools(&host, &config("coderabbit", 90)).await;
        assert_eq!(statuses[0].state, ToolState::TimedOut);

        let findings = findings(&statuses);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].message.contains("wait budget"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_errors_keep_the_tool_polling() {
        struct BrokenHost {
            calls: AtomicU32,
        }

        #[async_trait]
        impl ReviewToolHost for BrokenHost {
            async fn tool_report(&self, _bot_login: &str) -> Result<ToolReport> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("temporarily unavailable")
            }
        }

        let host = BrokenHost {
            calls: AtomicU32::new(0),
        };
        let statuses = await_tools(&host, &config("coderabbit", 90)).await;
        // errors never short-circuit the wait; the tool polls to the budget
        assert!(host.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(statuses[0].state, ToolState::TimedOut);
    }

    #[tokio::test]
    async fn test_multiple_tools_polled_together() {
        let host = FakeHost::new(vec![
            (
                "coderabbitai[bot]",
                ToolReport::Completed { unresolved: vec![] },
            ),
            (
                "aikido-security[bot]",
                ToolReport::Completed {
                    unresolved: vec!["dependency with known CVE".to_string()],
                },
            ),
        ]);
        let statuses = await_tools(&host, &config("coderabbit,aikido", 120)).await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == ToolState::Completed));
        assert_eq!(
            findings(&statuses)
                .iter()
                .filter(|f| f.severity == Severity::Critical)
                .count(),
            1
        );
    }

    #[test]
    fn test_tool_state_labels() {
        assert_eq!(ToolState::Completed.as_str(), "completed");
        assert_eq!(ToolState::TimedOut.as_str(), "timed-out");
        assert_eq!(ToolState::NotConfigured.as_str(), "not-configured");
    }
}
