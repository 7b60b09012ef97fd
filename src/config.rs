//! Audit configuration
//!
//! All invocation inputs are externally supplied (flags or environment).
//! A repo-local `.traceguard.toml` can overlay the policy lists that drive
//! file classification, the exempt audit, and the scoring rubric.
//!
//! Missing required input is a configuration error: fatal, surfaced before
//! any report is published.

use crate::score::Rubric;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TICKET_PATTERN: &str = "[A-Z][A-Z0-9]+-[0-9]+";
pub const DEFAULT_THRESHOLD: u8 = 70;
pub const DEFAULT_EXEMPT_LABEL: &str = "compliance-exempt";

const POLICY_FILE: &str = ".traceguard.toml";

/// Fully validated configuration for one investigation run.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub pr_number: u64,
    /// Repository identifier as `owner/name`.
    pub repo: String,
    pub pr_title: String,
    pub pr_body: String,
    pub pr_author: String,
    pub base_branch: String,
    pub ticket_pattern: Regex,
    pub issues_path: String,
    pub specs_path: String,
    pub required_reviewers: Vec<String>,
    pub confidence_threshold: u8,
    pub labels: Vec<String>,
    pub exempt_label: String,
    /// Checkout of the repository under audit (for issues/specs discovery).
    pub target_repo: PathBuf,
    pub commit_sha: Option<String>,
    pub run_id: Option<String>,
    /// Trigger recency for last-writer-wins publishing.
    pub run_sequence: u64,
    pub poll_interval: Duration,
    pub tool_wait_budget: Duration,
    pub policy: Policy,
    pub secrets: Secrets,
}

/// Credentials consumed from the environment, never from flags.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// Natural-language analysis credential (required for the full path).
    pub analysis_key: Option<String>,
    /// Ticket store credential (optional integration).
    pub ticket_store_key: Option<String>,
    /// Source-host write credential (required to publish the report).
    pub github_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            analysis_key: read("OPENROUTER_API_KEY"),
            ticket_store_key: read("LINEAR_API_KEY"),
            github_token: read("GITHUB_TOKEN").or_else(|| read("REPO_TOKEN")),
        }
    }
}

/// Policy lists that drive classification, exemption, and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Path prefixes an exempt change may touch.
    pub trivial_path_prefixes: Vec<String>,
    /// Basenames an exempt change may touch anywhere in the tree.
    pub trivial_basenames: Vec<String>,
    /// Path substrings that mark a file security sensitive.
    pub sensitive_patterns: Vec<String>,
    /// Diffs larger than this are summarized instead of sent whole.
    pub max_diff_bytes: usize,
    pub rubric: Rubric,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            trivial_path_prefixes: vec![".github/".to_string(), "docs/".to_string()],
            trivial_basenames: vec![
                "Cargo.lock".to_string(),
                "package-lock.json".to_string(),
                "yarn.lock".to_string(),
                "poetry.lock".to_string(),
                "Cargo.toml".to_string(),
                "package.json".to_string(),
                "pyproject.toml".to_string(),
                ".gitignore".to_string(),
            ],
            sensitive_patterns: vec![
                "auth".to_string(),
                "crypto".to_string(),
                "secret".to_string(),
                "permission".to_string(),
                "password".to_string(),
                "token".to_string(),
                "security".to_string(),
            ],
            max_diff_bytes: 50_000,
            rubric: Rubric::default(),
        }
    }
}

impl Policy {
    /// Load the policy overlay from `<repo>/.traceguard.toml`, or defaults.
    ///
    /// A malformed policy file falls back to defaults with a warning rather
    /// than failing the run; policy is tuning, not required input.
    pub fn load(target_repo: &Path) -> Self {
        let path = target_repo.join(POLICY_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(policy) => policy,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "ignoring malformed policy file");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// Unvalidated inputs as they arrive from flags/environment.
#[derive(Debug, Clone, Default)]
pub struct RawInputs {
    pub pr_number: Option<u64>,
    pub repo: Option<String>,
    pub pr_title: String,
    pub pr_body: String,
    pub pr_author: String,
    pub base_branch: String,
    pub ticket_pattern: String,
    pub issues_path: String,
    pub specs_path: String,
    pub required_reviewers: String,
    pub confidence_threshold: u8,
    pub labels: String,
    pub exempt_label: String,
    pub target_repo: PathBuf,
    pub commit_sha: Option<String>,
    pub run_id: Option<String>,
    pub run_sequence: Option<u64>,
    pub poll_interval_secs: u64,
    pub tool_wait_budget_secs: u64,
}

impl AuditConfig {
    /// Validate raw inputs into a usable configuration.
    pub fn from_inputs(raw: RawInputs, secrets: Secrets) -> Result<Self> {
        let pr_number = match raw.pr_number {
            Some(n) => n,
            None => bail!("PR number is required (set --pr-number or PR_NUMBER)"),
        };

        let repo = match raw.repo {
            Some(r) if r.split_once('/').is_some_and(|(o, n)| !o.is_empty() && !n.is_empty()) => r,
            Some(r) => bail!("repository must be owner/name, got '{}'", r),
            None => bail!("repository is required (set --repo or REPO)"),
        };

        if raw.ticket_pattern.trim().is_empty() {
            bail!("ticket pattern must not be empty");
        }
        let ticket_pattern = Regex::new(&raw.ticket_pattern)
            .with_context(|| format!("invalid ticket pattern '{}'", raw.ticket_pattern))?;

        if raw.confidence_threshold > 100 {
            bail!(
                "confidence threshold must be 0-100, got {}",
                raw.confidence_threshold
            );
        }

        let policy = Policy::load(&raw.target_repo);

        Ok(Self {
            pr_number,
            repo,
            pr_title: raw.pr_title,
            pr_body: raw.pr_body,
            pr_author: raw.pr_author,
            base_branch: if raw.base_branch.is_empty() {
                "main".to_string()
            } else {
                raw.base_branch
            },
            ticket_pattern,
            issues_path: or_default(raw.issues_path, "issues"),
            specs_path: or_default(raw.specs_path, "specs"),
            required_reviewers: split_csv(&raw.required_reviewers),
            confidence_threshold: raw.confidence_threshold,
            labels: split_csv(&raw.labels),
            exempt_label: or_default(raw.exempt_label, DEFAULT_EXEMPT_LABEL),
            target_repo: raw.target_repo,
            commit_sha: raw.commit_sha.filter(|s| !s.is_empty()).map(|s| short_sha(&s)),
            run_id: raw.run_id.filter(|s| !s.is_empty()),
            run_sequence: raw.run_sequence.unwrap_or(0),
            poll_interval: Duration::from_secs(raw.poll_interval_secs.max(1)),
            tool_wait_budget: Duration::from_secs(raw.tool_wait_budget_secs),
            policy,
            secrets,
        })
    }

    /// Is the exempt (bypass) label present on the PR?
    pub fn exempt_requested(&self) -> bool {
        self.labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&self.exempt_label))
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.trim().is_empty() {
        default.to_string()
    } else {
        value
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawInputs {
        RawInputs {
            pr_number: Some(7),
            repo: Some("acme/widgets".to_string()),
            ticket_pattern: DEFAULT_TICKET_PATTERN.to_string(),
            confidence_threshold: DEFAULT_THRESHOLD,
            base_branch: "main".to_string(),
            target_repo: PathBuf::from("."),
            poll_interval_secs: 30,
            tool_wait_budget_secs: 120,
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_pr_number_is_fatal() {
        let mut inputs = raw();
        inputs.pr_number = None;
        let err = AuditConfig::from_inputs(inputs, Secrets::default()).unwrap_err();
        assert!(err.to_string().contains("PR number"));
    }

    #[test]
    fn test_bad_repo_identifier_is_fatal() {
        let mut inputs = raw();
        inputs.repo = Some("no-slash".to_string());
        assert!(AuditConfig::from_inputs(inputs, Secrets::default()).is_err());
    }

    #[test]
    fn test_invalid_ticket_pattern_is_fatal() {
        let mut inputs = raw();
        inputs.ticket_pattern = "[unclosed".to_string();
        assert!(AuditConfig::from_inputs(inputs, Secrets::default()).is_err());
    }

    #[test]
    fn test_empty_ticket_pattern_is_fatal() {
        let mut inputs = raw();
        inputs.ticket_pattern = "  ".to_string();
        assert!(AuditConfig::from_inputs(inputs, Secrets::default()).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let config = AuditConfig::from_inputs(raw(), Secrets::default()).unwrap();
        assert_eq!(config.issues_path, "issues");
        assert_eq!(config.specs_path, "specs");
        assert_eq!(config.exempt_label, DEFAULT_EXEMPT_LABEL);
        assert_eq!(config.confidence_threshold, 70);
        assert!(config.required_reviewers.is_empty());
    }

    #[test]
    fn test_reviewers_and_labels_csv() {
        let mut inputs = raw();
        inputs.required_reviewers = "coderabbit, aikido,,greptile ".to_string();
        inputs.labels = "wip, compliance-exempt".to_string();
        let config = AuditConfig::from_inputs(inputs, Secrets::default()).unwrap();
        assert_eq!(
            config.required_reviewers,
            vec!["coderabbit", "aikido", "greptile"]
        );
        assert!(config.exempt_requested());
    }

    #[test]
    fn test_commit_sha_is_shortened() {
        let mut inputs = raw();
        inputs.commit_sha = Some("0123456789abcdef".to_string());
        let config = AuditConfig::from_inputs(inputs, Secrets::default()).unwrap();
        assert_eq!(config.commit_sha.as_deref(), Some("0123456"));
    }

    #[test]
    fn test_policy_file_overlay() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(POLICY_FILE),
            "max_diff_bytes = 1000\nsensitive_patterns = [\"vault\"]\n",
        )
        .unwrap();
        let policy = Policy::load(dir.path());
        assert_eq!(policy.max_diff_bytes, 1000);
        assert_eq!(policy.sensitive_patterns, vec!["vault"]);
        // untouched fields keep defaults
        assert!(!policy.trivial_path_prefixes.is_empty());
    }

    #[test]
    fn test_malformed_policy_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(POLICY_FILE), "max_diff_bytes = \"nope").unwrap();
        let policy = Policy::load(dir.path());
        assert_eq!(policy.max_diff_bytes, Policy::default().max_diff_bytes);
    }
}
