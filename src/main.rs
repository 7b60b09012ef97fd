//! traceguard CLI
//!
//! Designed for CI: every flag can come from an environment variable, the
//! diff arrives via `--diff-file` or stdin, and the exit code is the
//! contract (0 pass, 1 fail, 2 configuration error).

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use traceguard::ai::{AlignmentJudge, OpenRouterJudge};
use traceguard::config::{AuditConfig, RawInputs, Secrets, DEFAULT_TICKET_PATTERN};
use traceguard::engine::Engine;
use traceguard::github::GithubClient;
use traceguard::publish::{DryRunSink, ReportSink};
use traceguard::review::ReviewToolHost;
use traceguard::tickets::{LinearClient, TicketStore};

#[derive(Parser, Debug)]
#[command(name = "traceguard", version, about = "PR traceability audit")]
struct Args {
    /// Pull request number under audit.
    #[arg(long, env = "PR_NUMBER")]
    pr_number: Option<u64>,

    /// Repository as owner/name.
    #[arg(long, env = "REPO")]
    repo: Option<String>,

    #[arg(long, env = "PR_TITLE", default_value = "", hide_env_values = true)]
    pr_title: String,

    #[arg(long, env = "PR_BODY", default_value = "", hide_env_values = true)]
    pr_body: String,

    #[arg(long, env = "PR_AUTHOR", default_value = "")]
    pr_author: String,

    #[arg(long, env = "BASE_BRANCH", default_value = "main")]
    base_branch: String,

    /// Regex for ticket identifiers in the PR title and body.
    #[arg(long, env = "TICKET_PATTERN", default_value = DEFAULT_TICKET_PATTERN)]
    ticket_pattern: String,

    /// Directory of requirement docs, relative to the target repo.
    #[arg(long, env = "ISSUES_PATH", default_value = "issues")]
    issues_path: String,

    /// Directory of spec docs, relative to the target repo.
    #[arg(long, env = "SPECS_PATH", default_value = "specs")]
    specs_path: String,

    /// Comma-separated review tools that must report before scoring.
    #[arg(long, env = "REQUIRED_REVIEWERS", default_value = "")]
    required_reviewers: String,

    /// Minimum confidence score to pass (0-100).
    #[arg(long, env = "CONFIDENCE_THRESHOLD", default_value_t = 70)]
    confidence_threshold: u8,

    /// Comma-separated labels on the PR.
    #[arg(long, env = "PR_LABELS", default_value = "")]
    labels: String,

    /// Label that switches the run to the exempt audit.
    #[arg(long, env = "EXEMPT_LABEL", default_value = "")]
    exempt_label: String,

    /// File holding the PR diff; stdin when omitted.
    #[arg(long)]
    diff_file: Option<PathBuf>,

    /// Checkout of the repository under audit.
    #[arg(long, default_value = ".")]
    target_repo: PathBuf,

    #[arg(long, env = "COMMIT_SHA")]
    commit_sha: Option<String>,

    #[arg(long, env = "RUN_ID")]
    run_id: Option<String>,

    /// Monotone trigger sequence; newer runs own the report comment.
    #[arg(long, env = "RUN_SEQUENCE")]
    run_sequence: Option<u64>,

    /// Restrict ticket verification to one tracker team key.
    #[arg(long, env = "LINEAR_TEAM")]
    linear_team: Option<String>,

    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 120)]
    tool_wait_budget_secs: u64,
}

impl Args {
    fn into_raw(self) -> (RawInputs, Option<PathBuf>, Option<String>) {
        let raw = RawInputs {
            pr_number: self.pr_number,
            repo: self.repo,
            pr_title: self.pr_title,
            pr_body: self.pr_body,
            pr_author: self.pr_author,
            base_branch: self.base_branch,
            ticket_pattern: self.ticket_pattern,
            issues_path: self.issues_path,
            specs_path: self.specs_path,
            required_reviewers: self.required_reviewers,
            confidence_threshold: self.confidence_threshold,
            labels: self.labels,
            exempt_label: self.exempt_label,
            target_repo: self.target_repo,
            commit_sha: self.commit_sha,
            run_id: self.run_id,
            run_sequence: self.run_sequence,
            poll_interval_secs: self.poll_interval_secs,
            tool_wait_budget_secs: self.tool_wait_budget_secs,
        };
        (raw, self.diff_file, self.linear_team)
    }
}

const EXIT_PASS: i32 = 0;
const EXIT_FAIL: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let (raw, diff_file, linear_team) = args.into_raw();

    let config = match AuditConfig::from_inputs(raw, Secrets::from_env()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("configuration error: {:#}", err);
            return EXIT_CONFIG;
        }
    };

    let diff = match read_diff(diff_file.as_deref()) {
        Ok(diff) => diff,
        Err(err) => {
            tracing::error!("configuration error: {:#}", err);
            return EXIT_CONFIG;
        }
    };

    // Full mode needs the analysis credential; exempt mode can run without.
    if !config.exempt_requested() && config.secrets.analysis_key.is_none() {
        tracing::error!("configuration error: OPENROUTER_API_KEY is not set");
        return EXIT_CONFIG;
    }

    match build_and_run(&config, linear_team, &diff).await {
        Ok(passed) => {
            if passed {
                EXIT_PASS
            } else {
                EXIT_FAIL
            }
        }
        Err(err) => {
            tracing::error!("investigation failed: {:#}", err);
            EXIT_FAIL
        }
    }
}

async fn build_and_run(
    config: &AuditConfig,
    linear_team: Option<String>,
    diff: &str,
) -> Result<bool> {
    let store = match &config.secrets.ticket_store_key {
        Some(key) => Some(LinearClient::new(key.clone(), linear_team)?),
        None => None,
    };

    let judge = match &config.secrets.analysis_key {
        Some(key) => Some(OpenRouterJudge::new(key.clone())?),
        None => None,
    };

    let github = match &config.secrets.github_token {
        Some(token) => Some(GithubClient::new(
            token.clone(),
            &config.repo,
            config.pr_number,
        )?),
        None => {
            tracing::warn!("no write credential set, running without publishing");
            None
        }
    };

    let sink: &dyn ReportSink = match &github {
        Some(client) => client,
        None => &DryRunSink,
    };
    let host: Option<&dyn ReviewToolHost> = github.as_ref().map(|c| c as &dyn ReviewToolHost);

    let engine = Engine::new(
        config,
        store.as_ref().map(|s| s as &dyn TicketStore),
        judge.as_ref().map(|j| j as &dyn AlignmentJudge),
        host,
        sink,
    );
    let outcome = engine.run(diff).await?;
    Ok(outcome.passed())
}

fn read_diff(path: Option<&std::path::Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read diff file {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read diff from stdin")?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_diff_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("change.diff");
        std::fs::write(&path, "diff --git a/x b/x\n").unwrap();
        assert!(read_diff(Some(&path)).unwrap().starts_with("diff --git"));
    }

    #[test]
    fn test_read_diff_missing_file_is_error() {
        assert!(read_diff(Some(std::path::Path::new("/nonexistent.diff"))).is_err());
    }

    #[test]
    fn test_args_parse_from_flags() {
        let args = Args::parse_from([
            "traceguard",
            "--pr-number",
            "42",
            "--repo",
            "acme/widgets",
            "--required-reviewers",
            "coderabbit,aikido",
            "--labels",
            "compliance-exempt",
        ]);
        assert_eq!(args.pr_number, Some(42));
        assert_eq!(args.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(args.confidence_threshold, 70);
        assert_eq!(args.ticket_pattern, DEFAULT_TICKET_PATTERN);
        assert_eq!(args.poll_interval_secs, 30);
    }
}
