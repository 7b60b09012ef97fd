//! Exempt audit
//!
//! A PR carrying the exempt label skips the traceability checks but still
//! gets its scope verified: every changed file must be on the trivial
//! allowlist, and nothing may touch a security-sensitive path. Violations
//! force a failure regardless of the numeric score.

use crate::ai::AlignmentJudge;
use crate::config::AuditConfig;
use crate::findings::{Category, Finding};
use crate::scope::ChangeScope;

/// Run the reduced audit for an exempt-labeled PR.
///
/// When files fall outside the allowlist, the semantic judge gets one chance
/// to call the diff insubstantial (formatting, comments, version bumps)
/// before the violation is forced. Sensitive paths never get that chance.
pub async fn audit(
    config: &AuditConfig,
    scope: &ChangeScope,
    judge: Option<&dyn AlignmentJudge>,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut nontrivial = Vec::new();

    for file in &scope.files {
        if let Some(pattern) = sensitive_match(config, &file.path) {
            findings.push(
                Finding::critical(
                    Category::Security,
                    format!(
                        "{} — touches a sensitive path ('{}') and cannot be exempted",
                        file.path, pattern
                    ),
                )
                .with_file(file.path.clone())
                .forcing(),
            );
        } else if !is_trivial(config, &file.path) {
            nontrivial.push(file.path.clone());
        }
    }

    if nontrivial.is_empty() {
        if findings.is_empty() {
            findings.push(Finding::info(
                Category::Scope,
                format!(
                    "exempt scope verified: {} file(s), all on the trivial allowlist",
                    scope.files.len()
                ),
            ));
        }
        return findings;
    }

    if insubstantial(judge, scope).await {
        findings.push(Finding::info(
            Category::Scope,
            format!(
                "{} file(s) outside the trivial allowlist, judged insubstantial",
                nontrivial.len()
            ),
        ));
        return findings;
    }

    for path in nontrivial {
        findings.push(
            Finding::critical(
                Category::Scope,
                format!("{} — outside the exempt-eligible paths", path),
            )
            .with_file(path)
            .forcing(),
        );
    }
    findings
}

async fn insubstantial(judge: Option<&dyn AlignmentJudge>, scope: &ChangeScope) -> bool {
    let Some(judge) = judge else {
        return false;
    };
    match judge.is_substantial(&scope.summary.for_analysis()).await {
        Ok(substantial) => !substantial,
        Err(err) => {
            // Inconclusive means the violation stands.
            tracing::warn!(%err, "substantiality judgement unavailable");
            false
        }
    }
}

fn is_trivial(config: &AuditConfig, path: &str) -> bool {
    let policy = &config.policy;
    if policy
        .trivial_path_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return true;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    policy.trivial_basenames.iter().any(|b| b == name)
}

fn sensitive_match<'a>(config: &'a AuditConfig, path: &str) -> Option<&'a str> {
    let lower = path.to_lowercase();
    config
        .policy
        .sensitive_patterns
        .iter()
        .find(|p| lower.contains(p.as_str()))
        .map(|p| p.as_str())
}
