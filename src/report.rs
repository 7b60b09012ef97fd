//! Report rendering
//!
//! Every published comment body comes out of this module: the initial
//! placeholder, per-stage progress updates, the final verdict, and the
//! degraded report for a run that died mid-flight. Rendering is pure; the
//! same inputs always produce byte-identical markdown so republishing is
//! a no-op diff.

use crate::config::AuditConfig;
use crate::findings::{Category, Finding, Severity};
use crate::score::{AuditMode, ConfidenceScore, Verdict};
use crate::tickets::{TicketReference, TicketState};

const TITLE: &str = "Compliance Audit";

/// Ordered record of what the investigation did, step by step.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    steps: Vec<String>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

/// Everything the final report needs, gathered by the orchestrator.
pub struct FinalReport<'a> {
    pub config: &'a AuditConfig,
    pub mode: AuditMode,
    pub score: &'a ConfidenceScore,
    pub verdict: Verdict,
    pub references: &'a [TicketReference],
    pub trail: &'a AuditTrail,
}

/// Render the placeholder published as soon as the investigation starts.
pub fn render_placeholder(config: &AuditConfig) -> String {
    let mut out = format!("## 🔍 {} — investigation started\n\n", TITLE);
    if config.pr_author.is_empty() {
        out.push_str(&format!("Auditing PR #{}.\n", config.pr_number));
    } else {
        out.push_str(&format!(
            "Auditing PR #{} by @{}.\n",
            config.pr_number, config.pr_author
        ));
    }
    out.push_str("Scoping the change and gathering evidence. This comment updates in place.\n");
    out.push_str(&footer(config));
    out
}

/// Render a progress update after a completed stage.
pub fn render_progress(config: &AuditConfig, stage: &str, trail: &AuditTrail) -> String {
    let mut out = format!("## 🔍 {} — in progress\n\n", TITLE);
    out.push_str(&format!("_Current stage: {}_\n", stage));
    out.push_str(&trail_section(trail));
    out.push_str(&footer(config));
    out
}

/// Render the final report for a completed investigation.
pub fn render_final(report: &FinalReport) -> String {
    let FinalReport {
        config,
        mode,
        score,
        verdict,
        references,
        trail,
    } = report;

    let label = if verdict.passed() { "PASSED" } else { "FAILED" };
    let mut out = format!(
        "## {} {}: {} — {}/100\n\n",
        verdict.glyph(),
        TITLE,
        label,
        score.value
    );
    out.push_str(&format!(
        "**{}** · {} audit · threshold {}\n",
        config.policy.rubric.band_label(score.value),
        mode.as_str(),
        config.confidence_threshold
    ));

    out.push_str("\n### Tickets Referenced\n");
    if references.is_empty() {
        out.push_str("_No ticket references found._\n");
    } else {
        for r in *references {
            out.push_str(&format!("- {}\n", ticket_line(r)));
        }
    }

    out.push_str("\n### Findings\n");
    if score.findings.is_empty() {
        out.push_str("_No findings._\n");
    } else {
        out.push_str(&grouped_findings(&score.findings));
    }

    if !verdict.passed() && *mode == AuditMode::Full {
        out.push_str(&how_to_fix(&score.findings));
    }

    out.push_str(&format!(
        "\n**Verdict: {}** — score {} against threshold {}.\n",
        label, score.value, config.confidence_threshold
    ));

    out.push_str(&trail_section(trail));
    out.push_str(&footer(config));
    out
}

/// Render the degraded report for a run that hit a fatal error after the
/// investigation had already been announced.
pub fn render_fatal(config: &AuditConfig, error: &str, trail: &AuditTrail) -> String {
    let mut out = format!("## ❌ {}: FAILED — internal error\n\n", TITLE);
    out.push_str(&format!(
        "The investigation could not be completed: {}.\n\
         This run counts as a failure; push an update to re-trigger it.\n",
        error
    ));
    out.push_str(&trail_section(trail));
    out.push_str(&footer(config));
    out
}

fn ticket_line(reference: &TicketReference) -> String {
    match (&reference.state, &reference.meta) {
        (TicketState::Verified, Some(meta)) if !meta.state.is_empty() => format!(
            "{} — verified: {} ({})",
            reference.id, meta.title, meta.state
        ),
        (TicketState::Verified, Some(meta)) => {
            format!("{} — verified: {}", reference.id, meta.title)
        }
        (TicketState::Verified, None) => format!("{} — verified", reference.id),
        (TicketState::Missing, _) => format!("{} — not found in tracker", reference.id),
        (TicketState::Unverified, _) => {
            format!("{} — unverified (tracker not configured/unreachable)", reference.id)
        }
    }
}

const CATEGORY_ORDER: &[Category] = &[
    Category::Ticket,
    Category::Documentation,
    Category::TestCoverage,
    Category::ReviewTool,
    Category::Scope,
    Category::Security,
];

/// Findings grouped by category, discovery order preserved within a group.
/// Each line carries both the glyph and the textual severity tag so the
/// report stays greppable.
fn grouped_findings(findings: &[Finding]) -> String {
    let mut out = String::new();
    for category in CATEGORY_ORDER {
        let group: Vec<&Finding> = findings.iter().filter(|f| f.category == *category).collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("\n#### {}\n", category.heading()));
        for finding in group {
            out.push_str(&format!(
                "- {} {}: {}\n",
                finding.severity.glyph(),
                finding.severity.as_str(),
                finding.message
            ));
        }
    }
    out
}

fn how_to_fix(findings: &[Finding]) -> String {
    let mut categories: Vec<Category> = Vec::new();
    for finding in findings {
        if finding.severity != Severity::Info && !categories.contains(&finding.category) {
            categories.push(finding.category);
        }
    }
    if categories.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n### How to Fix\n");
    for category in categories {
        let count = findings
            .iter()
            .filter(|f| f.category == category && f.severity != Severity::Info)
            .count();
        out.push_str(&format!(
            "- {}: {} finding(s) to address\n",
            category.heading(),
            count
        ));
    }
    out.push_str("\nPush an update once addressed; the audit re-runs automatically.\n");
    out
}

fn trail_section(trail: &AuditTrail) -> String {
    if trail.steps().is_empty() {
        return String::new();
    }
    let mut out = String::from("\n### Audit Trail\n");
    for (i, step) in trail.steps().iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }
    out
}

fn footer(config: &AuditConfig) -> String {
    let mut parts = vec!["traceguard".to_string()];
    if let Some(sha) = &config.commit_sha {
        parts.push(format!("commit {}", sha));
    }
    if let Some(run) = &config.run_id {
        parts.push(format!("run {}", run));
    }
    format!("\n<sub>{}</sub>\n", parts.join(" · "))
}
