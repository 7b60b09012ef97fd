//! Investigation orchestrator
//!
//! Drives one audit run through its stages: announce, scope, investigate
//! (full or exempt), wait on review tools, score, publish. Each run gets a
//! fresh finding log and trail; nothing carries over from a superseded run.
//! Stage progress is published in place so the PR comment always shows how
//! far the investigation got, even if the process dies.

use crate::ai::AlignmentJudge;
use crate::config::AuditConfig;
use crate::coverage;
use crate::docs;
use crate::exempt;
use crate::findings::{Category, Finding, FindingLog, Severity};
use crate::publish::{ReportPublisher, ReportSink};
use crate::report::{self, AuditTrail, FinalReport};
use crate::review::{self, ReviewToolHost};
use crate::scope::{self, FileClass};
use crate::score::{self, AuditMode, ConfidenceScore, TraceabilityEvidence, Verdict};
use crate::tickets::{self, TicketReference, TicketStore};
use anyhow::Result;

/// Where the run currently is; used for progress labels and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ScopingChange,
    ExemptAudit,
    FullInvestigation,
    AwaitingReviewTools,
    Scoring,
}

impl Stage {
    fn label(&self) -> &'static str {
        match self {
            Stage::ScopingChange => "scoping the change",
            Stage::ExemptAudit => "running the exempt audit",
            Stage::FullInvestigation => "verifying traceability",
            Stage::AwaitingReviewTools => "awaiting review tools",
            Stage::Scoring => "scoring",
        }
    }
}

/// Result of one completed investigation.
#[derive(Debug)]
pub struct AuditOutcome {
    pub mode: AuditMode,
    pub score: ConfidenceScore,
    pub verdict: Verdict,
}

impl AuditOutcome {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

/// One investigation run wired to its external capabilities.
///
/// Every capability is a trait object so the engine can run against the
/// production services or in-memory fakes alike. Absent optional
/// capabilities degrade the investigation instead of aborting it.
pub struct Engine<'a> {
    config: &'a AuditConfig,
    ticket_store: Option<&'a dyn TicketStore>,
    judge: Option<&'a dyn AlignmentJudge>,
    review_host: Option<&'a dyn ReviewToolHost>,
    sink: &'a dyn ReportSink,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: &'a AuditConfig,
        ticket_store: Option<&'a dyn TicketStore>,
        judge: Option<&'a dyn AlignmentJudge>,
        review_host: Option<&'a dyn ReviewToolHost>,
        sink: &'a dyn ReportSink,
    ) -> Self {
        Self {
            config,
            ticket_store,
            judge,
            review_host,
            sink,
        }
    }

    /// Run the investigation to completion and publish the report.
    ///
    /// A fatal error after the announcement still publishes a degraded
    /// failure report before propagating.
    pub async fn run(&self, diff: &str) -> Result<AuditOutcome> {
        let publisher = ReportPublisher::new(self.sink, self.config.run_sequence);
        let mut trail = AuditTrail::new();

        // Announce immediately so reviewers see the audit is underway.
        // A failed announcement is not fatal; the final publish is.
        if let Err(err) = publisher.publish(&report::render_placeholder(self.config)).await {
            tracing::warn!(%err, "could not publish the announcement");
        }

        match self.investigate(diff, &publisher, &mut trail).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let body = report::render_fatal(self.config, &format!("{:#}", err), &trail);
                if let Err(publish_err) = publisher.publish(&body).await {
                    tracing::error!(%publish_err, "could not publish the failure report");
                }
                Err(err)
            }
        }
    }

    async fn investigate(
        &self,
        diff: &str,
        publisher: &ReportPublisher<'_>,
        trail: &mut AuditTrail,
    ) -> Result<AuditOutcome> {
        // ==== Scoping ====
        tracing::info!(pr = self.config.pr_number, stage = Stage::ScopingChange.label());
        trail.record(format!(
            "investigation started {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ));
        let scope = scope::scope_change(self.config, diff);
        trail.record(format!(
            "scoped {} file(s) against {}, +{} \u{2212}{}",
            scope.files.len(),
            self.config.base_branch,
            scope.lines_added,
            scope.lines_removed
        ));
        self.progress(publisher, Stage::ScopingChange, trail).await;

        let mut log = FindingLog::new();
        if scope.is_empty() {
            log.push(Finding::info(
                Category::Scope,
                "no file changes parsed from the diff",
            ));
        }

        // ==== Investigation (full or exempt) ====
        let (mode, references, evidence) = if self.config.exempt_requested() {
            self.exempt_stage(&scope, &mut log, trail).await
        } else {
            self.full_stage(publisher, &scope, &mut log, trail).await
        };

        // ==== Review tools (both modes: exemption never skips the gate) ====
        self.review_stage(publisher, &mut log, trail).await;

        // ==== Scoring ====
        tracing::info!(
            pr = self.config.pr_number,
            stage = Stage::Scoring.label(),
            criticals = log.count_by_severity(Severity::Critical),
            warnings = log.count_by_severity(Severity::Warning),
        );
        if log.has_forcing_critical() {
            tracing::warn!(pr = self.config.pr_number, "exempt check violation forces a fail");
        }
        let rubric = &self.config.policy.rubric;
        let score = score::score(rubric, mode, log.as_slice(), evidence);
        let verdict = score::verdict(&score, self.config.confidence_threshold);
        trail.record(format!(
            "scored {}/100 ({})",
            score.value,
            rubric.band_label(score.value)
        ));
        tracing::info!(
            pr = self.config.pr_number,
            score = score.value,
            passed = verdict.passed(),
            "investigation complete"
        );

        // ==== Publish ====
        let body = report::render_final(&FinalReport {
            config: self.config,
            mode,
            score: &score,
            verdict,
            references: &references,
            trail,
        });
        publisher.publish(&body).await?;

        Ok(AuditOutcome {
            mode,
            score,
            verdict,
        })
    }

    async fn exempt_stage(
        &self,
        scope: &scope::ChangeScope,
        log: &mut FindingLog,
        trail: &mut AuditTrail,
    ) -> (AuditMode, Vec<TicketReference>, TraceabilityEvidence) {
        tracing::info!(pr = self.config.pr_number, stage = Stage::ExemptAudit.label());
        trail.record(format!(
            "'{}' label present, running the reduced audit",
            self.config.exempt_label
        ));
        log.extend(exempt::audit(self.config, scope, self.judge).await);
        trail.record("exempt scope check complete".to_string());
        (AuditMode::Exempt, Vec::new(), TraceabilityEvidence::default())
    }

    async fn full_stage(
        &self,
        publisher: &ReportPublisher<'_>,
        scope: &scope::ChangeScope,
        log: &mut FindingLog,
        trail: &mut AuditTrail,
    ) -> (AuditMode, Vec<TicketReference>, TraceabilityEvidence) {
        tracing::info!(
            pr = self.config.pr_number,
            stage = Stage::FullInvestigation.label()
        );

        // Tickets
        let pr_text = format!("{}\n{}", self.config.pr_title, self.config.pr_body);
        let extracted = tickets::extract_references(&self.config.ticket_pattern, &pr_text);
        if extracted.is_empty() {
            log.push(Finding::warning(
                Category::Ticket,
                "no ticket references found in the PR title or body",
            ));
            trail.record("no ticket references found".to_string());
        } else {
            trail.record(format!("{} ticket reference(s) found", extracted.len()));
        }
        let verification = tickets::verify(self.ticket_store, extracted).await;
        let verified_tickets = verification.verified_count();
        if !verification.references.is_empty() {
            trail.record(format!(
                "verified {} of {} ticket reference(s)",
                verified_tickets,
                verification.references.len()
            ));
        }
        log.extend(verification.findings);
        let references = verification.references;

        // Documentation
        let candidates = docs::discover(self.config, &references);
        let alignment = docs::align(self.judge, &references, &candidates, scope).await;
        trail.record(format!(
            "{} substantive document(s) located",
            alignment.documents_found
        ));
        let documents_found = alignment.documents_found;
        log.extend(alignment.findings);

        // Test coverage
        let source_files = scope
            .files
            .iter()
            .filter(|f| f.needs_test_coverage())
            .count();
        log.extend(coverage::check(scope));
        trail.record(format!(
            "test coverage checked for {} source file(s), {} test file(s) changed",
            source_files,
            scope.files_of_class(FileClass::Test).count()
        ));

        self.progress(publisher, Stage::FullInvestigation, trail).await;

        (
            AuditMode::Full,
            references,
            TraceabilityEvidence {
                verified_tickets,
                documents_found,
            },
        )
    }

    async fn review_stage(
        &self,
        publisher: &ReportPublisher<'_>,
        log: &mut FindingLog,
        trail: &mut AuditTrail,
    ) {
        if self.config.required_reviewers.is_empty() {
            trail.record("no review tools required".to_string());
            return;
        }
        tracing::info!(
            pr = self.config.pr_number,
            stage = Stage::AwaitingReviewTools.label()
        );
        self.progress(publisher, Stage::AwaitingReviewTools, trail).await;

        match self.review_host {
            Some(host) => {
                let statuses = review::await_tools(host, self.config).await;
                trail.record(format!(
                    "review tools: {}",
                    statuses
                        .iter()
                        .map(|s| format!("{} {}", s.name, s.state.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
                log.extend(review::findings(&statuses));
            }
            None => {
                for name in &self.config.required_reviewers {
                    log.push(Finding::warning(
                        Category::ReviewTool,
                        format!("{} — review state could not be determined (no credential)", name),
                    ));
                }
                trail.record("review tools skipped (no credential)".to_string());
            }
        }
    }

    async fn progress(&self, publisher: &ReportPublisher<'_>, stage: Stage, trail: &AuditTrail) {
        let body = report::render_progress(self.config, stage.label(), trail);
        if let Err(err) = publisher.publish(&body).await {
            tracing::warn!(stage = stage.label(), %err, "progress update not published");
        }
    }
}
