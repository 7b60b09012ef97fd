//! Confidence scoring
//!
//! Folds the accumulated findings into a single 0-100 confidence value
//! using a rubric that is plain data: penalty weights, the no-traceability
//! cap, and the published score bands all live in [`Rubric`] so they can be
//! tuned from policy without touching orchestration.

use crate::findings::{Finding, Severity};
use serde::{Deserialize, Serialize};

/// Which audit path produced the findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    Full,
    Exempt,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditMode::Full => "full",
            AuditMode::Exempt => "exempt",
        }
    }
}

/// A labeled score range, highest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub floor: u8,
    pub label: String,
}

/// Scoring weights and bands, evaluated once per investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rubric {
    pub critical_penalty: u32,
    pub warning_penalty: u32,
    pub info_penalty: u32,
    /// Ceiling applied in full mode when no ticket verified and no document found.
    pub no_traceability_cap: u8,
    pub bands: Vec<ScoreBand>,
}

impl Default for Rubric {
    fn default() -> Self {
        let band = |floor: u8, label: &str| ScoreBand {
            floor,
            label: label.to_string(),
        };
        Self {
            critical_penalty: 25,
            warning_penalty: 8,
            info_penalty: 0,
            no_traceability_cap: 29,
            bands: vec![
                band(90, "Full traceability"),
                band(70, "Minor gaps"),
                band(50, "Significant gaps"),
                band(30, "Major issues"),
                band(0, "No traceability"),
            ],
        }
    }
}

impl Rubric {
    fn penalty(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical_penalty,
            Severity::Warning => self.warning_penalty,
            Severity::Info => self.info_penalty,
        }
    }

    /// Label of the band a score falls into.
    pub fn band_label(&self, score: u8) -> &str {
        self.bands
            .iter()
            .find(|b| score >= b.floor)
            .map(|b| b.label.as_str())
            .unwrap_or("")
    }
}

/// Evidence about traceability used for the full-mode floor rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceabilityEvidence {
    pub verified_tickets: usize,
    pub documents_found: usize,
}

impl TraceabilityEvidence {
    fn absent(&self) -> bool {
        self.verified_tickets == 0 && self.documents_found == 0
    }
}

/// The computed score together with the findings that produced it.
#[derive(Debug, Clone)]
pub struct ConfidenceScore {
    pub value: u8,
    pub findings: Vec<Finding>,
}

/// Pass/fail outcome against the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Verdict::Pass => "✅",
            Verdict::Fail => "❌",
        }
    }
}

/// Compute the confidence score for one investigation run.
///
/// Deterministic and order-independent: only the multiset of findings (and
/// the traceability evidence) matters. Called exactly once per run.
pub fn score(
    rubric: &Rubric,
    mode: AuditMode,
    findings: &[Finding],
    evidence: TraceabilityEvidence,
) -> ConfidenceScore {
    let deductions: u32 = findings.iter().map(|f| rubric.penalty(f.severity)).sum();
    let mut value = 100u32.saturating_sub(deductions).min(100) as u8;

    // Floor rule: total absence of traceability caps the score no matter
    // what else looks good.
    if mode == AuditMode::Full && evidence.absent() {
        value = value.min(rubric.no_traceability_cap);
    }

    ConfidenceScore {
        value,
        findings: findings.to_vec(),
    }
}

/// Determine the verdict for a scored run.
///
/// Exempt-audit forcing criticals fail the run independent of the number.
pub fn verdict(score: &ConfidenceScore, threshold: u8) -> Verdict {
    if score.findings.iter().any(|f| f.forces_fail) {
        return Verdict::Fail;
    }
    if score.value >= threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}
