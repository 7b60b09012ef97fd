//! Findings accumulated during an investigation
//!
//! A Finding is one piece of evidence with a severity and category. Findings
//! only ever accumulate within a run; the scorer treats them as a multiset,
//! the report renders them in discovery order.

use serde::{Deserialize, Serialize};

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Severity::Info => "💡",
            Severity::Warning => "⚠️",
            Severity::Critical => "❌",
        }
    }
}

/// Which check produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Ticket,
    Documentation,
    TestCoverage,
    ReviewTool,
    Scope,
    Security,
}

impl Category {
    /// Display heading for the report's grouped findings section.
    pub fn heading(&self) -> &'static str {
        match self {
            Category::Ticket => "Tickets",
            Category::Documentation => "Documentation",
            Category::TestCoverage => "Test Coverage",
            Category::ReviewTool => "Review Tools",
            Category::Scope => "Scope",
            Category::Security => "Security",
        }
    }
}

/// A single piece of evidence discovered during the investigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    /// File the finding points at, when there is one.
    pub file: Option<String>,
    /// Set by the exempt auditor: this finding fails the run regardless of score.
    #[serde(default)]
    pub forces_fail: bool,
}

impl Finding {
    pub fn new(severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            file: None,
            forces_fail: false,
        }
    }

    pub fn info(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    pub fn critical(category: Category, message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, category, message)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Mark this finding as one that fails the run on its own.
    pub fn forcing(mut self) -> Self {
        self.forces_fail = true;
        self
    }
}

/// Append-only finding log for one investigation run.
///
/// A fresh log is created per run; a re-triggered investigation never
/// inherits findings from a superseded one.
#[derive(Debug, Clone, Default)]
pub struct FindingLog {
    findings: Vec<Finding>,
}

impl FindingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn as_slice(&self) -> &[Finding] {
        &self.findings
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_forcing_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.forces_fail && f.severity == Severity::Critical)
    }
}
