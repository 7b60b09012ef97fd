//! Requirement and specification document alignment
//!
//! Locates candidate documents for the referenced tickets under the
//! configured issues/ and specs/ paths, screens out placeholders, and hands
//! the survivors with the diff summary to the semantic judge. The judge's
//! structured verdict is translated into findings; this module never judges
//! content itself.

use crate::ai::AlignmentJudge;
use crate::config::AuditConfig;
use crate::findings::{Category, Finding};
use crate::scope::ChangeScope;
use crate::tickets::TicketReference;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

const MAX_DOC_BYTES: usize = 20_000;

/// Which convention a candidate document was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Requirement,
    Spec,
}

/// A discovered document that may describe the change.
#[derive(Debug, Clone)]
pub struct DocCandidate {
    pub path: String,
    pub kind: DocKind,
    pub ticket: String,
    pub content: String,
}

impl DocCandidate {
    /// A document whose body is only the ticket id (or empty) has no
    /// substance and does not count as documentation.
    pub fn is_placeholder(&self) -> bool {
        let body: String = self
            .content
            .replace(&self.ticket, "")
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        body.len() < 20
    }
}

/// Result of the documentation stage.
#[derive(Debug, Default)]
pub struct AlignmentOutcome {
    pub findings: Vec<Finding>,
    /// Substantive documents found, for the traceability floor rule.
    pub documents_found: usize,
}

/// Find candidate documents for each ticket reference.
///
/// Requirement docs live at `{issues_path}/{TICKET}.md`; spec docs are any
/// file under `{specs_path}` whose name or content references the ticket.
/// A missing directory means no documents, not an error.
pub fn discover(config: &AuditConfig, references: &[TicketReference]) -> Vec<DocCandidate> {
    let mut candidates = Vec::new();

    for reference in references {
        let issue_path = config
            .target_repo
            .join(&config.issues_path)
            .join(format!("{}.md", reference.id));
        if let Ok(content) = fs::read_to_string(&issue_path) {
            candidates.push(DocCandidate {
                path: format!("{}/{}.md", config.issues_path, reference.id),
                kind: DocKind::Requirement,
                ticket: reference.id.clone(),
                content: clip(content),
            });
        }

        let specs_dir = config.target_repo.join(&config.specs_path);
        for doc in specs_matching(&specs_dir, &reference.id) {
            let rel = doc
                .strip_prefix(&config.target_repo)
                .unwrap_or(&doc)
                .to_string_lossy()
                .to_string();
            if let Ok(content) = fs::read_to_string(&doc) {
                candidates.push(DocCandidate {
                    path: rel,
                    kind: DocKind::Spec,
                    ticket: reference.id.clone(),
                    content: clip(content),
                });
            }
        }
    }

    candidates
}

fn specs_matching(specs_dir: &Path, ticket: &str) -> Vec<std::path::PathBuf> {
    let mut matches = Vec::new();
    for entry in WalkDir::new(specs_dir)
        .follow_links(false)
        .into_iter()
        .flatten()
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".md") {
            continue;
        }
        if name.contains(ticket) {
            matches.push(path.to_path_buf());
            continue;
        }
        // Feature-slug files count when their content references the ticket.
        if fs::read_to_string(path)
            .map(|c| c.contains(ticket))
            .unwrap_or(false)
        {
            matches.push(path.to_path_buf());
        }
    }
    matches.sort();
    matches
}

fn clip(content: String) -> String {
    if content.len() <= MAX_DOC_BYTES {
        return content;
    }
    let mut end = MAX_DOC_BYTES;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

/// Translate document presence and the judge's verdict into findings.
pub async fn align(
    judge: Option<&dyn AlignmentJudge>,
    references: &[TicketReference],
    candidates: &[DocCandidate],
    scope: &ChangeScope,
) -> AlignmentOutcome {
    let mut outcome = AlignmentOutcome::default();

    let substantive: Vec<&DocCandidate> =
        candidates.iter().filter(|c| !c.is_placeholder()).collect();
    outcome.documents_found = substantive.len();

    for candidate in candidates.iter().filter(|c| c.is_placeholder()) {
        outcome.findings.push(
            Finding::warning(
                Category::Documentation,
                format!("{} — placeholder only, no substance", candidate.path),
            )
            .with_file(candidate.path.clone()),
        );
    }

    // Tickets with code changes but no document of either kind.
    let code_changed = scope.files.iter().any(|f| f.needs_test_coverage());
    for reference in references {
        let has_doc = substantive.iter().any(|c| c.ticket == reference.id);
        if !has_doc && code_changed {
            outcome.findings.push(Finding::warning(
                Category::Documentation,
                format!(
                    "{} — no requirement or spec document found",
                    reference.id
                ),
            ));
        }
    }

    if substantive.is_empty() {
        return outcome;
    }

    let documents = substantive
        .iter()
        .map(|c| format!("=== {} ===\n{}", c.path, c.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    match judge {
        Some(judge) => match judge.judge(&scope.summary.for_analysis(), &documents).await {
            Ok(verdict) if verdict.aligned => {
                outcome.findings.push(Finding::info(
                    Category::Documentation,
                    format!("documents align with the change: {}", verdict.rationale),
                ));
            }
            Ok(verdict) => {
                for issue in &verdict.issues {
                    outcome
                        .findings
                        .push(Finding::warning(Category::Documentation, issue.clone()));
                }
                if verdict.issues.is_empty() {
                    outcome.findings.push(Finding::warning(
                        Category::Documentation,
                        format!("documents do not describe the change: {}", verdict.rationale),
                    ));
                }
            }
            Err(err) => {
                tracing::warn!(%err, "alignment judgement unavailable");
                outcome.findings.push(Finding::warning(
                    Category::Documentation,
                    "alignment indeterminate (analysis service unavailable)",
                ));
            }
        },
        None => {
            outcome.findings.push(Finding::warning(
                Category::Documentation,
                "alignment indeterminate (analysis not configured)",
            ));
        }
    }

    outcome
}
