//! Test coverage check for changed source files
//!
//! Every added or modified source file should come with a changed test file
//! whose name plausibly corresponds. Deletions and doc/config changes are
//! exempt by definition.

use crate::findings::{Category, Finding};
use crate::scope::{ChangeScope, FileClass};

/// Check the scoped change and emit one warning per uncovered source file.
pub fn check(scope: &ChangeScope) -> Vec<Finding> {
    let changed_tests: Vec<&str> = scope
        .files_of_class(FileClass::Test)
        .map(|f| f.path.as_str())
        .collect();

    let mut findings = Vec::new();
    for file in scope.files.iter().filter(|f| f.needs_test_coverage()) {
        if changed_tests.iter().any(|t| corresponds(&file.path, t)) {
            findings.push(
                Finding::info(
                    Category::TestCoverage,
                    format!("{} — test changes present", file.path),
                )
                .with_file(file.path.clone()),
            );
        } else {
            findings.push(
                Finding::warning(
                    Category::TestCoverage,
                    format!("{} — no corresponding test file changed", file.path),
                )
                .with_file(file.path.clone()),
            );
        }
    }
    findings
}

/// Does a changed test path plausibly cover a source path?
///
/// Match on normalized base names: `src/auth.py` is covered by
/// `tests/test_auth.py`, `auth_test.go`, `auth.spec.ts`, or a mirrored
/// `tests/auth.rs`.
fn corresponds(source_path: &str, test_path: &str) -> bool {
    let source = normalize(stem(source_path));
    let test = normalize(stem(test_path));
    !source.is_empty() && source == test
}

fn stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split_once('.').map(|(s, _)| s).unwrap_or(name)
}

/// Strip test prefixes/suffixes so a test stem lines up with its source stem.
fn normalize(stem: &str) -> String {
    let lower = stem.to_lowercase();
    let stripped = lower
        .strip_prefix("test_")
        .or_else(|| lower.strip_suffix("_test"))
        .or_else(|| lower.strip_suffix("_spec"))
        .or_else(|| lower.strip_prefix("spec_"))
        .unwrap_or(&lower);
    stripped.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Severity;
    use crate::scope::{ChangeKind, ChangedFile};

    fn file(path: &str, kind: ChangeKind, class: FileClass) -> ChangedFile {
        ChangedFile {
            path: path.to_string(),
            kind,
            lines_added: 1,
            lines_removed: 0,
            class,
        }
    }

    fn scope_of(files: Vec<ChangedFile>) -> ChangeScope {
        ChangeScope {
            files,
            ..Default::default()
        }
    }

    #[test]
    fn test_covered_source_file() {
        let scope = scope_of(vec![
            file("src/auth.py", ChangeKind::Modified, FileClass::Source),
            file("tests/test_auth.py", ChangeKind::Modified, FileClass::Test),
        ]);
        let findings = check(&scope);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_uncovered_source_file_named_in_warning() {
        let scope = scope_of(vec![file(
            "src/billing.rs",
            ChangeKind::Added,
            FileClass::Source,
        )]);
        let findings = check(&scope);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(findings[0].message.contains("src/billing.rs"));
        assert_eq!(findings[0].file.as_deref(), Some("src/billing.rs"));
    }

    #[test]
    fn test_one_warning_per_uncovered_file() {
        let scope = scope_of(vec![
            file("src/a.rs", ChangeKind::Modified, FileClass::Source),
            file("src/b.rs", ChangeKind::Modified, FileClass::Source),
            file("src/c.rs", ChangeKind::Modified, FileClass::Source),
        ]);
        let warnings = check(&scope)
            .into_iter()
            .filter(|f| f.severity == Severity::Warning)
            .count();
        assert_eq!(warnings, 3);
    }

    #[test]
    fn test_deletions_and_nonsource_exempt() {
        let scope = scope_of(vec![
            file("src/gone.rs", ChangeKind::Deleted, FileClass::Source),
            file("README.md", ChangeKind::Modified, FileClass::Doc),
            file("Cargo.toml", ChangeKind::Modified, FileClass::Config),
        ]);
        assert!(check(&scope).is_empty());
    }

    #[test]
    fn test_correspondence_conventions() {
        assert!(corresponds("src/auth.py", "tests/test_auth.py"));
        assert!(corresponds("pkg/auth.go", "pkg/auth_test.go"));
        assert!(corresponds("web/auth.ts", "web/auth.spec.ts"));
        assert!(corresponds("web/auth.ts", "web/__tests__/auth.test.ts"));
        assert!(corresponds("src/auth.rs", "tests/auth.rs"));
        assert!(!corresponds("src/auth.py", "tests/test_billing.py"));
    }

    #[test]
    fn test_mirrored_tree_correspondence() {
        let scope = scope_of(vec![
            file("src/parser.rs", ChangeKind::Modified, FileClass::Source),
            file("tests/parser.rs", ChangeKind::Modified, FileClass::Test),
        ]);
        let findings = check(&scope);
        assert_eq!(findings[0].severity, Severity::Info);
    }
}
