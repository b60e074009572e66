//! Validation report types and the schema-version comparator.

use std::sync::LazyLock;

use regex::Regex;

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

/// One finding from checkpoint validation. `code` values are contract names
/// (`parse_error`, `INVALID_PHASE`, `STALE_STATE`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Accumulated findings from the parse, validate and integrity stages.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, code: &'static str, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(code, message));
    }

    pub fn warning(&mut self, code: &'static str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(code, message));
    }

    /// A report is valid when no errors accumulated; warnings are fine.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

/// Outcome of comparing a persisted schema version against ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Same major, not older: resume without comment.
    Current,
    /// Same major but older minor or patch: resume with `OLD_VERSION` warning.
    OlderMinor,
    /// Newer major than the implementation: fatal `FUTURE_VERSION`.
    FutureMajor,
    /// Older major: fatal `INVALID_VERSION`.
    OlderMajor,
    /// Not `X.Y.Z` at all: fatal `schema_error`.
    Malformed,
}

/// Compare `found` (from the file) against `ours` (the implementation's
/// schema version). Both must match `^\d+\.\d+\.\d+$`.
pub fn compare_versions(found: &str, ours: &str) -> VersionCheck {
    if !VERSION_PATTERN.is_match(found) {
        return VersionCheck::Malformed;
    }
    let parse = |v: &str| -> Option<(u64, u64, u64)> {
        let mut parts = v.split('.').map(|p| p.parse::<u64>().ok());
        Some((parts.next()??, parts.next()??, parts.next()??))
    };
    let (Some(found), Some(ours)) = (parse(found), parse(ours)) else {
        return VersionCheck::Malformed;
    };

    if found.0 > ours.0 {
        VersionCheck::FutureMajor
    } else if found.0 < ours.0 {
        VersionCheck::OlderMajor
    } else if (found.1, found.2) < (ours.1, ours.2) {
        VersionCheck::OlderMinor
    } else {
        VersionCheck::Current
    }
}
