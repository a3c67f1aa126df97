//! Static screening of submitted source code.
//!
//! Two independent rule sets run over the raw text: the import allow-list
//! ([`imports`]) and the deny-list of dangerous calls and identifiers
//! ([`deny`]). Every violation is collected; the result lists import
//! violations first, then deny patterns, then globals, each ordered by line.
//!
//! Screening is advisory. Resource limits enforced by the backend remain the
//! hard boundary.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LanguageSpec;

pub mod deny;
pub mod imports;

/// A single rejected construct
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// The offending text (import target, pattern or identifier)
    pub construct: String,

    /// Which rule rejected it
    pub rule: String,

    /// 1-based source line
    pub line: usize,
}

impl Violation {
    pub fn new(construct: impl Into<String>, rule: impl Into<String>, line: usize) -> Self {
        Self {
            construct: construct.into(),
            rule: rule.into(),
            line,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {} ({})", self.line, self.construct, self.rule)
    }
}

/// Outcome of screening a source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

/// Screen `code` against the language's security policy
pub fn validate(code: &str, spec: &LanguageSpec) -> ValidationResult {
    let mut violations = imports::check(code, &spec.policy.imports);
    violations.extend(deny::check(code, &spec.policy.deny));

    if !violations.is_empty() {
        debug!(
            language = %spec.id,
            count = violations.len(),
            "source rejected by static screening"
        );
    }

    ValidationResult::from_violations(violations)
}
