//! Verification findings.
//!
//! Drift is data, not an error: every check returns a (possibly empty) list
//! of [`Finding`]s so partial health can be reported per statement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of drift was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingKind {
    /// A policy, access point, key or bucket policy does not exist.
    ResourceMissing,
    /// A share policy exists but is not attached to the principal's role.
    PolicyNotAttached,
    /// A required statement (or a whole statement family) is absent.
    MissingStatement,
    /// The statement exists but lacks some resources or conditions.
    MissingResources,
    /// A resource is listed more than once within one statement family.
    DuplicateResources,
    /// Required actions are absent from a statement.
    MissingActions,
    /// A statement carries actions beyond the required set.
    ExtraActions,
    /// The principal is not listed in a resource or key policy statement.
    MissingPrincipal,
    /// The principal's role cannot be resolved.
    PrincipalNotFound,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingKind::ResourceMissing => "resource missing",
            FindingKind::PolicyNotAttached => "policy not attached",
            FindingKind::MissingStatement => "missing statement",
            FindingKind::MissingResources => "missing resources",
            FindingKind::DuplicateResources => "duplicate resources",
            FindingKind::MissingActions => "missing actions",
            FindingKind::ExtraActions => "extra actions",
            FindingKind::MissingPrincipal => "missing principal",
            FindingKind::PrincipalNotFound => "principal not found",
        };
        f.write_str(label)
    }
}

/// One observed deviation from the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// The role or principal the check was about.
    pub principal: String,
    /// The policy, bucket, key or statement that deviates.
    pub resource: String,
    pub expected: String,
    pub actual: String,
}

impl Finding {
    pub fn new(
        kind: FindingKind,
        principal: impl Into<String>,
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            principal: principal.into(),
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// `resource` should exist but does not.
    pub fn missing(principal: &str, resource: impl Into<String>) -> Self {
        Self::new(FindingKind::ResourceMissing, principal, resource, "exists", "absent")
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {} on {}: expected {}, found {}",
            self.kind, self.principal, self.resource, self.expected, self.actual
        )
    }
}

/// Join findings into one health message.
pub fn findings_message(findings: &[Finding]) -> String {
    findings
        .iter()
        .map(Finding::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}
