//! Turning verification findings into item health.

use lakeshare_core::{now_millis, ItemHealth};
use tracing::debug;

use crate::error::Result;
use crate::findings::{findings_message, Finding};
use crate::managers::ShareManager;

/// Health for a set of findings observed at `at` (Unix ms).
pub fn health_from_findings(findings: &[Finding], at: i64) -> ItemHealth {
    if findings.is_empty() {
        ItemHealth::healthy(at)
    } else {
        ItemHealth::unhealthy(findings_message(findings), at)
    }
}

/// Read-only health check of one share.
pub struct HealthVerifier<'a> {
    manager: &'a dyn ShareManager,
}

impl<'a> HealthVerifier<'a> {
    pub fn new(manager: &'a dyn ShareManager) -> Self {
        Self { manager }
    }

    /// Run the manager's check. The findings and the health they imply.
    pub async fn verify(&self) -> Result<(Vec<Finding>, ItemHealth)> {
        let findings = self.manager.check().await?;
        let health = health_from_findings(&findings, now_millis());
        debug!(findings = findings.len(), status = %health.status, "verification finished");
        Ok((findings, health))
    }
}
