//! Engine configuration.

use std::time::Duration;

use lakeshare_policy::config::millis;
use lakeshare_policy::PolicyConfig;
use serde::Deserialize;

/// Configuration for the [`ShareEngine`](crate::ShareEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reconciler and manager settings.
    pub policy: PolicyConfig,
    /// How long to wait for the dataset and principal locks.
    #[serde(rename = "lock_timeout_ms", deserialize_with = "millis")]
    pub lock_timeout: Duration,
    /// Delay between lock attempts.
    #[serde(rename = "lock_poll_interval_ms", deserialize_with = "millis")]
    pub lock_poll_interval: Duration,
    /// Verify every granted item and record its health.
    pub verify_after_grant: bool,
    /// Delete items once their revoke succeeded.
    pub remove_items_after_revoke: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            lock_timeout: Duration::from_secs(300),
            lock_poll_interval: Duration::from_secs(10),
            verify_after_grant: true,
            remove_items_after_revoke: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.verify_after_grant);
        assert!(!config.remove_items_after_revoke);
        assert!(config.lock_poll_interval < config.lock_timeout);
    }

    #[test]
    fn test_nested_deserialize() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"lock_timeout_ms": 250, "policy": {"prune_empty_documents": true}}"#,
        )
        .unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert!(config.policy.prune_empty_documents);
        assert_eq!(config.policy.default_policy_quota, 10);
        assert!(config.verify_after_grant);
    }
}
