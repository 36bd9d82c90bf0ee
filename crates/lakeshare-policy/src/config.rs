//! Configuration for policy reconciliation.

use std::time::Duration;

use lakeshare_core::chunking::{DEFAULT_MAX_POLICY_SIZE, DEFAULT_POLICY_HEADER_BUFFER};
use lakeshare_core::SizeLimits;
use serde::{Deserialize, Deserializer};

/// Managed policies a role may hold when the quota lookup yields nothing.
pub const DEFAULT_POLICY_QUOTA: usize = 10;

/// Configuration for the reconciler and the share managers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Maximum encoded size of one policy document.
    pub max_policy_size: usize,
    /// Bytes reserved per document for the envelope.
    pub statement_overhead_buffer: usize,
    /// Fallback managed-policy quota per role.
    pub default_policy_quota: usize,
    /// Deadline for every individual cloud call.
    #[serde(rename = "call_timeout_ms", deserialize_with = "millis")]
    pub call_timeout: Duration,
    /// Delete documents that end up empty instead of keeping a placeholder.
    pub prune_empty_documents: bool,
    /// Delay between checks for a freshly requested access point.
    #[serde(rename = "access_point_poll_interval_ms", deserialize_with = "millis")]
    pub access_point_poll_interval: Duration,
    /// How many times to check before giving up on the access point.
    pub access_point_poll_attempts: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_policy_size: DEFAULT_MAX_POLICY_SIZE,
            statement_overhead_buffer: DEFAULT_POLICY_HEADER_BUFFER,
            default_policy_quota: DEFAULT_POLICY_QUOTA,
            call_timeout: Duration::from_secs(30),
            prune_empty_documents: false,
            access_point_poll_interval: Duration::from_secs(30),
            access_point_poll_attempts: 5,
        }
    }
}

impl PolicyConfig {
    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits::new(self.max_policy_size, self.statement_overhead_buffer)
    }
}

/// Deserialize a duration given in milliseconds.
pub fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
