//! Cooperative locks serializing work on one dataset and one principal.
//!
//! A share is processed while holding the lock of its dataset and of its
//! principal, so two shares touching the same bucket policy or the same
//! role's policies never run at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lakeshare_core::{PrincipalKind, ShareObject};
use tracing::{debug, warn};

use crate::error::{Result, ShareError};

/// Resources to lock while processing `share`.
pub fn share_lock_resources(share: &ShareObject) -> Vec<String> {
    let principal = match share.principal.kind {
        PrincipalKind::ConsumptionRole => format!("consumption_role/{}", share.principal.id),
        PrincipalKind::Group => {
            format!("environment_group/{}-{}", share.principal.id, share.environment_id)
        }
    };
    vec![format!("dataset/{}", share.dataset_id), principal]
}

/// Holds a lock until dropped.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Acquire every resource of a set together, or none.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Fails with [`ShareError::LockUnavailable`] once the provider gives up.
    async fn acquire(&self, resources: &[String]) -> Result<LockGuard>;
}

/// In-process lock provider polling until a timeout.
#[derive(Debug, Clone)]
pub struct MemoryLockProvider {
    held: Arc<Mutex<HashSet<String>>>,
    timeout: Duration,
    poll_interval: Duration,
}

impl MemoryLockProvider {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
            timeout,
            poll_interval,
        }
    }

    /// Take every resource if all are free.
    fn try_acquire(&self, resources: &[String]) -> Result<Option<LockGuard>> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| ShareError::LockUnavailable(e.to_string()))?;
        if resources.iter().any(|r| held.contains(r)) {
            return Ok(None);
        }
        held.extend(resources.iter().cloned());

        let shared = Arc::clone(&self.held);
        let owned = resources.to_vec();
        Ok(Some(LockGuard::new(move || {
            if let Ok(mut held) = shared.lock() {
                for resource in &owned {
                    held.remove(resource);
                }
            }
        })))
    }

    pub fn is_held(&self, resource: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(resource))
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn acquire(&self, resources: &[String]) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(guard) = self.try_acquire(resources)? {
                debug!(resources = ?resources, "lock acquired");
                return Ok(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(resources = ?resources, timeout = ?self.timeout, "lock not acquired");
                return Err(ShareError::LockUnavailable(format!(
                    "{} not released within {:?}",
                    resources.join(", "),
                    self.timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
