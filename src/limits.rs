//! Per-host caps on concurrent upstream requests, shared by the proxy and
//! the search and translation adapters.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::UpstreamFailure;

/// Hosts tracked before idle entries are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Caps concurrent upstream requests per host.
///
/// Proxy permits live as long as the relayed response body, so a slow or huge
/// download keeps its slot until the client finishes or goes away.
#[derive(Debug)]
pub struct HostLimiter {
    per_host: usize,
    hosts: DashMap<String, Arc<Semaphore>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            hosts: DashMap::new(),
        }
    }

    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        if self.hosts.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let semaphore = self
            .hosts
            .entry(host.to_ascii_lowercase())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone();

        if semaphore.available_permits() == 0 {
            debug!(host = %host, limit = self.per_host, "waiting for upstream connection slot");
        }

        semaphore.acquire_owned().await
    }

    /// Wait at most `timeout` for a slot on `host`.
    pub async fn acquire_within(
        &self,
        host: &str,
        timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, UpstreamFailure> {
        match tokio::time::timeout(timeout, self.acquire(host)).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(UpstreamFailure::Other),
            Err(_) => {
                warn!(host = %host, limit = self.per_host, "no upstream connection slot within deadline");
                Err(UpstreamFailure::Timeout)
            }
        }
    }

    /// Drop entries nobody is holding a permit for.
    fn prune(&self) {
        let before = self.hosts.len();
        self.hosts.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
        debug!(before, after = self.hosts.len(), "pruned idle host limiters");
    }

    pub fn tracked_hosts(&self) -> usize {
        self.hosts.len()
    }
}
