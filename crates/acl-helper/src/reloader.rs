use std::sync::Arc;
use std::time::{Duration, Instant};

use policy_engine::{PolicySnapshot, PolicyStore, SchemaError, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid policy: {0}")]
    Schema(#[from] SchemaError),

    #[error("policy load did not finish within {0:?}")]
    Timeout(Duration),
}

/// Owns the policy store and the snapshot currently in force.
///
/// A new snapshot is only installed once it is completely built, and the
/// swap is a single assignment of the `Arc`; callers holding the previous
/// one keep a consistent view.
pub struct PolicyReloader {
    store: Box<dyn PolicyStore>,
    current: Arc<PolicySnapshot>,
    interval: Duration,
    timeout: Duration,
    last_attempt: Instant,
}

impl std::fmt::Debug for PolicyReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyReloader")
            .field("store", &self.store.describe())
            .field("current", &self.current)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl PolicyReloader {
    /// Load the first snapshot.  Failure here leaves the helper with no
    /// policy at all, so the caller should treat it as fatal.
    pub async fn initial(
        store: Box<dyn PolicyStore>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, ReloadError> {
        let current = Arc::new(load_snapshot(store.as_ref(), timeout).await?);
        info!(
            store = %store.describe(),
            sources = current.entries().len(),
            rules = current.num_rules(),
            "policy loaded"
        );
        Ok(Self {
            store,
            current,
            interval,
            timeout,
            last_attempt: Instant::now(),
        })
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current)
    }

    pub fn is_stale(&self) -> bool {
        self.last_attempt.elapsed() > self.interval
    }

    /// Reload if the refresh interval has passed since the last attempt.
    ///
    /// Returns whether a new snapshot was installed.  A failed reload is
    /// logged and the previous snapshot stays in force; the interval restarts
    /// either way so a broken store is not hammered once per request.
    pub async fn refresh_if_stale(&mut self) -> bool {
        if !self.is_stale() {
            return false;
        }
        match self.reload().await {
            Ok(()) => true,
            Err(err) => {
                warn!(store = %self.store.describe(), error = %err, "policy reload failed; keeping previous policy");
                false
            }
        }
    }

    /// Unconditionally rebuild the snapshot from the store.
    pub async fn reload(&mut self) -> Result<(), ReloadError> {
        self.last_attempt = Instant::now();
        let next = load_snapshot(self.store.as_ref(), self.timeout).await?;
        debug!(
            sources = next.entries().len(),
            rules = next.num_rules(),
            "policy reloaded"
        );
        self.current = Arc::new(next);
        Ok(())
    }
}

async fn load_snapshot(
    store: &dyn PolicyStore,
    timeout: Duration,
) -> Result<PolicySnapshot, ReloadError> {
    let records = tokio::time::timeout(timeout, store.load())
        .await
        .map_err(|_| ReloadError::Timeout(timeout))??;
    Ok(PolicySnapshot::build(records)?)
}
