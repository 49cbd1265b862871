//! Background synchronization of provider discovery metadata
//!
//! [`ProviderConfigSyncer`] fetches the discovery document once up front
//! (failure there aborts startup) and then keeps the shared
//! [`ProviderConfigStore`] fresh from a spawned tokio task, scheduling the
//! next fetch just ahead of the current config's expiry and backing off on
//! failures without ever discarding the last good snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::discovery::{ProviderConfigFetcher, ProviderConfigStore};
use crate::error::Result;

/// Floor for the time between two scheduled fetches.
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// How far ahead of the config's expiry the next fetch is scheduled.
pub const SYNC_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Retry delay after a failed periodic fetch.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(10);

/// Handle to a running syncer task
///
/// Stopping is best-effort: an in-flight fetch completes, the loop just
/// never schedules another one.  Dropping the handle has the same effect.
#[derive(Debug)]
pub struct SyncHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signals the syncer to stop and waits for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// Periodic fetch-and-publish loop for provider configuration
pub struct ProviderConfigSyncer {
    fetcher: Arc<dyn ProviderConfigFetcher>,
    store: Arc<ProviderConfigStore>,
}

impl ProviderConfigSyncer {
    pub fn new(fetcher: Arc<dyn ProviderConfigFetcher>, store: Arc<ProviderConfigStore>) -> Self {
        Self { fetcher, store }
    }

    /// Performs the initial fetch, publishes it, and spawns the periodic
    /// loop.
    ///
    /// Returns only after the first fetch has succeeded, so callers can
    /// rely on the store holding a real configuration once this resolves.
    ///
    /// # Errors
    ///
    /// Returns the first fetch's error without spawning anything; later
    /// fetch failures are logged and retried instead.
    pub async fn run(self) -> Result<SyncHandle> {
        let config = self.fetcher.fetch_config().await?;
        info!(issuer = %config.issuer, "provider configuration synced");
        let mut next = next_sync_interval(config.expires_at);
        self.store.set(config);

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("provider configuration syncer stopped");
                        return;
                    }
                    _ = tokio::time::sleep(next) => {}
                }

                match self.fetcher.fetch_config().await {
                    Ok(config) => {
                        info!(
                            issuer = %config.issuer,
                            expires_at = ?config.expires_at,
                            "provider configuration synced"
                        );
                        next = next_sync_interval(config.expires_at);
                        self.store.set(config);
                    }
                    Err(e) => {
                        warn!(error = %e, "provider configuration sync failed, retrying");
                        next = FAILURE_BACKOFF;
                    }
                }
            }
        });

        Ok(SyncHandle {
            stop: stop_tx,
            task,
        })
    }
}

/// Time until the next fetch for a config with the given expiry
fn next_sync_interval(expires_at: Option<DateTime<Utc>>) -> Duration {
    let Some(expires_at) = expires_at else {
        return MIN_SYNC_INTERVAL;
    };
    let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or_default();
    until_expiry
        .saturating_sub(SYNC_SAFETY_MARGIN)
        .max(MIN_SYNC_INTERVAL)
}
