//! In-flight request accounting for stateful sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::session::{RequestContext, SessionRecord};
use crate::store::{SessionStore, SessionStoreExt, SetOptions};

/// Claim on a session held while one of its requests is in flight.
///
/// Created after `activeRequests` was incremented; [`release`](Self::release)
/// decrements it again. The garbage collector never removes a session that
/// still has an outstanding lease.
pub struct SessionLease {
    store: Arc<dyn SessionStore>,
    key: String,
    options: SetOptions,
    ctx: RequestContext,
    refresh_every: Option<Duration>,
}

impl SessionLease {
    pub(crate) fn new(
        store: Arc<dyn SessionStore>,
        key: String,
        options: SetOptions,
        ctx: RequestContext,
    ) -> Self {
        Self {
            store,
            key,
            options,
            ctx,
            refresh_every: None,
        }
    }

    /// Rewrite the record every `period` while a long-lived stream holds
    /// the lease, so the store's TTL cannot expire it mid-request.
    pub(crate) fn refreshing_every(mut self, period: Duration) -> Self {
        self.refresh_every = Some(period).filter(|p| !p.is_zero());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start the background refresh, if one was configured.
    ///
    /// The returned guard stops it when dropped.
    pub(crate) fn keep_alive(&self) -> Option<KeepAlive> {
        let period = self.refresh_every?;
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let options = self.options;
        let ctx = self.ctx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let refreshed = store
                    .update_json(&ctx, &key, options, |_: &mut SessionRecord| {})
                    .await;
                match refreshed {
                    Ok(Some(_)) => trace!(key = %key, "session lease refreshed"),
                    Ok(None) => {
                        debug!(key = %key, "session removed while lease was held");
                        break;
                    }
                    Err(e) => warn!(key = %key, error = %e, "failed to refresh session lease"),
                }
            }
        });
        Some(KeepAlive(task))
    }

    /// Give the claim back. Failures are logged, never returned.
    pub async fn release(self) {
        let result = self
            .store
            .update_json(&self.ctx, &self.key, self.options, |record: &mut SessionRecord| {
                record.end_request()
            })
            .await;

        match result {
            Ok(Some(record)) => trace!(
                key = %self.key,
                active_requests = record.active_requests,
                "session lease released"
            ),
            Ok(None) => debug!(key = %self.key, "session removed before lease release"),
            Err(e) => warn!(
                key = %self.key,
                request_id = %self.ctx.request_id,
                error = %e,
                "failed to release session lease"
            ),
        }
    }
}

/// Handle to a running lease refresh. Dropping it stops the refresh.
pub(crate) struct KeepAlive(JoinHandle<()>);

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.0.abort();
    }
}
