//! Session lifecycle: initialize, resume, delete and garbage collection.
//!
//! Statefulness here means durable identity and bookkeeping, not a pinned
//! live connection. Only the [`SessionRecord`] is shared; every request
//! still gets its own ephemeral handler and transport, so any process with
//! access to the store can serve any session.

use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::{run_ephemeral, ManagerConfig, SessionLease};
use crate::error::RpcTunnelError;
use crate::protocol::HandlerFactory;
use crate::session::{RequestContext, SessionId, SessionKey, SessionRecord, SESSION_KEY_PREFIX};
use crate::store::{SessionStore, SessionStoreExt, SetOptions};
use crate::transport::{InitializedHook, SessionIdPolicy, TransportOptions, TransportResponse};
use crate::Result;

/// Outcome of one garbage-collection sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Keys enumerated under the session prefix.
    pub scanned: usize,
    /// Stale, idle sessions removed.
    pub deleted: usize,
    /// Stale sessions kept because requests were still in flight.
    pub skipped_active: usize,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn HandlerFactory>,
    config: ManagerConfig,
}

/// Owns the session lifecycle on top of a shared [`SessionStore`].
pub struct StatefulManager {
    inner: Arc<Inner>,
    gc: Mutex<Option<JoinHandle<()>>>,
}

impl StatefulManager {
    /// Create the manager and start its garbage collector.
    ///
    /// The collector runs every `stale_timeout` on the current tokio
    /// runtime. Outside a runtime no collector is started and expiry is
    /// left to the store's TTL.
    pub fn new(
        store: Arc<dyn SessionStore>,
        factory: Arc<dyn HandlerFactory>,
        config: ManagerConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            store,
            factory,
            config,
        });
        let gc = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(gc_loop(Arc::clone(&inner)))),
            Err(_) => {
                warn!("no tokio runtime; session garbage collection disabled");
                None
            }
        };

        Self {
            inner,
            gc: Mutex::new(gc),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Start a brand-new session, ignoring any id the client sent.
    ///
    /// The record is persisted once the handshake succeeds; the new id is
    /// returned in the session header.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, tenant = %ctx.tenant_id()))]
    pub async fn initialize_and_handle(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        ctx: &RequestContext,
    ) -> Result<TransportResponse> {
        let store = Arc::clone(&self.inner.store);
        let hook_ctx = ctx.clone();
        let options = SetOptions::ttl(self.inner.config.record_ttl_secs());

        let on_initialized: InitializedHook = Box::new(move |session_id: SessionId| {
            async move {
                let record =
                    SessionRecord::new(session_id, hook_ctx.identity.as_ref(), Utc::now());
                let key = record.key().to_string();
                store.set_json(&hook_ctx, &key, &record, options).await?;
                info!(
                    session_id = %record.id,
                    tenant = %record.tenant_id,
                    "session created"
                );
                Ok::<(), RpcTunnelError>(())
            }
            .boxed()
        });

        let options = TransportOptions {
            session_id: SessionIdPolicy::Generate,
            json_response: self.inner.config.json_response,
            on_initialized: Some(on_initialized),
        };
        run_ephemeral(
            self.inner.factory.as_ref(),
            options,
            None,
            headers,
            body,
            ctx,
            "stateful.initialize_and_handle",
        )
        .await
    }

    /// Resume an existing session.
    ///
    /// Fails with [`RpcTunnelError::InvalidRequest`] when no id is given.
    /// An unknown or expired session is not an error: the result is a
    /// buffered 404 carrying a "session not found" body.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, tenant = %ctx.tenant_id()))]
    pub async fn handle_request(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        ctx: &RequestContext,
        session_id: Option<&str>,
    ) -> Result<TransportResponse> {
        let raw = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RpcTunnelError::InvalidRequest("session id is required".into()))?;

        let Ok(session_id) = raw.parse::<SessionId>() else {
            debug!(session_id = raw, "malformed session id");
            return Ok(TransportResponse::session_not_found());
        };

        let key = SessionKey::new(ctx.tenant_id(), session_id.clone()).to_string();
        if !self.is_owner(ctx, &key).await? {
            debug!(session_id = %session_id, "session not found for caller");
            return Ok(TransportResponse::session_not_found());
        }

        let options = SetOptions::ttl(self.inner.config.record_ttl_secs());
        let now = Utc::now();
        let resumed = self
            .inner
            .store
            .update_json(ctx, &key, options, |record: &mut SessionRecord| {
                record.touch(now);
                record.begin_request();
            })
            .await?;

        let Some(record) = resumed else {
            debug!(session_id = %session_id, "session not found");
            return Ok(TransportResponse::session_not_found());
        };
        debug!(
            session_id = %session_id,
            active_requests = record.active_requests,
            "session resumed"
        );

        let lease = SessionLease::new(Arc::clone(&self.inner.store), key, options, ctx.clone())
            .refreshing_every(self.inner.config.stale_timeout);
        let options = TransportOptions {
            session_id: SessionIdPolicy::Reuse(session_id),
            json_response: self.inner.config.json_response,
            on_initialized: None,
        };
        run_ephemeral(
            self.inner.factory.as_ref(),
            options,
            Some(lease),
            headers,
            body,
            ctx,
            "stateful.handle_request",
        )
        .await
    }

    /// Terminate a session.
    ///
    /// Deleting a session that does not exist is a hard
    /// [`RpcTunnelError::SessionNotFound`].
    #[instrument(skip_all, fields(request_id = %ctx.request_id, tenant = %ctx.tenant_id()))]
    pub async fn handle_delete_request(
        &self,
        session_id: &str,
        ctx: &RequestContext,
    ) -> Result<TransportResponse> {
        let Ok(id) = session_id.parse::<SessionId>() else {
            return Err(RpcTunnelError::SessionNotFound(session_id.to_string()));
        };

        let key = SessionKey::new(ctx.tenant_id(), id).to_string();
        if !self.is_owner(ctx, &key).await? || !self.inner.store.delete(ctx, &key).await? {
            return Err(RpcTunnelError::SessionNotFound(session_id.to_string()));
        }

        info!(session_id, "session deleted");
        Ok(TransportResponse::empty(StatusCode::NO_CONTENT))
    }

    /// Whether the record under `key` exists and belongs to the caller.
    ///
    /// Sessions of another client or subject in the same tenant are
    /// reported as absent.
    async fn is_owner(&self, ctx: &RequestContext, key: &str) -> Result<bool> {
        let record = self.inner.store.get_json::<SessionRecord>(ctx, key).await?;
        Ok(record.is_some_and(|r| r.is_owned_by(ctx.identity.as_ref())))
    }

    /// Run one garbage-collection sweep now.
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        self.inner.collect_garbage_at(Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`.
    pub async fn collect_garbage_at(&self, now: DateTime<Utc>) -> Result<GcReport> {
        self.inner.collect_garbage_at(now).await
    }

    /// Stop the garbage collector. In-flight requests are left alone; the
    /// store's TTL covers anything they leave behind. Idempotent.
    pub fn shutdown(&self) {
        let handle = match self.gc.lock() {
            Ok(mut gc) => gc.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            debug!("session garbage collector stopped");
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.gc
            .lock()
            .map(|gc| gc.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for StatefulManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    async fn collect_garbage_at(&self, now: DateTime<Utc>) -> Result<GcReport> {
        let ctx = RequestContext::system("gc");
        let stale_ms = self.config.stale_timeout_ms();
        let keys = self.store.list(&ctx, SESSION_KEY_PREFIX).await?;

        let mut report = GcReport {
            scanned: keys.len(),
            ..GcReport::default()
        };

        for key in keys {
            if key.parse::<SessionKey>().is_err() {
                debug!(%key, "skipping foreign key");
                continue;
            }

            let record = match self.store.get_json::<SessionRecord>(&ctx, &key).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%key, error = %e, "unreadable session record");
                    continue;
                }
            };

            if !record.is_idle_past(now, stale_ms) {
                continue;
            }
            if record.active_requests > 0 {
                debug!(
                    session_id = %record.id,
                    active_requests = record.active_requests,
                    "stale session still in use"
                );
                report.skipped_active += 1;
                continue;
            }

            match self.store.delete(&ctx, &key).await {
                Ok(true) => {
                    debug!(
                        session_id = %record.id,
                        idle_ms = record.idle_ms(now),
                        "stale session removed"
                    );
                    report.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(%key, error = %e, "failed to remove stale session"),
            }
        }

        Ok(report)
    }
}

async fn gc_loop(inner: Arc<Inner>) {
    let period = inner.config.stale_timeout;
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match inner.collect_garbage_at(Utc::now()).await {
            Ok(report) if report.deleted > 0 || report.skipped_active > 0 => info!(
                scanned = report.scanned,
                deleted = report.deleted,
                skipped_active = report.skipped_active,
                "session garbage collection"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "session garbage collection failed"),
        }
    }
}
