//! Transport managers.
//!
//! Every manager builds a fresh protocol handler and [`EphemeralTransport`]
//! per request and releases both once the response is done with them:
//! immediately for buffered responses, on stream drain for streaming ones.
//!
//! - [`StatelessManager`]: no session id accepted or produced.
//! - [`StatefulManager`]: session lifecycle on top of a [`SessionStore`],
//!   with a background garbage collector.
//! - [`AutoManager`]: routes each request to one of the two.
//!
//! [`SessionStore`]: crate::store::SessionStore

mod auto;
mod lease;
mod stateful;
mod stateless;

pub use auto::{route, AutoManager, Route};
use lease::KeepAlive;
pub use lease::SessionLease;
pub use stateful::{GcReport, StatefulManager};
pub use stateless::StatelessManager;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::error::RpcTunnelError;
use crate::protocol::{HandlerFactory, ProtocolHandler};
use crate::session::RequestContext;
use crate::transport::{
    with_deferred_cleanup, DeferredCleanup, EphemeralTransport, Release, TransportOptions,
    TransportResponse,
};
use crate::Result;

/// Default idle time after which a session is stale.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default extra lifetime given to stored records beyond the stale timeout.
pub const DEFAULT_TTL_MARGIN: Duration = Duration::from_secs(60);

/// Runtime configuration shared by the managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Idle time after which a session is eligible for collection. Also the
    /// garbage-collection interval.
    pub stale_timeout: Duration,
    /// Added to the stale timeout when computing record TTLs.
    pub ttl_margin: Duration,
    /// Always answer with buffered JSON instead of SSE.
    pub json_response: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            ttl_margin: DEFAULT_TTL_MARGIN,
            json_response: false,
        }
    }
}

impl ManagerConfig {
    /// Stale timeout in whole milliseconds.
    pub fn stale_timeout_ms(&self) -> u64 {
        u64::try_from(self.stale_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// TTL applied to every session record write, in seconds.
    pub fn record_ttl_secs(&self) -> u64 {
        self.stale_timeout_ms()
            .div_ceil(1000)
            .saturating_add(self.ttl_margin.as_secs())
    }
}

/// Per-request handler, transport and optional session lease.
struct EphemeralResources {
    transport: EphemeralTransport,
    handler: Arc<dyn ProtocolHandler>,
    lease: Option<SessionLease>,
    keep_alive: Option<KeepAlive>,
}

#[async_trait]
impl Release for EphemeralResources {
    async fn release(self: Box<Self>) {
        let Self {
            mut transport,
            handler,
            lease,
            keep_alive,
        } = *self;

        drop(keep_alive);
        let session_id = transport.session_id().cloned();
        transport.close();
        if let Err(e) = handler.close().await {
            warn!(session_id = ?session_id, error = %e, "failed to close protocol handler");
        }
        if let Some(lease) = lease {
            lease.release().await;
        }
        debug!(session_id = ?session_id, "ephemeral resources released");
    }
}

/// Build, run and release one ephemeral handler/transport pair.
///
/// Failures release whatever was created and come back wrapped as
/// [`RpcTunnelError::Internal`] tagged with `operation`.
pub(crate) async fn run_ephemeral(
    factory: &dyn HandlerFactory,
    options: TransportOptions,
    lease: Option<SessionLease>,
    headers: &HeaderMap,
    body: &[u8],
    ctx: &RequestContext,
    operation: &'static str,
) -> Result<TransportResponse> {
    let handler: Arc<dyn ProtocolHandler> = match factory.create_handler() {
        Ok(handler) => Arc::from(handler),
        Err(e) => {
            if let Some(lease) = lease {
                lease.release().await;
            }
            return Err(RpcTunnelError::internal(operation, e));
        }
    };

    let mut resources = Box::new(EphemeralResources {
        transport: EphemeralTransport::new(options),
        handler,
        lease,
        keep_alive: None,
    });

    let connected = resources
        .transport
        .connect(Arc::clone(&resources.handler), ctx.identity.clone())
        .await;
    if let Err(e) = connected {
        resources.release().await;
        return Err(RpcTunnelError::internal(operation, e));
    }

    match resources.transport.handle_request(headers, body).await {
        Err(e) => {
            resources.release().await;
            Err(RpcTunnelError::internal(operation, e))
        }
        Ok(TransportResponse::Streaming {
            status,
            headers,
            stream,
            session_id,
        }) => {
            resources.keep_alive = resources.lease.as_ref().and_then(SessionLease::keep_alive);
            let cleanup = DeferredCleanup::new(*resources);
            Ok(TransportResponse::Streaming {
                status,
                headers,
                stream: with_deferred_cleanup(stream, cleanup),
                session_id,
            })
        }
        Ok(buffered) => {
            resources.release().await;
            Ok(buffered)
        }
    }
}
