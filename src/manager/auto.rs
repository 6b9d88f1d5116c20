//! Request router over the stateless and stateful managers.

use std::sync::Arc;

use axum::http::HeaderMap;
use tracing::trace;

use super::{ManagerConfig, StatefulManager, StatelessManager};
use crate::protocol::{is_initialize_request, HandlerFactory};
use crate::session::RequestContext;
use crate::store::SessionStore;
use crate::transport::TransportResponse;
use crate::Result;

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    /// Start a new session. Any supplied id is ignored.
    Initialize,
    /// Continue the given session.
    Resume(&'a str),
    /// Serve without a session.
    Stateless,
}

/// Decide how a request is served.
///
/// Evaluated in order: an initialize-shaped body always starts a new
/// session; otherwise a non-empty session id resumes that session;
/// otherwise the request is stateless.
pub fn route<'a>(body: &[u8], session_id: Option<&'a str>) -> Route<'a> {
    if is_initialize_request(body) {
        return Route::Initialize;
    }
    match session_id {
        Some(id) if !id.is_empty() => Route::Resume(id),
        _ => Route::Stateless,
    }
}

/// Entry point used by the wire adapter.
pub struct AutoManager {
    stateless: StatelessManager,
    stateful: StatefulManager,
}

impl AutoManager {
    /// Build both managers over one handler factory.
    pub fn new(
        store: Arc<dyn SessionStore>,
        factory: Arc<dyn HandlerFactory>,
        config: ManagerConfig,
    ) -> Self {
        let stateless = StatelessManager::new(Arc::clone(&factory), config.json_response);
        let stateful = StatefulManager::new(store, factory, config);
        Self::from_parts(stateless, stateful)
    }

    pub fn from_parts(stateless: StatelessManager, stateful: StatefulManager) -> Self {
        Self {
            stateless,
            stateful,
        }
    }

    pub fn stateful(&self) -> &StatefulManager {
        &self.stateful
    }

    pub async fn handle_request(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        ctx: &RequestContext,
        session_id: Option<&str>,
    ) -> Result<TransportResponse> {
        let route = route(body, session_id);
        trace!(request_id = %ctx.request_id, ?route, "routing request");

        match route {
            Route::Initialize => self.stateful.initialize_and_handle(headers, body, ctx).await,
            Route::Resume(id) => {
                self.stateful
                    .handle_request(headers, body, ctx, Some(id))
                    .await
            }
            Route::Stateless => self.stateless.handle_request(headers, body, ctx).await,
        }
    }

    /// Always handled by the stateful manager.
    pub async fn handle_delete_request(
        &self,
        session_id: &str,
        ctx: &RequestContext,
    ) -> Result<TransportResponse> {
        self.stateful.handle_delete_request(session_id, ctx).await
    }

    pub fn shutdown(&self) {
        self.stateful.shutdown();
    }
}
