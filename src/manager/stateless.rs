//! Sessionless request handling.

use std::sync::Arc;

use axum::http::HeaderMap;
use tracing::instrument;

use super::run_ephemeral;
use crate::protocol::HandlerFactory;
use crate::session::RequestContext;
use crate::transport::{SessionIdPolicy, TransportOptions, TransportResponse};
use crate::Result;

/// Serves each request with a fresh handler and no persisted state.
///
/// Safe to load-balance across any number of processes.
pub struct StatelessManager {
    factory: Arc<dyn HandlerFactory>,
    json_response: bool,
}

impl StatelessManager {
    pub fn new(factory: Arc<dyn HandlerFactory>, json_response: bool) -> Self {
        Self {
            factory,
            json_response,
        }
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn handle_request(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        ctx: &RequestContext,
    ) -> Result<TransportResponse> {
        let options = TransportOptions {
            session_id: SessionIdPolicy::None,
            json_response: self.json_response,
            on_initialized: None,
        };
        run_ephemeral(
            self.factory.as_ref(),
            options,
            None,
            headers,
            body,
            ctx,
            "stateless.handle_request",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcTunnelError;
    use crate::protocol::{BasicHandler, BasicHandlerFactory, ProtocolHandler};
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    fn ping() -> Vec<u8> {
        serde_json::to_vec(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap()
    }

    #[tokio::test]
    async fn test_handles_request_without_session() {
        let manager = StatelessManager::new(Arc::new(BasicHandlerFactory::default()), true);
        let response = manager
            .handle_request(&HeaderMap::new(), &ping(), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.session_id().is_none());
        let json: Value = serde_json::from_slice(&response.collect_body().await.unwrap()).unwrap();
        assert_eq!(json["result"], json!({}));
    }

    #[tokio::test]
    async fn test_factory_failure_is_internal() {
        let factory = || -> Result<Box<dyn ProtocolHandler>> {
            Err(RpcTunnelError::Protocol("no handler".into()))
        };
        let manager = StatelessManager::new(Arc::new(factory), true);

        let err = manager
            .handle_request(&HeaderMap::new(), &ping(), &RequestContext::new())
            .await
            .unwrap_err();
        match err {
            RpcTunnelError::Internal { operation, .. } => {
                assert_eq!(operation, "stateless.handle_request")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_independent_calls() {
        let factory = || -> Result<Box<dyn ProtocolHandler>> {
            Ok(Box::new(BasicHandler::default()))
        };
        let manager = StatelessManager::new(Arc::new(factory), true);
        for _ in 0..3 {
            let response = manager
                .handle_request(&HeaderMap::new(), &ping(), &RequestContext::new())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
