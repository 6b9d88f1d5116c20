//! HTTP handlers and response conversion.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use tracing::error;

use super::auth::ApiKeyStore;
use crate::error::RpcTunnelError;
use crate::manager::{AutoManager, ManagerConfig};
use crate::protocol::{BasicHandlerFactory, ErrorObject};
use crate::session::{Identity, RequestContext};
use crate::store::MemoryStore;
use crate::transport::{TransportResponse, SESSION_ID_HEADER};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<AutoManager>,
    pub api_keys: Arc<ApiKeyStore>,
}

impl AppState {
    pub fn new(manager: Arc<AutoManager>) -> Self {
        Self {
            manager,
            api_keys: Arc::new(ApiKeyStore::disabled()),
        }
    }

    /// State backed by an in-memory store and the built-in handler.
    pub fn in_memory(config: ManagerConfig) -> Self {
        let manager = AutoManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(BasicHandlerFactory::default()),
            config,
        );
        Self::new(Arc::new(manager))
    }

    pub fn with_api_keys(mut self, api_keys: Arc<ApiKeyStore>) -> Self {
        self.api_keys = api_keys;
        self
    }
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

fn context(identity: Option<Extension<Identity>>) -> RequestContext {
    match identity {
        Some(Extension(identity)) => RequestContext::with_identity(identity),
        None => RequestContext::new(),
    }
}

/// `POST {endpoint}`: one JSON-RPC message or batch.
pub async fn rpc_post(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<TransportResponse, RpcTunnelError> {
    let ctx = context(identity);
    state
        .manager
        .handle_request(&headers, &body, &ctx, session_id(&headers))
        .await
}

/// `DELETE {endpoint}`: terminate the session named in the header.
pub async fn rpc_delete(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    headers: HeaderMap,
) -> Result<TransportResponse, RpcTunnelError> {
    let ctx = context(identity);
    let session_id = session_id(&headers).ok_or_else(|| {
        RpcTunnelError::InvalidRequest(format!("missing {} header", SESSION_ID_HEADER))
    })?;
    state.manager.handle_delete_request(session_id, &ctx).await
}

/// `GET {endpoint}`: server-initiated streams are not offered.
pub async fn rpc_get() -> TransportResponse {
    let mut response = TransportResponse::rpc_error(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorObject::new(-32000, "Method not allowed"),
    );
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST, DELETE"));
    response
}

impl IntoResponse for TransportResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Buffered {
                status,
                headers,
                body,
            } => (status, headers, body).into_response(),
            Self::Streaming {
                status,
                headers,
                stream,
                ..
            } => (status, headers, Body::from_stream(stream)).into_response(),
        }
    }
}

impl IntoResponse for RpcTunnelError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorObject::invalid_request(msg))
            }
            Self::SessionNotFound(_) => (StatusCode::NOT_FOUND, ErrorObject::session_not_found()),
            _ => {
                error!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorObject::internal_error("Internal error"),
                )
            }
        };
        TransportResponse::rpc_error(status, error).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_header() {
        let mut headers = HeaderMap::new();
        assert!(session_id(&headers).is_none());

        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("  "));
        assert!(session_id(&headers).is_none());

        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_id(&headers), Some("abc"));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (RpcTunnelError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (RpcTunnelError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (RpcTunnelError::Protocol("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_context_uses_identity() {
        let ctx = context(Some(Extension(Identity::new("acme"))));
        assert_eq!(ctx.tenant_id(), "acme");
        assert_eq!(context(None).tenant_id(), crate::session::DEFAULT_TENANT);
    }
}
