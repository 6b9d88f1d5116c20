//! Transport response abstraction.

use std::fmt;
use std::pin::Pin;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use futures_util::{Stream, StreamExt};

use crate::protocol::{ErrorObject, JsonRpcMessage};
use crate::session::SessionId;
use crate::Result;

/// Header carrying the session id between client and server.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Open byte stream of a streaming response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Result of every manager operation.
///
/// A streaming response owns the ephemeral handler and transport that
/// produce it; they are released once the stream is drained, fails, or is
/// dropped.
pub enum TransportResponse {
    /// Fully materialized payload.
    Buffered {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    /// Open byte stream.
    Streaming {
        status: StatusCode,
        headers: HeaderMap,
        stream: ByteStream,
        session_id: Option<SessionId>,
    },
}

impl TransportResponse {
    /// Buffered response with a JSON body.
    pub fn json(status: StatusCode, body: &impl serde::Serialize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        // Serializing our own message types cannot fail.
        let body = serde_json::to_vec(body).unwrap_or_default();
        Self::Buffered {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    /// Buffered response without a body.
    pub fn empty(status: StatusCode) -> Self {
        Self::Buffered {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Buffered JSON-RPC error with the given HTTP status.
    pub fn rpc_error(status: StatusCode, error: ErrorObject) -> Self {
        Self::json(status, &JsonRpcMessage::error(None, error))
    }

    /// The soft not-found outcome for an unknown or expired session.
    pub fn session_not_found() -> Self {
        Self::rpc_error(StatusCode::NOT_FOUND, ErrorObject::session_not_found())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Buffered { status, .. } | Self::Streaming { status, .. } => *status,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Self::Buffered { headers, .. } | Self::Streaming { headers, .. } => headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        match self {
            Self::Buffered { headers, .. } | Self::Streaming { headers, .. } => headers,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Session id surfaced to the caller, read from the header set.
    pub fn session_id(&self) -> Option<&str> {
        self.headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    /// Attach a session id header (and remember it on streaming responses).
    pub fn with_session_id(mut self, id: &SessionId) -> Self {
        if let Ok(value) = HeaderValue::from_str(id.as_str()) {
            self.headers_mut()
                .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
        }
        if let Self::Streaming { session_id, .. } = &mut self {
            *session_id = Some(id.clone());
        }
        self
    }

    /// Read the whole body, draining the stream if there is one.
    pub async fn collect_body(self) -> Result<Bytes> {
        match self {
            Self::Buffered { body, .. } => Ok(body),
            Self::Streaming { mut stream, .. } => {
                let mut out = Vec::new();
                while let Some(chunk) = stream.next().await {
                    out.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(out))
            }
        }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered {
                status,
                headers,
                body,
            } => f
                .debug_struct("Buffered")
                .field("status", status)
                .field("headers", headers)
                .field("body_len", &body.len())
                .finish(),
            Self::Streaming {
                status,
                headers,
                session_id,
                ..
            } => f
                .debug_struct("Streaming")
                .field("status", status)
                .field("headers", headers)
                .field("session_id", session_id)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::Value;

    #[tokio::test]
    async fn test_session_not_found_shape() {
        let response = TransportResponse::session_not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.is_streaming());
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.collect_body().await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], ErrorObject::SESSION_NOT_FOUND);
        assert_eq!(json["error"]["message"], "Session not found");
    }

    #[tokio::test]
    async fn test_streaming_collect_and_session_id() {
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from("ab")), Ok(Bytes::from("cd"))];
        let id: SessionId = "s-1".parse().unwrap();
        let response = TransportResponse::Streaming {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            stream: Box::pin(stream::iter(chunks)),
            session_id: None,
        }
        .with_session_id(&id);

        assert!(response.is_streaming());
        assert_eq!(response.session_id(), Some("s-1"));
        if let TransportResponse::Streaming { session_id, .. } = &response {
            assert_eq!(session_id.as_ref(), Some(&id));
        }
        assert_eq!(response.collect_body().await.unwrap(), Bytes::from("abcd"));
    }

    #[test]
    fn test_empty_response() {
        let response = TransportResponse::empty(StatusCode::ACCEPTED);
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.session_id().is_none());
        assert!(format!("{:?}", response).contains("Buffered"));
    }
}
