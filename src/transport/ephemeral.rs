//! Single-use transport between one HTTP request and one protocol handler.
//!
//! An [`EphemeralTransport`] lives exactly as long as one inbound request:
//! it parses the body, hands each message to the connected handler and
//! shapes the handler's output into a [`TransportResponse`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::response::{ByteStream, TransportResponse};
use crate::error::RpcTunnelError;
use crate::protocol::{
    parse_body, ErrorObject, JsonRpcMessage, ProtocolHandler, RequestId, TransportInfo,
};
use crate::session::{Identity, SessionId};
use crate::Result;

const EVENT_STREAM: &str = "text/event-stream";

/// How the transport treats session ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionIdPolicy {
    /// Sessionless: no id is accepted or produced.
    #[default]
    None,
    /// Mint a fresh id for an initialize request.
    Generate,
    /// Continue an existing session.
    Reuse(SessionId),
}

/// One-shot callback run once an initialize request succeeded.
pub type InitializedHook = Box<dyn FnOnce(SessionId) -> BoxFuture<'static, Result<()>> + Send>;

/// Construction options for [`EphemeralTransport`].
#[derive(Default)]
pub struct TransportOptions {
    pub session_id: SessionIdPolicy,
    /// Always answer with a buffered JSON body, never SSE.
    pub json_response: bool,
    /// Fired on a successful handshake when the policy is `Generate`.
    pub on_initialized: Option<InitializedHook>,
}

/// Output channel of one dispatched request.
struct Pending {
    id: RequestId,
    initialize: bool,
    rx: mpsc::Receiver<JsonRpcMessage>,
}

/// Everything one request produced.
struct Collected {
    id: RequestId,
    initialize: bool,
    messages: Vec<JsonRpcMessage>,
}

impl Collected {
    fn succeeded(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m, JsonRpcMessage::Response(r) if r.id == self.id))
    }

    fn into_reply(self) -> JsonRpcMessage {
        let id = self.id;
        self.messages
            .into_iter()
            .rev()
            .find(JsonRpcMessage::is_reply)
            .unwrap_or_else(|| {
                JsonRpcMessage::error(
                    Some(id),
                    ErrorObject::internal_error("handler finished without a response"),
                )
            })
    }
}

pub struct EphemeralTransport {
    session_id: Option<SessionId>,
    generates_id: bool,
    json_response: bool,
    on_initialized: Option<InitializedHook>,
    handler: Option<Arc<dyn ProtocolHandler>>,
    closed: bool,
}

impl EphemeralTransport {
    pub fn new(options: TransportOptions) -> Self {
        let (session_id, generates_id) = match options.session_id {
            SessionIdPolicy::None => (None, false),
            SessionIdPolicy::Generate => (Some(SessionId::generate()), true),
            SessionIdPolicy::Reuse(id) => (Some(id), false),
        };

        Self {
            session_id,
            generates_id,
            json_response: options.json_response,
            on_initialized: options.on_initialized,
            handler: None,
            closed: false,
        }
    }

    /// The session this transport serves, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Attach a handler. A transport is connected at most once.
    pub async fn connect(
        &mut self,
        handler: Arc<dyn ProtocolHandler>,
        identity: Option<Identity>,
    ) -> Result<()> {
        if self.closed {
            return Err(RpcTunnelError::Protocol("transport is closed".into()));
        }
        if self.handler.is_some() {
            return Err(RpcTunnelError::Protocol(
                "transport already connected".into(),
            ));
        }

        handler
            .connect(TransportInfo {
                session_id: self.session_id.clone(),
                identity,
            })
            .await?;
        self.handler = Some(handler);
        Ok(())
    }

    /// Process one HTTP request body.
    pub async fn handle_request(
        &mut self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<TransportResponse> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| RpcTunnelError::Protocol("transport is not connected".into()))?;

        let batch = match parse_body(body) {
            Ok(batch) => batch,
            Err(error) => {
                debug!(code = error.code, "rejecting malformed body");
                return Ok(TransportResponse::rpc_error(StatusCode::BAD_REQUEST, error));
            }
        };

        let is_batch = batch.is_batch;
        let mut pending = Vec::new();
        for message in batch.messages {
            match message {
                JsonRpcMessage::Request(request) => {
                    let id = request.id.clone();
                    let initialize = request.is_initialize();
                    trace!(%id, method = %request.method, "dispatching request");
                    let rx = handler.handle_request(request).await?;
                    pending.push(Pending { id, initialize, rx });
                }
                JsonRpcMessage::Notification(notification) => {
                    handler.handle_notification(notification).await?;
                }
                other => trace!(id = ?other.reply_id(), "ignoring client response"),
            }
        }

        if pending.is_empty() {
            let response = TransportResponse::empty(StatusCode::ACCEPTED);
            return Ok(self.attach_session_id(response, !self.generates_id));
        }

        let streaming = !self.json_response && accepts_event_stream(headers);

        if self.generates_id {
            // The record must exist before the client learns the id.
            let collected = collect(pending).await;
            let initialized = collected.iter().any(|c| c.initialize && c.succeeded());
            if initialized {
                self.fire_initialized().await?;
            }

            let response = if streaming {
                let messages: Vec<_> = collected.into_iter().flat_map(|c| c.messages).collect();
                event_stream(Box::pin(stream::iter(messages).map(sse_frame)))
            } else {
                buffered(collected, is_batch)
            };
            return Ok(self.attach_session_id(response, initialized));
        }

        let response = if streaming {
            event_stream(merge(pending))
        } else {
            buffered(collect(pending).await, is_batch)
        };
        Ok(self.attach_session_id(response, true))
    }

    /// Detach the handler and drop any unfired hook. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.on_initialized = None;
        self.handler = None;
        trace!(session_id = ?self.session_id, "transport closed");
    }

    async fn fire_initialized(&mut self) -> Result<()> {
        let (Some(hook), Some(id)) = (self.on_initialized.take(), self.session_id.clone()) else {
            return Ok(());
        };
        debug!(session_id = %id, "session initialized");
        hook(id).await
    }

    fn attach_session_id(&self, response: TransportResponse, attach: bool) -> TransportResponse {
        match (&self.session_id, attach) {
            (Some(id), true) => response.with_session_id(id),
            _ => response,
        }
    }
}

impl Drop for EphemeralTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Whether the client's `Accept` header allows an SSE response.
pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(EVENT_STREAM))
}

/// Drain every request's channel, in request order.
async fn collect(pending: Vec<Pending>) -> Vec<Collected> {
    let mut out = Vec::with_capacity(pending.len());
    for Pending { id, initialize, mut rx } in pending {
        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            messages.push(message);
        }
        out.push(Collected {
            id,
            initialize,
            messages,
        });
    }
    out
}

/// Interleave every request's channel as messages arrive.
fn merge(pending: Vec<Pending>) -> ByteStream {
    let streams = pending.into_iter().map(|p| {
        stream::unfold(p.rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        })
        .boxed()
    });
    Box::pin(stream::select_all(streams).map(sse_frame))
}

fn sse_frame(message: JsonRpcMessage) -> Result<Bytes> {
    let data = serde_json::to_string(&message)
        .map_err(|e| RpcTunnelError::internal("encode message", e))?;
    Ok(Bytes::from(format!("event: message\ndata: {}\n\n", data)))
}

fn event_stream(stream: ByteStream) -> TransportResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    TransportResponse::Streaming {
        status: StatusCode::OK,
        headers,
        stream,
        session_id: None,
    }
}

fn buffered(collected: Vec<Collected>, is_batch: bool) -> TransportResponse {
    let mut replies: Vec<JsonRpcMessage> =
        collected.into_iter().map(Collected::into_reply).collect();

    if !is_batch && replies.len() == 1 {
        let reply = replies.remove(0);
        TransportResponse::json(StatusCode::OK, &reply)
    } else {
        TransportResponse::json(StatusCode::OK, &replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BasicHandler;
    use futures_util::FutureExt;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn sse_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        headers
    }

    fn body(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    async fn connected(options: TransportOptions) -> EphemeralTransport {
        let mut transport = EphemeralTransport::new(options);
        transport
            .connect(Arc::new(BasicHandler::default()), None)
            .await
            .unwrap();
        transport
    }

    async fn json_body(response: TransportResponse) -> Value {
        serde_json::from_slice(&response.collect_body().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let mut transport = connected(TransportOptions::default()).await;
        let response = transport
            .handle_request(&HeaderMap::new(), b"{oops")
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], ErrorObject::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_notification_only_is_accepted() {
        let mut transport = connected(TransportOptions::default()).await;
        let response = transport
            .handle_request(
                &HeaderMap::new(),
                &body(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.session_id().is_none());
    }

    #[tokio::test]
    async fn test_buffered_single_and_batch() {
        let mut transport = connected(TransportOptions::default()).await;
        let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});

        let response = transport
            .handle_request(&HeaderMap::new(), &body(ping.clone()))
            .await
            .unwrap();
        assert!(!response.is_streaming());
        assert_eq!(json_body(response).await["id"], 1);

        let batch = json!([ping, {"jsonrpc": "2.0", "id": 2, "method": "nope"}]);
        let response = transport
            .handle_request(&HeaderMap::new(), &body(batch))
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[1]["error"]["code"], ErrorObject::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_streams_when_client_accepts_sse() {
        let mut transport = connected(TransportOptions::default()).await;
        let response = transport
            .handle_request(
                &sse_headers(),
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            )
            .await
            .unwrap();

        assert!(response.is_streaming());
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            EVENT_STREAM
        );
        let text = String::from_utf8(response.collect_body().await.unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: message\ndata: "));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("\"id\":1"));
    }

    #[tokio::test]
    async fn test_json_response_overrides_accept() {
        let mut transport = connected(TransportOptions {
            json_response: true,
            ..Default::default()
        })
        .await;
        let response = transport
            .handle_request(
                &sse_headers(),
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            )
            .await
            .unwrap();
        assert!(!response.is_streaming());
    }

    #[tokio::test]
    async fn test_generate_fires_hook_on_initialize() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let hook: InitializedHook = Box::new(move |id: SessionId| {
            async move {
                *sink.lock().unwrap() = Some(id);
                Ok::<_, RpcTunnelError>(())
            }
            .boxed()
        });

        let mut transport = connected(TransportOptions {
            session_id: SessionIdPolicy::Generate,
            json_response: false,
            on_initialized: Some(hook),
        })
        .await;
        let generated = transport.session_id().cloned().unwrap();

        let response = transport
            .handle_request(
                &sse_headers(),
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})),
            )
            .await
            .unwrap();

        assert_eq!(response.session_id(), Some(generated.as_str()));
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&generated));
        assert!(response.is_streaming());
    }

    #[tokio::test]
    async fn test_generate_without_handshake_sets_no_header() {
        let fired = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&fired);
        let hook: InitializedHook = Box::new(move |_: SessionId| {
            async move {
                *sink.lock().unwrap() = true;
                Ok::<_, RpcTunnelError>(())
            }
            .boxed()
        });

        let mut transport = connected(TransportOptions {
            session_id: SessionIdPolicy::Generate,
            json_response: true,
            on_initialized: Some(hook),
        })
        .await;
        let response = transport
            .handle_request(
                &HeaderMap::new(),
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            )
            .await
            .unwrap();

        assert!(response.session_id().is_none());
        assert!(!*fired.lock().unwrap());
    }

    #[tokio::test]
    async fn test_hook_failure_fails_request() {
        let hook: InitializedHook = Box::new(|_: SessionId| {
            async { Err::<(), _>(RpcTunnelError::Protocol("store down".into())) }.boxed()
        });
        let mut transport = connected(TransportOptions {
            session_id: SessionIdPolicy::Generate,
            json_response: true,
            on_initialized: Some(hook),
        })
        .await;

        let result = transport
            .handle_request(
                &HeaderMap::new(),
                &body(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reuse_sets_header() {
        let id: SessionId = "existing-session".parse().unwrap();
        let mut transport = connected(TransportOptions {
            session_id: SessionIdPolicy::Reuse(id.clone()),
            json_response: true,
            on_initialized: None,
        })
        .await;

        let response = transport
            .handle_request(
                &HeaderMap::new(),
                &body(json!({"jsonrpc": "2.0", "id": 9, "method": "ping"})),
            )
            .await
            .unwrap();
        assert_eq!(response.session_id(), Some("existing-session"));
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut transport = EphemeralTransport::new(TransportOptions::default());
        let result = transport.handle_request(&HeaderMap::new(), b"{}").await;
        assert!(result.is_err());

        transport.close();
        transport.close();
        assert!(transport.is_closed());
        let err = transport
            .connect(Arc::new(BasicHandler::default()), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
