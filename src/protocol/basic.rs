//! Built-in protocol handler.
//!
//! Answers the handshake and liveness methods so the server is usable
//! without a registration subsystem plugged in. Everything else gets
//! method-not-found.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::handler::{HandlerFactory, ProtocolHandler, TransportInfo};
use super::message::{
    ErrorObject, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, INITIALIZE_METHOD,
};
use crate::Result;

/// Protocol revision advertised when the client does not ask for one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Name and version reported in the handshake.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Minimal handler for `initialize` and `ping`.
#[derive(Debug, Default)]
pub struct BasicHandler {
    server_info: ServerInfo,
    transport: Mutex<Option<TransportInfo>>,
}

impl BasicHandler {
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            server_info,
            transport: Mutex::new(None),
        }
    }

    fn initialize_result(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol_version,
            "capabilities": {},
            "serverInfo": self.server_info,
        })
    }

    fn reply(&self, request: &JsonRpcRequest) -> JsonRpcMessage {
        match request.method.as_str() {
            INITIALIZE_METHOD => JsonRpcMessage::response(
                request.id.clone(),
                self.initialize_result(request.params.as_ref()),
            ),
            "ping" => JsonRpcMessage::response(request.id.clone(), json!({})),
            other => JsonRpcMessage::error(
                Some(request.id.clone()),
                ErrorObject::method_not_found(other),
            ),
        }
    }
}

#[async_trait]
impl ProtocolHandler for BasicHandler {
    async fn connect(&self, info: TransportInfo) -> Result<()> {
        debug!(session_id = ?info.session_id, "handler connected");
        if let Ok(mut transport) = self.transport.lock() {
            *transport = Some(info);
        }
        Ok(())
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<mpsc::Receiver<JsonRpcMessage>> {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 with a single send never blocks.
        let _ = tx.send(self.reply(&request)).await;
        Ok(rx)
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        debug!(method = %notification.method, "notification received");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut transport) = self.transport.lock() {
            transport.take();
        }
        Ok(())
    }
}

/// Factory producing [`BasicHandler`]s.
#[derive(Debug, Clone, Default)]
pub struct BasicHandlerFactory {
    server_info: ServerInfo,
}

impl BasicHandlerFactory {
    pub fn new(server_info: ServerInfo) -> Self {
        Self { server_info }
    }
}

impl HandlerFactory for BasicHandlerFactory {
    fn create_handler(&self) -> Result<Box<dyn ProtocolHandler>> {
        Ok(Box::new(BasicHandler::new(self.server_info.clone())))
    }
}
