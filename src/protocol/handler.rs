//! Protocol-handler seam.
//!
//! A handler processes protocol messages for exactly one ephemeral
//! transport. Handlers are built fresh per request by a [`HandlerFactory`]
//! supplied by whatever registers tools, resources and prompts.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use crate::session::{Identity, SessionId};
use crate::Result;

/// What a handler learns about the transport it is connected to.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    /// Session the request belongs to, if any.
    pub session_id: Option<SessionId>,
    /// Authenticated caller, if any.
    pub identity: Option<Identity>,
}

/// A per-request protocol handler.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Attach to a freshly created transport.
    async fn connect(&self, info: TransportInfo) -> Result<()>;

    /// Process one request.
    ///
    /// The returned channel yields zero or more notifications followed by
    /// the final response or error for `request.id`, then closes.
    async fn handle_request(&self, request: JsonRpcRequest)
        -> Result<mpsc::Receiver<JsonRpcMessage>>;

    /// Process a client notification. No reply is produced.
    async fn handle_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        let _ = notification;
        Ok(())
    }

    /// Release whatever the handler holds.
    async fn close(&self) -> Result<()>;
}

/// Builds fresh, unconnected protocol handlers.
pub trait HandlerFactory: Send + Sync {
    fn create_handler(&self) -> Result<Box<dyn ProtocolHandler>>;
}

impl<F> HandlerFactory for F
where
    F: Fn() -> Result<Box<dyn ProtocolHandler>> + Send + Sync,
{
    fn create_handler(&self) -> Result<Box<dyn ProtocolHandler>> {
        self()
    }
}
