//! Error types for rpc-tunnel.

use thiserror::Error;

use crate::store::StoreError;

/// Boxed error used as the source of internal failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for rpc-tunnel operations.
#[derive(Error, Debug)]
pub enum RpcTunnelError {
    /// Structurally invalid call, rejected before any I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An operation presumed a session exists and it does not.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Failure while building or running an ephemeral handler/transport.
    #[error("{operation} failed: {source}")]
    Internal {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// Session store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol handler reported a failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcTunnelError {
    /// Wrap an error with the name of the operation that produced it.
    pub fn internal(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            operation,
            source: source.into(),
        }
    }

    /// Whether this is a hard not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

/// Convenience Result type for rpc-tunnel operations.
pub type Result<T> = std::result::Result<T, RpcTunnelError>;
