//! JSON-RPC protocol surface.
//!
//! This module provides the message model needed to route a request, the
//! handler seam the transport drives, and a built-in handler.
//!
//! # Example
//!
//! ```
//! use rpc_tunnel::protocol::is_initialize_request;
//!
//! let body = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
//! assert!(is_initialize_request(body));
//! ```

mod basic;
mod handler;
mod message;

pub use basic::{BasicHandler, BasicHandlerFactory, ServerInfo, DEFAULT_PROTOCOL_VERSION};
pub use handler::{HandlerFactory, ProtocolHandler, TransportInfo};
pub use message::{
    is_initialize_request, parse_body, ErrorObject, JsonRpcErrorResponse, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageBatch, RequestId,
    INITIALIZE_METHOD, JSONRPC_VERSION,
};
