//! HTTP wire adapter.
//!
//! Translates HTTP requests into manager calls and [`TransportResponse`]s
//! back into HTTP: a JSON body for buffered responses, `text/event-stream`
//! for streaming ones. The session id travels in the `mcp-session-id`
//! header both ways.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /mcp` - JSON-RPC message or batch
//! - `DELETE /mcp` - Terminate the session named in the header
//! - `GET /mcp` - 405; server-initiated streams are not offered
//!
//! ## Example
//!
//! ```no_run
//! use rpc_tunnel::api::{serve, AppState, ServerConfig};
//! use rpc_tunnel::manager::ManagerConfig;
//!
//! #[tokio::main]
//! async fn main() -> rpc_tunnel::Result<()> {
//!     let state = AppState::in_memory(ManagerConfig::default());
//!     serve(ServerConfig::new("127.0.0.1", 3000), state).await
//! }
//! ```
//!
//! [`TransportResponse`]: crate::transport::TransportResponse

pub mod auth;
pub mod handlers;
pub mod router;

pub use auth::{auth_middleware, ApiKeyStore, AuthConfig};
pub use handlers::AppState;
pub use router::{create_router, create_router_with_state, serve, ServerConfig, DEFAULT_ENDPOINT};
