//! # rpc-tunnel
//!
//! Session and transport core for JSON-RPC tool servers.
//!
//! Every inbound request is served by a fresh protocol handler connected to
//! a fresh, single-use transport. What survives between requests is a small
//! [`SessionRecord`] in a shared [`SessionStore`], so any process with
//! access to the store can serve any session.
//!
//! ## Features
//!
//! - **Stateless mode**: no session id accepted or produced
//! - **Stateful mode**: initialize, resume, delete, and background garbage
//!   collection of stale sessions
//! - **Auto routing**: picks the mode per request
//! - **Buffered or streaming responses**: per-request resources are released
//!   exactly once, when the stream drains, fails, or is dropped
//! - **Tenant isolation**: session keys are namespaced by the caller's tenant
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::http::HeaderMap;
//! use rpc_tunnel::{AutoManager, BasicHandlerFactory, ManagerConfig, MemoryStore, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> rpc_tunnel::Result<()> {
//!     rpc_tunnel::logging::try_init().ok();
//!
//!     let manager = AutoManager::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(BasicHandlerFactory::default()),
//!         ManagerConfig::default(),
//!     );
//!
//!     let body = br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
//!     let ctx = RequestContext::new();
//!     let response = manager.handle_request(&HeaderMap::new(), body, &ctx, None).await?;
//!     println!("new session: {:?}", response.session_id());
//!
//!     manager.shutdown();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, RpcTunnelError};
pub use manager::{AutoManager, GcReport, ManagerConfig, StatefulManager, StatelessManager};
pub use protocol::{BasicHandlerFactory, HandlerFactory, ProtocolHandler};
pub use session::{Identity, RequestContext, SessionId, SessionKey, SessionRecord};
pub use store::{MemoryStore, SessionStore, SessionStoreExt, SetOptions};
pub use transport::{TransportResponse, SESSION_ID_HEADER};
