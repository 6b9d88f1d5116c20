//! API router and server.

use std::sync::Arc;

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use super::auth::auth_middleware;
use super::handlers::{health, rpc_delete, rpc_get, rpc_post, AppState};
use crate::manager::AutoManager;
use crate::transport::SESSION_ID_HEADER;

/// Default path of the JSON-RPC endpoint.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// Create the router on the default endpoint without authentication.
pub fn create_router(manager: Arc<AutoManager>) -> Router {
    create_router_with_state(AppState::new(manager), DEFAULT_ENDPOINT)
}

/// Create the router with custom state, serving JSON-RPC on `endpoint`.
pub fn create_router_with_state(state: AppState, endpoint: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(endpoint, post(rpc_post).delete(rpc_delete).get(rpc_get))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.api_keys),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_ID_HEADER)]),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Path of the JSON-RPC endpoint.
    pub endpoint: String,
    /// Drain in-flight requests on Ctrl-C/SIGTERM.
    pub graceful_shutdown: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn without_graceful_shutdown(mut self) -> Self {
        self.graceful_shutdown = false;
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            graceful_shutdown: true,
        }
    }
}

/// Run the server until it fails or receives a shutdown signal, then stop
/// the session garbage collector.
pub async fn serve(config: ServerConfig, state: AppState) -> crate::Result<()> {
    let addr = config.bind_address();
    let manager = Arc::clone(&state.manager);
    let router = create_router_with_state(state, &config.endpoint);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, endpoint = %config.endpoint, "Starting rpc-tunnel server");

    let result = if config.graceful_shutdown {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    } else {
        axum::serve(listener, router).await
    };

    manager.shutdown();
    info!("Server stopped");
    result.map_err(crate::error::RpcTunnelError::Io)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.endpoint, "/mcp");
        assert!(config.graceful_shutdown);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 8080)
            .with_endpoint("/rpc")
            .without_graceful_shutdown();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.endpoint, "/rpc");
        assert!(!config.graceful_shutdown);
    }

    #[tokio::test]
    async fn test_router_creation() {
        let state = AppState::in_memory(Default::default());
        let _router = create_router(Arc::clone(&state.manager));
    }
}
