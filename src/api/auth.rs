//! API key authentication.
//!
//! Each key maps to the [`Identity`] it authenticates. The middleware puts
//! that identity into the request extensions, where the handlers pick it up
//! to scope sessions to the caller's tenant.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::session::Identity;

/// API key configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Whether authentication is enabled.
    pub enabled: bool,
    /// Prefix for the API key (default: "Bearer ").
    pub prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "Bearer ".to_string(),
        }
    }
}

impl AuthConfig {
    /// Create a disabled auth config (for development).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Thread-safe API key store.
#[derive(Debug)]
pub struct ApiKeyStore {
    keys: RwLock<HashMap<String, Identity>>,
    config: AuthConfig,
}

impl ApiKeyStore {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a store with authentication disabled.
    pub fn disabled() -> Self {
        Self::new(AuthConfig::disabled())
    }

    /// Register a key for an identity. Replaces any previous mapping.
    pub fn add_key(&self, key: impl Into<String>, identity: Identity) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key.into(), identity);
        }
    }

    pub fn remove_key(&self, key: &str) -> bool {
        self.keys
            .write()
            .map(|mut keys| keys.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Identity authenticated by `key`, if the key is known.
    pub fn identity_for(&self, key: &str) -> Option<Identity> {
        self.keys
            .read()
            .ok()
            .and_then(|keys| keys.get(key).cloned())
    }

    pub fn count(&self) -> usize {
        self.keys.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Extract the API key from an authorization header value.
    pub fn extract_key<'a>(&self, header_value: &'a str) -> Option<&'a str> {
        header_value
            .strip_prefix(self.config.prefix.as_str())
            .filter(|key| !key.is_empty())
    }
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new(AuthConfig::default())
    }
}

/// Authentication middleware for axum.
///
/// With auth disabled every request passes without an identity.
pub async fn auth_middleware(
    State(store): State<Arc<ApiKeyStore>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !store.is_enabled() || request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let identity = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| store.extract_key(header))
        .and_then(|key| store.identity_for(key));

    match identity {
        Some(identity) => {
            debug!(tenant = %identity.tenant_id, "request authenticated");
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert!(config.enabled);
        assert_eq!(config.prefix, "Bearer ");
        assert!(!AuthConfig::disabled().enabled);
    }

    #[test]
    fn test_api_key_store_add_remove() {
        let store = ApiKeyStore::default();

        store.add_key("test-key-123", Identity::new("acme"));
        assert_eq!(
            store.identity_for("test-key-123").map(|i| i.tenant_id),
            Some("acme".to_string())
        );
        assert!(store.identity_for("invalid-key").is_none());
        assert_eq!(store.count(), 1);

        assert!(store.remove_key("test-key-123"));
        assert!(!store.remove_key("test-key-123"));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_api_key_store_extract() {
        let store = ApiKeyStore::default();

        assert_eq!(store.extract_key("Bearer my-secret-key"), Some("my-secret-key"));
        assert!(store.extract_key("Basic credentials").is_none());
        assert!(store.extract_key("Bearer ").is_none());
    }

    #[test]
    fn test_keys_map_to_distinct_tenants() {
        let store = ApiKeyStore::default();
        store.add_key("k1", Identity::new("acme").with_subject("alice"));
        store.add_key("k2", Identity::new("globex"));

        assert_eq!(store.identity_for("k1").unwrap().subject.as_deref(), Some("alice"));
        assert_eq!(store.identity_for("k2").unwrap().tenant_id, "globex");
    }
}
