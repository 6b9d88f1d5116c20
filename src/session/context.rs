//! Caller identity and per-request context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant used when the caller carries no authenticated identity.
pub const DEFAULT_TENANT: &str = "default-tenant";

/// Authenticated identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Tenant the caller belongs to.
    pub tenant_id: String,
    /// Client application id, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Authenticated subject, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Identity {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: None,
            subject: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Context threaded through every manager and store call.
///
/// Identity is explicit: callers that have no authenticated identity pass
/// `None` and the default tenant applies.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for tracing.
    pub request_id: String,
    /// Authenticated caller, if any.
    pub identity: Option<Identity>,
}

impl RequestContext {
    /// Create a context for an unauthenticated caller.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            identity: None,
        }
    }

    /// Create a context for an authenticated caller.
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::new()
        }
    }

    /// Create a context for work the server does on its own behalf.
    pub fn system(name: &str) -> Self {
        Self {
            request_id: format!("{}-{}", name, Uuid::new_v4().simple()),
            identity: None,
        }
    }

    /// Tenant the request is scoped to.
    pub fn tenant_id(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.tenant_id.as_str())
            .unwrap_or(DEFAULT_TENANT)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults_to_default_tenant() {
        let ctx = RequestContext::new();
        assert!(ctx.identity.is_none());
        assert_eq!(ctx.tenant_id(), DEFAULT_TENANT);
    }

    #[test]
    fn test_context_with_identity() {
        let identity = Identity::new("acme")
            .with_client_id("cli")
            .with_subject("alice");
        let ctx = RequestContext::with_identity(identity.clone());
        assert_eq!(ctx.tenant_id(), "acme");
        assert_eq!(ctx.identity, Some(identity));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestContext::new();
        let b = RequestContext::new();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_system_context() {
        let ctx = RequestContext::system("gc");
        assert!(ctx.request_id.starts_with("gc-"));
        assert_eq!(ctx.tenant_id(), DEFAULT_TENANT);
    }
}
