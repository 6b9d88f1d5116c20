//! Persisted session record and its storage key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Identity, SessionId, DEFAULT_TENANT};
use crate::error::RpcTunnelError;

/// Prefix shared by every session key; the garbage collector lists under it.
pub const SESSION_KEY_PREFIX: &str = "tenant:";

const SESSION_SEGMENT: &str = "/session:";

/// Tenant-namespaced storage key: `tenant:{tenant_id}/session:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: String,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            SESSION_KEY_PREFIX, self.tenant_id, SESSION_SEGMENT, self.session_id
        )
    }
}

impl FromStr for SessionKey {
    type Err = RpcTunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Session ids never contain '/', so the last segment marker is the
        // real one even if a tenant id happens to contain it.
        s.strip_prefix(SESSION_KEY_PREFIX)
            .and_then(|rest| rest.rsplit_once(SESSION_SEGMENT))
            .ok_or_else(|| RpcTunnelError::InvalidRequest(format!("not a session key: {}", s)))
            .and_then(|(tenant, id)| Ok(Self::new(tenant, id.parse()?)))
    }
}

/// Durable bookkeeping for one session.
///
/// This is plain data: any process with access to the shared store can
/// service a request for the session by loading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// In-flight requests currently using the session.
    #[serde(default)]
    pub active_requests: u32,
}

impl SessionRecord {
    /// Create a record bound to the caller's identity, or the default tenant.
    pub fn new(id: SessionId, identity: Option<&Identity>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id: identity
                .map(|i| i.tenant_id.clone())
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            client_id: identity.and_then(|i| i.client_id.clone()),
            subject: identity.and_then(|i| i.subject.clone()),
            created_at: now,
            last_accessed_at: now,
            active_requests: 0,
        }
    }

    /// Whether `identity` is the caller that created the session.
    ///
    /// The tenant is already part of the key; this compares the client id
    /// and subject. An anonymous caller only owns anonymous sessions.
    pub fn is_owned_by(&self, identity: Option<&Identity>) -> bool {
        let client_id = identity.and_then(|i| i.client_id.as_deref());
        let subject = identity.and_then(|i| i.subject.as_deref());
        self.client_id.as_deref() == client_id && self.subject.as_deref() == subject
    }

    /// Storage key for this record.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.tenant_id.clone(), self.id.clone())
    }

    /// Record activity. Never moves `last_accessed_at` backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Mark a request as started.
    pub fn begin_request(&mut self) {
        self.active_requests = self.active_requests.saturating_add(1);
    }

    /// Mark a request as finished. Saturates at zero.
    pub fn end_request(&mut self) {
        self.active_requests = self.active_requests.saturating_sub(1);
    }

    /// Milliseconds since last activity, clamped at zero.
    pub fn idle_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.last_accessed_at).num_milliseconds().max(0) as u64
    }

    /// Whether the session has been idle longer than `stale_timeout_ms`.
    pub fn is_idle_past(&self, now: DateTime<Utc>, stale_timeout_ms: u64) -> bool {
        self.idle_ms(now) > stale_timeout_ms
    }

    /// Idle past the timeout with nothing in flight.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_timeout_ms: u64) -> bool {
        self.is_idle_past(now, stale_timeout_ms) && self.active_requests == 0
    }
}
