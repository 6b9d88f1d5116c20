//! Session model.
//!
//! This module provides the data persisted per session: identifier,
//! tenant-namespaced key, identity binding, timestamps, and the in-flight
//! request counter.

mod context;
mod id;
mod record;

pub use context::{Identity, RequestContext, DEFAULT_TENANT};
pub use id::SessionId;
pub use record::{SessionKey, SessionRecord, SESSION_KEY_PREFIX};
