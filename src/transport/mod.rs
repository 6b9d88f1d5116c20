//! Transport layer: response shapes, the per-request transport and
//! deferred cleanup of streaming responses.

mod cleanup;
mod ephemeral;
mod response;

pub use cleanup::{with_deferred_cleanup, DeferredCleanup, Release};
pub use ephemeral::{
    accepts_event_stream, EphemeralTransport, InitializedHook, SessionIdPolicy, TransportOptions,
};
pub use response::{ByteStream, TransportResponse, SESSION_ID_HEADER};
