//! Deferred release of per-request resources.
//!
//! Buffered responses release their ephemeral handler and transport right
//! away. Streaming responses keep them open until the stream ends, fails,
//! or is dropped by an aborted client, whichever happens first, and exactly
//! once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::response::ByteStream;

/// Something that must be released when a request is done with it.
///
/// Implementations log failures instead of returning them: by the time a
/// release runs, the response has already been decided.
#[async_trait]
pub trait Release: Send + 'static {
    async fn release(self: Box<Self>);
}

/// Single-fire dispose routine.
pub struct DeferredCleanup {
    fired: AtomicBool,
    resources: Mutex<Option<Box<dyn Release>>>,
}

impl DeferredCleanup {
    pub fn new(resources: impl Release) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            resources: Mutex::new(Some(Box::new(resources))),
        })
    }

    /// Whether dispose has run (or is running).
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Release the resources. Later calls are no-ops.
    pub async fn dispose(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let resources = match self.resources.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(resources) = resources {
            resources.release().await;
        }
    }
}

impl Drop for DeferredCleanup {
    fn drop(&mut self) {
        if *self.fired.get_mut() {
            return;
        }
        let resources = match self.resources.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(resources) = resources else {
            return;
        };
        // Dropped before the stream finished: the client went away.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("stream dropped before completion, releasing in background");
                handle.spawn(resources.release());
            }
            Err(_) => warn!("stream dropped outside a runtime; resources leaked to store TTL"),
        }
    }
}

/// Wrap `stream` so `cleanup` fires when it ends or errors.
///
/// The wrapper owns `cleanup`; dropping it early also releases.
pub fn with_deferred_cleanup(stream: ByteStream, cleanup: Arc<DeferredCleanup>) -> ByteStream {
    Box::pin(async_stream::stream! {
        let mut stream = stream;
        loop {
            match stream.next().await {
                Some(Ok(chunk)) => yield Ok(chunk),
                Some(Err(err)) => {
                    warn!(error = %err, "response stream failed");
                    cleanup.dispose().await;
                    yield Err(err);
                    break;
                }
                None => {
                    cleanup.dispose().await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcTunnelError;
    use axum::body::Bytes;
    use futures_util::stream;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Release for Counting {
        async fn release(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<AtomicUsize>, Arc<DeferredCleanup>) {
        let count = Arc::new(AtomicUsize::new(0));
        let cleanup = DeferredCleanup::new(Counting(Arc::clone(&count)));
        (count, cleanup)
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (count, cleanup) = counting();
        assert!(!cleanup.has_fired());

        cleanup.dispose().await;
        cleanup.dispose().await;

        assert!(cleanup.has_fired());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_end_and_error_fire_once() {
        let (count, cleanup) = counting();
        let a = Arc::clone(&cleanup);
        let b = Arc::clone(&cleanup);

        let (_, _) = tokio::join!(
            tokio::spawn(async move { a.dispose().await }),
            tokio::spawn(async move { b.dispose().await }),
        );
        drop(cleanup);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_after_stream_drains() {
        let (count, cleanup) = counting();
        let chunks: Vec<crate::Result<Bytes>> = vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))];
        let mut wrapped = with_deferred_cleanup(Box::pin(stream::iter(chunks)), cleanup);

        assert_eq!(wrapped.next().await.unwrap().unwrap(), Bytes::from("a"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(wrapped.next().await.unwrap().unwrap(), Bytes::from("b"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(wrapped.next().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(wrapped);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_on_stream_error() {
        let (count, cleanup) = counting();
        let chunks: Vec<crate::Result<Bytes>> = vec![
            Ok(Bytes::from("a")),
            Err(RpcTunnelError::Protocol("broken".into())),
            Ok(Bytes::from("never")),
        ];
        let mut wrapped = with_deferred_cleanup(Box::pin(stream::iter(chunks)), cleanup);

        assert!(wrapped.next().await.unwrap().is_ok());
        assert!(wrapped.next().await.unwrap().is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(wrapped.next().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_when_dropped_early() {
        let (count, cleanup) = counting();
        let chunks: Vec<crate::Result<Bytes>> = vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))];
        let mut wrapped = with_deferred_cleanup(Box::pin(stream::iter(chunks)), cleanup);

        assert!(wrapped.next().await.is_some());
        drop(wrapped);

        tokio::time::timeout(Duration::from_secs(1), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
