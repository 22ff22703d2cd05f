//! Signaling client: opens, feeds, and closes per-stream channels.
//!
//! The transport is pluggable through [`SignalingConnector`]; the client owns
//! the bookkeeping every transport shares:
//! - the registry of live channels (stream_id → handle)
//! - idempotent close, safe from inside message handling
//! - `ChannelClosed` on sends after close

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use eye_common::StreamId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::SignalingMessage;
use crate::error::{ViewerError, ViewerResult};

/// Duplex link produced by a connector for one stream.
pub struct SignalingLink {
    /// Messages queued here are delivered to the server in order.
    pub outbound: mpsc::UnboundedSender<SignalingMessage>,
    /// Server messages in arrival order; yields `None` once the transport is gone.
    pub inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    /// Cancelled to release the transport.
    pub shutdown: CancellationToken,
}

/// Establishes the transport behind a signaling channel.
#[async_trait]
pub trait SignalingConnector: Send + Sync + 'static {
    /// Connect to the server for `stream_id`.
    ///
    /// Fails with [`ViewerError::ChannelUnavailable`] when the server cannot
    /// be reached or refuses the stream.
    async fn connect(&self, stream_id: &StreamId) -> ViewerResult<SignalingLink>;
}

/// Cheap, clonable reference to one open channel.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: Uuid,
    stream_id: StreamId,
    outbound: mpsc::UnboundedSender<SignalingMessage>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl ChannelHandle {
    fn new(
        stream_id: StreamId,
        outbound: mpsc::UnboundedSender<SignalingMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                stream_id,
                outbound,
                shutdown,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.inner.stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Marks the handle closed and releases the transport. Returns false if it
    /// was already closed.
    fn release(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.shutdown.cancel();
        true
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.inner.id)
            .field("stream_id", &self.inner.stream_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An opened channel: the handle plus its ordered inbound queue.
///
/// Whoever holds `messages` is the single consumer for this channel, so
/// handling never re-enters for the same handle.
pub struct SignalingChannel {
    pub handle: ChannelHandle,
    pub messages: mpsc::UnboundedReceiver<SignalingMessage>,
}

/// Live channels keyed by stream id.
///
/// Explicitly constructed and owned by a [`SignalingClient`]; clones share the
/// same map. [`ChannelRegistry::close_all`] is the teardown.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Mutex<HashMap<StreamId, ChannelHandle>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StreamId, ChannelHandle>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle`, returning the channel it displaced.
    fn insert(&self, handle: ChannelHandle) -> Option<ChannelHandle> {
        self.lock().insert(handle.stream_id().clone(), handle)
    }

    /// Remove `handle` only if it is still the registered channel for its stream.
    fn remove(&self, handle: &ChannelHandle) -> bool {
        let mut channels = self.lock();
        match channels.get(handle.stream_id()) {
            Some(current) if current.id() == handle.id() => {
                channels.remove(handle.stream_id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, stream_id: &StreamId) -> Option<ChannelHandle> {
        self.lock().get(stream_id).cloned()
    }

    pub fn contains(&self, stream_id: &StreamId) -> bool {
        self.lock().contains_key(stream_id)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close and forget every channel.
    pub fn close_all(&self) {
        let drained: Vec<ChannelHandle> = self.lock().drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.release();
        }
    }
}

/// Opens signaling channels through a connector and tracks them.
#[derive(Clone)]
pub struct SignalingClient {
    connector: Arc<dyn SignalingConnector>,
    registry: ChannelRegistry,
}

impl SignalingClient {
    pub fn new(connector: Arc<dyn SignalingConnector>) -> Self {
        Self::with_registry(connector, ChannelRegistry::new())
    }

    pub fn with_registry(connector: Arc<dyn SignalingConnector>, registry: ChannelRegistry) -> Self {
        Self {
            connector,
            registry,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Open a channel for `stream_id`.
    ///
    /// A channel already registered for the same stream is closed first.
    pub async fn open(&self, stream_id: &StreamId) -> ViewerResult<SignalingChannel> {
        let link = self.connector.connect(stream_id).await?;
        let handle = ChannelHandle::new(stream_id.clone(), link.outbound, link.shutdown);

        if let Some(previous) = self.registry.insert(handle.clone()) {
            if previous.release() {
                tracing::debug!(
                    stream = %stream_id,
                    channel = %previous.id(),
                    "Replaced existing signaling channel"
                );
            }
        }

        tracing::debug!(stream = %stream_id, channel = %handle.id(), "Signaling channel opened");

        Ok(SignalingChannel {
            handle,
            messages: link.inbound,
        })
    }

    /// Queue `message` for delivery on `handle`.
    pub fn send(&self, handle: &ChannelHandle, message: SignalingMessage) -> ViewerResult<()> {
        if handle.is_closed() {
            return Err(ViewerError::ChannelClosed);
        }
        let kind = message.kind();
        handle.inner.outbound.send(message).map_err(|_| {
            // Transport side is gone; the handle can never deliver again.
            self.close(handle);
            ViewerError::ChannelClosed
        })?;
        tracing::trace!(stream = %handle.stream_id(), kind, "Signaling message queued");
        Ok(())
    }

    /// Release the channel. Idempotent.
    pub fn close(&self, handle: &ChannelHandle) {
        let released = handle.release();
        self.registry.remove(handle);
        if released {
            tracing::debug!(
                stream = %handle.stream_id(),
                channel = %handle.id(),
                "Signaling channel closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSignaling;

    fn sid(id: &str) -> StreamId {
        id.parse().unwrap()
    }

    #[tokio::test]
    async fn open_registers_and_close_unregisters() {
        let fake = FakeSignaling::new();
        let client = SignalingClient::new(fake.clone());

        let channel = client.open(&sid("abc123")).await.unwrap();
        assert!(client.registry().contains(&sid("abc123")));
        assert_eq!(fake.live_links(), 1);

        client.close(&channel.handle);
        client.close(&channel.handle);
        assert!(client.registry().is_empty());
        assert_eq!(fake.live_links(), 0);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let fake = FakeSignaling::new();
        let client = SignalingClient::new(fake.clone());
        let channel = client.open(&sid("abc123")).await.unwrap();

        client
            .send(&channel.handle, SignalingMessage::Answer { sdp: "v=0".into() })
            .unwrap();
        let mut server = fake.server(0);
        assert_eq!(
            server.from_client.recv().await,
            Some(SignalingMessage::Answer { sdp: "v=0".into() })
        );

        client.close(&channel.handle);
        assert_eq!(
            client.send(&channel.handle, SignalingMessage::Answer { sdp: "v=0".into() }),
            Err(ViewerError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn reopening_replaces_and_stale_close_keeps_new_channel() {
        let fake = FakeSignaling::new();
        let client = SignalingClient::new(fake.clone());

        let first = client.open(&sid("abc123")).await.unwrap();
        let second = client.open(&sid("abc123")).await.unwrap();
        assert!(first.handle.is_closed());
        assert_eq!(fake.live_links(), 1);

        client.close(&first.handle);
        let registered = client.registry().get(&sid("abc123")).unwrap();
        assert_eq!(registered.id(), second.handle.id());
    }

    #[tokio::test]
    async fn unavailable_stream_is_not_registered() {
        let fake = FakeSignaling::new();
        fake.reject_with("Stream not found");
        let client = SignalingClient::new(fake.clone());

        let err = client.open(&sid("abc123")).await.err().unwrap();
        assert!(matches!(err, ViewerError::ChannelUnavailable(_)));
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn close_all_releases_everything() {
        let fake = FakeSignaling::new();
        let client = SignalingClient::new(fake.clone());
        let a = client.open(&sid("a1")).await.unwrap();
        let b = client.open(&sid("b2")).await.unwrap();

        client.registry().close_all();
        assert!(a.handle.is_closed() && b.handle.is_closed());
        assert_eq!(fake.live_links(), 0);
    }
}
