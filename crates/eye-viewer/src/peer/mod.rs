//! Peer sessions, one negotiated media connection per connect attempt.
//!
//! The viewer is always the answering side: the broadcaster offers, we answer.
//! The media engine sits behind [`PeerConnector`]/[`PeerTransport`] so the
//! negotiation bookkeeping in [`session`] does not depend on it:
//!
//! ```text
//!   signaling ──offer/candidates──▶ PeerSession ──▶ PeerTransport (str0m over UDP)
//!                                       ▲                  │
//!                                       └── TransportEvent ┘  track / local candidate / closed
//! ```

pub mod rtc;
pub mod session;

pub use rtc::RtcPeerConnector;
pub use session::{PeerSession, PeerSessionManager, SessionEvent};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eye_common::StreamId;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::error::ViewerResult;
use crate::signaling::IceCandidate;

/// What a received track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

/// One inbound media line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub mid: String,
    pub kind: MediaKind,
}

/// A depacketized media sample from the broadcaster.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub mid: String,
    pub kind: MediaKind,
    pub payload: Arc<[u8]>,
}

/// Events a transport reports back to its session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An inbound media track became available.
    Track(TrackInfo),
    /// A local candidate to trickle to the broadcaster.
    LocalCandidate(IceCandidate),
    /// The transport terminated (remote close, network loss, error).
    Closed(String),
}

/// Builds media transports for new sessions.
pub trait PeerConnector: Send + Sync + 'static {
    /// Allocate a transport for `stream_id`. Must not touch the network yet.
    fn create(&self, stream_id: &StreamId, media: MediaSink) -> ViewerResult<Box<dyn PeerTransport>>;
}

/// The media engine behind one peer session.
pub trait PeerTransport: Send {
    /// Apply the remote offer and produce the local answer SDP.
    fn accept_offer(&mut self, sdp: &str) -> ViewerResult<String>;

    /// Apply a remote candidate. Only called after [`accept_offer`](Self::accept_offer).
    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> ViewerResult<()>;

    /// Event stream for this transport; available once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Release the transport. Idempotent.
    fn close(&mut self);
}

/// Write side of a [`RemoteMediaHandle`], held by the transport.
#[derive(Clone)]
pub struct MediaSink {
    frames: broadcast::Sender<MediaFrame>,
}

impl MediaSink {
    pub fn push(&self, frame: MediaFrame) {
        // No subscribers is fine; frames are simply dropped.
        let _ = self.frames.send(frame);
    }
}

/// The inbound audio/video stream of a connected session.
///
/// Owned by the peer session, shared by reference with the UI. Once the session
/// is destroyed the handle reports `is_active() == false` and no more frames arrive.
#[derive(Clone)]
pub struct RemoteMediaHandle {
    inner: Arc<MediaInner>,
}

struct MediaInner {
    stream_id: StreamId,
    tracks: Mutex<Vec<TrackInfo>>,
    frames: broadcast::Sender<MediaFrame>,
    active: AtomicBool,
}

impl RemoteMediaHandle {
    pub(crate) fn new(stream_id: StreamId, capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(MediaInner {
                stream_id,
                tracks: Mutex::new(Vec::new()),
                frames,
                active: AtomicBool::new(true),
            }),
        }
    }

    pub(crate) fn sink(&self) -> MediaSink {
        MediaSink {
            frames: self.inner.frames.clone(),
        }
    }

    pub(crate) fn add_track(&self, track: TrackInfo) {
        let mut tracks = self.inner.tracks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tracks.iter().any(|t| t.mid == track.mid) {
            tracks.push(track);
        }
    }

    pub(crate) fn invalidate(&self) {
        self.inner.active.store(false, Ordering::Release);
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.inner.stream_id
    }

    /// Tracks received so far.
    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.inner
            .tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Subscribe to inbound media frames.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.inner.frames.subscribe()
    }
}

impl PartialEq for RemoteMediaHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RemoteMediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMediaHandle")
            .field("stream_id", &self.inner.stream_id)
            .field("tracks", &self.tracks())
            .field("active", &self.is_active())
            .finish()
    }
}
