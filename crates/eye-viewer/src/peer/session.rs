//! Negotiation bookkeeping for one peer session.
//!
//! The session enforces the ordering rules the transport does not care about:
//! - the remote offer is applied at most once, and never after teardown
//! - candidates that arrive before the offer are buffered, then flushed
//! - the first track and the close are each reported exactly once
//! - `destroy` is idempotent and invalidates the media handle

use std::sync::Arc;

use eye_common::StreamId;
use tokio::sync::mpsc;

use super::{PeerConnector, PeerTransport, RemoteMediaHandle, TransportEvent};
use crate::error::{ViewerError, ViewerResult};
use crate::signaling::IceCandidate;

/// Where a session is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Created, waiting for the broadcaster's offer.
    AwaitingOffer,
    /// Offer applied, answer produced.
    Negotiated,
    /// Closed or destroyed; nothing more happens.
    Terminal,
}

/// Session-level outcome of a transport event, after de-duplication.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First inbound track: the session is connected.
    Track(RemoteMediaHandle),
    /// Local candidate to forward to the broadcaster.
    LocalCandidate(IceCandidate),
    /// Transport terminated.
    Closed(String),
}

/// Creates peer sessions on top of a media connector.
#[derive(Clone)]
pub struct PeerSessionManager {
    connector: Arc<dyn PeerConnector>,
    media_buffer: usize,
}

impl PeerSessionManager {
    pub fn new(connector: Arc<dyn PeerConnector>, media_buffer: usize) -> Self {
        Self {
            connector,
            media_buffer,
        }
    }

    /// Allocate a new session for `stream_id`. No network activity happens here.
    pub fn create(&self, stream_id: &StreamId) -> ViewerResult<PeerSession> {
        let media = RemoteMediaHandle::new(stream_id.clone(), self.media_buffer);
        let transport = self.connector.create(stream_id, media.sink())?;
        tracing::debug!(stream = %stream_id, "Peer session created");
        Ok(PeerSession {
            stream_id: stream_id.clone(),
            transport,
            state: NegotiationState::AwaitingOffer,
            pending_candidates: Vec::new(),
            media,
            track_reported: false,
            closed_reported: false,
        })
    }
}

/// One negotiated media session.
pub struct PeerSession {
    stream_id: StreamId,
    transport: Box<dyn PeerTransport>,
    state: NegotiationState,
    pending_candidates: Vec<IceCandidate>,
    media: RemoteMediaHandle,
    track_reported: bool,
    closed_reported: bool,
}

impl PeerSession {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == NegotiationState::Terminal
    }

    /// Candidates held back until the offer is applied.
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// The inbound stream, once the first track has arrived and until destroy.
    pub fn remote_media(&self) -> Option<RemoteMediaHandle> {
        (self.track_reported && !self.is_terminal()).then(|| self.media.clone())
    }

    /// The transport's event stream; available once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.transport.take_events()
    }

    /// Apply the broadcaster's offer and return our answer SDP.
    ///
    /// The signaling server fans every broadcaster offer out to all viewers of
    /// the stream, so once negotiated a repeat offer is ignored and yields `None`.
    pub fn apply_remote_offer(&mut self, sdp: &str) -> ViewerResult<Option<String>> {
        match self.state {
            NegotiationState::Terminal => {
                return Err(ViewerError::Negotiation("session is already closed".into()));
            }
            NegotiationState::Negotiated => {
                tracing::debug!(stream = %self.stream_id, "Ignoring offer for an already negotiated session");
                return Ok(None);
            }
            NegotiationState::AwaitingOffer => {}
        }

        let answer = self.transport.accept_offer(sdp)?;
        self.state = NegotiationState::Negotiated;

        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            tracing::debug!(
                stream = %self.stream_id,
                count = pending.len(),
                "Applying buffered ICE candidates"
            );
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_remote_candidate(&candidate) {
                tracing::warn!(stream = %self.stream_id, error = %e, "Dropping buffered ICE candidate");
            }
        }

        Ok(Some(answer))
    }

    /// Buffer or apply a remote candidate.
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) -> ViewerResult<()> {
        if candidate.is_end_of_candidates() {
            return Ok(());
        }
        match self.state {
            NegotiationState::AwaitingOffer => {
                self.pending_candidates.push(candidate);
                Ok(())
            }
            NegotiationState::Negotiated => self.transport.add_remote_candidate(&candidate),
            NegotiationState::Terminal => Ok(()),
        }
    }

    /// Fold a transport event into at most one session event.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<SessionEvent> {
        if self.is_terminal() {
            return None;
        }
        match event {
            TransportEvent::Track(track) => {
                tracing::debug!(stream = %self.stream_id, mid = %track.mid, kind = ?track.kind, "Inbound track");
                self.media.add_track(track);
                if self.track_reported {
                    return None;
                }
                self.track_reported = true;
                Some(SessionEvent::Track(self.media.clone()))
            }
            TransportEvent::LocalCandidate(candidate) => Some(SessionEvent::LocalCandidate(candidate)),
            TransportEvent::Closed(reason) => {
                if self.closed_reported {
                    return None;
                }
                self.closed_reported = true;
                self.state = NegotiationState::Terminal;
                self.transport.close();
                self.media.invalidate();
                Some(SessionEvent::Closed(reason))
            }
        }
    }

    /// Release the transport and invalidate the media handle. Idempotent.
    pub fn destroy(&mut self) {
        if self.is_terminal() && !self.media.is_active() {
            return;
        }
        self.state = NegotiationState::Terminal;
        self.pending_candidates.clear();
        self.transport.close();
        self.media.invalidate();
        tracing::debug!(stream = %self.stream_id, "Peer session destroyed");
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{MediaKind, TrackInfo};
    use crate::testing::FakePeers;

    fn session(peers: &Arc<FakePeers>) -> PeerSession {
        PeerSessionManager::new(peers.clone(), 8)
            .create(&"abc123".parse().unwrap())
            .unwrap()
    }

    fn track(mid: &str) -> TransportEvent {
        TransportEvent::Track(TrackInfo {
            mid: mid.into(),
            kind: MediaKind::Video,
        })
    }

    #[test]
    fn candidates_before_offer_are_buffered_then_flushed() {
        let peers = FakePeers::new();
        let mut session = session(&peers);

        session.add_remote_candidate(IceCandidate::new("candidate:a")).unwrap();
        session.add_remote_candidate(IceCandidate::new("candidate:b")).unwrap();
        assert_eq!(session.pending_candidates(), 2);
        assert!(peers.probe(0).candidates().is_empty());

        let answer = session.apply_remote_offer("offer-sdp").unwrap();
        assert_eq!(answer.as_deref(), Some("answer-for:offer-sdp"));
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(peers.probe(0).candidates(), vec!["candidate:a", "candidate:b"]);

        session.add_remote_candidate(IceCandidate::new("candidate:c")).unwrap();
        assert_eq!(peers.probe(0).candidates().len(), 3);
    }

    #[test]
    fn end_of_candidates_marker_is_ignored() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        session.add_remote_candidate(IceCandidate::new("")).unwrap();
        assert_eq!(session.pending_candidates(), 0);
    }

    #[test]
    fn repeat_offer_is_ignored_once_negotiated() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        assert!(session.apply_remote_offer("offer-sdp").unwrap().is_some());

        let again = session.apply_remote_offer("offer-for-another-viewer").unwrap();
        assert!(again.is_none());
        assert_eq!(session.state(), NegotiationState::Negotiated);
        assert_eq!(peers.probe(0).offers(), vec!["offer-sdp"]);
    }

    #[test]
    fn offer_after_destroy_is_rejected() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        session.destroy();
        let err = session.apply_remote_offer("offer-sdp").unwrap_err();
        assert!(matches!(err, ViewerError::Negotiation(_)));
    }

    #[test]
    fn malformed_offer_is_a_negotiation_error() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        let err = session.apply_remote_offer("bad").unwrap_err();
        assert_eq!(err.error_code(), "NEGOTIATION_ERROR");
        assert_eq!(session.state(), NegotiationState::AwaitingOffer);
    }

    #[test]
    fn first_track_fires_once() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        session.apply_remote_offer("offer-sdp").unwrap();

        let first = session.handle_event(track("0"));
        assert!(matches!(first, Some(SessionEvent::Track(_))));
        assert!(session.handle_event(track("1")).is_none());

        let media = session.remote_media().unwrap();
        assert_eq!(media.tracks().len(), 2);
        assert!(media.is_active());
    }

    #[test]
    fn close_fires_once_and_invalidates_media() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        session.apply_remote_offer("offer-sdp").unwrap();
        let Some(SessionEvent::Track(media)) = session.handle_event(track("0")) else {
            panic!("expected track");
        };

        let closed = session.handle_event(TransportEvent::Closed("ice disconnected".into()));
        assert!(matches!(closed, Some(SessionEvent::Closed(_))));
        assert!(session.handle_event(TransportEvent::Closed("again".into())).is_none());
        assert!(!media.is_active());
        assert!(session.remote_media().is_none());
        assert!(peers.probe(0).is_closed());
    }

    #[test]
    fn destroy_is_idempotent() {
        let peers = FakePeers::new();
        let mut session = session(&peers);
        session.destroy();
        session.destroy();
        assert!(session.is_terminal());
        assert_eq!(peers.probe(0).close_calls(), 1);
        assert!(session.handle_event(track("0")).is_none());
    }
}
