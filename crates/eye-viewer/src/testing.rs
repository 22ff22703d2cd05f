//! In-memory signaling server and media transport for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eye_common::StreamId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ViewerError, ViewerResult};
use crate::peer::{MediaKind, MediaSink, PeerConnector, PeerTransport, TrackInfo, TransportEvent};
use crate::signaling::{IceCandidate, SignalingConnector, SignalingLink, SignalingMessage};

/// Server side of one fake signaling link.
pub struct ServerEnd {
    pub stream_id: StreamId,
    pub to_client: mpsc::UnboundedSender<SignalingMessage>,
    pub from_client: mpsc::UnboundedReceiver<SignalingMessage>,
    pub shutdown: CancellationToken,
}

impl ServerEnd {
    pub fn push(&self, message: SignalingMessage) {
        let _ = self.to_client.send(message);
    }

    pub fn offer(&self, sdp: &str) {
        self.push(SignalingMessage::Offer {
            sdp: sdp.into(),
            stream_id: Some(self.stream_id.to_string()),
        });
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    reject: Mutex<Option<String>>,
    servers: Mutex<Vec<Option<ServerEnd>>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following connect fail as if the stream were not live.
    pub fn reject_with(&self, reason: &str) {
        *self.reject.lock().unwrap() = Some(reason.to_owned());
    }

    /// Number of links opened so far.
    pub fn opened(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    /// Links whose transport has not been released.
    pub fn live_links(&self) -> usize {
        self.tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }

    /// Take the server end of the `index`-th link.
    pub fn server(&self, index: usize) -> ServerEnd {
        self.servers.lock().unwrap()[index]
            .take()
            .expect("server end already taken")
    }
}

#[async_trait]
impl SignalingConnector for FakeSignaling {
    async fn connect(&self, stream_id: &StreamId) -> ViewerResult<SignalingLink> {
        if let Some(reason) = self.reject.lock().unwrap().clone() {
            return Err(ViewerError::ChannelUnavailable(reason));
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        self.tokens.lock().unwrap().push(shutdown.clone());
        self.servers.lock().unwrap().push(Some(ServerEnd {
            stream_id: stream_id.clone(),
            to_client,
            from_client,
            shutdown: shutdown.clone(),
        }));

        Ok(SignalingLink {
            outbound,
            inbound,
            shutdown,
        })
    }
}

/// Observation and control point for one fake transport.
#[derive(Clone)]
pub struct TransportProbe {
    events: mpsc::UnboundedSender<TransportEvent>,
    pub media: MediaSink,
    offers: Arc<Mutex<Vec<String>>>,
    candidates: Arc<Mutex<Vec<String>>>,
    close_calls: Arc<AtomicUsize>,
}

impl TransportProbe {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_track(&self, mid: &str) {
        self.emit(TransportEvent::Track(TrackInfo {
            mid: mid.into(),
            kind: MediaKind::Video,
        }));
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }
}

#[derive(Default)]
pub struct FakePeers {
    probes: Mutex<Vec<TransportProbe>>,
}

impl FakePeers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.probes.lock().unwrap().len()
    }

    pub fn probe(&self, index: usize) -> TransportProbe {
        self.probes.lock().unwrap()[index].clone()
    }

    /// Transports that were created and not yet closed.
    pub fn live(&self) -> usize {
        self.probes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !p.is_closed())
            .count()
    }
}

impl PeerConnector for FakePeers {
    fn create(&self, _stream_id: &StreamId, media: MediaSink) -> ViewerResult<Box<dyn PeerTransport>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let probe = TransportProbe {
            events: events_tx,
            media,
            offers: Arc::default(),
            candidates: Arc::default(),
            close_calls: Arc::default(),
        };
        self.probes.lock().unwrap().push(probe.clone());
        Ok(Box::new(FakeTransport {
            probe,
            events: Some(events_rx),
            negotiated: false,
        }))
    }
}

struct FakeTransport {
    probe: TransportProbe,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    negotiated: bool,
}

impl PeerTransport for FakeTransport {
    fn accept_offer(&mut self, sdp: &str) -> ViewerResult<String> {
        if sdp == "bad" {
            return Err(ViewerError::Negotiation("malformed offer".into()));
        }
        self.negotiated = true;
        self.probe.offers.lock().unwrap().push(sdp.to_owned());
        Ok(format!("answer-for:{sdp}"))
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> ViewerResult<()> {
        assert!(self.negotiated, "candidate applied before the offer");
        self.probe
            .candidates
            .lock()
            .unwrap()
            .push(candidate.candidate.clone());
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    fn close(&mut self) {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}
