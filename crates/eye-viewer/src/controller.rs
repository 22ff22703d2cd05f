//! Viewer connection controller: the state machine the UI drives.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──first track──▶ Connected
//!                        │  │                        │  │
//!                        │  └──── stream_ended ──────┼──┴──▶ Ended
//!                        └─── unavailable / negotiation / transport lost ──▶ Failed
//!   any ──disconnect──▶ Idle
//! ```
//!
//! Each `connect` starts a new generation. One driver task per generation
//! consumes signaling messages and transport events in order; every transition
//! happens under the controller mutex and is dropped if its generation is no
//! longer current, so `disconnect` (or a newer `connect`) always wins.

use std::sync::Arc;
use std::time::Duration;

use eye_common::config::{AppConfig, ViewerConfig};
use eye_common::StreamId;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ViewerError;
use crate::peer::{
    PeerSession, PeerSessionManager, RemoteMediaHandle, RtcPeerConnector, SessionEvent,
    TransportEvent,
};
use crate::signaling::{
    ChannelHandle, SignalingChannel, SignalingClient, SignalingMessage, WsSignalingConnector,
};

/// Controller-visible lifecycle of a viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Failed,
    Ended,
}

impl ConnectionStatus {
    /// Failed or Ended: nothing more will happen until the next connect.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Ended)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// The observable triple (plus the stream it refers to).
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerSnapshot {
    pub status: ConnectionStatus,
    pub stream_id: Option<StreamId>,
    pub remote_media: Option<RemoteMediaHandle>,
    pub last_error: Option<String>,
}

impl Default for ViewerSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            stream_id: None,
            remote_media: None,
            last_error: None,
        }
    }
}

/// Resources of one connect attempt. Released exactly once: explicitly by the
/// controller, or on drop.
struct ActiveConnection {
    generation: u64,
    stream_id: StreamId,
    cancel: CancellationToken,
    signaling: SignalingClient,
    channel: Option<ChannelHandle>,
    session: Option<PeerSession>,
}

impl ActiveConnection {
    /// Peer session first, then the signaling channel.
    fn release(&mut self) {
        self.cancel.cancel();
        if let Some(mut session) = self.session.take() {
            session.destroy();
        }
        if let Some(channel) = self.channel.take() {
            self.signaling.close(&channel);
        }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.release();
    }
}

struct ControllerState {
    generation: u64,
    snapshot: ViewerSnapshot,
    active: Option<ActiveConnection>,
}

impl ControllerState {
    fn current(&mut self, generation: u64) -> Option<&mut ActiveConnection> {
        self.active
            .as_mut()
            .filter(|active| active.generation == generation)
    }

    /// Tear down the live pair, if any.
    fn release_active(&mut self) -> bool {
        match self.active.take() {
            Some(mut active) => {
                active.release();
                tracing::debug!(
                    stream = %active.stream_id,
                    generation = active.generation,
                    "Viewer connection released"
                );
                true
            }
            None => false,
        }
    }
}

struct Shared {
    signaling: SignalingClient,
    peers: PeerSessionManager,
    connect_timeout: Option<Duration>,
    state: Mutex<ControllerState>,
    observers: watch::Sender<ViewerSnapshot>,
    /// Cancelled when the controller is dropped; parent of every attempt token.
    root: CancellationToken,
}

/// What woke a driver task.
enum Step {
    Signal(Option<SignalingMessage>),
    Transport(TransportEvent),
    Timeout,
}

/// Public viewer connection: `connect`, `disconnect`, and observables.
///
/// ```rust,no_run
/// use eye_viewer::{ConnectionStatus, ViewerController};
///
/// # async fn run() {
/// let config = eye_common::config::init().unwrap();
/// let viewer = ViewerController::from_config(config);
/// let mut updates = viewer.subscribe();
///
/// viewer.connect("abc123").await;
/// while updates.changed().await.is_ok() {
///     let snapshot = updates.borrow_and_update().clone();
///     if snapshot.status != ConnectionStatus::Connecting {
///         break;
///     }
/// }
/// viewer.disconnect().await;
/// # }
/// ```
pub struct ViewerController {
    shared: Arc<Shared>,
}

impl ViewerController {
    pub fn new(signaling: SignalingClient, peers: PeerSessionManager, config: &ViewerConfig) -> Self {
        let (observers, _) = watch::channel(ViewerSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                signaling,
                peers,
                connect_timeout: config.connect_timeout(),
                state: Mutex::new(ControllerState {
                    generation: 0,
                    snapshot: ViewerSnapshot::default(),
                    active: None,
                }),
                observers,
                root: CancellationToken::new(),
            }),
        }
    }

    /// WebSocket signaling plus str0m media, wired from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let connector = WsSignalingConnector::new(Some(&config.server.signaling_url));
        let signaling = SignalingClient::new(Arc::new(connector));
        let peers = PeerSessionManager::new(
            Arc::new(RtcPeerConnector::new(config.viewer.local_ip)),
            config.viewer.media_buffer,
        );
        Self::new(signaling, peers, &config.viewer)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.observers.borrow().status
    }

    pub fn remote_media(&self) -> Option<RemoteMediaHandle> {
        self.shared.observers.borrow().remote_media.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.observers.borrow().last_error.clone()
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        self.shared.observers.borrow().clone()
    }

    /// Watch every transition.
    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.shared.observers.subscribe()
    }

    pub fn signaling(&self) -> &SignalingClient {
        &self.shared.signaling
    }

    /// Start viewing `stream_id`.
    ///
    /// Any live connection is torn down first. Never fails directly: progress
    /// and failures are reported through [`status`](Self::status) and
    /// [`last_error`](Self::last_error).
    pub async fn connect(&self, stream_id: impl AsRef<str>) {
        let mut state = self.shared.state.lock().await;
        if state.release_active() {
            tracing::info!("Replacing existing viewer connection");
        }

        state.generation += 1;
        let generation = state.generation;

        let stream_id: StreamId = match stream_id.as_ref().parse() {
            Ok(id) => id,
            Err(e) => {
                let err = ViewerError::from(e);
                tracing::warn!(error = %err, "Refusing to connect");
                state.snapshot.stream_id = None;
                self.shared.set_terminal(&mut state, ConnectionStatus::Failed, Some(err));
                return;
            }
        };

        let cancel = self.shared.root.child_token();
        state.active = Some(ActiveConnection {
            generation,
            stream_id: stream_id.clone(),
            cancel: cancel.clone(),
            signaling: self.shared.signaling.clone(),
            channel: None,
            session: None,
        });
        state.snapshot = ViewerSnapshot {
            status: ConnectionStatus::Connecting,
            stream_id: Some(stream_id.clone()),
            remote_media: None,
            last_error: None,
        };
        self.shared.publish(&state);
        drop(state);

        tracing::info!(stream = %stream_id, generation, "Connecting to stream");
        tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            stream_id,
            generation,
            cancel,
        ));
    }

    /// Tear everything down and return to Idle. Idempotent.
    pub async fn disconnect(&self) {
        let mut state = self.shared.state.lock().await;
        if state.release_active() {
            tracing::info!(generation = state.generation, "Viewer disconnected");
        }
        state.snapshot = ViewerSnapshot::default();
        self.shared.publish(&state);
    }
}

impl Drop for ViewerController {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

impl Shared {
    fn publish(&self, state: &ControllerState) {
        let next = state.snapshot.clone();
        self.observers.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Release the live pair and land in Failed or Ended.
    fn set_terminal(&self, state: &mut ControllerState, status: ConnectionStatus, error: Option<ViewerError>) {
        state.release_active();
        state.snapshot.status = status;
        state.snapshot.remote_media = None;
        state.snapshot.last_error = error.map(|e| e.to_string());
        self.publish(state);
    }

    fn fail(&self, state: &mut ControllerState, error: ViewerError) {
        tracing::warn!(
            stream = ?state.snapshot.stream_id,
            code = error.error_code(),
            error = %error,
            "Viewer connection failed"
        );
        self.set_terminal(state, ConnectionStatus::Failed, Some(error));
    }

    fn end(&self, state: &mut ControllerState) {
        tracing::info!(stream = ?state.snapshot.stream_id, "Broadcast ended");
        self.set_terminal(state, ConnectionStatus::Ended, None);
    }

    /// Fail `generation` if it is still current.
    async fn fail_generation(&self, generation: u64, error: ViewerError) {
        let mut state = self.state.lock().await;
        if state.current(generation).is_some() {
            self.fail(&mut state, error);
        }
    }

    /// Handle one wake-up of the driver. Returns false once the attempt is over.
    async fn step(&self, generation: u64, step: Step) -> bool {
        let mut state = self.state.lock().await;
        if state.current(generation).is_none() {
            return false;
        }
        match step {
            Step::Signal(Some(message)) => self.on_signal(&mut state, generation, message),
            Step::Signal(None) => {
                self.fail(
                    &mut state,
                    ViewerError::TransportClosed("signaling channel closed".into()),
                );
                false
            }
            Step::Transport(event) => self.on_transport(&mut state, generation, event),
            Step::Timeout => {
                if state.snapshot.status != ConnectionStatus::Connecting {
                    return true;
                }
                let timeout = self.connect_timeout.unwrap_or_default();
                self.fail(&mut state, ViewerError::Timeout(timeout));
                false
            }
        }
    }

    fn on_signal(&self, state: &mut ControllerState, generation: u64, message: SignalingMessage) -> bool {
        tracing::debug!(generation, kind = message.kind(), "Signaling message received");
        match message {
            SignalingMessage::Offer { sdp, .. } => {
                let result = match state.current(generation) {
                    Some(ActiveConnection {
                        session: Some(session),
                        channel: Some(channel),
                        ..
                    }) => session.apply_remote_offer(&sdp).and_then(|answer| match answer {
                        Some(answer) => self
                            .signaling
                            .send(channel, SignalingMessage::Answer { sdp: answer })
                            .map(|()| true),
                        None => Ok(false),
                    }),
                    _ => return false,
                };
                match result {
                    Ok(answered) => {
                        if answered {
                            tracing::info!(stream = ?state.snapshot.stream_id, "SDP answer sent to broadcaster");
                        }
                        true
                    }
                    Err(e) => {
                        self.fail(state, e);
                        false
                    }
                }
            }
            SignalingMessage::Candidate { candidate } => {
                let Some(session) = state.current(generation).and_then(|a| a.session.as_mut()) else {
                    return false;
                };
                if let Err(e) = session.add_remote_candidate(candidate) {
                    tracing::warn!(error = %e, "Failed to apply ICE candidate");
                }
                true
            }
            SignalingMessage::Answer { .. } => {
                self.fail(
                    state,
                    ViewerError::Negotiation("received an answer, but viewers only answer offers".into()),
                );
                false
            }
            SignalingMessage::StreamEnded { .. } => {
                self.end(state);
                false
            }
            SignalingMessage::Error { message } => {
                self.fail(state, ViewerError::ChannelUnavailable(message));
                false
            }
        }
    }

    fn on_transport(&self, state: &mut ControllerState, generation: u64, event: TransportEvent) -> bool {
        let Some(active) = state.current(generation) else {
            return false;
        };
        let Some(session) = active.session.as_mut() else {
            return false;
        };
        match session.handle_event(event) {
            Some(SessionEvent::Track(media)) => {
                if state.snapshot.status == ConnectionStatus::Connecting {
                    tracing::info!(stream = %media.stream_id(), "Remote media received, connected");
                    state.snapshot.status = ConnectionStatus::Connected;
                    state.snapshot.remote_media = Some(media);
                    state.snapshot.last_error = None;
                    self.publish(state);
                }
                true
            }
            Some(SessionEvent::LocalCandidate(candidate)) => {
                if let Some(channel) = active.channel.as_ref() {
                    if let Err(e) = self.signaling.send(channel, SignalingMessage::Candidate { candidate }) {
                        tracing::debug!(error = %e, "Could not forward local candidate");
                    }
                }
                true
            }
            Some(SessionEvent::Closed(reason)) => {
                self.fail(state, ViewerError::TransportClosed(reason));
                false
            }
            None => true,
        }
    }
}

/// Driver for one connect attempt.
async fn run_connection(
    shared: Arc<Shared>,
    stream_id: StreamId,
    generation: u64,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = shared.signaling.open(&stream_id) => opened,
    };
    let SignalingChannel { handle, mut messages } = match opened {
        Ok(channel) => channel,
        Err(e) => {
            shared.fail_generation(generation, e).await;
            return;
        }
    };

    let mut session = match shared.peers.create(&stream_id) {
        Ok(session) => session,
        Err(e) => {
            shared.signaling.close(&handle);
            shared.fail_generation(generation, e).await;
            return;
        }
    };
    let mut transport_events = session.take_events();

    {
        let mut state = shared.state.lock().await;
        match state.current(generation) {
            Some(active) => {
                active.channel = Some(handle);
                active.session = Some(session);
            }
            None => {
                // Superseded while the channel was opening.
                session.destroy();
                shared.signaling.close(&handle);
                return;
            }
        }
    }

    let deadline = shared.connect_timeout.map(|t| Instant::now() + t);
    let mut timeout_armed = deadline.is_some();

    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = messages.recv() => Step::Signal(message),
            event = next_event(&mut transport_events) => match event {
                Some(event) => Step::Transport(event),
                None => {
                    transport_events = None;
                    continue;
                }
            },
            _ = sleep_until(deadline), if timeout_armed => {
                timeout_armed = false;
                Step::Timeout
            }
        };
        if !shared.step(generation, step).await {
            break;
        }
    }

    tracing::debug!(stream = %stream_id, generation, "Connection driver finished");
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
