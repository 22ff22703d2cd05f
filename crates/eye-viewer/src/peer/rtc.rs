//! str0m-backed peer transport.
//!
//! str0m is Sans-IO: it handles SDP, ICE, DTLS and SRTP, and we drive the
//! UDP socket and the clock ourselves. Each session gets:
//! - one UDP socket bound on the host address (advertised as a host candidate)
//! - one `Rtc` instance, acting as the answerer
//! - one task that pumps socket ↔ `Rtc` and turns str0m events into [`TransportEvent`]s

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use eye_common::StreamId;
use str0m::change::SdpOffer;
use str0m::media::{MediaKind as RtcMediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    MediaFrame, MediaKind, MediaSink, PeerConnector, PeerTransport, TrackInfo, TransportEvent,
};
use crate::error::{ViewerError, ViewerResult};
use crate::signaling::IceCandidate;

/// MTU-sized receive buffer.
const RECV_BUFFER: usize = 2000;

/// How long ICE may stay disconnected before the peer is reported lost.
const ICE_DISCONNECT_GRACE: Duration = Duration::from_secs(5);

impl From<RtcMediaKind> for MediaKind {
    fn from(kind: RtcMediaKind) -> Self {
        if kind == RtcMediaKind::Audio {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }
}

/// Creates [`RtcTransport`]s bound to one host address.
#[derive(Debug, Clone)]
pub struct RtcPeerConnector {
    local_ip: IpAddr,
}

impl RtcPeerConnector {
    /// An unspecified `local_ip` (`0.0.0.0` or `::`) is resolved to a routable
    /// interface address, see [`host_address`].
    pub fn new(local_ip: IpAddr) -> Self {
        let resolved = host_address(local_ip);
        tracing::debug!(configured = %local_ip, host = %resolved, "Peer host address");
        Self { local_ip: resolved }
    }

    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }
}

/// Address to bind and advertise as the host candidate.
///
/// A specific address is used as is. An unspecified one becomes the address
/// of the interface holding the default route, or loopback when there is none.
pub fn host_address(configured: IpAddr) -> IpAddr {
    if !configured.is_unspecified() {
        return configured;
    }
    match default_route_ip(configured) {
        Some(ip) => ip,
        None => {
            tracing::warn!("No routable interface found, advertising loopback only");
            match configured {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            }
        }
    }
}

/// Connecting a UDP socket sends nothing but makes the OS pick the outgoing
/// interface, whose address is then read back.
fn default_route_ip(family: IpAddr) -> Option<IpAddr> {
    let (bind, target) = match family {
        IpAddr::V4(_) => ("0.0.0.0:0", "8.8.8.8:80"),
        IpAddr::V6(_) => ("[::]:0", "[2001:4860:4860::8888]:80"),
    };
    let socket = std::net::UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

impl PeerConnector for RtcPeerConnector {
    fn create(&self, stream_id: &StreamId, media: MediaSink) -> ViewerResult<Box<dyn PeerTransport>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Box::new(RtcTransport {
            stream_id: stream_id.clone(),
            local_ip: self.local_ip,
            media,
            events_tx,
            events_rx: Some(events_rx),
            candidates: None,
            shutdown: CancellationToken::new(),
        }))
    }
}

/// One str0m peer connection. The `Rtc` itself lives in the drive task once
/// the offer is accepted; this struct keeps the control ends.
pub struct RtcTransport {
    stream_id: StreamId,
    local_ip: IpAddr,
    media: MediaSink,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    /// Remote candidates for the drive task; `Some` once negotiated.
    candidates: Option<mpsc::UnboundedSender<Candidate>>,
    shutdown: CancellationToken,
}

impl RtcTransport {
    fn bind_socket(&self) -> ViewerResult<(UdpSocket, SocketAddr)> {
        let socket = std::net::UdpSocket::bind(SocketAddr::new(self.local_ip, 0))?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok((UdpSocket::from_std(socket)?, local_addr))
    }
}

impl PeerTransport for RtcTransport {
    fn accept_offer(&mut self, sdp: &str) -> ViewerResult<String> {
        if self.candidates.is_some() {
            return Err(ViewerError::Negotiation("offer already accepted".into()));
        }
        if self.shutdown.is_cancelled() {
            return Err(ViewerError::Negotiation("transport is closed".into()));
        }

        let offer = SdpOffer::from_sdp_string(sdp)
            .map_err(|e| ViewerError::Negotiation(format!("malformed offer: {e}")))?;

        let (socket, local_addr) = self.bind_socket()?;
        tracing::debug!(stream = %self.stream_id, addr = %local_addr, "Bound UDP socket for peer");

        let mut rtc = Rtc::builder().build(Instant::now());

        let candidate = Candidate::host(local_addr, Protocol::Udp)
            .map_err(|e| ViewerError::Negotiation(e.to_string()))?;
        rtc.add_local_candidate(candidate.clone());

        let answer = rtc
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| ViewerError::Negotiation(e.to_string()))?;

        let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();
        self.candidates = Some(candidates_tx);

        // The answer already lists the host candidate; trickling it as well
        // covers broadcasters that ignore candidates embedded in the SDP.
        let _ = self.events_tx.send(TransportEvent::LocalCandidate(
            IceCandidate::new(candidate.to_sdp_string()).with_m_line(0),
        ));

        tokio::spawn(drive(
            rtc,
            socket,
            local_addr,
            self.stream_id.clone(),
            candidates_rx,
            self.events_tx.clone(),
            self.media.clone(),
            self.shutdown.clone(),
        ));

        Ok(answer.to_sdp_string())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> ViewerResult<()> {
        let line = candidate.candidate.trim();
        let line = if line.starts_with("candidate:") {
            line.to_owned()
        } else {
            format!("candidate:{line}")
        };
        let parsed = Candidate::from_sdp_string(&line)
            .map_err(|e| ViewerError::Negotiation(format!("bad ICE candidate: {e:?}")))?;

        let Some(tx) = &self.candidates else {
            return Err(ViewerError::Negotiation("no remote description yet".into()));
        };
        tx.send(parsed)
            .map_err(|_| ViewerError::TransportClosed("peer connection stopped".into()))
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    fn close(&mut self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(stream = %self.stream_id, "Closing peer transport");
            self.shutdown.cancel();
        }
        self.candidates = None;
    }
}

impl Drop for RtcTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// ICE `Disconnected` can recover on its own; only a disconnect that outlasts
/// [`ICE_DISCONNECT_GRACE`] ends the peer connection.
#[derive(Debug, Default)]
struct DisconnectTimer {
    since: Option<Instant>,
}

impl DisconnectTimer {
    fn observe(&mut self, state: IceConnectionState, now: Instant) {
        if state == IceConnectionState::Disconnected {
            self.since.get_or_insert(now);
        } else {
            self.since = None;
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.since.map(|since| since + ICE_DISCONNECT_GRACE)
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

/// What woke the drive loop.
enum Wake {
    Shutdown,
    Candidate(Candidate),
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Timeout,
}

/// Pump the socket and clock into `rtc` until it dies or is shut down.
#[allow(clippy::too_many_arguments)]
async fn drive(
    mut rtc: Rtc,
    socket: UdpSocket,
    local_addr: SocketAddr,
    stream_id: StreamId,
    mut candidates: mpsc::UnboundedReceiver<Candidate>,
    events: mpsc::UnboundedSender<TransportEvent>,
    media: MediaSink,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut kinds: HashMap<Mid, MediaKind> = HashMap::new();
    let mut ice = DisconnectTimer::default();

    let reason = loop {
        if !rtc.is_alive() {
            break "peer connection is no longer alive".to_string();
        }
        if ice.expired(Instant::now()) {
            break "ICE connection lost".to_string();
        }

        // Drain str0m until it asks to wait.
        let deadline = match rtc.poll_output() {
            Ok(Output::Timeout(at)) => at,
            Ok(Output::Transmit(transmit)) => {
                if let Err(e) = socket.send_to(&transmit.contents, transmit.destination).await {
                    tracing::warn!(stream = %stream_id, error = %e, "UDP send error");
                }
                continue;
            }
            Ok(Output::Event(event)) => {
                match event {
                    Event::Connected => {
                        tracing::info!(stream = %stream_id, "Peer connection established");
                    }
                    Event::IceConnectionStateChange(state) => {
                        tracing::debug!(stream = %stream_id, state = ?state, "ICE state changed");
                        if state == IceConnectionState::Disconnected {
                            tracing::warn!(stream = %stream_id, grace = ?ICE_DISCONNECT_GRACE, "ICE disconnected, waiting for recovery");
                        }
                        ice.observe(state, Instant::now());
                    }
                    Event::MediaAdded(added) => {
                        let kind = MediaKind::from(added.kind);
                        kinds.insert(added.mid, kind);
                        if added.direction.is_receiving() {
                            let _ = events.send(TransportEvent::Track(TrackInfo {
                                mid: added.mid.to_string(),
                                kind,
                            }));
                        }
                    }
                    Event::MediaData(data) => {
                        let kind = kinds.get(&data.mid).copied().unwrap_or(MediaKind::Video);
                        media.push(MediaFrame {
                            mid: data.mid.to_string(),
                            kind,
                            payload: data.data.into(),
                        });
                    }
                    _ => {}
                }
                continue;
            }
            Err(e) => break format!("WebRTC error: {e}"),
        };

        let deadline = ice.deadline().map_or(deadline, |lost| lost.min(deadline));
        let wait = deadline.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            if let Err(e) = rtc.handle_input(Input::Timeout(Instant::now())) {
                break format!("WebRTC error: {e}");
            }
            continue;
        }

        let wake = tokio::select! {
            _ = shutdown.cancelled() => Wake::Shutdown,
            candidate = candidates.recv() => match candidate {
                Some(c) => Wake::Candidate(c),
                None => Wake::Shutdown,
            },
            received = tokio::time::timeout(wait, socket.recv_from(&mut buf)) => match received {
                Ok(result) => Wake::Datagram(result),
                Err(_) => Wake::Timeout,
            },
        };

        let input = match wake {
            Wake::Shutdown => {
                rtc.disconnect();
                tracing::debug!(stream = %stream_id, "Peer drive loop stopped");
                return;
            }
            Wake::Candidate(candidate) => {
                rtc.add_remote_candidate(candidate);
                continue;
            }
            Wake::Timeout => Input::Timeout(Instant::now()),
            Wake::Datagram(Ok((len, source))) => match buf[..len].try_into() {
                Ok(contents) => Input::Receive(
                    Instant::now(),
                    Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: local_addr,
                        contents,
                    },
                ),
                Err(e) => {
                    tracing::trace!(stream = %stream_id, error = ?e, "Ignoring unrecognised datagram");
                    continue;
                }
            },
            Wake::Datagram(Err(e)) => break format!("UDP receive error: {e}"),
        };

        if let Err(e) = rtc.handle_input(input) {
            break format!("WebRTC error: {e}");
        }
    };

    tracing::info!(stream = %stream_id, reason = %reason, "Peer transport closed");
    let _ = events.send(TransportEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::RemoteMediaHandle;

    fn transport() -> Box<dyn PeerTransport> {
        let stream_id: StreamId = "abc123".parse().unwrap();
        let media = RemoteMediaHandle::new(stream_id.clone(), 4);
        RtcPeerConnector::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .create(&stream_id, media.sink())
            .unwrap()
    }

    #[test]
    fn explicit_host_address_is_kept() {
        let ip: IpAddr = "192.0.2.10".parse().unwrap();
        assert_eq!(host_address(ip), ip);
        assert_eq!(RtcPeerConnector::new(ip).local_ip(), ip);
    }

    #[test]
    fn unspecified_host_address_is_resolved() {
        let resolved = host_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!resolved.is_unspecified());
        assert!(resolved.is_ipv4());
    }

    #[test]
    fn disconnect_is_fatal_only_after_grace() {
        let start = Instant::now();
        let mut ice = DisconnectTimer::default();
        ice.observe(IceConnectionState::Connected, start);
        assert!(ice.deadline().is_none());

        ice.observe(IceConnectionState::Disconnected, start);
        assert!(!ice.expired(start + Duration::from_secs(1)));
        assert_eq!(ice.deadline(), Some(start + ICE_DISCONNECT_GRACE));

        // A repeated report does not restart the clock.
        ice.observe(IceConnectionState::Disconnected, start + Duration::from_secs(2));
        assert!(ice.expired(start + ICE_DISCONNECT_GRACE));
    }

    #[test]
    fn reconnect_clears_disconnect() {
        let start = Instant::now();
        let mut ice = DisconnectTimer::default();
        ice.observe(IceConnectionState::Disconnected, start);
        ice.observe(IceConnectionState::Connected, start + Duration::from_secs(1));
        assert!(!ice.expired(start + ICE_DISCONNECT_GRACE * 2));
    }

    #[tokio::test]
    async fn garbage_offer_is_rejected() {
        let mut transport = transport();
        let err = transport.accept_offer("not an sdp").unwrap_err();
        assert!(matches!(err, ViewerError::Negotiation(_)));
    }

    #[tokio::test]
    async fn candidates_require_an_offer() {
        let mut transport = transport();
        let err = transport
            .add_remote_candidate(&IceCandidate::new(
                "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host",
            ))
            .unwrap_err();
        assert!(matches!(err, ViewerError::Negotiation(_)));
    }

    #[tokio::test]
    async fn events_are_taken_once_and_close_is_idempotent() {
        let mut transport = transport();
        assert!(transport.take_events().is_some());
        assert!(transport.take_events().is_none());
        transport.close();
        transport.close();
        assert!(transport.accept_offer("v=0").is_err());
    }
}
