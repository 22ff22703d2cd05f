//! # eye-viewer
//!
//! Viewer connection subsystem for EmergencyEye: watch one live broadcast.
//!
//! Architecture:
//! - [`signaling`] opens a WebSocket channel per stream and relays SDP/ICE
//! - [`peer`] owns the negotiated media session (str0m, viewer always answers)
//! - [`controller`] is the state machine the UI drives with `connect`/`disconnect`
//!
//! Control flow for one connect:
//! 1. open the signaling channel for the stream id
//! 2. create a peer session, buffer candidates until the offer arrives
//! 3. apply the offer, send the answer, trickle candidates
//! 4. first inbound track → `Connected`, media handle published
//! 5. `stream_ended` → `Ended`; anything lost along the way → `Failed`

pub mod controller;
pub mod error;
pub mod peer;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{ConnectionStatus, ViewerController, ViewerSnapshot};
pub use error::{ViewerError, ViewerResult};
pub use peer::{MediaFrame, MediaKind, PeerSession, PeerSessionManager, RemoteMediaHandle, TrackInfo};
pub use signaling::{IceCandidate, SignalingClient, SignalingMessage};
