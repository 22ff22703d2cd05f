//! Viewer signaling: the WebSocket negotiation channel for one broadcast.
//!
//! The signaling server relays:
//! - SDP offers from the broadcaster, and our answers back
//! - ICE candidates in both directions
//! - an end-of-stream notice when the broadcaster stops
//!
//! Media never flows through this channel, only the negotiation that sets it up.

pub mod client;
pub mod websocket;

pub use client::{
    ChannelHandle, ChannelRegistry, SignalingChannel, SignalingClient, SignalingConnector,
    SignalingLink,
};
pub use websocket::WsSignalingConnector;

use serde::{Deserialize, Serialize};

/// Messages exchanged with the signaling server, as JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// Server → viewer: the broadcaster's session description.
    Offer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },

    /// Viewer → server: our session description.
    Answer { sdp: String },

    /// Bidirectional: one trickled ICE candidate.
    #[serde(rename = "ice_candidate")]
    Candidate { candidate: IceCandidate },

    /// Server → viewer: the broadcaster stopped on purpose.
    StreamEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<String>,
    },

    /// Server → viewer: the request was rejected (e.g. "Stream not found").
    Error { message: String },
}

impl SignalingMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "ice_candidate",
            Self::StreamEnded { .. } => "stream_ended",
            Self::Error { .. } => "error",
        }
    }
}

/// An ICE candidate in browser `RTCIceCandidateInit` shape.
///
/// Browsers relay either the full init object or just the `candidate` line;
/// `null` marks end-of-candidates and decodes to an empty candidate string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CandidateWire")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    pub fn with_m_line(mut self, index: u16) -> Self {
        self.sdp_m_line_index = Some(index);
        self
    }

    /// True for the end-of-candidates marker.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CandidateWire {
    Line(String),
    Init {
        #[serde(default)]
        candidate: Option<String>,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex", default)]
        sdp_m_line_index: Option<u16>,
    },
    End(()),
}

impl From<CandidateWire> for IceCandidate {
    fn from(wire: CandidateWire) -> Self {
        match wire {
            CandidateWire::Line(candidate) => Self::new(candidate),
            CandidateWire::Init {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => Self {
                candidate: candidate.unwrap_or_default(),
                sdp_mid,
                sdp_m_line_index,
            },
            CandidateWire::End(()) => Self::new(""),
        }
    }
}
