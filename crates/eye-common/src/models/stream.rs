//! Catalog records for live and recorded broadcasts, matching the
//! signaling/catalog service's JSON (snake_case field names).

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamId;

/// A broadcast that is currently live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: StreamId,
    /// ISO-8601 timestamp as written by the server (may lack a UTC offset).
    pub started_at: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl StreamInfo {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.started_at)
    }
}

/// A finished broadcast with an uploaded recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PastStreamInfo {
    pub id: StreamId,
    pub started_at: String,
    pub ended_at: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub notes: String,
    pub duration_seconds: f64,
    pub video_filename: String,
    /// Server-relative path of the recording, e.g. `/recordings/abc_1f2e.webm`.
    pub video_url: String,
}

impl PastStreamInfo {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.started_at)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.ended_at)
    }
}

/// Frames pushed over the dashboard WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    StreamList(DashboardUpdate),
    #[serde(other)]
    Unknown,
}

/// Snapshot pushed by the dashboard feed whenever the stream list changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardUpdate {
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
    #[serde(default)]
    pub past_streams: Vec<PastStreamInfo>,
}

/// Parse either an RFC 3339 timestamp (browser uploads) or a naive
/// `YYYY-MM-DDTHH:MM:SS[.ffffff]` one (server clock), treating the latter as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
