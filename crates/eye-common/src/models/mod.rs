//! Data models shared between the viewer connection and the catalog client.

pub mod stream;
pub mod stream_id;

pub use stream::{DashboardMessage, DashboardUpdate, PastStreamInfo, StreamInfo};
pub use stream_id::StreamId;
