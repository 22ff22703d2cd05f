//! # eye-common
//!
//! Shared types, configuration, and error handling used across the EmergencyEye
//! viewer crates. No connection logic lives here, just primitives and contracts.

pub mod config;
pub mod error;
pub mod models;

pub use error::{CommonError, CommonResult};
pub use models::{DashboardMessage, DashboardUpdate, PastStreamInfo, StreamId, StreamInfo};
