//! # eye-catalog
//!
//! Thin clients for the EmergencyEye catalog service:
//! - [`CatalogClient`]: live and past stream listings, recording deletion
//! - [`DashboardFeed`]: `/ws/dashboard` push updates with auto-reconnect
//! - playback helpers on [`CatalogClient`] to resolve and download recordings

pub mod dashboard;
pub mod error;
pub mod playback;
pub mod rest;

pub use dashboard::{DashboardEvent, DashboardFeed};
pub use error::{CatalogError, Result};
pub use rest::{CatalogClient, ServiceStatus};
