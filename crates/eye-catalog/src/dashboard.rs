//! Dashboard feed: live stream-list snapshots pushed over `/ws/dashboard`.

use std::time::Duration;

use eye_common::{DashboardMessage, DashboardUpdate};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CatalogError, Result};

const DEFAULT_WS: &str = "ws://localhost:8000";

/// Events published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    /// Full snapshot of live and past streams.
    Update(DashboardUpdate),
    /// The connection dropped; a reconnect is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect attempts exhausted; the feed has stopped.
    GaveUp,
}

/// Dashboard client with auto-reconnect.
///
/// ```rust,no_run
/// use eye_catalog::{DashboardEvent, DashboardFeed};
///
/// #[tokio::main]
/// async fn main() {
///     let feed = DashboardFeed::new(None);
///     let mut events = feed.subscribe();
///     feed.connect(); // spawns background task, returns immediately
///     while let Ok(event) = events.recv().await {
///         if let DashboardEvent::Update(update) = event {
///             println!("{} live, {} recorded", update.streams.len(), update.past_streams.len());
///         }
///     }
/// }
/// ```
pub struct DashboardFeed {
    url: String,
    max_reconnect: u32,
    sender: broadcast::Sender<DashboardEvent>,
    shutdown: CancellationToken,
}

impl DashboardFeed {
    pub fn new(signaling_url: Option<&str>) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            url: format!(
                "{}/ws/dashboard",
                signaling_url.unwrap_or(DEFAULT_WS).trim_end_matches('/')
            ),
            max_reconnect: 10,
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_max_reconnect(mut self, attempts: u32) -> Self {
        self.max_reconnect = attempts;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to dashboard events.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Spawns a background task that maintains the dashboard connection.
    /// Returns immediately; use [`subscribe`](Self::subscribe) to receive events.
    pub fn connect(&self) {
        let url = self.url.clone();
        let max_reconnect = self.max_reconnect;
        let tx = self.sender.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    outcome = run_once(&url, &tx, &mut attempts) => outcome,
                };
                let e = match outcome {
                    Ok(()) => CatalogError::Other("server closed the connection".into()),
                    Err(e) => e,
                };
                attempts += 1;
                if attempts > max_reconnect {
                    error!(url = %url, error = %e, "Dashboard: max reconnect attempts reached");
                    let _ = tx.send(DashboardEvent::GaveUp);
                    break;
                }
                let delay = backoff(attempts);
                warn!(error = %e, attempt = attempts, ?delay, "Dashboard: disconnected, reconnecting");
                let _ = tx.send(DashboardEvent::Reconnecting {
                    attempt: attempts,
                    delay,
                });
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
            debug!(url = %url, "Dashboard feed stopped");
        });
    }

    /// Stop the background task.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for DashboardFeed {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// 2^n seconds, capped at 30.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(30))
}

async fn run_once(
    url: &str,
    tx: &broadcast::Sender<DashboardEvent>,
    attempts: &mut u32,
) -> Result<()> {
    let (ws, _) = connect_async(url).await?;
    info!(url = %url, "Dashboard connected");
    *attempts = 0;
    let (_sink, mut stream) = ws.split();

    while let Some(msg) = stream.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        match serde_json::from_str::<DashboardMessage>(text.as_str()) {
            Ok(DashboardMessage::StreamList(update)) => {
                debug!(
                    live = update.streams.len(),
                    past = update.past_streams.len(),
                    "Dashboard update"
                );
                let _ = tx.send(DashboardEvent::Update(update));
            }
            Ok(DashboardMessage::Unknown) => debug!("Dashboard: ignoring unknown message"),
            Err(e) => warn!(error = %e, "Dashboard: undecodable message"),
        }
    }
    Ok(())
}
