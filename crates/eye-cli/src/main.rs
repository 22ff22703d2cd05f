//! # eye
//!
//! Command-line viewer for EmergencyEye:
//! - `watch` a live broadcast over WebRTC
//! - list live `streams` and past `recordings`
//! - `playback` (download) or `delete` a recording
//! - follow the `dashboard` feed

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "eye", version, about = "EmergencyEye viewer")]
struct Cli {
    /// Catalog/signaling HTTP base, overrides `server.base_url`.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Signaling WebSocket base, overrides `server.signaling_url`.
    #[arg(long, global = true)]
    signaling: Option<String>,

    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to a live broadcast and report its status until it ends.
    Watch {
        stream_id: String,
        /// Give up if no media arrives within this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List live broadcasts.
    Streams,
    /// List past broadcasts with recordings.
    Recordings,
    /// Download the recording of a past broadcast.
    Playback {
        stream_id: String,
        /// Target directory, overrides `playback.download_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Delete a past broadcast and its recording.
    Delete { stream_id: String },
    /// Follow live stream-list updates.
    Dashboard,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = eye_common::config::init()?.clone();
    if let Some(server) = cli.server {
        config.server.base_url = server;
    }
    if let Some(signaling) = cli.signaling {
        config.server.signaling_url = signaling;
    }

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eye=info".into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        base_url = %config.server.base_url,
        signaling_url = %config.server.signaling_url,
        "eye v{}",
        env!("CARGO_PKG_VERSION")
    );

    let output = commands::Output { json: cli.json };
    match cli.command {
        Command::Watch { stream_id, timeout } => {
            if let Some(secs) = timeout {
                config.viewer.connect_timeout_secs = secs;
            }
            commands::watch(&config, &stream_id, output).await
        }
        Command::Streams => commands::streams(&config, output).await,
        Command::Recordings => commands::recordings(&config, output).await,
        Command::Playback { stream_id, dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.playback.download_dir));
            commands::playback(&config, &stream_id, &dir, output).await
        }
        Command::Delete { stream_id } => commands::delete(&config, &stream_id).await,
        Command::Dashboard => commands::dashboard(&config, output).await,
    }
}
