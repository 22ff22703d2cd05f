//! Subcommand implementations.

use std::path::Path;

use anyhow::{bail, Context};
use chrono::Local;
use eye_catalog::{CatalogClient, DashboardEvent, DashboardFeed};
use eye_common::config::AppConfig;
use eye_common::{PastStreamInfo, StreamId, StreamInfo};
use eye_viewer::{ConnectionStatus, ViewerController, ViewerSnapshot};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

fn catalog(config: &AppConfig) -> anyhow::Result<CatalogClient> {
    CatalogClient::from_config(&config.server).context("failed to build catalog client")
}

fn parse_id(raw: &str) -> anyhow::Result<StreamId> {
    raw.parse().with_context(|| format!("invalid stream id {raw:?}"))
}

fn local_time(raw: &str) -> String {
    eye_common::models::stream::parse_timestamp(raw)
        .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_owned())
}

fn print_stream(stream: &StreamInfo) {
    println!(
        "{:<16} {}  {:>9.5},{:>10.5}  {}",
        stream.id,
        local_time(&stream.started_at),
        stream.latitude,
        stream.longitude,
        stream.notes
    );
}

fn print_recording(stream: &PastStreamInfo) {
    println!(
        "{:<16} {}  {:>6.0}s  {}  {}",
        stream.id,
        local_time(&stream.started_at),
        stream.duration_seconds,
        stream.video_filename,
        stream.notes
    );
}

fn print_snapshot(snapshot: &ViewerSnapshot, output: Output) -> anyhow::Result<()> {
    if output.json {
        let tracks = snapshot
            .remote_media
            .as_ref()
            .map(|m| m.tracks())
            .unwrap_or_default();
        let line = serde_json::json!({
            "status": snapshot.status,
            "stream_id": snapshot.stream_id,
            "tracks": tracks,
            "last_error": snapshot.last_error,
        });
        println!("{line}");
        return Ok(());
    }
    match (&snapshot.status, &snapshot.last_error) {
        (_, Some(error)) => println!("{}: {error}", snapshot.status),
        (ConnectionStatus::Connected, None) => {
            let tracks = snapshot
                .remote_media
                .as_ref()
                .map(|m| m.tracks())
                .unwrap_or_default();
            let kinds: Vec<String> = tracks
                .iter()
                .map(|t| format!("{:?}({})", t.kind, t.mid).to_lowercase())
                .collect();
            println!("connected: {}", kinds.join(", "));
        }
        (status, None) => println!("{status}"),
    }
    Ok(())
}

/// Connect and follow the connection until it ends, fails, or Ctrl-C.
pub async fn watch(config: &AppConfig, stream_id: &str, output: Output) -> anyhow::Result<()> {
    let viewer = ViewerController::from_config(config);
    let mut updates = viewer.subscribe();
    updates.borrow_and_update();

    viewer.connect(stream_id).await;
    let mut frames = None;
    let mut received = 0u64;

    loop {
        let snapshot = updates.borrow_and_update().clone();
        print_snapshot(&snapshot, output)?;

        if frames.is_none() {
            frames = snapshot.remote_media.as_ref().map(|media| media.subscribe());
        }
        if snapshot.status.is_terminal() {
            tracing::info!(frames = received, "Viewer stopped");
            if snapshot.status == ConnectionStatus::Failed {
                bail!(
                    "{}",
                    snapshot
                        .last_error
                        .unwrap_or_else(|| "connection failed".into())
                );
            }
            return Ok(());
        }

        // Wait for the next status change, counting media frames meanwhile.
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    viewer.disconnect().await;
                    tracing::info!(frames = received, "Interrupted, disconnected");
                    return Ok(());
                }
                changed = updates.changed() => {
                    changed.context("viewer controller went away")?;
                    break;
                }
                frame = next_frame(&mut frames) => match frame {
                    Ok(_) => received += 1,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Media subscriber lagged");
                    }
                    Err(RecvError::Closed) => frames = None,
                },
            }
        }
    }
}

async fn next_frame(
    frames: &mut Option<tokio::sync::broadcast::Receiver<eye_viewer::MediaFrame>>,
) -> Result<eye_viewer::MediaFrame, RecvError> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub async fn streams(config: &AppConfig, output: Output) -> anyhow::Result<()> {
    let streams = catalog(config)?.list_streams().await?;
    if output.json {
        println!("{}", serde_json::to_string_pretty(&streams)?);
    } else if streams.is_empty() {
        println!("No live streams");
    } else {
        streams.iter().for_each(print_stream);
    }
    Ok(())
}

pub async fn recordings(config: &AppConfig, output: Output) -> anyhow::Result<()> {
    let past = catalog(config)?.list_past_streams().await?;
    if output.json {
        println!("{}", serde_json::to_string_pretty(&past)?);
    } else if past.is_empty() {
        println!("No recordings");
    } else {
        past.iter().for_each(print_recording);
    }
    Ok(())
}

pub async fn playback(
    config: &AppConfig,
    stream_id: &str,
    dir: &Path,
    output: Output,
) -> anyhow::Result<()> {
    let id = parse_id(stream_id)?;
    let client = catalog(config)?;
    let stream = client
        .get_past_stream(&id)
        .await
        .with_context(|| format!("recording {id} not found"))?;
    let path = client.download_recording(&stream, dir).await?;
    if output.json {
        println!("{}", serde_json::json!({ "stream_id": id, "path": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

pub async fn delete(config: &AppConfig, stream_id: &str) -> anyhow::Result<()> {
    let id = parse_id(stream_id)?;
    catalog(config)?
        .delete_past_stream(&id)
        .await
        .with_context(|| format!("failed to delete recording {id}"))?;
    println!("Deleted {id}");
    Ok(())
}

pub async fn dashboard(config: &AppConfig, output: Output) -> anyhow::Result<()> {
    let feed = DashboardFeed::new(Some(&config.server.signaling_url));
    let mut events = feed.subscribe();
    feed.connect();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(DashboardEvent::Update(update)) => {
                if output.json {
                    println!("{}", serde_json::to_string(&update)?);
                    continue;
                }
                println!(
                    "── {} live, {} recorded ──",
                    update.streams.len(),
                    update.past_streams.len()
                );
                update.streams.iter().for_each(print_stream);
            }
            Ok(DashboardEvent::Reconnecting { attempt, delay }) => {
                eprintln!("reconnecting in {delay:?} (attempt {attempt})");
            }
            Ok(DashboardEvent::GaveUp) => bail!("dashboard connection lost"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Dashboard output lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    feed.close();
    Ok(())
}
