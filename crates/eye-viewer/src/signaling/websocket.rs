//! WebSocket transport for signaling (`{signaling_url}/ws/view/{stream_id}`).

use async_trait::async_trait;
use eye_common::StreamId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::client::{SignalingConnector, SignalingLink};
use super::SignalingMessage;
use crate::error::{ViewerError, ViewerResult};

const DEFAULT_SIGNALING: &str = "ws://localhost:8000";

/// Connects to the viewer endpoint of the signaling server.
#[derive(Debug, Clone)]
pub struct WsSignalingConnector {
    signaling_url: String,
}

impl WsSignalingConnector {
    pub fn new(signaling_url: Option<&str>) -> Self {
        Self {
            signaling_url: signaling_url
                .unwrap_or(DEFAULT_SIGNALING)
                .trim_end_matches('/')
                .to_owned(),
        }
    }

    /// Viewer endpoint for `stream_id`, with the id percent-encoded as one path segment.
    pub fn view_url(&self, stream_id: &StreamId) -> ViewerResult<Url> {
        let invalid =
            |reason: String| ViewerError::ChannelUnavailable(format!("{}: {reason}", self.signaling_url));
        let mut url = Url::parse(&self.signaling_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("not a hierarchical URL".into()))?
            .pop_if_empty()
            .extend(["ws", "view", stream_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl SignalingConnector for WsSignalingConnector {
    async fn connect(&self, stream_id: &StreamId) -> ViewerResult<SignalingLink> {
        let url = self.view_url(stream_id)?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ViewerError::ChannelUnavailable(format!("{url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalingMessage>();
        let shutdown = CancellationToken::new();

        // Writer: drains the outbound queue until the channel is closed.
        let token = shutdown.clone();
        let stream_tag = stream_id.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => None,
                    msg = outbound_rx.recv() => msg,
                };
                let Some(msg) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(stream = %stream_tag, error = %e, "Failed to encode signaling message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(stream = %stream_tag, error = %e, "Signaling send failed");
                    break;
                }
            }
            token.cancel();
        });

        // Reader: decodes frames in arrival order; dropping `inbound_tx`
        // tells the owner the transport is gone.
        let token = shutdown.clone();
        let stream_tag = stream_id.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = token.cancelled() => break,
                    frame = stream.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SignalingMessage>(text.as_str()) {
                            Ok(msg) => {
                                if inbound_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(stream = %stream_tag, error = %e, "Ignoring unrecognised signaling frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(stream = %stream_tag, "Signaling socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(stream = %stream_tag, error = %e, "Signaling socket error");
                        break;
                    }
                }
            }
            token.cancel();
        });

        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown,
        })
    }
}
