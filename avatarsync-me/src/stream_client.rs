//! WebSocket client for the speech/avatar backend stream

use crate::error::AvatarError;
use crate::message::StreamMessage;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
const PING_PAYLOAD: &str = r#"{"type":"ping"}"#;

/// Why the read loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamClosed {
    /// The backend closed the socket
    Remote,
    /// The engine side stopped accepting messages
    Receiver,
}

#[derive(Debug, Clone)]
pub struct StreamClient {
    url: Url,
    keepalive: Duration,
}

impl StreamClient {
    pub fn new(url: &str) -> Result<Self, AvatarError> {
        let url = Url::parse(url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(AvatarError::Network(format!(
                "Stream URL must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            keepalive: Duration::from_secs(15),
        })
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Connect and forward every parsed message to `sink` until either side
    /// closes.
    ///
    /// Frames that do not parse are logged and skipped; one bad message
    /// never ends the stream.
    pub async fn run(&self, sink: mpsc::Sender<StreamMessage>) -> Result<StreamClosed, AvatarError> {
        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| AvatarError::Network("WebSocket connection timed out".to_string()))?
            .map_err(|e| AvatarError::Network(format!("Failed to connect WebSocket: {}", e)))?;
        info!("Connected to avatar stream at {}", self.url);

        let (mut writer, mut reader) = socket.split();
        let mut keepalive = tokio::time::interval(self.keepalive);
        keepalive.tick().await;

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if let Err(e) = writer.send(Message::Text(PING_PAYLOAD.to_string())).await {
                        return Err(AvatarError::Network(format!("Keepalive failed: {}", e)));
                    }
                }
                frame = reader.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring {} byte binary frame", data.len());
                            continue;
                        }
                        Some(Ok(Message::Close(close))) => {
                            info!("Avatar stream closed by server: {:?}", close);
                            return Ok(StreamClosed::Remote);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            return Err(AvatarError::Network(format!("WebSocket receive error: {}", e)));
                        }
                        None => return Ok(StreamClosed::Remote),
                    };

                    if text.len() > MAX_MESSAGE_SIZE {
                        warn!("Dropping oversized stream message ({} bytes)", text.len());
                        continue;
                    }

                    match StreamMessage::from_json(&text) {
                        Ok(message) => {
                            if sink.send(message).await.is_err() {
                                let _ = writer.close().await;
                                return Ok(StreamClosed::Receiver);
                            }
                        }
                        Err(e) => warn!("Dropping unreadable stream message: {}", e),
                    }
                }
            }
        }
    }
}
