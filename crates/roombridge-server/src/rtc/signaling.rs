//! WebSocket signaling client

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use roombridge_protocol::{ClientMessage, ParticipantInfo, ServerMessage};

const PING_INTERVAL: Duration = Duration::from_secs(30);

enum Outgoing {
    Message(ClientMessage),
    Close,
}

/// Result of the join handshake
#[derive(Debug, Clone)]
pub struct Joined {
    pub room: String,
    pub participant: ParticipantInfo,
}

/// Sending half of a signaling connection
#[derive(Clone)]
pub struct SignalingClient {
    sender: mpsc::UnboundedSender<Outgoing>,
}

impl SignalingClient {
    /// Open the WebSocket, join with `token` and wait for the server to accept
    ///
    /// Messages received after the handshake are forwarded to the returned
    /// receiver, which closes when the connection ends.
    pub async fn connect(
        url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>, Joined)> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let join = ClientMessage::Join {
            token: token.to_string(),
        };
        write.send(Message::Text(join.to_json()?.into())).await?;

        let joined = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                    ServerMessage::Joined { room, participant } => {
                        break Joined { room, participant };
                    }
                    ServerMessage::Error { message } => {
                        anyhow::bail!("Join rejected: {}", message);
                    }
                    other => {
                        tracing::debug!("Ignoring message before join completed: {:?}", other);
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    anyhow::bail!("Connection closed during join");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                let msg = match outgoing {
                    Outgoing::Message(msg) => msg,
                    Outgoing::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };

                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize signaling message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::debug!("Signaling connection closed, dropping outgoing messages");
                    break;
                }
            }
        });

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Invalid signaling message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Signaling connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        let client = Self { sender: tx };

        let ping = client.sender.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if ping.send(Outgoing::Message(ClientMessage::Ping)).is_err() {
                    break;
                }
            }
        });

        Ok((client, incoming_rx, joined))
    }

    /// Queue a message; false once the connection is gone
    pub fn send(&self, msg: ClientMessage) -> bool {
        self.sender.send(Outgoing::Message(msg)).is_ok()
    }

    /// Close the WebSocket after queued messages are flushed
    pub fn close(&self) {
        let _ = self.sender.send(Outgoing::Close);
    }

    /// Client whose connection is already gone
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (sender, _) = mpsc::unbounded_channel();
        Self { sender }
    }
}
