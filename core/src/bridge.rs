//! Protocol client backed by a sidecar process
//!
//! The WhatsApp protocol runs in a separate bridge process. The bot talks to it
//! over TCP with one JSON document per line: requests carry a UUID that the
//! matching response echoes, and events are pushed unsolicited.
//!
//! ```text
//! -> {"id":"…","method":"send_text","params":{"jid":"…","text":"…","mentions":[]}}
//! <- {"kind":"response","id":"…","result":null}
//! <- {"kind":"event","event":{"type":"close","code":428,"reason":"…"}}
//! ```

use crate::protocol::{
    ClientEvent, EventStream, GroupMetadata, MessageKey, ParticipantAction, Presence, ProtocolClient,
};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events buffered between the socket reader and the connection manager
const EVENT_BUFFER: usize = 256;

type Pending = Arc<DashMap<Uuid, oneshot::Sender<Result<Value>>>>;

#[derive(Debug, Serialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum Request<'a> {
    OwnId,
    SendText {
        jid: &'a str,
        text: &'a str,
        mentions: &'a [String],
    },
    DeleteMessage {
        key: &'a MessageKey,
    },
    SendPresence {
        presence: Presence,
        jid: Option<&'a str>,
    },
    GroupMetadata {
        group_id: &'a str,
    },
    UpdateParticipants {
        group_id: &'a str,
        users: &'a [String],
        action: ParticipantAction,
    },
    GroupInviteCode {
        group_id: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: Uuid,
    #[serde(flatten)]
    request: Request<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Inbound {
    Response {
        id: Uuid,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: ClientEvent,
    },
}

/// One live socket to the bridge
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    token: CancellationToken,
}

/// Line-delimited JSON client for the protocol bridge
pub struct BridgeClient {
    address: String,
    request_timeout: Duration,
    link: Mutex<Option<Link>>,
}

impl BridgeClient {
    pub fn new(address: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            request_timeout,
            link: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Tear down the current socket, if any
    pub fn disconnect(&self) {
        if let Some(link) = self.link.lock().take() {
            link.token.cancel();
        }
    }

    async fn request(&self, request: Request<'_>) -> Result<Value> {
        let id = Uuid::new_v4();
        let line = serde_json::to_string(&Envelope { id, request })?;

        let (tx, rx) = oneshot::channel();
        let pending = {
            let link = self.link.lock();
            let link = link
                .as_ref()
                .ok_or_else(|| Error::Protocol("bridge not connected".to_string()))?;
            link.pending.insert(id, tx);
            if link.outbound.send(line).is_err() {
                link.pending.remove(&id);
                return Err(Error::Protocol("bridge connection closed".to_string()));
            }
            Arc::clone(&link.pending)
        };

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Protocol("bridge connection closed".to_string())),
            Err(_) => {
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "bridge request exceeded {}ms",
                    self.request_timeout.as_millis()
                )))
            }
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: Request<'_>) -> Result<T> {
        let value = self.request(request).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn connect(&self) -> Result<EventStream> {
        self.disconnect();

        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| Error::Protocol(format!("Failed to connect to bridge {}: {}", self.address, e)))?;
        let (read_half, mut write_half) = stream.into_split();

        let token = CancellationToken::new();
        let pending: Pending = Arc::new(DashMap::new());
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        // Writer
        let writer_token = token.clone();
        tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    _ = writer_token.cancelled() => break,
                    line = outbound_rx.recv() => match line {
                        Some(line) => line,
                        None => break,
                    },
                };
                if let Err(e) = write_half.write_all(format!("{}\n", line).as_bytes()).await {
                    error!("Failed to write to bridge: {}", e);
                    break;
                }
            }
        });

        // Reader
        let reader_token = token.clone();
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            let reason = loop {
                line.clear();
                let read = tokio::select! {
                    _ = reader_token.cancelled() => return,
                    read = reader.read_line(&mut line) => read,
                };
                match read {
                    Ok(0) => break "bridge closed the connection".to_string(),
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Inbound>(trimmed) {
                            Ok(Inbound::Response { id, result, error }) => {
                                if let Some((_, waiter)) = reader_pending.remove(&id) {
                                    let outcome = match error {
                                        Some(message) => Err(Error::Protocol(message)),
                                        None => Ok(result),
                                    };
                                    let _ = waiter.send(outcome);
                                } else {
                                    debug!("Response for unknown request {}", id);
                                }
                            }
                            Ok(Inbound::Event { event }) => {
                                if event_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("Malformed bridge line: {}", e),
                        }
                    }
                    Err(e) => break format!("bridge read failed: {}", e),
                }
            };

            // Waiters see their sender dropped
            reader_pending.clear();
            let _ = event_tx.send(ClientEvent::Close { code: None, reason }).await;
        });

        info!("Connected to protocol bridge at {}", self.address);
        *self.link.lock() = Some(Link {
            outbound: outbound_tx,
            pending,
            token,
        });
        Ok(event_rx)
    }

    async fn own_id(&self) -> Option<String> {
        match self.call::<Option<String>>(Request::OwnId).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to query own ID: {}", e);
                None
            }
        }
    }

    async fn send_text(&self, jid: &str, text: &str, mentions: &[String]) -> Result<()> {
        self.request(Request::SendText { jid, text, mentions }).await?;
        Ok(())
    }

    async fn delete_message(&self, key: &MessageKey) -> Result<()> {
        self.request(Request::DeleteMessage { key }).await?;
        Ok(())
    }

    async fn send_presence(&self, presence: Presence, jid: Option<&str>) -> Result<()> {
        self.request(Request::SendPresence { presence, jid }).await?;
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        self.call(Request::GroupMetadata { group_id }).await
    }

    async fn update_participants(
        &self,
        group_id: &str,
        users: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        self.request(Request::UpdateParticipants { group_id, users, action })
            .await?;
        Ok(())
    }

    async fn group_invite_code(&self, group_id: &str) -> Result<String> {
        self.call(Request::GroupInviteCode { group_id }).await
    }
}
