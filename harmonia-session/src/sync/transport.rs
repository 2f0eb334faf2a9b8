//! Wire contract and production transport for the session store channel
//!
//! Frames are JSON, tagged by event name so the store and every client
//! agree on one envelope shape: `{"event": "...", "data": ...}`.
//!
//! The production transport is an SSE-style stream: one long-lived GET
//! whose body carries server frames as `data:` blocks, and a POST per
//! outbound client frame. Both directions are bearer-token authenticated.

use futures::future::BoxFuture;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use harmonia_common::model::RemoteSessionSnapshot;

use crate::error::Result;

/// Server-to-client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ChannelEvent {
    /// Stored session snapshot, sent at most once per connection; null when
    /// the store holds nothing for this user
    #[serde(rename = "session:hydrate")]
    Hydrate(Option<RemoteSessionSnapshot>),
    /// Store-side failure report; informational only
    #[serde(rename = "session:error")]
    SessionError { reason: String },
    /// Full online roster, answering a roster request
    #[serde(rename = "presence:roster-response")]
    RosterResponse { user_ids: Vec<String> },
    #[serde(rename = "presence:online")]
    Online { user_id: String },
    #[serde(rename = "presence:offline")]
    Offline { user_id: String },
}

/// Client-to-server frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "session:push")]
    Push(RemoteSessionSnapshot),
    #[serde(rename = "presence:roster-request")]
    RosterRequest,
}

/// A live bidirectional connection to the session store.
///
/// The connection is considered lost when `incoming` yields `None`; the
/// sync channel then drops both halves and reconnects.
pub struct TransportConnection {
    pub incoming: mpsc::Receiver<ChannelEvent>,
    pub outgoing: mpsc::Sender<ClientFrame>,
}

/// Connection factory for the session store channel.
///
/// `connect` takes the bearer token for this attempt; the returned future
/// resolves once the inbound stream is established.
pub trait SessionTransport: Send + Sync {
    fn connect(&self, token: String) -> BoxFuture<'static, Result<TransportConnection>>;
}

/// Production transport: streamed GET for inbound frames, POST per
/// outbound frame.
pub struct SseTransport {
    http: reqwest::Client,
    stream_url: String,
    push_url: String,
}

impl SseTransport {
    pub fn new(store_url: &str) -> Self {
        let base = store_url.trim_end_matches('/');
        Self {
            http: reqwest::Client::new(),
            stream_url: format!("{}/session/stream", base),
            push_url: format!("{}/session/frames", base),
        }
    }
}

impl SessionTransport for SseTransport {
    fn connect(&self, token: String) -> BoxFuture<'static, Result<TransportConnection>> {
        let http = self.http.clone();
        let stream_url = self.stream_url.clone();
        let push_url = self.push_url.clone();

        Box::pin(async move {
            let response = http
                .get(&stream_url)
                .bearer_auth(&token)
                .header("Accept", "text/event-stream")
                .send()
                .await?
                .error_for_status()?;

            let (incoming_tx, incoming) = mpsc::channel::<ChannelEvent>(32);
            let (outgoing, mut outgoing_rx) = mpsc::channel::<ClientFrame>(32);

            // Inbound: decode SSE blocks off the response body until the
            // stream ends or the receiver is dropped.
            tokio::spawn(async move {
                let mut body = response.bytes_stream();
                let mut buffer = String::new();
                while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            debug!("Session stream read error: {}", e);
                            break;
                        }
                    };
                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(split) = buffer.find("\n\n") {
                        let block = buffer[..split].to_string();
                        buffer.drain(..split + 2);
                        let Some(event) = parse_sse_block(&block) else {
                            continue;
                        };
                        if incoming_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                debug!("Session stream closed");
            });

            // Outbound: one POST per frame; a failed POST drops the frame,
            // it is not retried.
            tokio::spawn(async move {
                while let Some(frame) = outgoing_rx.recv().await {
                    let result = http
                        .post(&push_url)
                        .bearer_auth(&token)
                        .json(&frame)
                        .send()
                        .await
                        .and_then(|r| r.error_for_status());
                    if let Err(e) = result {
                        warn!("Outbound session frame failed: {}", e);
                    }
                }
            });

            Ok(TransportConnection { incoming, outgoing })
        })
    }
}

/// Decode one SSE block (the lines between two blank lines) into a frame.
///
/// Comment lines and unknown fields are ignored; multiple `data:` lines are
/// joined per the SSE format. Malformed payloads are logged and dropped.
fn parse_sse_block(block: &str) -> Option<ChannelEvent> {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| {
            line.strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect();
    if data.is_empty() {
        return None;
    }
    let payload = data.join("\n");
    match serde_json::from_str::<ChannelEvent>(&payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Dropping malformed session frame: {}", e);
            None
        }
    }
}
