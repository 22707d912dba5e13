//! Pusher-protocol websocket connector.
//!
//! Speaks just enough of protocol 7 for a public channel: wait for
//! `pusher:connection_established`, send `pusher:subscribe`, answer
//! `pusher:ping`, and surface every other event on the channel.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use super::{ChannelEvent, EventStream, RealtimeConnector};
use crate::config::PusherConfig;
use crate::error::ClientError;

const PROTOCOL_VERSION: u8 = 7;
const CLIENT_NAME: &str = "regusto-rs";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a Pusher cluster over a websocket.
#[derive(Debug, Clone)]
pub struct PusherConnector {
    url: String,
    connect_timeout: Duration,
}

impl PusherConnector {
    /// Connector for the hosted service of `config.cluster`.
    #[must_use]
    pub fn new(config: &PusherConfig, connect_timeout: Duration) -> Self {
        Self::with_url(
            format!(
                "wss://ws-{}.pusher.com/app/{}?protocol={PROTOCOL_VERSION}&client={CLIENT_NAME}&version={}",
                config.cluster,
                config.key,
                env!("CARGO_PKG_VERSION"),
            ),
            connect_timeout,
        )
    }

    /// Connector for a self-hosted Pusher-compatible server.
    #[must_use]
    pub fn with_url(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    async fn handshake(&self, channel: &str) -> Result<Socket, ClientError> {
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Channel(format!("connect failed: {e}")))?;

        loop {
            let Some(message) = socket.next().await else {
                return Err(ClientError::Channel("closed during handshake".into()));
            };
            let message = message.map_err(|e| ClientError::Channel(e.to_string()))?;
            let Message::Text(text) = message else {
                continue;
            };
            match decode_frame(&text, channel)? {
                Frame::Established => break,
                Frame::Error(message) => return Err(ClientError::Channel(message)),
                frame => debug!(?frame, "Ignoring frame before connection established"),
            }
        }

        let subscribe = json!({
            "event": "pusher:subscribe",
            "data": { "channel": channel },
        });
        socket
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| ClientError::Channel(format!("subscribe failed: {e}")))?;
        Ok(socket)
    }
}

#[async_trait]
impl RealtimeConnector for PusherConnector {
    #[instrument(skip(self))]
    async fn connect(&self, channel: &str) -> Result<EventStream, ClientError> {
        let socket = timeout(self.connect_timeout, self.handshake(channel))
            .await
            .map_err(|_| ClientError::Timeout(self.connect_timeout))??;
        info!("Subscribed to realtime channel");

        let channel = channel.to_string();
        let events = stream::unfold(Some(socket), move |socket| {
            let channel = channel.clone();
            async move {
                let mut socket = socket?;
                loop {
                    let message = match socket.next().await {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            return Some((Err(ClientError::Channel(e.to_string())), None));
                        }
                        None => return None,
                    };

                    match message {
                        Message::Text(text) => match decode_frame(&text, &channel) {
                            Ok(Frame::Event(event)) => return Some((Ok(event), Some(socket))),
                            Ok(Frame::Ping) => {
                                let pong = json!({ "event": "pusher:pong", "data": {} });
                                if let Err(e) = socket.send(Message::Text(pong.to_string())).await {
                                    return Some((Err(ClientError::Channel(e.to_string())), None));
                                }
                            }
                            Ok(Frame::Error(message)) => {
                                return Some((Err(ClientError::Channel(message)), None));
                            }
                            Ok(frame) => debug!(?frame, "Ignoring control frame"),
                            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                        },
                        Message::Ping(data) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                return Some((Err(ClientError::Channel(e.to_string())), None));
                            }
                        }
                        Message::Close(_) => return None,
                        Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
            }
        });

        Ok(events.boxed())
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Established,
    Subscribed,
    Ping,
    Error(String),
    Event(ChannelEvent),
    /// An event for some other channel.
    Foreign,
}

fn decode_frame(text: &str, channel: &str) -> Result<Frame, ClientError> {
    let raw: RawFrame = serde_json::from_str(text)?;
    // Event payloads arrive as JSON encoded inside a string.
    let data = match raw.data {
        Value::String(encoded) => serde_json::from_str(&encoded).unwrap_or(Value::String(encoded)),
        other => other,
    };

    Ok(match raw.event.as_str() {
        "pusher:connection_established" => Frame::Established,
        "pusher_internal:subscription_succeeded" => Frame::Subscribed,
        "pusher:ping" => Frame::Ping,
        "pusher:error" => Frame::Error(
            data.get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown realtime error")
                .to_string(),
        ),
        _ if raw.channel.as_deref().is_some_and(|c| c != channel) => Frame::Foreign,
        _ => Frame::Event(ChannelEvent {
            event: raw.event,
            data,
        }),
    })
}
