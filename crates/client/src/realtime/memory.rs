//! In-process realtime connector.
//!
//! Events published here reach every open subscription of the channel. Used
//! by tests and by embedders that relay events from another transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{ChannelEvent, EventStream, RealtimeConnector};
use crate::error::ClientError;

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast hub keyed by channel name.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ChannelEvent>>>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber of `channel`. Returns the number
    /// of subscribers reached.
    pub fn publish(&self, channel: &str, event: impl Into<String>, data: Value) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(channel).map_or(0, |sender| {
            sender
                .send(ChannelEvent {
                    event: event.into(),
                    data,
                })
                .unwrap_or(0)
        })
    }

    /// Drop every connection to `channel`, as a network failure would.
    pub fn disconnect(&self, channel: &str) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }

    /// Number of live subscriptions to `channel`.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl RealtimeConnector for MemoryConnector {
    async fn connect(&self, channel: &str) -> Result<EventStream, ClientError> {
        let receiver = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        Ok(BroadcastStream::new(receiver)
            .filter_map(|event| async move { event.ok().map(Ok) })
            .boxed())
    }
}
