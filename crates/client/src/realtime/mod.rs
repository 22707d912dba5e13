//! Realtime channel adapter.
//!
//! Keeps one live subscription per open order screen on the channel
//! `chat-{orderId}` and feeds its events into the query cache:
//!
//! - `new-message` appends to `messages/{order}` in arrival order and is
//!   re-published on the per-order message stream.
//! - `order-status` advances the cached order's status.
//!
//! Connections are restartable: a dropped connection is re-established with
//! capped exponential backoff. After the configured number of consecutive
//! failed attempts the channel is marked [`ChannelStatus::Failed`] and its
//! message stream ends.

mod backoff;
mod memory;
mod pusher;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use regusto_core::{ChatMessage, NEW_MESSAGE_EVENT, Order, OrderId, OrderStatus, chat_channel};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::config::ReconnectConfig;
use crate::error::ClientError;

pub use backoff::reconnect_delay;
pub use memory::MemoryConnector;
pub use pusher::PusherConnector;

/// Event name carrying order status pushes.
pub const ORDER_STATUS_EVENT: &str = "order-status";

const MESSAGE_BUFFER: usize = 64;

/// One event received on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub event: String,
    pub data: Value,
}

/// Events of one connection. Ends when the connection drops.
pub type EventStream = BoxStream<'static, Result<ChannelEvent, ClientError>>;

/// Opens connections to a realtime provider.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Connect and subscribe to `channel`.
    async fn connect(&self, channel: &str) -> Result<EventStream, ClientError>;
}

/// Connection state of one order channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Connecting,
    Live,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Closed by its owner.
    Closed,
    /// Reconnect attempts exhausted.
    Failed,
}

struct OpenChannel {
    task: JoinHandle<()>,
    messages: broadcast::Receiver<ChatMessage>,
    status: Arc<watch::Sender<ChannelStatus>>,
}

impl OpenChannel {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

// =============================================================================
// ChannelAdapter
// =============================================================================

/// Manages per-order realtime subscriptions. Cheap to clone.
#[derive(Clone)]
pub struct ChannelAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    connector: Arc<dyn RealtimeConnector>,
    cache: QueryCache,
    reconnect: ReconnectConfig,
    channels: Mutex<HashMap<OrderId, OpenChannel>>,
}

impl Drop for AdapterInner {
    fn drop(&mut self) {
        let channels = self
            .channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, channel) in channels.drain() {
            channel.task.abort();
        }
    }
}

impl ChannelAdapter {
    #[must_use]
    pub fn new(
        connector: Arc<dyn RealtimeConnector>,
        cache: QueryCache,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                connector,
                cache,
                reconnect,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<OrderId, OpenChannel>> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the chat channel of `order`. Does nothing if a live
    /// subscription already exists; a failed one is replaced.
    pub fn open(&self, order: &OrderId) {
        let mut channels = self.channels();
        if channels.get(order).is_some_and(OpenChannel::is_running) {
            debug!(order_id = %order, "Channel already open");
            return;
        }

        let (messages, template) = broadcast::channel(MESSAGE_BUFFER);
        let status = Arc::new(watch::channel(ChannelStatus::Connecting).0);
        let worker = ChannelWorker {
            connector: self.inner.connector.clone(),
            cache: self.inner.cache.clone(),
            reconnect: self.inner.reconnect,
            order: order.clone(),
            channel: chat_channel(order),
            messages,
            status: status.clone(),
        };
        let span = info_span!("channel", order_id = %order, channel = %worker.channel);
        let task = tokio::spawn(worker.run().instrument(span));

        channels.insert(
            order.clone(),
            OpenChannel {
                task,
                messages: template,
                status,
            },
        );
    }

    /// Tear down the subscription of `order`. Returns whether one existed.
    pub fn close(&self, order: &OrderId) -> bool {
        let Some(channel) = self.channels().remove(order) else {
            return false;
        };
        channel.task.abort();
        channel.status.send_replace(ChannelStatus::Closed);
        info!(order_id = %order, "Channel closed");
        true
    }

    /// Close every subscription, e.g. on sign-out.
    pub fn close_all(&self) {
        let orders: Vec<OrderId> = self.channels().keys().cloned().collect();
        for order in &orders {
            self.close(order);
        }
    }

    #[must_use]
    pub fn is_open(&self, order: &OrderId) -> bool {
        self.channels().get(order).is_some_and(OpenChannel::is_running)
    }

    /// Messages received on `order`'s channel from now on. Ends when the
    /// channel closes or fails.
    #[must_use]
    pub fn messages(&self, order: &OrderId) -> Option<BoxStream<'static, ChatMessage>> {
        let receiver = self.channels().get(order)?.messages.resubscribe();
        Some(
            BroadcastStream::new(receiver)
                .filter_map(|message| async move { message.ok() })
                .boxed(),
        )
    }

    /// Watch the connection state of `order`'s channel.
    #[must_use]
    pub fn status(&self, order: &OrderId) -> Option<watch::Receiver<ChannelStatus>> {
        self.channels().get(order).map(|c| c.status.subscribe())
    }
}

// =============================================================================
// ChannelWorker
// =============================================================================

/// Background task owning one order's connection.
struct ChannelWorker {
    connector: Arc<dyn RealtimeConnector>,
    cache: QueryCache,
    reconnect: ReconnectConfig,
    order: OrderId,
    channel: String,
    messages: broadcast::Sender<ChatMessage>,
    status: Arc<watch::Sender<ChannelStatus>>,
}

#[derive(Debug, Deserialize)]
struct StatusPush {
    status: OrderStatus,
}

impl ChannelWorker {
    async fn run(self) {
        // Consecutive failed attempts; reset once an event gets through.
        let mut attempt = 0;
        loop {
            match self.connector.connect(&self.channel).await {
                Ok(mut events) => {
                    self.status.send_replace(ChannelStatus::Live);
                    info!("Channel live");
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => {
                                attempt = 0;
                                self.handle(event);
                            }
                            Err(e) => {
                                warn!(error = %e, "Channel connection error");
                                break;
                            }
                        }
                    }
                    warn!("Channel connection dropped");
                }
                Err(e) => warn!(error = %e, attempt, "Channel connect failed"),
            }

            if attempt >= self.reconnect.max_attempts {
                error!(attempts = attempt, "Channel reconnect attempts exhausted");
                self.status.send_replace(ChannelStatus::Failed);
                return;
            }
            let delay = reconnect_delay(&self.reconnect, attempt);
            attempt += 1;
            self.status
                .send_replace(ChannelStatus::Reconnecting { attempt });
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting channel"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn handle(&self, event: ChannelEvent) {
        match event.event.as_str() {
            NEW_MESSAGE_EVENT => self.handle_message(event.data),
            ORDER_STATUS_EVENT => self.handle_status(event.data),
            other => debug!(event = other, "Ignoring channel event"),
        }
    }

    fn handle_message(&self, data: Value) {
        let message: ChatMessage = match serde_json::from_value(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed chat message");
                return;
            }
        };
        if message.order_id != self.order {
            warn!(message_order = %message.order_id, "Dropping message for another order");
            return;
        }

        match serde_json::to_value(&message) {
            Ok(value) => {
                self.cache.append(&QueryKey::messages(&self.order), value);
            }
            Err(e) => warn!(error = %e, "Cannot cache chat message"),
        }
        // No receivers is fine: the cache already holds the message.
        let _ = self.messages.send(message);
    }

    fn handle_status(&self, data: Value) {
        let push: StatusPush = match serde_json::from_value(data) {
            Ok(push) => push,
            Err(e) => {
                warn!(error = %e, "Dropping malformed status push");
                return;
            }
        };

        let key = QueryKey::order(&self.order);
        match self
            .cache
            .update::<Order, _>(&key, |order| Ok(order.status.advance(push.status)?))
        {
            Ok(true) => info!(status = %push.status, "Order status pushed"),
            Ok(false) => debug!(status = %push.status, "Status push for uncached order"),
            Err(e) => warn!(status = %push.status, error = %e, "Ignoring status push"),
        }
        self.cache.invalidate(QueryKey::orders());
    }
}
