//! Order chat.
//!
//! History comes from the backend and lands in `messages/{order}`; live
//! messages arrive over the order's realtime channel, which appends them to
//! the same cache entry. Sent messages are not written locally: the backend
//! echoes them on the channel.

use futures::stream::BoxStream;
use regusto_core::{ChatMessage, OrderId};
use tracing::{info, instrument};

use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

/// Sender tag of messages written by the customer.
pub const CUSTOMER_SENDER: &str = "user";

/// An open order chat: what was said so far plus everything said from now on.
pub struct ChatFeed {
    pub history: Vec<ChatMessage>,
    pub live: BoxStream<'static, ChatMessage>,
}

impl std::fmt::Debug for ChatFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatFeed")
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    /// Subscribe to `order`'s chat channel and load its history.
    ///
    /// The subscription is made first so nothing said during the history
    /// load is missed.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Channel` when realtime is not configured, or the
    /// history request error.
    #[instrument(skip(self))]
    pub async fn open_chat(&self, order: &OrderId) -> Result<ChatFeed, ClientError> {
        let channels = self.channels()?;
        channels.open(order);
        let live = channels
            .messages(order)
            .ok_or_else(|| ClientError::Channel(format!("chat {order} closed while opening")))?;

        let history = self.messages(order).await?;
        info!(order_id = %order, messages = history.len(), "Chat opened");
        Ok(ChatFeed { history, live })
    }

    /// Leave `order`'s chat. Returns whether a subscription existed.
    pub fn close_chat(&self, order: &OrderId) -> bool {
        self.channels().is_ok_and(|channels| channels.close(order))
    }

    /// Publish a customer message on `order`'s chat. Sent once; a failure is
    /// returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` for blank text, otherwise the request
    /// error.
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, order: &OrderId, text: &str) -> Result<(), ClientError> {
        let message = ChatMessage {
            sender: CUSTOMER_SENDER.to_string(),
            text: text.to_string(),
            order_id: order.clone(),
        };
        let mutation = Mutation::new("send_message", format!("chat:{order}")).precheck({
            let blank = text.trim().is_empty();
            move |_| {
                if blank {
                    return Err(ClientError::Validation("message is empty".to_string()));
                }
                Ok(())
            }
        });

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.publish_message(&message).await
            })
            .await
    }
}
