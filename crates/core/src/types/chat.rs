//! Order chat messages and the channel naming convention.

use serde::{Deserialize, Serialize};

use super::id::OrderId;

/// Event name carrying chat messages on an order channel.
pub const NEW_MESSAGE_EVENT: &str = "new-message";

/// Channel name for an order's chat: `chat-{orderId}`.
#[must_use]
pub fn chat_channel(order_id: &OrderId) -> String {
    format!("chat-{order_id}")
}

/// A chat message exchanged between a customer and a store about one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub order_id: OrderId,
}

/// Body of the backend's publish endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub channel: String,
    pub event: String,
    pub data: ChatMessage,
}

impl TriggerRequest {
    /// A `new-message` publish on the message's own order channel.
    #[must_use]
    pub fn new_message(data: ChatMessage) -> Self {
        Self {
            channel: chat_channel(&data.order_id),
            event: NEW_MESSAGE_EVENT.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_is_deterministic() {
        let id = OrderId::new("99");
        assert_eq!(chat_channel(&id), "chat-99");
        assert_eq!(chat_channel(&id), chat_channel(&id.clone()));
    }

    #[test]
    fn test_trigger_targets_order_channel() {
        let req = TriggerRequest::new_message(ChatMessage {
            sender: "user".into(),
            text: "hola".into(),
            order_id: OrderId::new("7"),
        });
        assert_eq!(req.channel, "chat-7");
        assert_eq!(req.event, "new-message");
    }
}
