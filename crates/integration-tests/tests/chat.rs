//! Order chat over the realtime hub.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures::StreamExt;
use regusto_client::{ChannelStatus, ClientContext, ClientError, QueryKey};
use regusto_core::{ChatMessage, OrderId};
use regusto_integration_tests::MockBackend;
use serde_json::json;

async fn wait_live(ctx: &ClientContext, order: &OrderId) {
    let mut status = ctx.channels().unwrap().status(order).unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ChannelStatus::Live),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_messages_reach_only_their_order() {
    let backend = MockBackend::start().await;
    let ctx = backend.client().await;
    let order_99 = OrderId::new("99");
    let order_100 = OrderId::new("100");

    let mut feed_99 = ctx.open_chat(&order_99).await.unwrap();
    let mut feed_100 = ctx.open_chat(&order_100).await.unwrap();
    wait_live(&ctx, &order_99).await;
    wait_live(&ctx, &order_100).await;

    ctx.send_message(&order_99, "hola").await.unwrap();
    ctx.send_message(&order_99, "¿cuánto falta?").await.unwrap();

    let received: Vec<String> = tokio::time::timeout(
        Duration::from_secs(5),
        feed_99.live.by_ref().take(2).map(|m| m.text).collect::<Vec<_>>(),
    )
    .await
    .unwrap();
    assert_eq!(received, ["hola", "¿cuánto falta?"]);

    let cached: Vec<ChatMessage> = ctx.cache().get_data(&QueryKey::messages(&order_99)).unwrap();
    assert_eq!(cached.len(), 2);

    assert!(ctx.close_chat(&order_99));
    let after_close = tokio::time::timeout(Duration::from_secs(5), feed_99.live.next())
        .await
        .unwrap();
    assert!(after_close.is_none());

    // Nothing leaked onto the other order's channel.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), feed_100.live.next())
            .await
            .is_err()
    );
    let cached: Vec<ChatMessage> = ctx.cache().get_data(&QueryKey::messages(&order_100)).unwrap();
    assert!(cached.is_empty());
}

#[tokio::test]
async fn test_history_loaded_on_open() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| {
        state.messages.insert(
            "chat-99".to_string(),
            vec![json!({ "sender": "store", "text": "ya sale", "order_id": 99 })],
        );
    });
    let ctx = backend.client().await;

    let feed = ctx.open_chat(&OrderId::new("99")).await.unwrap();

    assert_eq!(feed.history.len(), 1);
    assert_eq!(feed.history.first().unwrap().text, "ya sale");
    assert_eq!(feed.history.first().unwrap().order_id, OrderId::new("99"));
}

#[tokio::test]
async fn test_blank_message_is_not_sent() {
    let backend = MockBackend::start().await;
    let ctx = backend.client().await;

    let err = ctx.send_message(&OrderId::new("99"), "   ").await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(backend.with_state(|state| state.messages.is_empty()));
}
