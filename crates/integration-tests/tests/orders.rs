//! Order placement and payment against the mock backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use regusto_client::{ClientError, PaymentReturn, QueryKey};
use regusto_core::{Cart, OrderId};
use regusto_integration_tests::{MockBackend, cart_line, eventually};
use tokio::sync::Notify;

#[tokio::test]
async fn test_place_order_posts_once_without_clearing_cart() {
    let backend = MockBackend::start().await;
    let gate = Arc::new(Notify::new());
    backend.with_state(|state| {
        state.cart = vec![cart_line("pi-7", "Medialunas", 3.5, 3)];
        state.order_gate = Some(gate.clone());
    });
    let ctx = backend.client().await;
    ctx.cart().await.unwrap();

    let task = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.place_order().await }
    });

    // While the order is in flight the cart is shown as it was.
    eventually(|| backend.with_state(|state| state.order_attempts) == 1).await;
    let cached: Cart = ctx.cache().get_data(&QueryKey::cart_items()).unwrap();
    assert_eq!(cached.len(), 1);
    gate.notify_one();

    let order_id = task.await.unwrap().unwrap();
    assert_eq!(order_id, OrderId::new("1001"));

    let posts = backend.with_state(|state| state.order_posts.clone());
    assert_eq!(posts.len(), 1);
    let lines = posts.first().unwrap()["products"].as_array().unwrap().clone();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines.first().unwrap()["quantity"], 3);

    // Confirmed: cart and orders are refetched on next read.
    assert!(!ctx.cache().is_fresh(&QueryKey::cart_items()));
    let orders = ctx.orders().await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn test_failed_order_is_not_retried() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| {
        state.cart = vec![cart_line("pi-7", "Medialunas", 3.5, 3)];
        state.order_failure = Some(500);
    });
    let ctx = backend.client().await;
    ctx.cart().await.unwrap();

    let err = ctx.place_order().await.unwrap_err();

    assert!(matches!(err, ClientError::Remote { status: 500, .. }));
    assert_eq!(backend.with_state(|state| state.order_posts.len()), 1);
    assert!(ctx.cache().is_fresh(&QueryKey::cart_items()));
    assert_eq!(ctx.cart().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_cart_is_rejected_locally() {
    let backend = MockBackend::start().await;
    let ctx = backend.client().await;

    let err = ctx.place_order().await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(backend.with_state(|state| state.order_attempts), 0);
}

#[tokio::test]
async fn test_checkout_then_payment_return_clears_cart() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.cart = vec![cart_line("pi-7", "Medialunas", 3.5, 2)]);
    let ctx = backend.client().await;

    let checkout = ctx.checkout().await.unwrap();
    assert_eq!(checkout.order_id, OrderId::new("1001"));
    assert_eq!(checkout.init_point, "https://pay.example/checkout/1001");

    let preference = backend.with_state(|state| state.preferences.first().cloned().unwrap());
    assert_eq!(preference["auto_return"], "approved");
    assert_eq!(preference["items"].as_array().unwrap().len(), 1);
    let return_url = preference["return_url"].as_str().unwrap().to_string();
    assert_eq!(return_url, "regusto://payment-success?orderId=1001");

    // The cart survives until payment is confirmed.
    assert_eq!(ctx.cart().await.unwrap().len(), 1);

    let PaymentReturn { order_id } = PaymentReturn::from_deep_link(&return_url).unwrap();
    ctx.complete_payment(&order_id).await.unwrap();

    assert!(ctx.cart().await.unwrap().is_empty());
    assert_eq!(ctx.cart_item_count().await.unwrap(), 0);
}
