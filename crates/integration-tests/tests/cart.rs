//! Cart edits against the mock backend.

#![allow(clippy::unwrap_used)]

use regusto_client::{ClientError, QueryKey};
use regusto_core::{Cart, CartItem, CartLineRef, Price, ProductInstanceId};
use regusto_integration_tests::{MockBackend, cart_line};

fn medialunas(quantity: u32) -> CartItem {
    CartItem::for_instance(
        ProductInstanceId::new("pi-7"),
        "Medialunas",
        Price::from_cents(350),
        quantity,
    )
}

fn pi_7() -> CartLineRef {
    CartLineRef::Instance(ProductInstanceId::new("pi-7"))
}

#[tokio::test]
async fn test_same_instance_merges_into_one_line() {
    let backend = MockBackend::start().await;
    let ctx = backend.client().await;

    assert_eq!(ctx.add_to_cart(medialunas(2), 10).await.unwrap(), 2);
    assert_eq!(ctx.add_to_cart(medialunas(1), 10).await.unwrap(), 3);

    let cart = ctx.cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.get(&pi_7()).unwrap().quantity, 3);
    assert_eq!(ctx.cart_item_count().await.unwrap(), 3);

    let patches = backend.with_state(|state| state.cart_patches.clone());
    assert_eq!(patches.len(), 2);
    let last = patches.last().unwrap()["products"].as_array().unwrap().clone();
    assert_eq!(last.len(), 1);
    assert_eq!(last.first().unwrap()["quantity"], 3);
}

#[tokio::test]
async fn test_stock_check_sends_nothing() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.cart = vec![cart_line("pi-7", "Medialunas", 3.5, 4)]);
    let ctx = backend.client().await;

    let err = ctx.add_to_cart(medialunas(2), 5).await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(backend.with_state(|state| state.cart_patches.is_empty()));
    let cached: Cart = ctx.cache().get_data(&QueryKey::cart_items()).unwrap();
    assert_eq!(cached.get(&pi_7()).unwrap().quantity, 4);
}

#[tokio::test]
async fn test_quantity_to_zero_removes_line() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| {
        state.cart = vec![
            cart_line("pi-7", "Medialunas", 3.5, 1),
            cart_line("pi-8", "Pan de campo", 5.0, 2),
        ];
    });
    let ctx = backend.client().await;

    assert_eq!(ctx.change_cart_quantity(&pi_7(), -1).await.unwrap(), 0);

    let cart = ctx.cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert!(cart.get(&pi_7()).is_none());
    assert_eq!(ctx.cart_item_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_line_is_rejected() {
    let backend = MockBackend::start().await;
    let ctx = backend.client().await;

    let err = ctx.change_cart_quantity(&pi_7(), 1).await.unwrap_err();

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(backend.with_state(|state| state.cart_patches.is_empty()));
}
