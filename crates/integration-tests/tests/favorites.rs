//! Optimistic favorite toggles against the mock backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use regusto_client::{ClientContext, ClientError, FavoriteTarget, QueryKey};
use regusto_core::{FavoriteStore, Store, StoreId};
use regusto_integration_tests::{MockBackend, eventually, store};
use serde_json::json;
use tokio::sync::Notify;

fn cached_flag(ctx: &ClientContext, id: &str) -> Option<bool> {
    ctx.cache()
        .get_data::<Vec<Store>>(&QueryKey::stores())?
        .into_iter()
        .find(|s| s.id.as_str() == id)
        .map(|s| s.is_favorite)
}

#[tokio::test]
async fn test_favorite_reverts_after_server_error() {
    let backend = MockBackend::start().await;
    let gate = Arc::new(Notify::new());
    backend.with_state(|state| {
        state.stores = vec![store("42", "Panadería Sol", false), store("41", "Verdulería", true)];
        state.favorite_failure = Some(500);
        state.favorite_gate = Some(gate.clone());
    });
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();

    let task = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.toggle_store_favorite(&StoreId::new("42")).await }
    });

    // The heart flips before the server answers.
    eventually(|| cached_flag(&ctx, "42") == Some(true)).await;
    gate.notify_one();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Remote { status: 500, .. }));
    assert_eq!(cached_flag(&ctx, "42"), Some(false));
    assert_eq!(cached_flag(&ctx, "41"), Some(true));
    // Mutations are never retried.
    assert_eq!(backend.with_state(|state| state.favorite_calls), 1);
}

#[tokio::test]
async fn test_favorite_success_refreshes_favorites() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.stores = vec![store("42", "Panadería Sol", false)]);
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();
    assert!(ctx.favorite_stores().await.unwrap().is_empty());

    let favorite = ctx.toggle_store_favorite(&StoreId::new("42")).await.unwrap();

    assert!(favorite);
    assert_eq!(cached_flag(&ctx, "42"), Some(true));
    assert_eq!(
        ctx.favorite_stores().await.unwrap(),
        vec![FavoriteStore {
            commerce_id: StoreId::new("42")
        }]
    );
}

#[tokio::test]
async fn test_remove_favorite_from_favorites_screen() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| {
        state.stores = vec![store("42", "Panadería Sol", true)];
        state.favorites = vec![json!({ "commerce_id": 42 })];
    });
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();
    assert_eq!(ctx.favorite_stores().await.unwrap().len(), 1);

    ctx.remove_favorite(&FavoriteTarget::Store(StoreId::new("42")))
        .await
        .unwrap();

    let cached: Vec<FavoriteStore> = ctx.cache().get_data(&QueryKey::favorites()).unwrap();
    assert!(cached.is_empty());
    assert_eq!(cached_flag(&ctx, "42"), Some(false));
    assert!(backend.with_state(|state| state.favorites.is_empty()));
}

#[tokio::test]
async fn test_toggle_known_only_from_favorites_list_removes_it() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.favorites = vec![json!({ "commerce_id": "42" })]);
    let ctx = backend.client().await;
    assert_eq!(ctx.favorite_stores().await.unwrap().len(), 1);

    let favorite = ctx.toggle_store_favorite(&StoreId::new("42")).await.unwrap();

    assert!(!favorite);
    assert_eq!(
        backend.with_state(|state| state.favorite_requests.clone()),
        [("42".to_string(), false)]
    );
    assert!(ctx.favorite_stores().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_toggle_updates_favorites_list_before_server_answers() {
    let backend = MockBackend::start().await;
    let gate = Arc::new(Notify::new());
    backend.with_state(|state| {
        state.stores = vec![store("42", "Panadería Sol", false)];
        state.favorite_gate = Some(gate.clone());
    });
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();
    ctx.favorite_stores().await.unwrap();

    let task = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.toggle_store_favorite(&StoreId::new("42")).await }
    });

    eventually(|| {
        ctx.cache()
            .get_data::<Vec<FavoriteStore>>(&QueryKey::favorites())
            .is_some_and(|favorites| favorites.len() == 1)
    })
    .await;
    assert_eq!(cached_flag(&ctx, "42"), Some(true));
    gate.notify_one();

    assert!(task.await.unwrap().unwrap());
    assert_eq!(
        backend.with_state(|state| state.favorite_requests.clone()),
        [("42".to_string(), true)]
    );
}
