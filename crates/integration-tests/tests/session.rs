//! Session recovery and forced logout.

#![allow(clippy::unwrap_used)]

use regusto_client::{ClientError, QueryKey};
use regusto_integration_tests::{MockBackend, store};

#[tokio::test]
async fn test_revoked_session_forces_logout() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.stores = vec![store("42", "Panadería Sol", false)]);
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();
    assert!(ctx.cache().get(&QueryKey::stores()).is_some());

    backend.with_state(|state| state.revoked = true);
    let err = ctx.orders().await.unwrap_err();

    assert_eq!(err, ClientError::Auth);
    assert!(!ctx.session().is_signed_in().await);
    assert!(ctx.cache().get(&QueryKey::stores()).is_none());
}

#[tokio::test]
async fn test_sign_out_forgets_everything() {
    let backend = MockBackend::start().await;
    backend.with_state(|state| state.stores = vec![store("42", "Panadería Sol", false)]);
    let ctx = backend.client().await;
    ctx.stores().await.unwrap();

    ctx.sign_out().await.unwrap();

    assert!(!ctx.session().is_signed_in().await);
    assert!(ctx.cache().get(&QueryKey::stores()).is_none());
    assert!(matches!(
        ctx.stores().await.unwrap_err(),
        ClientError::Session(_) | ClientError::Auth
    ));
}
