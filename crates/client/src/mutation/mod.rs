//! Optimistic mutation engine.
//!
//! Every user action that changes server state runs as a [`Mutation`]:
//!
//! 1. Wait for earlier mutations on the same entity, or touching the same
//!    cache keys, to settle.
//! 2. Run the client-side pre-check; a failure sends nothing and writes
//!    nothing.
//! 3. Snapshot every touched cache entry and apply the optimistic writes.
//! 4. Send the request once. Mutations are never retried.
//! 5. On success, apply the success writes and invalidate the touched and
//!    declared keys. On failure, restore the snapshot verbatim.
//!
//! Touched keys are pinned for the whole pending window, so a background load
//! cannot overwrite optimistic state or the baseline a rollback returns to.
//! Dropping a pending mutation (its screen unmounted) restores the snapshot
//! and invalidates the touched keys, since the request may have landed.
//!
//! A cache cleared while the mutation is pending (sign-out, forced logout)
//! stays cleared: neither rollback nor success writes touch it.

mod lock;

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::cache::{CacheSnapshot, KeyMatch, QueryCache, QueryKey};
use crate::error::ClientError;

use lock::EntityLocks;

type CacheWrite = Box<dyn FnOnce(&QueryCache) -> Result<(), ClientError> + Send>;
type SuccessHook<R> = Box<dyn FnOnce(&QueryCache, &R) -> Result<(), ClientError> + Send>;

/// Lifecycle of one mutation instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Succeeded,
    Failed(ClientError),
}

impl MutationStatus {
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// One user action, described before it runs. Consumed by
/// [`MutationEngine::run`], so an instance cannot be reused.
pub struct Mutation<R> {
    id: Uuid,
    name: &'static str,
    plan: Plan<R>,
    status: watch::Sender<MutationStatus>,
}

struct Plan<R> {
    entity: String,
    touched: Vec<QueryKey>,
    precheck: Option<CacheWrite>,
    optimistic: Vec<CacheWrite>,
    on_success: Vec<SuccessHook<R>>,
    invalidates: Vec<KeyMatch>,
}

impl<R> Mutation<R> {
    /// A mutation named `name` on the logical `entity`. Mutations sharing an
    /// entity run one at a time in submission order.
    #[must_use]
    pub fn new(name: &'static str, entity: impl Into<String>) -> Self {
        let (status, _) = watch::channel(MutationStatus::Idle);
        Self {
            id: Uuid::new_v4(),
            name,
            plan: Plan {
                entity: entity.into(),
                touched: Vec::new(),
                precheck: None,
                optimistic: Vec::new(),
                on_success: Vec::new(),
                invalidates: Vec::new(),
            },
            status,
        }
    }

    /// Observe this mutation's status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<MutationStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.plan.entity
    }

    /// Include `key` in the snapshot and invalidate it on success.
    #[must_use]
    pub fn touch(mut self, key: QueryKey) -> Self {
        if !self.plan.touched.contains(&key) {
            self.plan.touched.push(key);
        }
        self
    }

    /// Validate against the cache before anything is sent or written.
    #[must_use]
    pub fn precheck(
        mut self,
        check: impl FnOnce(&QueryCache) -> Result<(), ClientError> + Send + 'static,
    ) -> Self {
        self.plan.precheck = Some(Box::new(check));
        self
    }

    /// Optimistically transform the typed data at `key`. Skipped when the
    /// key holds no data.
    #[must_use]
    pub fn optimistic<T, F>(self, key: QueryKey, update: F) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce(&mut T) -> Result<(), ClientError> + Send + 'static,
    {
        let write_key = key.clone();
        let mut this = self.touch(key);
        this.plan.optimistic.push(Box::new(move |cache: &QueryCache| {
            cache.update::<T, F>(&write_key, update).map(|_| ())
        }));
        this
    }

    /// Optimistically transform the raw JSON at `key`.
    #[must_use]
    pub fn optimistic_value(
        self,
        key: QueryKey,
        update: impl FnOnce(&mut Value) + Send + 'static,
    ) -> Self {
        let write_key = key.clone();
        let mut this = self.touch(key);
        this.plan.optimistic.push(Box::new(move |cache: &QueryCache| {
            cache.set_data(&write_key, update);
            Ok(())
        }));
        this
    }

    /// Write to the cache after the server confirmed the request.
    #[must_use]
    pub fn on_success(
        mut self,
        hook: impl FnOnce(&QueryCache, &R) -> Result<(), ClientError> + Send + 'static,
    ) -> Self {
        self.plan.on_success.push(Box::new(hook));
        self
    }

    /// Invalidate matching keys after success.
    #[must_use]
    pub fn invalidates(mut self, matcher: impl Into<KeyMatch>) -> Self {
        self.plan.invalidates.push(matcher.into());
        self
    }
}

// =============================================================================
// MutationEngine
// =============================================================================

/// Runs mutations against the shared query cache.
#[derive(Clone)]
pub struct MutationEngine {
    cache: QueryCache,
    locks: EntityLocks,
}

impl MutationEngine {
    #[must_use]
    pub fn new(cache: QueryCache) -> Self {
        Self {
            cache,
            locks: EntityLocks::default(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Run `mutation`, sending `request` exactly once.
    ///
    /// `request` is built after the optimistic writes, so it may read the
    /// optimistic state (e.g. to send the whole updated cart).
    ///
    /// # Errors
    ///
    /// Returns the pre-check or request error after rolling back.
    pub async fn run<R, F, Fut>(&self, mutation: Mutation<R>, request: F) -> Result<R, ClientError>
    where
        F: FnOnce(&QueryCache) -> Fut,
        Fut: Future<Output = Result<R, ClientError>>,
    {
        let Mutation {
            id,
            name,
            plan,
            status,
        } = mutation;
        let span = info_span!("mutation", %id, name, entity = %plan.entity);

        async move {
            status.send_replace(MutationStatus::Pending);
            let result = self.settle(plan, request).await;
            status.send_replace(match &result {
                Ok(_) => MutationStatus::Succeeded,
                Err(e) => MutationStatus::Failed(e.clone()),
            });
            result
        }
        .instrument(span)
        .await
    }

    async fn settle<R, F, Fut>(&self, plan: Plan<R>, request: F) -> Result<R, ClientError>
    where
        F: FnOnce(&QueryCache) -> Fut,
        Fut: Future<Output = Result<R, ClientError>>,
    {
        let Plan {
            entity,
            touched,
            precheck,
            optimistic,
            on_success,
            invalidates,
        } = plan;
        // Mutations sharing an entity or a touched key run one at a time, so
        // no snapshot ever captures another mutation's optimistic state.
        let mut names: Vec<String> = touched.iter().map(|key| format!("key:{key}")).collect();
        names.push(entity);
        names.sort();
        names.dedup();
        let mut held = Vec::with_capacity(names.len());
        for name in &names {
            held.push(self.locks.acquire(name).await);
        }
        debug!(locks = held.len(), "Mutation locks acquired");

        if let Some(check) = precheck
            && let Err(e) = check(&self.cache)
        {
            debug!(error = %e, "Pre-check failed, nothing sent");
            return Err(e);
        }

        self.cache.pin(&touched);
        let snapshot = self.cache.snapshot(&touched);
        let mut pending = PendingWrites {
            cache: &self.cache,
            epoch: snapshot.epoch(),
            snapshot: Some(snapshot),
            touched: &touched,
        };

        for write in optimistic {
            if let Err(e) = write(&self.cache) {
                warn!(error = %e, "Optimistic write failed, rolling back");
                pending.rollback();
                return Err(e);
            }
        }

        match request(&self.cache).await {
            Ok(value) => {
                pending.commit();
                if !pending.is_current() {
                    info!("Mutation succeeded after the cache was cleared");
                    return Ok(value);
                }
                for hook in on_success {
                    if let Err(e) = hook(&self.cache, &value) {
                        warn!(error = %e, "Post-success cache write failed");
                    }
                }
                self.cache.unpin(&touched);
                for key in &touched {
                    self.cache.invalidate(key);
                }
                for matcher in invalidates {
                    self.cache.invalidate(matcher);
                }
                info!("Mutation succeeded");
                Ok(value)
            }
            Err(e) => {
                pending.rollback();
                warn!(error = %e, "Mutation failed, rolled back");
                Err(e)
            }
        }
    }
}

/// Optimistic state awaiting the server's answer.
struct PendingWrites<'a> {
    cache: &'a QueryCache,
    epoch: u64,
    snapshot: Option<CacheSnapshot>,
    touched: &'a [QueryKey],
}

impl PendingWrites<'_> {
    /// Whether the cache has not been cleared since the snapshot.
    fn is_current(&self) -> bool {
        self.cache.epoch() == self.epoch
    }

    /// Keep the optimistic state.
    fn commit(&mut self) {
        self.snapshot = None;
    }

    /// Restore the baseline and release the keys. Returns false when the
    /// cache was cleared in the meantime and there was nothing to restore.
    fn rollback(&mut self) -> bool {
        let Some(snapshot) = self.snapshot.take() else {
            return false;
        };
        // Pins from an earlier epoch were dropped by the clear.
        if self.cache.restore(&snapshot) {
            self.cache.unpin(self.touched);
            true
        } else {
            debug!("Cache cleared while pending, skipping rollback");
            false
        }
    }
}

impl Drop for PendingWrites<'_> {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            warn!("Mutation abandoned while pending, restoring snapshot");
            if self.rollback() {
                for key in self.touched {
                    self.cache.invalidate(key);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use regusto_core::{Cart, CartItem, CartLineRef, Price, ProductInstanceId, Store};
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;

    fn engine() -> MutationEngine {
        MutationEngine::new(QueryCache::new(Duration::from_secs(300), 2))
    }

    fn seed_store(cache: &QueryCache, favorite: bool) {
        cache.put(
            &QueryKey::stores(),
            json!([
                { "id": "41", "name": "Verduleria", "isFavorite": true },
                { "id": "42", "name": "Panaderia", "isFavorite": favorite },
            ]),
        );
    }

    fn toggle_favorite(id: &'static str) -> Mutation<()> {
        Mutation::new("toggle_favorite", format!("favorite:store:{id}")).optimistic(
            QueryKey::stores(),
            move |stores: &mut Vec<Store>| {
                for store in stores.iter_mut().filter(|s| s.id.as_str() == id) {
                    store.is_favorite = !store.is_favorite;
                }
                Ok(())
            },
        )
    }

    fn is_favorite(cache: &QueryCache, id: &str) -> bool {
        cache
            .get_data::<Vec<Store>>(&QueryKey::stores())
            .unwrap()
            .into_iter()
            .find(|s| s.id.as_str() == id)
            .unwrap()
            .is_favorite
    }

    #[tokio::test]
    async fn test_failed_favorite_toggle_reverts() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);
        let before = cache.snapshot(&[QueryKey::stores()]);

        let (tx, rx) = oneshot::channel::<Result<(), ClientError>>();
        let mutation = toggle_favorite("42");
        let mut status = mutation.status();
        let run = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(mutation, move |_| async move { rx.await.unwrap() }).await }
        });

        status
            .wait_for(|s| *s == MutationStatus::Pending)
            .await
            .unwrap();
        while !is_favorite(&cache, "42") {
            tokio::task::yield_now().await;
        }

        tx.send(Err(ClientError::Remote {
            status: 500,
            message: "Internal Server Error".into(),
        }))
        .unwrap();
        let err = run.await.unwrap().unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert!(!is_favorite(&cache, "42"));
        assert_eq!(cache.snapshot(&[QueryKey::stores()]), before);
        assert!(matches!(*status.borrow(), MutationStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_success_invalidates_touched_and_declared_keys() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);
        cache.put(&QueryKey::favorites(), json!([]));

        engine
            .run(
                toggle_favorite("42").invalidates(QueryKey::favorites()),
                |_| async { Ok(()) },
            )
            .await
            .unwrap();

        assert!(is_favorite(&cache, "42"));
        assert!(cache.get(&QueryKey::stores()).unwrap().invalidated);
        assert!(cache.get(&QueryKey::favorites()).unwrap().invalidated);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        cache
            .fetch::<Value, _, _>(QueryKey::favorites(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!([{ "commerce_id": "42" }])) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_precheck_failure_sends_nothing() {
        let engine = engine();
        let cache = engine.cache().clone();
        cache.put(&QueryKey::cart_items(), json!([]));
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();

        let mutation = Mutation::<()>::new("add_to_cart", "cart")
            .precheck(|_| Err(ClientError::Validation("only 1 left".into())))
            .optimistic_value(QueryKey::cart_items(), |items| {
                items.as_array_mut().unwrap().push(json!({ "quantity": 9 }));
            });
        let err = engine
            .run(mutation, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(cache.get(&QueryKey::cart_items()).unwrap().data, Some(json!([])));
    }

    #[tokio::test]
    async fn test_same_entity_snapshot_waits_for_settle() {
        let engine = engine();
        let cache = engine.cache().clone();
        let line = CartLineRef::Instance(ProductInstanceId::new("pi-7"));
        cache.put(
            &QueryKey::cart_items(),
            serde_json::to_value(Cart::new(vec![CartItem::for_instance(
                ProductInstanceId::new("pi-7"),
                "Medialunas",
                Price::from_cents(250),
                2,
            )]))
            .unwrap(),
        );

        let bump = |delta: i64| {
            let line = line.clone();
            Mutation::<()>::new("change_quantity", "cart").optimistic(
                QueryKey::cart_items(),
                move |cart: &mut Cart| cart.change_quantity(&line, delta).map(|_| ()).map_err(Into::into),
            )
        };

        // First mutation stays pending until released, then fails.
        let (release_first, first_answer) = oneshot::channel::<()>();
        let first = tokio::spawn({
            let engine = engine.clone();
            let mutation = bump(1);
            async move {
                engine
                    .run(mutation, move |_| async move {
                        let _ = first_answer.await;
                        Err::<(), _>(ClientError::Network("reset".into()))
                    })
                    .await
            }
        });
        while !cache.get(&QueryKey::cart_items()).unwrap().data.unwrap()[0]["quantity"]
            .as_u64()
            .is_some_and(|q| q == 3)
        {
            tokio::task::yield_now().await;
        }

        // The second mutation must snapshot the post-rollback quantity (2),
        // never the first mutation's optimistic 3.
        let seen_by_second = Arc::new(std::sync::Mutex::new(None));
        let second = tokio::spawn({
            let engine = engine.clone();
            let seen = seen_by_second.clone();
            let mutation = bump(1);
            async move {
                engine
                    .run(mutation, move |cache| {
                        let cart: Cart = cache.get_data(&QueryKey::cart_items()).unwrap();
                        *seen.lock().unwrap() = Some(cart.item_count());
                        async { Ok(()) }
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen_by_second.lock().unwrap().is_none());

        release_first.send(()).unwrap();
        assert!(first.await.unwrap().is_err());
        second.await.unwrap().unwrap();

        assert_eq!(*seen_by_second.lock().unwrap(), Some(3));
        let cart: Cart = cache.get_data(&QueryKey::cart_items()).unwrap();
        assert_eq!(cart.item_count(), 3);
    }

    #[tokio::test]
    async fn test_shared_key_serializes_different_entities() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);

        let (release_first, first_answer) = oneshot::channel::<()>();
        let first = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .run(toggle_favorite("42"), move |_| async move {
                        let _ = first_answer.await;
                        Err::<(), _>(ClientError::Remote {
                            status: 500,
                            message: "Internal Server Error".into(),
                        })
                    })
                    .await
            }
        });
        while !is_favorite(&cache, "42") {
            tokio::task::yield_now().await;
        }

        let second = toggle_favorite("41");
        let mut second_status = second.status();
        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(second, |_| async { Ok(()) }).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*second_status.borrow_and_update(), MutationStatus::Pending);
        assert!(is_favorite(&cache, "41"));

        release_first.send(()).unwrap();
        assert!(first.await.unwrap().is_err());
        second.await.unwrap().unwrap();

        assert!(!is_favorite(&cache, "42"));
        assert!(!is_favorite(&cache, "41"));
    }

    #[tokio::test]
    async fn test_abandoned_mutation_restores_and_invalidates() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.run(toggle_favorite("42"), |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(!is_favorite(&cache, "42"));
        assert!(cache.get(&QueryKey::stores()).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_cleared_cache_stays_cleared_after_failure() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);

        let err = engine
            .run(toggle_favorite("42"), |cache| {
                // Forced logout lands while the request is pending.
                cache.clear();
                async { Err::<(), _>(ClientError::Auth) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, ClientError::Auth);
        assert!(cache.get(&QueryKey::stores()).is_none());
    }

    #[tokio::test]
    async fn test_cleared_cache_skips_success_writes() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);

        engine
            .run(
                toggle_favorite("42").on_success(|cache, _| {
                    cache.put(&QueryKey::favorites(), json!([{ "commerce_id": "42" }]));
                    Ok(())
                }),
                |cache| {
                    cache.clear();
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert!(cache.get(&QueryKey::stores()).is_none());
        assert!(cache.get(&QueryKey::favorites()).is_none());
    }

    #[tokio::test]
    async fn test_abandoned_mutation_after_clear_leaves_cache_empty() {
        let engine = engine();
        let cache = engine.cache().clone();
        seed_store(&cache, false);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.run(toggle_favorite("42"), |cache| {
                cache.clear();
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(cache.get(&QueryKey::stores()).is_none());
    }

    #[tokio::test]
    async fn test_non_optimistic_mutation_leaves_cache_until_success() {
        let engine = engine();
        let cache = engine.cache().clone();
        cache.put(&QueryKey::cart_items(), json!([{ "quantity": 1 }]));
        let observed = Arc::new(std::sync::Mutex::new(None));
        let seen = observed.clone();

        engine
            .run(
                Mutation::<()>::new("place_order", "cart").invalidates(QueryKey::cart_items()),
                move |cache| {
                    *seen.lock().unwrap() = cache.get(&QueryKey::cart_items()).unwrap().data;
                    async { Ok(()) }
                },
            )
            .await
            .unwrap();

        assert_eq!(*observed.lock().unwrap(), Some(json!([{ "quantity": 1 }])));
        assert!(cache.get(&QueryKey::cart_items()).unwrap().invalidated);
    }
}
