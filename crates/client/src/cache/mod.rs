//! Query cache.
//!
//! Stores the last-known-good JSON value per [`QueryKey`] and mediates every
//! read and write of it:
//!
//! - `fetch` serves fresh data without touching the network and otherwise
//!   runs the loader, coalescing concurrent loads of one key into a single
//!   shared future.
//! - `invalidate` marks entries stale so the next `fetch` always loads.
//! - Direct writes (`set_data`, `update`, `put`) are crate-private: only the
//!   mutation engine and the realtime adapter may write, which keeps
//!   snapshots and rollbacks exact.
//!
//! Entries are never evicted; the stale time only gates refetching.
//!
//! Every load carries a generation token. Invalidation, cancellation and
//! clearing hand out a new token, so a load that started before them settles
//! without writing. Items appended while a load runs are kept on top of its
//! result.
//!
//! `clear` also starts a new epoch. Snapshots taken in an earlier epoch are
//! never restored, so a rollback cannot resurrect a signed-out user's data.

mod key;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, WeakShared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

pub use key::{KeyMatch, QueryKey, Resource};

type WeakLoad = WeakShared<BoxFuture<'static, Result<Value, ClientError>>>;

/// Base delay between query retries; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
/// Upper bound on a single retry delay.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Load state of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    /// The last load failed; any previous data is kept.
    Error(ClientError),
}

/// Read-only view of a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub data: Option<Value>,
    /// When `data` last came from the network
    pub fetched_at: Option<Instant>,
    pub status: QueryStatus,
    /// Set by `invalidate`; cleared by the next successful load
    pub invalidated: bool,
}

/// Notification of a cache change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Cleared,
}

/// Saved state of a set of entries, restorable verbatim.
///
/// Entries absent at capture time are recorded as absent and removed again
/// on restore.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    epoch: u64,
    entries: Vec<(QueryKey, Option<SavedEntry>)>,
}

impl CacheSnapshot {
    /// Epoch the snapshot was taken in.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Keys covered by this snapshot.
    pub fn keys(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.iter().map(|(key, _)| key)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SavedEntry {
    data: Option<Value>,
    fetched_at: Option<Instant>,
    invalidated: bool,
}

#[derive(Debug, Default)]
struct Slot {
    data: Option<Value>,
    fetched_at: Option<Instant>,
    status: QueryStatus,
    invalidated: bool,
    generation: u64,
    /// Items appended while the current load runs
    appended: Vec<Value>,
}

impl Slot {
    fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
        !self.invalidated
            && self
                .fetched_at
                .is_some_and(|at| now.saturating_duration_since(at) < stale_time)
    }

    fn save(&self) -> SavedEntry {
        SavedEntry {
            data: self.data.clone(),
            fetched_at: self.fetched_at,
            invalidated: self.invalidated,
        }
    }
}

struct InFlight {
    generation: u64,
    future: WeakLoad,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<QueryKey, Slot>,
    in_flight: HashMap<QueryKey, InFlight>,
    /// Keys held by pending mutations, with a hold count
    pinned: HashMap<QueryKey, usize>,
    next_generation: u64,
    /// Bumped by every `clear`
    epoch: u64,
}

impl CacheState {
    const fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_pinned(&self, key: &QueryKey) -> bool {
        self.pinned.contains_key(key)
    }

    /// Detach `key` from any running load.
    fn detach(&mut self, key: &QueryKey) {
        self.in_flight.remove(key);
        let generation = self.bump();
        if let Some(slot) = self.slots.get_mut(key) {
            slot.generation = generation;
            slot.appended.clear();
            if slot.status == QueryStatus::Loading {
                slot.status = QueryStatus::Idle;
            }
        }
    }

    /// Forget the load of `key` if every waiter has dropped it.
    fn reap(&mut self, key: &QueryKey) {
        let live = self
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.future.upgrade().is_some());
        if !live
            && self
                .slots
                .get(key)
                .is_some_and(|slot| slot.status == QueryStatus::Loading)
        {
            debug!(key = %key, "Load abandoned by every waiter");
            self.detach(key);
        }
    }
}

// =============================================================================
// QueryCache
// =============================================================================

/// Process-wide query cache. Cheap to clone.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    stale_time: Duration,
    retries: u32,
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

impl QueryCache {
    #[must_use]
    pub fn new(stale_time: Duration, retries: u32) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(CacheInner {
                stale_time,
                retries,
                state: Mutex::new(CacheState::default()),
                events,
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.stale_time, config.query_retries)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every write under the lock is a plain field assignment, so a
        // poisoned state is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Subscribe to cache change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current entry for `key`, if any. Never blocks on a load.
    #[must_use]
    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        state.reap(key);
        state.slots.get(key).map(|slot| CacheEntry {
            key: key.clone(),
            data: slot.data.clone(),
            fetched_at: slot.fetched_at,
            status: slot.status.clone(),
            invalidated: slot.invalidated,
        })
    }

    /// Cached data for `key` decoded as `T`.
    #[must_use]
    pub fn get_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let data = self.lock().slots.get(key)?.data.clone()?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached data does not match requested type");
                None
            }
        }
    }

    /// Whether `key` holds data younger than the stale time that has not
    /// been invalidated.
    #[must_use]
    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        self.lock()
            .slots
            .get(key)
            .is_some_and(|slot| slot.is_fresh(Instant::now(), self.inner.stale_time))
    }

    /// Whether a load of `key` is currently running.
    #[must_use]
    pub fn is_loading(&self, key: &QueryKey) -> bool {
        self.lock()
            .in_flight
            .get(key)
            .is_some_and(|flight| flight.future.upgrade().is_some())
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Return fresh cached data, or load it with `loader`.
    ///
    /// Concurrent calls for one key share a single load. Network failures are
    /// retried with exponential backoff up to the configured retry count.
    /// Dropping every caller of a load abandons it without a cache write.
    ///
    /// # Errors
    ///
    /// Returns the loader's final error, or `ClientError::Decode` if the data
    /// cannot be represented as `T`.
    pub async fn fetch<T, F, Fut>(&self, key: QueryKey, loader: F) -> Result<T, ClientError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let value = self.fetch_value(key, loader, false).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Load `key` regardless of freshness, still joining a running load.
    ///
    /// # Errors
    ///
    /// Same as [`QueryCache::fetch`].
    pub async fn refetch<T, F, Fut>(&self, key: QueryKey, loader: F) -> Result<T, ClientError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let value = self.fetch_value(key, loader, true).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn fetch_value<T, F, Fut>(
        &self,
        key: QueryKey,
        loader: F,
        force: bool,
    ) -> Result<Value, ClientError>
    where
        T: Serialize + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let shared = {
            let mut state = self.lock();

            if let Some(slot) = state.slots.get(&key)
                && let Some(data) = &slot.data
                && (state.is_pinned(&key)
                    || (!force && slot.is_fresh(Instant::now(), self.inner.stale_time)))
            {
                debug!(key = %key, "Cache hit");
                return Ok(data.clone());
            }

            if let Some(running) = state.in_flight.get(&key).and_then(|f| f.future.upgrade()) {
                debug!(key = %key, "Joining in-flight load");
                running
            } else {
                debug!(key = %key, "Cache miss, loading");
                let generation = state.bump();
                let slot = state.slots.entry(key.clone()).or_default();
                slot.status = QueryStatus::Loading;
                slot.generation = generation;
                slot.appended.clear();

                let cache = self.clone();
                let load_key = key.clone();
                let retries = self.inner.retries;
                let future = async move {
                    let result = load_with_retry(&load_key, retries, loader).await;
                    cache.settle(&load_key, generation, &result);
                    result
                }
                .boxed()
                .shared();

                if let Some(weak) = future.downgrade() {
                    state.in_flight.insert(
                        key.clone(),
                        InFlight {
                            generation,
                            future: weak,
                        },
                    );
                }
                future
            }
        };

        shared.await
    }

    /// Record the outcome of the load started with `generation`.
    fn settle(&self, key: &QueryKey, generation: u64, result: &Result<Value, ClientError>) {
        let written = {
            let mut state = self.lock();
            if state
                .in_flight
                .get(key)
                .is_some_and(|flight| flight.generation == generation)
            {
                state.in_flight.remove(key);
            }

            let pinned = state.is_pinned(key);
            match state.slots.get_mut(key) {
                Some(slot) if slot.generation == generation => {
                    // Appended items are already part of `data`; they only
                    // need replaying over a fresh load result.
                    let appended = std::mem::take(&mut slot.appended);
                    match result {
                        Ok(_) if pinned => {
                            debug!(key = %key, "Key held by a mutation, discarding load result");
                            slot.status = QueryStatus::Idle;
                            false
                        }
                        Ok(value) => {
                            let mut value = value.clone();
                            if let Value::Array(items) = &mut value {
                                items.extend(appended);
                            }
                            slot.data = Some(value);
                            slot.fetched_at = Some(Instant::now());
                            slot.invalidated = false;
                            slot.status = QueryStatus::Idle;
                            true
                        }
                        Err(e) => {
                            slot.status = QueryStatus::Error(e.clone());
                            false
                        }
                    }
                }
                _ => {
                    debug!(key = %key, "Discarding superseded load result");
                    false
                }
            }
        };

        if written {
            self.emit(CacheEvent::Updated(key.clone()));
        }
    }

    /// Abandon any running load of `key`; its result will not be written.
    pub fn cancel(&self, key: &QueryKey) {
        self.lock().detach(key);
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Mark every matching entry stale and abandon matching loads.
    ///
    /// Returns the number of entries affected.
    pub fn invalidate(&self, matcher: impl Into<KeyMatch>) -> usize {
        let matcher = matcher.into();
        let keys: Vec<QueryKey> = {
            let mut state = self.lock();
            let mut keys: Vec<QueryKey> = state
                .slots
                .keys()
                .chain(state.in_flight.keys())
                .filter(|key| matcher.matches(key))
                .cloned()
                .collect();
            keys.sort();
            keys.dedup();

            for key in &keys {
                state.detach(key);
                if let Some(slot) = state.slots.get_mut(key) {
                    slot.invalidated = true;
                }
            }
            keys
        };

        debug!(matcher = %matcher, count = keys.len(), "Invalidated queries");
        for key in &keys {
            self.emit(CacheEvent::Invalidated(key.clone()));
        }
        keys.len()
    }

    /// Drop every entry, e.g. on sign-out, and start a new epoch.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.slots.clear();
            state.in_flight.clear();
            state.pinned.clear();
            state.epoch += 1;
        }
        debug!("Cache cleared");
        self.emit(CacheEvent::Cleared);
    }

    // =========================================================================
    // Direct writes (mutation engine and realtime adapter only)
    // =========================================================================

    /// Transform cached data in place. Does nothing when `key` holds no data.
    /// Leaves `fetched_at` untouched.
    pub(crate) fn set_data(&self, key: &QueryKey, updater: impl FnOnce(&mut Value)) -> bool {
        let changed = {
            let mut state = self.lock();
            match state.slots.get_mut(key).and_then(|slot| slot.data.as_mut()) {
                Some(data) => {
                    updater(data);
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        changed
    }

    /// Typed variant of [`QueryCache::set_data`].
    pub(crate) fn update<T, F>(&self, key: &QueryKey, updater: F) -> Result<bool, ClientError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> Result<(), ClientError>,
    {
        let changed = {
            let mut state = self.lock();
            let Some(data) = state.slots.get_mut(key).and_then(|slot| slot.data.as_mut()) else {
                return Ok(false);
            };
            let mut typed: T = serde_json::from_value(data.clone())?;
            updater(&mut typed)?;
            *data = serde_json::to_value(typed)?;
            true
        };
        if changed {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        Ok(changed)
    }

    /// Replace the data of `key`, creating the entry if needed.
    pub(crate) fn put(&self, key: &QueryKey, value: Value) {
        self.lock().slots.entry(key.clone()).or_default().data = Some(value);
        self.emit(CacheEvent::Updated(key.clone()));
    }

    /// Append `item` to the list held by `key`, creating the list if absent.
    ///
    /// The item survives a load of `key` that is running at the time.
    pub(crate) fn append(&self, key: &QueryKey, item: Value) -> bool {
        let appended = {
            let mut state = self.lock();
            state.reap(key);
            let slot = state.slots.entry(key.clone()).or_default();
            let loading = slot.status == QueryStatus::Loading;
            match slot.data.get_or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(items) => {
                    if loading {
                        slot.appended.push(item.clone());
                    }
                    items.push(item);
                    true
                }
                _ => {
                    warn!(key = %key, "Cannot append to non-list cache entry");
                    false
                }
            }
        };
        if appended {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        appended
    }

    /// Current epoch; changes on every `clear`.
    pub(crate) fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Capture the current state of `keys`.
    pub(crate) fn snapshot(&self, keys: &[QueryKey]) -> CacheSnapshot {
        let state = self.lock();
        CacheSnapshot {
            epoch: state.epoch,
            entries: keys
                .iter()
                .map(|key| (key.clone(), state.slots.get(key).map(Slot::save)))
                .collect(),
        }
    }

    /// Put every snapshotted entry back exactly as captured.
    ///
    /// Does nothing when the cache was cleared since the snapshot; returns
    /// whether anything was restored.
    pub(crate) fn restore(&self, snapshot: &CacheSnapshot) -> bool {
        {
            let mut state = self.lock();
            if state.epoch != snapshot.epoch {
                debug!("Cache cleared since snapshot, nothing to restore");
                return false;
            }
            for (key, saved) in &snapshot.entries {
                state.detach(key);
                match saved {
                    Some(saved) => {
                        let slot = state.slots.entry(key.clone()).or_default();
                        slot.data.clone_from(&saved.data);
                        slot.fetched_at = saved.fetched_at;
                        slot.invalidated = saved.invalidated;
                    }
                    None => {
                        state.slots.remove(key);
                    }
                }
            }
        }
        for key in snapshot.keys() {
            self.emit(CacheEvent::Updated(key.clone()));
        }
        true
    }

    /// Hold `keys` for a pending mutation: loads neither overwrite them nor
    /// replace their data while held.
    pub(crate) fn pin(&self, keys: &[QueryKey]) {
        let mut state = self.lock();
        for key in keys {
            *state.pinned.entry(key.clone()).or_insert(0) += 1;
            state.detach(key);
        }
    }

    pub(crate) fn unpin(&self, keys: &[QueryKey]) {
        let mut state = self.lock();
        for key in keys {
            if let Some(count) = state.pinned.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    state.pinned.remove(key);
                }
            }
        }
    }
}

async fn load_with_retry<T, F, Fut>(
    key: &QueryKey,
    retries: u32,
    mut loader: F,
) -> Result<Value, ClientError>
where
    T: Serialize,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match loader().await {
            Ok(value) => return Ok(serde_json::to_value(value)?),
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = retry_delay(attempt);
                warn!(
                    key = %key,
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Query failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    error!(key = %key, attempts = attempt + 1, error = %e, "Query retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use regusto_core::{OrderId, StoreId};
    use serde_json::json;

    use super::*;

    fn cache() -> QueryCache {
        QueryCache::new(Duration::from_secs(300), 2)
    }

    fn counting_loader(
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> impl FnMut() -> BoxFuture<'static, Result<Value, ClientError>> + Send + 'static {
        let calls = calls.clone();
        move || {
            let calls = calls.clone();
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_load() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetches = (0..5).map(|_| {
            cache.fetch::<Value, _, _>(QueryKey::stores(), counting_loader(&calls, json!([1, 2])))
        });
        let results = futures::future::join_all(fetches).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap(), json!([1, 2]));
        }
        assert!(!cache.is_loading(&QueryKey::stores()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_data_skips_network_until_stale() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::orders();

        cache
            .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!([])))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        cache
            .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!([])))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.is_fresh(&key));
        cache
            .fetch::<Value, _, _>(key, counting_loader(&calls, json!([])))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_next_fetch_to_load() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::cart_items();

        cache
            .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!([])))
            .await
            .unwrap();
        assert_eq!(cache.invalidate(key.clone()), 1);
        assert!(cache.get(&key).unwrap().invalidated);

        cache
            .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!([])))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.get(&key).unwrap().invalidated);
    }

    #[tokio::test]
    async fn test_prefix_invalidation_covers_scoped_keys() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let one = QueryKey::products(&StoreId::new("1"));
        let two = QueryKey::products(&StoreId::new("2"));

        for key in [&one, &two, &QueryKey::stores()] {
            cache
                .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!([])))
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate(Resource::Products), 2);
        assert!(!cache.is_fresh(&one));
        assert!(!cache.is_fresh(&two));
        assert!(cache.is_fresh(&QueryKey::stores()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_errors_retried_twice() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = cache
            .fetch::<Value, _, _>(QueryKey::stores(), move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ClientError::Network("connection reset".into()))
                    } else {
                        Ok(json!(["ok"]))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), json!(["ok"]));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_surface_error_and_keep_data() {
        let cache = cache();
        let key = QueryKey::stores();
        cache.put(&key, json!(["old"]));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = cache
            .fetch::<Value, _, _>(key.clone(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(ClientError::Network("offline".into())) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.data, Some(json!(["old"])));
        assert!(matches!(entry.status, QueryStatus::Error(ClientError::Network(_))));
    }

    #[tokio::test]
    async fn test_remote_errors_not_retried() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = cache
            .fetch::<Value, _, _>(QueryKey::stores(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<Value, _>(ClientError::Remote {
                        status: 500,
                        message: "boom".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_load_discards_result() {
        let cache = cache();
        let key = QueryKey::favorites();
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let pending = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            let mut wait = Some(wait);
            async move {
                cache
                    .fetch::<Value, _, _>(key, move || {
                        let wait = wait.take();
                        async move {
                            if let Some(wait) = wait {
                                let _ = wait.await;
                            }
                            Ok(json!(["stale"]))
                        }
                    })
                    .await
            }
        });

        while !cache.is_loading(&key) {
            tokio::task::yield_now().await;
        }
        cache.invalidate(key.clone());
        release.send(()).unwrap();

        // The caller still gets its value, but the cache keeps nothing.
        assert_eq!(pending.await.unwrap().unwrap(), json!(["stale"]));
        assert_eq!(cache.get(&key).unwrap().data, None);
    }

    #[tokio::test]
    async fn test_dropping_only_waiter_abandons_load() {
        let cache = cache();
        let key = QueryKey::orders();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.fetch::<Value, _, _>(key.clone(), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(["late"]))
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(!cache.is_loading(&key));
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.data, None);
        assert_eq!(entry.status, QueryStatus::Idle);
    }

    #[tokio::test]
    async fn test_append_during_load_survives_result() {
        let cache = cache();
        let key = QueryKey::messages(&OrderId::new("99"));
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let pending = tokio::spawn({
            let cache = cache.clone();
            let key = key.clone();
            let mut wait = Some(wait);
            async move {
                cache
                    .fetch::<Value, _, _>(key, move || {
                        let wait = wait.take();
                        async move {
                            if let Some(wait) = wait {
                                let _ = wait.await;
                            }
                            Ok(json!([{ "text": "history" }]))
                        }
                    })
                    .await
            }
        });

        while !cache.is_loading(&key) {
            tokio::task::yield_now().await;
        }
        assert!(cache.append(&key, json!({ "text": "live" })));
        release.send(()).unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), json!([{ "text": "history" }]));
        assert_eq!(
            cache.get(&key).unwrap().data,
            Some(json!([{ "text": "history" }, { "text": "live" }]))
        );

        // Replayed once only: a later load starts from the server's list.
        cache.invalidate(key.clone());
        cache
            .fetch::<Value, _, _>(key.clone(), || async { Ok(json!([])) })
            .await
            .unwrap();
        assert_eq!(cache.get(&key).unwrap().data, Some(json!([])));
    }

    #[test]
    fn test_restore_after_clear_does_nothing() {
        let cache = cache();
        let key = QueryKey::stores();
        cache.put(&key, json!([{ "id": "42" }]));
        let snapshot = cache.snapshot(std::slice::from_ref(&key));

        cache.clear();

        assert!(!cache.restore(&snapshot));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_set_data_preserves_fetched_at() {
        let cache = cache();
        let key = QueryKey::stores();
        assert!(!cache.set_data(&key, |_| {}));

        cache.put(&key, json!([{ "id": "1", "isFavorite": false }]));
        let before = cache.get(&key).unwrap().fetched_at;
        assert!(cache.set_data(&key, |data| data[0]["isFavorite"] = json!(true)));

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.fetched_at, before);
        assert_eq!(entry.data.unwrap()[0]["isFavorite"], json!(true));
    }

    #[test]
    fn test_snapshot_restore_is_exact() {
        let cache = cache();
        let present = QueryKey::stores();
        let absent = QueryKey::favorites();
        cache.put(&present, json!([{ "id": "1" }]));

        let snapshot = cache.snapshot(&[present.clone(), absent.clone()]);
        cache.set_data(&present, |data| *data = json!([]));
        cache.append(&absent, json!({ "commerce_id": "1" }));
        assert!(cache.restore(&snapshot));

        assert_eq!(cache.snapshot(&[present.clone(), absent.clone()]), snapshot);
        assert_eq!(cache.get(&present).unwrap().data, Some(json!([{ "id": "1" }])));
        assert!(cache.get(&absent).is_none());
    }

    #[tokio::test]
    async fn test_pinned_key_serves_cached_data() {
        let cache = cache();
        let key = QueryKey::cart_items();
        cache.put(&key, json!(["optimistic"]));
        cache.invalidate(key.clone());
        cache.pin(std::slice::from_ref(&key));

        let calls = Arc::new(AtomicUsize::new(0));
        let value = cache
            .fetch::<Value, _, _>(key.clone(), counting_loader(&calls, json!(["server"])))
            .await
            .unwrap();
        assert_eq!(value, json!(["optimistic"]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.unpin(std::slice::from_ref(&key));
        let value = cache
            .fetch::<Value, _, _>(key, counting_loader(&calls, json!(["server"])))
            .await
            .unwrap();
        assert_eq!(value, json!(["server"]));
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(10), RETRY_MAX_DELAY);
    }
}
