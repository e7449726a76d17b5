//! In-memory query cache
//!
//! Holds the client's view of server entities keyed by [`QueryKey`]. Entries
//! carry a staleness flag; invalidating a key marks it and everything below it
//! stale and, when a [`QueryFetcher`] is registered, refetches them in the
//! background. Reads issued through [`QueryCache::fetch`] are tracked so that
//! [`CacheStore::cancel_pending_reads`] can guarantee a late response never
//! overwrites a value written after the cancellation.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::{key::QueryKey, store::CacheStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no fetcher registered to load {key}")]
    NoFetcher { key: QueryKey },
    #[error("failed to fetch {key}: {message}")]
    Failed { key: QueryKey, message: String },
}

impl FetchError {
    pub fn failed(key: &QueryKey, message: impl Into<String>) -> Self {
        FetchError::Failed {
            key: key.clone(),
            message: message.into(),
        }
    }
}

/// Authoritative source the cache loads entries from
#[async_trait]
pub trait QueryFetcher<V>: Send + Sync {
    async fn fetch(&self, key: QueryKey) -> Result<V, FetchError>;
}

#[async_trait]
impl<V, F, Fut> QueryFetcher<V> for F
where
    F: Fn(QueryKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<V, FetchError>> + Send,
    V: Send + 'static,
{
    async fn fetch(&self, key: QueryKey) -> Result<V, FetchError> {
        (self)(key).await
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
    /// Refetch stale entries in the background when they are invalidated
    #[serde(default = "default_refetch_on_invalidate")]
    pub refetch_on_invalidate: bool,
    /// Capacity of the [`CacheEvent`] broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_refetch_on_invalidate() -> bool {
    true
}

fn default_event_capacity() -> usize {
    64
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refetch_on_invalidate: default_refetch_on_invalidate(),
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stale: bool,
    pub updated_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn fresh(value: V) -> Self {
        Self {
            value,
            stale: false,
            updated_at: Utc::now(),
        }
    }
}

/// Change notifications published by [`QueryCache::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { key: QueryKey },
    Invalidated { key: QueryKey, matched: usize },
    Removed { key: QueryKey },
    FetchCancelled { key: QueryKey },
    Refetched { key: QueryKey },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<V> {
    Fetched(V),
    /// The read was cancelled and its result discarded
    Cancelled,
}

struct InFlightRead {
    id: u64,
    token: CancellationToken,
}

struct Inner<V> {
    entries: RwLock<HashMap<QueryKey, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<QueryKey, Vec<InFlightRead>>>,
    fetcher: RwLock<Option<Arc<dyn QueryFetcher<V>>>>,
    events: broadcast::Sender<CacheEvent>,
    config: CacheConfig,
    next_read_id: AtomicU64,
}

/// Cloneable handle to a shared in-memory cache
pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                fetcher: RwLock::new(None),
                events,
                config,
                next_read_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_fetcher<F>(self, fetcher: F) -> Self
    where
        F: QueryFetcher<V> + 'static,
    {
        self.set_fetcher(fetcher);
        self
    }

    pub fn set_fetcher<F>(&self, fetcher: F)
    where
        F: QueryFetcher<V> + 'static,
    {
        *write(&self.inner.fetcher) = Some(Arc::new(fetcher));
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Value, staleness and last write time of exactly `key`
    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        read(&self.inner.entries).get(key).cloned()
    }

    /// Whether `key` is cached and marked stale. Absent keys are not stale.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        read(&self.inner.entries)
            .get(key)
            .is_some_and(|entry| entry.stale)
    }

    /// Cached keys in sorted order
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = read(&self.inner.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        read(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner.entries).is_empty()
    }

    /// Removes `key` and every key below it, returning how many entries went away
    pub fn remove(&self, key: &QueryKey) -> usize {
        let removed: Vec<QueryKey> = {
            let mut entries = write(&self.inner.entries);
            let matched: Vec<QueryKey> = entries
                .keys()
                .filter(|k| k.starts_with(key))
                .cloned()
                .collect();
            for k in &matched {
                entries.remove(k);
            }
            matched
        };
        for k in &removed {
            self.emit(CacheEvent::Removed { key: k.clone() });
        }
        removed.len()
    }

    pub fn clear(&self) -> usize {
        self.remove(&QueryKey::new())
    }

    /// Number of tracked reads for exactly `key`
    pub fn pending_reads(&self, key: &QueryKey) -> usize {
        lock(&self.inner.in_flight).get(key).map_or(0, Vec::len)
    }

    /// Loads `key` from the registered fetcher and stores the result as fresh.
    ///
    /// The read is cancelled by [`CacheStore::cancel_pending_reads`] on `key`
    /// or any of its prefixes; a cancelled read never writes.
    pub async fn fetch(&self, key: &QueryKey) -> Result<FetchOutcome<V>, FetchError> {
        let fetcher = read(&self.inner.fetcher)
            .clone()
            .ok_or_else(|| FetchError::NoFetcher { key: key.clone() })?;

        let id = self.inner.next_read_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        lock(&self.inner.in_flight)
            .entry(key.clone())
            .or_default()
            .push(InFlightRead {
                id,
                token: token.clone(),
            });

        let result = tokio::select! {
            _ = token.cancelled() => None,
            result = fetcher.fetch(key.clone()) => Some(result),
        };

        // cancellation and the write below are serialized by the in-flight lock
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(reads) = in_flight.get_mut(key) {
            reads.retain(|read| read.id != id);
            if reads.is_empty() {
                in_flight.remove(key);
            }
        }

        match result {
            Some(Ok(value)) if !token.is_cancelled() => {
                write(&self.inner.entries).insert(key.clone(), CacheEntry::fresh(value.clone()));
                drop(in_flight);
                tracing::trace!(%key, "fetched");
                self.emit(CacheEvent::Updated { key: key.clone() });
                Ok(FetchOutcome::Fetched(value))
            }
            Some(Err(e)) if !token.is_cancelled() => Err(e),
            _ => {
                drop(in_flight);
                tracing::debug!(%key, "read cancelled, result discarded");
                self.emit(CacheEvent::FetchCancelled { key: key.clone() });
                Ok(FetchOutcome::Cancelled)
            }
        }
    }

    async fn refetch(&self, key: QueryKey) {
        match self.fetch(&key).await {
            Ok(FetchOutcome::Fetched(_)) => self.emit(CacheEvent::Refetched { key }),
            Ok(FetchOutcome::Cancelled) => {}
            Err(e) => tracing::warn!("refetch of {key} failed: {e}"),
        }
    }

    fn schedule_refetch(&self, keys: Vec<QueryKey>) {
        if !self.inner.config.refetch_on_invalidate || read(&self.inner.fetcher).is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime available, {} key(s) left stale", keys.len());
            return;
        };
        for key in keys {
            let cache = self.clone();
            handle.spawn(async move { cache.refetch(key).await });
        }
    }

    fn emit(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheStore<V> for QueryCache<V> {
    fn get(&self, key: &QueryKey) -> Option<V> {
        read(&self.inner.entries)
            .get(key)
            .map(|entry| entry.value.clone())
    }

    fn set(&self, key: &QueryKey, value: V) {
        write(&self.inner.entries).insert(key.clone(), CacheEntry::fresh(value));
        self.emit(CacheEvent::Updated { key: key.clone() });
    }

    fn invalidate(&self, key: &QueryKey) {
        let stale: Vec<QueryKey> = {
            let mut entries = write(&self.inner.entries);
            entries
                .iter_mut()
                .filter(|(k, _)| k.starts_with(key))
                .map(|(k, entry)| {
                    entry.stale = true;
                    k.clone()
                })
                .collect()
        };
        tracing::debug!(%key, matched = stale.len(), "invalidated");
        self.emit(CacheEvent::Invalidated {
            key: key.clone(),
            matched: stale.len(),
        });
        self.schedule_refetch(stale);
    }

    async fn cancel_pending_reads(&self, key: &QueryKey) {
        let mut in_flight = lock(&self.inner.in_flight);
        let mut cancelled = 0;
        in_flight.retain(|k, reads| {
            if !k.starts_with(key) {
                return true;
            }
            for read in reads.iter() {
                read.token.cancel();
                cancelled += 1;
            }
            false
        });
        if cancelled > 0 {
            tracing::debug!(%key, cancelled, "cancelled pending reads");
        }
    }
}
