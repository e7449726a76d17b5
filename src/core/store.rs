use std::sync::Arc;

use async_trait::async_trait;

use crate::core::key::QueryKey;

/// Key-value cache consumed by the mutation engine.
///
/// Implementations own the entries and their staleness. Every operation
/// that takes a key also applies to keys that have it as a prefix, except
/// `get` and `set` which address exactly one entry.
///
/// The operations cannot fail. A store backed by fallible storage logs the
/// failure and carries on; the engine never observes it.
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    /// Current cached value for exactly `key`
    fn get(&self, key: &QueryKey) -> Option<V>;

    /// Overwrites the value for exactly `key`
    fn set(&self, key: &QueryKey, value: V);

    /// Marks `key` and every key below it stale and schedules a refetch.
    /// Must not block.
    fn invalidate(&self, key: &QueryKey);

    /// Cancels in-flight reads for `key` and every key below it.
    ///
    /// Resolves once no cancelled read can write into the store anymore.
    async fn cancel_pending_reads(&self, key: &QueryKey);
}

/// Shared handle to a cache store
pub type CacheStoreRef<V> = Arc<dyn CacheStore<V>>;

#[async_trait]
impl<V, S> CacheStore<V> for Arc<S>
where
    S: CacheStore<V> + ?Sized,
{
    fn get(&self, key: &QueryKey) -> Option<V> {
        (**self).get(key)
    }

    fn set(&self, key: &QueryKey, value: V) {
        (**self).set(key, value)
    }

    fn invalidate(&self, key: &QueryKey) {
        (**self).invalidate(key)
    }

    async fn cancel_pending_reads(&self, key: &QueryKey) {
        (**self).cancel_pending_reads(key).await
    }
}
