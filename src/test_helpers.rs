//! Fakes for exercising the mutation engine without a real cache or network

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::{key::QueryKey, store::CacheStore, write::WriteOperation};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call observed by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall<V> {
    Get(QueryKey),
    Set(QueryKey, V),
    Invalidate(QueryKey),
    CancelPendingReads(QueryKey),
}

/// Cache store that keeps exact-key values and records every call made
/// through the [`CacheStore`] interface.
pub struct RecordingStore<V> {
    values: Mutex<HashMap<QueryKey, V>>,
    calls: Mutex<Vec<StoreCall<V>>>,
}

impl<V: Clone> RecordingStore<V> {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Seeds a value without recording a call
    pub fn with_value(self, key: QueryKey, value: V) -> Self {
        lock(&self.values).insert(key, value);
        self
    }

    /// Reads a value without recording a call
    pub fn value(&self, key: &QueryKey) -> Option<V> {
        lock(&self.values).get(key).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall<V>> {
        lock(&self.calls).clone()
    }

    pub fn invalidated(&self) -> Vec<QueryKey> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                StoreCall::Invalidate(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(QueryKey, V)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                StoreCall::Set(key, value) => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }
}

impl<V: Clone> Default for RecordingStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> CacheStore<V> for RecordingStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &QueryKey) -> Option<V> {
        lock(&self.calls).push(StoreCall::Get(key.clone()));
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &QueryKey, value: V) {
        lock(&self.calls).push(StoreCall::Set(key.clone(), value.clone()));
        lock(&self.values).insert(key.clone(), value);
    }

    fn invalidate(&self, key: &QueryKey) {
        lock(&self.calls).push(StoreCall::Invalidate(key.clone()));
    }

    async fn cancel_pending_reads(&self, key: &QueryKey) {
        lock(&self.calls).push(StoreCall::CancelPendingReads(key.clone()));
    }
}

/// Write operation that records its inputs and blocks until the paired
/// [`WriteGate`] hands it a response. Responses are consumed in call order.
pub struct GatedWrite<I, T, E> {
    inputs: Arc<Mutex<Vec<I>>>,
    responses: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<T, E>>>>,
}

impl<I, T, E> Clone for GatedWrite<I, T, E> {
    fn clone(&self) -> Self {
        Self {
            inputs: Arc::clone(&self.inputs),
            responses: Arc::clone(&self.responses),
        }
    }
}

impl<I: Clone, T, E> GatedWrite<I, T, E> {
    pub fn call_count(&self) -> usize {
        lock(&self.inputs).len()
    }

    pub fn inputs(&self) -> Vec<I> {
        lock(&self.inputs).clone()
    }
}

/// Releases pending [`GatedWrite`] calls
pub struct WriteGate<T, E> {
    tx: mpsc::UnboundedSender<Result<T, E>>,
}

impl<T, E> WriteGate<T, E> {
    pub fn resolve(&self, response: Result<T, E>) {
        // the receiver lives as long as any GatedWrite clone
        let _ = self.tx.send(response);
    }
}

pub fn gated_write<I, T, E>() -> (GatedWrite<I, T, E>, WriteGate<T, E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        GatedWrite {
            inputs: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(tokio::sync::Mutex::new(rx)),
        },
        WriteGate { tx },
    )
}

#[async_trait]
impl<I, T, E> WriteOperation<I, T, E> for GatedWrite<I, T, E>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    #[allow(clippy::expect_used)]
    async fn write(&self, input: I) -> Result<T, E> {
        lock(&self.inputs).push(input);
        let mut responses = self.responses.lock().await;
        responses
            .recv()
            .await
            .expect("WriteGate dropped while a write was pending")
    }
}
