//! Optimistic mutation engine
//!
//! A [`MutationController`] runs one lifecycle per call to `mutate`:
//!
//! 1. compute the affected keys from the input
//! 2. cancel in-flight reads for those keys and wait for the cancellation
//! 3. snapshot the current value of every key
//! 4. write the predicted value for every key that had one
//! 5. call the write operation (status becomes `pending`)
//! 6. on success invalidate the keys, on failure restore the snapshot
//! 7. call `on_settled`
//!
//! Concurrent attempts are not isolated from each other. Whichever attempt
//! writes a key last wins, so callers that need ordering serialize their
//! calls (for example by disabling the control that triggers the mutation
//! while it is pending).

use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use crate::core::{
    key::QueryKey,
    snapshot::Snapshot,
    status::{MutationState, MutationStatus},
    store::{CacheStore, CacheStoreRef},
    write::{WriteOperation, WriteOperationRef},
};

type AffectedKeysFn<I> = Arc<dyn Fn(&I) -> Vec<QueryKey> + Send + Sync>;
type ApplyOptimisticFn<I, V> = Arc<dyn Fn(&I, &V) -> V + Send + Sync>;
type SuccessFn<I, T> = Arc<dyn Fn(&T, &I) + Send + Sync>;
type ErrorFn<I, E, V> = Arc<dyn Fn(&E, &I, &Snapshot<V>) + Send + Sync>;
type SettledFn = Arc<dyn Fn() + Send + Sync>;

/// Configuration of a mutation: the write, its blast radius and the caller
/// callbacks.
pub struct MutationOptions<I, T, E, V> {
    write: WriteOperationRef<I, T, E>,
    affected_keys: AffectedKeysFn<I>,
    apply_optimistic: Option<ApplyOptimisticFn<I, V>>,
    on_success: Option<SuccessFn<I, T>>,
    on_error: Option<ErrorFn<I, E, V>>,
    on_settled: Option<SettledFn>,
}

impl<I, T, E, V> MutationOptions<I, T, E, V> {
    pub fn new<W, K>(write: W, affected_keys: K) -> Self
    where
        W: WriteOperation<I, T, E> + 'static,
        K: Fn(&I) -> Vec<QueryKey> + Send + Sync + 'static,
    {
        Self {
            write: Arc::new(write),
            affected_keys: Arc::new(affected_keys),
            apply_optimistic: None,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    /// A mutation that never touches the cache, only the write and callbacks
    pub fn without_cache<W>(write: W) -> Self
    where
        W: WriteOperation<I, T, E> + 'static,
    {
        Self::new(write, |_: &I| Vec::new())
    }

    /// Predicts the new value of each affected key from its previous value
    pub fn apply_optimistic<F>(mut self, f: F) -> Self
    where
        F: Fn(&I, &V) -> V + Send + Sync + 'static,
    {
        self.apply_optimistic = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &I) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&E, &I, &Snapshot<V>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_settled<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(f));
        self
    }
}

impl<I, T, E, V> fmt::Debug for MutationOptions<I, T, E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("apply_optimistic", &self.apply_optimistic.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_settled", &self.on_settled.is_some())
            .finish_non_exhaustive()
    }
}

/// Binds `options` to `store` and returns the controller callers mutate through
pub fn configure<I, T, E, V, S>(
    store: S,
    options: MutationOptions<I, T, E, V>,
) -> MutationController<I, T, E, V>
where
    S: CacheStore<V> + 'static,
{
    MutationController::new(Arc::new(store), options)
}

struct Inner<I, T, E, V> {
    store: CacheStoreRef<V>,
    options: MutationOptions<I, T, E, V>,
    state: watch::Sender<MutationState<T, E>>,
    next_attempt: AtomicU64,
    latest_attempt: AtomicU64,
}

/// Handle used by the presentation layer to trigger and observe a mutation
pub struct MutationController<I, T, E, V> {
    inner: Arc<Inner<I, T, E, V>>,
}

impl<I, T, E, V> Clone for MutationController<I, T, E, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, T, E, V> MutationController<I, T, E, V> {
    pub fn new(store: CacheStoreRef<V>, options: MutationOptions<I, T, E, V>) -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            inner: Arc::new(Inner {
                store,
                options,
                state,
                next_attempt: AtomicU64::new(0),
                latest_attempt: AtomicU64::new(0),
            }),
        }
    }

    pub fn status(&self) -> MutationStatus {
        self.inner.state.borrow().status
    }

    pub fn is_idle(&self) -> bool {
        self.status() == MutationStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status() == MutationStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status() == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status() == MutationStatus::Error
    }

    /// Receiver notified on every status transition of the latest attempt
    pub fn subscribe(&self) -> watch::Receiver<MutationState<T, E>> {
        self.inner.state.subscribe()
    }

    /// Returns to `idle`. Attempts still in flight keep running but no longer
    /// update the observable state.
    pub fn reset(&self) {
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.latest_attempt.store(attempt, Ordering::SeqCst);
        self.inner.state.send_replace(MutationState::default());
    }

    fn begin_attempt(&self) -> u64 {
        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.latest_attempt.store(attempt, Ordering::SeqCst);
        attempt
    }

    fn publish(&self, attempt: u64, transition: impl FnOnce(&mut MutationState<T, E>)) {
        self.inner.state.send_if_modified(|state| {
            if self.inner.latest_attempt.load(Ordering::SeqCst) != attempt {
                tracing::trace!(attempt, "superseded attempt, state not published");
                return false;
            }
            transition(state);
            true
        });
    }
}

impl<I, T, E, V> MutationController<I, T, E, V>
where
    I: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts a mutation attempt in the background.
    ///
    /// The outcome is reported through the callbacks and the observable state;
    /// the returned handle may be dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn mutate(&self, input: I) -> JoinHandle<Result<T, E>> {
        let attempt = self.begin_attempt();
        let span = tracing::debug_span!("mutation", attempt);
        let this = self.clone();
        tokio::spawn(async move { this.run_attempt(attempt, input).instrument(span).await })
    }

    /// Runs a mutation attempt and waits for the write's outcome.
    ///
    /// Callbacks and cache effects are the same as with [`Self::mutate`]. The
    /// attempt runs on its own task, so dropping the returned future only
    /// stops waiting: the attempt still rolls back or invalidates and settles.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, when a callback panicked,
    /// or when the runtime shut down before the attempt finished.
    pub async fn mutate_async(&self, input: I) -> Result<T, E> {
        match self.mutate(input).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => panic!("mutation task did not finish: {e}"),
        }
    }

    async fn run_attempt(&self, attempt: u64, input: I) -> Result<T, E> {
        let store = &self.inner.store;
        let options = &self.inner.options;

        let keys = dedup_keys((options.affected_keys)(&input));

        if !keys.is_empty() {
            tracing::trace!(keys = keys.len(), "cancelling pending reads");
            futures::future::join_all(keys.iter().map(|key| store.cancel_pending_reads(key)))
                .await;
        }

        let snapshot = Snapshot::new(
            keys.iter()
                .map(|key| (key.clone(), store.get(key)))
                .collect(),
        );

        if let Some(apply) = &options.apply_optimistic {
            for (key, previous) in snapshot.captured() {
                tracing::trace!(%key, "applying optimistic value");
                store.set(key, apply(&input, previous));
            }
        }

        self.publish(attempt, MutationState::pending);
        tracing::debug!("write issued");

        let outcome = options.write.write(input.clone()).await;

        match &outcome {
            Ok(result) => {
                tracing::debug!("write succeeded");
                self.publish(attempt, |state| state.succeeded(result.clone()));
                for key in &keys {
                    store.invalidate(key);
                }
                if let Some(on_success) = &options.on_success {
                    on_success(result, &input);
                }
            }
            Err(error) => {
                tracing::debug!("write failed, rolling back {} key(s)", snapshot.len());
                self.publish(attempt, |state| state.failed(error.clone()));
                for (key, previous) in snapshot.captured() {
                    store.set(key, previous.clone());
                }
                if let Some(on_error) = &options.on_error {
                    on_error(error, &input, &snapshot);
                }
            }
        }

        if let Some(on_settled) = &options.on_settled {
            on_settled();
        }

        outcome
    }
}

impl<I, T, E, V> MutationController<I, T, E, V>
where
    T: Clone,
    E: Clone,
{
    /// Current status, last result and last error
    pub fn state(&self) -> MutationState<T, E> {
        self.inner.state.borrow().clone()
    }
}

fn dedup_keys(keys: Vec<QueryKey>) -> Vec<QueryKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter().filter(|key| seen.insert(key.clone())).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        query_key,
        test_helpers::{gated_write, RecordingStore, StoreCall},
    };

    fn user_key(id: &str) -> QueryKey {
        query_key!["users", "detail", id]
    }

    fn rename(input: &Value, previous: &Value) -> Value {
        let mut next = previous.clone();
        next["name"] = input["name"].clone();
        next
    }

    #[tokio::test]
    async fn test_success_invalidates_and_keeps_optimistic_value() {
        let store = Arc::new(RecordingStore::new().with_value(user_key("u1"), json!({"name": "John"})));
        let (write, gate) = gated_write::<Value, Value, String>();
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(write.clone(), |input: &Value| {
                vec![user_key(input["user_id"].as_str().unwrap_or_default())]
            })
            .apply_optimistic(rename),
        );

        let handle = controller.mutate(json!({"user_id": "u1", "name": "Johnny"}));
        let mut rx = controller.subscribe();
        rx.wait_for(|s| s.is_pending()).await.unwrap();

        assert_eq!(store.value(&user_key("u1")), Some(json!({"name": "Johnny"})));

        gate.resolve(Ok(json!({"name": "Johnny", "id": "u1"})));
        let result = handle.await.unwrap();

        assert_eq!(result, Ok(json!({"name": "Johnny", "id": "u1"})));
        assert_eq!(store.invalidated(), vec![user_key("u1")]);
        assert_eq!(store.value(&user_key("u1")), Some(json!({"name": "Johnny"})));
        assert_eq!(write.call_count(), 1);
        assert!(controller.is_success());
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot() {
        let store = Arc::new(
            RecordingStore::new()
                .with_value(user_key("u1"), json!({"name": "John"}))
                .with_value(query_key!["users", "current"], json!({"id": "u1", "name": "John"})),
        );
        let (write, gate) = gated_write::<Value, Value, String>();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_cb = Arc::clone(&seen);
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(write, |_: &Value| {
                vec![
                    query_key!["users", "detail", "u1"],
                    query_key!["users", "current"],
                    query_key!["users", "detail", "missing"],
                ]
            })
            .apply_optimistic(rename)
            .on_error(move |error: &String, _input: &Value, snapshot: &Snapshot<Value>| {
                *seen_in_cb.lock().unwrap() = Some((error.clone(), snapshot.clone()));
            }),
        );

        let handle = controller.mutate(json!({"name": "Johnny"}));
        controller
            .subscribe()
            .wait_for(|s| s.is_pending())
            .await
            .unwrap();
        assert_eq!(
            store.value(&query_key!["users", "current"]),
            Some(json!({"id": "u1", "name": "Johnny"}))
        );

        gate.resolve(Err("Update failed".to_string()));
        assert_eq!(handle.await.unwrap(), Err("Update failed".to_string()));

        assert_eq!(store.value(&user_key("u1")), Some(json!({"name": "John"})));
        assert_eq!(
            store.value(&query_key!["users", "current"]),
            Some(json!({"id": "u1", "name": "John"}))
        );
        assert_eq!(store.value(&user_key("missing")), None);
        assert!(store.invalidated().is_empty());

        let (error, snapshot) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(error, "Update failed");
        assert_eq!(snapshot.get(&user_key("u1")), Some(&json!({"name": "John"})));
        assert_eq!(snapshot.len(), 3);

        let state = controller.state();
        assert_eq!(state.status, MutationStatus::Error);
        assert_eq!(state.error.as_deref(), Some("Update failed"));
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let store = Arc::new(RecordingStore::new().with_value(query_key!["k"], 1));
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(
                |n: i64| async move { Ok::<_, String>(n) },
                |_: &i64| vec![query_key!["k"]],
            )
            .apply_optimistic(|n: &i64, prev: &i64| prev + n),
        );

        controller.mutate_async(10).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::CancelPendingReads(query_key!["k"]),
                StoreCall::Get(query_key!["k"]),
                StoreCall::Set(query_key!["k"], 11),
                StoreCall::Invalidate(query_key!["k"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_processed_once() {
        let store = Arc::new(RecordingStore::new().with_value(query_key!["k"], 1));
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(
                |n: i64| async move { Ok::<_, String>(n) },
                |_: &i64| vec![query_key!["k"], query_key!["k"]],
            )
            .apply_optimistic(|n: &i64, prev: &i64| prev + n),
        );

        controller.mutate_async(10).await.unwrap();

        assert_eq!(store.invalidated(), vec![query_key!["k"]]);
        assert_eq!(store.value(&query_key!["k"]), Some(11));
    }

    #[tokio::test]
    async fn test_state_follows_latest_attempt() {
        let store = Arc::new(RecordingStore::<i64>::new());
        let (write, gate) = gated_write::<i64, i64, String>();
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(write, |_: &i64| Vec::new()),
        );

        let first = controller.mutate(1);
        let second = controller.mutate(2);
        let mut rx = controller.subscribe();
        rx.wait_for(|s| s.is_pending()).await.unwrap();
        tokio::task::yield_now().await;

        // responses are handed out in call order
        gate.resolve(Ok(1));
        gate.resolve(Err("second failed".to_string()));

        assert_eq!(first.await.unwrap(), Ok(1));
        assert_eq!(second.await.unwrap(), Err("second failed".to_string()));

        let state = controller.state();
        assert_eq!(state.status, MutationStatus::Error);
        assert_eq!(state.data, None);
        assert_eq!(state.error.as_deref(), Some("second failed"));
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let controller = configure(
            RecordingStore::<i64>::new(),
            MutationOptions::without_cache(|n: i64| async move { Ok::<_, String>(n) }),
        );

        controller.mutate_async(3).await.unwrap();
        assert_eq!(controller.state().data, Some(3));

        controller.reset();
        assert!(controller.is_idle());
        assert_eq!(controller.state().data, None);
    }

    #[tokio::test]
    async fn test_abandoned_mutate_async_still_rolls_back_and_settles() {
        let store = Arc::new(RecordingStore::new().with_value(query_key!["k"], 1));
        let (write, gate) = gated_write::<i64, i64, String>();
        let settled = Arc::new(Mutex::new(0));
        let settled_in_cb = Arc::clone(&settled);
        let controller = configure(
            Arc::clone(&store),
            MutationOptions::new(write, |_: &i64| vec![query_key!["k"]])
                .apply_optimistic(|n: &i64, prev: &i64| prev + n)
                .on_settled(move || *settled_in_cb.lock().unwrap() += 1),
        );

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            controller.mutate_async(10),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(store.value(&query_key!["k"]), Some(11));

        gate.resolve(Err("offline".to_string()));
        controller
            .subscribe()
            .wait_for(|s| s.status.is_terminal())
            .await
            .unwrap();
        while *settled.lock().unwrap() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.value(&query_key!["k"]), Some(1));
        assert_eq!(*settled.lock().unwrap(), 1);
        assert!(controller.is_error());
    }
}
