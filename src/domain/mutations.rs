//! Chat mutations expressed as configurations of the optimistic engine
//!
//! Cached values are the JSON documents the REST API returns, so every
//! mutation here runs against a `CacheStore<serde_json::Value>`.

pub mod teams;
pub mod users;

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{
    core::{mutation::MutationOptions, snapshot::Snapshot},
    domain::api::ApiError,
};

type SuccessFn<I, T> = Arc<dyn Fn(&T, &I) + Send + Sync>;
type ErrorFn<I> = Arc<dyn Fn(&ApiError, &I, &Snapshot<Value>) + Send + Sync>;
type SettledFn = Arc<dyn Fn() + Send + Sync>;

/// Caller hooks attached to a domain mutation
pub struct MutationCallbacks<I, T> {
    on_success: Option<SuccessFn<I, T>>,
    on_error: Option<ErrorFn<I>>,
    on_settled: Option<SettledFn>,
}

impl<I, T> Default for MutationCallbacks<I, T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<I, T> fmt::Debug for MutationCallbacks<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_settled", &self.on_settled.is_some())
            .finish()
    }
}

impl<I: 'static, T: 'static> MutationCallbacks<I, T> {
    pub fn new() -> Self {
        Self::default()
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
        F: Fn(&ApiError, &I, &Snapshot<Value>) + Send + Sync + 'static,
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

    pub(crate) fn attach(
        self,
        mut options: MutationOptions<I, T, ApiError, Value>,
    ) -> MutationOptions<I, T, ApiError, Value> {
        if let Some(f) = self.on_success {
            options = options.on_success(move |result: &T, input: &I| f(result, input));
        }
        if let Some(f) = self.on_error {
            options = options.on_error(
                move |error: &ApiError, input: &I, snapshot: &Snapshot<Value>| {
                    f(error, input, snapshot)
                },
            );
        }
        if let Some(f) = self.on_settled {
            options = options.on_settled(move || f());
        }
        options
    }
}

/// Whether `value` is an object whose `field` is the string `id`
fn has_field(value: &Value, field: &str, id: &str) -> bool {
    value.get(field).and_then(Value::as_str) == Some(id)
}
