use std::{future::Future, sync::Arc};

use async_trait::async_trait;

/// Asynchronous remote write returning the authoritative entity.
///
/// Every failure kind (transport, validation, server) surfaces as `Err`;
/// the engine does not look inside `E`.
#[async_trait]
pub trait WriteOperation<I, T, E>: Send + Sync {
    async fn write(&self, input: I) -> Result<T, E>;
}

#[async_trait]
impl<I, T, E, F, Fut> WriteOperation<I, T, E> for F
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn write(&self, input: I) -> Result<T, E> {
        (self)(input).await
    }
}

/// Shared handle to a write operation
pub type WriteOperationRef<I, T, E> = Arc<dyn WriteOperation<I, T, E>>;
