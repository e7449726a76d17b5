//! # Optimistic - optimistic mutations over a keyed query cache
//!
//! Applies the expected result of a server write to cached query data before
//! the server confirms it. On success the affected entries are invalidated so
//! they are refetched; on failure the values captured before the write are
//! put back.
//!
//! ## Lifecycle
//!
//! Every call to [`MutationController::mutate`] runs the same steps:
//!
//! 1. Cancel pending reads for the affected keys
//! 2. Snapshot the affected entries
//! 3. Apply the optimistic update (if configured)
//! 4. Issue the write
//! 5. Invalidate and call `on_success`, or roll back and call `on_error`
//! 6. Call `on_settled`
//!
//! ## Example Usage
//!
//! ```rust
//! use optimistic::{configure, query_key, MutationOptions, QueryCache};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: QueryCache<i64> = QueryCache::default();
//! optimistic::CacheStore::set(&cache, &query_key!("counter"), 1);
//!
//! let increment = configure(
//!     cache.clone(),
//!     MutationOptions::new(
//!         |by: i64| async move { Ok::<_, String>(by) },
//!         |_: &i64| vec![query_key!("counter")],
//!     )
//!     .apply_optimistic(|by: &i64, current: &i64| current + by),
//! );
//!
//! increment.mutate_async(2).await.unwrap();
//! assert!(increment.is_success());
//! assert!(cache.is_stale(&query_key!("counter")));
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`core`] - Mutation engine, cache store contract and write operation
//! - [`domain`] - Chat entities, API contract and mutations
//! - [`infrastructure`] - Query cache, simulated API, CLI and configuration
//! - [`utils`] - Logging, panic handling and paths

pub mod app;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod test_helpers;
pub mod utils;

pub use crate::core::{
    key::{KeySegment, QueryKey},
    mutation::{configure, MutationController, MutationOptions},
    snapshot::Snapshot,
    status::{MutationState, MutationStatus},
    store::{CacheStore, CacheStoreRef},
    write::WriteOperation,
};
pub use infrastructure::query_cache::QueryCache;

/// Result type used throughout the library
pub type Result<T> = color_eyre::eyre::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
