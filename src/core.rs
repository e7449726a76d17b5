//! Optimistic mutation engine
//!
//! This module contains the pieces the engine is built from:
//! - Query keys and snapshots of cached values
//! - The cache store and write operation seams
//! - The mutation lifecycle and its observable state

pub mod key;
pub mod mutation;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod write;
