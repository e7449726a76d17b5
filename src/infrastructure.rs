//! Infrastructure layer
//!
//! This module handles the concrete backends and process setup:
//! - In-memory query cache
//! - Simulated chat API
//! - CLI argument processing
//! - Configuration loading

pub mod cli;
pub mod config;
pub mod query_cache;
pub mod simulated_api;
