//! Domain logic
//!
//! This module contains the chat domain the engine is applied to:
//! - Users, teams and memberships
//! - The chat API contract
//! - Query key factories and the mutations built on them

pub mod api;
pub mod entities;
pub mod keys;
pub mod mutations;
