use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{TeamMembership, TeamMembershipInput, UpdateUserInput, User};

/// Failures of a REST call. The mutation engine treats every variant alike.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("server responded with {status}: {message}")]
    Server { status: u16, message: String },
    #[error("{0}")]
    Unknown(String),
}

/// Write endpoints of the chat backend.
///
/// URL construction, headers and body encoding belong to the implementor.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn update_user(&self, input: UpdateUserInput) -> Result<User, ApiError>;

    async fn join_team(&self, input: TeamMembershipInput) -> Result<TeamMembership, ApiError>;

    async fn leave_team(&self, input: TeamMembershipInput) -> Result<(), ApiError>;
}

pub type ChatApiRef = Arc<dyn ChatApi>;
