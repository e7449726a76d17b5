use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a single mutation attempt
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

impl MutationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationStatus::Success | MutationStatus::Error)
    }
}

/// What a presentation layer needs to render loading, success and error UI
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<T, E> {
    pub status: MutationStatus,
    /// Result of the last successful attempt
    pub data: Option<T>,
    /// Error of the last failed attempt
    pub error: Option<E>,
}

impl<T, E> Default for MutationState<T, E> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

impl<T, E> MutationState<T, E> {
    pub fn is_idle(&self) -> bool {
        self.status == MutationStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == MutationStatus::Pending
    }

    pub fn is_success(&self) -> bool {
        self.status == MutationStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == MutationStatus::Error
    }

    pub(crate) fn pending(&mut self) {
        self.status = MutationStatus::Pending;
        self.error = None;
    }

    pub(crate) fn succeeded(&mut self, data: T) {
        self.status = MutationStatus::Success;
        self.data = Some(data);
        self.error = None;
    }

    pub(crate) fn failed(&mut self, error: E) {
        self.status = MutationStatus::Error;
        self.error = Some(error);
    }
}
