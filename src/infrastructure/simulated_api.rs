//! In-process stand-in for the chat REST backend
//!
//! Serves both sides of the cache: the write endpoints of [`ChatApi`] and,
//! as a [`QueryFetcher`], the read endpoints behind each query key. Used by
//! the demo binary and by tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    core::key::{KeySegment, QueryKey},
    domain::{
        api::{ApiError, ChatApi},
        entities::{Team, TeamMembership, TeamMembershipInput, TeamRole, UpdateUserInput, User},
    },
    infrastructure::query_cache::{FetchError, QueryFetcher},
};

#[derive(Clone, Debug, Deserialize)]
pub struct ApiConfig {
    /// Delay applied to every request
    #[serde(default)]
    pub latency_ms: u64,
    /// Message of the server error returned when failures are requested
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
}

fn default_failure_message() -> String {
    String::from("Update failed")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            failure_message: default_failure_message(),
        }
    }
}

#[derive(Default)]
struct Backend {
    users: HashMap<String, User>,
    teams: HashMap<String, Team>,
    memberships: Vec<TeamMembership>,
    current_user: Option<String>,
}

struct Shared {
    backend: Mutex<Backend>,
    calls: AtomicUsize,
    released: watch::Sender<bool>,
}

/// Cloneable handle; clones share the same backend state
#[derive(Clone)]
pub struct SimulatedApi {
    shared: Arc<Shared>,
    latency: Duration,
    failure: Option<ApiError>,
}

/// Returned by [`SimulatedApi::hold`]; writes wait until it is released
pub struct Hold {
    shared: Arc<Shared>,
}

impl Hold {
    pub fn release(&self) {
        self.shared.released.send_replace(true);
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.release();
    }
}

impl Default for SimulatedApi {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedApi {
    pub fn new() -> Self {
        let (released, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                backend: Mutex::new(Backend::default()),
                calls: AtomicUsize::new(0),
                released,
            }),
            latency: Duration::ZERO,
            failure: None,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new().with_latency(Duration::from_millis(config.latency_ms))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every write made through this handle fails with `error`
    pub fn failing(mut self, error: ApiError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn with_user(self, user: User) -> Self {
        self.backend().users.insert(user.id.clone(), user);
        self
    }

    pub fn with_current_user(self, user_id: impl Into<String>) -> Self {
        self.backend().current_user = Some(user_id.into());
        self
    }

    pub fn with_team(self, team: Team) -> Self {
        self.backend().teams.insert(team.id.clone(), team);
        self
    }

    pub fn with_membership(self, team_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.backend().memberships.push(TeamMembership {
            team_id: team_id.into(),
            user_id: user_id.into(),
            role: TeamRole::Member,
        });
        self
    }

    /// Makes subsequent writes wait until the returned [`Hold`] is released
    pub fn hold(&self) -> Hold {
        self.shared.released.send_replace(false);
        Hold {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of write requests received
    pub fn call_count(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    fn backend(&self) -> MutexGuard<'_, Backend> {
        self.shared
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn round_trip(&self) -> Result<(), ApiError> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        let mut released = self.shared.released.subscribe();
        // the sender lives in `self`, so this only ends once released
        let _ = released.wait_for(|released| *released).await;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn read(&self, key: &QueryKey) -> Option<Value> {
        let backend = self.backend();
        let segments: Vec<String> = key.segments().iter().map(KeySegment::to_string).collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["users", "current"] => backend
                .current_user
                .as_ref()
                .and_then(|id| backend.users.get(id))
                .and_then(|user| serde_json::to_value(user).ok()),
            ["users", "detail", id] => backend
                .users
                .get(*id)
                .and_then(|user| serde_json::to_value(user).ok()),
            ["teams", "list"] => {
                let current = backend.current_user.as_deref()?;
                let teams: Vec<&Team> = backend
                    .memberships
                    .iter()
                    .filter(|m| m.user_id == current)
                    .filter_map(|m| backend.teams.get(&m.team_id))
                    .collect();
                serde_json::to_value(teams).ok()
            }
            ["teams", "members", team_id] => {
                let members: Vec<&TeamMembership> = backend
                    .memberships
                    .iter()
                    .filter(|m| m.team_id == *team_id)
                    .collect();
                serde_json::to_value(members).ok()
            }
            _ => None,
        }
    }
}

#[async_trait]
impl ChatApi for SimulatedApi {
    async fn update_user(&self, input: UpdateUserInput) -> Result<User, ApiError> {
        self.round_trip().await?;
        tracing::debug!("PATCH /users/{}", input.user_id);
        if input.name.as_deref().is_some_and(str::is_empty) {
            return Err(ApiError::Validation(String::from("name must not be empty")));
        }
        let mut backend = self.backend();
        let user = backend
            .users
            .get_mut(&input.user_id)
            .ok_or_else(|| ApiError::Server {
                status: 404,
                message: format!("user {} not found", input.user_id),
            })?;
        *user = input.apply_to(user);
        Ok(user.clone())
    }

    async fn join_team(&self, input: TeamMembershipInput) -> Result<TeamMembership, ApiError> {
        self.round_trip().await?;
        tracing::debug!("POST /teams/{}/members", input.team_id);
        let membership = TeamMembership {
            team_id: input.team_id,
            user_id: input.user_id,
            role: TeamRole::Member,
        };
        let mut backend = self.backend();
        if !backend.memberships.contains(&membership) {
            backend.memberships.push(membership.clone());
        }
        Ok(membership)
    }

    async fn leave_team(&self, input: TeamMembershipInput) -> Result<(), ApiError> {
        self.round_trip().await?;
        tracing::debug!("DELETE /teams/{}/members/{}", input.team_id, input.user_id);
        self.backend()
            .memberships
            .retain(|m| !(m.team_id == input.team_id && m.user_id == input.user_id));
        Ok(())
    }
}

#[async_trait]
impl QueryFetcher<Value> for SimulatedApi {
    async fn fetch(&self, key: QueryKey) -> Result<Value, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.read(&key)
            .ok_or_else(|| FetchError::failed(&key, "not found"))
    }
}
