//! Demo runner
//!
//! Seeds a [`SimulatedApi`] from the configured fixtures, primes a
//! [`QueryCache`] from it, runs one chat mutation and prints what the cache
//! shows before the request, while it is pending and after it settles.

use std::{fmt::Debug, sync::Arc, time::Duration};

use color_eyre::eyre::{eyre, Result};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    core::{key::QueryKey, mutation::MutationController, store::CacheStore},
    domain::{
        api::{ApiError, ChatApiRef},
        entities::{TeamMembershipInput, UpdateUserInput},
        mutations::{
            teams::{join_team_mutation, leave_team_mutation, membership_keys},
            users::{update_user_mutation, user_keys},
            MutationCallbacks,
        },
    },
    infrastructure::{
        cli::Command,
        config::{Config, Fixtures},
        query_cache::{CacheEvent, FetchOutcome, QueryCache},
        simulated_api::SimulatedApi,
    },
    trace_dbg,
};

/// How long to wait for invalidated entries to be refetched
const REFETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct App {
    config: Config,
    cache: QueryCache<Value>,
    api: SimulatedApi,
}

impl App {
    pub fn new(config: Config) -> Self {
        let api = seed(SimulatedApi::from_config(&config.api), &config.fixtures);
        let cache = QueryCache::new(config.cache.clone()).with_fetcher(api.clone());
        Self { config, cache, api }
    }

    pub fn cache(&self) -> &QueryCache<Value> {
        &self.cache
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        tracing::info!("running {command:?}");
        let api: ChatApiRef = if command.should_fail() {
            Arc::new(self.api.clone().failing(ApiError::Server {
                status: 500,
                message: self.config.api.failure_message.clone(),
            }))
        } else {
            Arc::new(self.api.clone())
        };

        match command {
            Command::UpdateUser { user_id, name, .. } => {
                let input = UpdateUserInput::new(user_id).name(name);
                let affected = user_keys(&input);
                let mutation = update_user_mutation(self.cache.clone(), api, callbacks());
                self.drive(mutation, input, affected).await
            }
            Command::JoinTeam {
                team_id, user_id, ..
            } => {
                let input = TeamMembershipInput::new(team_id, user_id);
                let affected = membership_keys(&input);
                let mutation = join_team_mutation(self.cache.clone(), api, callbacks());
                self.drive(mutation, input, affected).await
            }
            Command::LeaveTeam {
                team_id, user_id, ..
            } => {
                let input = TeamMembershipInput::new(team_id, user_id);
                let affected = membership_keys(&input);
                let mutation = leave_team_mutation(self.cache.clone(), api, callbacks());
                self.drive(mutation, input, affected).await
            }
        }
    }

    async fn drive<I, T>(
        &self,
        mutation: MutationController<I, T, ApiError, Value>,
        input: I,
        affected: Vec<QueryKey>,
    ) -> Result<()>
    where
        I: Clone + Debug + Send + Sync + 'static,
        T: Clone + Debug + Send + Sync + 'static,
    {
        self.prime(&affected).await;
        self.print("before", &affected);

        let mut events = self.cache.subscribe();
        let handle = mutation.mutate(trace_dbg!(input));
        mutation
            .subscribe()
            .wait_for(|state| state.is_pending() || state.status.is_terminal())
            .await?;
        self.print("pending", &affected);

        let outcome = handle.await?;
        if outcome.is_ok() && self.config.cache.refetch_on_invalidate {
            self.wait_until_fresh(&affected, &mut events).await;
        }
        self.print("settled", &affected);

        let state = mutation.state();
        println!("status: {}", state.status);
        match (state.data, state.error) {
            (_, Some(error)) => Err(eyre!("mutation failed: {error}")),
            (Some(data), _) => {
                println!("result: {data:?}");
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    async fn prime(&self, keys: &[QueryKey]) {
        for key in keys {
            match self.cache.fetch(key).await {
                Ok(FetchOutcome::Fetched(_)) => {}
                Ok(FetchOutcome::Cancelled) => tracing::debug!("priming {key} was cancelled"),
                Err(e) => tracing::debug!("{key} not primed: {e}"),
            }
        }
    }

    async fn wait_until_fresh(
        &self,
        keys: &[QueryKey],
        events: &mut tokio::sync::broadcast::Receiver<CacheEvent>,
    ) {
        let wait = async {
            while keys.iter().any(|key| self.cache.is_stale(key)) {
                match events.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        };
        if tokio::time::timeout(REFETCH_TIMEOUT, wait).await.is_err() {
            tracing::warn!("timed out waiting for refetch");
        }
    }

    fn print(&self, phase: &str, keys: &[QueryKey]) {
        println!("[{phase}]");
        for key in keys {
            match self.cache.entry(key) {
                Some(entry) => {
                    let marker = if entry.stale { " (stale)" } else { "" };
                    println!(
                        "  {:<24} {}{marker} @ {}",
                        key.to_string(),
                        entry.value,
                        entry.updated_at.format("%H:%M:%S%.3f")
                    );
                }
                None => println!("  {:<24} <absent>", key.to_string()),
            }
        }
    }
}

fn callbacks<I: 'static, T: Debug + 'static>() -> MutationCallbacks<I, T> {
    MutationCallbacks::new()
        .on_success(|result: &T, _: &I| tracing::info!("server confirmed: {result:?}"))
        .on_error(|error, _, snapshot| {
            tracing::info!("server rejected: {error}, restored {} key(s)", snapshot.len())
        })
        .on_settled(|| tracing::debug!("settled"))
}

fn seed(api: SimulatedApi, fixtures: &Fixtures) -> SimulatedApi {
    let mut api = fixtures
        .users
        .iter()
        .cloned()
        .fold(api, SimulatedApi::with_user);
    api = fixtures
        .teams
        .iter()
        .cloned()
        .fold(api, SimulatedApi::with_team);
    api = fixtures.memberships.iter().fold(api, |api, m| {
        api.with_membership(m.team_id.clone(), m.user_id.clone())
    });
    match &fixtures.current_user {
        Some(id) => api.with_current_user(id.clone()),
        None => api,
    }
}
