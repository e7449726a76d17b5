use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::Notify;

use optimistic::{
    domain::{
        api::{ApiError, ChatApiRef},
        entities::{Team, TeamMembershipInput, UpdateUserInput, User},
        keys,
        mutations::{
            teams::{join_team_mutation, leave_team_mutation},
            users::update_user_mutation,
            MutationCallbacks,
        },
    },
    infrastructure::{
        query_cache::{CacheConfig, FetchError, FetchOutcome},
        simulated_api::SimulatedApi,
    },
    CacheStore, QueryCache, QueryKey,
};

fn api() -> SimulatedApi {
    SimulatedApi::new()
        .with_user(User::new("u1", "John"))
        .with_user(User::new("u2", "Jane"))
        .with_current_user("u1")
        .with_team(Team::new("t1", "General"))
        .with_team(Team::new("t2", "Random"))
        .with_team(Team::new("t3", "Design"))
        .with_membership("t1", "u1")
        .with_membership("t2", "u1")
}

async fn primed(api: &SimulatedApi, keys: &[QueryKey]) -> QueryCache<Value> {
    let cache = QueryCache::default().with_fetcher(api.clone());
    for key in keys {
        cache.fetch(key).await.unwrap();
    }
    cache
}

async fn wait_for_refetch(cache: &QueryCache<Value>, key: &QueryKey) {
    let mut events = cache.subscribe();
    tokio::time::timeout(Duration::from_secs(1), async {
        while cache.is_stale(key) {
            let _ = events.recv().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_rename_shows_immediately_then_refetches() {
    let api = api();
    let cache = primed(&api, &[keys::users::detail("u1"), keys::users::current()]).await;
    let hold = api.hold();
    let mutation = update_user_mutation(
        cache.clone(),
        Arc::new(api.clone()),
        MutationCallbacks::new(),
    );

    let handle = mutation.mutate(UpdateUserInput::new("u1").name("Johnny"));
    mutation
        .subscribe()
        .wait_for(|s| s.is_pending())
        .await
        .unwrap();
    assert_eq!(
        cache.get(&keys::users::current()),
        Some(json!({"id": "u1", "name": "Johnny"}))
    );

    hold.release();
    let user = handle.await.unwrap().unwrap();
    assert_eq!(user.name, "Johnny");

    wait_for_refetch(&cache, &keys::users::current()).await;
    wait_for_refetch(&cache, &keys::users::detail("u1")).await;
    assert_eq!(
        cache.get(&keys::users::detail("u1")),
        Some(json!({"id": "u1", "name": "Johnny"}))
    );
}

#[tokio::test]
async fn test_rejected_rename_restores_both_entries() {
    let api = api();
    let cache = primed(&api, &[keys::users::detail("u1"), keys::users::current()]).await;
    let failing: ChatApiRef = Arc::new(api.clone().failing(ApiError::Network(
        "connection reset".to_string(),
    )));
    let mutation = update_user_mutation(cache.clone(), failing, MutationCallbacks::new());

    let error = mutation
        .mutate_async(UpdateUserInput::new("u1").name("Johnny"))
        .await
        .unwrap_err();

    assert_eq!(error, ApiError::Network("connection reset".to_string()));
    for key in [keys::users::detail("u1"), keys::users::current()] {
        assert_eq!(cache.get(&key), Some(json!({"id": "u1", "name": "John"})));
        assert!(!cache.is_stale(&key));
    }
}

#[tokio::test]
async fn test_renaming_another_user_leaves_current_user_alone() {
    let api = api();
    let cache = primed(
        &api,
        &[keys::users::detail("u2"), keys::users::current()],
    )
    .await;
    let hold = api.hold();
    let mutation = update_user_mutation(
        cache.clone(),
        Arc::new(api.clone()),
        MutationCallbacks::new(),
    );

    let handle = mutation.mutate(UpdateUserInput::new("u2").name("Janet"));
    mutation
        .subscribe()
        .wait_for(|s| s.is_pending())
        .await
        .unwrap();

    assert_eq!(
        cache.get(&keys::users::detail("u2")),
        Some(json!({"id": "u2", "name": "Janet"}))
    );
    assert_eq!(
        cache.get(&keys::users::current()),
        Some(json!({"id": "u1", "name": "John"}))
    );

    hold.release();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_leave_hides_team_until_rejected() {
    let api = api();
    let cache = primed(&api, &[keys::teams::list()]).await;
    let before = cache.get(&keys::teams::list());
    let hold = api.hold();
    let failing: ChatApiRef = Arc::new(api.clone().failing(ApiError::Server {
        status: 500,
        message: "Update failed".to_string(),
    }));
    let mutation = leave_team_mutation(cache.clone(), failing, MutationCallbacks::new());

    let handle = mutation.mutate(TeamMembershipInput::new("t1", "u1"));
    mutation
        .subscribe()
        .wait_for(|s| s.is_pending())
        .await
        .unwrap();
    assert_eq!(
        cache.get(&keys::teams::list()),
        Some(json!([{"id": "t2", "name": "Random"}]))
    );

    hold.release();
    handle.await.unwrap().unwrap_err();
    assert_eq!(cache.get(&keys::teams::list()), before);
}

#[tokio::test]
async fn test_join_waits_for_server_before_showing_team() {
    let api = api();
    let cache = primed(&api, &[keys::teams::list()]).await;
    let hold = api.hold();
    let mutation = join_team_mutation(
        cache.clone(),
        Arc::new(api.clone()),
        MutationCallbacks::new(),
    );

    let handle = mutation.mutate(TeamMembershipInput::new("t3", "u1"));
    mutation
        .subscribe()
        .wait_for(|s| s.is_pending())
        .await
        .unwrap();
    assert_eq!(
        cache
            .get(&keys::teams::list())
            .and_then(|teams| teams.as_array().map(Vec::len)),
        Some(2)
    );

    hold.release();
    let membership = handle.await.unwrap().unwrap();
    assert_eq!(membership.team_id, "t3");

    wait_for_refetch(&cache, &keys::teams::list()).await;
    assert_eq!(
        cache
            .get(&keys::teams::list())
            .and_then(|teams| teams.as_array().map(Vec::len)),
        Some(3)
    );
}

#[tokio::test]
async fn test_mutation_discards_inflight_read() {
    let key = keys::users::current();
    let release_fetch = Arc::new(Notify::new());
    let gate = Arc::clone(&release_fetch);
    let cache: QueryCache<Value> = QueryCache::new(CacheConfig {
        refetch_on_invalidate: false,
        ..CacheConfig::default()
    })
    .with_fetcher(move |_: QueryKey| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok::<_, FetchError>(json!({"id": "u1", "name": "stale read"}))
        }
    });
    cache.set(&key, json!({"id": "u1", "name": "John"}));

    let reader = cache.clone();
    let read_key = key.clone();
    let read = tokio::spawn(async move { reader.fetch(&read_key).await });
    while cache.pending_reads(&key) == 0 {
        tokio::task::yield_now().await;
    }

    let mutation = update_user_mutation(
        cache.clone(),
        Arc::new(api()),
        MutationCallbacks::new(),
    );
    mutation
        .mutate_async(UpdateUserInput::new("u1").name("Johnny"))
        .await
        .unwrap();
    release_fetch.notify_one();

    assert!(matches!(read.await.unwrap(), Ok(FetchOutcome::Cancelled)));
    assert_eq!(cache.get(&key), Some(json!({"id": "u1", "name": "Johnny"})));
    assert!(cache.is_stale(&key));
}
