use serde_json::Value;

use crate::{
    core::{
        key::QueryKey,
        mutation::{configure, MutationController, MutationOptions},
        store::CacheStore,
    },
    domain::{
        api::{ApiError, ChatApiRef},
        entities::{UpdateUserInput, User},
        keys,
        mutations::{has_field, MutationCallbacks},
    },
};

pub type UpdateUserMutation = MutationController<UpdateUserInput, User, ApiError, Value>;

/// Entries a profile update touches. The current-user entry is always
/// included; the optimistic merge skips it when it holds another user.
pub fn user_keys(input: &UpdateUserInput) -> Vec<QueryKey> {
    vec![keys::users::detail(&input.user_id), keys::users::current()]
}

/// Updates a user's profile, showing the change in the user's detail entry
/// and, when it is the signed-in user, in the current-user entry before the
/// server confirms it.
pub fn update_user_mutation<S>(
    cache: S,
    api: ChatApiRef,
    callbacks: MutationCallbacks<UpdateUserInput, User>,
) -> UpdateUserMutation
where
    S: CacheStore<Value> + 'static,
{
    let options = MutationOptions::new(
        move |input: UpdateUserInput| {
            let api = ChatApiRef::clone(&api);
            async move { api.update_user(input).await }
        },
        user_keys,
    )
    .apply_optimistic(merge_user_patch);

    configure(cache, callbacks.attach(options))
}

/// Shallow-merges the update into a cached user document.
///
/// A document carrying a different `id` belongs to another user (the
/// current-user entry while editing someone else) and is returned unchanged.
fn merge_user_patch(input: &UpdateUserInput, previous: &Value) -> Value {
    let Value::Object(user) = previous else {
        return previous.clone();
    };
    if user.contains_key("id") && !has_field(previous, "id", &input.user_id) {
        return previous.clone();
    }
    let mut merged = user.clone();
    merged.extend(input.patch());
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        core::snapshot::Snapshot, infrastructure::query_cache::QueryCache,
        infrastructure::simulated_api::SimulatedApi,
    };

    fn cache_with_current(current: Value) -> QueryCache<Value> {
        let cache = QueryCache::default();
        cache.set(
            &keys::users::detail("u1"),
            json!({"id": "u1", "name": "John", "email": "john@example.com"}),
        );
        cache.set(&keys::users::current(), current);
        cache
    }

    #[test]
    fn test_merge_user_patch() {
        let input = UpdateUserInput::new("u1").name("Johnny");

        assert_eq!(
            merge_user_patch(&input, &json!({"name": "John"})),
            json!({"name": "Johnny"})
        );
        assert_eq!(
            merge_user_patch(&input, &json!({"id": "u1", "name": "John", "email": "j@x"})),
            json!({"id": "u1", "name": "Johnny", "email": "j@x"})
        );
        assert_eq!(
            merge_user_patch(&input, &json!({"id": "u2", "name": "Jane"})),
            json!({"id": "u2", "name": "Jane"})
        );
        assert_eq!(merge_user_patch(&input, &json!(null)), json!(null));
    }

    #[tokio::test]
    async fn test_update_user_patches_current_user_when_it_matches() {
        let cache = cache_with_current(json!({"id": "u1", "name": "John"}));
        let api = SimulatedApi::new()
            .with_user(User::new("u1", "John"))
            .with_current_user("u1");
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
        assert_eq!(
            cache.get(&keys::users::detail("u1")),
            Some(json!({"id": "u1", "name": "Johnny", "email": "john@example.com"}))
        );

        hold.release();
        let user = handle.await.unwrap().unwrap();
        assert_eq!(user.name, "Johnny");
        assert_eq!(api.call_count(), 1);
        // no fetcher is registered, so invalidated entries stay stale
        assert!(cache.is_stale(&keys::users::current()));
        assert!(cache.is_stale(&keys::users::detail("u1")));
    }

    #[tokio::test]
    async fn test_update_user_rolls_back_both_entries() {
        let cache = cache_with_current(json!({"id": "u1", "name": "John"}));
        let api = SimulatedApi::new().failing(ApiError::Validation("name too long".to_string()));
        let seen: Arc<Mutex<Option<(ApiError, Snapshot<Value>)>>> = Arc::new(Mutex::new(None));
        let seen_in_cb = Arc::clone(&seen);
        let mutation = update_user_mutation(
            cache.clone(),
            Arc::new(api),
            MutationCallbacks::new().on_error(move |error, _input, snapshot| {
                *seen_in_cb.lock().unwrap() = Some((error.clone(), snapshot.clone()));
            }),
        );

        let result = mutation
            .mutate_async(UpdateUserInput::new("u1").name("J".repeat(300)))
            .await;

        assert_eq!(
            result,
            Err(ApiError::Validation("name too long".to_string()))
        );
        assert_eq!(
            cache.get(&keys::users::current()),
            Some(json!({"id": "u1", "name": "John"}))
        );
        assert_eq!(
            cache.get(&keys::users::detail("u1")),
            Some(json!({"id": "u1", "name": "John", "email": "john@example.com"}))
        );

        let (error, snapshot) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(error, ApiError::Validation("name too long".to_string()));
        assert_eq!(
            snapshot.get(&keys::users::current()),
            Some(&json!({"id": "u1", "name": "John"}))
        );
    }
}
