use serde_json::Value;

use crate::{
    core::{
        key::QueryKey,
        mutation::{configure, MutationController, MutationOptions},
        store::CacheStore,
    },
    domain::{
        api::{ApiError, ChatApiRef},
        entities::{TeamMembership, TeamMembershipInput},
        keys,
        mutations::{has_field, MutationCallbacks},
    },
};

pub type JoinTeamMutation = MutationController<TeamMembershipInput, TeamMembership, ApiError, Value>;
pub type LeaveTeamMutation = MutationController<TeamMembershipInput, (), ApiError, Value>;

/// Entries a membership change touches: the signed-in user's team list and
/// the team's member list
pub fn membership_keys(input: &TeamMembershipInput) -> Vec<QueryKey> {
    vec![keys::teams::list(), keys::teams::members(&input.team_id)]
}

/// Joins a team. Nothing is shown until the server confirms the membership,
/// then the team list and the team's member list are refetched.
pub fn join_team_mutation<S>(
    cache: S,
    api: ChatApiRef,
    callbacks: MutationCallbacks<TeamMembershipInput, TeamMembership>,
) -> JoinTeamMutation
where
    S: CacheStore<Value> + 'static,
{
    let options = MutationOptions::new(
        move |input: TeamMembershipInput| {
            let api = ChatApiRef::clone(&api);
            async move { api.join_team(input).await }
        },
        membership_keys,
    );

    configure(cache, callbacks.attach(options))
}

/// Leaves a team, hiding it from the team list (and the user from the
/// member list) right away.
pub fn leave_team_mutation<S>(
    cache: S,
    api: ChatApiRef,
    callbacks: MutationCallbacks<TeamMembershipInput, ()>,
) -> LeaveTeamMutation
where
    S: CacheStore<Value> + 'static,
{
    let options = MutationOptions::new(
        move |input: TeamMembershipInput| {
            let api = ChatApiRef::clone(&api);
            async move { api.leave_team(input).await }
        },
        membership_keys,
    )
    .apply_optimistic(remove_membership);

    configure(cache, callbacks.attach(options))
}

/// Drops the entries that refer to the membership being removed.
///
/// Team lists hold team ids or `{id}` team objects and lose the team; member
/// lists hold `{team_id, user_id}` memberships and lose the user. Non-array
/// documents are returned unchanged.
fn remove_membership(input: &TeamMembershipInput, previous: &Value) -> Value {
    let Value::Array(items) = previous else {
        return previous.clone();
    };
    let kept = items
        .iter()
        .filter(|item| {
            let is_membership = item.get("user_id").is_some();
            let removed = if is_membership {
                has_field(item, "user_id", &input.user_id)
            } else {
                item.as_str() == Some(input.team_id.as_str())
                    || has_field(item, "id", &input.team_id)
            };
            !removed
        })
        .cloned()
        .collect();
    Value::Array(kept)
}
