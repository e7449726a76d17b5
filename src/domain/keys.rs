//! Query key factory for the chat backend's collections
//!
//! Keys are built from the general to the specific so that invalidating a
//! parent (e.g. [`users::all`]) reaches every child.

pub mod users {
    use crate::{core::key::QueryKey, query_key};

    pub fn all() -> QueryKey {
        query_key!["users"]
    }

    pub fn lists() -> QueryKey {
        all().child("list")
    }

    pub fn detail(user_id: &str) -> QueryKey {
        all().child("detail").child(user_id)
    }

    /// The signed-in user, cached separately from the detail entries
    pub fn current() -> QueryKey {
        all().child("current")
    }
}

pub mod teams {
    use crate::{core::key::QueryKey, query_key};

    pub fn all() -> QueryKey {
        query_key!["teams"]
    }

    /// Teams the signed-in user belongs to
    pub fn list() -> QueryKey {
        all().child("list")
    }

    pub fn members(team_id: &str) -> QueryKey {
        all().child("members").child(team_id)
    }
}
