mod resolve;
mod view;

use axum::{routing::get, Router};
use serde::Serialize;

use crate::{db::Member, AppState};

pub use resolve::{find_by_id, pair_key, resolve};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/servers/{server_id}/conversations/{member_id}", get(view::conversation))
}

/// Which of the two fixed slots of a conversation a member occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    One,
    Two,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::One => Side::Two,
            Side::Two => Side::One,
        }
    }
}

/// The canonical conversation of an unordered pair of members, with both
/// members expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub member_one_id: String,
    pub member_two_id: String,
    pub member_one: Member,
    pub member_two: Member,
}

impl Conversation {
    pub fn member(&self, side: Side) -> &Member {
        match side {
            Side::One => &self.member_one,
            Side::Two => &self.member_two,
        }
    }

    pub fn side_of_member(&self, member_id: &str) -> Option<Side> {
        if self.member_one_id == member_id {
            Some(Side::One)
        } else if self.member_two_id == member_id {
            Some(Side::Two)
        } else {
            None
        }
    }

    pub fn side_of_profile(&self, profile_id: &str) -> Option<Side> {
        if self.member_one.profile_id == profile_id {
            Some(Side::One)
        } else if self.member_two.profile_id == profile_id {
            Some(Side::Two)
        } else {
            None
        }
    }
}
