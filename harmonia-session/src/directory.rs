//! Friends directory client
//!
//! Thin REST client for the friends-roster collaborator. The roster it
//! returns is the universe of valid presence identities; transient failures
//! surface as typed errors so the caller can retry on its own schedule.

use serde::Deserialize;
use tracing::debug;

use harmonia_common::model::Friend;

use crate::error::Result;

/// Friendship record as the directory reports it; only accepted friendships
/// contribute roster members.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Friendship {
    friend: Friend,
    status: String,
}

#[derive(Debug, Deserialize)]
struct FriendsResponse {
    #[allow(dead_code)]
    status: String,
    data: Vec<Friendship>,
}

pub struct FriendsDirectory {
    http: reqwest::Client,
    friends_url: String,
    token: String,
}

impl FriendsDirectory {
    pub fn new(base_url: &str, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            friends_url: format!("{}/friends", base_url.trim_end_matches('/')),
            token,
        }
    }

    /// Fetch the accepted-friends roster.
    pub async fn get_friends(&self) -> Result<Vec<Friend>> {
        let response: FriendsResponse = self
            .http
            .get(&self.friends_url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let roster = parse_roster(response);
        debug!("Friends directory returned {} roster members", roster.len());
        Ok(roster)
    }
}

fn parse_roster(response: FriendsResponse) -> Vec<Friend> {
    response
        .data
        .into_iter()
        .filter(|f| f.status == "accepted")
        .map(|f| f.friend)
        .collect()
}
