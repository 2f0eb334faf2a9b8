//! Playback/session data model
//!
//! Wire-facing types shared between the session engine, the sync channel and
//! the external collaborators (catalog, friends directory, session store).
//! Field names serialize in camelCase to match the session store's contract.

use serde::{Deserialize, Serialize};

/// A playable track reference.
///
/// Owned by the catalog collaborator; the engine treats all fields as opaque
/// beyond null-checks. `duration_seconds` is a hint that may be refined once
/// the media actually loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Immutable catalog identity
    pub id: String,
    /// Playable media location
    pub source_url: String,
    /// Display title
    pub title: String,
    /// Duration hint in seconds (authoritative value comes from the device)
    #[serde(default)]
    pub duration_seconds: f64,
    /// Optional artwork, carried for UI surfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Queue traversal policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayMode {
    /// Advance in order, stop after the last entry
    Normal,
    /// Advance in order, wrap around and keep playing
    Repeat,
    /// Restart the current track on every track end
    RepeatOne,
    /// Uniformly random next index (no traversal history)
    Shuffle,
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayMode::Normal => write!(f, "normal"),
            PlayMode::Repeat => write!(f, "repeat"),
            PlayMode::RepeatOne => write!(f, "repeat-one"),
            PlayMode::Shuffle => write!(f, "shuffle"),
        }
    }
}

/// Remote session state as persisted by the session store.
///
/// `updated_at_epoch_ms` is the sole ordering key for conflict resolution:
/// last write wins, by strictly greater timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSessionSnapshot {
    pub track: Track,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub playing: bool,
    pub volume: f32,
    pub updated_at_epoch_ms: i64,
}

/// A roster member from the friends directory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A roster member merged with channel-sourced presence.
///
/// Derived view: rebuilt from the roster and the online set whenever either
/// input changes, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    #[serde(flatten)]
    pub friend: Friend,
    pub is_online: bool,
}
