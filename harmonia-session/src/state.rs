//! Root playback state aggregate
//!
//! One instance per client session, exclusively owned and mutated by the
//! session engine; every other component reads it or submits commands
//! through the engine's public operations.

use harmonia_common::model::{PlayMode, RemoteSessionSnapshot, Track};
use harmonia_common::time;

use crate::queue::PlayQueue;

/// The (playing, current_track) pair projected as a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// No track loaded
    Idle,
    LoadedPaused,
    LoadedPlaying,
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Idle => write!(f, "idle"),
            TransportStatus::LoadedPaused => write!(f, "paused"),
            TransportStatus::LoadedPlaying => write!(f, "playing"),
        }
    }
}

/// Root mutable aggregate for the playback session.
///
/// Invariants: `0 <= queue.current_index() < queue.len()` whenever the queue
/// is non-empty and a track is loaded; `position_seconds <= duration_seconds`
/// except transiently during seeks.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub current_track: Option<Track>,
    pub queue: PlayQueue,
    pub playing: bool,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    /// Master volume in [0, 1]
    pub volume: f32,
    pub muted: bool,
    pub play_mode: PlayMode,
    /// Originating playlist/collection, or None for ad-hoc play
    pub session_context_id: Option<String>,
}

impl PlayerState {
    pub fn new() -> Self {
        Self {
            current_track: None,
            queue: PlayQueue::new(),
            playing: false,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            volume: 0.5,
            muted: false,
            play_mode: PlayMode::Normal,
            session_context_id: None,
        }
    }

    pub fn transport_status(&self) -> TransportStatus {
        match (&self.current_track, self.playing) {
            (None, _) => TransportStatus::Idle,
            (Some(_), false) => TransportStatus::LoadedPaused,
            (Some(_), true) => TransportStatus::LoadedPlaying,
        }
    }

    /// Wire snapshot of the current state, stamped with the wall clock now.
    ///
    /// None when no track is loaded (an idle session is never pushed).
    pub fn snapshot_now(&self) -> Option<RemoteSessionSnapshot> {
        self.current_track
            .as_ref()
            .map(|track| RemoteSessionSnapshot {
                track: track.clone(),
                position_seconds: self.position_seconds,
                duration_seconds: self.duration_seconds,
                playing: self.playing,
                volume: self.volume,
                updated_at_epoch_ms: time::now_epoch_ms(),
            })
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new()
    }
}
