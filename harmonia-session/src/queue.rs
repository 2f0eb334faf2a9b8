//! Playback queue and traversal arithmetic
//!
//! The queue is an ordered sequence of entries, mutable only by wholesale
//! replacement or tail append, so readers never observe a torn splice.
//! Traversal policy (normal / repeat / repeat-one / shuffle) is pure index
//! arithmetic here; end-of-queue policy lives in the session engine.

use harmonia_common::model::{PlayMode, Track};
use rand::Rng;
use uuid::Uuid;

/// One slot in the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Identity of this slot (stable across index moves)
    pub entry_id: Uuid,
    pub track: Track,
    /// 0-based position, unique within a queue instance
    pub position: usize,
    /// Entry was already passed during forward traversal; reset whenever the
    /// queue is replaced
    pub consumed: bool,
}

/// Ordered playback queue with a current index.
///
/// Invariant: after any navigation, `current_index < len()` whenever the
/// queue is non-empty. Every navigation operation is a no-op on an empty
/// queue, never a panic.
#[derive(Debug, Clone, Default)]
pub struct PlayQueue {
    entries: Vec<QueueEntry>,
    current_index: usize,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically swap the queue contents and set the current index.
    ///
    /// Entries before `start_index` are marked consumed: starting mid-queue
    /// (e.g. "play this song in this playlist") treats the prefix as already
    /// played for display purposes.
    pub fn replace(&mut self, tracks: Vec<Track>, start_index: usize) {
        let entries: Vec<QueueEntry> = tracks
            .into_iter()
            .enumerate()
            .map(|(position, track)| QueueEntry {
                entry_id: Uuid::new_v4(),
                track,
                position,
                consumed: position < start_index,
            })
            .collect();

        self.current_index = if entries.is_empty() {
            0
        } else {
            start_index.min(entries.len() - 1)
        };
        self.entries = entries;
    }

    /// Add tracks after the current tail ("add to queue").
    pub fn append(&mut self, tracks: Vec<Track>) {
        let base = self.entries.len();
        self.entries
            .extend(tracks.into_iter().enumerate().map(|(i, track)| QueueEntry {
                entry_id: Uuid::new_v4(),
                track,
                position: base + i,
                consumed: false,
            }));
    }

    /// Index to advance to under the given mode, or None when empty.
    ///
    /// Repeat-one returns the current index unchanged (the caller restarts
    /// the same track). Shuffle is a uniform re-pick over the whole queue,
    /// current index included; there is no no-repeat history — a documented
    /// limitation, kept as-is. Normal and repeat both return
    /// `(current + 1) % len`; whether wraparound-to-zero means "stop" is the
    /// caller's policy.
    pub fn next(&self, mode: PlayMode) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let len = self.entries.len();
        let target = match mode {
            PlayMode::RepeatOne => self.current_index,
            PlayMode::Shuffle => rand::thread_rng().gen_range(0..len),
            PlayMode::Normal | PlayMode::Repeat => (self.current_index + 1) % len,
        };
        Some(target)
    }

    /// Index of the previous entry, or None when empty.
    pub fn prev(&self) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let len = self.entries.len();
        Some((self.current_index + len - 1) % len)
    }

    /// Move the current index; out-of-range values are clamped.
    pub fn set_current_index(&mut self, index: usize) {
        if self.entries.is_empty() {
            self.current_index = 0;
        } else {
            self.current_index = index.min(self.entries.len() - 1);
        }
    }

    /// Flag entries at positions `<= index` as passed, for UI greying.
    pub fn mark_consumed_through(&mut self, index: usize) {
        for entry in self.entries.iter_mut() {
            if entry.position <= index {
                entry.consumed = true;
            }
        }
    }

    /// Position of the first entry holding the given track id.
    pub fn position_of_track(&self, track_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.track.id == track_id)
    }

    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.entries.get(self.current_index)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
