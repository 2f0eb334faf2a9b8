//! Event system for the Harmonia session engine
//!
//! # Architecture
//!
//! Harmonia uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many notification of UI surfaces
//! - **Command channels** (tokio::mpsc): request → single handler
//! - **Shared state** (Arc<RwLock<T>>): read-heavy access
//!
//! The EventBus carries observations only. In particular, the sync channel
//! never pushes because of a bus event: outbound pushes are requested through
//! a dedicated local-intent channel so that hydrating a remote snapshot can
//! update state (and notify UIs) without echoing back to the session store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{PlayMode, Track};

/// Session engine event types
///
/// Events are broadcast via EventBus and can be serialized for UI transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Playing flag flipped (play/pause/toggle, or a device observation)
    PlaybackStateChanged {
        playing: bool,
        timestamp: DateTime<Utc>,
    },

    /// A different track became current (load, advance, hydration)
    TrackChanged {
        track: Track,
        /// Index within the queue, when the track came from it
        queue_index: Option<usize>,
        timestamp: DateTime<Utc>,
    },

    /// Periodic transport position update
    PlaybackProgress {
        position_seconds: f64,
        duration_seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Queue replaced or appended to
    QueueChanged {
        length: usize,
        context_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Volume or mute changed
    VolumeChanged {
        volume: f32,
        muted: bool,
        timestamp: DateTime<Utc>,
    },

    /// Traversal policy changed
    PlayModeChanged {
        mode: PlayMode,
        timestamp: DateTime<Utc>,
    },

    /// A remote snapshot was applied to local state
    SessionHydrated {
        track_id: String,
        updated_at_epoch_ms: i64,
        timestamp: DateTime<Utc>,
    },

    /// A roster member went online or offline
    PresenceChanged {
        user_id: String,
        online: bool,
        timestamp: DateTime<Utc>,
    },

    /// Session store channel established
    ChannelConnected { timestamp: DateTime<Utc> },

    /// Session store channel lost (reconnect in progress)
    ChannelDisconnected { timestamp: DateTime<Utc> },
}

/// One-to-many event broadcaster backed by tokio::sync::broadcast.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    ///
    /// Old events are dropped for lagging subscribers once the buffer fills.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SessionEvent,
    ) -> Result<usize, broadcast::error::SendError<SessionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    pub fn emit_lossy(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
