//! Harmonia playback session engine
//!
//! Owns local audio playback state (current track, queue, play-mode,
//! transport position, volume), reconciles it with a remote session store
//! over a persistent channel, and tracks friend presence via the same
//! channel.
//!
//! Component map:
//! - [`device`] — audio output contract plus the rodio implementation
//! - [`queue`] — playback queue and traversal arithmetic
//! - [`state`] / [`engine`] — the authoritative state machine
//! - [`sync`] — session store channel: transport, hydration, push policy
//! - [`presence`] — friend online/offline reconciliation
//! - [`directory`] — friends roster REST client

pub mod device;
pub mod directory;
pub mod engine;
pub mod error;
pub mod presence;
pub mod queue;
pub mod state;
pub mod sync;

pub use device::{AudioDevice, DeviceEvent, RodioDevice};
pub use directory::FriendsDirectory;
pub use engine::{AdvanceTrigger, SessionEngine};
pub use error::{Error, Result};
pub use presence::PresenceTracker;
pub use queue::{PlayQueue, QueueEntry};
pub use state::{PlayerState, TransportStatus};
pub use sync::{PushReason, SessionTransport, SseTransport, SyncChannel, TransportConnection};
