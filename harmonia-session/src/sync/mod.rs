//! Remote session store synchronization
//!
//! Two halves: the transport contract (wire frames plus a pluggable
//! connection factory) and the sync channel that runs the reconnect loop,
//! hydration guards and outbound push policy on top of it.

pub mod channel;
pub mod transport;

pub use channel::{PresenceSignal, SyncChannel, TokenProvider};
pub use transport::{
    ChannelEvent, ClientFrame, SessionTransport, SseTransport, TransportConnection,
};

/// What a user-originated transition is asking the sync channel to push.
///
/// Carried on the local-intent mpsc from the engine; inbound hydration never
/// produces one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReason {
    /// Play/pause transition
    StateChange,
    /// Seek completed
    Seek,
    /// Current track changed
    TrackChange,
}
