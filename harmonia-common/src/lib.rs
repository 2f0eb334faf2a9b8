//! # Harmonia Common Library
//!
//! Shared code for the Harmonia playback session engine:
//! - Playback/session data model (tracks, snapshots, presence)
//! - Event types (SessionEvent enum) and EventBus
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod time;

pub use error::{Error, Result};
pub use model::{Friend, PlayMode, PresenceEntry, RemoteSessionSnapshot, Track};
