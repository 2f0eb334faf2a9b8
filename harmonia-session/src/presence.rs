//! Friend presence reconciliation
//!
//! The REST roster is the universe of valid identities; the channel supplies
//! online/offline deltas. The merged view is rebuilt from both inputs on
//! every read, never incrementally mutated, so a stale delta can at worst
//! mislabel one friend until the next roster response.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use harmonia_common::events::{EventBus, SessionEvent};
use harmonia_common::model::{Friend, PresenceEntry};
use harmonia_common::time;

use crate::sync::channel::{PresenceSignal, SyncChannel};

/// Roster plus online set; the merge inputs.
#[derive(Debug, Default)]
struct PresenceState {
    roster: Vec<Friend>,
    online: HashSet<String>,
}

impl PresenceState {
    fn is_known(&self, user_id: &str) -> bool {
        self.roster.iter().any(|f| f.id == user_id)
    }

    /// Replace the online set with the given ids, dropping any outside the
    /// roster.
    fn apply_roster_response(&mut self, user_ids: Vec<String>) {
        let mut online = HashSet::new();
        for id in user_ids {
            if self.is_known(&id) {
                online.insert(id);
            } else {
                warn!("Dropping online roster entry for unknown identity {}", id);
            }
        }
        self.online = online;
    }

    /// Apply one delta. Returns false when the identity is unknown and the
    /// delta was dropped.
    fn apply_delta(&mut self, user_id: &str, online: bool) -> bool {
        if !self.is_known(user_id) {
            warn!(
                "Dropping presence delta for unknown identity {} ({})",
                user_id,
                if online { "online" } else { "offline" }
            );
            return false;
        }
        if online {
            self.online.insert(user_id.to_string());
        } else {
            self.online.remove(user_id);
        }
        true
    }

    /// Install a new roster, pruning online ids no longer in it.
    fn set_roster(&mut self, roster: Vec<Friend>) {
        self.roster = roster;
        let known: HashSet<String> = self.roster.iter().map(|f| f.id.clone()).collect();
        self.online.retain(|id| known.contains(id));
    }

    fn entries(&self) -> Vec<PresenceEntry> {
        self.roster
            .iter()
            .map(|friend| PresenceEntry {
                friend: friend.clone(),
                is_online: self.online.contains(&friend.id),
            })
            .collect()
    }
}

/// Tracks which roster members are online, fed by the sync channel.
pub struct PresenceTracker {
    channel: Arc<SyncChannel>,
    events: Arc<EventBus>,
    poll_interval: Duration,
    state: RwLock<PresenceState>,
}

impl PresenceTracker {
    pub fn new(
        channel: Arc<SyncChannel>,
        events: Arc<EventBus>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            events,
            poll_interval,
            state: RwLock::new(PresenceState::default()),
        })
    }

    /// Install the friends roster (from the directory client). Online ids no
    /// longer in the roster are pruned.
    pub async fn set_roster(&self, roster: Vec<Friend>) {
        self.state.write().await.set_roster(roster);
    }

    /// The merged roster-with-status view, rebuilt on every call.
    pub async fn friends_with_status(&self) -> Vec<PresenceEntry> {
        self.state.read().await.entries()
    }

    pub async fn online_count(&self) -> usize {
        self.state.read().await.online.len()
    }

    /// Start consuming presence signals. On connect the online roster is
    /// requested, and the request repeats on the poll cadence until a
    /// roster response actually arrives (the response can be lost on a
    /// flaky stream). While disconnected the request is skipped and
    /// retried on the same cadence (degraded, not an error).
    pub fn start(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        // Subscribe before spawning so no signal between start() returning
        // and the task running is missed
        let mut signals = self.channel.presence_signals();
        let mut connected = self.channel.subscribe_connected();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(tracker.poll_interval);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // True only once a roster response has been consumed on the
            // current connection; a sent request alone is not enough
            let mut roster_synced = false;

            loop {
                tokio::select! {
                    signal = signals.recv() => {
                        match signal {
                            Ok(signal) => {
                                if matches!(signal, PresenceSignal::Roster(_)) {
                                    roster_synced = true;
                                }
                                tracker.handle_signal(signal).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Presence signals lagged by {}", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    changed = connected.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *connected.borrow() {
                            let _ = tracker.channel.send_roster_request();
                        } else {
                            // Presence goes stale, refreshed on reconnect
                            roster_synced = false;
                        }
                    }
                    _ = poll.tick() => {
                        if !roster_synced && !tracker.channel.send_roster_request() {
                            debug!("Roster request skipped: channel disconnected");
                        }
                    }
                }
            }
            debug!("Presence tracker stopped");
        });
    }

    async fn handle_signal(&self, signal: PresenceSignal) {
        match signal {
            PresenceSignal::Roster(user_ids) => {
                let mut state = self.state.write().await;
                state.apply_roster_response(user_ids);
            }
            PresenceSignal::Online(user_id) => {
                let applied = self.state.write().await.apply_delta(&user_id, true);
                if applied {
                    self.events.emit_lossy(SessionEvent::PresenceChanged {
                        user_id,
                        online: true,
                        timestamp: time::now(),
                    });
                }
            }
            PresenceSignal::Offline(user_id) => {
                let applied = self.state.write().await.apply_delta(&user_id, false);
                if applied {
                    self.events.emit_lossy(SessionEvent::PresenceChanged {
                        user_id,
                        online: false,
                        timestamp: time::now(),
                    });
                }
            }
        }
    }
}
