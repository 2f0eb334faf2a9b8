//! Session store channel: reconnect loop, hydration guards, push policy
//!
//! One `SyncChannel` per engine. It owns the only connection to the session
//! store and enforces the ordering rules around it:
//!
//! - inbound snapshots are applied only when strictly newer than the last
//!   applied timestamp, and never for the track already loaded locally;
//! - outbound pushes happen on local intent (collapsed so two immediate
//!   pushes within the collapse window become one) or on a periodic timer
//!   while playing; pushes advance the last-applied timestamp so the
//!   client's own echo reads as stale;
//! - while disconnected, push intents are dropped, not queued, and the
//!   channel reconnects with capped exponential backoff.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use harmonia_common::config::SessionConfig;
use harmonia_common::events::{EventBus, SessionEvent};
use harmonia_common::model::RemoteSessionSnapshot;
use harmonia_common::time;

use crate::engine::SessionEngine;
use crate::sync::transport::{ChannelEvent, ClientFrame, SessionTransport, TransportConnection};
use crate::sync::PushReason;

/// Presence deltas decoded off the channel, consumed by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceSignal {
    /// Full online roster (answer to a roster request)
    Roster(Vec<String>),
    Online(String),
    Offline(String),
}

/// Supplies a currently-valid bearer token, or None when no credential is
/// available yet (connect is skipped and retried).
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub struct SyncChannel {
    engine: Arc<SessionEngine>,
    transport: Arc<dyn SessionTransport>,
    events: Arc<EventBus>,
    config: SessionConfig,
    connected_tx: watch::Sender<bool>,
    presence_tx: broadcast::Sender<PresenceSignal>,
    /// Outbound half of the live connection; None while disconnected
    outgoing: Mutex<Option<mpsc::Sender<ClientFrame>>>,
    /// Ordering key of the newest snapshot applied or pushed
    last_applied_epoch_ms: AtomicI64,
}

impl SyncChannel {
    pub fn new(
        engine: Arc<SessionEngine>,
        transport: Arc<dyn SessionTransport>,
        events: Arc<EventBus>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (connected_tx, _) = watch::channel(false);
        let (presence_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            engine,
            transport,
            events,
            config,
            connected_tx,
            presence_tx,
            outgoing: Mutex::new(None),
            last_applied_epoch_ms: AtomicI64::new(0),
        })
    }

    /// Observe connection status transitions.
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_tx.borrow()
    }

    /// Subscribe to presence deltas decoded off the channel.
    pub fn presence_signals(&self) -> broadcast::Receiver<PresenceSignal> {
        self.presence_tx.subscribe()
    }

    /// Ask the store for the full online roster. Returns false (and does
    /// nothing) while disconnected; the caller retries on its own cadence.
    pub fn send_roster_request(&self) -> bool {
        let outgoing = self.outgoing.lock().unwrap();
        match outgoing.as_ref() {
            Some(tx) => tx.try_send(ClientFrame::RosterRequest).is_ok(),
            None => false,
        }
    }

    /// Run the channel: connect, drive the connection until it drops, back
    /// off, reconnect. Consumes the engine's local-intent receiver.
    pub fn start(self: &Arc<Self>, tokens: TokenProvider, push_rx: mpsc::Receiver<PushReason>) {
        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.run(tokens, push_rx).await;
        });
    }

    async fn run(self: Arc<Self>, tokens: TokenProvider, mut push_rx: mpsc::Receiver<PushReason>) {
        let mut backoff = self.config.reconnect_backoff_initial;
        loop {
            let Some(token) = tokens() else {
                debug!("No session store credential yet, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.config.reconnect_backoff_max);
                continue;
            };

            match self.transport.connect(token).await {
                Ok(connection) => {
                    backoff = self.config.reconnect_backoff_initial;
                    info!("Session store channel connected");
                    self.drive(connection, &mut push_rx).await;
                    info!("Session store channel disconnected");
                }
                Err(e) => {
                    warn!(
                        "Session store connect failed ({}), retrying in {:?}",
                        e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.reconnect_backoff_max);
                }
            }
        }
    }

    /// Pump one live connection until its inbound stream ends.
    async fn drive(
        &self,
        connection: TransportConnection,
        push_rx: &mut mpsc::Receiver<PushReason>,
    ) {
        let TransportConnection {
            mut incoming,
            outgoing,
        } = connection;

        // Intents raised while disconnected are stale: drop them rather
        // than replaying old state at the store.
        while push_rx.try_recv().is_ok() {}

        *self.outgoing.lock().unwrap() = Some(outgoing.clone());
        // send_replace stores the value even with no subscribers yet
        self.connected_tx.send_replace(true);
        self.events.emit_lossy(SessionEvent::ChannelConnected {
            timestamp: time::now(),
        });

        let mut periodic = tokio::time::interval(self.config.push_interval);
        periodic.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        periodic.tick().await; // immediate first tick

        let mut last_immediate: Option<Instant> = None;

        loop {
            tokio::select! {
                event = incoming.recv() => {
                    match event {
                        Some(event) => self.handle_inbound(event).await,
                        None => break,
                    }
                }
                reason = push_rx.recv() => {
                    let Some(reason) = reason else { break };
                    let now = Instant::now();
                    let within_window = last_immediate
                        .map(|at| now.duration_since(at) < self.config.push_collapse_window)
                        .unwrap_or(false);
                    if within_window {
                        debug!("Collapsing immediate push ({:?})", reason);
                        continue;
                    }
                    if self.push_snapshot(&outgoing).await {
                        last_immediate = Some(now);
                    }
                }
                _ = periodic.tick() => {
                    if self.engine.state().await.playing {
                        self.push_snapshot(&outgoing).await;
                    }
                }
            }
        }

        *self.outgoing.lock().unwrap() = None;
        self.connected_tx.send_replace(false);
        self.events.emit_lossy(SessionEvent::ChannelDisconnected {
            timestamp: time::now(),
        });
    }

    async fn handle_inbound(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Hydrate(Some(snapshot)) => self.apply_hydration(snapshot).await,
            ChannelEvent::Hydrate(None) => {
                debug!("Store holds no session for this user");
            }
            ChannelEvent::SessionError { reason } => {
                warn!("Session store reported an error: {}", reason);
            }
            ChannelEvent::RosterResponse { user_ids } => {
                let _ = self.presence_tx.send(PresenceSignal::Roster(user_ids));
            }
            ChannelEvent::Online { user_id } => {
                let _ = self.presence_tx.send(PresenceSignal::Online(user_id));
            }
            ChannelEvent::Offline { user_id } => {
                let _ = self.presence_tx.send(PresenceSignal::Offline(user_id));
            }
        }
    }

    /// Hydration guards, then apply. Applying never signals the push path;
    /// the engine's apply method is the dedicated non-signalling entry.
    async fn apply_hydration(&self, snapshot: RemoteSessionSnapshot) {
        if let Some(current_id) = self.engine.current_track_id().await {
            if current_id == snapshot.track.id {
                debug!(
                    "Discarding hydration for track {} already in session",
                    snapshot.track.id
                );
                return;
            }
        }

        let last = self.last_applied_epoch_ms.load(Ordering::Acquire);
        if snapshot.updated_at_epoch_ms <= last {
            debug!(
                "Discarding stale hydration (snapshot {} <= applied {})",
                snapshot.updated_at_epoch_ms, last
            );
            return;
        }

        info!(
            "Hydrating session: track {} at {:.1}s",
            snapshot.track.id, snapshot.position_seconds
        );
        self.last_applied_epoch_ms
            .store(snapshot.updated_at_epoch_ms, Ordering::Release);
        if let Err(e) = self.engine.apply_snapshot(&snapshot).await {
            warn!("Hydration apply failed: {}", e);
        }
    }

    /// Push the current state, advancing the last-applied timestamp so the
    /// echo of this push reads as stale. Returns whether a frame was sent.
    async fn push_snapshot(&self, outgoing: &mpsc::Sender<ClientFrame>) -> bool {
        let Some(snapshot) = self.engine.snapshot_now().await else {
            debug!("Push skipped: session idle");
            return false;
        };
        self.last_applied_epoch_ms
            .fetch_max(snapshot.updated_at_epoch_ms, Ordering::AcqRel);
        if outgoing.try_send(ClientFrame::Push(snapshot)).is_err() {
            warn!("Outbound frame buffer full, dropping push");
            return false;
        }
        true
    }
}
