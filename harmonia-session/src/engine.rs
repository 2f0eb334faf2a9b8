//! Session engine orchestration
//!
//! The engine is the authoritative owner of local playback state: it applies
//! user commands, drives the audio device, and folds device observations
//! back into the state. All mutation happens through its public operations
//! behind a single RwLock; other components read state or submit commands,
//! never touch fields directly.
//!
//! Two outbound paths leave the engine and they are deliberately separate:
//!
//! - the EventBus, which notifies UI surfaces about anything that changed,
//!   including changes caused by remote hydration;
//! - the local-intent channel, which asks the sync channel for an immediate
//!   push and is signalled only by user-originated transitions (play, pause,
//!   seek completion, track change). Hydration and device observations never
//!   touch it, which is what keeps two devices from echoing snapshots back
//!   and forth.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harmonia_common::config::SessionConfig;
use harmonia_common::events::{EventBus, SessionEvent};
use harmonia_common::model::{PlayMode, RemoteSessionSnapshot, Track};
use harmonia_common::time;

use crate::device::{AudioDevice, DeviceEvent};
use crate::error::{Error, Result};
use crate::state::{PlayerState, TransportStatus};
use crate::sync::PushReason;

/// Why the engine is advancing to another queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceTrigger {
    /// Device reported end of media
    TrackEnded,
    /// Explicit "next" control
    UserNext,
}

/// The playback state machine.
///
/// Created once per client session and shared as `Arc<SessionEngine>`.
pub struct SessionEngine {
    device: Arc<dyn AudioDevice>,
    state: RwLock<PlayerState>,
    events: Arc<EventBus>,
    config: SessionConfig,
    push_intent: mpsc::Sender<PushReason>,
    /// Pending repeat-one deferred restart; aborted by any newer transport
    /// command so a stale restart cannot clobber newer state
    restart_task: StdMutex<Option<JoinHandle<()>>>,
    /// Self-reference for the restart task; it must not keep the engine alive
    weak: Weak<SessionEngine>,
}

impl SessionEngine {
    /// Create the engine.
    ///
    /// Returns the engine plus the receiving end of the local-intent
    /// channel, which the sync channel consumes.
    pub fn new(
        device: Arc<dyn AudioDevice>,
        events: Arc<EventBus>,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<PushReason>) {
        let (push_intent, push_rx) = mpsc::channel(8);
        let engine = Arc::new_cyclic(|weak| Self {
            device,
            state: RwLock::new(PlayerState::new()),
            events,
            config,
            push_intent,
            restart_task: StdMutex::new(None),
            weak: weak.clone(),
        });
        (engine, push_rx)
    }

    /// Start folding device observations into the state machine.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let mut observations = self.device.observations();
        tokio::spawn(async move {
            loop {
                match observations.recv().await {
                    Ok(event) => engine.handle_device_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Device observations lagged by {}", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Device observation loop stopped");
        });
    }

    /// Snapshot of the full aggregate (for UIs and tests).
    pub async fn state(&self) -> PlayerState {
        self.state.read().await.clone()
    }

    /// Wire snapshot stamped now; None when idle.
    pub async fn snapshot_now(&self) -> Option<RemoteSessionSnapshot> {
        self.state.read().await.snapshot_now()
    }

    pub async fn current_track_id(&self) -> Option<String> {
        self.state
            .read()
            .await
            .current_track
            .as_ref()
            .map(|t| t.id.clone())
    }

    // ------------------------------------------------------------------
    // Transport commands (user intent)
    // ------------------------------------------------------------------

    /// Replace the queue with a collection and start playing at
    /// `start_index` ("play this playlist" / "play this song in playlist").
    pub async fn play_collection(
        &self,
        tracks: Vec<Track>,
        start_index: usize,
        context_id: Option<String>,
    ) -> Result<()> {
        self.cancel_pending_restart();
        if tracks.is_empty() {
            warn!("play_collection with empty track list ignored");
            return Ok(());
        }
        info!(
            "Playing collection of {} tracks from index {}",
            tracks.len(),
            start_index
        );

        let mut state = self.state.write().await;
        state.queue.replace(tracks, start_index);
        state.session_context_id = context_id;
        self.emit_queue_changed(&state);

        let index = state.queue.current_index();
        let track = match state.queue.current() {
            Some(entry) => entry.track.clone(),
            None => return Ok(()),
        };
        self.load_locked(&mut state, track, Some(index));
        self.start_device_locked(&mut state);
        drop(state);

        self.signal_push(PushReason::TrackChange);
        Ok(())
    }

    /// Append tracks after the queue tail ("add to queue"). When the engine
    /// is idle the first appended track is loaded, paused.
    pub async fn enqueue(&self, tracks: Vec<Track>) -> Result<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().await;
        let was_idle = state.current_track.is_none();
        state.queue.append(tracks);
        self.emit_queue_changed(&state);

        if was_idle {
            let index = state.queue.current_index();
            if let Some(entry) = state.queue.current() {
                let track = entry.track.clone();
                self.load_locked(&mut state, track, Some(index));
                drop(state);
                self.signal_push(PushReason::TrackChange);
            }
        }
        Ok(())
    }

    /// Swap the current track without touching the queue (ad-hoc play).
    pub async fn load_track(&self, track: Track) -> Result<()> {
        self.cancel_pending_restart();
        let mut state = self.state.write().await;
        let index = state.queue.position_of_track(&track.id);
        if let Some(i) = index {
            state.queue.set_current_index(i);
        }
        self.load_locked(&mut state, track, index);
        drop(state);
        self.signal_push(PushReason::TrackChange);
        Ok(())
    }

    /// Start playback. No-op when idle or already playing.
    pub async fn play(&self) -> Result<()> {
        self.cancel_pending_restart();
        let mut state = self.state.write().await;
        match state.transport_status() {
            TransportStatus::Idle => {
                debug!("play ignored: no track loaded");
                return Ok(());
            }
            TransportStatus::LoadedPlaying => {
                debug!("play ignored: already playing");
                return Ok(());
            }
            TransportStatus::LoadedPaused => {}
        }

        if self.start_device_locked(&mut state) {
            drop(state);
            self.signal_push(PushReason::StateChange);
        }
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.cancel_pending_restart();
        let mut state = self.state.write().await;
        if !state.playing {
            debug!("pause ignored: not playing");
            return Ok(());
        }
        self.device.pause();
        state.playing = false;
        self.emit_playback_changed(&state);
        drop(state);
        self.signal_push(PushReason::StateChange);
        Ok(())
    }

    pub async fn toggle(&self) -> Result<()> {
        let playing = self.state.read().await.playing;
        if playing {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Seek to `t` seconds, clamped to `[0, duration]`. While the duration
    /// is still the 0.0 placeholder (media not yet loaded) the target is
    /// accepted as-is; the `DurationChange` observation re-clamps the
    /// position once the real duration is known. The device is told to
    /// jump only when its reported position differs from the target by
    /// more than the configured threshold, so device-driven position
    /// updates that are already close do not cause feedback jumps.
    pub async fn seek(&self, t: f64) -> Result<()> {
        self.cancel_pending_restart();
        let mut state = self.state.write().await;
        if state.current_track.is_none() {
            debug!("seek ignored: no track loaded");
            return Ok(());
        }
        let upper = if state.duration_seconds > 0.0 {
            state.duration_seconds
        } else {
            f64::MAX
        };
        let target = t.clamp(0.0, upper);
        state.position_seconds = target;

        let device_position = self.device.position_seconds();
        if (device_position - target).abs() > self.config.seek_force_threshold_seconds {
            self.device.seek(target);
        }
        drop(state);
        self.signal_push(PushReason::Seek);
        Ok(())
    }

    /// Explicit "next" control.
    pub async fn next(&self) -> Result<()> {
        self.cancel_pending_restart();
        self.advance(AdvanceTrigger::UserNext).await
    }

    /// Explicit "previous" control: early in a track it goes to the prior
    /// entry, later it only rewinds the current one.
    pub async fn previous(&self) -> Result<()> {
        self.cancel_pending_restart();
        let mut state = self.state.write().await;
        if state.current_track.is_none() && state.queue.is_empty() {
            debug!("previous ignored: nothing loaded");
            return Ok(());
        }

        if state.position_seconds < self.config.previous_restart_threshold_seconds {
            let Some(target) = state.queue.prev() else {
                debug!("previous ignored: queue empty");
                return Ok(());
            };
            state.queue.set_current_index(target);
            let track = match state.queue.get(target) {
                Some(entry) => entry.track.clone(),
                None => return Ok(()),
            };
            self.load_locked(&mut state, track, Some(target));
            self.start_device_locked(&mut state);
            drop(state);
            self.signal_push(PushReason::TrackChange);
        } else {
            state.position_seconds = 0.0;
            self.device.seek(0.0);
            drop(state);
            self.signal_push(PushReason::Seek);
        }
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        let mut state = self.state.write().await;
        state.volume = volume.clamp(0.0, 1.0);
        self.device.set_volume(state.volume);
        self.events.emit_lossy(SessionEvent::VolumeChanged {
            volume: state.volume,
            muted: state.muted,
            timestamp: time::now(),
        });
        Ok(())
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let mut state = self.state.write().await;
        state.muted = muted;
        self.device.set_muted(muted);
        self.events.emit_lossy(SessionEvent::VolumeChanged {
            volume: state.volume,
            muted: state.muted,
            timestamp: time::now(),
        });
        Ok(())
    }

    pub async fn set_play_mode(&self, mode: PlayMode) -> Result<()> {
        let mut state = self.state.write().await;
        state.play_mode = mode;
        self.events.emit_lossy(SessionEvent::PlayModeChanged {
            mode,
            timestamp: time::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue traversal
    // ------------------------------------------------------------------

    async fn advance(&self, trigger: AdvanceTrigger) -> Result<()> {
        let mut state = self.state.write().await;
        let mode = state.play_mode;

        if trigger == AdvanceTrigger::TrackEnded && mode == PlayMode::RepeatOne {
            if state.current_track.is_none() {
                return Ok(());
            }
            // Restart the same track: position to zero immediately, the
            // device "start" deferred briefly past its end-of-media cleanup.
            state.position_seconds = 0.0;
            state.playing = true;
            drop(state);
            self.schedule_deferred_restart();
            return Ok(());
        }

        if state.queue.is_empty() {
            info!("advance ({:?}) with empty queue: no-op", trigger);
            return Ok(());
        }

        let Some(target) = state.queue.next(mode) else {
            return Ok(());
        };

        // Under normal mode a wraparound-to-zero on track end means the
        // queue finished: restore the first entry, paused.
        let end_of_queue = trigger == AdvanceTrigger::TrackEnded
            && mode == PlayMode::Normal
            && target == 0
            && state.queue.current_index() == state.queue.len() - 1;

        state.queue.set_current_index(target);
        let track = match state.queue.get(target) {
            Some(entry) => entry.track.clone(),
            None => return Ok(()),
        };

        if end_of_queue {
            info!("End of queue reached, stopping");
            self.load_locked(&mut state, track, Some(target));
            drop(state);
            self.signal_push(PushReason::TrackChange);
            return Ok(());
        }

        state.queue.mark_consumed_through(target);
        self.load_locked(&mut state, track, Some(target));
        self.start_device_locked(&mut state);
        drop(state);
        self.signal_push(PushReason::TrackChange);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remote hydration (called by the sync channel only)
    // ------------------------------------------------------------------

    /// Apply a remote snapshot: restore context, never start playback, and
    /// never signal the push path. Ordering and same-track guards are the
    /// sync channel's responsibility; this method only applies.
    pub async fn apply_snapshot(&self, snapshot: &RemoteSessionSnapshot) -> Result<()> {
        // A pending repeat-one restart must not fire into the hydrated track
        self.cancel_pending_restart();
        let mut state = self.state.write().await;

        let index = match state.queue.position_of_track(&snapshot.track.id) {
            Some(i) => i,
            None => {
                state.queue.append(vec![snapshot.track.clone()]);
                self.emit_queue_changed(&state);
                state.queue.len() - 1
            }
        };
        state.queue.set_current_index(index);

        state.current_track = Some(snapshot.track.clone());
        state.position_seconds = snapshot.position_seconds.max(0.0);
        state.duration_seconds = snapshot.duration_seconds.max(0.0);
        state.volume = snapshot.volume.clamp(0.0, 1.0);
        state.playing = false;

        if let Err(e) = self.device.load(&snapshot.track) {
            warn!("Device load during hydration failed: {}", e);
        }
        self.device.seek(state.position_seconds);
        self.device.set_volume(state.volume);

        self.events.emit_lossy(SessionEvent::TrackChanged {
            track: snapshot.track.clone(),
            queue_index: Some(index),
            timestamp: time::now(),
        });
        self.events.emit_lossy(SessionEvent::SessionHydrated {
            track_id: snapshot.track.id.clone(),
            updated_at_epoch_ms: snapshot.updated_at_epoch_ms,
            timestamp: time::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Device observations
    // ------------------------------------------------------------------

    async fn handle_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::TimeUpdate { position_seconds } => {
                let mut state = self.state.write().await;
                if state.current_track.is_none() {
                    return;
                }
                state.position_seconds = position_seconds.max(0.0);
                self.events.emit_lossy(SessionEvent::PlaybackProgress {
                    position_seconds: state.position_seconds,
                    duration_seconds: state.duration_seconds,
                    timestamp: time::now(),
                });
            }
            DeviceEvent::DurationChange { duration_seconds } => {
                let mut state = self.state.write().await;
                state.duration_seconds = duration_seconds.max(0.0);
                if state.position_seconds > state.duration_seconds
                    && state.duration_seconds > 0.0
                {
                    state.position_seconds = state.duration_seconds;
                }
            }
            DeviceEvent::Started => {
                let mut state = self.state.write().await;
                if !state.playing && state.current_track.is_some() {
                    state.playing = true;
                    self.emit_playback_changed(&state);
                }
            }
            DeviceEvent::Paused => {
                let mut state = self.state.write().await;
                if state.playing {
                    state.playing = false;
                    self.emit_playback_changed(&state);
                }
            }
            DeviceEvent::Ended => {
                if let Err(e) = self.advance(AdvanceTrigger::TrackEnded).await {
                    warn!("advance on track end failed: {}", e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Load a track into the device and state: Loaded-Paused, position 0.
    fn load_locked(&self, state: &mut PlayerState, track: Track, index: Option<usize>) {
        state.position_seconds = 0.0;
        state.duration_seconds = track.duration_seconds.max(0.0);
        state.playing = false;
        if let Err(e) = self.device.load(&track) {
            warn!("Device load failed for track {}: {}", track.id, e);
        }
        self.device.set_volume(state.volume);
        self.device.set_muted(state.muted);
        state.current_track = Some(track.clone());

        self.events.emit_lossy(SessionEvent::TrackChanged {
            track,
            queue_index: index,
            timestamp: time::now(),
        });
    }

    /// Ask the device to start; a rejection leaves `playing` false.
    /// Returns whether playback actually started.
    fn start_device_locked(&self, state: &mut PlayerState) -> bool {
        match self.device.play() {
            Ok(()) => {
                state.playing = true;
                self.emit_playback_changed(state);
                true
            }
            Err(Error::PlaybackRejected(reason)) => {
                warn!("Playback rejected by device, staying paused: {}", reason);
                state.playing = false;
                false
            }
            Err(e) => {
                warn!("Device play failed: {}", e);
                state.playing = false;
                false
            }
        }
    }

    /// Repeat-one restart, deferred past the device's end-of-media cleanup.
    ///
    /// A rejected restart reverts `playing` like any other rejected start,
    /// so the pushed transport state never claims playback that is not
    /// happening.
    fn schedule_deferred_restart(&self) {
        self.cancel_pending_restart();
        let engine = self.weak.clone();
        let defer = self.config.restart_defer;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(defer).await;
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine.device.seek(0.0);
            if let Err(e) = engine.device.play() {
                warn!("Deferred repeat-one restart rejected, staying paused: {}", e);
                let mut state = engine.state.write().await;
                state.playing = false;
                engine.emit_playback_changed(&state);
            }
        });
        *self.restart_task.lock().unwrap() = Some(handle);
    }

    /// Abort a pending repeat-one restart, if any. Called at the top of
    /// every transport command.
    fn cancel_pending_restart(&self) {
        if let Some(task) = self.restart_task.lock().unwrap().take() {
            task.abort();
            debug!("Cancelled pending repeat-one restart");
        }
    }

    /// Request an immediate push; local intent only.
    fn signal_push(&self, reason: PushReason) {
        if self.push_intent.try_send(reason).is_err() {
            debug!("Push intent channel full, dropping");
        }
    }

    fn emit_playback_changed(&self, state: &PlayerState) {
        self.events.emit_lossy(SessionEvent::PlaybackStateChanged {
            playing: state.playing,
            timestamp: time::now(),
        });
    }

    fn emit_queue_changed(&self, state: &PlayerState) {
        self.events.emit_lossy(SessionEvent::QueueChanged {
            length: state.queue.len(),
            context_id: state.session_context_id.clone(),
            timestamp: time::now(),
        });
    }
}
