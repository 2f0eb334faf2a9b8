//! Audio output device
//!
//! Thin wrapper around a single local audio output. The device owns one
//! active media resource at a time: swapping tracks tears down the old sink
//! and creates a new one, never holding two sources alive.
//!
//! The engine talks to the device through the [`AudioDevice`] contract:
//! synchronous commands in, a broadcast stream of [`DeviceEvent`]
//! observations out. Observations report what the output actually did; they
//! are not commands and the engine treats them as such.

use std::io::Cursor;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use harmonia_common::model::Track;

use crate::error::{Error, Result};

/// Observations emitted by the audio output.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Periodic transport position report while playing
    TimeUpdate { position_seconds: f64 },
    /// Authoritative media duration became known (refines the catalog hint)
    DurationChange { duration_seconds: f64 },
    /// Output started producing audio
    Started,
    /// Output paused
    Paused,
    /// Media played to its end
    Ended,
}

/// Contract between the session engine and a local audio output.
///
/// Commands are synchronous and non-blocking; anything slow (source fetch,
/// decode) happens on background tasks and is reported via `observations()`.
pub trait AudioDevice: Send + Sync {
    /// Swap the media source and begin buffering. Does not start playback.
    fn load(&self, track: &Track) -> Result<()>;

    /// Start playback. May be rejected by the platform
    /// ([`Error::PlaybackRejected`]); the caller treats that as recoverable.
    fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Jump to an absolute position in seconds.
    fn seek(&self, position_seconds: f64);

    fn set_volume(&self, volume: f32);

    fn set_muted(&self, muted: bool);

    /// Tear down the active media resource.
    fn unload(&self);

    /// Device-reported transport position in seconds.
    fn position_seconds(&self) -> f64;

    /// Subscribe to device observations.
    fn observations(&self) -> broadcast::Receiver<DeviceEvent>;
}

/// Interval between `TimeUpdate` observations
const POSITION_TICK: Duration = Duration::from_secs(1);

struct DeviceInner {
    sink: Option<Sink>,
    fetch_task: Option<JoinHandle<()>>,
    /// Fetched media bytes, kept so repeat restarts re-arm without refetching
    media: Option<Arc<Vec<u8>>>,
    /// Media decoded and appended to the sink
    media_ready: bool,
    /// Last load/start failure, reported on the next play() attempt
    failed: Option<String>,
    playing: bool,
    /// Position accumulated up to the last pause/seek
    position_base: f64,
    /// Set while playing; elapsed time since extends `position_base`
    resumed_at: Option<Instant>,
    duration_seconds: f64,
    volume: f32,
    muted: bool,
}

impl DeviceInner {
    fn position(&self) -> f64 {
        match self.resumed_at {
            Some(at) if self.playing => self.position_base + at.elapsed().as_secs_f64(),
            _ => self.position_base,
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn apply_volume(&self) {
        if let Some(sink) = &self.sink {
            sink.set_volume(self.effective_volume());
        }
    }
}

/// rodio-backed audio output: one `Sink` at a time, source fetched over HTTP.
pub struct RodioDevice {
    handle: OutputStreamHandle,
    http: reqwest::Client,
    events: broadcast::Sender<DeviceEvent>,
    inner: Mutex<DeviceInner>,
    /// Self-reference for background tasks; they must not keep the device alive
    weak: Weak<RodioDevice>,
}

impl RodioDevice {
    /// Open the default audio output.
    ///
    /// Must be called from within a tokio runtime; the device spawns a
    /// position ticker that lives as long as the device does.
    pub fn new() -> Result<Arc<Self>> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| Error::Device(format!("no audio output available: {}", e)))?;
        // The stream must outlive every sink created from its handle; the
        // device is session-scoped, so leak it for the process lifetime.
        std::mem::forget(stream);

        let (events, _) = broadcast::channel(64);
        let device = Arc::new_cyclic(|weak| Self {
            handle,
            http: reqwest::Client::new(),
            events,
            inner: Mutex::new(DeviceInner {
                sink: None,
                fetch_task: None,
                media: None,
                media_ready: false,
                failed: None,
                playing: false,
                position_base: 0.0,
                resumed_at: None,
                duration_seconds: 0.0,
                volume: 0.5,
                muted: false,
            }),
            weak: weak.clone(),
        });

        let weak = Arc::downgrade(&device);
        tokio::spawn(position_ticker(weak));

        Ok(device)
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }

    /// Decode fetched media and attach it to a fresh sink.
    fn install_media(&self, bytes: Vec<u8>) {
        let media = Arc::new(bytes);
        let source = match Decoder::new(Cursor::new((*media).clone())) {
            Ok(source) => source,
            Err(e) => {
                warn!("Media decode failed: {}", e);
                self.inner.lock().unwrap().failed = Some(format!("decode failed: {}", e));
                return;
            }
        };
        let duration = source.total_duration().map(|d| d.as_secs_f64());

        let sink = match Sink::try_new(&self.handle) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Audio sink creation failed: {}", e);
                self.inner.lock().unwrap().failed = Some(format!("sink failed: {}", e));
                return;
            }
        };
        sink.pause();
        sink.append(source);

        let mut inner = self.inner.lock().unwrap();
        sink.set_volume(inner.effective_volume());
        inner.media = Some(media);
        if let Some(d) = duration {
            inner.duration_seconds = d;
        }
        // play() may have arrived while the media was still buffering
        if inner.playing {
            sink.play();
            inner.resumed_at = Some(Instant::now());
        }
        inner.sink = Some(sink);
        inner.media_ready = true;
        let duration_seconds = inner.duration_seconds;
        drop(inner);

        self.emit(DeviceEvent::DurationChange { duration_seconds });
    }
}

impl AudioDevice for RodioDevice {
    fn load(&self, track: &Track) -> Result<()> {
        if track.source_url.is_empty() {
            return Err(Error::Device("track has no source url".to_string()));
        }
        debug!("Loading media source for track {}", track.id);

        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.fetch_task.take() {
            task.abort();
        }
        if let Some(sink) = inner.sink.take() {
            sink.stop();
        }
        inner.media = None;
        inner.media_ready = false;
        inner.failed = None;
        inner.playing = false;
        inner.position_base = 0.0;
        inner.resumed_at = None;
        inner.duration_seconds = track.duration_seconds;

        let http = self.http.clone();
        let url = track.source_url.clone();
        let weak = self.weak.clone();
        inner.fetch_task = Some(tokio::spawn(async move {
            let result = async {
                let response = http.get(&url).send().await?.error_for_status()?;
                Ok::<_, reqwest::Error>(response.bytes().await?)
            }
            .await;

            let Some(device) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(bytes) => device.install_media(bytes.to_vec()),
                Err(e) => {
                    warn!("Media fetch failed: {}", e);
                    device.inner.lock().unwrap().failed = Some(format!("fetch failed: {}", e));
                }
            }
        }));

        Ok(())
    }

    fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = &inner.failed {
            return Err(Error::PlaybackRejected(reason.clone()));
        }
        if inner.playing {
            return Ok(());
        }
        // A drained sink (track played to its end) is re-armed from the
        // cached media so repeat-one can restart without refetching.
        let drained = inner
            .sink
            .as_ref()
            .map(|s| s.empty())
            .unwrap_or(inner.media_ready);
        if inner.media_ready && drained {
            if let Some(media) = inner.media.clone() {
                match Decoder::new(Cursor::new((*media).clone())) {
                    Ok(source) => match Sink::try_new(&self.handle) {
                        Ok(sink) => {
                            sink.set_volume(inner.effective_volume());
                            sink.append(source);
                            inner.sink = Some(sink);
                            inner.position_base = 0.0;
                        }
                        Err(e) => {
                            return Err(Error::PlaybackRejected(format!("sink failed: {}", e)))
                        }
                    },
                    Err(e) => {
                        return Err(Error::PlaybackRejected(format!("decode failed: {}", e)))
                    }
                }
            }
        }
        inner.playing = true;
        inner.resumed_at = Some(Instant::now());
        if let Some(sink) = &inner.sink {
            sink.play();
        }
        drop(inner);
        self.emit(DeviceEvent::Started);
        Ok(())
    }

    fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.playing {
            return;
        }
        inner.position_base = inner.position();
        inner.resumed_at = None;
        inner.playing = false;
        if let Some(sink) = &inner.sink {
            sink.pause();
        }
        drop(inner);
        self.emit(DeviceEvent::Paused);
    }

    fn seek(&self, position_seconds: f64) {
        let target = position_seconds.max(0.0);
        let mut inner = self.inner.lock().unwrap();
        inner.position_base = target;
        if inner.playing {
            inner.resumed_at = Some(Instant::now());
        }
        if let Some(sink) = &inner.sink {
            if let Err(e) = sink.try_seek(Duration::from_secs_f64(target)) {
                debug!("Sink seek not supported for current source: {:?}", e);
            }
        }
    }

    fn set_volume(&self, volume: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = volume.clamp(0.0, 1.0);
        inner.apply_volume();
    }

    fn set_muted(&self, muted: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.muted = muted;
        inner.apply_volume();
    }

    fn unload(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(task) = inner.fetch_task.take() {
            task.abort();
        }
        if let Some(sink) = inner.sink.take() {
            sink.stop();
        }
        inner.media = None;
        inner.media_ready = false;
        inner.failed = None;
        inner.playing = false;
        inner.position_base = 0.0;
        inner.resumed_at = None;
        inner.duration_seconds = 0.0;
    }

    fn position_seconds(&self) -> f64 {
        self.inner.lock().unwrap().position()
    }

    fn observations(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

/// Periodic observation loop: TimeUpdate while playing, Ended when the sink
/// drains. Stops when the device is dropped.
async fn position_ticker(device: Weak<RodioDevice>) {
    let mut tick = tokio::time::interval(POSITION_TICK);
    loop {
        tick.tick().await;
        let Some(device) = device.upgrade() else {
            break;
        };

        let mut ended = false;
        let mut update = None;
        {
            let mut inner = device.inner.lock().unwrap();
            if inner.playing && inner.media_ready {
                let drained = inner.sink.as_ref().map(|s| s.empty()).unwrap_or(false);
                if drained {
                    inner.position_base = inner.duration_seconds;
                    inner.resumed_at = None;
                    inner.playing = false;
                    ended = true;
                } else {
                    update = Some(inner.position());
                }
            }
        }

        if ended {
            device.emit(DeviceEvent::Ended);
        } else if let Some(position_seconds) = update {
            device.emit(DeviceEvent::TimeUpdate { position_seconds });
        }
    }
}
