//! Shared test doubles: a command-recording audio device and an in-process
//! loopback transport for the session store channel.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};

use harmonia_common::config::SessionConfig;
use harmonia_common::events::EventBus;
use harmonia_common::model::{RemoteSessionSnapshot, Track};
use harmonia_session::device::{AudioDevice, DeviceEvent};
use harmonia_session::engine::SessionEngine;
use harmonia_session::error::{Error, Result};
use harmonia_session::sync::{
    ChannelEvent, ClientFrame, SessionTransport, SyncChannel, TransportConnection,
};

pub fn track(id: &str) -> Track {
    Track {
        id: id.to_string(),
        source_url: format!("https://cdn.example/{id}.mp3"),
        title: id.to_uppercase(),
        duration_seconds: 180.0,
        image_url: None,
    }
}

pub fn snapshot(track_id: &str, updated_at_epoch_ms: i64) -> RemoteSessionSnapshot {
    RemoteSessionSnapshot {
        track: track(track_id),
        position_seconds: 30.0,
        duration_seconds: 180.0,
        playing: true,
        volume: 0.8,
        updated_at_epoch_ms,
    }
}

/// Config tuned for tests: fast backoff and defer, push windows wide enough
/// that the periodic timer and collapse expiry never fire mid-test.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        push_interval: Duration::from_secs(3600),
        push_collapse_window: Duration::from_secs(60),
        reconnect_backoff_initial: Duration::from_millis(10),
        reconnect_backoff_max: Duration::from_millis(50),
        presence_poll_interval: Duration::from_millis(25),
        restart_defer: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

/// Opt-in log output: `RUST_LOG=debug cargo test -- --nocapture`
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// MockDevice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Load(String),
    Play,
    Pause,
    Seek(f64),
    SetVolume(f32),
    SetMuted(bool),
    Unload,
}

/// Records every command, supports scripted play rejection and manual
/// observation injection.
pub struct MockDevice {
    commands: Mutex<Vec<DeviceCommand>>,
    reject_play: Mutex<Option<String>>,
    position: Mutex<f64>,
    events: broadcast::Sender<DeviceEvent>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            reject_play: Mutex::new(None),
            position: Mutex::new(0.0),
            events,
        })
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_of(&self, wanted: &DeviceCommand) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == wanted)
            .count()
    }

    pub fn reject_next_play(&self, reason: &str) {
        *self.reject_play.lock().unwrap() = Some(reason.to_string());
    }

    pub fn set_position(&self, seconds: f64) {
        *self.position.lock().unwrap() = seconds;
    }

    /// Inject a device observation, as the real output would report it.
    pub fn emit(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }
}

impl AudioDevice for MockDevice {
    fn load(&self, track: &Track) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .push(DeviceCommand::Load(track.id.clone()));
        *self.position.lock().unwrap() = 0.0;
        Ok(())
    }

    fn play(&self) -> Result<()> {
        if let Some(reason) = self.reject_play.lock().unwrap().take() {
            return Err(Error::PlaybackRejected(reason));
        }
        self.commands.lock().unwrap().push(DeviceCommand::Play);
        Ok(())
    }

    fn pause(&self) {
        self.commands.lock().unwrap().push(DeviceCommand::Pause);
    }

    fn seek(&self, position_seconds: f64) {
        self.commands
            .lock()
            .unwrap()
            .push(DeviceCommand::Seek(position_seconds));
        *self.position.lock().unwrap() = position_seconds;
    }

    fn set_volume(&self, volume: f32) {
        self.commands
            .lock()
            .unwrap()
            .push(DeviceCommand::SetVolume(volume));
    }

    fn set_muted(&self, muted: bool) {
        self.commands
            .lock()
            .unwrap()
            .push(DeviceCommand::SetMuted(muted));
    }

    fn unload(&self) {
        self.commands.lock().unwrap().push(DeviceCommand::Unload);
    }

    fn position_seconds(&self) -> f64 {
        *self.position.lock().unwrap()
    }

    fn observations(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// LoopbackTransport
// ---------------------------------------------------------------------------

struct LoopbackState {
    connectable: bool,
    connect_count: usize,
    hydrate_on_connect: Option<RemoteSessionSnapshot>,
    server_tx: Option<mpsc::Sender<ChannelEvent>>,
}

/// In-process transport: the test plays the session store.
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
    received: Arc<Mutex<Vec<ClientFrame>>>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(LoopbackState {
                connectable: true,
                connect_count: 0,
                hydrate_on_connect: None,
                server_tx: None,
            })),
            received: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn set_connectable(&self, connectable: bool) {
        self.state.lock().unwrap().connectable = connectable;
    }

    pub fn set_hydrate_on_connect(&self, snapshot: Option<RemoteSessionSnapshot>) {
        self.state.lock().unwrap().hydrate_on_connect = snapshot;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    /// Frames the "store" has received from the client so far.
    pub fn sent_frames(&self) -> Vec<ClientFrame> {
        self.received.lock().unwrap().clone()
    }

    pub fn pushed_snapshots(&self) -> Vec<RemoteSessionSnapshot> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::Push(snapshot) => Some(snapshot),
                ClientFrame::RosterRequest => None,
            })
            .collect()
    }

    /// Push a server frame down the live connection.
    pub async fn send(&self, event: ChannelEvent) {
        let tx = self.state.lock().unwrap().server_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Drop the server end; the client sees the stream close.
    pub fn disconnect(&self) {
        self.state.lock().unwrap().server_tx = None;
    }
}

impl SessionTransport for LoopbackTransport {
    fn connect(&self, _token: String) -> BoxFuture<'static, Result<TransportConnection>> {
        let state = Arc::clone(&self.state);
        let received = Arc::clone(&self.received);

        Box::pin(async move {
            // All lock work happens before the first await
            let (server_tx, hydrate, connection) = {
                let mut state = state.lock().unwrap();
                state.connect_count += 1;
                if !state.connectable {
                    return Err(Error::Channel("loopback refusing connections".into()));
                }
                let (server_tx, incoming) = mpsc::channel::<ChannelEvent>(32);
                let (outgoing, mut outgoing_rx) = mpsc::channel::<ClientFrame>(32);
                state.server_tx = Some(server_tx.clone());

                let received = Arc::clone(&received);
                tokio::spawn(async move {
                    while let Some(frame) = outgoing_rx.recv().await {
                        received.lock().unwrap().push(frame);
                    }
                });

                (
                    server_tx,
                    state.hydrate_on_connect.clone(),
                    TransportConnection { incoming, outgoing },
                )
            };

            if let Some(snapshot) = hydrate {
                let _ = server_tx.send(ChannelEvent::Hydrate(Some(snapshot))).await;
            }
            Ok(connection)
        })
    }
}

// ---------------------------------------------------------------------------
// Assembled stack
// ---------------------------------------------------------------------------

pub struct TestStack {
    pub device: Arc<MockDevice>,
    pub engine: Arc<SessionEngine>,
    pub transport: Arc<LoopbackTransport>,
    pub channel: Arc<SyncChannel>,
    pub events: Arc<EventBus>,
}

/// Engine without any channel attached; the push receiver is returned so
/// tests can observe (or ignore) local intents.
pub fn engine_only() -> (TestStack, mpsc::Receiver<harmonia_session::sync::PushReason>) {
    init_logging();
    let device = MockDevice::new();
    let events = Arc::new(EventBus::new(64));
    let (engine, push_rx) = SessionEngine::new(device.clone(), events.clone(), test_config());
    engine.start();

    let transport = LoopbackTransport::new();
    let channel = SyncChannel::new(
        engine.clone(),
        transport.clone(),
        events.clone(),
        test_config(),
    );

    (
        TestStack {
            device,
            engine,
            transport,
            channel,
            events,
        },
        push_rx,
    )
}

/// Full stack with the channel running and connected.
pub async fn connected_stack() -> TestStack {
    let (stack, push_rx) = engine_only();
    stack
        .channel
        .start(Arc::new(|| Some("test-token".to_string())), push_rx);

    let mut connected = stack.channel.subscribe_connected();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !*connected.borrow() {
            connected.changed().await.unwrap();
        }
    })
    .await
    .expect("channel never connected");

    stack
}
