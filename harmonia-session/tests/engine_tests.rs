//! State machine behavior against a command-recording device.

mod helpers;

use helpers::{engine_only, settle, track, DeviceCommand};

use harmonia_common::model::PlayMode;
use harmonia_session::device::DeviceEvent;
use harmonia_session::state::TransportStatus;

#[tokio::test]
async fn test_play_collection_loads_and_plays_start_track() {
    let (stack, _push_rx) = engine_only();

    stack
        .engine
        .play_collection(
            vec![track("a"), track("b"), track("c")],
            1,
            Some("playlist-7".into()),
        )
        .await
        .unwrap();

    let state = stack.engine.state().await;
    assert_eq!(state.current_track.as_ref().unwrap().id, "b");
    assert_eq!(state.queue.current_index(), 1);
    assert!(state.playing);
    assert_eq!(state.session_context_id.as_deref(), Some("playlist-7"));
    assert_eq!(stack.device.count_of(&DeviceCommand::Load("b".into())), 1);
    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 1);
}

#[tokio::test]
async fn test_play_is_idempotent() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();

    let before = stack.engine.state().await;
    stack.engine.play().await.unwrap();
    stack.engine.play().await.unwrap();
    let after = stack.engine.state().await;

    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 1);
    assert_eq!(before.playing, after.playing);
    assert_eq!(before.queue.current_index(), after.queue.current_index());
}

#[tokio::test]
async fn test_play_when_idle_is_a_noop() {
    let (stack, _push_rx) = engine_only();
    stack.engine.play().await.unwrap();

    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 0);
    assert_eq!(
        stack.engine.state().await.transport_status(),
        TransportStatus::Idle
    );
}

#[tokio::test]
async fn test_rejected_play_stays_paused_and_recovers() {
    let (stack, _push_rx) = engine_only();
    stack.device.reject_next_play("autoplay blocked");

    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();
    assert!(!stack.engine.state().await.playing);

    // The next attempt is not poisoned
    stack.engine.play().await.unwrap();
    assert!(stack.engine.state().await.playing);
}

#[tokio::test]
async fn test_three_track_ends_walk_the_queue_then_stop() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a"), track("b"), track("c")], 0, None)
        .await
        .unwrap();

    let mut indices = Vec::new();
    for _ in 0..3 {
        stack.device.emit(DeviceEvent::Ended);
        settle().await;
        indices.push(stack.engine.state().await.queue.current_index());
    }
    assert_eq!(indices, vec![1, 2, 0]);

    // Wraparound under normal mode ends the session: entry 0 is loaded, paused
    let state = stack.engine.state().await;
    assert_eq!(state.current_track.as_ref().unwrap().id, "a");
    assert!(!state.playing);
}

#[tokio::test]
async fn test_repeat_mode_keeps_playing_past_the_wraparound() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a"), track("b")], 1, None)
        .await
        .unwrap();
    stack.engine.set_play_mode(PlayMode::Repeat).await.unwrap();

    stack.device.emit(DeviceEvent::Ended);
    settle().await;

    let state = stack.engine.state().await;
    assert_eq!(state.queue.current_index(), 0);
    assert!(state.playing);
}

#[tokio::test]
async fn test_repeat_one_restarts_same_track_after_defer() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a"), track("b")], 1, None)
        .await
        .unwrap();
    stack
        .engine
        .set_play_mode(PlayMode::RepeatOne)
        .await
        .unwrap();

    stack.device.emit(DeviceEvent::Ended);
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let state = stack.engine.state().await;
    assert_eq!(state.queue.current_index(), 1, "index unchanged");
    assert_eq!(state.position_seconds, 0.0);
    assert!(state.playing);
    // The deferred restart rewound the device and started it again
    assert!(stack.device.count_of(&DeviceCommand::Seek(0.0)) >= 1);
    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 2);
}

#[tokio::test]
async fn test_rejected_deferred_restart_reverts_to_paused() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();
    stack
        .engine
        .set_play_mode(PlayMode::RepeatOne)
        .await
        .unwrap();

    stack.device.reject_next_play("autoplay blocked");
    stack.device.emit(DeviceEvent::Ended);
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    let state = stack.engine.state().await;
    assert!(
        !state.playing,
        "state claims playing after the device rejected the restart"
    );
    // Only the initial start reached the device
    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 1);
}

#[tokio::test]
async fn test_transport_command_cancels_pending_repeat_one_restart() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();
    stack
        .engine
        .set_play_mode(PlayMode::RepeatOne)
        .await
        .unwrap();

    stack.device.emit(DeviceEvent::Ended);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    stack.engine.pause().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    // No restart fired after the pause
    let commands = stack.device.commands();
    let pause_at = commands
        .iter()
        .rposition(|c| *c == DeviceCommand::Pause)
        .unwrap();
    assert!(
        !commands[pause_at..].contains(&DeviceCommand::Play),
        "deferred restart survived the pause: {:?}",
        commands
    );
    assert!(!stack.engine.state().await.playing);
}

#[tokio::test]
async fn test_previous_early_in_track_goes_back_one() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a"), track("b"), track("c")], 2, None)
        .await
        .unwrap();

    stack.device.emit(DeviceEvent::TimeUpdate {
        position_seconds: 1.5,
    });
    settle().await;
    stack.engine.previous().await.unwrap();

    let state = stack.engine.state().await;
    assert_eq!(state.queue.current_index(), 1);
    assert_eq!(state.position_seconds, 0.0);
}

#[tokio::test]
async fn test_previous_late_in_track_only_rewinds() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a"), track("b"), track("c")], 2, None)
        .await
        .unwrap();

    stack.device.emit(DeviceEvent::TimeUpdate {
        position_seconds: 10.0,
    });
    settle().await;
    stack.engine.previous().await.unwrap();

    let state = stack.engine.state().await;
    assert_eq!(state.queue.current_index(), 2);
    assert_eq!(state.position_seconds, 0.0);
    assert!(stack.device.count_of(&DeviceCommand::Seek(0.0)) >= 1);
}

#[tokio::test]
async fn test_seek_clamps_and_skips_small_device_jumps() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();

    // Within a second of where the device already is: state moves, device not told
    stack.device.set_position(10.0);
    stack.engine.seek(10.5).await.unwrap();
    assert_eq!(stack.engine.state().await.position_seconds, 10.5);
    assert_eq!(stack.device.count_of(&DeviceCommand::Seek(10.5)), 0);

    // A real jump reaches the device
    stack.engine.seek(50.0).await.unwrap();
    assert_eq!(stack.device.count_of(&DeviceCommand::Seek(50.0)), 1);

    // Beyond the end clamps to the duration
    stack.engine.seek(500.0).await.unwrap();
    assert_eq!(stack.engine.state().await.position_seconds, 180.0);
}

#[tokio::test]
async fn test_late_duration_reclamps_an_optimistic_seek() {
    let (stack, _push_rx) = engine_only();
    let mut unsized_track = track("a");
    unsized_track.duration_seconds = 0.0;
    stack.engine.load_track(unsized_track).await.unwrap();

    // No duration yet: the target is taken at face value
    stack.engine.seek(500.0).await.unwrap();
    assert_eq!(stack.engine.state().await.position_seconds, 500.0);

    stack.device.emit(DeviceEvent::DurationChange {
        duration_seconds: 180.0,
    });
    settle().await;
    assert_eq!(stack.engine.state().await.position_seconds, 180.0);
}

#[tokio::test]
async fn test_enqueue_when_idle_loads_first_track_paused() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .enqueue(vec![track("a"), track("b")])
        .await
        .unwrap();

    let state = stack.engine.state().await;
    assert_eq!(state.transport_status(), TransportStatus::LoadedPaused);
    assert_eq!(state.current_track.as_ref().unwrap().id, "a");
    assert_eq!(state.queue.len(), 2);
    assert_eq!(stack.device.count_of(&DeviceCommand::Play), 0);
}

#[tokio::test]
async fn test_enqueue_while_playing_leaves_current_track_alone() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();
    stack.engine.enqueue(vec![track("b")]).await.unwrap();

    let state = stack.engine.state().await;
    assert_eq!(state.current_track.as_ref().unwrap().id, "a");
    assert!(state.playing);
    assert_eq!(state.queue.len(), 2);
}

#[tokio::test]
async fn test_toggle_flips_between_playing_and_paused() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();

    stack.engine.toggle().await.unwrap();
    assert!(!stack.engine.state().await.playing);
    stack.engine.toggle().await.unwrap();
    assert!(stack.engine.state().await.playing);
}

#[tokio::test]
async fn test_volume_clamps_and_follows_to_device() {
    let (stack, _push_rx) = engine_only();
    stack.engine.set_volume(1.7).await.unwrap();
    assert_eq!(stack.engine.state().await.volume, 1.0);
    assert_eq!(stack.device.count_of(&DeviceCommand::SetVolume(1.0)), 1);

    stack.engine.set_muted(true).await.unwrap();
    assert!(stack.engine.state().await.muted);
    assert_eq!(stack.device.count_of(&DeviceCommand::SetMuted(true)), 1);
}

#[tokio::test]
async fn test_device_observations_update_position_and_duration() {
    let (stack, _push_rx) = engine_only();
    stack
        .engine
        .play_collection(vec![track("a")], 0, None)
        .await
        .unwrap();

    stack.device.emit(DeviceEvent::DurationChange {
        duration_seconds: 212.4,
    });
    stack.device.emit(DeviceEvent::TimeUpdate {
        position_seconds: 33.0,
    });
    settle().await;

    let state = stack.engine.state().await;
    assert_eq!(state.duration_seconds, 212.4);
    assert_eq!(state.position_seconds, 33.0);
}

#[tokio::test]
async fn test_next_with_empty_queue_is_a_noop() {
    let (stack, _push_rx) = engine_only();
    stack.engine.next().await.unwrap();
    assert_eq!(
        stack.engine.state().await.transport_status(),
        TransportStatus::Idle
    );
    assert!(stack.device.commands().is_empty());
}
