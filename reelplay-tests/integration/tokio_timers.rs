//! The engine on real tokio timers, with time paused and auto-advanced.

use std::sync::Arc;
use std::time::Duration;

use reelplay_core::scheduler::{Scheduler, TokioScheduler};
use reelplay_core::stream::{FaultKind, StreamFault};
use reelplay_core::testing::{AutoplayPolicy, ScriptedMedia};
use reelplay_core::{
    EngineContext, PlaybackConfig, PlaybackLifecycleController, PlaybackState, ReelplayConfig,
    SoundUnlockCoordinator, SourceKind, StreamEvent, UnlockAffordanceController,
};
use tokio::time::{sleep, timeout};

fn context() -> EngineContext {
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::new().unwrap());
    EngineContext::new(
        ReelplayConfig::for_testing(),
        SoundUnlockCoordinator::new(),
        scheduler,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_affordance_appears_after_debounce() {
    let context = context();
    let media = ScriptedMedia::new(AutoplayPolicy::DenyAll);
    let (backend, _sink) = media.backend();
    let player = PlaybackLifecycleController::mount(
        PlaybackConfig::background(SourceKind::File, "https://cdn.example.com/a.mp4"),
        backend,
        &context,
    );
    let affordance = UnlockAffordanceController::attach(&player, &context);
    let mut visibility = affordance.watch();

    player.set_active(true);
    media.settle(&player);

    sleep(Duration::from_millis(1400)).await;
    assert!(!affordance.is_visible());

    timeout(Duration::from_millis(200), visibility.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(affordance.is_visible());

    affordance.unlock_sound();
    assert!(!affordance.is_visible());
}

#[tokio::test(start_paused = true)]
async fn test_stream_recreated_after_backoff() {
    let context = context();
    let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
    let (backend, sink) = media.backend();
    let player = PlaybackLifecycleController::mount(
        PlaybackConfig::background(SourceKind::Stream, "https://cdn.example.com/live/index.m3u8"),
        backend,
        &context,
    );
    let mut updates = player.watch();
    player.set_active(true);
    media.settle(&player);
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().state(), PlaybackState::Playing);

    media.push_stream_event(
        sink,
        StreamEvent::fault(1, StreamFault::new(FaultKind::Other, true, "internalException")),
    );
    media.settle(&player);
    assert_eq!(player.session().playback_state, PlaybackState::Loading);

    sleep(Duration::from_millis(900)).await;
    assert_eq!(media.streams_created(), 1);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(media.streams_created(), 2);
    media.settle(&player);

    let snapshot = player.snapshot();
    assert_eq!(snapshot.state(), PlaybackState::Playing);
    assert_eq!(snapshot.counters.stream_recreations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_aborts_tokio_timers() {
    let scheduler = Arc::new(TokioScheduler::new().unwrap());
    let context = EngineContext::new(
        ReelplayConfig::for_testing(),
        SoundUnlockCoordinator::new(),
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    )
    .unwrap();
    let media = ScriptedMedia::new(AutoplayPolicy::DenyAll);
    let (backend, _sink) = media.backend();
    let player = PlaybackLifecycleController::mount(
        PlaybackConfig::background(SourceKind::File, "https://cdn.example.com/a.mp4"),
        backend,
        &context,
    );
    let affordance = UnlockAffordanceController::attach(&player, &context);
    player.set_active(true);
    media.settle(&player);

    assert_eq!(scheduler.pending(), 1);

    drop(affordance);
    drop(player);
    assert_eq!(scheduler.pending(), 0);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(media.pending(), 0);
    assert_eq!(context.coordinator().subscriber_count(), 0);
}
