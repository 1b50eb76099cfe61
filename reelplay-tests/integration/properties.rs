//! Behavioral properties every reel keeps, whatever the swipe sequence.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use reelplay_core::scheduler::{ManualScheduler, Scheduler, TimerHandle, TimerTask};
use reelplay_core::stream::{FaultKind, StreamFault};
use reelplay_core::testing::{AutoplayPolicy, RecordingObserver, ScriptedMedia};
use reelplay_core::{
    EngineContext, PlaybackConfig, PlaybackLifecycleController, PlaybackNotice, PlaybackState,
    ReelplayConfig, SinkEvent, SinkFault, SinkFaultKind, SoundUnlockCoordinator, SourceKind,
};
use reelplay_sim::ReelHarness;

const SLIDES: usize = 3;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn reel(policy: AutoplayPolicy) -> ReelHarness {
    ReelHarness::new(ReelplayConfig::for_testing(), policy).unwrap()
}

fn element(slide: usize) -> PlaybackConfig {
    match slide % 3 {
        0 => PlaybackConfig::background(SourceKind::File, format!("http://cdn.example.com/{slide}.mp4")),
        1 => PlaybackConfig::background(
            SourceKind::Stream,
            format!("https://cdn.example.com/{slide}/index.m3u8"),
        ),
        _ => PlaybackConfig::background(
            SourceKind::Embedded,
            format!("https://www.youtube.com/embed/clip{slide}"),
        ),
    }
}

fn fatal() -> StreamFault {
    StreamFault::new(FaultKind::Other, true, "bufferAddCodecError")
}

fn attach_recorder(reel: &ReelHarness, slide: usize) -> Arc<RecordingObserver> {
    let recorder = Arc::new(RecordingObserver::new());
    reel.player(slide).unwrap().add_observer(recorder.clone());
    recorder
}

#[derive(Debug, Clone)]
enum Step {
    Activate(Option<usize>),
    Unlock,
    Advance(u64),
    FinishActive,
    Remount(usize),
    StreamFault(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => proptest::option::of(0..SLIDES).prop_map(Step::Activate),
        1 => Just(Step::Unlock),
        3 => (10u64..2000).prop_map(Step::Advance),
        1 => Just(Step::FinishActive),
        1 => (0..SLIDES).prop_map(Step::Remount),
        1 => (0..SLIDES).prop_map(Step::StreamFault),
    ]
}

fn policy() -> impl Strategy<Value = AutoplayPolicy> {
    prop_oneof![
        Just(AutoplayPolicy::Permissive),
        Just(AutoplayPolicy::MutedOnly),
        Just(AutoplayPolicy::GestureBound),
        Just(AutoplayPolicy::DenyAll),
    ]
}

fn apply(reel: &mut ReelHarness, step: &Step) {
    match step {
        Step::Activate(target) => reel.activate(*target),
        Step::Unlock => reel.tap_unlock(),
        Step::Advance(millis) => reel.advance(ms(*millis)),
        Step::FinishActive => {
            if let Some(active) = reel.deck().active() {
                reel.finish(active);
            }
        }
        Step::Remount(slide) => {
            reel.mount(*slide, element(*slide));
        }
        Step::StreamFault(slide) => reel.fail_stream(*slide, fatal()),
    }
}

fn unlock_run(taps: usize, played: u64) -> (String, usize) {
    let mut reel = reel(AutoplayPolicy::MutedOnly);
    reel.mount(0, element(0));
    reel.mount(1, element(3));
    let recorders = [attach_recorder(&reel, 0), attach_recorder(&reel, 1)];

    reel.activate(Some(0));
    reel.advance(ms(played));
    for _ in 0..taps {
        reel.tap_unlock();
    }
    reel.advance(ms(500));

    let restarts = recorders
        .iter()
        .map(|recorder| recorder.count(|notice| matches!(notice, PlaybackNotice::Restarted { .. })))
        .sum();
    (serde_json::to_string(&reel.observe()).unwrap(), restarts)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Inactive players stay muted; at most one sink is audible, and only after unlock.
    #[test]
    fn test_no_audio_leak_across_swipes(
        policy in policy(),
        steps in prop::collection::vec(step(), 1..60),
    ) {
        let mut reel = reel(policy);
        for slide in 0..SLIDES {
            reel.mount(slide, element(slide));
        }

        for step in &steps {
            apply(&mut reel, step);
            let violations = reel.check_invariants();
            prop_assert!(violations.is_empty(), "{:?} after {:?}", violations, step);
            prop_assert!(reel.media().audible_sinks().len() <= 1);
        }
    }

    /// Repeated unlocks end where a single unlock ends.
    #[test]
    fn test_unlock_is_idempotent(taps in 1usize..6, played in 0u64..4000) {
        let (once, restarts_once) = unlock_run(1, played);
        let (many, restarts_many) = unlock_run(taps, played);
        prop_assert_eq!(once, many);
        prop_assert_eq!(restarts_once, 1);
        prop_assert_eq!(restarts_many, 1);
    }
}

#[test]
fn test_inactive_players_muted_after_unlock() {
    let mut reel = reel(AutoplayPolicy::MutedOnly);
    for slide in 0..SLIDES {
        reel.mount(slide, element(slide));
    }
    reel.activate(Some(1));
    reel.tap_unlock();

    for slide in [0, 2] {
        let session = reel.snapshot(slide).unwrap().session;
        assert!(session.muted);
        assert!(reel.media().is_muted(reel.sink(slide).unwrap()));
    }
    assert!(!reel.snapshot(1).unwrap().session.muted);
}

#[test]
fn test_rejected_play_waits_for_next_trigger() {
    let mut reel = reel(AutoplayPolicy::DenyAll);
    reel.mount(0, element(0));
    reel.activate(Some(0));
    let sink = reel.sink(0).unwrap();
    let plays = |reel: &ReelHarness| reel.media().play_calls(sink);
    assert_eq!(plays(&reel), 1);

    for _ in 0..20 {
        reel.advance(ms(100));
        assert_eq!(plays(&reel), 1);
    }

    // Readiness re-fire
    reel.media().push_sink_event(sink, SinkEvent::CanPlay);
    reel.settle();
    assert_eq!(plays(&reel), 2);
    reel.advance(ms(2000));
    assert_eq!(plays(&reel), 2);

    // Activation edge
    reel.activate(None);
    reel.activate(Some(0));
    assert_eq!(plays(&reel), 3);
    reel.advance(ms(2000));
    assert_eq!(plays(&reel), 3);

    // Unlock edge
    reel.tap_unlock();
    assert_eq!(plays(&reel), 4);
    reel.advance(ms(2000));
    assert_eq!(plays(&reel), 4);

    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Ready);
    assert_eq!(snapshot.counters.rejections, 4);
}

#[test]
fn test_fatal_fault_recreates_once_then_abandons() {
    let mut reel = reel(AutoplayPolicy::MutedOnly);
    reel.mount(0, element(1));
    let recorder = attach_recorder(&reel, 0);
    reel.activate(Some(0));
    let sink = reel.sink(0).unwrap();
    assert_eq!(reel.media().streams_created(), 1);

    reel.media().fail_streams(1);
    reel.fail_stream(0, fatal());
    assert!(!reel.media().is_playing(sink));

    reel.advance(ms(999));
    assert_eq!(reel.media().streams_created(), 1);
    reel.advance(ms(1));
    assert_eq!(reel.media().streams_created(), 2);

    reel.advance(ms(10_000));
    assert_eq!(reel.media().streams_created(), 2);

    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Abandoned);
    assert!(snapshot.session.muted);
    assert!(snapshot.session.last_error.is_some());
    assert_eq!(
        recorder.count(|notice| matches!(notice, PlaybackNotice::Abandoned { .. })),
        1
    );
}

#[test]
fn test_fatal_fault_recovers_when_recreation_succeeds() {
    let mut reel = reel(AutoplayPolicy::MutedOnly);
    reel.mount(0, element(1));
    reel.activate(Some(0));

    reel.fail_stream(0, fatal());
    assert_eq!(reel.snapshot(0).unwrap().state(), PlaybackState::Loading);
    reel.advance(ms(1000));

    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Playing);
    assert_eq!(snapshot.counters.stream_recreations, 1);
    assert_eq!(reel.media().stream_generation(reel.sink(0).unwrap()), Some(2));
}

#[test]
fn test_later_fatal_fault_is_recreated_after_recovery() {
    let mut reel = reel(AutoplayPolicy::MutedOnly);
    reel.mount(0, element(1));
    reel.activate(Some(0));
    let sink = reel.sink(0).unwrap();

    reel.fail_stream(0, fatal());
    reel.advance(ms(1000));
    assert_eq!(reel.snapshot(0).unwrap().state(), PlaybackState::Playing);

    reel.advance(Duration::from_secs(600));
    reel.fail_stream(0, fatal());
    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Loading);
    assert!(reel.scheduler().pending() >= 1);

    reel.advance(ms(1000));
    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Playing);
    assert_eq!(snapshot.counters.stream_recreations, 2);
    assert_eq!(reel.media().streams_created(), 3);
    assert!(reel.media().is_playing(sink));
    reel.assert_invariants().unwrap();
}

#[test]
fn test_affordance_never_shown_when_play_starts_in_window() {
    let mut reel = reel(AutoplayPolicy::DenyAll);
    reel.mount(0, element(0));
    reel.activate(Some(0));
    let sink = reel.sink(0).unwrap();

    for _ in 0..10 {
        reel.advance(ms(100));
        assert!(!reel.affordance_visible(0));
    }

    // The runtime relents and a readiness re-fire retries
    reel.media().set_policy(AutoplayPolicy::MutedOnly);
    reel.media().push_sink_event(sink, SinkEvent::CanPlay);
    reel.settle();
    assert_eq!(reel.snapshot(0).unwrap().state(), PlaybackState::Playing);

    for _ in 0..40 {
        reel.advance(ms(100));
        assert!(!reel.affordance_visible(0));
    }
}

#[test]
fn test_affordance_shown_exactly_at_debounce() {
    let mut reel = reel(AutoplayPolicy::DenyAll);
    reel.mount(0, element(0));
    reel.activate(Some(0));

    reel.advance(ms(1499));
    assert!(!reel.affordance_visible(0));
    reel.advance(ms(1));
    assert!(reel.affordance_visible(0));
}

/// Forwards scheduling but never cancels, so timers outlive teardown.
struct IgnoresCancel(Arc<ManualScheduler>);

impl Scheduler for IgnoresCancel {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        self.0.schedule(delay, task)
    }

    fn cancel(&self, _handle: TimerHandle) {}
}

#[test]
fn test_teardown_cancels_everything() {
    let mut reel = reel(AutoplayPolicy::DenyAll);
    reel.mount(0, element(1));
    reel.activate(Some(0));
    reel.fail_stream(0, fatal());
    let sink = reel.sink(0).unwrap();
    assert!(reel.scheduler().pending() >= 1);

    reel.unmount(0);
    let calls = reel.media().calls(sink).len();
    let stream_calls = reel.media().stream_calls(sink).len();
    assert_eq!(reel.scheduler().pending(), 0);
    assert_eq!(reel.context().coordinator().subscriber_count(), 0);

    reel.advance(ms(5000));
    reel.tap_unlock();
    assert_eq!(reel.media().streams_created(), 1);
    assert_eq!(reel.media().calls(sink).len(), calls);
    assert_eq!(reel.media().stream_calls(sink).len(), stream_calls);
    assert!(reel.media().is_destroyed(sink));
}

#[test]
fn test_late_timer_after_teardown_has_no_effect() {
    let clock = Arc::new(ManualScheduler::new());
    let context = EngineContext::new(
        ReelplayConfig::for_testing(),
        SoundUnlockCoordinator::new(),
        Arc::new(IgnoresCancel(Arc::clone(&clock))) as Arc<dyn Scheduler>,
    )
    .unwrap();
    let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);

    let (backend, sink) = media.backend();
    let player = PlaybackLifecycleController::mount(element(0), backend, &context);
    player.set_active(true);
    media.settle(&player);
    media.fail_sink(sink, SinkFault::new(SinkFaultKind::Network, "connection reset"));
    media.settle(&player);
    assert_eq!(player.session().playback_state, PlaybackState::Retrying);

    let (stream_backend, stream_sink) = media.backend();
    let streaming = PlaybackLifecycleController::mount(element(1), stream_backend, &context);
    streaming.set_active(true);
    media.settle(&streaming);
    media.push_stream_event(
        stream_sink,
        reelplay_core::StreamEvent::fault(1, fatal()),
    );
    media.settle(&streaming);
    assert_eq!(clock.pending(), 2);

    player.teardown();
    streaming.teardown();
    let before = (media.calls(sink), media.calls(stream_sink), media.streams_created());

    // Both timers still fire; the torn-down players ignore them
    assert_eq!(clock.advance(ms(5000)), 2);
    assert_eq!(media.pending(), 0);
    assert_eq!(
        (media.calls(sink), media.calls(stream_sink), media.streams_created()),
        before
    );
    assert_eq!(player.session().playback_state, PlaybackState::Retrying);
    assert!(!player.is_mounted());
}
