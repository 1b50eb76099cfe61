//! Reference scenarios, checked down to the commands each sink received.

use std::time::Duration;

use reelplay_core::testing::{AutoplayPolicy, SinkCall};
use reelplay_core::{PlaybackConfig, PlaybackState, ReelplayConfig, SourceKind};
use reelplay_sim::{ReelHarness, ScenarioKind, run_scenario};

fn looping_clip() -> PlaybackConfig {
    let config = PlaybackConfig::from_json(
        r#"{"sourceKind":"file","url":"https://cdn.example.com/a.mp4","autoplay":true,"loop":true,"initiallyMuted":true}"#,
    )
    .unwrap();
    assert_eq!(
        config,
        PlaybackConfig::background(SourceKind::File, "https://cdn.example.com/a.mp4")
    );
    config
}

fn reel() -> ReelHarness {
    let mut reel = ReelHarness::new(ReelplayConfig::for_testing(), AutoplayPolicy::MutedOnly).unwrap();
    reel.mount(0, looping_clip());
    reel
}

fn seeks(reel: &ReelHarness) -> usize {
    let sink = reel.sink(0).unwrap();
    reel.media()
        .calls(sink)
        .iter()
        .filter(|call| matches!(call, SinkCall::Seek(_)))
        .count()
}

#[test]
fn test_activation_without_unlock_plays_muted() {
    let mut reel = reel();
    reel.activate(Some(0));
    reel.advance(Duration::from_secs(10));

    let session = reel.snapshot(0).unwrap().session;
    assert_eq!(session.playback_state, PlaybackState::Playing);
    assert!(session.muted);
    assert!(reel.media().audible_sinks().is_empty());
    reel.assert_invariants().unwrap();
}

#[test]
fn test_unlock_while_playing_restarts_once_with_sound() {
    let mut reel = reel();
    reel.activate(Some(0));
    reel.advance(Duration::from_secs(4));
    assert_eq!(seeks(&reel), 0);

    reel.tap_unlock();
    let snapshot = reel.snapshot(0).unwrap();
    assert_eq!(snapshot.state(), PlaybackState::Playing);
    assert!(!snapshot.session.muted);
    assert_eq!(snapshot.counters.restarts, 1);
    assert_eq!(seeks(&reel), 1);

    let sink = reel.sink(0).unwrap();
    assert_eq!(reel.media().position(sink), Duration::ZERO);
    assert_eq!(reel.media().audible_sinks(), vec![sink]);
}

#[test]
fn test_quick_flips_resume_without_restart() {
    let mut reel = reel();
    let sink = reel.sink(0).unwrap();
    reel.activate(Some(0));
    reel.advance(Duration::from_millis(2500));

    reel.activate(None);
    assert_eq!(reel.snapshot(0).unwrap().state(), PlaybackState::Paused);
    assert_eq!(reel.media().position(sink), Duration::from_millis(2500));

    reel.activate(Some(0));
    let session = reel.snapshot(0).unwrap().session;
    assert_eq!(session.playback_state, PlaybackState::Playing);
    assert!(session.muted);
    assert_eq!(seeks(&reel), 0);

    reel.advance(Duration::from_millis(500));
    assert_eq!(reel.media().position(sink), Duration::from_secs(3));
}

#[test]
fn test_flips_before_playback_starts() {
    let mut reel = reel();
    let sink = reel.sink(0).unwrap();

    // No settling between edges: the first play is still pending when paused
    reel.deck().get(0).unwrap().set_active(true);
    reel.deck().get(0).unwrap().set_active(false);
    reel.deck().get(0).unwrap().set_active(true);
    reel.settle();

    assert_eq!(reel.snapshot(0).unwrap().state(), PlaybackState::Playing);
    assert!(reel.media().is_playing(sink));
    assert_eq!(reel.media().play_calls(sink), 2);
    assert_eq!(seeks(&reel), 0);
}

#[test]
fn test_every_named_scenario_passes() {
    for kind in ScenarioKind::ALL {
        for seed in [1, 42, 9001] {
            let report = run_scenario(kind, seed, ReelplayConfig::for_testing()).unwrap();
            assert!(
                report.passed(),
                "{} (seed {}) violated {:?}",
                kind,
                seed,
                report.violations
            );
        }
    }
}
