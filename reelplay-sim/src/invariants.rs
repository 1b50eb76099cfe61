//! Invariants checked against an observed reel.

use std::fmt;
use std::time::Duration;

use reelplay_core::{PlaybackState, PlayerSnapshot};
use serde::Serialize;

/// One player as seen from outside: controller snapshot plus the sink's real state.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerObservation {
    pub slide: usize,
    pub snapshot: PlayerSnapshot,
    pub sink_playing: bool,
    pub sink_muted: bool,
}

impl PlayerObservation {
    pub fn is_audible(&self) -> bool {
        self.sink_playing && !self.sink_muted
    }
}

/// Everything invariants look at, captured at one virtual instant.
#[derive(Debug, Clone, Serialize)]
pub struct ReelObservation {
    pub at: Duration,
    pub unlocked: bool,
    pub players: Vec<PlayerObservation>,
}

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub description: String,
    /// Virtual time of the observation
    pub at: Duration,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at {:?}: {}",
            self.invariant, self.at, self.description
        )
    }
}

impl std::error::Error for InvariantViolation {}

pub trait Invariant: Send + Sync {
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, reel: &ReelObservation) -> Result<(), InvariantViolation>;

    fn name(&self) -> &str;

    fn violation(&self, reel: &ReelObservation, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
            at: reel.at,
        }
    }
}

/// Inactive players are muted, in the session and on the sink.
pub struct MutedWhenInactive;

impl Invariant for MutedWhenInactive {
    fn check(&self, reel: &ReelObservation) -> Result<(), InvariantViolation> {
        for player in &reel.players {
            let session = &player.snapshot.session;
            if !session.activation && (!session.muted || !player.sink_muted) {
                return Err(self.violation(
                    reel,
                    format!(
                        "slide {} is inactive but muted={} sink_muted={}",
                        player.slide, session.muted, player.sink_muted
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MutedWhenInactive"
    }
}

/// At most one sink is audible, and only once sound is unlocked.
pub struct SingleAudibleSession;

impl Invariant for SingleAudibleSession {
    fn check(&self, reel: &ReelObservation) -> Result<(), InvariantViolation> {
        let audible: Vec<usize> = reel
            .players
            .iter()
            .filter(|player| player.is_audible())
            .map(|player| player.slide)
            .collect();

        if audible.len() > 1 {
            return Err(self.violation(reel, format!("slides {audible:?} are audible together")));
        }
        if !audible.is_empty() && !reel.unlocked {
            return Err(self.violation(
                reel,
                format!("slide {} is audible before sound unlock", audible[0]),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "SingleAudibleSession"
    }
}

/// Inactive players neither play nor report `Playing`.
pub struct InactiveNeverPlays;

impl Invariant for InactiveNeverPlays {
    fn check(&self, reel: &ReelObservation) -> Result<(), InvariantViolation> {
        for player in &reel.players {
            let session = &player.snapshot.session;
            if !session.activation
                && (player.sink_playing || session.playback_state == PlaybackState::Playing)
            {
                return Err(self.violation(
                    reel,
                    format!(
                        "inactive slide {} is playing (state {})",
                        player.slide, session.playback_state
                    ),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "InactiveNeverPlays"
    }
}

/// `attempted_play_since_activation` is never set while `Playing`.
pub struct AttemptFlagClearedWhilePlaying;

impl Invariant for AttemptFlagClearedWhilePlaying {
    fn check(&self, reel: &ReelObservation) -> Result<(), InvariantViolation> {
        for player in &reel.players {
            let session = &player.snapshot.session;
            if session.playback_state == PlaybackState::Playing
                && session.attempted_play_since_activation
            {
                return Err(self.violation(
                    reel,
                    format!("slide {} is playing with a stale attempt flag", player.slide),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "AttemptFlagClearedWhilePlaying"
    }
}

pub fn default_invariants() -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(MutedWhenInactive),
        Box::new(SingleAudibleSession),
        Box::new(InactiveNeverPlays),
        Box::new(AttemptFlagClearedWhilePlaying),
    ]
}

/// Runs every invariant, collecting all violations.
pub fn check_all(invariants: &[Box<dyn Invariant>], reel: &ReelObservation) -> Vec<InvariantViolation> {
    invariants
        .iter()
        .filter_map(|invariant| invariant.check(reel).err())
        .collect()
}

#[cfg(test)]
mod tests {
    use reelplay_core::engine::EngineContext;
    use reelplay_core::scheduler::{ManualScheduler, Scheduler};
    use reelplay_core::testing::ScriptedMedia;
    use reelplay_core::{
        PlaybackConfig, PlaybackLifecycleController, ReelplayConfig, SoundUnlockCoordinator,
        SourceKind,
    };
    use std::sync::Arc;

    use super::*;

    fn observation(players: Vec<PlayerObservation>, unlocked: bool) -> ReelObservation {
        ReelObservation {
            at: Duration::ZERO,
            unlocked,
            players,
        }
    }

    fn snapshot() -> PlayerSnapshot {
        let context = EngineContext::new(
            ReelplayConfig::for_testing(),
            SoundUnlockCoordinator::new(),
            Arc::new(ManualScheduler::new()) as Arc<dyn Scheduler>,
        )
        .unwrap();
        let media = ScriptedMedia::default();
        let (backend, _) = media.backend();
        let player = PlaybackLifecycleController::mount(
            PlaybackConfig::background(SourceKind::File, "https://x/a.mp4"),
            backend,
            &context,
        );
        player.snapshot()
    }

    fn player(slide: usize, active: bool, playing: bool, muted: bool) -> PlayerObservation {
        let mut snapshot = snapshot();
        snapshot.session.activation = active;
        snapshot.session.muted = muted;
        if playing {
            snapshot.session.playback_state = PlaybackState::Playing;
        }
        PlayerObservation {
            slide,
            snapshot,
            sink_playing: playing,
            sink_muted: muted,
        }
    }

    #[test]
    fn test_healthy_reel_passes() {
        let reel = observation(
            vec![player(0, true, true, false), player(1, false, false, true)],
            true,
        );
        assert!(check_all(&default_invariants(), &reel).is_empty());
    }

    #[test]
    fn test_two_audible_players_detected() {
        let reel = observation(
            vec![player(0, true, true, false), player(1, true, true, false)],
            true,
        );
        let violations = check_all(&default_invariants(), &reel);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "SingleAudibleSession");
    }

    #[test]
    fn test_audible_before_unlock_detected() {
        let reel = observation(vec![player(0, true, true, false)], false);
        let violation = SingleAudibleSession.check(&reel).unwrap_err();
        assert!(violation.to_string().contains("before sound unlock"));
    }

    #[test]
    fn test_inactive_violations() {
        let reel = observation(vec![player(3, false, true, false)], true);
        let names: Vec<String> = check_all(&default_invariants(), &reel)
            .into_iter()
            .map(|violation| violation.invariant)
            .collect();
        assert!(names.contains(&"MutedWhenInactive".to_string()));
        assert!(names.contains(&"InactiveNeverPlays".to_string()));
    }
}
