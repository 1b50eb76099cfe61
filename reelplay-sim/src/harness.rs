//! Virtual-time reel: K players, one clock, scripted media.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reelplay_core::engine::EngineContext;
use reelplay_core::scheduler::{ManualScheduler, Scheduler};
use reelplay_core::stream::StreamFault;
use reelplay_core::testing::{AutoplayPolicy, ScriptedMedia};
use reelplay_core::{
    PlaybackConfig, PlaybackLifecycleController, PlayerId, PlayerSnapshot, ReelplayConfig,
    SinkFault, SinkId, SlideDeck, SoundUnlockCoordinator, StreamEvent, UnlockAffordanceController,
};
use tracing::debug;

use crate::SimulationError;
use crate::invariants::{
    Invariant, InvariantViolation, PlayerObservation, ReelObservation, check_all,
    default_invariants,
};

struct Slide {
    sink: SinkId,
    affordance: UnlockAffordanceController,
}

/// Drives a reel deterministically.
///
/// Every mutating call settles the scripted media afterwards, so observations
/// are always taken at a quiescent point.
pub struct ReelHarness {
    media: ScriptedMedia,
    scheduler: Arc<ManualScheduler>,
    context: EngineContext,
    deck: SlideDeck,
    slides: BTreeMap<usize, Slide>,
    invariants: Vec<Box<dyn Invariant>>,
}

impl ReelHarness {
    /// # Errors
    ///
    /// - `SimulationError::Config` - `config` failed validation
    pub fn new(config: ReelplayConfig, policy: AutoplayPolicy) -> Result<Self, SimulationError> {
        let scheduler = Arc::new(ManualScheduler::new());
        let context = EngineContext::new(
            config,
            SoundUnlockCoordinator::new(),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        )?;
        Ok(Self {
            media: ScriptedMedia::new(policy),
            scheduler,
            context,
            deck: SlideDeck::new(),
            slides: BTreeMap::new(),
            invariants: default_invariants(),
        })
    }

    /// Mounts `config` on slide `index`, replacing whatever was there.
    pub fn mount(&mut self, index: usize, config: PlaybackConfig) -> PlayerId {
        let (backend, sink) = self.media.backend();
        let player = PlaybackLifecycleController::mount(config, backend, &self.context);
        let affordance = UnlockAffordanceController::attach(&player, &self.context);
        // Drop the old affordance before its player goes away
        self.slides.remove(&index);
        let id = self.deck.insert(index, player);
        self.slides.insert(index, Slide { sink, affordance });
        self.settle();
        id
    }

    pub fn unmount(&mut self, index: usize) -> bool {
        self.slides.remove(&index);
        let removed = self.deck.remove(index);
        self.settle();
        removed
    }

    pub fn activate(&mut self, index: Option<usize>) {
        self.deck.activate(index);
        self.settle();
    }

    /// The user taps the sound control.
    pub fn tap_unlock(&mut self) {
        let coordinator = self.context.coordinator().clone();
        self.media.with_gesture(|| coordinator.unlock());
        self.settle();
    }

    /// The user presses play on slide `index`.
    pub fn user_play(&mut self, index: usize) {
        if let Some(player) = self.deck.get(index) {
            self.media.with_gesture(|| player.user_play());
        }
        self.settle();
    }

    /// Delivers queued media events until quiescent.
    pub fn settle(&self) -> usize {
        self.media.settle_deck(&self.deck)
    }

    /// Moves virtual time forward, firing due timers in deadline order.
    pub fn advance(&mut self, duration: Duration) {
        let target = self.scheduler.now() + duration;
        loop {
            let now = self.scheduler.now();
            match self.scheduler.next_deadline() {
                Some(deadline) if deadline <= target => {
                    let step = deadline.saturating_sub(now);
                    self.media.advance_playback(step);
                    self.scheduler.advance(step);
                    self.settle();
                }
                _ => {
                    let step = target.saturating_sub(now);
                    self.media.advance_playback(step);
                    self.scheduler.advance(step);
                    self.settle();
                    return;
                }
            }
        }
    }

    /// Slide `index` plays to its end.
    pub fn finish(&mut self, index: usize) {
        if let Some(slide) = self.slides.get(&index) {
            self.media.finish(slide.sink);
        }
        self.settle();
    }

    pub fn fail_sink(&mut self, index: usize, fault: SinkFault) {
        if let Some(slide) = self.slides.get(&index) {
            self.media.fail_sink(slide.sink, fault);
        }
        self.settle();
    }

    /// Raises `fault` from slide `index`'s current streaming client.
    pub fn fail_stream(&mut self, index: usize, fault: StreamFault) {
        if let Some(slide) = self.slides.get(&index)
            && let Some(generation) = self.media.stream_generation(slide.sink)
        {
            debug!("Injecting stream fault into slide {}: {}", index, fault);
            self.media
                .push_stream_event(slide.sink, StreamEvent::fault(generation, fault));
        }
        self.settle();
    }

    pub fn media(&self) -> &ScriptedMedia {
        &self.media
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn deck(&self) -> &SlideDeck {
        &self.deck
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn player(&self, index: usize) -> Option<&PlaybackLifecycleController> {
        self.deck.get(index)
    }

    pub fn snapshot(&self, index: usize) -> Option<PlayerSnapshot> {
        self.deck.get(index).map(PlaybackLifecycleController::snapshot)
    }

    pub fn sink(&self, index: usize) -> Option<SinkId> {
        self.slides.get(&index).map(|slide| slide.sink)
    }

    pub fn affordance_visible(&self, index: usize) -> bool {
        self.slides
            .get(&index)
            .is_some_and(|slide| slide.affordance.is_visible())
    }

    pub fn observe(&self) -> ReelObservation {
        let players = self
            .deck
            .iter()
            .filter_map(|(slide, player)| {
                let sink = self.slides.get(&slide)?.sink;
                Some(PlayerObservation {
                    slide,
                    snapshot: player.snapshot(),
                    sink_playing: self.media.is_playing(sink),
                    sink_muted: self.media.is_muted(sink),
                })
            })
            .collect();
        ReelObservation {
            at: self.now(),
            unlocked: self.context.coordinator().is_unlocked(),
            players,
        }
    }

    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        check_all(&self.invariants, &self.observe())
    }

    /// # Errors
    ///
    /// - `SimulationError::InvariantViolated` - The first violation found
    pub fn assert_invariants(&self) -> Result<(), SimulationError> {
        match self.check_invariants().into_iter().next() {
            Some(violation) => Err(SimulationError::InvariantViolated(violation)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use reelplay_core::{PlaybackState, SourceKind};

    use super::*;

    fn clip(n: usize) -> PlaybackConfig {
        PlaybackConfig::background(SourceKind::File, format!("https://x/{n}.mp4"))
    }

    #[test]
    fn test_swipe_keeps_invariants() {
        let mut reel =
            ReelHarness::new(ReelplayConfig::for_testing(), AutoplayPolicy::MutedOnly).unwrap();
        for n in 0..3 {
            reel.mount(n, clip(n));
        }
        reel.activate(Some(0));
        reel.tap_unlock();
        reel.assert_invariants().unwrap();

        reel.activate(Some(1));
        reel.assert_invariants().unwrap();
        assert_eq!(reel.media().audible_sinks(), vec![reel.sink(1).unwrap()]);
        assert_eq!(
            reel.snapshot(0).unwrap().state(),
            PlaybackState::Paused
        );
    }

    #[test]
    fn test_advance_moves_playing_sinks_only() {
        let mut reel =
            ReelHarness::new(ReelplayConfig::for_testing(), AutoplayPolicy::MutedOnly).unwrap();
        reel.mount(0, clip(0));
        reel.mount(1, clip(1));
        reel.activate(Some(0));

        reel.advance(Duration::from_secs(3));
        let media = reel.media();
        assert_eq!(media.position(reel.sink(0).unwrap()), Duration::from_secs(3));
        assert_eq!(media.position(reel.sink(1).unwrap()), Duration::ZERO);
        assert_eq!(reel.now(), Duration::from_secs(3));
    }

    #[test]
    fn test_remount_replaces_slide() {
        let mut reel =
            ReelHarness::new(ReelplayConfig::for_testing(), AutoplayPolicy::MutedOnly).unwrap();
        reel.mount(0, clip(0));
        let old_sink = reel.sink(0).unwrap();
        reel.mount(0, clip(9));

        assert!(reel.media().is_destroyed(old_sink));
        assert_ne!(reel.sink(0), Some(old_sink));
        assert_eq!(reel.deck().len(), 1);
        assert!(reel.unmount(0));
        assert_eq!(reel.context().coordinator().subscriber_count(), 0);
    }
}
