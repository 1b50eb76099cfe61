//! Slide activation across the players of one reel.

use std::collections::BTreeMap;

use tracing::debug;

use crate::engine::EngineContext;
use crate::player::{MediaBackend, PlaybackLifecycleController, PlayerId};
use crate::source::PlaybackConfig;

/// Controllers of a reel keyed by slide index, with at most one active.
#[derive(Debug, Default)]
pub struct SlideDeck {
    slides: BTreeMap<usize, PlaybackLifecycleController>,
    active: Option<usize>,
}

impl SlideDeck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts a player for `index`, replacing (and tearing down) any previous one.
    pub fn mount(
        &mut self,
        index: usize,
        config: PlaybackConfig,
        backend: MediaBackend,
        context: &EngineContext,
    ) -> PlayerId {
        let controller = PlaybackLifecycleController::mount(config, backend, context);
        self.insert(index, controller)
    }

    /// Adds an already mounted controller. It is activated if `index` is the
    /// active slide.
    pub fn insert(&mut self, index: usize, controller: PlaybackLifecycleController) -> PlayerId {
        let id = controller.id();
        if let Some(previous) = self.slides.remove(&index) {
            previous.teardown();
        }
        if self.active == Some(index) {
            controller.set_active(true);
        }
        self.slides.insert(index, controller);
        id
    }

    /// Presents slide `index`, or no slide at all mid-transition.
    ///
    /// Every other slide is deactivated before the target is activated, so
    /// two players are never active at once.
    pub fn activate(&mut self, index: Option<usize>) {
        debug!("Activating slide {:?} (was {:?})", index, self.active);
        for (slide, controller) in &self.slides {
            if Some(*slide) != index {
                controller.set_active(false);
            }
        }
        self.active = index;
        if let Some(index) = index
            && let Some(controller) = self.slides.get(&index)
        {
            controller.set_active(true);
        }
    }

    /// Permanently discards a slide's player.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.slides.remove(&index) {
            Some(controller) => {
                controller.teardown();
                if self.active == Some(index) {
                    self.active = None;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&PlaybackLifecycleController> {
        self.slides.get(&index)
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PlaybackLifecycleController)> {
        self.slides.iter().map(|(index, controller)| (*index, controller))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ReelplayConfig;
    use crate::player::PlaybackState;
    use crate::scheduler::{ManualScheduler, Scheduler};
    use crate::source::SourceKind;
    use crate::testing::{AutoplayPolicy, ScriptedMedia};
    use crate::unlock::SoundUnlockCoordinator;

    fn context() -> EngineContext {
        EngineContext::new(
            ReelplayConfig::for_testing(),
            SoundUnlockCoordinator::new(),
            Arc::new(ManualScheduler::new()) as Arc<dyn Scheduler>,
        )
        .unwrap()
    }

    fn clip(n: usize) -> PlaybackConfig {
        PlaybackConfig::background(SourceKind::File, format!("https://x/clip-{n}.mp4"))
    }

    #[test]
    fn test_activation_moves_between_slides() {
        let context = context();
        let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
        let mut deck = SlideDeck::new();
        for n in 0..3 {
            let (backend, _sink) = media.backend();
            deck.mount(n, clip(n), backend, &context);
        }

        deck.activate(Some(0));
        media.settle_deck(&deck);
        deck.activate(Some(1));
        media.settle_deck(&deck);

        let states: Vec<_> = deck
            .iter()
            .map(|(_, player)| player.session().playback_state)
            .collect();
        assert_eq!(
            states,
            vec![
                PlaybackState::Paused,
                PlaybackState::Playing,
                PlaybackState::Ready
            ]
        );
        assert_eq!(deck.active(), Some(1));
    }

    #[test]
    fn test_no_active_slide_deactivates_all() {
        let context = context();
        let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
        let mut deck = SlideDeck::new();
        let (backend, _sink) = media.backend();
        deck.mount(0, clip(0), backend, &context);

        deck.activate(Some(0));
        media.settle_deck(&deck);
        deck.activate(None);
        media.settle_deck(&deck);

        let session = deck.get(0).map(|player| player.session()).unwrap();
        assert!(!session.activation);
        assert_eq!(session.playback_state, PlaybackState::Paused);
    }

    #[test]
    fn test_late_mount_on_active_slide_is_activated() {
        let context = context();
        let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
        let mut deck = SlideDeck::new();
        deck.activate(Some(2));

        let (backend, _sink) = media.backend();
        deck.mount(2, clip(2), backend, &context);
        assert!(deck.get(2).unwrap().session().activation);
    }

    #[test]
    fn test_remove_tears_down() {
        let context = context();
        let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
        let mut deck = SlideDeck::new();
        let (backend, sink) = media.backend();
        deck.mount(0, clip(0), backend, &context);
        deck.activate(Some(0));

        assert!(deck.remove(0));
        assert!(!deck.remove(0));
        assert!(deck.is_empty());
        assert_eq!(deck.active(), None);
        assert!(media.is_destroyed(sink));
        assert_eq!(context.coordinator().subscriber_count(), 0);
    }
}
