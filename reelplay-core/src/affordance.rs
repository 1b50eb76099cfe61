//! "Tap for sound" affordance visibility.
//!
//! Visibility is a pure function of four player facts, debounced so the
//! control does not flash while a play request is still being resolved.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::engine::EngineContext;
use crate::player::{PlaybackLifecycleController, PlaybackNotice, PlaybackObserver, PlayerSnapshot};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::unlock::{SoundUnlockCoordinator, Subscription};

/// Facts the visibility rule depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AffordanceInputs {
    pub autoplay_requested: bool,
    pub unlocked: bool,
    pub playing: bool,
    pub attempted_play_since_activation: bool,
}

impl AffordanceInputs {
    pub fn from_snapshot(snapshot: &PlayerSnapshot) -> Self {
        Self {
            autoplay_requested: snapshot.session.config.autoplay,
            unlocked: snapshot.unlocked,
            playing: snapshot.is_playing(),
            attempted_play_since_activation: snapshot.session.attempted_play_since_activation,
        }
    }
}

/// Show only after a real play attempt that has not (yet) produced playback,
/// while sound is still locked on an autoplaying player.
pub fn should_show(inputs: AffordanceInputs) -> bool {
    inputs.autoplay_requested
        && !inputs.unlocked
        && !inputs.playing
        && inputs.attempted_play_since_activation
}

struct AffordanceState {
    inputs: AffordanceInputs,
    timer: Option<(TimerHandle, u64)>,
    next_token: u64,
    detached: bool,
}

struct AffordanceShared {
    me: Weak<AffordanceShared>,
    state: Mutex<AffordanceState>,
    visible: watch::Sender<bool>,
    scheduler: Arc<dyn Scheduler>,
    debounce: Duration,
}

impl AffordanceShared {
    fn update(&self, change: impl FnOnce(&mut AffordanceInputs)) {
        let mut state = self.state.lock();
        if state.detached {
            return;
        }
        change(&mut state.inputs);

        if should_show(state.inputs) {
            if !*self.visible.borrow() && state.timer.is_none() {
                state.next_token += 1;
                let token = state.next_token;
                let me = self.me.clone();
                let handle = self.scheduler.schedule(
                    self.debounce,
                    Box::new(move || {
                        if let Some(shared) = me.upgrade() {
                            shared.on_debounce_elapsed(token);
                        }
                    }),
                );
                state.timer = Some((handle, token));
            }
        } else {
            if let Some((handle, _)) = state.timer.take() {
                self.scheduler.cancel(handle);
            }
            self.set_visible(false);
        }
    }

    fn on_debounce_elapsed(&self, token: u64) {
        let mut state = self.state.lock();
        if state.detached || state.timer.map(|(_, current)| current) != Some(token) {
            return;
        }
        state.timer = None;
        if should_show(state.inputs) {
            debug!("Showing sound unlock affordance");
            self.set_visible(true);
        }
    }

    fn set_visible(&self, visible: bool) {
        self.visible.send_if_modified(|current| {
            if *current == visible {
                false
            } else {
                *current = visible;
                true
            }
        });
    }

    fn detach(&self) {
        let mut state = self.state.lock();
        state.detached = true;
        if let Some((handle, _)) = state.timer.take() {
            self.scheduler.cancel(handle);
        }
        self.set_visible(false);
    }
}

impl PlaybackObserver for AffordanceShared {
    fn on_notice(&self, _notice: &PlaybackNotice, snapshot: &PlayerSnapshot) {
        let inputs = AffordanceInputs::from_snapshot(snapshot);
        self.update(|current| *current = inputs);
    }
}

/// Debounced "tap for sound" control bound to one player.
///
/// Dropping the controller hides the affordance and cancels its timer.
pub struct UnlockAffordanceController {
    shared: Arc<AffordanceShared>,
    coordinator: SoundUnlockCoordinator,
    _subscription: Subscription,
}

impl UnlockAffordanceController {
    /// Starts tracking `player`'s notices and the shared unlock flag.
    pub fn attach(player: &PlaybackLifecycleController, context: &EngineContext) -> Self {
        let shared = Arc::new_cyclic(|me| {
            let (visible, _) = watch::channel(false);
            AffordanceShared {
                me: me.clone(),
                state: Mutex::new(AffordanceState {
                    inputs: AffordanceInputs::default(),
                    timer: None,
                    next_token: 0,
                    detached: false,
                }),
                visible,
                scheduler: Arc::clone(context.scheduler()),
                debounce: context.config().affordance.debounce,
            }
        });

        let weak = Arc::downgrade(&shared);
        let subscription = context.coordinator().subscribe(move |_state| {
            if let Some(shared) = weak.upgrade() {
                shared.update(|inputs| inputs.unlocked = true);
            }
        });

        player.add_observer(Arc::clone(&shared) as Arc<dyn PlaybackObserver>);
        let inputs = AffordanceInputs::from_snapshot(&player.snapshot());
        shared.update(|current| *current = inputs);

        Self {
            shared,
            coordinator: context.coordinator().clone(),
            _subscription: subscription,
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.shared.visible.borrow()
    }

    /// Receiver that observes visibility changes.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.visible.subscribe()
    }

    pub fn inputs(&self) -> AffordanceInputs {
        self.shared.state.lock().inputs
    }

    /// The control's single action. Safe to call when already unlocked.
    pub fn unlock_sound(&self) {
        self.coordinator.unlock();
    }
}

impl Drop for UnlockAffordanceController {
    fn drop(&mut self) {
        self.shared.detach();
    }
}
