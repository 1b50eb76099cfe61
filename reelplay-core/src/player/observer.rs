//! Outbound playback notifications.
//!
//! Observers are fire-and-forget: they run after the controller released its
//! state, and a panicking observer is logged and skipped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::state::{PlaybackError, PlaybackState, PlayerId, PlayerSnapshot};
use crate::sink::PlayRejection;

/// Something observable happened to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlaybackNotice {
    StateChanged {
        player: PlayerId,
        from: PlaybackState,
        to: PlaybackState,
    },
    /// A `play()` request went to the sink
    PlayRequested {
        player: PlayerId,
        muted: bool,
    },
    PlayStarted {
        player: PlayerId,
    },
    PlayPaused {
        player: PlayerId,
    },
    PlayRejected {
        player: PlayerId,
        rejection: PlayRejection,
    },
    /// Seek-to-zero replay triggered by the sound unlock
    Restarted {
        player: PlayerId,
    },
    Abandoned {
        player: PlayerId,
        error: Option<PlaybackError>,
    },
}

impl PlaybackNotice {
    pub fn player(&self) -> PlayerId {
        match self {
            PlaybackNotice::StateChanged { player, .. }
            | PlaybackNotice::PlayRequested { player, .. }
            | PlaybackNotice::PlayStarted { player }
            | PlaybackNotice::PlayPaused { player }
            | PlaybackNotice::PlayRejected { player, .. }
            | PlaybackNotice::Restarted { player }
            | PlaybackNotice::Abandoned { player, .. } => *player,
        }
    }
}

/// Receives notices from one or more controllers.
pub trait PlaybackObserver: Send + Sync {
    /// `snapshot` is the player's state after the change.
    fn on_notice(&self, notice: &PlaybackNotice, snapshot: &PlayerSnapshot);
}

type PlayerCallback = Box<dyn Fn(PlayerId) + Send + Sync>;

/// Adapts plain `on_play_start` / `on_play_pause` closures.
#[derive(Default)]
pub struct CallbackObserver {
    on_play_start: Option<PlayerCallback>,
    on_play_pause: Option<PlayerCallback>,
}

impl CallbackObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_play_start(mut self, callback: impl Fn(PlayerId) + Send + Sync + 'static) -> Self {
        self.on_play_start = Some(Box::new(callback));
        self
    }

    pub fn on_play_pause(mut self, callback: impl Fn(PlayerId) + Send + Sync + 'static) -> Self {
        self.on_play_pause = Some(Box::new(callback));
        self
    }
}

impl PlaybackObserver for CallbackObserver {
    fn on_notice(&self, notice: &PlaybackNotice, _snapshot: &PlayerSnapshot) {
        match notice {
            PlaybackNotice::PlayStarted { player } => {
                if let Some(callback) = &self.on_play_start {
                    callback(*player);
                }
            }
            PlaybackNotice::PlayPaused { player } => {
                if let Some(callback) = &self.on_play_pause {
                    callback(*player);
                }
            }
            _ => {}
        }
    }
}

/// Delivers notices to every observer, isolating panics.
pub(crate) fn dispatch(
    observers: &[Arc<dyn PlaybackObserver>],
    notices: &[PlaybackNotice],
    snapshot: &PlayerSnapshot,
) {
    for notice in notices {
        for observer in observers {
            let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_notice(notice, snapshot)));
            if delivered.is_err() {
                warn!(
                    "{}: playback observer panicked on {:?}, ignoring",
                    notice.player(),
                    notice
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::player::state::{PlaybackCounters, PlayerSession};
    use crate::source::{PlaybackConfig, ResolvedSource, SourceKind};

    fn snapshot() -> PlayerSnapshot {
        let url = "https://cdn.example.com/a.mp4";
        PlayerSnapshot {
            session: PlayerSession::new(
                PlayerId(1),
                PlaybackConfig::background(SourceKind::File, url),
            ),
            source: ResolvedSource {
                kind: SourceKind::File,
                normalized_url: url.to_string(),
            },
            unlocked: false,
            mounted: true,
            counters: PlaybackCounters::default(),
        }
    }

    struct Panics;

    impl PlaybackObserver for Panics {
        fn on_notice(&self, _notice: &PlaybackNotice, _snapshot: &PlayerSnapshot) {
            panic!("analytics backend unavailable");
        }
    }

    #[test]
    fn test_callback_observer_routes_start_and_pause() {
        let started = Arc::new(AtomicUsize::new(0));
        let paused = Arc::new(AtomicUsize::new(0));
        let observer: Arc<dyn PlaybackObserver> = Arc::new(
            CallbackObserver::new()
                .on_play_start({
                    let started = Arc::clone(&started);
                    move |_| {
                        started.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .on_play_pause({
                    let paused = Arc::clone(&paused);
                    move |_| {
                        paused.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        );
        let player = PlayerId(1);
        let notices = [
            PlaybackNotice::PlayRequested {
                player,
                muted: true,
            },
            PlaybackNotice::PlayStarted { player },
            PlaybackNotice::PlayPaused { player },
            PlaybackNotice::PlayStarted { player },
        ];

        dispatch(&[observer], &notices, &snapshot());

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(paused.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_delivery() {
        let started = Arc::new(AtomicUsize::new(0));
        let counting: Arc<dyn PlaybackObserver> = Arc::new(CallbackObserver::new().on_play_start({
            let started = Arc::clone(&started);
            move |_| {
                started.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let observers: Vec<Arc<dyn PlaybackObserver>> = vec![Arc::new(Panics), counting];

        dispatch(
            &observers,
            &[PlaybackNotice::PlayStarted {
                player: PlayerId(1),
            }],
            &snapshot(),
        );

        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notice_reports_its_player() {
        let notice = PlaybackNotice::Abandoned {
            player: PlayerId(7),
            error: None,
        };
        assert_eq!(notice.player(), PlayerId(7));
    }
}
