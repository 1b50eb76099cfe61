//! Per-player lifecycle: session record, state machine and notifications.

pub mod controller;
pub mod observer;
pub mod state;

pub use controller::{MediaBackend, PlaybackLifecycleController};
pub use observer::{CallbackObserver, PlaybackNotice, PlaybackObserver};
pub use state::{
    PlaybackCounters, PlaybackError, PlaybackState, PlayerId, PlayerSession, PlayerSnapshot,
};
