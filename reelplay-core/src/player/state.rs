//! Per-player runtime records.

use serde::Serialize;
use thiserror::Error;

use crate::sink::SinkFault;
use crate::source::{PlaybackConfig, ResolvedSource};
use crate::stream::StreamFault;

/// Identifies one mounted player for logs and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlayerId(pub u64);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

/// Playback lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackState {
    /// Not yet mounted
    Idle,
    /// Source resolved, waiting for the first readiness signal
    Loading,
    /// Sink can start playing
    Ready,
    Playing,
    Paused,
    Ended,
    /// Sink reported a fatal fault
    Error,
    /// Waiting out the backoff before reloading the sink
    Retrying,
    /// Gave up: muted, paused, silent
    Abandoned,
}

impl PlaybackState {
    /// States from which a play request can be issued.
    pub fn can_play(&self) -> bool {
        matches!(
            self,
            PlaybackState::Ready | PlaybackState::Paused | PlaybackState::Ended
        )
    }

    /// States in which the sink has moved past its first frame.
    pub fn has_progressed(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Ended
        )
    }

    /// States in the error branch.
    pub fn is_failing(&self) -> bool {
        matches!(self, PlaybackState::Error | PlaybackState::Retrying)
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, PlaybackState::Abandoned)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Loading => "Loading",
            PlaybackState::Ready => "Ready",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Ended => "Ended",
            PlaybackState::Error => "Error",
            PlaybackState::Retrying => "Retrying",
            PlaybackState::Abandoned => "Abandoned",
        };
        f.write_str(name)
    }
}

/// Last failure a player went through. Stored as data, never returned.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PlaybackError {
    #[error("Media element failed: {fault}")]
    Sink { fault: SinkFault },

    #[error("Stream session failed: {fault}")]
    Stream { fault: StreamFault },

    #[error("Playback abandoned: {reason}")]
    Abandoned { reason: String },
}

/// Runtime record of one mounted player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSession {
    pub id: PlayerId,
    pub config: PlaybackConfig,
    pub activation: bool,
    pub playback_state: PlaybackState,
    pub muted: bool,
    pub attempted_play_since_activation: bool,
    pub last_error: Option<PlaybackError>,
}

impl PlayerSession {
    /// Fresh session: inactive, muted, idle.
    pub fn new(id: PlayerId, config: PlaybackConfig) -> Self {
        Self {
            id,
            config,
            activation: false,
            playback_state: PlaybackState::Idle,
            muted: true,
            attempted_play_since_activation: false,
            last_error: None,
        }
    }

    /// Whether this player is producing sound right now.
    pub fn is_audible(&self) -> bool {
        self.playback_state == PlaybackState::Playing && !self.muted
    }
}

/// Running totals per mount, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackCounters {
    /// `play()` requests issued to the sink
    pub play_attempts: u32,
    /// Play requests the runtime refused
    pub rejections: u32,
    /// Seek-to-zero restarts caused by the sound unlock
    pub restarts: u32,
    /// Loop restarts after the sink ended
    pub loops: u32,
    pub sink_retries: u32,
    pub stream_recreations: u32,
}

/// Published view of a player, for UI binding and observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSnapshot {
    pub session: PlayerSession,
    pub source: ResolvedSource,
    pub unlocked: bool,
    pub mounted: bool,
    pub counters: PlaybackCounters,
}

impl PlayerSnapshot {
    pub fn id(&self) -> PlayerId {
        self.session.id
    }

    pub fn state(&self) -> PlaybackState {
        self.session.playback_state
    }

    pub fn is_playing(&self) -> bool {
        self.session.playback_state == PlaybackState::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;

    #[test]
    fn test_new_session_is_muted_and_inactive() {
        let session = PlayerSession::new(
            PlayerId(3),
            PlaybackConfig::background(SourceKind::File, "https://x/a.mp4"),
        );
        assert!(session.muted);
        assert!(!session.activation);
        assert_eq!(session.playback_state, PlaybackState::Idle);
        assert!(!session.is_audible());
        assert_eq!(session.id.to_string(), "player-3");
    }

    #[test]
    fn test_state_helpers() {
        assert!(PlaybackState::Ready.can_play());
        assert!(PlaybackState::Ended.can_play());
        assert!(!PlaybackState::Loading.can_play());
        assert!(!PlaybackState::Playing.can_play());

        assert!(PlaybackState::Paused.has_progressed());
        assert!(!PlaybackState::Ready.has_progressed());

        assert!(PlaybackState::Retrying.is_failing());
        assert!(PlaybackState::Abandoned.is_abandoned());
    }
}
