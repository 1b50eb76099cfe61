//! Reelplay Core - autoplay-gated background video for reels
//!
//! One [`PlaybackLifecycleController`] drives each video element of a reel. It
//! resolves the source, opens an adaptive stream session when needed, and
//! applies the [`ActivationGate`] whenever its slide activation or the shared
//! sound-unlock flag changes. Playback failures are reported as session data,
//! never as errors.

pub mod affordance;
pub mod config;
pub mod deck;
pub mod engine;
pub mod gate;
pub mod player;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod stream;
pub mod tracing_setup;
pub mod unlock;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types for convenient access
pub use affordance::{AffordanceInputs, UnlockAffordanceController, should_show};
pub use config::{ConfigError, EmbeddedUnlockPolicy, ReelplayConfig};
pub use deck::SlideDeck;
pub use engine::EngineContext;
pub use gate::{ActivationGate, GateAction, PlayerSessionPatch};
pub use player::{
    CallbackObserver, MediaBackend, PlaybackError, PlaybackLifecycleController, PlaybackNotice,
    PlaybackObserver, PlaybackState, PlayerId, PlayerSession, PlayerSnapshot,
};
pub use scheduler::{ManualScheduler, Scheduler, SchedulerError, TimerHandle, TokioScheduler};
pub use sink::{MediaSink, PlayRejection, SinkEvent, SinkFault, SinkFaultKind, SinkId};
pub use source::{
    Orientation, PlaybackConfig, ResolvedSource, SourceError, SourceKind, StreamSourceResolver,
};
pub use stream::{AdaptiveStreamSession, StreamClient, StreamClientFactory, StreamEvent};
pub use unlock::{SoundUnlockCoordinator, SoundUnlockState};

/// Errors raised while setting up the engine.
///
/// Runtime playback failures never use this type; see [`PlaybackError`].
#[derive(Debug, thiserror::Error)]
pub enum ReelplayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReelplayError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ReelplayError::Config(e) => format!("Invalid configuration: {e}"),
            ReelplayError::Scheduler(SchedulerError::NoRuntime) => {
                "Live playback needs an async runtime".to_string()
            }
            ReelplayError::Scheduler(_) => "Timer error occurred".to_string(),
            ReelplayError::Source(SourceError::InvalidConfig { reason }) => {
                format!("Invalid playback config: {reason}")
            }
            ReelplayError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, ReelplayError::Config(_) | ReelplayError::Source(_))
    }
}

pub type Result<T> = std::result::Result<T, ReelplayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        let bad_json: ReelplayError = PlaybackConfig::from_json("{").unwrap_err().into();
        assert!(bad_json.is_user_error());
        assert!(bad_json.user_message().starts_with("Invalid playback config"));

        let no_runtime: ReelplayError = SchedulerError::NoRuntime.into();
        assert!(!no_runtime.is_user_error());
        assert_eq!(no_runtime.user_message(), "Live playback needs an async runtime");
    }

    #[test]
    fn test_invalid_config_converts() {
        let mut config = ReelplayConfig::for_testing();
        config.resolver.manifest_extension.clear();
        let error: ReelplayError = config.validate().unwrap_err().into();
        assert!(matches!(error, ReelplayError::Config(ConfigError::EmptyManifestExtension)));
    }
}
