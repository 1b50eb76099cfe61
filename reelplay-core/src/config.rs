//! Centralized configuration for Reelplay.
//!
//! All tunable timing constants and classification rules are defined here to
//! avoid hard-coded values scattered throughout the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default delay before a fatally failed stream session is recreated.
pub const DEFAULT_RECREATE_BACKOFF: Duration = Duration::from_secs(1);

/// Default delay before a failed sink is reloaded.
pub const DEFAULT_SINK_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Default delay before the "tap for sound" affordance becomes visible.
pub const DEFAULT_AFFORDANCE_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Default diagnostic pattern for transport warnings the streaming client over-reports.
pub const DEFAULT_SPURIOUS_FAULT_PATTERN: &str =
    r"(?i)\b(ssl|tls|secure connection|certificate|mixed[- ]content)\b";

/// Errors raised while validating or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid duration for {field}: must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Invalid spurious fault pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("Manifest extension must not be empty")]
    EmptyManifestExtension,
}

/// Central configuration for all Reelplay components.
///
/// Groups related settings into logical sections. Supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReelplayConfig {
    pub playback: PlaybackTuning,
    pub stream: StreamTuning,
    pub affordance: AffordanceTuning,
    pub resolver: ResolverTuning,
}

/// How an embedded third-party player reacts to the sound unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddedUnlockPolicy {
    /// Unmute and keep the current position.
    ResumeInPlace,
    /// Seek to zero and replay with sound, like native sinks.
    RestartFromZero,
}

impl std::str::FromStr for EmbeddedUnlockPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "resume" | "resume-in-place" => Ok(Self::ResumeInPlace),
            "restart" | "restart-from-zero" => Ok(Self::RestartFromZero),
            _ => Err(format!(
                "Invalid embedded unlock policy: '{s}'. Valid options are: resume, restart"
            )),
        }
    }
}

/// Per-player lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackTuning {
    /// Backoff before a sink that reported a fatal error is reloaded
    pub sink_retry_backoff: Duration,
    /// Reloads allowed per fault before the player is abandoned
    pub max_sink_retries: u32,
    /// Unlock behavior for embedded provider players
    pub embedded_unlock_policy: EmbeddedUnlockPolicy,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            sink_retry_backoff: DEFAULT_SINK_RETRY_BACKOFF,
            max_sink_retries: 1,
            embedded_unlock_policy: EmbeddedUnlockPolicy::ResumeInPlace,
        }
    }
}

/// Adaptive streaming session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTuning {
    /// Delay between a fatal fault and the recreation attempt
    pub recreate_backoff: Duration,
    /// Recreations allowed per fault before the session is abandoned
    pub max_recreations: u32,
    /// Regex matched against fault details to spot spurious transport warnings
    pub spurious_fault_pattern: String,
}

impl Default for StreamTuning {
    fn default() -> Self {
        Self {
            recreate_backoff: DEFAULT_RECREATE_BACKOFF,
            max_recreations: 1,
            spurious_fault_pattern: DEFAULT_SPURIOUS_FAULT_PATTERN.to_string(),
        }
    }
}

/// Unlock affordance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffordanceTuning {
    /// How long the show condition must hold before the affordance appears
    pub debounce: Duration,
}

impl Default for AffordanceTuning {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_AFFORDANCE_DEBOUNCE,
        }
    }
}

/// Source classification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverTuning {
    /// Path extension identifying a segmented-stream manifest
    pub manifest_extension: String,
    /// Hosts whose pages are played through an embedded provider player
    pub embed_hosts: Vec<String>,
}

impl Default for ResolverTuning {
    fn default() -> Self {
        Self {
            manifest_extension: "m3u8".to_string(),
            embed_hosts: [
                "youtube.com",
                "youtu.be",
                "youtube-nocookie.com",
                "vimeo.com",
                "player.vimeo.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ReelplayConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(backoff) = env_millis("REELPLAY_STREAM_BACKOFF_MS") {
            config.stream.recreate_backoff = backoff;
        }

        if let Ok(max) = std::env::var("REELPLAY_MAX_STREAM_RECREATIONS")
            && let Ok(count) = max.parse::<u32>()
        {
            config.stream.max_recreations = count;
        }

        if let Some(backoff) = env_millis("REELPLAY_SINK_RETRY_BACKOFF_MS") {
            config.playback.sink_retry_backoff = backoff;
        }

        if let Some(debounce) = env_millis("REELPLAY_AFFORDANCE_DEBOUNCE_MS") {
            config.affordance.debounce = debounce;
        }

        if let Ok(policy) = std::env::var("REELPLAY_EMBEDDED_UNLOCK")
            && let Ok(policy) = policy.parse()
        {
            config.playback.embedded_unlock_policy = policy;
        }

        config
    }

    /// Creates a configuration for deterministic tests.
    ///
    /// Uses the production constants spelled out explicitly so tests do not
    /// drift when defaults are retuned.
    pub fn for_testing() -> Self {
        Self {
            playback: PlaybackTuning {
                sink_retry_backoff: Duration::from_secs(1),
                max_sink_retries: 1,
                embedded_unlock_policy: EmbeddedUnlockPolicy::ResumeInPlace,
            },
            stream: StreamTuning {
                recreate_backoff: Duration::from_secs(1),
                max_recreations: 1,
                spurious_fault_pattern: DEFAULT_SPURIOUS_FAULT_PATTERN.to_string(),
            },
            affordance: AffordanceTuning {
                debounce: Duration::from_millis(1500),
            },
            resolver: ResolverTuning::default(),
        }
    }

    /// Checks that the configuration can drive the engine.
    ///
    /// # Errors
    ///
    /// - `ConfigError::ZeroDuration` - Debounce or a backoff is zero
    /// - `ConfigError::InvalidPattern` - Spurious fault pattern does not compile
    /// - `ConfigError::EmptyManifestExtension` - No manifest extension configured
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.affordance.debounce.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "affordance.debounce",
            });
        }
        if self.stream.recreate_backoff.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "stream.recreate_backoff",
            });
        }
        if self.playback.sink_retry_backoff.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "playback.sink_retry_backoff",
            });
        }
        regex::Regex::new(&self.stream.spurious_fault_pattern).map_err(|e| {
            ConfigError::InvalidPattern {
                reason: e.to_string(),
            }
        })?;
        if self.resolver.manifest_extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyManifestExtension);
        }
        Ok(())
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ReelplayConfig::default();

        assert_eq!(config.stream.recreate_backoff, Duration::from_secs(1));
        assert_eq!(config.stream.max_recreations, 1);
        assert_eq!(config.playback.sink_retry_backoff, Duration::from_secs(1));
        assert_eq!(config.playback.max_sink_retries, 1);
        assert_eq!(config.affordance.debounce, Duration::from_millis(1500));
        assert_eq!(config.resolver.manifest_extension, "m3u8");
        assert_eq!(
            config.playback.embedded_unlock_policy,
            EmbeddedUnlockPolicy::ResumeInPlace
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ReelplayConfig::for_testing();
        config.affordance.debounce = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration { .. })
        ));

        let mut config = ReelplayConfig::for_testing();
        config.stream.spurious_fault_pattern = "(unclosed".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));

        let mut config = ReelplayConfig::for_testing();
        config.resolver.manifest_extension = ".".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyManifestExtension)
        ));
    }

    #[test]
    fn test_embedded_policy_parsing() {
        assert_eq!(
            "restart".parse::<EmbeddedUnlockPolicy>(),
            Ok(EmbeddedUnlockPolicy::RestartFromZero)
        );
        assert_eq!(
            "Resume-In-Place".parse::<EmbeddedUnlockPolicy>(),
            Ok(EmbeddedUnlockPolicy::ResumeInPlace)
        );
        assert!("sometimes".parse::<EmbeddedUnlockPolicy>().is_err());
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("REELPLAY_STREAM_BACKOFF_MS", "2500");
            std::env::set_var("REELPLAY_AFFORDANCE_DEBOUNCE_MS", "900");
            std::env::set_var("REELPLAY_EMBEDDED_UNLOCK", "restart");
            std::env::set_var("REELPLAY_MAX_STREAM_RECREATIONS", "not-a-number");
        }

        let config = ReelplayConfig::from_env();

        assert_eq!(config.stream.recreate_backoff, Duration::from_millis(2500));
        assert_eq!(config.affordance.debounce, Duration::from_millis(900));
        assert_eq!(
            config.playback.embedded_unlock_policy,
            EmbeddedUnlockPolicy::RestartFromZero
        );
        assert_eq!(config.stream.max_recreations, 1);

        // Cleanup
        unsafe {
            std::env::remove_var("REELPLAY_STREAM_BACKOFF_MS");
            std::env::remove_var("REELPLAY_AFFORDANCE_DEBOUNCE_MS");
            std::env::remove_var("REELPLAY_EMBEDDED_UNLOCK");
            std::env::remove_var("REELPLAY_MAX_STREAM_RECREATIONS");
        }
    }
}
