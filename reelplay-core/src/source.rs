//! Playback configuration and source classification.
//!
//! The authoring layer hands the engine a [`PlaybackConfig`] per video element.
//! [`StreamSourceResolver`] turns its URL into a closed [`SourceKind`] plus a
//! normalized URL, which decides whether the player needs an adaptive stream
//! session, a progressive sink load, or an embedded provider player.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::ResolverTuning;

/// Errors that can occur while reading authoring-layer configuration.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid playback config: {reason}")]
    InvalidConfig { reason: String },
}

/// How a source is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Third-party provider player (YouTube, Vimeo, ...)
    Embedded,
    /// Adaptive segmented stream driven by a streaming client
    Stream,
    /// Progressive single-file download played by the native sink
    File,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Embedded => write!(f, "embedded"),
            SourceKind::Stream => write!(f, "stream"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Per-element playback configuration supplied by the authoring layer.
///
/// Immutable for the lifetime of a mount. A different URL is a new player,
/// never an in-place patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackConfig {
    /// Kind the author declared; a hint, the URL shape wins
    pub source_kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default = "default_true")]
    pub initially_muted: bool,
    #[serde(default)]
    pub show_controls: bool,
    #[serde(default)]
    pub orientation: Orientation,
}

fn default_true() -> bool {
    true
}

impl PlaybackConfig {
    /// Background-video defaults: muted looping autoplay without controls.
    pub fn background(source_kind: SourceKind, url: impl Into<String>) -> Self {
        Self {
            source_kind,
            url: url.into(),
            autoplay: true,
            looping: true,
            initially_muted: true,
            show_controls: false,
            orientation: Orientation::Portrait,
        }
    }

    /// Parses the authoring layer's JSON element configuration.
    ///
    /// # Errors
    ///
    /// - `SourceError::InvalidConfig` - Malformed JSON, missing fields, or empty URL
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SourceError::InvalidConfig {
                reason: e.to_string(),
            })?;
        if config.url.trim().is_empty() {
            return Err(SourceError::InvalidConfig {
                reason: "url is empty".to_string(),
            });
        }
        Ok(config)
    }
}

/// Outcome of source classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub kind: SourceKind,
    /// Secure-scheme URL handed to the sink or streaming client
    pub normalized_url: String,
}

/// Classifies configured sources into a playback strategy.
///
/// Rules, first match wins:
/// 1. host is a known embed provider -> [`SourceKind::Embedded`]
/// 2. path ends in the manifest extension -> [`SourceKind::Stream`]
/// 3. the author declared a stream and the path has no file extension -> [`SourceKind::Stream`]
/// 4. anything else -> [`SourceKind::File`]
#[derive(Debug, Clone)]
pub struct StreamSourceResolver {
    manifest_suffix: String,
    embed_hosts: Vec<String>,
}

impl Default for StreamSourceResolver {
    fn default() -> Self {
        Self::new(&ResolverTuning::default())
    }
}

impl StreamSourceResolver {
    pub fn new(tuning: &ResolverTuning) -> Self {
        let extension = tuning.manifest_extension.trim_start_matches('.');
        Self {
            manifest_suffix: format!(".{}", extension.to_ascii_lowercase()),
            embed_hosts: tuning
                .embed_hosts
                .iter()
                .map(|host| host.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Resolves a configuration. Pure and infallible.
    pub fn resolve(&self, config: &PlaybackConfig) -> ResolvedSource {
        let normalized_url = normalize_url(&config.url);

        let Ok(parsed) = Url::parse(&normalized_url) else {
            // Relative or otherwise unparseable: let the sink try it as a file
            return ResolvedSource {
                kind: if self.has_manifest_suffix(&normalized_url) {
                    SourceKind::Stream
                } else {
                    SourceKind::File
                },
                normalized_url,
            };
        };

        let kind = if parsed.host_str().is_some_and(|host| self.is_embed_host(host)) {
            SourceKind::Embedded
        } else if self.has_manifest_suffix(parsed.path())
            || (config.source_kind == SourceKind::Stream && !has_file_extension(parsed.path()))
        {
            SourceKind::Stream
        } else {
            SourceKind::File
        };

        ResolvedSource {
            kind,
            normalized_url,
        }
    }

    fn is_embed_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        self.embed_hosts
            .iter()
            .any(|embed| host == embed || host.ends_with(&format!(".{embed}")))
    }

    fn has_manifest_suffix(&self, path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.to_ascii_lowercase().ends_with(&self.manifest_suffix)
    }
}

fn has_file_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(stem, extension)| !stem.is_empty() && !extension.is_empty())
}

/// Rewrites insecure and protocol-relative URLs to the secure scheme.
///
/// Mixed-content media is blocked by the runtime without an actionable error,
/// so everything downstream sees `https`.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = strip_prefix_ignore_case(trimmed, "http://") {
        format!("https://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        trimmed.to_string()
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    if value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(kind: SourceKind, url: &str) -> ResolvedSource {
        StreamSourceResolver::default().resolve(&PlaybackConfig::background(kind, url))
    }

    #[test]
    fn test_embed_providers_resolve_to_embedded() {
        for url in [
            "https://www.youtube.com/watch?v=abc123",
            "https://youtu.be/abc123",
            "https://player.vimeo.com/video/42",
            "http://vimeo.com/42",
        ] {
            let resolved = resolve(SourceKind::File, url);
            assert_eq!(resolved.kind, SourceKind::Embedded, "{url}");
            assert!(resolved.normalized_url.starts_with("https://"));
        }
    }

    #[test]
    fn test_manifest_extension_resolves_to_stream() {
        let resolved = resolve(SourceKind::File, "https://cdn.example.com/a/master.m3u8");
        assert_eq!(resolved.kind, SourceKind::Stream);

        let resolved = resolve(
            SourceKind::File,
            "https://cdn.example.com/a/MASTER.M3U8?token=xyz#t=3",
        );
        assert_eq!(resolved.kind, SourceKind::Stream);
    }

    #[test]
    fn test_declared_stream_without_extension() {
        let resolved = resolve(SourceKind::Stream, "https://live.example.com/channel/7");
        assert_eq!(resolved.kind, SourceKind::Stream);
        assert_eq!(
            resolve(SourceKind::Stream, "https://live.example.com/v1.2/channel/").kind,
            SourceKind::Stream
        );
    }

    #[test]
    fn test_declared_stream_with_file_extension_is_a_file() {
        assert_eq!(
            resolve(SourceKind::Stream, "https://cdn.example.com/clip.mp4").kind,
            SourceKind::File
        );
        assert_eq!(
            resolve(SourceKind::Stream, "https://cdn.example.com/clip.MP4?token=1").kind,
            SourceKind::File
        );
    }

    #[test]
    fn test_everything_else_is_a_file() {
        assert_eq!(
            resolve(SourceKind::File, "https://cdn.example.com/clip.mp4").kind,
            SourceKind::File
        );
        // A declared embed on an unknown host cannot be played by a provider player
        assert_eq!(
            resolve(SourceKind::Embedded, "https://cdn.example.com/clip.webm").kind,
            SourceKind::File
        );
        assert_eq!(resolve(SourceKind::File, "not a url").kind, SourceKind::File);
    }

    #[test]
    fn test_insecure_scheme_is_rewritten() {
        assert_eq!(
            normalize_url("http://cdn.example.com/clip.mp4"),
            "https://cdn.example.com/clip.mp4"
        );
        assert_eq!(
            normalize_url("HTTP://cdn.example.com/clip.mp4"),
            "https://cdn.example.com/clip.mp4"
        );
        assert_eq!(
            normalize_url("//cdn.example.com/clip.mp4"),
            "https://cdn.example.com/clip.mp4"
        );
        assert_eq!(
            normalize_url("  https://cdn.example.com/clip.mp4 "),
            "https://cdn.example.com/clip.mp4"
        );
        assert_eq!(normalize_url("/media/clip.mp4"), "/media/clip.mp4");
    }

    #[test]
    fn test_relative_manifest_is_still_a_stream() {
        assert_eq!(
            resolve(SourceKind::File, "/media/index.m3u8").kind,
            SourceKind::Stream
        );
    }

    #[test]
    fn test_config_from_authoring_json() {
        let config = PlaybackConfig::from_json(
            r#"{"sourceKind":"file","url":"http://cdn.example.com/a.mp4","autoplay":true,"loop":true,"initiallyMuted":true,"showControls":false,"orientation":"landscape"}"#,
        )
        .unwrap();
        assert_eq!(config.source_kind, SourceKind::File);
        assert!(config.autoplay);
        assert!(config.looping);
        assert_eq!(config.orientation, Orientation::Landscape);

        let minimal =
            PlaybackConfig::from_json(r#"{"sourceKind":"stream","url":"https://x/y.m3u8"}"#)
                .unwrap();
        assert!(!minimal.autoplay);
        assert!(minimal.initially_muted);

        assert!(PlaybackConfig::from_json(r#"{"sourceKind":"file","url":" "}"#).is_err());
        assert!(PlaybackConfig::from_json("{").is_err());
    }
}
