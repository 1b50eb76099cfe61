//! Native media sink contract.
//!
//! A sink is the element that actually renders video: a native media element
//! or a bridge to an embedded provider player. Commands are requests; their
//! outcomes come back asynchronously as [`SinkEvent`]s that the host feeds to
//! the owning controller.

use std::time::Duration;

use serde::Serialize;

use crate::source::Orientation;

/// Identifier a streaming client uses to bind to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SinkId(pub u64);

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Static presentation attributes applied once at mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkPresentation {
    pub show_controls: bool,
    pub orientation: Orientation,
}

/// Why the runtime refused a `play()` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlayRejection {
    /// Autoplay policy: unmuted playback without a user gesture
    AutoplayDenied,
    /// A pending play was interrupted by `pause()` or a new load
    Aborted,
    Other(String),
}

impl PlayRejection {
    /// Whether the rejection counts as a failed play attempt.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, PlayRejection::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SinkFaultKind {
    /// Fetch aborted by the user agent; not a failure
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
}

/// Error reported by the sink itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkFault {
    pub kind: SinkFaultKind,
    pub message: String,
}

impl SinkFault {
    pub fn new(kind: SinkFaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the fault stops playback and enters the error branch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, SinkFaultKind::Aborted)
    }
}

impl std::fmt::Display for SinkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Lifecycle signals raised by a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SinkEvent {
    MetadataLoaded,
    DataLoaded,
    CanPlay,
    /// Playback actually started or resumed
    Playing,
    Paused,
    Ended,
    PlayRejected(PlayRejection),
    Error(SinkFault),
}

impl SinkEvent {
    /// Readiness family: any of these means the sink can start playing.
    pub fn is_readiness(&self) -> bool {
        matches!(
            self,
            SinkEvent::MetadataLoaded | SinkEvent::DataLoaded | SinkEvent::CanPlay
        )
    }
}

/// Element that renders a player's video.
///
/// Implementations must not panic; every method is a fire-and-forget request.
pub trait MediaSink: Send {
    fn id(&self) -> SinkId;

    fn present(&mut self, presentation: SinkPresentation);

    /// Starts a progressive or embedded load. Not used for adaptive streams.
    fn load(&mut self, url: &str);

    /// Requests playback; the outcome arrives as `Playing` or `PlayRejected`.
    fn play(&mut self);

    fn pause(&mut self);

    fn seek(&mut self, position: Duration);

    fn set_muted(&mut self, muted: bool);

    fn is_muted(&self) -> bool;
}
