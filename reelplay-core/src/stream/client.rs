//! Contract for segmented-streaming clients.

use serde::Serialize;

use crate::sink::SinkId;

/// Fault category reported by a streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    /// Manifest or segment fetch failure
    Network,
    /// Decode or buffer corruption
    Media,
    /// Anything the client could not categorize (mux, key system, internal)
    Other,
}

/// Fault raised by a streaming client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFault {
    pub kind: FaultKind,
    /// Whether the client considers itself unable to continue
    pub fatal: bool,
    /// Free-form diagnostic text
    pub details: String,
}

impl StreamFault {
    pub fn new(kind: FaultKind, fatal: bool, details: impl Into<String>) -> Self {
        Self {
            kind,
            fatal,
            details: details.into(),
        }
    }
}

impl std::fmt::Display for StreamFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}{}: {}",
            self.kind,
            if self.fatal { " (fatal)" } else { "" },
            self.details
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StreamEventKind {
    /// Manifest loaded and parsed; the client is attached and can feed the sink
    ManifestParsed,
    Fault(StreamFault),
}

/// Event raised by the client instance of one session generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEvent {
    pub generation: u64,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    pub fn manifest_parsed(generation: u64) -> Self {
        Self {
            generation,
            kind: StreamEventKind::ManifestParsed,
        }
    }

    pub fn fault(generation: u64, fault: StreamFault) -> Self {
        Self {
            generation,
            kind: StreamEventKind::Fault(fault),
        }
    }
}

/// Segmented-streaming client bound to one sink.
///
/// Implementations must tolerate `destroy` while segments are in flight and
/// must not panic from any method.
pub trait StreamClient: Send {
    /// Starts fetching and parsing the manifest.
    fn load_source(&mut self, url: &str);

    fn attach_media(&mut self, sink: SinkId);

    /// Resumes loading after a network fault.
    fn start_load(&mut self);

    /// Flushes and rebuilds a corrupted media buffer.
    fn recover_media_error(&mut self);

    /// Detaches from the sink and releases every resource.
    fn destroy(&mut self);
}

/// Creates a fresh client per session generation.
///
/// The host wires the created client's callbacks so that its events reach
/// the owning controller tagged with `generation`.
pub trait StreamClientFactory: Send + Sync {
    fn create(&self, generation: u64) -> Box<dyn StreamClient>;
}

/// Factory for hosts that never play adaptive streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStreamSupport;

impl StreamClientFactory for NoStreamSupport {
    fn create(&self, generation: u64) -> Box<dyn StreamClient> {
        Box::new(DetachedClient { generation })
    }
}

/// Client that does nothing; the sink never becomes ready through it.
#[derive(Debug)]
struct DetachedClient {
    generation: u64,
}

impl StreamClient for DetachedClient {
    fn load_source(&mut self, url: &str) {
        tracing::warn!(
            "No streaming client available, generation {} cannot load {}",
            self.generation,
            url
        );
    }

    fn attach_media(&mut self, _sink: SinkId) {}

    fn start_load(&mut self) {}

    fn recover_media_error(&mut self) {}

    fn destroy(&mut self) {}
}
