//! Adaptive streaming session bound to one sink.
//!
//! The session owns the streaming client and decides how each fault is
//! recovered. It never schedules timers itself: a fatal fault yields
//! [`SessionDirective::ScheduleRecreate`] and the owning controller calls
//! [`AdaptiveStreamSession::on_recreate_due`] when the backoff elapses.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{StreamClient, StreamClientFactory, StreamEvent, StreamEventKind, StreamFault};
use super::recovery::{FaultClassifier, RecoveryAction};
use crate::config::{ConfigError, StreamTuning};
use crate::sink::SinkId;

/// Recovery limits shared by every session of an engine.
#[derive(Debug, Clone)]
pub struct StreamPolicy {
    pub classifier: FaultClassifier,
    pub recreate_backoff: Duration,
    pub max_recreations: u32,
}

impl StreamPolicy {
    /// # Errors
    ///
    /// - `ConfigError::InvalidPattern` - The spurious fault pattern does not compile
    pub fn from_tuning(tuning: &StreamTuning) -> Result<Self, ConfigError> {
        Ok(Self {
            classifier: FaultClassifier::new(tuning)?,
            recreate_backoff: tuning.recreate_backoff,
            max_recreations: tuning.max_recreations,
        })
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Manifest requested, client attached, waiting for the parse
    Loading,
    /// Manifest parsed; the client feeds the sink
    Attached,
    /// Client destroyed after a fatal fault, recreation pending
    AwaitingRecreate,
    /// Gave up; no client exists and none will be created
    Abandoned,
    /// Closed by the owner
    Closed,
}

impl SessionState {
    /// Whether a client currently exists for this session.
    pub fn has_client(&self) -> bool {
        matches!(self, SessionState::Loading | SessionState::Attached)
    }

    /// Whether the session reached a state it never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Abandoned | SessionState::Closed)
    }
}

/// Owner state the session needs to decide on play and recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub mounted: bool,
    pub active: bool,
    pub autoplay: bool,
}

/// What the owner must do after the session handled an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirective {
    None,
    /// Manifest is ready and the owner is active: attempt play now
    RequestPlay,
    /// Call `on_recreate_due` after `after`
    ScheduleRecreate { after: Duration },
    /// A fresh client was created and is loading the manifest
    Recreated { generation: u64 },
    /// The session gave up for good
    Abandoned,
}

/// Streaming client lifecycle for one player.
///
/// Each client instance is a generation. Events carry the generation of the
/// client that raised them, so callbacks from a destroyed client are dropped.
pub struct AdaptiveStreamSession {
    label: String,
    url: String,
    sink: SinkId,
    factory: Arc<dyn StreamClientFactory>,
    policy: StreamPolicy,
    client: Option<Box<dyn StreamClient>>,
    generation: u64,
    recreations: u32,
    /// Recreations since a client last reached `Attached`
    unrecovered: u32,
    state: SessionState,
}

impl std::fmt::Debug for AdaptiveStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveStreamSession")
            .field("label", &self.label)
            .field("url", &self.url)
            .field("sink", &self.sink)
            .field("generation", &self.generation)
            .field("recreations", &self.recreations)
            .field("unrecovered", &self.unrecovered)
            .field("state", &self.state)
            .finish()
    }
}

impl AdaptiveStreamSession {
    /// Creates the first client, starts the manifest load and attaches the sink.
    pub fn open(
        label: impl Into<String>,
        sink: SinkId,
        url: impl Into<String>,
        factory: Arc<dyn StreamClientFactory>,
        policy: StreamPolicy,
    ) -> Self {
        let mut session = Self {
            label: label.into(),
            url: url.into(),
            sink,
            factory,
            policy,
            client: None,
            generation: 0,
            recreations: 0,
            unrecovered: 0,
            state: SessionState::Loading,
        };
        session.spawn_client();
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Generation of the current (or last) client.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total recreations over the session's lifetime.
    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Applies a client event and tells the owner what to do next.
    pub fn handle_event(&mut self, event: StreamEvent, ctx: SessionContext) -> SessionDirective {
        if event.generation != self.generation || !self.state.has_client() {
            debug!(
                "{}: dropping stale stream event from generation {} (current {}, {:?})",
                self.label, event.generation, self.generation, self.state
            );
            return SessionDirective::None;
        }

        match event.kind {
            StreamEventKind::ManifestParsed => {
                self.state = SessionState::Attached;
                debug!(
                    "{}: manifest parsed (generation {})",
                    self.label, self.generation
                );
                if self.unrecovered > 0 {
                    info!(
                        "{}: recreated stream recovered (generation {})",
                        self.label, self.generation
                    );
                    self.unrecovered = 0;
                }
                if ctx.active {
                    SessionDirective::RequestPlay
                } else {
                    SessionDirective::None
                }
            }
            StreamEventKind::Fault(fault) => self.handle_fault(fault),
        }
    }

    fn handle_fault(&mut self, fault: StreamFault) -> SessionDirective {
        match self.policy.classifier.classify(&fault) {
            RecoveryAction::Suppress => {
                debug!("{}: suppressed spurious stream warning: {}", self.label, fault);
                SessionDirective::None
            }
            RecoveryAction::ResumeLoading => {
                info!("{}: network fault, resuming load: {}", self.label, fault);
                if let Some(client) = self.client.as_mut() {
                    client.start_load();
                }
                SessionDirective::None
            }
            RecoveryAction::RecoverMedia => {
                info!("{}: media fault, recovering buffer: {}", self.label, fault);
                if let Some(client) = self.client.as_mut() {
                    client.recover_media_error();
                }
                SessionDirective::None
            }
            RecoveryAction::Recreate => {
                self.destroy_client();
                if self.unrecovered >= self.policy.max_recreations {
                    warn!(
                        "{}: fatal stream fault after {} unrecovered recreation(s), abandoning: {}",
                        self.label, self.unrecovered, fault
                    );
                    self.state = SessionState::Abandoned;
                    return SessionDirective::Abandoned;
                }
                warn!(
                    "{}: fatal stream fault, recreating in {:?}: {}",
                    self.label, self.policy.recreate_backoff, fault
                );
                self.state = SessionState::AwaitingRecreate;
                SessionDirective::ScheduleRecreate {
                    after: self.policy.recreate_backoff,
                }
            }
        }
    }

    /// Runs the delayed recreation scheduled by a fatal fault.
    ///
    /// Recreates only while the owner is still mounted, active and wants
    /// autoplay; otherwise the session is abandoned without a new client.
    pub fn on_recreate_due(&mut self, ctx: SessionContext) -> SessionDirective {
        if self.state != SessionState::AwaitingRecreate {
            return SessionDirective::None;
        }

        if !(ctx.mounted && ctx.active && ctx.autoplay) {
            debug!(
                "{}: recreation no longer wanted (mounted={}, active={}, autoplay={}), abandoning",
                self.label, ctx.mounted, ctx.active, ctx.autoplay
            );
            self.state = SessionState::Abandoned;
            return SessionDirective::Abandoned;
        }

        self.recreations += 1;
        self.unrecovered += 1;
        self.state = SessionState::Loading;
        self.spawn_client();
        info!(
            "{}: recreated stream session (generation {})",
            self.label, self.generation
        );
        SessionDirective::Recreated {
            generation: self.generation,
        }
    }

    /// Replaces the client with a fresh generation outside the recreation budget.
    ///
    /// Used when the sink itself failed and is being reloaded.
    pub fn reload(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.destroy_client();
        self.state = SessionState::Loading;
        self.spawn_client();
        debug!(
            "{}: stream session reloaded (generation {})",
            self.label, self.generation
        );
    }

    /// Destroys the client. Consumes the session so it closes exactly once.
    pub fn close(mut self) {
        self.destroy_client();
        self.state = SessionState::Closed;
        debug!("{}: stream session closed", self.label);
    }

    fn spawn_client(&mut self) {
        self.generation += 1;
        let mut client = self.factory.create(self.generation);
        client.load_source(&self.url);
        client.attach_media(self.sink);
        self.client = Some(client);
    }

    fn destroy_client(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.destroy();
        }
    }
}

impl Drop for AdaptiveStreamSession {
    fn drop(&mut self) {
        self.destroy_client();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::stream::client::FaultKind;

    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<String>>,
    }

    struct LoggingClient {
        generation: u64,
        log: Arc<CallLog>,
    }

    impl LoggingClient {
        fn record(&self, call: &str) {
            self.log
                .calls
                .lock()
                .push(format!("{}:{}", self.generation, call));
        }
    }

    impl StreamClient for LoggingClient {
        fn load_source(&mut self, url: &str) {
            self.record(&format!("load {url}"));
        }

        fn attach_media(&mut self, sink: SinkId) {
            self.record(&format!("attach {sink}"));
        }

        fn start_load(&mut self) {
            self.record("start_load");
        }

        fn recover_media_error(&mut self) {
            self.record("recover_media_error");
        }

        fn destroy(&mut self) {
            self.record("destroy");
        }
    }

    struct LoggingFactory {
        log: Arc<CallLog>,
    }

    impl StreamClientFactory for LoggingFactory {
        fn create(&self, generation: u64) -> Box<dyn StreamClient> {
            Box::new(LoggingClient {
                generation,
                log: Arc::clone(&self.log),
            })
        }
    }

    const LIVE: SessionContext = SessionContext {
        mounted: true,
        active: true,
        autoplay: true,
    };

    fn open_session() -> (AdaptiveStreamSession, Arc<CallLog>) {
        let log = Arc::new(CallLog::default());
        let factory = Arc::new(LoggingFactory {
            log: Arc::clone(&log),
        });
        let policy = StreamPolicy::from_tuning(&StreamTuning::default()).unwrap();
        let session =
            AdaptiveStreamSession::open("player-1", SinkId(7), "https://x/a.m3u8", factory, policy);
        (session, log)
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.calls.lock().clone()
    }

    fn fatal() -> StreamEvent {
        StreamEvent::fault(0, StreamFault::new(FaultKind::Other, true, "internalException"))
    }

    fn at(generation: u64, mut event: StreamEvent) -> StreamEvent {
        event.generation = generation;
        event
    }

    #[test]
    fn test_open_loads_then_attaches() {
        let (session, log) = open_session();
        assert_eq!(session.state(), SessionState::Loading);
        assert_eq!(session.generation(), 1);
        assert_eq!(
            calls(&log),
            vec!["1:load https://x/a.m3u8", "1:attach sink-7"]
        );
    }

    #[test]
    fn test_manifest_requests_play_only_when_active() {
        let (mut session, _log) = open_session();
        let inactive = SessionContext {
            active: false,
            ..LIVE
        };
        assert_eq!(
            session.handle_event(StreamEvent::manifest_parsed(1), inactive),
            SessionDirective::None
        );
        assert_eq!(session.state(), SessionState::Attached);

        let (mut session, _log) = open_session();
        assert_eq!(
            session.handle_event(StreamEvent::manifest_parsed(1), LIVE),
            SessionDirective::RequestPlay
        );
    }

    #[test]
    fn test_local_recovery_does_not_recreate() {
        let (mut session, log) = open_session();
        let network = StreamEvent::fault(1, StreamFault::new(FaultKind::Network, true, "fragLoadError"));
        let media = StreamEvent::fault(1, StreamFault::new(FaultKind::Media, true, "bufferAppendError"));

        assert_eq!(session.handle_event(network, LIVE), SessionDirective::None);
        assert_eq!(session.handle_event(media, LIVE), SessionDirective::None);

        assert_eq!(session.generation(), 1);
        assert_eq!(
            &calls(&log)[2..],
            &["1:start_load".to_string(), "1:recover_media_error".to_string()]
        );
    }

    #[test]
    fn test_spurious_warning_is_dropped() {
        let (mut session, log) = open_session();
        let warning = StreamEvent::fault(
            1,
            StreamFault::new(FaultKind::Network, false, "secure connection warning"),
        );
        assert_eq!(session.handle_event(warning, LIVE), SessionDirective::None);
        assert_eq!(calls(&log).len(), 2);
    }

    #[test]
    fn test_fatal_fault_recreates_once_then_abandons() {
        let (mut session, log) = open_session();

        assert_eq!(
            session.handle_event(at(1, fatal()), LIVE),
            SessionDirective::ScheduleRecreate {
                after: Duration::from_secs(1)
            }
        );
        assert_eq!(session.state(), SessionState::AwaitingRecreate);

        assert_eq!(
            session.on_recreate_due(LIVE),
            SessionDirective::Recreated { generation: 2 }
        );
        assert_eq!(session.recreations(), 1);

        // The old client's late events are stale
        assert_eq!(session.handle_event(at(1, fatal()), LIVE), SessionDirective::None);

        assert_eq!(
            session.handle_event(at(2, fatal()), LIVE),
            SessionDirective::Abandoned
        );
        assert_eq!(session.state(), SessionState::Abandoned);
        assert_eq!(session.on_recreate_due(LIVE), SessionDirective::None);

        assert_eq!(
            calls(&log),
            vec![
                "1:load https://x/a.m3u8",
                "1:attach sink-7",
                "1:destroy",
                "2:load https://x/a.m3u8",
                "2:attach sink-7",
                "2:destroy",
            ]
        );
    }

    #[test]
    fn test_recovered_session_gets_fresh_budget_for_later_fault() {
        let (mut session, log) = open_session();
        session.handle_event(at(1, fatal()), LIVE);
        session.on_recreate_due(LIVE);
        assert_eq!(
            session.handle_event(at(2, StreamEvent::manifest_parsed(2)), LIVE),
            SessionDirective::RequestPlay
        );

        // Unrelated fault long after the first recovery
        assert_eq!(
            session.handle_event(at(2, fatal()), LIVE),
            SessionDirective::ScheduleRecreate {
                after: Duration::from_secs(1)
            }
        );
        assert_eq!(
            session.on_recreate_due(LIVE),
            SessionDirective::Recreated { generation: 3 }
        );
        assert_eq!(session.recreations(), 2);

        // That recreation never attached, so its own failure is final
        assert_eq!(
            session.handle_event(at(3, fatal()), LIVE),
            SessionDirective::Abandoned
        );
        assert_eq!(calls(&log).iter().filter(|c| c.ends_with("destroy")).count(), 3);
    }

    #[test]
    fn test_recreation_abandoned_when_inactive() {
        let (mut session, log) = open_session();
        session.handle_event(at(1, fatal()), LIVE);

        let swiped_away = SessionContext {
            active: false,
            ..LIVE
        };
        assert_eq!(
            session.on_recreate_due(swiped_away),
            SessionDirective::Abandoned
        );
        assert_eq!(session.generation(), 1);
        assert_eq!(calls(&log).len(), 3);
    }

    #[test]
    fn test_reload_does_not_spend_recreation_budget() {
        let (mut session, log) = open_session();
        session.reload();
        assert_eq!(session.generation(), 2);
        assert_eq!(session.recreations(), 0);
        assert_eq!(
            &calls(&log)[2..],
            &[
                "1:destroy".to_string(),
                "2:load https://x/a.m3u8".to_string(),
                "2:attach sink-7".to_string()
            ]
        );
    }

    #[test]
    fn test_close_destroys_exactly_once() {
        let (session, log) = open_session();
        session.close();
        let destroys = calls(&log)
            .iter()
            .filter(|call| call.ends_with("destroy"))
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn test_drop_destroys_live_client() {
        let (session, log) = open_session();
        drop(session);
        assert_eq!(calls(&log).last().map(String::as_str), Some("1:destroy"));
    }
}
