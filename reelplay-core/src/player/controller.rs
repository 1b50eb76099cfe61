//! Per-player playback state machine.
//!
//! One [`PlaybackLifecycleController`] drives one sink. Every input (activation
//! edge, unlock edge, sink event, stream event, timer) goes through a single
//! locked transition on [`ControllerInner`]; notices raised by the transition
//! are delivered to observers after the lock is released.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::observer::{self, PlaybackNotice, PlaybackObserver};
use super::state::{
    PlaybackCounters, PlaybackError, PlaybackState, PlayerId, PlayerSession, PlayerSnapshot,
};
use crate::config::{EmbeddedUnlockPolicy, PlaybackTuning};
use crate::engine::EngineContext;
use crate::gate::{ActivationGate, GateAction};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::sink::{MediaSink, PlayRejection, SinkEvent, SinkFault, SinkId, SinkPresentation};
use crate::source::{PlaybackConfig, ResolvedSource, SourceKind};
use crate::stream::{
    AdaptiveStreamSession, NoStreamSupport, SessionContext, SessionDirective, StreamClientFactory,
    StreamEvent, StreamEventKind, StreamPolicy,
};
use crate::unlock::{SoundUnlockCoordinator, Subscription};

/// Media collaborators a player renders through.
pub struct MediaBackend {
    pub sink: Box<dyn MediaSink>,
    pub streams: Arc<dyn StreamClientFactory>,
}

impl MediaBackend {
    pub fn new(sink: Box<dyn MediaSink>, streams: Arc<dyn StreamClientFactory>) -> Self {
        Self { sink, streams }
    }

    /// Backend for hosts that only play progressive files and embeds.
    pub fn progressive(sink: Box<dyn MediaSink>) -> Self {
        Self {
            sink,
            streams: Arc::new(NoStreamSupport),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    handle: TimerHandle,
    token: u64,
}

type TimerFire = fn(&mut ControllerInner, u64);

struct ControllerInner {
    me: Weak<Shared>,
    session: PlayerSession,
    source: ResolvedSource,
    sink: Option<Box<dyn MediaSink>>,
    streams: Arc<dyn StreamClientFactory>,
    stream: Option<AdaptiveStreamSession>,
    stream_policy: StreamPolicy,
    tuning: PlaybackTuning,
    coordinator: SoundUnlockCoordinator,
    scheduler: Arc<dyn Scheduler>,
    subscription: Option<Subscription>,
    counters: PlaybackCounters,
    play_in_flight: bool,
    reload_issued: bool,
    /// Reloads since the sink last recovered
    unrecovered_reloads: u32,
    retry_timer: Option<PendingTimer>,
    recreate_timer: Option<PendingTimer>,
    next_token: u64,
    torn_down: bool,
    notices: Vec<PlaybackNotice>,
}

struct Shared {
    inner: Mutex<ControllerInner>,
    observers: Mutex<Vec<Arc<dyn PlaybackObserver>>>,
    snapshot: watch::Sender<PlayerSnapshot>,
}

impl Shared {
    /// Runs one transition, publishes the snapshot and notifies observers.
    fn run<R>(&self, transition: impl FnOnce(&mut ControllerInner) -> R) -> R {
        let (result, notices, snapshot) = {
            let mut inner = self.inner.lock();
            let result = transition(&mut inner);
            let notices = std::mem::take(&mut inner.notices);
            let snapshot = inner.snapshot();
            self.snapshot.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot.clone();
                    true
                }
            });
            (result, notices, snapshot)
        };

        if !notices.is_empty() {
            let observers = self.observers.lock().clone();
            observer::dispatch(&observers, &notices, &snapshot);
        }
        result
    }
}

/// State machine for one mounted video element.
///
/// Dropping the controller tears it down.
pub struct PlaybackLifecycleController {
    id: PlayerId,
    sink_id: SinkId,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PlaybackLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackLifecycleController")
            .field("id", &self.id)
            .field("sink", &self.sink_id)
            .field("snapshot", &*self.shared.snapshot.borrow())
            .finish()
    }
}

impl PlaybackLifecycleController {
    /// Mounts a player: resolves the source, mutes the sink and starts loading.
    ///
    /// The player starts inactive; the slide system activates it.
    pub fn mount(config: PlaybackConfig, backend: MediaBackend, context: &EngineContext) -> Self {
        let id = context.next_player_id();
        let sink_id = backend.sink.id();
        let source = context.resolver().resolve(&config);
        debug!(
            "{}: mounting {} source {}",
            id, source.kind, source.normalized_url
        );

        let shared = Arc::new_cyclic(|me| {
            let inner = ControllerInner {
                me: me.clone(),
                session: PlayerSession::new(id, config),
                source,
                sink: Some(backend.sink),
                streams: backend.streams,
                stream: None,
                stream_policy: context.stream_policy().clone(),
                tuning: context.config().playback.clone(),
                coordinator: context.coordinator().clone(),
                scheduler: Arc::clone(context.scheduler()),
                subscription: None,
                counters: PlaybackCounters::default(),
                play_in_flight: false,
                reload_issued: false,
                unrecovered_reloads: 0,
                retry_timer: None,
                recreate_timer: None,
                next_token: 0,
                torn_down: false,
                notices: Vec::new(),
            };
            let (snapshot, _) = watch::channel(inner.snapshot());
            Shared {
                inner: Mutex::new(inner),
                observers: Mutex::new(Vec::new()),
                snapshot,
            }
        });

        let weak = Arc::downgrade(&shared);
        let subscription = context.coordinator().subscribe(move |_state| {
            if let Some(shared) = weak.upgrade() {
                shared.run(|inner| inner.apply_gate("sound unlocked"));
            }
        });

        shared.run(|inner| {
            inner.subscription = Some(subscription);
            inner.begin_loading();
        });

        Self {
            id,
            sink_id,
            shared,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Sink this player renders into; hosts route sink and stream events by it.
    pub fn sink_id(&self) -> SinkId {
        self.sink_id
    }

    /// Applies the slide activation signal. Only edges have an effect.
    pub fn set_active(&self, active: bool) {
        self.shared.run(|inner| inner.set_active(active));
    }

    /// Feeds a lifecycle event raised by this player's sink.
    pub fn handle_sink_event(&self, event: SinkEvent) {
        self.shared.run(|inner| inner.on_sink_event(event));
    }

    /// Feeds an event raised by this player's streaming client.
    pub fn handle_stream_event(&self, event: StreamEvent) {
        self.shared.run(|inner| inner.on_stream_event(event));
    }

    /// Explicit user play, for players without autoplay.
    ///
    /// Plays with sound only if sound is already unlocked.
    pub fn user_play(&self) {
        self.shared.run(|inner| inner.user_play());
    }

    pub fn add_observer(&self, observer: Arc<dyn PlaybackObserver>) {
        self.shared.observers.lock().push(observer);
    }

    pub fn session(&self) -> PlayerSession {
        self.shared.snapshot.borrow().session.clone()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<PlayerSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.snapshot.borrow().mounted
    }

    /// Cancels timers, closes the stream session, drops the unlock
    /// subscription and releases the sink. Idempotent.
    pub fn teardown(&self) {
        self.shared.run(|inner| inner.teardown());
    }
}

impl Drop for PlaybackLifecycleController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ControllerInner {
    fn id(&self) -> PlayerId {
        self.session.id
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            session: self.session.clone(),
            source: self.source.clone(),
            unlocked: self.coordinator.is_unlocked(),
            mounted: !self.torn_down,
            counters: self.counters,
        }
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            mounted: !self.torn_down,
            active: self.session.activation,
            autoplay: self.session.config.autoplay,
        }
    }

    fn set_state(&mut self, to: PlaybackState) {
        let from = self.session.playback_state;
        if from == to {
            return;
        }
        trace!("{}: {} -> {}", self.id(), from, to);
        self.session.playback_state = to;
        self.notices.push(PlaybackNotice::StateChanged {
            player: self.id(),
            from,
            to,
        });
    }

    fn begin_loading(&mut self) {
        let label = self.id().to_string();
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        sink.present(SinkPresentation {
            show_controls: self.session.config.show_controls,
            orientation: self.session.config.orientation,
        });
        sink.set_muted(true);
        self.session.muted = true;

        let url = self.source.normalized_url.clone();
        match self.source.kind {
            SourceKind::Stream => {
                self.stream = Some(AdaptiveStreamSession::open(
                    label,
                    sink.id(),
                    url,
                    Arc::clone(&self.streams),
                    self.stream_policy.clone(),
                ));
            }
            SourceKind::File | SourceKind::Embedded => sink.load(&url),
        }
        self.set_state(PlaybackState::Loading);
    }

    fn set_active(&mut self, active: bool) {
        if self.torn_down || self.session.activation == active {
            return;
        }
        self.session.activation = active;
        if active {
            self.session.attempted_play_since_activation = false;
            debug!("{}: activated", self.id());
            self.apply_gate("activated");
        } else {
            debug!("{}: deactivated", self.id());
            self.apply_gate("deactivated");
        }
    }

    /// Re-evaluates the activation gate and carries out its decision.
    fn apply_gate(&mut self, trigger: &str) {
        if self.torn_down {
            return;
        }
        if self.session.playback_state.is_abandoned() {
            self.set_muted(true);
            return;
        }

        let unlocked = self.coordinator.is_unlocked();
        let patch = ActivationGate::apply(&self.session, self.session.activation, unlocked);
        trace!(
            "{}: gate on {}: muted={}, action={}",
            self.id(),
            trigger,
            patch.muted,
            patch.action
        );

        match patch.action {
            GateAction::PauseIfPlaying => {
                self.set_muted(true);
                self.pause_if_playing();
            }
            GateAction::Play => {
                self.set_muted(patch.muted);
                self.try_play();
            }
            GateAction::RestartAndPlay => self.restart_and_play(patch.muted),
            GateAction::None => self.set_muted(patch.muted),
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.session.muted = muted;
        if let Some(sink) = self.sink.as_mut()
            && sink.is_muted() != muted
        {
            sink.set_muted(muted);
        }
    }

    fn pause_if_playing(&mut self) {
        let playing = self.session.playback_state == PlaybackState::Playing;
        if !playing && !self.play_in_flight {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.pause();
        }
        self.play_in_flight = false;
        if playing {
            self.set_state(PlaybackState::Paused);
            self.notices
                .push(PlaybackNotice::PlayPaused { player: self.id() });
        }
    }

    /// Requests play unless already playing, not ready, or a request is pending.
    fn try_play(&mut self) {
        let state = self.session.playback_state;
        if state == PlaybackState::Playing {
            return;
        }
        if !state.can_play() {
            trace!("{}: play deferred while {}", self.id(), state);
            return;
        }
        if self.play_in_flight {
            trace!("{}: play already in flight, coalescing", self.id());
            return;
        }
        self.issue_play();
    }

    fn issue_play(&mut self) {
        let muted = self.session.muted;
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        sink.set_muted(muted);
        sink.play();
        self.play_in_flight = true;
        self.session.attempted_play_since_activation = true;
        self.counters.play_attempts += 1;
        self.notices.push(PlaybackNotice::PlayRequested {
            player: self.id(),
            muted,
        });
        debug!(
            "{}: play requested (muted={}, attempt {})",
            self.id(),
            muted,
            self.counters.play_attempts
        );
    }

    fn restart_and_play(&mut self, muted: bool) {
        self.set_muted(muted);

        let state = self.session.playback_state;
        let resume_in_place = self.source.kind == SourceKind::Embedded
            && self.tuning.embedded_unlock_policy == EmbeddedUnlockPolicy::ResumeInPlace;
        if !resume_in_place && state.has_progressed() {
            if let Some(sink) = self.sink.as_mut() {
                sink.seek(Duration::ZERO);
            }
            self.counters.restarts += 1;
            self.notices
                .push(PlaybackNotice::Restarted { player: self.id() });
            info!("{}: restarting from the beginning with sound", self.id());
        }

        if state != PlaybackState::Playing {
            self.try_play();
        }
    }

    fn user_play(&mut self) {
        if self.torn_down
            || !self.session.activation
            || self.session.playback_state.is_abandoned()
        {
            return;
        }
        let muted = !self.coordinator.is_unlocked();
        self.set_muted(muted);
        if self.session.playback_state == PlaybackState::Ended
            && let Some(sink) = self.sink.as_mut()
        {
            sink.seek(Duration::ZERO);
        }
        self.try_play();
    }

    fn on_sink_event(&mut self, event: SinkEvent) {
        if self.torn_down {
            return;
        }
        if self.session.playback_state.is_abandoned() {
            trace!("{}: ignoring {:?} after abandonment", self.id(), event);
            return;
        }

        match event {
            SinkEvent::MetadataLoaded | SinkEvent::DataLoaded | SinkEvent::CanPlay => {
                self.on_readiness()
            }
            SinkEvent::Playing => self.on_playing(),
            SinkEvent::Paused => self.on_paused(),
            SinkEvent::Ended => self.on_ended(),
            SinkEvent::PlayRejected(rejection) => self.on_play_rejected(rejection),
            SinkEvent::Error(fault) => self.on_sink_fault(fault),
        }
    }

    /// Moves to `Ready` on the first readiness after a (re)load.
    fn promote_ready(&mut self) -> bool {
        match self.session.playback_state {
            PlaybackState::Loading => {
                self.set_state(PlaybackState::Ready);
                true
            }
            PlaybackState::Retrying if self.reload_issued => {
                info!("{}: media element recovered after reload", self.id());
                self.reload_issued = false;
                self.unrecovered_reloads = 0;
                self.set_state(PlaybackState::Ready);
                true
            }
            _ => false,
        }
    }

    fn on_readiness(&mut self) {
        if self.promote_ready() {
            self.apply_gate("ready");
            return;
        }

        // A later readiness signal retries a play the runtime refused
        let state = self.session.playback_state;
        if matches!(state, PlaybackState::Ready | PlaybackState::Paused)
            && self.session.attempted_play_since_activation
            && !self.play_in_flight
        {
            self.apply_gate("readiness re-fired");
        }
    }

    fn on_playing(&mut self) {
        self.play_in_flight = false;
        let state = self.session.playback_state;

        if state.is_failing() || !self.session.activation {
            debug!(
                "{}: sink started while {} (active={}), pausing",
                self.id(),
                state,
                self.session.activation
            );
            self.set_muted(true);
            if let Some(sink) = self.sink.as_mut() {
                sink.pause();
            }
            return;
        }

        self.session.attempted_play_since_activation = false;
        if state != PlaybackState::Playing {
            self.set_state(PlaybackState::Playing);
            self.notices
                .push(PlaybackNotice::PlayStarted { player: self.id() });
        }
    }

    fn on_paused(&mut self) {
        if self.session.playback_state == PlaybackState::Playing {
            self.set_state(PlaybackState::Paused);
            self.notices
                .push(PlaybackNotice::PlayPaused { player: self.id() });
        }
    }

    fn on_ended(&mut self) {
        if !self.session.playback_state.has_progressed() {
            return;
        }
        self.play_in_flight = false;
        self.set_state(PlaybackState::Ended);

        if self.session.config.looping && self.session.activation {
            if let Some(sink) = self.sink.as_mut() {
                sink.seek(Duration::ZERO);
            }
            self.counters.loops += 1;
            let unlocked = self.coordinator.is_unlocked();
            let patch = ActivationGate::apply(&self.session, true, unlocked);
            self.set_muted(patch.muted);
            self.issue_play();
        }
    }

    fn on_play_rejected(&mut self, rejection: PlayRejection) {
        self.play_in_flight = false;
        if !rejection.counts_as_attempt() {
            trace!("{}: pending play aborted", self.id());
            return;
        }
        self.session.attempted_play_since_activation = true;
        self.counters.rejections += 1;
        debug!(
            "{}: play rejected ({:?}), waiting for the next trigger",
            self.id(),
            rejection
        );
        self.notices.push(PlaybackNotice::PlayRejected {
            player: self.id(),
            rejection,
        });
    }

    fn on_sink_fault(&mut self, fault: SinkFault) {
        if !fault.is_fatal() {
            debug!("{}: ignoring non-fatal sink fault: {}", self.id(), fault);
            return;
        }
        let state = self.session.playback_state;
        if state == PlaybackState::Idle {
            return;
        }

        self.play_in_flight = false;
        self.session.last_error = Some(PlaybackError::Sink {
            fault: fault.clone(),
        });

        if state == PlaybackState::Retrying
            || self.unrecovered_reloads >= self.tuning.max_sink_retries
        {
            self.abandon(&format!("media element failed again: {fault}"));
            return;
        }

        warn!(
            "{}: media element failed, reloading in {:?}: {}",
            self.id(),
            self.tuning.sink_retry_backoff,
            fault
        );
        self.set_state(PlaybackState::Error);
        self.counters.sink_retries += 1;
        self.unrecovered_reloads += 1;
        self.reload_issued = false;
        self.set_state(PlaybackState::Retrying);
        let timer = self.schedule(self.tuning.sink_retry_backoff, Self::on_retry_due);
        self.retry_timer = Some(timer);
    }

    fn on_retry_due(&mut self, token: u64) {
        if self.torn_down || self.retry_timer.map(|timer| timer.token) != Some(token) {
            return;
        }
        self.retry_timer = None;
        if self.session.playback_state != PlaybackState::Retrying {
            return;
        }

        info!("{}: reloading media element", self.id());
        self.reload_issued = true;
        match (self.source.kind, self.stream.as_mut()) {
            (SourceKind::Stream, Some(stream)) => stream.reload(),
            _ => {
                let url = self.source.normalized_url.clone();
                if let Some(sink) = self.sink.as_mut() {
                    sink.load(&url);
                }
            }
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        if self.torn_down || self.session.playback_state.is_abandoned() {
            return;
        }
        let ctx = self.session_context();
        let Some(stream) = self.stream.as_mut() else {
            trace!("{}: stream event without a session", self.id());
            return;
        };

        let current = event.generation == stream.generation();
        let (manifest, fault) = match &event.kind {
            StreamEventKind::ManifestParsed => (true, None),
            StreamEventKind::Fault(fault) => (false, Some(fault.clone())),
        };

        match stream.handle_event(event, ctx) {
            SessionDirective::None => {
                if current && manifest {
                    self.promote_ready();
                }
            }
            SessionDirective::RequestPlay => {
                self.promote_ready();
                self.apply_gate("manifest parsed");
            }
            SessionDirective::ScheduleRecreate { after } => {
                if let Some(fault) = fault {
                    self.session.last_error = Some(PlaybackError::Stream { fault });
                }
                if (self.session.playback_state == PlaybackState::Playing || self.play_in_flight)
                    && let Some(sink) = self.sink.as_mut()
                {
                    sink.pause();
                }
                self.play_in_flight = false;
                self.reload_issued = false;
                self.set_state(PlaybackState::Loading);
                let timer = self.schedule(after, Self::on_recreate_due);
                self.recreate_timer = Some(timer);
            }
            SessionDirective::Abandoned => {
                if let Some(fault) = fault {
                    self.session.last_error = Some(PlaybackError::Stream { fault });
                }
                self.abandon("stream session failed after recreation");
            }
            SessionDirective::Recreated { .. } => {}
        }
    }

    fn on_recreate_due(&mut self, token: u64) {
        if self.torn_down || self.recreate_timer.map(|timer| timer.token) != Some(token) {
            return;
        }
        self.recreate_timer = None;

        let ctx = self.session_context();
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.on_recreate_due(ctx) {
            SessionDirective::Recreated { .. } => self.counters.stream_recreations += 1,
            SessionDirective::Abandoned => {
                if self.session.last_error.is_none() {
                    self.session.last_error = Some(PlaybackError::Abandoned {
                        reason: "stream recreation no longer wanted".to_string(),
                    });
                }
                self.abandon("stream recreation no longer wanted");
            }
            _ => {}
        }
    }

    /// Terminal failure: muted, paused, silent.
    fn abandon(&mut self, reason: &str) {
        warn!("{}: abandoning playback: {}", self.id(), reason);
        self.cancel_timers();
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.play_in_flight = false;
        self.reload_issued = false;
        self.session.muted = true;
        if let Some(sink) = self.sink.as_mut() {
            sink.set_muted(true);
            sink.pause();
        }
        self.set_state(PlaybackState::Abandoned);
        self.notices.push(PlaybackNotice::Abandoned {
            player: self.id(),
            error: self.session.last_error.clone(),
        });
    }

    fn schedule(&mut self, delay: Duration, fire: TimerFire) -> PendingTimer {
        self.next_token += 1;
        let token = self.next_token;
        let me = self.me.clone();
        let handle = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = me.upgrade() {
                    shared.run(|inner| fire(inner, token));
                }
            }),
        );
        PendingTimer { handle, token }
    }

    fn cancel_timers(&mut self) {
        for timer in [self.retry_timer.take(), self.recreate_timer.take()]
            .into_iter()
            .flatten()
        {
            self.scheduler.cancel(timer.handle);
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.cancel_timers();
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        self.subscription = None;
        self.sink = None;
        self.play_in_flight = false;
        debug!("{}: torn down", self.id());
    }
}
