//! Scripted media fixtures for tests and simulation.
//!
//! [`ScriptedMedia`] stands in for the runtime: it hands out sinks and
//! streaming clients, enforces an autoplay policy, and queues the events a real
//! runtime would raise later. Tests deliver the queue with
//! [`ScriptedMedia::settle`] or [`ScriptedMedia::settle_with`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::deck::SlideDeck;
use crate::player::{MediaBackend, PlaybackLifecycleController, PlaybackNotice, PlaybackObserver, PlayerSnapshot};
use crate::sink::{
    MediaSink, PlayRejection, SinkEvent, SinkFault, SinkFaultKind, SinkId, SinkPresentation,
};
use crate::stream::{FaultKind, StreamClient, StreamClientFactory, StreamEvent, StreamFault};

/// Upper bound on events delivered by one settle, to catch feedback loops.
const MAX_SETTLE_EVENTS: usize = 10_000;

/// Runtime autoplay rules applied to `play()` and unmute requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    /// Everything plays
    Permissive,
    /// Muted playback is free; unmuted playback needs the page to have seen a
    /// user gesture at some point
    #[default]
    MutedOnly,
    /// Muted playback is free; unmuted playback needs a gesture in progress,
    /// after which the element stays allowed
    GestureBound,
    /// Nothing plays
    DenyAll,
}

/// Command received by a scripted sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Present(SinkPresentation),
    Load(String),
    Play,
    Pause,
    Seek(Duration),
    SetMuted(bool),
}

/// Command received by a scripted streaming client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCall {
    LoadSource(String),
    AttachMedia(SinkId),
    StartLoad,
    RecoverMediaError,
    Destroy,
}

/// Queued event addressed to the player owning `sink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Sink { sink: SinkId, event: SinkEvent },
    Stream { sink: SinkId, event: StreamEvent },
}

impl MediaEvent {
    pub fn sink(&self) -> SinkId {
        match self {
            MediaEvent::Sink { sink, .. } | MediaEvent::Stream { sink, .. } => *sink,
        }
    }
}

#[derive(Debug, Default)]
struct SinkRecord {
    calls: Vec<SinkCall>,
    playing: bool,
    muted: bool,
    position: Duration,
    blessed: bool,
    destroyed: bool,
}

#[derive(Debug)]
struct StreamRecord {
    generation: u64,
    url: Option<String>,
    sink: Option<SinkId>,
    calls: Vec<StreamCall>,
}

#[derive(Debug)]
struct MediaState {
    policy: AutoplayPolicy,
    gesture: bool,
    activated: bool,
    next_sink: u64,
    sinks: HashMap<SinkId, SinkRecord>,
    streams: Vec<StreamRecord>,
    queue: VecDeque<MediaEvent>,
    readiness: Vec<SinkEvent>,
    fail_loads: u32,
    fail_streams: u32,
}

impl MediaState {
    fn unmuted_allowed(&self, sink: SinkId) -> bool {
        let blessed = self.sinks.get(&sink).is_some_and(|record| record.blessed);
        match self.policy {
            AutoplayPolicy::Permissive => true,
            AutoplayPolicy::MutedOnly => self.activated,
            AutoplayPolicy::GestureBound => self.gesture || blessed,
            AutoplayPolicy::DenyAll => false,
        }
    }

    /// Turns a queued `Playing` for `sink` into an aborted play.
    fn abort_pending_play(&mut self, sink: SinkId) -> bool {
        let pending = self.queue.iter().position(|queued| {
            matches!(queued, MediaEvent::Sink { sink: s, event: SinkEvent::Playing } if *s == sink)
        });
        match pending {
            Some(index) => {
                self.queue[index] = MediaEvent::Sink {
                    sink,
                    event: SinkEvent::PlayRejected(PlayRejection::Aborted),
                };
                true
            }
            None => false,
        }
    }

    fn push_sink(&mut self, sink: SinkId, event: SinkEvent) {
        self.queue.push_back(MediaEvent::Sink { sink, event });
    }

    /// Stops a sink as the runtime would, raising `Paused` or aborting a pending play.
    fn halt(&mut self, sink: SinkId) {
        if self.abort_pending_play(sink) {
            if let Some(record) = self.sinks.get_mut(&sink) {
                record.playing = false;
            }
            return;
        }
        if let Some(record) = self.sinks.get_mut(&sink)
            && record.playing
        {
            record.playing = false;
            self.push_sink(sink, SinkEvent::Paused);
        }
    }
}

/// Shared scripted runtime. Clones share state.
#[derive(Debug, Clone)]
pub struct ScriptedMedia {
    state: Arc<Mutex<MediaState>>,
}

impl Default for ScriptedMedia {
    fn default() -> Self {
        Self::new(AutoplayPolicy::default())
    }
}

impl ScriptedMedia {
    pub fn new(policy: AutoplayPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediaState {
                policy,
                gesture: false,
                activated: false,
                next_sink: 0,
                sinks: HashMap::new(),
                streams: Vec::new(),
                queue: VecDeque::new(),
                readiness: vec![
                    SinkEvent::MetadataLoaded,
                    SinkEvent::DataLoaded,
                    SinkEvent::CanPlay,
                ],
                fail_loads: 0,
                fail_streams: 0,
            })),
        }
    }

    pub fn set_policy(&self, policy: AutoplayPolicy) {
        self.state.lock().policy = policy;
    }

    /// Readiness events a successful progressive load raises, in order.
    pub fn set_readiness(&self, events: Vec<SinkEvent>) {
        self.state.lock().readiness = events;
    }

    /// Creates an unmuted, idle sink.
    pub fn sink(&self) -> ScriptedSink {
        let mut state = self.state.lock();
        state.next_sink += 1;
        let id = SinkId(state.next_sink);
        state.sinks.insert(id, SinkRecord::default());
        ScriptedSink {
            id,
            media: self.clone(),
        }
    }

    pub fn stream_factory(&self) -> Arc<ScriptedStreamFactory> {
        Arc::new(ScriptedStreamFactory {
            media: self.clone(),
        })
    }

    /// Fresh sink plus stream factory, ready to mount a player on.
    pub fn backend(&self) -> (MediaBackend, SinkId) {
        let sink = self.sink();
        let id = sink.id;
        (
            MediaBackend::new(Box::new(sink), self.stream_factory()),
            id,
        )
    }

    /// Runs `action` inside a user gesture.
    pub fn with_gesture<R>(&self, action: impl FnOnce() -> R) -> R {
        {
            let mut state = self.state.lock();
            state.gesture = true;
            state.activated = true;
        }
        let result = action();
        self.state.lock().gesture = false;
        result
    }

    pub fn push_sink_event(&self, sink: SinkId, event: SinkEvent) {
        self.state.lock().push_sink(sink, event);
    }

    pub fn push_stream_event(&self, sink: SinkId, event: StreamEvent) {
        self.state
            .lock()
            .queue
            .push_back(MediaEvent::Stream { sink, event });
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn pop(&self) -> Option<MediaEvent> {
        self.state.lock().queue.pop_front()
    }

    /// Delivers queued events until none are left, including events raised
    /// while delivering. Events for sinks `lookup` does not know are dropped.
    ///
    /// # Panics
    ///
    /// Panics if the queue never drains.
    pub fn settle_with<'a>(
        &self,
        lookup: impl Fn(SinkId) -> Option<&'a PlaybackLifecycleController>,
    ) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.pop() {
            delivered += 1;
            assert!(
                delivered <= MAX_SETTLE_EVENTS,
                "scripted media did not settle after {MAX_SETTLE_EVENTS} events"
            );
            let Some(player) = lookup(event.sink()) else {
                continue;
            };
            match event {
                MediaEvent::Sink { event, .. } => player.handle_sink_event(event),
                MediaEvent::Stream { event, .. } => player.handle_stream_event(event),
            }
        }
        delivered
    }

    pub fn settle(&self, player: &PlaybackLifecycleController) -> usize {
        self.settle_with(|sink| (sink == player.sink_id()).then_some(player))
    }

    pub fn settle_deck(&self, deck: &SlideDeck) -> usize {
        self.settle_with(|sink| {
            deck.iter()
                .map(|(_, player)| player)
                .find(|player| player.sink_id() == sink)
        })
    }

    fn with_sink<R>(&self, sink: SinkId, read: impl FnOnce(&SinkRecord) -> R) -> Option<R> {
        self.state.lock().sinks.get(&sink).map(read)
    }

    pub fn calls(&self, sink: SinkId) -> Vec<SinkCall> {
        self.with_sink(sink, |record| record.calls.clone())
            .unwrap_or_default()
    }

    pub fn play_calls(&self, sink: SinkId) -> usize {
        self.with_sink(sink, |record| {
            record
                .calls
                .iter()
                .filter(|call| **call == SinkCall::Play)
                .count()
        })
        .unwrap_or(0)
    }

    pub fn is_playing(&self, sink: SinkId) -> bool {
        self.with_sink(sink, |record| record.playing && !record.destroyed)
            .unwrap_or(false)
    }

    pub fn is_muted(&self, sink: SinkId) -> bool {
        self.with_sink(sink, |record| record.muted).unwrap_or(true)
    }

    pub fn position(&self, sink: SinkId) -> Duration {
        self.with_sink(sink, |record| record.position)
            .unwrap_or_default()
    }

    pub fn is_destroyed(&self, sink: SinkId) -> bool {
        self.with_sink(sink, |record| record.destroyed)
            .unwrap_or(false)
    }

    /// Sinks currently producing sound.
    pub fn audible_sinks(&self) -> Vec<SinkId> {
        let state = self.state.lock();
        let mut audible: Vec<SinkId> = state
            .sinks
            .iter()
            .filter(|(_, record)| record.playing && !record.muted && !record.destroyed)
            .map(|(id, _)| *id)
            .collect();
        audible.sort();
        audible
    }

    /// Moves the position of every playing sink forward.
    pub fn advance_playback(&self, elapsed: Duration) {
        for record in self.state.lock().sinks.values_mut() {
            if record.playing && !record.destroyed {
                record.position += elapsed;
            }
        }
    }

    /// Fails `sink` with a fatal fault.
    pub fn fail_sink(&self, sink: SinkId, fault: SinkFault) {
        let mut state = self.state.lock();
        if let Some(record) = state.sinks.get_mut(&sink) {
            record.playing = false;
        }
        state.push_sink(sink, SinkEvent::Error(fault));
    }

    /// Plays `sink` to its end.
    pub fn finish(&self, sink: SinkId) {
        let mut state = self.state.lock();
        if let Some(record) = state.sinks.get_mut(&sink) {
            record.playing = false;
        }
        state.push_sink(sink, SinkEvent::Ended);
    }

    /// Pauses `sink` from its native controls, outside the engine.
    pub fn pause_natively(&self, sink: SinkId) {
        self.state.lock().halt(sink);
    }

    /// The next `count` progressive loads fail with a network fault.
    pub fn fail_loads(&self, count: u32) {
        self.state.lock().fail_loads = count;
    }

    /// The next `count` streaming clients fail fatally instead of parsing the manifest.
    pub fn fail_streams(&self, count: u32) {
        self.state.lock().fail_streams = count;
    }

    pub fn streams_created(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Generation of the newest client attached to `sink`.
    pub fn stream_generation(&self, sink: SinkId) -> Option<u64> {
        self.state
            .lock()
            .streams
            .iter()
            .rev()
            .find(|record| record.sink == Some(sink))
            .map(|record| record.generation)
    }

    /// Every call received by clients attached to `sink`, tagged with generation.
    pub fn stream_calls(&self, sink: SinkId) -> Vec<(u64, StreamCall)> {
        self.state
            .lock()
            .streams
            .iter()
            .filter(|record| record.sink == Some(sink))
            .flat_map(|record| {
                record
                    .calls
                    .iter()
                    .map(move |call| (record.generation, call.clone()))
            })
            .collect()
    }
}

/// Sink whose state lives in its [`ScriptedMedia`].
#[derive(Debug)]
pub struct ScriptedSink {
    id: SinkId,
    media: ScriptedMedia,
}

impl ScriptedSink {
    fn record(&self, call: SinkCall) {
        if let Some(record) = self.media.state.lock().sinks.get_mut(&self.id) {
            record.calls.push(call);
        }
    }
}

impl MediaSink for ScriptedSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn present(&mut self, presentation: SinkPresentation) {
        self.record(SinkCall::Present(presentation));
    }

    fn load(&mut self, url: &str) {
        self.record(SinkCall::Load(url.to_string()));
        let mut state = self.media.state.lock();
        state.abort_pending_play(self.id);
        if let Some(record) = state.sinks.get_mut(&self.id) {
            record.playing = false;
            record.position = Duration::ZERO;
        }
        if state.fail_loads > 0 {
            state.fail_loads -= 1;
            state.push_sink(
                self.id,
                SinkEvent::Error(SinkFault::new(
                    SinkFaultKind::Network,
                    "scripted load failure",
                )),
            );
            return;
        }
        for event in state.readiness.clone() {
            state.push_sink(self.id, event);
        }
    }

    fn play(&mut self) {
        self.record(SinkCall::Play);
        let mut state = self.media.state.lock();
        let unmuted_allowed = state.unmuted_allowed(self.id);
        let (gesture, policy) = (state.gesture, state.policy);
        let Some(record) = state.sinks.get_mut(&self.id) else {
            return;
        };
        if record.playing {
            return;
        }

        let allowed = policy != AutoplayPolicy::DenyAll && (record.muted || unmuted_allowed);
        if allowed {
            if gesture && !record.muted {
                record.blessed = true;
            }
            record.playing = true;
            state.push_sink(self.id, SinkEvent::Playing);
        } else {
            state.push_sink(
                self.id,
                SinkEvent::PlayRejected(PlayRejection::AutoplayDenied),
            );
        }
    }

    fn pause(&mut self) {
        self.record(SinkCall::Pause);
        self.media.state.lock().halt(self.id);
    }

    fn seek(&mut self, position: Duration) {
        self.record(SinkCall::Seek(position));
        if let Some(record) = self.media.state.lock().sinks.get_mut(&self.id) {
            record.position = position;
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.record(SinkCall::SetMuted(muted));
        let mut state = self.media.state.lock();
        let unmuted_allowed = state.unmuted_allowed(self.id);
        let gesture = state.gesture;
        let Some(record) = state.sinks.get_mut(&self.id) else {
            return;
        };
        let was_muted = record.muted;
        record.muted = muted;
        if muted {
            return;
        }
        if gesture {
            record.blessed = true;
        }
        // The runtime pauses media that gets unmuted without permission
        if was_muted && record.playing && !unmuted_allowed && !gesture {
            state.halt(self.id);
        }
    }

    fn is_muted(&self) -> bool {
        self.media.is_muted(self.id)
    }
}

impl Drop for ScriptedSink {
    fn drop(&mut self) {
        if let Some(record) = self.media.state.lock().sinks.get_mut(&self.id) {
            record.destroyed = true;
            record.playing = false;
        }
    }
}

/// Factory handing out [`ScriptedStreamClient`]s.
#[derive(Debug)]
pub struct ScriptedStreamFactory {
    media: ScriptedMedia,
}

impl StreamClientFactory for ScriptedStreamFactory {
    fn create(&self, generation: u64) -> Box<dyn StreamClient> {
        let mut state = self.media.state.lock();
        state.streams.push(StreamRecord {
            generation,
            url: None,
            sink: None,
            calls: Vec::new(),
        });
        Box::new(ScriptedStreamClient {
            index: state.streams.len() - 1,
            generation,
            media: self.media.clone(),
        })
    }
}

/// Client that parses its manifest as soon as it is loaded and attached.
#[derive(Debug)]
pub struct ScriptedStreamClient {
    index: usize,
    generation: u64,
    media: ScriptedMedia,
}

impl ScriptedStreamClient {
    fn record(&self, call: StreamCall) {
        if let Some(record) = self.media.state.lock().streams.get_mut(self.index) {
            record.calls.push(call);
        }
    }
}

impl StreamClient for ScriptedStreamClient {
    fn load_source(&mut self, url: &str) {
        self.record(StreamCall::LoadSource(url.to_string()));
        if let Some(record) = self.media.state.lock().streams.get_mut(self.index) {
            record.url = Some(url.to_string());
        }
    }

    fn attach_media(&mut self, sink: SinkId) {
        self.record(StreamCall::AttachMedia(sink));
        let mut state = self.media.state.lock();
        let loaded = match state.streams.get_mut(self.index) {
            Some(record) => {
                record.sink = Some(sink);
                record.url.is_some()
            }
            None => false,
        };
        if !loaded {
            return;
        }

        if state.fail_streams > 0 {
            state.fail_streams -= 1;
            let fault = StreamFault::new(FaultKind::Other, true, "scripted manifest failure");
            state.queue.push_back(MediaEvent::Stream {
                sink,
                event: StreamEvent::fault(self.generation, fault),
            });
            return;
        }
        state.queue.push_back(MediaEvent::Stream {
            sink,
            event: StreamEvent::manifest_parsed(self.generation),
        });
        state.push_sink(sink, SinkEvent::CanPlay);
    }

    fn start_load(&mut self) {
        self.record(StreamCall::StartLoad);
    }

    fn recover_media_error(&mut self) {
        self.record(StreamCall::RecoverMediaError);
    }

    fn destroy(&mut self) {
        self.record(StreamCall::Destroy);
    }
}

/// Observer that keeps every notice it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    notices: Mutex<Vec<PlaybackNotice>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<PlaybackNotice> {
        self.notices.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&PlaybackNotice) -> bool) -> usize {
        self.notices.lock().iter().filter(|notice| matches(notice)).count()
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}

impl PlaybackObserver for RecordingObserver {
    fn on_notice(&self, notice: &PlaybackNotice, _snapshot: &PlayerSnapshot) {
        self.notices.lock().push(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_muted_only_policy() {
        let media = ScriptedMedia::new(AutoplayPolicy::MutedOnly);
        let mut sink = media.sink();
        let id = sink.id();

        sink.play();
        assert_eq!(
            media.pop(),
            Some(MediaEvent::Sink {
                sink: id,
                event: SinkEvent::PlayRejected(PlayRejection::AutoplayDenied)
            })
        );

        sink.set_muted(true);
        sink.play();
        assert!(media.is_playing(id));

        // Unmuting without an interaction pauses the element
        sink.set_muted(false);
        assert!(!media.is_playing(id));

        media.with_gesture(|| ());
        sink.play();
        assert!(media.is_playing(id));
    }

    #[test]
    fn test_gesture_bound_policy_blesses_element() {
        let media = ScriptedMedia::new(AutoplayPolicy::GestureBound);
        let mut sink = media.sink();
        let id = sink.id();

        media.with_gesture(|| sink.set_muted(false));
        sink.play();
        assert!(media.is_playing(id));

        let mut other = media.sink();
        other.play();
        assert!(!media.is_playing(other.id()));
    }

    #[test]
    fn test_pause_aborts_pending_play() {
        let media = ScriptedMedia::new(AutoplayPolicy::Permissive);
        let mut sink = media.sink();
        let id = sink.id();

        sink.play();
        sink.pause();
        assert_eq!(
            media.pop(),
            Some(MediaEvent::Sink {
                sink: id,
                event: SinkEvent::PlayRejected(PlayRejection::Aborted)
            })
        );
        assert_eq!(media.pending(), 0);
    }

    #[test]
    fn test_stream_client_parses_after_attach() {
        let media = ScriptedMedia::default();
        let factory = media.stream_factory();
        let mut client = factory.create(1);
        client.load_source("https://x/a.m3u8");
        client.attach_media(SinkId(9));

        assert_eq!(
            media.pop(),
            Some(MediaEvent::Stream {
                sink: SinkId(9),
                event: StreamEvent::manifest_parsed(1)
            })
        );
        assert_eq!(media.stream_generation(SinkId(9)), Some(1));
    }
}
