//! Timer scheduling for debounce, backoff and retry windows.
//!
//! The engine never blocks; every wait is a task handed to a [`Scheduler`].
//! [`TokioScheduler`] runs tasks on a tokio runtime in wall-clock time,
//! [`ManualScheduler`] runs them on a virtual clock that the host (or a test)
//! advances explicitly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

/// Work run once when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled task for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Errors raised by schedulers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No tokio runtime available on this thread")]
    NoRuntime,

    #[error("Cannot move virtual time backwards: now {now:?}, target {target:?}")]
    TimeReversal { now: Duration, target: Duration },
}

/// Delayed task execution.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once after `delay`, unless cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancels a pending task. Unknown or already-fired handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

/// Wall-clock scheduler backed by tokio timers.
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioScheduler {
    /// Binds to the runtime of the calling thread.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NoRuntime` - Called outside a tokio runtime
    pub fn new() -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self::with_handle(runtime))
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of tasks not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pending = Arc::clone(&self.pending);

        // Hold the map lock across spawn so the task cannot remove itself first
        let mut map = self.pending.lock();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if pending.lock().remove(&handle).is_some() {
                task();
            }
        });
        map.insert(handle, join.abort_handle());
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = self.pending.lock().remove(&handle) {
            trace!("Cancelling timer {}", handle.id());
            abort.abort();
        }
    }
}

/// Virtual time source that only moves when told to.
///
/// Time is measured as elapsed duration since creation, so snapshots are
/// comparable across clocks and printable in reports.
#[derive(Debug, Clone, Default)]
pub struct DeterministicClock {
    elapsed: Duration,
}

impl DeterministicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.elapsed
    }

    /// Moves virtual time to `target`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TimeReversal` - Target is in the past
    pub fn advance_to(&mut self, target: Duration) -> Result<(), SchedulerError> {
        if target < self.elapsed {
            return Err(SchedulerError::TimeReversal {
                now: self.elapsed,
                target,
            });
        }
        self.elapsed = target;
        Ok(())
    }
}

struct ManualState {
    clock: DeterministicClock,
    next_id: u64,
    // Keyed by (deadline, id): deadline order, FIFO among equal deadlines
    queue: BTreeMap<(Duration, u64), TimerTask>,
    deadlines: HashMap<u64, Duration>,
}

/// Scheduler driven by explicit calls to [`advance`](ManualScheduler::advance).
///
/// Tasks run on the caller's thread with the scheduler lock released, so a
/// task may schedule or cancel further timers.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.clock.now())
            .field("pending", &state.queue.len())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                clock: DeterministicClock::new(),
                next_id: 1,
                queue: BTreeMap::new(),
                deadlines: HashMap::new(),
            }),
        }
    }

    pub fn now(&self) -> Duration {
        self.state.lock().clock.now()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.state
            .lock()
            .queue
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Advances virtual time by `duration`, firing every task that comes due.
    ///
    /// Returns the number of tasks fired.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = self.now() + duration;
        // advance_to cannot fail for a target computed from now
        self.advance_to(target).unwrap_or(0)
    }

    /// Moves virtual time to `target`, firing due tasks in deadline order.
    ///
    /// Returns the number of tasks fired.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::TimeReversal` - Target is before the current time
    pub fn advance_to(&self, target: Duration) -> Result<usize, SchedulerError> {
        {
            let state = self.state.lock();
            if target < state.clock.now() {
                return Err(SchedulerError::TimeReversal {
                    now: state.clock.now(),
                    target,
                });
            }
        }

        let mut fired = 0;
        while let Some(task) = self.pop_due(target) {
            task();
            fired += 1;
        }

        self.state.lock().clock.advance_to(target)?;
        Ok(fired)
    }

    /// Fires every task due at the current instant without moving time.
    pub fn run_due(&self) -> usize {
        let now = self.now();
        self.advance_to(now).unwrap_or(0)
    }

    fn pop_due(&self, target: Duration) -> Option<TimerTask> {
        let mut state = self.state.lock();
        let key = *state.queue.keys().next()?;
        if key.0 > target {
            return None;
        }
        let task = state.queue.remove(&key)?;
        state.deadlines.remove(&key.1);
        // Deadlines are monotone, so this never moves backwards
        let _ = state.clock.advance_to(key.0);
        Some(task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.clock.now() + delay;
        state.queue.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        trace!("Scheduled timer {} at {:?}", id, deadline);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&handle.0) {
            state.queue.remove(&(deadline, handle.0));
            trace!("Cancelled timer {}", handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerTask) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |name: &'static str| -> TimerTask {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_deterministic_clock_advancement() {
        let mut clock = DeterministicClock::new();
        clock.advance_to(Duration::from_secs(10)).unwrap();
        clock.advance_to(Duration::from_secs(15)).unwrap();
        assert_eq!(clock.now(), Duration::from_secs(15));
        assert!(clock.advance_to(Duration::from_secs(3)).is_err());
        assert_eq!(clock.now(), Duration::from_secs(15));
    }

    #[test]
    fn test_manual_scheduler_advances_past_a_day() {
        let scheduler = ManualScheduler::new();
        assert_eq!(scheduler.advance(Duration::from_secs(3 * 86_400)), 0);
        assert_eq!(scheduler.now(), Duration::from_secs(3 * 86_400));
    }

    #[test]
    fn test_manual_scheduler_fires_in_deadline_order() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        scheduler.schedule(Duration::from_millis(300), task("late"));
        scheduler.schedule(Duration::from_millis(100), task("early"));
        scheduler.schedule(Duration::from_millis(100), task("early-second"));

        assert_eq!(scheduler.advance(Duration::from_millis(99)), 0);
        assert!(log.lock().is_empty());

        assert_eq!(scheduler.advance(Duration::from_millis(1)), 2);
        assert_eq!(*log.lock(), vec!["early", "early-second"]);

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 1);
        assert_eq!(*log.lock(), vec!["early", "early-second", "late"]);
        assert_eq!(scheduler.now(), Duration::from_millis(1100));
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let scheduler = ManualScheduler::new();
        let (log, task) = recorder();

        let handle = scheduler.schedule(Duration::from_millis(50), task("cancelled"));
        scheduler.schedule(Duration::from_millis(60), task("kept"));
        scheduler.cancel(handle);
        scheduler.cancel(handle);

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(*log.lock(), vec!["kept"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_task_can_schedule_followup() {
        let scheduler = Arc::new(ManualScheduler::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_scheduler = Arc::clone(&scheduler);
        let counter = Arc::clone(&fired);
        scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = Arc::clone(&counter);
                inner_scheduler.schedule(
                    Duration::from_millis(10),
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        scheduler.advance(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn test_manual_scheduler_rejects_time_reversal() {
        let scheduler = ManualScheduler::new();
        scheduler.advance(Duration::from_secs(2));
        assert!(matches!(
            scheduler.advance_to(Duration::from_secs(1)),
            Err(SchedulerError::TimeReversal { .. })
        ));
    }

    #[test]
    fn test_tokio_scheduler_requires_runtime() {
        assert!(matches!(
            TokioScheduler::new(),
            Err(SchedulerError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let scheduler = TokioScheduler::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let handle = scheduler.schedule(
            Duration::from_millis(500),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        scheduler.cancel(handle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }
}
