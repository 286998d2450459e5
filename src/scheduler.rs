//! Eviction timer scheduling
//!
//! Entities never touch a clock directly. They schedule their release through
//! a [`Scheduler`], which lets the life engine run on tokio timers in
//! production and on a manually advanced virtual clock in tests and
//! simulations.

use crate::lock::mutex_lock;
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Handle to a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Schedule-after / cancel abstraction used by the life engine
pub trait Scheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerId;

    /// Cancel a pending task. Unknown or already fired ids are ignored.
    fn cancel(&self, id: TimerId);

    /// Time elapsed since the scheduler was created
    fn now(&self) -> Duration;
}

/// Scheduler backed by tokio timers
pub struct TokioScheduler {
    origin: Instant,
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            next_id: AtomicU64::new(0),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        mutex_lock(&self.timers, "tokio_scheduler.pending").len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timers = Arc::clone(&self.timers);

        // Hold the lock across spawn so the task cannot look itself up
        // before its abort handle is registered.
        let mut guard = mutex_lock(&self.timers, "tokio_scheduler.schedule");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A timer that lost the race with cancel() must not run
            if mutex_lock(&timers, "tokio_scheduler.fire")
                .remove(&id)
                .is_none()
            {
                return;
            }
            task.await;
        });
        guard.insert(id, handle.abort_handle());

        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some(handle) = mutex_lock(&self.timers, "tokio_scheduler.cancel").remove(&id) {
            handle.abort();
        }
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

struct ManualTimer {
    deadline: Duration,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<TimerId, ManualTimer>,
}

/// Virtual-clock scheduler; time only moves when [`ManualScheduler::advance`]
/// is awaited.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward, running every task that comes due in
    /// deadline order. Tasks scheduled while advancing also run if they
    /// fall inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = self.now() + by;

        loop {
            let due = {
                let mut state = mutex_lock(&self.state, "manual_scheduler.advance");
                let next = state
                    .timers
                    .iter()
                    .filter(|(_, t)| t.deadline <= target)
                    .min_by_key(|(id, t)| (t.deadline, **id))
                    .map(|(id, _)| *id);

                next.and_then(|id| state.timers.remove(&id)).map(|timer| {
                    state.now = state.now.max(timer.deadline);
                    timer.task
                })
            };

            match due {
                Some(task) => task.await,
                None => break,
            }
        }

        let mut state = mutex_lock(&self.state, "manual_scheduler.advance");
        state.now = state.now.max(target);
        debug!("Virtual clock advanced to {:?}", state.now);
    }

    /// Number of tasks still waiting
    pub fn pending(&self) -> usize {
        mutex_lock(&self.state, "manual_scheduler.pending").timers.len()
    }

    /// Earliest deadline among waiting tasks
    pub fn next_deadline(&self) -> Option<Duration> {
        mutex_lock(&self.state, "manual_scheduler.next_deadline")
            .timers
            .values()
            .map(|t| t.deadline)
            .min()
    }

    /// Deadline of a specific task, if it is still waiting
    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        mutex_lock(&self.state, "manual_scheduler.deadline")
            .timers
            .get(&id)
            .map(|t| t.deadline)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerId {
        let mut state = mutex_lock(&self.state, "manual_scheduler.schedule");
        let id = TimerId(state.next_id);
        state.next_id += 1;
        let deadline = state.now.saturating_add(delay);
        state.timers.insert(id, ManualTimer { deadline, task });
        id
    }

    fn cancel(&self, id: TimerId) {
        mutex_lock(&self.state, "manual_scheduler.cancel")
            .timers
            .remove(&id);
    }

    fn now(&self) -> Duration {
        mutex_lock(&self.state, "manual_scheduler.now").now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn manual_runs_due_tasks_in_order() {
        let scheduler = ManualScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, secs) in [("late", 5), ("early", 2)] {
            let order = Arc::clone(&order);
            scheduler.schedule(
                Duration::from_secs(secs),
                Box::pin(async move { order.lock().unwrap().push(name) }),
            );
        }

        scheduler.advance(Duration::from_secs(3)).await;
        assert_eq!(*order.lock().unwrap(), vec!["early"]);
        assert_eq!(scheduler.now(), Duration::from_secs(3));

        scheduler.advance(Duration::from_secs(2)).await;
        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn manual_cancel_drops_task() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let id = scheduler.schedule(Duration::from_secs(1), counter_task(&counter));
        assert_eq!(scheduler.deadline(id), Some(Duration::from_secs(1)));
        scheduler.cancel(id);
        scheduler.advance(Duration::from_secs(10)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_fires_after_delay() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::from_secs(10), counter_task(&counter));
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_cancel_prevents_firing() {
        let scheduler = TokioScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let id = scheduler.schedule(Duration::from_secs(1), counter_task(&counter));
        scheduler.cancel(id);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }
}
