//! A minimal discrete-event engine that runs scheduled callbacks in simulated time.
//!
//! Callbacks are executed in `(time, sequence)` order: earliest time first and, among callbacks
//! scheduled for the same instant, in the order they were scheduled. Time only advances when the
//! next callback is due later than the current time, so the clock is monotonic.
//!
//! The engine is safe to share across threads: any thread may schedule work while another drives
//! it with [Executor::run].
//!
//! # Example
//!
//! ```rust
//! use emtest_link::{deterministic::Executor, Scheduler};
//! use std::{sync::{Arc, atomic::{AtomicBool, Ordering}}, time::Duration};
//!
//! let executor = Executor::default();
//! let fired = Arc::new(AtomicBool::new(false));
//! executor
//!     .schedule(7, Duration::from_millis(5), {
//!         let fired = fired.clone();
//!         Box::new(move || fired.store(true, Ordering::SeqCst))
//!     })
//!     .unwrap();
//! assert_eq!(executor.run(), 1);
//! assert!(fired.load(Ordering::SeqCst));
//! ```

use crate::{Callback, Context, Error, Scheduler};
use std::{
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::trace;

/// Configuration for the `deterministic` engine.
#[derive(Clone, Debug)]
pub struct Config {
    /// Simulated time at which the engine starts.
    pub start: SystemTime,

    /// If more than this many callbacks are executed by a single call to [Executor::run] or
    /// [Executor::run_until], panic (guards against tests that reschedule forever).
    pub max_events: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            start: UNIX_EPOCH,
            max_events: None,
        }
    }
}

struct Event {
    time: SystemTime,
    sequence: u64,
    context: Context,
    callback: Callback,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse the ordering for min-heap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct State {
    max_events: Option<u64>,
    time: Mutex<SystemTime>,
    queue: Mutex<BinaryHeap<Event>>,
    sequence: AtomicU64,
    executed: AtomicU64,
    current: Mutex<Option<Context>>,
    stopped: AtomicBool,
}

/// Deterministic engine that executes callbacks in simulated time.
#[derive(Clone)]
pub struct Executor {
    state: Arc<State>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Executor {
    /// Create a new engine with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            state: Arc::new(State {
                max_events: cfg.max_events,
                time: Mutex::new(cfg.start),
                queue: Mutex::new(BinaryHeap::new()),
                sequence: AtomicU64::new(0),
                executed: AtomicU64::new(0),
                current: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the context of the callback currently executing (if any).
    pub fn context(&self) -> Option<Context> {
        *self.state.current.lock().unwrap()
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        self.state.queue.lock().unwrap().len()
    }

    /// Total number of callbacks executed since creation.
    pub fn executed(&self) -> u64 {
        self.state.executed.load(Ordering::SeqCst)
    }

    /// Stop accepting new callbacks and discard any that are pending.
    ///
    /// Returns the number of callbacks discarded.
    pub fn stop(&self) -> usize {
        let mut queue = self.state.queue.lock().unwrap();
        self.state.stopped.store(true, Ordering::SeqCst);
        let discarded = queue.len();
        queue.clear();
        discarded
    }

    /// Execute the next callback, advancing time if it is due later.
    ///
    /// Returns false if there was nothing to run.
    pub fn step(&self) -> bool {
        self.next(None)
    }

    /// Execute callbacks until none remain. Returns the number executed.
    pub fn run(&self) -> u64 {
        self.drive(None)
    }

    /// Execute callbacks due at or before `deadline`, then advance time to `deadline`.
    ///
    /// Returns the number executed.
    pub fn run_until(&self, deadline: SystemTime) -> u64 {
        let executed = self.drive(Some(deadline));
        let mut time = self.state.time.lock().unwrap();
        if *time < deadline {
            *time = deadline;
        }
        executed
    }

    fn drive(&self, deadline: Option<SystemTime>) -> u64 {
        let mut executed = 0;
        while self.next(deadline) {
            executed += 1;
            if let Some(max) = self.state.max_events {
                if executed > max {
                    panic!("event limit exceeded: {max}");
                }
            }
        }
        executed
    }

    fn next(&self, deadline: Option<SystemTime>) -> bool {
        // Pop the next event without holding the queue lock while it runs (callbacks may
        // schedule more work)
        let event = {
            let mut queue = self.state.queue.lock().unwrap();
            let due = match (queue.peek(), deadline) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(event), Some(deadline)) => event.time <= deadline,
            };
            if !due {
                return false;
            }
            queue.pop().expect("peeked event missing")
        };

        // Advance time
        {
            let mut time = self.state.time.lock().unwrap();
            if event.time > *time {
                *time = event.time;
            }
        }
        trace!(
            context = event.context,
            sequence = event.sequence,
            "executing callback"
        );

        // Run the callback under its context
        let previous = self.state.current.lock().unwrap().replace(event.context);
        (event.callback)();
        *self.state.current.lock().unwrap() = previous;
        self.state.executed.fetch_add(1, Ordering::SeqCst);
        true
    }
}

impl Scheduler for Executor {
    fn current(&self) -> SystemTime {
        *self.state.time.lock().unwrap()
    }

    fn schedule(
        &self,
        context: Context,
        delay: Duration,
        callback: Callback,
    ) -> Result<(), Error> {
        let time = self
            .current()
            .checked_add(delay)
            .expect("overflow when scheduling callback");

        // The stop flag is only set while the queue is locked
        let mut queue = self.state.queue.lock().unwrap();
        if self.state.stopped.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let sequence = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        queue.push(Event {
            time,
            sequence,
            context,
            callback,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;

    fn record(
        executor: &Executor,
        log: &Arc<Mutex<Vec<(u32, Option<Context>, SystemTime)>>>,
        context: Context,
        delay: Duration,
        tag: u32,
    ) {
        let log = log.clone();
        let observer = executor.clone();
        executor
            .schedule(
                context,
                delay,
                Box::new(move || {
                    log.lock()
                        .unwrap()
                        .push((tag, observer.context(), observer.current()));
                }),
            )
            .unwrap();
    }

    #[test_traced]
    fn test_time_order() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&executor, &log, 0, Duration::from_secs(3), 3);
        record(&executor, &log, 0, Duration::from_secs(1), 1);
        record(&executor, &log, 0, Duration::from_secs(2), 2);
        assert_eq!(executor.pending(), 3);
        assert_eq!(executor.run(), 3);

        let log = log.lock().unwrap();
        let tags: Vec<_> = log.iter().map(|(tag, _, _)| *tag).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(log[2].2, UNIX_EPOCH + Duration::from_secs(3));
        assert_eq!(executor.current(), UNIX_EPOCH + Duration::from_secs(3));
    }

    #[test]
    fn test_same_instant_fifo() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..10 {
            record(&executor, &log, tag, Duration::ZERO, tag);
        }
        executor.run();
        let log = log.lock().unwrap();
        let tags: Vec<_> = log.iter().map(|(tag, _, _)| *tag).collect();
        assert_eq!(tags, (0..10).collect::<Vec<_>>());
        assert!(log.iter().all(|(_, _, time)| *time == UNIX_EPOCH));
    }

    #[test]
    fn test_context_set_during_callback() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&executor, &log, 42, Duration::ZERO, 0);
        assert_eq!(executor.context(), None);
        executor.run();
        assert_eq!(log.lock().unwrap()[0].1, Some(42));
        assert_eq!(executor.context(), None);
    }

    #[test]
    fn test_nested_schedule() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        executor
            .schedule(1, Duration::from_millis(10), {
                let executor = executor.clone();
                let log = log.clone();
                Box::new(move || record(&executor, &log, 2, Duration::ZERO, 7))
            })
            .unwrap();
        assert_eq!(executor.run(), 2);
        let log = log.lock().unwrap();
        assert_eq!(
            log[0],
            (7, Some(2), UNIX_EPOCH + Duration::from_millis(10))
        );
    }

    #[test]
    fn test_run_until() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&executor, &log, 0, Duration::from_secs(1), 1);
        record(&executor, &log, 0, Duration::from_secs(5), 5);
        let deadline = UNIX_EPOCH + Duration::from_secs(2);
        assert_eq!(executor.run_until(deadline), 1);
        assert_eq!(executor.current(), deadline);
        assert_eq!(executor.pending(), 1);
        assert_eq!(executor.run(), 1);
        assert_eq!(executor.executed(), 2);
    }

    #[test]
    fn test_stop() {
        let executor = Executor::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&executor, &log, 0, Duration::ZERO, 0);
        assert_eq!(executor.stop(), 1);
        let result = executor.schedule(0, Duration::ZERO, Box::new(|| {}));
        assert_eq!(result, Err(Error::Closed));
        assert_eq!(executor.run(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_races_schedule() {
        let executor = Executor::default();
        std::thread::scope(|s| {
            for context in 0..8 {
                let executor = executor.clone();
                s.spawn(move || {
                    while executor
                        .schedule(context, Duration::ZERO, Box::new(|| {}))
                        .is_ok()
                    {}
                });
            }
            executor.stop();
        });

        // Nothing accepted around the stop survives it
        assert_eq!(executor.pending(), 0);
        assert_eq!(executor.run(), 0);
        assert_eq!(executor.executed(), 0);
    }

    #[test]
    fn test_step() {
        let executor = Executor::default();
        assert!(!executor.step());
        let log = Arc::new(Mutex::new(Vec::new()));
        record(&executor, &log, 0, Duration::ZERO, 0);
        assert!(executor.step());
        assert!(!executor.step());
    }

    #[test]
    #[should_panic(expected = "event limit exceeded")]
    fn test_event_limit() {
        fn reschedule(executor: Executor) {
            let next = executor.clone();
            executor
                .schedule(0, Duration::from_millis(1), Box::new(move || reschedule(next)))
                .unwrap();
        }
        let executor = Executor::new(Config {
            max_events: Some(100),
            ..Config::default()
        });
        reschedule(executor.clone());
        executor.run();
    }

    #[test]
    fn test_event_min_heap() {
        let mut heap = BinaryHeap::new();
        for (sequence, secs) in [(0, 10), (1, 5), (2, 15), (3, 5)] {
            heap.push(Event {
                time: UNIX_EPOCH + Duration::from_secs(secs),
                sequence,
                context: 0,
                callback: Box::new(|| {}),
            });
        }
        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|e| e.sequence)).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }
}
