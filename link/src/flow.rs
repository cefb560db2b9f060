//! Observe an endpoint's transmit queue to drive upstream admission control.
//!
//! [FlowControl] is attached to a [Queue] after both have been constructed. It watches occupancy
//! and emits a [Signal] whenever the queue crosses one of two thresholds:
//!
//! - empty and non-empty ([Signal::Busy] and [Signal::Idle])
//! - full and not full ([Signal::Stop] and [Signal::Wake])
//!
//! Signals are delivered over an unbounded channel so the observer never blocks the queue. The
//! adapter only observes: it never rejects, delays, or reorders a frame.

use crate::queue::{Event, Observer, Occupancy, Queue};
use futures::channel::mpsc;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Admission-control signal sent upstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The queue went from empty to non-empty.
    Busy,
    /// The queue drained completely.
    Idle,
    /// The queue is full; upstream should stop handing over frames.
    Stop,
    /// Room is available again after a [Signal::Stop].
    Wake,
}

#[derive(Default)]
struct State {
    busy: bool,
    stopped: bool,
}

/// Queue observer that translates occupancy changes into [Signal]s.
pub struct FlowControl {
    state: Mutex<State>,
    sender: mpsc::UnboundedSender<Signal>,
}

impl FlowControl {
    /// Create a detached adapter and the receiver upstream listens on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Signal>) {
        let (sender, receiver) = mpsc::unbounded();
        (
            Arc::new(Self {
                state: Mutex::new(State::default()),
                sender,
            }),
            receiver,
        )
    }

    /// Start observing `queue`.
    ///
    /// The adapter seeds its state from the queue's current occupancy without emitting signals.
    pub fn attach(self: &Arc<Self>, queue: &Queue) {
        {
            let mut state = self.state.lock().unwrap();
            state.busy = !queue.is_empty();
            state.stopped = queue.is_full();
        }
        queue.observe(self.clone());
    }

    /// Returns true if upstream has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }

    /// Returns true if the observed queue holds at least one frame.
    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().busy
    }

    fn emit(&self, signal: Signal) {
        debug!(?signal, "flow control");
        // Upstream may have gone away, which is fine
        let _ = self.sender.unbounded_send(signal);
    }
}

impl Observer for FlowControl {
    fn notify(&self, event: Event, occupancy: Occupancy) {
        let mut signals = Vec::with_capacity(2);
        {
            let mut state = self.state.lock().unwrap();
            match event {
                Event::Enqueued => {
                    if !state.busy {
                        state.busy = true;
                        signals.push(Signal::Busy);
                    }
                    if occupancy.is_full() && !state.stopped {
                        state.stopped = true;
                        signals.push(Signal::Stop);
                    }
                }
                Event::Dequeued => {
                    if state.stopped && !occupancy.is_full() {
                        state.stopped = false;
                        signals.push(Signal::Wake);
                    }
                    if occupancy.is_empty() && state.busy {
                        state.busy = false;
                        signals.push(Signal::Idle);
                    }
                }
                Event::Dropped => {
                    if !state.stopped {
                        state.stopped = true;
                        signals.push(Signal::Stop);
                    }
                }
            }
        }
        for signal in signals {
            self.emit(signal);
        }
    }
}
