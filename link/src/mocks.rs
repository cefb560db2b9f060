//! Test doubles for sinks and the scheduling engine.

use crate::{
    endpoint::{Envelope, PacketType},
    Callback, Context, EndpointId, Error,
};
use futures::channel::mpsc;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A frame handed to a mock sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received {
    pub endpoint: EndpointId,
    pub envelope: Envelope,
    pub kind: PacketType,
}

/// A mock [crate::endpoint::Sink] that forwards every delivery to a channel.
#[derive(Clone)]
pub struct Sink {
    sender: mpsc::UnboundedSender<Received>,
}

impl Sink {
    /// Create a new [Sink] and the receiver its deliveries are forwarded to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Received>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl crate::endpoint::Sink for Sink {
    fn receive(&self, endpoint: EndpointId, envelope: Envelope, kind: PacketType) {
        let _ = self.sender.unbounded_send(Received {
            endpoint,
            envelope,
            kind,
        });
    }
}

/// A mock [crate::endpoint::Promiscuous] sink that forwards a copy of every observed frame to a
/// channel.
#[derive(Clone)]
pub struct Sniffer {
    sender: mpsc::UnboundedSender<Received>,
}

impl Sniffer {
    /// Create a new [Sniffer] and the receiver its observations are forwarded to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Received>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl crate::endpoint::Promiscuous for Sniffer {
    fn observe(&self, endpoint: EndpointId, envelope: &Envelope, kind: PacketType) {
        let _ = self.sender.unbounded_send(Received {
            endpoint,
            envelope: envelope.clone(),
            kind,
        });
    }
}

struct Entry {
    context: Context,
    delay: Duration,
    callback: Option<Callback>,
}

#[derive(Default)]
struct State {
    time: Option<SystemTime>,
    entries: Vec<Entry>,
    closed: bool,
}

/// A mock [crate::Scheduler] whose clock is set by hand and whose callbacks only run when
/// [Scheduler::run_pending] is called.
///
/// Unlike [crate::deterministic::Executor], time may be moved backwards, which makes it possible
/// to exercise the ordering diagnostic of [crate::link::Link].
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<State>>,
}

impl Scheduler {
    /// Set the time returned by [crate::Scheduler::current].
    pub fn set_time(&self, time: SystemTime) {
        self.state.lock().unwrap().time = Some(time);
    }

    /// Reject all subsequent calls to [crate::Scheduler::schedule].
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    /// Number of callbacks scheduled but not yet run.
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|entry| entry.callback.is_some())
            .count()
    }

    /// Context and delay of every callback ever scheduled, in order.
    pub fn scheduled(&self) -> Vec<(Context, Duration)> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|entry| (entry.context, entry.delay))
            .collect()
    }

    /// Run every pending callback in the order it was scheduled (ignoring delay).
    ///
    /// Returns the number of callbacks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let callback = {
                let mut state = self.state.lock().unwrap();
                state
                    .entries
                    .iter_mut()
                    .find_map(|entry| entry.callback.take())
            };
            let Some(callback) = callback else {
                return ran;
            };
            callback();
            ran += 1;
        }
    }
}

impl crate::Scheduler for Scheduler {
    fn current(&self) -> SystemTime {
        self.state.lock().unwrap().time.unwrap_or(UNIX_EPOCH)
    }

    fn schedule(&self, context: Context, delay: Duration, callback: Callback) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::Closed);
        }
        state.entries.push(Entry {
            context,
            delay,
            callback: Some(callback),
        });
        Ok(())
    }
}
