//! Drop-tail transmit queue that can be attached to an endpoint.
//!
//! The queue is constructed by the installer (or the caller) and handed to an endpoint, but the
//! endpoint never inspects or drains it. Interested parties (such as [crate::flow::FlowControl])
//! register an [Observer] to be told about every change in occupancy.

use bytes::Bytes;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tracing::trace;

/// Configuration for a [Queue].
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of frames held before new frames are dropped.
    pub max_packets: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_packets: 100 }
    }
}

/// A change in queue occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A frame was accepted.
    Enqueued,
    /// A frame was removed from the head of the queue.
    Dequeued,
    /// A frame was rejected because the queue was full.
    Dropped,
}

/// Snapshot of the queue taken right after an [Event].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occupancy {
    pub len: usize,
    pub capacity: usize,
}

impl Occupancy {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }
}

/// Receives notifications about queue activity.
///
/// Observers are invoked synchronously after the queue has been updated and must not call back
/// into the queue.
pub trait Observer: Send + Sync + 'static {
    fn notify(&self, event: Event, occupancy: Occupancy);
}

/// FIFO of frames with a fixed packet capacity.
pub struct Queue {
    capacity: usize,
    frames: Mutex<VecDeque<Bytes>>,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
}

impl Queue {
    /// Create an empty queue.
    pub fn new(cfg: Config) -> Self {
        Self {
            capacity: cfg.max_packets,
            frames: Mutex::new(VecDeque::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for all subsequent events.
    pub fn observe(&self, observer: Arc<dyn Observer>) {
        self.observers.lock().unwrap().push(observer);
    }

    /// Add a frame to the tail of the queue.
    ///
    /// Returns false (and drops the frame) if the queue is full.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        let (event, len) = {
            let mut frames = self.frames.lock().unwrap();
            if frames.len() >= self.capacity {
                (Event::Dropped, frames.len())
            } else {
                frames.push_back(frame);
                (Event::Enqueued, frames.len())
            }
        };
        self.notify(event, len);
        event == Event::Enqueued
    }

    /// Remove the frame at the head of the queue.
    pub fn dequeue(&self) -> Option<Bytes> {
        let (frame, len) = {
            let mut frames = self.frames.lock().unwrap();
            let frame = frames.pop_front()?;
            (frame, frames.len())
        };
        self.notify(Event::Dequeued, len);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn notify(&self, event: Event, len: usize) {
        let occupancy = Occupancy {
            len,
            capacity: self.capacity,
        };
        trace!(?event, len, capacity = self.capacity, "queue event");
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            observer.notify(event, occupancy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Mutex<Vec<(Event, usize)>>);

    impl Observer for Log {
        fn notify(&self, event: Event, occupancy: Occupancy) {
            self.0.lock().unwrap().push((event, occupancy.len));
        }
    }

    #[test]
    fn test_fifo() {
        let queue = Queue::new(Config::default());
        assert!(queue.is_empty());
        assert!(queue.enqueue(Bytes::from_static(b"a")));
        assert!(queue.enqueue(Bytes::from_static(b"b")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(Bytes::from_static(b"a")));
        assert_eq!(queue.dequeue(), Some(Bytes::from_static(b"b")));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_drop_tail() {
        let queue = Queue::new(Config { max_packets: 2 });
        assert_eq!(queue.capacity(), 2);
        assert!(queue.enqueue(Bytes::from_static(b"a")));
        assert!(queue.enqueue(Bytes::from_static(b"b")));
        assert!(queue.is_full());
        assert!(!queue.enqueue(Bytes::from_static(b"c")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(Bytes::from_static(b"a")));
    }

    #[test]
    fn test_observer() {
        let queue = Queue::new(Config { max_packets: 1 });
        let log = Arc::new(Log::default());
        queue.observe(log.clone());
        queue.enqueue(Bytes::from_static(b"a"));
        queue.enqueue(Bytes::from_static(b"b"));
        queue.dequeue();
        queue.dequeue();
        assert_eq!(
            *log.0.lock().unwrap(),
            vec![(Event::Enqueued, 1), (Event::Dropped, 1), (Event::Dequeued, 0)]
        );
    }
}
