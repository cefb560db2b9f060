//! Emulate an instantaneous two-party link for deterministic protocol tests.
//!
//! A [link::Link] connects exactly two [endpoint::Endpoint]s. Frames sent by one endpoint are
//! delivered to the other at the current simulated time (zero propagation delay) by posting a
//! callback to an external discrete-event engine (any implementation of [Scheduler]). The
//! delivery runs under the receiving endpoint's [Context], so protocol code observes the same
//! ordering it would observe on a real medium driven by the engine.
//!
//! Links and endpoints are owned by a [network::Network] arena and refer to each other only by
//! stable integer handles ([LinkId] and [EndpointId]).
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use emtest_link::{
//!     deterministic::Executor,
//!     endpoint, mocks,
//!     network::{self, Network},
//! };
//!
//! let executor = Executor::default();
//! let network = Network::new(executor.clone(), network::Config::default());
//! let link = network.create_link();
//!
//! let (sink, mut received) = mocks::Sink::new();
//! let a = network.create_endpoint(endpoint::Config::new(0));
//! let b = network.create_endpoint(endpoint::Config {
//!     sink: Some(Arc::new(sink)),
//!     ..endpoint::Config::new(1)
//! });
//! network.attach(a, link).unwrap();
//! network.attach(b, link).unwrap();
//!
//! let dest = network.endpoint(b).unwrap().address();
//! network.send(a, Bytes::from_static(b"hello"), dest, 9).unwrap();
//! executor.run();
//!
//! let delivery = received.try_next().unwrap().unwrap();
//! assert_eq!(delivery.envelope.frame, Bytes::from_static(b"hello"));
//! ```
//!
//! # Status
//!
//! `emtest-link` is a test double. It does not model delay, bandwidth, bit errors, or more than
//! two attached endpoints.

use std::{
    fmt,
    time::{Duration, SystemTime},
};
use thiserror::Error;

pub mod address;
pub mod deterministic;
pub mod endpoint;
pub mod flow;
pub mod installer;
pub mod link;
mod metrics;
pub mod mocks;
pub mod network;
pub mod queue;

pub use address::Address;

/// Identifier of the engine execution context (typically the simulated node) that owns an
/// endpoint.
pub type Context = u32;

/// Position of an attachment record in a link's table (always `0` or `1`).
pub type Index = u32;

/// Protocol number carried alongside a frame (e.g. an EtherType).
pub type Protocol = u16;

/// A deferred unit of work handed to a [Scheduler].
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Errors that can occur when interacting with a link or endpoint.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("link full: at most two endpoints may attach")]
    LinkFull,
    #[error("endpoint already attached: {0}")]
    AlreadyAttached(EndpointId),
    #[error("endpoint not attached: {0}")]
    NotAttached(EndpointId),
    #[error("transmit requires two attached endpoints (found {0})")]
    InsufficientEndpoints(usize),
    #[error("invalid attachment index: {0}")]
    InvalidIndex(Index),
    #[error("unknown link: {0}")]
    UnknownLink(LinkId),
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),
    #[error("endpoint has no queue: {0}")]
    MissingQueue(EndpointId),
    #[error("scheduler closed")]
    Closed,
}

/// Handle of a [link::Link] owned by a [network::Network].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Handle of an [endpoint::Endpoint] owned by a [network::Network].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Interface to the discrete-event engine that drives simulated time.
///
/// The engine is external to this crate. [deterministic::Executor] is a minimal
/// implementation suitable for tests.
pub trait Scheduler: Clone + Send + Sync + 'static {
    /// Returns the current simulated time.
    fn current(&self) -> SystemTime;

    /// Run `callback` under `context` once `delay` has elapsed.
    ///
    /// This must not block the caller. Callbacks scheduled for the same instant run in the order
    /// they were scheduled. Returns [Error::Closed] if the engine no longer accepts work.
    fn schedule(&self, context: Context, delay: Duration, callback: Callback)
        -> Result<(), Error>;
}
