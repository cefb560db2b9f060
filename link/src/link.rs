//! The shared medium between two endpoints.
//!
//! A [Link] keeps an ordered table of attachment [Record]s. The position of a record in the table
//! is the index handed to the endpoint when it attaches. Records are never removed (detaching only
//! marks a record inactive), so an index stays valid for the lifetime of the link.
//!
//! Because the table never holds more than two records, the peer of the record at index `i` is
//! always at `i ^ 1`.
//!
//! # Concurrency
//!
//! Attach, detach, and transmit are serialized by a single mutex. Transmit holds it across both
//! the peer lookup and the call to [Scheduler::schedule], so concurrent transmits observe a
//! serialized view of the table. Scheduling never blocks (the delivery runs later, from the
//! engine), so the section is short.
//!
//! # Ordering Diagnostic
//!
//! The link remembers the simulated time and calling thread of the last transmit. If a transmit
//! observes a time strictly earlier than the previous one, the engine has been driven
//! inconsistently from multiple threads. This is reported with a warning (and counted) but the
//! frame is delivered as usual.

use crate::{
    metrics::{self, Metrics},
    Callback, Context, EndpointId, Error, Index, LinkId, Scheduler,
};
use std::{
    sync::Mutex,
    thread::{self, ThreadId},
    time::{Duration, SystemTime},
};
use tracing::{debug, trace, warn};

/// Maximum number of endpoints that may attach to a link.
pub const CAPACITY: usize = 2;

/// Bookkeeping entry for an endpoint attached to a [Link].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub endpoint: EndpointId,
    pub active: bool,
}

/// A transmit that observed simulated time moving backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Violation {
    pub previous: SystemTime,
    pub previous_caller: ThreadId,
    pub current: SystemTime,
    pub caller: ThreadId,
}

/// Time and caller of the most recent transmit.
#[derive(Debug, Default)]
struct Order {
    last: Option<(SystemTime, ThreadId)>,
}

impl Order {
    /// Record a transmit at `now` from `caller`, returning a [Violation] if `now` precedes the
    /// previously recorded time.
    fn observe(&mut self, now: SystemTime, caller: ThreadId) -> Option<Violation> {
        let violation = match self.last {
            Some((previous, previous_caller)) if now < previous => Some(Violation {
                previous,
                previous_caller,
                current: now,
                caller,
            }),
            _ => None,
        };
        self.last = Some((now, caller));
        violation
    }
}

#[derive(Debug, Default)]
struct Table {
    records: Vec<Record>,
    order: Order,
}

/// Instantaneous two-party medium.
pub struct Link {
    id: LinkId,
    table: Mutex<Table>,
    metrics: Metrics,
}

impl Link {
    pub(crate) fn new(id: LinkId, metrics: Metrics) -> Self {
        Self {
            id,
            table: Mutex::new(Table::default()),
            metrics,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Append an active record for `endpoint` and return its index.
    ///
    /// Fails with [Error::LinkFull] if two endpoints have already attached (detached records
    /// still count).
    ///
    /// Only reachable through [crate::endpoint::Endpoint::attach], which records the index on
    /// the endpoint.
    pub(crate) fn attach(&self, endpoint: EndpointId) -> Result<Index, Error> {
        let mut table = self.table.lock().unwrap();
        if table.records.len() >= CAPACITY {
            return Err(Error::LinkFull);
        }
        table.records.push(Record {
            endpoint,
            active: true,
        });
        let index = (table.records.len() - 1) as Index;
        debug!(link = %self.id, %endpoint, index, "attached");
        Ok(index)
    }

    /// Mark the active record of `endpoint` as inactive.
    ///
    /// Returns false if `endpoint` has no active record. The record itself is kept so that the
    /// other endpoint's index remains valid.
    ///
    /// Only reachable through [crate::endpoint::Endpoint::detach], so the endpoint's state always
    /// agrees with its record.
    pub(crate) fn detach(&self, endpoint: EndpointId) -> bool {
        let mut table = self.table.lock().unwrap();
        let Some(record) = table
            .records
            .iter_mut()
            .find(|record| record.endpoint == endpoint && record.active)
        else {
            return false;
        };
        record.active = false;
        debug!(link = %self.id, %endpoint, "detached");
        true
    }

    /// Returns the endpoint attached at `index`.
    pub fn device(&self, index: Index) -> Option<EndpointId> {
        self.record(index).map(|record| record.endpoint)
    }

    /// Returns whether the record at `index` is still active.
    pub fn is_active(&self, index: Index) -> Option<bool> {
        self.record(index).map(|record| record.active)
    }

    /// Returns the number of records, including detached ones.
    pub fn count(&self) -> usize {
        self.table.lock().unwrap().records.len()
    }

    /// Returns a copy of the attachment table.
    pub fn records(&self) -> Vec<Record> {
        self.table.lock().unwrap().records.clone()
    }

    fn record(&self, index: Index) -> Option<Record> {
        self.table
            .lock()
            .unwrap()
            .records
            .get(index as usize)
            .copied()
    }

    /// Schedule delivery to the peer of the endpoint at `source`.
    ///
    /// `resolve` is called with the peer's handle and returns the context the delivery must run
    /// under along with the delivery itself. The callback is scheduled with zero delay. Returns
    /// the peer's handle once scheduling succeeds.
    ///
    /// The peer's `active` flag is not consulted: a detached peer still receives.
    pub fn transmit_start<S, R>(
        &self,
        scheduler: &S,
        source: Index,
        resolve: R,
    ) -> Result<EndpointId, Error>
    where
        S: Scheduler,
        R: FnOnce(EndpointId) -> Result<(Context, Callback), Error>,
    {
        let mut table = self.table.lock().unwrap();

        // Check ordering (observability only)
        let now = scheduler.current();
        let caller = thread::current().id();
        if let Some(violation) = table.order.observe(now, caller) {
            warn!(
                link = %self.id,
                previous = ?violation.previous,
                previous_caller = ?violation.previous_caller,
                current = ?violation.current,
                caller = ?violation.caller,
                "transmit observed time moving backwards"
            );
            self.metrics
                .ordering_violations
                .get_or_create(&metrics::Link::new(self.id))
                .inc();
        }

        // Find peer
        if table.records.len() != CAPACITY {
            return Err(Error::InsufficientEndpoints(table.records.len()));
        }
        if source as usize >= CAPACITY {
            return Err(Error::InvalidIndex(source));
        }
        let peer = table.records[(source ^ 1) as usize].endpoint;

        // Schedule delivery
        let (context, callback) = resolve(peer)?;
        scheduler.schedule(context, Duration::ZERO, callback)?;
        drop(table);
        self.metrics
            .transmitted
            .get_or_create(&metrics::Link::new(self.id))
            .inc();
        trace!(link = %self.id, source, %peer, context, "scheduled delivery");
        Ok(peer)
    }
}
