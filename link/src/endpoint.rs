//! An attachment point on a [Link].
//!
//! An [Endpoint] turns outbound sends into transmit requests on its link and hands inbound frames
//! to the sinks it was configured with:
//!
//! 1. the [Promiscuous] sink (if any) observes every frame, through a shared reference so it
//!    cannot alter what the protocol sink sees
//! 2. the protocol [Sink] (if any) receives frames addressed to this endpoint (unicast,
//!    broadcast, or multicast) whose protocol passes the endpoint's [Filter]
//!
//! # Lifecycle
//!
//! ```txt
//! Unattached --attach--> Active --detach--> Inactive
//! ```
//!
//! Detaching is terminal: an endpoint can never attach again. An inactive endpoint keeps its
//! index, can still send, and still receives frames its peer sends.
//!
//! # Queue and Flow Control
//!
//! A transmit [Queue] built elsewhere may be attached, but the endpoint never inspects or drains
//! it. Without flow control, every send is accepted unconditionally. With flow control enabled,
//! queue observation is delegated entirely to [FlowControl], which never gates a send.

use crate::{
    flow::{FlowControl, Signal},
    link::Link,
    metrics::{self, Metrics},
    queue::Queue,
    Address, Context, EndpointId, Error, Index, LinkId, Protocol, Scheduler,
};
use bytes::Bytes;
use futures::channel::mpsc;
use std::{
    collections::BTreeSet,
    net::{Ipv4Addr, Ipv6Addr},
    sync::{Arc, Mutex},
};
use tracing::trace;

/// Maximum transmission unit of every endpoint.
pub const MTU: u16 = 1500;

/// A frame together with its addressing metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub frame: Bytes,
    pub src: Address,
    pub dest: Address,
    pub protocol: Protocol,
}

/// Classification of a received frame relative to the receiving endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Addressed to the receiving endpoint.
    Host,
    /// Addressed to the broadcast address.
    Broadcast,
    /// Addressed to a multicast group.
    Multicast,
    /// Addressed to some other endpoint.
    OtherHost,
}

impl PacketType {
    fn classify(own: Address, dest: Address) -> Self {
        if dest == own {
            Self::Host
        } else if dest.is_broadcast() {
            Self::Broadcast
        } else if dest.is_group() {
            Self::Multicast
        } else {
            Self::OtherHost
        }
    }
}

/// Framing the upper layer expects (frames themselves are never parsed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encapsulation {
    /// Ethernet II (DIX) framing.
    #[default]
    Dix,
    /// IEEE 802.2 LLC/SNAP framing.
    Llc,
}

/// Protocols delivered to the protocol [Sink].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    /// Deliver every protocol.
    #[default]
    All,
    /// Deliver only the listed protocols.
    Only(BTreeSet<Protocol>),
}

impl Filter {
    pub fn accepts(&self, protocol: Protocol) -> bool {
        match self {
            Self::All => true,
            Self::Only(protocols) => protocols.contains(&protocol),
        }
    }
}

/// Receives frames destined for an endpoint.
pub trait Sink: Send + Sync + 'static {
    fn receive(&self, endpoint: EndpointId, envelope: Envelope, kind: PacketType);
}

/// Observes every frame an endpoint receives.
pub trait Promiscuous: Send + Sync + 'static {
    fn observe(&self, endpoint: EndpointId, envelope: &Envelope, kind: PacketType);
}

/// Configuration for an [Endpoint].
#[derive(Clone)]
pub struct Config {
    /// Engine context that deliveries to this endpoint run under.
    pub context: Context,

    /// Link-layer address (allocated by the network if not provided).
    pub address: Option<Address>,

    /// Receives frames that pass the filter.
    pub sink: Option<Arc<dyn Sink>>,

    /// Observes every received frame.
    pub promiscuous: Option<Arc<dyn Promiscuous>>,

    /// Protocols delivered to `sink`.
    pub filter: Filter,

    pub encapsulation: Encapsulation,
}

impl Config {
    /// Configuration with no sinks, no filter, and an allocated address.
    pub fn new(context: Context) -> Self {
        Self {
            context,
            address: None,
            sink: None,
            promiscuous: None,
            filter: Filter::All,
            encapsulation: Encapsulation::default(),
        }
    }
}

/// Attachment state of an [Endpoint].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Unattached,
    Active { link: LinkId, index: Index },
    Inactive { link: LinkId, index: Index },
}

/// One side of a [Link].
pub struct Endpoint {
    id: EndpointId,
    address: Address,
    context: Context,
    sink: Option<Arc<dyn Sink>>,
    promiscuous: Option<Arc<dyn Promiscuous>>,
    filter: Filter,
    encapsulation: Encapsulation,

    state: Mutex<State>,
    queue: Mutex<Option<Arc<Queue>>>,
    flow_control: Mutex<Option<Arc<FlowControl>>>,

    metrics: Metrics,
}

impl Endpoint {
    pub(crate) fn new(id: EndpointId, address: Address, cfg: Config, metrics: Metrics) -> Self {
        Self {
            id,
            address,
            context: cfg.context,
            sink: cfg.sink,
            promiscuous: cfg.promiscuous,
            filter: cfg.filter,
            encapsulation: cfg.encapsulation,
            state: Mutex::new(State::Unattached),
            queue: Mutex::new(None),
            flow_control: Mutex::new(None),
            metrics,
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub fn encapsulation(&self) -> Encapsulation {
        self.encapsulation
    }

    /// Returns the link and index this endpoint was assigned (whether or not it is still active).
    pub fn attachment(&self) -> Option<(LinkId, Index)> {
        match self.state() {
            State::Unattached => None,
            State::Active { link, index } | State::Inactive { link, index } => Some((link, index)),
        }
    }

    /// Register with `link` and remember the assigned index.
    ///
    /// An endpoint attaches at most once: calling this on an attached (or detached) endpoint
    /// fails with [Error::AlreadyAttached] and leaves both the endpoint and `link` unchanged.
    pub fn attach(&self, link: &Link) -> Result<Index, Error> {
        let mut state = self.state.lock().unwrap();
        if *state != State::Unattached {
            return Err(Error::AlreadyAttached(self.id));
        }
        let index = link.attach(self.id)?;
        *state = State::Active {
            link: link.id(),
            index,
        };
        Ok(index)
    }

    /// Deactivate this endpoint's record on `link`.
    ///
    /// Returns false if the endpoint is not actively attached to `link`.
    pub fn detach(&self, link: &Link) -> bool {
        let mut state = self.state.lock().unwrap();
        let State::Active { link: id, index } = *state else {
            return false;
        };
        if id != link.id() || !link.detach(self.id) {
            return false;
        }
        *state = State::Inactive { link: id, index };
        true
    }

    /// Transmit `envelope` to the peer on `link`.
    ///
    /// `peers` resolves the peer handle returned by the link to the endpoint the delivery is
    /// scheduled on.
    pub(crate) fn send_from<S, P>(
        &self,
        link: &Link,
        scheduler: &S,
        envelope: Envelope,
        peers: P,
    ) -> Result<EndpointId, Error>
    where
        S: Scheduler,
        P: FnOnce(EndpointId) -> Option<Arc<Endpoint>>,
    {
        let Some((_, index)) = self.attachment() else {
            return Err(Error::NotAttached(self.id));
        };
        trace!(
            endpoint = %self.id,
            src = %envelope.src,
            dest = %envelope.dest,
            protocol = envelope.protocol,
            len = envelope.frame.len(),
            "sending"
        );
        link.transmit_start(scheduler, index, move |peer| {
            let peer = peers(peer).ok_or(Error::UnknownEndpoint(peer))?;
            Ok((peer.context(), Box::new(move || peer.receive(envelope))))
        })
    }

    /// Deliver a frame that arrived from the link.
    ///
    /// Invoked by the engine under this endpoint's context.
    pub fn receive(&self, envelope: Envelope) {
        let kind = PacketType::classify(self.address, envelope.dest);
        let label = metrics::Endpoint::new(self.id);
        self.metrics.received.get_or_create(&label).inc();
        trace!(
            endpoint = %self.id,
            src = %envelope.src,
            dest = %envelope.dest,
            protocol = envelope.protocol,
            ?kind,
            "received"
        );

        // Every frame is observed
        if let Some(promiscuous) = &self.promiscuous {
            promiscuous.observe(self.id, &envelope, kind);
        }

        // Only frames for us (that pass the filter) are delivered
        if kind == PacketType::OtherHost || !self.filter.accepts(envelope.protocol) {
            self.metrics.filtered.get_or_create(&label).inc();
            trace!(endpoint = %self.id, protocol = envelope.protocol, ?kind, "filtered");
            return;
        }
        if let Some(sink) = &self.sink {
            sink.receive(self.id, envelope, kind);
        }
    }

    /// Attach a transmit queue constructed elsewhere.
    pub fn set_queue(&self, queue: Arc<Queue>) {
        *self.queue.lock().unwrap() = Some(queue);
    }

    pub fn queue(&self) -> Option<Arc<Queue>> {
        self.queue.lock().unwrap().clone()
    }

    /// Attach a [FlowControl] adapter to this endpoint's queue.
    ///
    /// Returns the receiver upstream admission control listens on. Fails with
    /// [Error::MissingQueue] if no queue has been attached.
    pub fn enable_flow_control(&self) -> Result<mpsc::UnboundedReceiver<Signal>, Error> {
        let queue = self.queue().ok_or(Error::MissingQueue(self.id))?;
        let (flow, signals) = FlowControl::new();
        flow.attach(&queue);
        *self.flow_control.lock().unwrap() = Some(flow);
        Ok(signals)
    }

    pub fn flow_control(&self) -> Option<Arc<FlowControl>> {
        self.flow_control.lock().unwrap().clone()
    }

    /// Returns true if the endpoint is attached and its record is active.
    pub fn is_link_up(&self) -> bool {
        matches!(self.state(), State::Active { .. })
    }

    pub fn broadcast(&self) -> Address {
        Address::BROADCAST
    }

    pub fn is_broadcast(&self) -> bool {
        true
    }

    pub fn is_multicast(&self) -> bool {
        true
    }

    pub fn multicast_v4(&self, group: Ipv4Addr) -> Address {
        Address::multicast_v4(group)
    }

    pub fn multicast_v6(&self, group: Ipv6Addr) -> Address {
        Address::multicast_v6(group)
    }

    pub fn mtu(&self) -> u16 {
        MTU
    }

    /// The MTU is fixed: returns true only if `mtu` equals [MTU].
    pub fn set_mtu(&self, mtu: u16) -> bool {
        mtu == MTU
    }

    pub fn is_point_to_point(&self) -> bool {
        false
    }

    pub fn is_bridge(&self) -> bool {
        false
    }

    pub fn needs_arp(&self) -> bool {
        true
    }

    pub fn supports_send_from(&self) -> bool {
        true
    }
}
