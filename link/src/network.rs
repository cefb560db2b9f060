//! Arena that owns every [Link] and [Endpoint].
//!
//! Links and endpoints never hold references to each other: an endpoint remembers the [LinkId]
//! it attached to and a link remembers the [EndpointId]s in its table. The [Network] resolves
//! handles when work crosses from one to the other. A scheduled delivery captures only the
//! receiving endpoint, so no ownership cycle is formed.
//!
//! Handles are never reused and objects are never removed, so a handle stays valid for the
//! lifetime of the network.

use crate::{
    address::Allocator,
    endpoint::{self, Endpoint, Envelope},
    link::Link,
    metrics::Metrics,
    Address, EndpointId, Error, Index, LinkId, Protocol, Scheduler,
};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Configuration for a [Network].
#[derive(Clone)]
pub struct Config {
    /// Registry that link and endpoint metrics are registered with.
    pub registry: Arc<Mutex<Registry>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }
}

/// Owner of all links and endpoints driven by a single [Scheduler].
pub struct Network<S: Scheduler> {
    scheduler: S,
    allocator: Allocator,
    links: RwLock<Vec<Arc<Link>>>,
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
    metrics: Metrics,
}

impl<S: Scheduler> Network<S> {
    /// Create an empty network that schedules deliveries on `scheduler`.
    pub fn new(scheduler: S, cfg: Config) -> Self {
        let metrics = {
            let mut registry = cfg.registry.lock().unwrap();
            Metrics::init(&mut registry)
        };
        Self {
            scheduler,
            allocator: Allocator::default(),
            links: RwLock::new(Vec::new()),
            endpoints: RwLock::new(Vec::new()),
            metrics,
        }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Allocate a fresh unicast address.
    pub fn allocate_address(&self) -> Address {
        self.allocator.allocate()
    }

    /// Create a link with no attached endpoints.
    pub fn create_link(&self) -> LinkId {
        let mut links = self.links.write().unwrap();
        let id = LinkId(links.len() as u32);
        links.push(Arc::new(Link::new(id, self.metrics.clone())));
        debug!(link = %id, "created link");
        id
    }

    /// Create an unattached endpoint.
    pub fn create_endpoint(&self, cfg: endpoint::Config) -> EndpointId {
        let address = cfg.address.unwrap_or_else(|| self.allocator.allocate());
        let mut endpoints = self.endpoints.write().unwrap();
        let id = EndpointId(endpoints.len() as u32);
        let context = cfg.context;
        endpoints.push(Arc::new(Endpoint::new(
            id,
            address,
            cfg,
            self.metrics.clone(),
        )));
        debug!(endpoint = %id, %address, context, "created endpoint");
        id
    }

    pub fn link(&self, id: LinkId) -> Option<Arc<Link>> {
        self.links.read().unwrap().get(id.0 as usize).cloned()
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        self.endpoints.read().unwrap().get(id.0 as usize).cloned()
    }

    /// Number of endpoints created so far.
    pub fn endpoints(&self) -> usize {
        self.endpoints.read().unwrap().len()
    }

    /// Number of links created so far.
    pub fn links(&self) -> usize {
        self.links.read().unwrap().len()
    }

    /// Attach `endpoint` to `link`, returning the index it was assigned.
    pub fn attach(&self, endpoint: EndpointId, link: LinkId) -> Result<Index, Error> {
        let link = self.link(link).ok_or(Error::UnknownLink(link))?;
        let endpoint = self
            .endpoint(endpoint)
            .ok_or(Error::UnknownEndpoint(endpoint))?;
        endpoint.attach(&link)
    }

    /// Detach `endpoint` from the link it is attached to.
    ///
    /// Returns false if the endpoint is unknown, unattached, or already detached.
    pub fn detach(&self, endpoint: EndpointId) -> bool {
        let Some(endpoint) = self.endpoint(endpoint) else {
            return false;
        };
        let Some((link, _)) = endpoint.attachment() else {
            return false;
        };
        let Some(link) = self.link(link) else {
            return false;
        };
        endpoint.detach(&link)
    }

    /// Schedule delivery of a frame to the peer of the endpoint at index `source` on `link`.
    ///
    /// Returns the handle of the endpoint the frame will be delivered to.
    pub fn transmit_start(
        &self,
        link: LinkId,
        envelope: Envelope,
        source: Index,
    ) -> Result<EndpointId, Error> {
        let link = self.link(link).ok_or(Error::UnknownLink(link))?;
        link.transmit_start(&self.scheduler, source, |peer| {
            let peer = self.endpoint(peer).ok_or(Error::UnknownEndpoint(peer))?;
            Ok((peer.context(), Box::new(move || peer.receive(envelope))))
        })
    }

    /// Send `frame` from `endpoint` without specifying a source address.
    pub fn send(
        &self,
        endpoint: EndpointId,
        frame: Bytes,
        dest: Address,
        protocol: Protocol,
    ) -> Result<(), Error> {
        self.send_from(endpoint, frame, Address::UNSPECIFIED, dest, protocol)
    }

    /// Send `frame` from `endpoint` with an explicit source address.
    ///
    /// Returns once delivery to the peer has been scheduled. There is no queueing and no
    /// back-pressure: the frame is accepted unconditionally.
    pub fn send_from(
        &self,
        endpoint: EndpointId,
        frame: Bytes,
        src: Address,
        dest: Address,
        protocol: Protocol,
    ) -> Result<(), Error> {
        let endpoint = self
            .endpoint(endpoint)
            .ok_or(Error::UnknownEndpoint(endpoint))?;
        let (link, _) = endpoint
            .attachment()
            .ok_or(Error::NotAttached(endpoint.id()))?;
        let link = self.link(link).ok_or(Error::UnknownLink(link))?;
        let envelope = Envelope {
            frame,
            src,
            dest,
            protocol,
        };
        endpoint.send_from(&link, &self.scheduler, envelope, |peer| {
            self.endpoint(peer)
        })?;
        Ok(())
    }
}
