use crate::{EndpointId, LinkId};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Link {
    pub link: u32,
}

impl Link {
    pub fn new(link: LinkId) -> Self {
        Self { link: link.0 }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Endpoint {
    pub endpoint: u32,
}

impl Endpoint {
    pub fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint: endpoint.0,
        }
    }
}

/// Counters shared by every link and endpoint in a network.
#[derive(Clone, Default)]
pub struct Metrics {
    pub transmitted: Family<Link, Counter>,
    pub ordering_violations: Family<Link, Counter>,
    pub received: Family<Endpoint, Counter>,
    pub filtered: Family<Endpoint, Counter>,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "frames_transmitted",
            "frames scheduled for delivery by a link",
            metrics.transmitted.clone(),
        );
        registry.register(
            "ordering_violations",
            "transmits that observed time moving backwards",
            metrics.ordering_violations.clone(),
        );
        registry.register(
            "frames_received",
            "frames delivered to an endpoint",
            metrics.received.clone(),
        );
        registry.register(
            "frames_filtered",
            "frames withheld from an endpoint's protocol sink",
            metrics.filtered.clone(),
        );
        metrics
    }
}
