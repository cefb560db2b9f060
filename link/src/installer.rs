//! Build a link and attach a pair of endpoints to it.
//!
//! Each installed endpoint gets a freshly allocated address and its own transmit [Queue]. When
//! flow control is enabled (the default), a [crate::flow::FlowControl] adapter is attached to the
//! queue and the receiver for its signals is returned with the installation.
//!
//! # Example
//!
//! ```rust
//! use emtest_link::{
//!     deterministic::Executor,
//!     endpoint,
//!     installer::{self, Installer},
//!     network::{self, Network},
//! };
//!
//! let network = Network::new(Executor::default(), network::Config::default());
//! let installer = Installer::new(installer::Config::default());
//! let (link, installed) = installer
//!     .install(&network, vec![endpoint::Config::new(0), endpoint::Config::new(1)])
//!     .unwrap();
//! assert_eq!(network.link(link).unwrap().count(), 2);
//! assert!(installed.iter().all(|i| i.signals.is_some()));
//! ```

use crate::{
    endpoint::{self, Encapsulation},
    flow::Signal,
    link::CAPACITY,
    network::Network,
    queue::{self, Queue},
    EndpointId, Error, LinkId, Scheduler,
};
use futures::channel::mpsc;
use std::sync::Arc;
use tracing::debug;

/// Configuration applied to every endpoint an [Installer] creates.
#[derive(Clone, Debug)]
pub struct Config {
    /// Configuration of the queue attached to each endpoint.
    pub queue: queue::Config,

    /// Whether to attach a flow control adapter to each queue.
    ///
    /// Disabling flow control means upstream is never told to stop: frames are handed to the
    /// endpoint even when there is no room for them.
    pub flow_control: bool,

    pub encapsulation: Encapsulation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue: queue::Config::default(),
            flow_control: true,
            encapsulation: Encapsulation::default(),
        }
    }
}

/// An endpoint created by an [Installer].
pub struct Installation {
    pub endpoint: EndpointId,
    pub queue: Arc<Queue>,

    /// Admission-control signals (present when flow control is enabled).
    pub signals: Option<mpsc::UnboundedReceiver<Signal>>,
}

/// Creates endpoints and attaches them to a link.
#[derive(Clone, Debug, Default)]
pub struct Installer {
    cfg: Config,
}

impl Installer {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// Do not attach flow control to endpoints installed from now on.
    pub fn disable_flow_control(&mut self) {
        self.cfg.flow_control = false;
    }

    /// Create a new link and install one endpoint per node on it.
    pub fn install<S: Scheduler>(
        &self,
        network: &Network<S>,
        nodes: Vec<endpoint::Config>,
    ) -> Result<(LinkId, Vec<Installation>), Error> {
        let link = network.create_link();
        let installed = self.install_on(network, link, nodes)?;
        Ok((link, installed))
    }

    /// Install one endpoint per node on an existing link.
    ///
    /// Stops at the first node that cannot be attached (endpoints created before it remain
    /// attached). No endpoint is created for a node once the link is full.
    pub fn install_on<S: Scheduler>(
        &self,
        network: &Network<S>,
        link: LinkId,
        nodes: Vec<endpoint::Config>,
    ) -> Result<Vec<Installation>, Error> {
        nodes
            .into_iter()
            .map(|node| self.install_one(network, link, node))
            .collect()
    }

    fn install_one<S: Scheduler>(
        &self,
        network: &Network<S>,
        link: LinkId,
        node: endpoint::Config,
    ) -> Result<Installation, Error> {
        let handle = network.link(link).ok_or(Error::UnknownLink(link))?;
        if handle.count() >= CAPACITY {
            return Err(Error::LinkFull);
        }
        let cfg = endpoint::Config {
            encapsulation: self.cfg.encapsulation,
            ..node
        };
        let id = network.create_endpoint(cfg);
        let endpoint = network.endpoint(id).ok_or(Error::UnknownEndpoint(id))?;
        let queue = Arc::new(Queue::new(self.cfg.queue.clone()));
        endpoint.set_queue(queue.clone());
        network.attach(id, link)?;
        let signals = if self.cfg.flow_control {
            Some(endpoint.enable_flow_control()?)
        } else {
            None
        };
        debug!(
            endpoint = %id,
            %link,
            address = %endpoint.address(),
            flow_control = self.cfg.flow_control,
            "installed"
        );
        Ok(Installation {
            endpoint: id,
            queue,
            signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deterministic::Executor, endpoint::State, mocks, network};
    use bytes::Bytes;
    use commonware_macros::test_traced;

    fn network() -> Network<Executor> {
        Network::new(Executor::default(), network::Config::default())
    }

    #[test_traced]
    fn test_install_pair() {
        let network = network();
        let installer = Installer::default();
        let (link, installed) = installer
            .install(
                &network,
                vec![endpoint::Config::new(10), endpoint::Config::new(11)],
            )
            .unwrap();
        assert_eq!(installed.len(), 2);
        let link = network.link(link).unwrap();
        assert_eq!(link.count(), 2);
        for (index, installation) in installed.iter().enumerate() {
            let endpoint = network.endpoint(installation.endpoint).unwrap();
            assert_eq!(link.device(index as u32), Some(installation.endpoint));
            assert_eq!(
                endpoint.state(),
                State::Active {
                    link: link.id(),
                    index: index as u32
                }
            );
            assert_eq!(endpoint.context(), 10 + index as u32);
            assert!(Arc::ptr_eq(&endpoint.queue().unwrap(), &installation.queue));
            assert!(endpoint.flow_control().is_some());
            assert!(installation.signals.is_some());
        }

        // Addresses are distinct
        let a = network.endpoint(installed[0].endpoint).unwrap().address();
        let b = network.endpoint(installed[1].endpoint).unwrap().address();
        assert_ne!(a, b);
    }

    #[test]
    fn test_install_without_flow_control() {
        let network = network();
        let mut installer = Installer::new(Config {
            encapsulation: Encapsulation::Llc,
            ..Config::default()
        });
        installer.disable_flow_control();
        let (_, installed) = installer
            .install(&network, vec![endpoint::Config::new(0), endpoint::Config::new(1)])
            .unwrap();
        for installation in &installed {
            let endpoint = network.endpoint(installation.endpoint).unwrap();
            assert!(installation.signals.is_none());
            assert!(endpoint.flow_control().is_none());
            assert_eq!(endpoint.encapsulation(), Encapsulation::Llc);
        }
    }

    #[test]
    fn test_install_three_fails() {
        let network = network();
        let installer = Installer::default();
        let result = installer.install(
            &network,
            vec![
                endpoint::Config::new(0),
                endpoint::Config::new(1),
                endpoint::Config::new(2),
            ],
        );
        assert!(matches!(result, Err(Error::LinkFull)));

        // The node that did not fit left nothing behind
        assert_eq!(network.endpoints(), 2);
    }

    #[test]
    fn test_install_on_unknown_link() {
        let network = network();
        let result =
            Installer::default().install_on(&network, LinkId(3), vec![endpoint::Config::new(0)]);
        assert!(matches!(result, Err(Error::UnknownLink(LinkId(3)))));
        assert_eq!(network.endpoints(), 0);
    }

    #[test]
    fn test_install_on_existing_link() {
        let network = network();
        let installer = Installer::default();
        let link = network.create_link();
        installer
            .install_on(&network, link, vec![endpoint::Config::new(0)])
            .unwrap();
        installer
            .install_on(&network, link, vec![endpoint::Config::new(1)])
            .unwrap();
        assert_eq!(network.link(link).unwrap().count(), 2);
        assert!(matches!(
            installer.install_on(&network, link, vec![endpoint::Config::new(2)]),
            Err(Error::LinkFull)
        ));
        assert_eq!(network.endpoints(), 2);
    }

    #[test]
    fn test_installed_pair_exchanges_frames() {
        let executor = Executor::default();
        let network = Network::new(executor.clone(), network::Config::default());
        let (sink, mut received) = mocks::Sink::new();
        let (_, installed) = Installer::default()
            .install(
                &network,
                vec![
                    endpoint::Config::new(0),
                    endpoint::Config {
                        sink: Some(Arc::new(sink)),
                        ..endpoint::Config::new(1)
                    },
                ],
            )
            .unwrap();
        let dest = network.endpoint(installed[1].endpoint).unwrap().address();
        network
            .send(installed[0].endpoint, Bytes::from_static(b"hi"), dest, 9)
            .unwrap();
        executor.run();
        let delivery = received.try_next().unwrap().unwrap();
        assert_eq!(delivery.envelope.protocol, 9);

        // Sending never touches the queue
        assert!(installed[0].queue.is_empty());
    }
}
