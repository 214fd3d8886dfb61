use crate::error::{BlockchainError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{PoisonError, RwLock};

/// Peer descriptor. Only host and ports travel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    host: String,
    api_port: u16,
    p2p_port: u16,
    #[serde(skip)]
    is_self: bool,
    /// Resolved p2p address; `None` until `connect` succeeds
    #[serde(skip)]
    endpoint: Option<SocketAddr>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.p2p_port == other.p2p_port
    }
}

impl Node {
    pub fn new(host: &str, api_port: u16, p2p_port: u16) -> Node {
        Node {
            host: host.to_string(),
            api_port,
            p2p_port,
            is_self: false,
            endpoint: None,
        }
    }

    pub(crate) fn new_self(host: &str, api_port: u16, p2p_port: u16) -> Node {
        Node {
            is_self: true,
            ..Node::new(host, api_port, p2p_port)
        }
    }

    /// Resolve the outbound channel. Failure leaves the node registered but
    /// unreachable.
    pub fn connect(&mut self) {
        let target = self.get_addr();
        match target.to_socket_addrs().map(|mut addrs| addrs.next()) {
            Ok(Some(addr)) => {
                info!("{target} connected.");
                self.endpoint = Some(addr);
            }
            Ok(None) => {
                warn!("Failed to connect {target}: no address");
                self.endpoint = None;
            }
            Err(e) => {
                warn!("Failed to connect {target}: {e}");
                self.endpoint = None;
            }
        }
    }

    pub fn endpoint(&self) -> Result<SocketAddr> {
        self.endpoint
            .ok_or_else(|| BlockchainError::PeerUnreachable(self.get_addr()))
    }

    /// `host:p2p_port`
    pub fn get_addr(&self) -> String {
        format!("{}:{}", self.host, self.p2p_port)
    }

    pub fn get_host(&self) -> &str {
        self.host.as_str()
    }

    pub fn get_api_port(&self) -> u16 {
        self.api_port
    }

    pub fn get_p2p_port(&self) -> u16 {
        self.p2p_port
    }

    pub fn is_self(&self) -> bool {
        self.is_self
    }

    pub(crate) fn clear_self(&mut self) {
        self.is_self = false;
    }
}

/// Known peers in registration order; nodes are never removed
#[derive(Default)]
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    /// Returns false if a node with the same host and p2p port is known
    pub fn add_node(&self, node: Node) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.iter().any(|x| x == &node) {
            return false;
        }
        inner.push(node);
        true
    }

    pub fn search(&self, host: &str, p2p_port: u16) -> Option<Node> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|x| x.host == host && x.p2p_port == p2p_port)
            .cloned()
    }

    pub fn self_node(&self) -> Option<Node> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|x| x.is_self)
            .cloned()
    }

    /// Snapshot, so callers never send while holding the lock
    pub fn get_nodes(&self) -> Vec<Node> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    pub fn node_is_known(&self, host: &str, p2p_port: u16) -> bool {
        self.search(host, p2p_port).is_some()
    }
}
