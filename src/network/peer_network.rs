use crate::config::NetworkSettings;
use crate::error::{BlockchainError, Result};
use crate::network::dispatch::{Datagram, Handler, HandlerRegistry, WorkerPool};
use crate::network::protocol::{encode_frame, Command};
use crate::network::{Node, Nodes};
use crate::utils::{deserialize, serialize};
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What the chain engine needs from the peer layer
pub trait PeerBus: Send + Sync {
    /// `host:port` of our own p2p socket, as peers know it
    fn self_addr(&self) -> String;

    /// Send to every known peer, skipping ourselves unless `include_self`
    fn broadcast(&self, command: Command, body: &[u8], include_self: bool);

    /// Send to the first peer that accepts the write
    fn send_one(&self, command: Command, body: &[u8]);

    /// Send to the peer registered under `host:p2p_port`
    fn send_to(&self, host: &str, p2p_port: u16, command: Command, body: &[u8]) -> Result<()>;
}

/// The node's view of the peer-to-peer network.
///
/// Owns the single UDP socket used for sending and receiving. A receive loop
/// thread reads datagrams and queues them for the handler workers.
pub struct PeerNetwork {
    socket: Arc<UdpSocket>,
    nodes: Nodes,
    registry: Arc<HandlerRegistry>,
    send_interval: Duration,
    shutdown: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl PeerNetwork {
    /// Open the socket on `(host, p2p_port)`, register the self node and
    /// start receiving. Bind failure is the only fatal network error.
    pub fn bind(
        host: &str,
        api_port: u16,
        p2p_port: u16,
        settings: &NetworkSettings,
    ) -> Result<PeerNetwork> {
        let socket = UdpSocket::bind((host, p2p_port)).map_err(|e| {
            BlockchainError::Network(format!("Failed to bind to {host}:{p2p_port}: {e}"))
        })?;
        socket.set_read_timeout(Some(settings.read_timeout()))?;
        let bound_port = socket.local_addr()?.port();
        info!("Start p2p server {host}:{bound_port}");

        let mut me = Node::new_self(host, api_port, bound_port);
        me.connect();
        let nodes = Nodes::new();
        nodes.add_node(me);

        let socket = Arc::new(socket);
        let registry = Arc::new(HandlerRegistry::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new(
            settings.workers,
            settings.queue_capacity,
            Arc::clone(&registry),
        );

        let receiver = {
            let socket = Arc::clone(&socket);
            let shutdown = Arc::clone(&shutdown);
            let max_datagram_size = settings.max_datagram_size;
            thread::spawn(move || Self::receive_loop(socket, pool, shutdown, max_datagram_size))
        };

        Ok(PeerNetwork {
            socket,
            nodes,
            registry,
            send_interval: settings.send_interval(),
            shutdown,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn receive_loop(
        socket: Arc<UdpSocket>,
        pool: WorkerPool,
        shutdown: Arc<AtomicBool>,
        max_datagram_size: usize,
    ) {
        let mut buf = vec![0u8; max_datagram_size.max(1)];
        while !shutdown.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((0, from)) => debug!("Empty datagram from {from}"),
                Ok((n, from)) => {
                    pool.submit(Datagram {
                        from,
                        frame: buf[..n].to_vec(),
                    });
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => warn!("Receive error: {e}"),
            }
        }
        info!("p2p server stopped");
    }

    /// Install a handler for `command`, returning the previous one
    pub fn register_handler(&self, command: Command, handler: Handler) -> Option<Handler> {
        self.registry.register(command, handler)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn search(&self, host: &str, p2p_port: u16) -> Option<Node> {
        self.nodes.search(host, p2p_port)
    }

    pub fn list(&self) -> Vec<Node> {
        self.nodes.get_nodes()
    }

    fn send_frame(&self, node: &Node, frame: &[u8]) -> Result<()> {
        let addr = node.endpoint()?;
        debug!("Send to {} : {} bytes", node.get_addr(), frame.len());
        self.socket.send_to(frame, addr).map_err(|e| {
            BlockchainError::PeerUnreachable(format!("{}: {e}", node.get_addr()))
        })?;
        Ok(())
    }

    fn pace(&self) {
        if !self.send_interval.is_zero() {
            thread::sleep(self.send_interval);
        }
    }

    /// Join a peer: announce it to everyone we know, then tell it about every
    /// node we know one at a time, then remember it. A failed send is logged
    /// and the rest continue.
    pub fn add_peer(&self, mut node: Node) -> Result<()> {
        if self.nodes.node_is_known(node.get_host(), node.get_p2p_port()) {
            info!("Peer {} already known", node.get_addr());
            return Ok(());
        }
        info!("Add peer {}", node.get_addr());

        node.clear_self();
        self.broadcast(Command::AddPeer, &serialize(&node)?, false);
        node.connect();

        let known = self.nodes.get_nodes();
        for (i, peer) in known.iter().enumerate() {
            let frame = encode_frame(Command::AddPeer, &serialize(peer)?);
            if let Err(e) = self.send_frame(&node, &frame) {
                warn!("Failed to introduce {} to {}: {e}", peer.get_addr(), node.get_addr());
            }
            if i + 1 < known.len() {
                self.pace();
            }
        }

        self.nodes.add_node(node);
        Ok(())
    }

    /// `ADD_PEER` from the wire: remember the announced node
    pub fn handle_add_peer(&self, body: &[u8]) -> Result<()> {
        let mut node: Node = deserialize(body)?;
        node.clear_self();
        if self.nodes.node_is_known(node.get_host(), node.get_p2p_port()) {
            debug!("Peer {} already known", node.get_addr());
            return Ok(());
        }
        node.connect();
        info!("Peer {} joined", node.get_addr());
        self.nodes.add_node(node);
        Ok(())
    }

    /// Stop the receive loop and wait for queued handlers to finish
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("p2p server thread panicked");
            }
        }
    }
}

impl PeerBus for PeerNetwork {
    fn self_addr(&self) -> String {
        self.nodes
            .self_node()
            .map(|node| node.get_addr())
            .unwrap_or_default()
    }

    fn broadcast(&self, command: Command, body: &[u8], include_self: bool) {
        debug!("Broadcast {command}: {} bytes", body.len());
        let frame = encode_frame(command, body);
        let targets: Vec<Node> = self
            .nodes
            .get_nodes()
            .into_iter()
            .filter(|node| include_self || !node.is_self())
            .collect();

        for (i, node) in targets.iter().enumerate() {
            if let Err(e) = self.send_frame(node, &frame) {
                warn!("Send error to {}: {e}", node.get_addr());
            }
            if i + 1 < targets.len() {
                self.pace();
            }
        }
    }

    fn send_one(&self, command: Command, body: &[u8]) {
        debug!("SendOne {command}: {} bytes", body.len());
        let frame = encode_frame(command, body);
        for node in self.nodes.get_nodes().iter().filter(|node| !node.is_self()) {
            match self.send_frame(node, &frame) {
                Ok(()) => return,
                Err(e) => {
                    warn!("Send error to {}: {e}", node.get_addr());
                    self.pace();
                }
            }
        }
        warn!("No peer accepted {command}");
    }

    fn send_to(&self, host: &str, p2p_port: u16, command: Command, body: &[u8]) -> Result<()> {
        let node = self
            .search(host, p2p_port)
            .ok_or_else(|| BlockchainError::PeerNotFound(format!("{host}:{p2p_port}")))?;
        self.send_frame(&node, &encode_frame(command, body))
    }
}

impl Drop for PeerNetwork {
    fn drop(&mut self) {
        // no join here: the last reference may be dropped on a worker thread
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
