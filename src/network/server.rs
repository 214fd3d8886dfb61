use crate::config::Config;
use crate::core::{Block, ChainEngine, ChainViolation};
use crate::error::{BlockchainError, Result};
use crate::network::protocol::Command;
use crate::network::{Node, PeerNetwork};
use log::info;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

pub const NODE_VERSION: &str = "mesh-chain 0.1";

/// A running node: the peer network plus the chain engine wired to it.
///
/// The methods here are the node's whole public contract; the console in
/// `main.rs` is one front-end for them.
pub struct Server {
    network: Arc<PeerNetwork>,
    engine: Arc<ChainEngine>,
}

impl Server {
    /// Bind the p2p socket, seed the chain with genesis and install the
    /// protocol handlers. A `first` node may mine right away.
    pub fn start(config: &Config) -> Result<Server> {
        let network = Arc::new(PeerNetwork::bind(
            &config.host,
            config.api_port,
            config.p2p_port,
            &config.network,
        )?);
        let engine = Arc::new(ChainEngine::new(
            network.clone(),
            &config.mining,
            &config.sync,
        ));
        Self::register_handlers(&network, &engine);

        if config.first {
            engine.mark_initialized();
        }
        info!("Node {} started", network.local_addr()?);
        Ok(Server { network, engine })
    }

    // handlers hold weak references so the registry does not keep the node alive
    fn register_handlers(network: &Arc<PeerNetwork>, engine: &Arc<ChainEngine>) {
        let chain = Arc::downgrade(engine);
        network.register_handler(
            Command::NewBlock,
            Arc::new(move |body: &[u8]| upgrade(&chain)?.handle_new_block(body).map(|_| ())),
        );

        let chain = Arc::downgrade(engine);
        network.register_handler(
            Command::RequestBlock,
            Arc::new(move |body: &[u8]| upgrade(&chain)?.handle_request_block(body)),
        );

        let chain = Arc::downgrade(engine);
        network.register_handler(
            Command::MiningRequest,
            Arc::new(move |body: &[u8]| upgrade(&chain)?.handle_mining_request(body)),
        );

        let chain = Arc::downgrade(engine);
        network.register_handler(
            Command::ModifyData,
            Arc::new(move |body: &[u8]| upgrade(&chain)?.handle_modify_data(body).map(|_| ())),
        );

        let peers = Arc::downgrade(network);
        network.register_handler(
            Command::AddPeer,
            Arc::new(move |body: &[u8]| upgrade(&peers)?.handle_add_peer(body)),
        );
    }

    pub fn engine(&self) -> &Arc<ChainEngine> {
        &self.engine
    }

    pub fn network(&self) -> &Arc<PeerNetwork> {
        &self.network
    }

    pub fn info(&self) -> &'static str {
        NODE_VERSION
    }

    /// Chain followed by orphans
    pub fn list_blocks(&self) -> Vec<Block> {
        self.engine.list_blocks()
    }

    pub fn list_peers(&self) -> Vec<Node> {
        self.network.list()
    }

    /// Find a block by payload, index or hash, in that order
    pub fn get_block(&self, id: &str) -> Option<Block> {
        self.engine.find_block(id)
    }

    /// Submit a payload to be mined across the network. Rejected with
    /// `MiningBusy` while a run is in progress.
    pub fn submit_data(&self, data: &str) -> Result<JoinHandle<Result<Block>>> {
        self.engine.mine_and_save(data)
    }

    pub fn add_peer(&self, node: Node) -> Result<()> {
        self.network.add_peer(node)
    }

    /// Request history starting at `height`, then allow mining
    pub fn sync(&self, height: u32) {
        self.engine.sync_chain(height)
    }

    /// Ask every node to rewrite the payload at `height`
    pub fn modify(&self, height: u32, data: &str) {
        self.engine.modify(height, data)
    }

    pub fn check(&self) -> Vec<ChainViolation> {
        self.engine.check()
    }

    pub fn is_mining(&self) -> bool {
        self.engine.is_mining()
    }

    pub fn shutdown(&self) {
        self.network.shutdown();
    }
}

fn upgrade<T>(weak: &Weak<T>) -> Result<Arc<T>> {
    weak.upgrade()
        .ok_or_else(|| BlockchainError::Network("Node is shutting down".to_string()))
}
