// This is my chain engine: the node's replica of the chain and the rules I use to grow it
// Every block that reaches me goes through `add_block`. It either extends the tail,
// swaps the tail for an earlier sibling, parks the block as an orphan and asks peers
// for the gap, or drops it. I keep chain, orphans and the mining flags behind one
// mutex so those transitions never interleave, and I never hold it across a send.

use crate::config::{MiningSettings, SyncSettings};
use crate::core::{Block, BlockId, BlockTree, ProofOfWork};
use crate::error::{BlockchainError, Result};
use crate::network::protocol::{BlockRequest, Command, ModifyRequest};
use crate::network::PeerBus;
use crate::utils::current_timestamp_nanos;
use log::{debug, info, warn};
use serde::Serialize;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What `add_block` did with a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Parent was the tail; appended
    Extended,
    /// Earlier-timestamped sibling of the tail; took its place
    ReplacedTail,
    /// Ahead of the tail with an unknown parent; buffered, the heights in
    /// `missing` are requested
    Orphaned { missing: Range<u32> },
    /// Already in the chain or buffered
    Duplicate,
    /// Behind the tail or not reconcilable with it
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddReport {
    pub outcome: AppendOutcome,
    /// Orphans attached by the re-scan that followed
    pub reattached: usize,
}

/// A broken parent link found by [`ChainEngine::check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainViolation {
    /// Height of the block whose parent link is broken
    pub height: u32,
    /// Hash the predecessor actually has
    pub expected_parent: String,
    /// Parent hash the block carries
    pub found_parent: String,
}

struct ChainState {
    tree: BlockTree,
    /// canonical chain, index == height
    chain: Vec<BlockId>,
    orphans: Vec<BlockId>,
    invalid: Vec<Block>,
    mining: bool,
    initialized: bool,
}

impl ChainState {
    fn new() -> ChainState {
        let mut tree = BlockTree::new();
        let (genesis, _) = tree.insert(Block::genesis());
        ChainState {
            tree,
            chain: vec![genesis],
            orphans: vec![],
            invalid: vec![],
            mining: false,
            initialized: false,
        }
    }

    fn tail_id(&self) -> BlockId {
        // the chain always holds at least genesis
        self.chain[self.chain.len() - 1]
    }

    fn tail(&self) -> &Block {
        self.tree.block(self.tail_id())
    }

    /// Heaviest candidate among the tail and its siblings, by recorded
    /// descendants. Ties keep the tail, then the earlier arrival.
    fn select_tail(&self) -> BlockId {
        let tail = self.tail_id();
        let mut best = tail;
        let mut best_weight = self.tree.descendant_count(tail);
        for sibling in self.tree.siblings(tail) {
            let weight = self.tree.descendant_count(sibling);
            if weight > best_weight {
                best = sibling;
                best_weight = weight;
            }
        }
        best
    }

    fn append(&mut self, block: Block) -> AppendOutcome {
        let (id, _) = self.tree.insert(block);
        if self.chain.contains(&id) || self.orphans.contains(&id) {
            return AppendOutcome::Duplicate;
        }
        self.place(id)
    }

    fn place(&mut self, id: BlockId) -> AppendOutcome {
        let tail = self.tail();
        let block = self.tree.block(id);

        if block.get_parent_hash() == tail.get_hash() {
            self.chain.push(id);
            AppendOutcome::Extended
        } else if block.get_parent_hash() == tail.get_parent_hash() {
            if block.get_created_at() < tail.get_created_at() {
                info!("Purge block {} for earlier sibling {}", tail.get_hash(), block.get_hash());
                let last = self.chain.len() - 1;
                self.chain[last] = id;
                AppendOutcome::ReplacedTail
            } else {
                debug!("Keep tail {} over later sibling {}", tail.get_hash(), block.get_hash());
                AppendOutcome::Discarded
            }
        } else if block.get_height() > tail.get_height() {
            // a range, not a list: the height comes from the wire
            let missing = tail.get_height() + 1..block.get_height();
            debug!(
                "Orphan block {} at height {}, missing {missing:?}",
                block.get_hash(),
                block.get_height()
            );
            self.orphans.push(id);
            AppendOutcome::Orphaned { missing }
        } else {
            info!("Purge block {} at height {}", block.get_hash(), block.get_height());
            AppendOutcome::Discarded
        }
    }

    /// Attach orphans that extend the tail until none does
    fn reattach_orphans(&mut self) -> usize {
        let mut attached = 0;
        loop {
            let tail_hash = self.tail().get_hash().to_string();
            let Some(pos) = self
                .orphans
                .iter()
                .position(|&id| self.tree.block(id).get_parent_hash() == tail_hash)
            else {
                break;
            };
            let id = self.orphans.remove(pos);
            if self.place(id) == AppendOutcome::Extended {
                attached += 1;
            }
        }
        attached
    }

    /// Orphans at or below the tail can no longer attach
    fn prune_orphans(&mut self) {
        let tail_height = self.tail().get_height();
        let tree = &self.tree;
        let before = self.orphans.len();
        self.orphans
            .retain(|&id| tree.block(id).get_height() > tail_height);
        let dropped = before - self.orphans.len();
        if dropped > 0 {
            info!("Dropped {dropped} stale orphan(s) at or below height {tail_height}");
        }
    }

    /// Forget off-chain blocks more than `depth` heights below the tail.
    /// Chain and orphan entries always survive; their ids are remapped.
    fn evict_stale(&mut self, depth: u32) {
        let off_chain = self.tree.len() - self.chain.len() - self.orphans.len();
        if off_chain <= depth as usize {
            return;
        }
        let floor = self.tail().get_height().saturating_sub(depth);
        let mut live = vec![false; self.tree.len()];
        for &id in self.chain.iter().chain(self.orphans.iter()) {
            live[id] = true;
        }

        let before = self.tree.len();
        let remap = self
            .tree
            .retain(|id, block| live[id] || block.get_height() >= floor);
        self.chain = self.chain.iter().filter_map(|&id| remap[id]).collect();
        self.orphans = self.orphans.iter().filter_map(|&id| remap[id]).collect();

        let evicted = before - self.tree.len();
        if evicted > 0 {
            debug!("Evicted {evicted} stale fork block(s) below height {floor}");
        }
    }

    fn check(&mut self) -> Vec<ChainViolation> {
        let mut violations = vec![];
        for pair in self.chain.windows(2) {
            let prev = self.tree.block(pair[0]);
            let block = self.tree.block(pair[1]);
            let expected = prev.calculate_hash();
            if expected != block.get_parent_hash() {
                warn!("Invalid block found at height {}", prev.get_height());
                violations.push(ChainViolation {
                    height: block.get_height(),
                    expected_parent: expected,
                    found_parent: block.get_parent_hash().to_string(),
                });
                if !self.invalid.iter().any(|b| b.get_hash() == prev.get_hash()) {
                    self.invalid.push(prev.clone());
                }
            }
        }
        violations
    }
}

pub struct ChainEngine {
    bus: Arc<dyn PeerBus>,
    state: Mutex<ChainState>,
    pow: ProofOfWork,
    request_interval: Duration,
    settle: Duration,
    max_gap_requests: u32,
    fork_depth: u32,
}

/// Clears the mining flag when the run ends, however it ends
struct MiningGuard<'a> {
    engine: &'a ChainEngine,
}

impl Drop for MiningGuard<'_> {
    fn drop(&mut self) {
        self.engine.lock_state().mining = false;
    }
}

impl ChainEngine {
    /// Engine seeded with the genesis block; mining stays closed until the
    /// chain is synced or marked initialized
    pub fn new(bus: Arc<dyn PeerBus>, mining: &MiningSettings, sync: &SyncSettings) -> ChainEngine {
        ChainEngine {
            bus,
            state: Mutex::new(ChainState::new()),
            pow: ProofOfWork::new(mining),
            request_interval: sync.request_interval(),
            settle: sync.settle(),
            max_gap_requests: sync.max_gap_requests,
            fork_depth: sync.fork_depth,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the append rules under the lock, then request any gap outside it
    pub fn add_block(&self, block: Block) -> AddReport {
        let report = {
            let mut state = self.lock_state();
            let outcome = state.append(block);
            let reattached = match outcome {
                AppendOutcome::Extended | AppendOutcome::ReplacedTail => state.reattach_orphans(),
                _ => 0,
            };
            state.prune_orphans();
            state.evict_stale(self.fork_depth);
            AddReport {
                outcome,
                reattached,
            }
        };

        if report.reattached > 0 {
            info!("Reattached {} orphan block(s)", report.reattached);
        }
        if let AppendOutcome::Orphaned { missing } = &report.outcome {
            self.request_gap(missing.clone());
        }
        report
    }

    // I only ask for the lowest heights of a huge gap; the rest follow once
    // those attach and the next orphan arrives
    fn request_gap(&self, missing: Range<u32>) {
        let total = missing.len();
        let count = total.min(self.max_gap_requests as usize);
        if count < total {
            warn!(
                "Gap of {total} block(s) from height {}, requesting the first {count}",
                missing.start
            );
        }
        for (i, height) in missing.take(count).enumerate() {
            self.request_block(height);
            if i + 1 < count && !self.request_interval.is_zero() {
                thread::sleep(self.request_interval);
            }
        }
    }

    /// Ask any one peer for the block at `height`
    pub fn request_block(&self, height: u32) {
        info!("RequestBlock: {height}");
        let body = BlockRequest::new(height, self.bus.self_addr()).encode();
        self.bus.send_one(Command::RequestBlock, &body);
    }

    /// Build a block on the selected tail and run proof-of-work on it. The
    /// block is returned unattached.
    pub fn mine(&self, payload: &str, primary: bool) -> Result<Block> {
        let (height, parent_hash) = {
            let state = self.lock_state();
            let parent = state.tree.block(state.select_tail());
            (parent.get_height() + 1, parent.get_hash().to_string())
        };

        let mut block = Block::new(
            height,
            parent_hash,
            payload.to_string(),
            current_timestamp_nanos()?,
        );
        info!("Mining block at height {height} for {payload:?}");
        self.pow.run(&mut block, primary)?;
        Ok(block)
    }

    fn begin_mining(&self) -> Result<()> {
        let mut state = self.lock_state();
        if !state.initialized {
            return Err(BlockchainError::NotInitialized);
        }
        if state.mining {
            return Err(BlockchainError::MiningBusy);
        }
        state.mining = true;
        Ok(())
    }

    fn mine_and_broadcast(&self, payload: &str, primary: bool) -> Result<Block> {
        let _guard = MiningGuard { engine: self };
        let block = self.mine(payload, primary)?;
        self.bus
            .broadcast(Command::NewBlock, &block.serialize()?, true);
        Ok(block)
    }

    /// Gate, mine and broadcast on the calling thread
    pub fn mine_block(&self, payload: &str, primary: bool) -> Result<Block> {
        self.begin_mining()?;
        self.mine_and_broadcast(payload, primary)
    }

    /// Run `task` on a miner thread; the mining flag is already set
    fn spawn_miner<T, F>(&self, task: F) -> Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        thread::Builder::new()
            .name("miner".to_string())
            .spawn(task)
            .map_err(|e| {
                self.lock_state().mining = false;
                BlockchainError::Io(format!("Failed to spawn miner: {e}"))
            })
    }

    /// Local submission: ask every peer to mine `payload`, and mine it here
    /// as the primary on a separate thread. Fails immediately when a run is
    /// already in progress or the chain is not synced.
    pub fn mine_and_save(self: &Arc<Self>, payload: &str) -> Result<JoinHandle<Result<Block>>> {
        self.begin_mining()?;
        info!("SaveData: {payload:?}");
        self.bus
            .broadcast(Command::MiningRequest, payload.as_bytes(), false);
        let engine = Arc::clone(self);
        let payload = payload.to_string();
        self.spawn_miner(move || engine.mine_and_broadcast(&payload, true))
    }

    /// `MINING_REQUEST` from a peer: mine as a non-primary in the background
    pub fn handle_mining_request(self: &Arc<Self>, body: &[u8]) -> Result<()> {
        let payload = String::from_utf8(body.to_vec())
            .map_err(|e| BlockchainError::Decode(format!("Invalid mining payload: {e}")))?;
        self.begin_mining()?;
        let engine = Arc::clone(self);
        self.spawn_miner(move || match engine.mine_and_broadcast(&payload, false) {
            Ok(block) => info!("Mined block {} on request", block.get_hash()),
            Err(e) => warn!("Mining request failed: {e}"),
        })?;
        Ok(())
    }

    /// `NEW_BLOCK` from the wire: verify the hash, then append
    pub fn handle_new_block(&self, body: &[u8]) -> Result<AddReport> {
        let block = Block::deserialize(body)?;
        block.verify()?;
        let report = self.add_block(block);
        debug!("New block: {:?}", report.outcome);
        Ok(report)
    }

    /// `REQUEST_BLOCK` from the wire: send our block at that height back to
    /// the requester
    pub fn handle_request_block(&self, body: &[u8]) -> Result<()> {
        let request = BlockRequest::decode(body)?;
        let (host, port) = request.requester_endpoint()?;
        let block = self.block_at(request.height as usize)?;
        self.bus
            .send_to(&host, port, Command::NewBlock, &block.serialize()?)
    }

    /// `MODIFY_DATA` from the wire: overwrite a block's payload in place and
    /// audit the chain. The rewritten block is always self-consistent; only
    /// the link from its child shows the change.
    pub fn handle_modify_data(&self, body: &[u8]) -> Result<Vec<ChainViolation>> {
        let request = ModifyRequest::decode(body)?;
        let mut state = self.lock_state();
        let index = request.height as usize;
        let id = *state
            .chain
            .get(index)
            .ok_or(BlockchainError::IndexOutOfRange {
                index,
                len: state.chain.len(),
            })?;

        let mut block = state.tree.block(id).clone();
        block.rewrite_payload(request.payload);
        block.verify()?;
        info!("ModifyData: height {index} now {}", block.get_hash());
        state.tree.replace(id, block);

        info!("Checking chain...");
        let violations = state.check();
        info!("... Done, {} violation(s)", violations.len());
        Ok(violations)
    }

    /// Ask every node, ourselves included, to rewrite the block at `height`
    pub fn modify(&self, height: u32, payload: &str) {
        info!("Modify: {height} {payload:?}");
        let body = ModifyRequest::new(height, payload.to_string()).encode();
        self.bus.broadcast(Command::ModifyData, &body, true);
    }

    /// Audit every parent link; broken ones are reported and their
    /// predecessor recorded as invalid. The chain is not repaired.
    pub fn check(&self) -> Vec<ChainViolation> {
        self.lock_state().check()
    }

    /// Request the block at `height`, give the answer time to arrive, then
    /// open the chain for mining
    pub fn sync_chain(&self, height: u32) {
        self.request_block(height);
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        self.mark_initialized();
    }

    pub fn mark_initialized(&self) {
        self.lock_state().initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().initialized
    }

    pub fn is_mining(&self) -> bool {
        self.lock_state().mining
    }

    fn block_at(&self, index: usize) -> Result<Block> {
        let state = self.lock_state();
        state
            .chain
            .get(index)
            .map(|&id| state.tree.block(id).clone())
            .ok_or(BlockchainError::IndexOutOfRange {
                index,
                len: state.chain.len(),
            })
    }

    pub fn get_block_by_index(&self, index: usize) -> Option<Block> {
        self.block_at(index).ok()
    }

    pub fn get_block(&self, hash: &str) -> Option<Block> {
        let state = self.lock_state();
        state
            .chain
            .iter()
            .map(|&id| state.tree.block(id))
            .find(|b| b.get_hash() == hash)
            .cloned()
    }

    pub fn get_block_by_data(&self, data: &str) -> Option<Block> {
        let state = self.lock_state();
        state
            .chain
            .iter()
            .map(|&id| state.tree.block(id))
            .find(|b| b.get_payload() == data)
            .cloned()
    }

    /// Look a block up by payload, then by index, then by hash
    pub fn find_block(&self, id: &str) -> Option<Block> {
        self.get_block_by_data(id)
            .or_else(|| {
                id.parse::<usize>()
                    .ok()
                    .and_then(|index| self.get_block_by_index(index))
            })
            .or_else(|| self.get_block(id))
    }

    /// Snapshot of the chain followed by the buffered orphans
    pub fn list_blocks(&self) -> Vec<Block> {
        let state = self.lock_state();
        state
            .chain
            .iter()
            .chain(state.orphans.iter())
            .map(|&id| state.tree.block(id).clone())
            .collect()
    }

    pub fn chain(&self) -> Vec<Block> {
        let state = self.lock_state();
        state
            .chain
            .iter()
            .map(|&id| state.tree.block(id).clone())
            .collect()
    }

    pub fn orphans(&self) -> Vec<Block> {
        let state = self.lock_state();
        state
            .orphans
            .iter()
            .map(|&id| state.tree.block(id).clone())
            .collect()
    }

    pub fn invalid_blocks(&self) -> Vec<Block> {
        self.lock_state().invalid.clone()
    }

    /// Blocks held in the arena: chain, orphans and recent forks
    pub fn known_blocks(&self) -> usize {
        self.lock_state().tree.len()
    }

    pub fn chain_len(&self) -> usize {
        self.lock_state().chain.len()
    }

    pub fn tail(&self) -> Block {
        self.lock_state().tail().clone()
    }

    /// The block the next mined block would extend
    pub fn selected_tail(&self) -> Block {
        let state = self.lock_state();
        state.tree.block(state.select_tail()).clone()
    }
}
