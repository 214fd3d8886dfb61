//! Test utilities for engine and protocol tests

use crate::config::{MiningSettings, SyncSettings};
use crate::core::{Block, ChainEngine};
use crate::error::{BlockchainError, Result};
use crate::network::protocol::Command;
use crate::network::PeerBus;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendKind {
    Broadcast { include_self: bool },
    Any,
    To { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub kind: SendKind,
    pub command: Command,
    pub body: Vec<u8>,
}

/// In-memory `PeerBus` that records every send instead of touching a socket
pub struct RecordingBus {
    addr: String,
    peers: Vec<(String, u16)>,
    sent: Mutex<Vec<Sent>>,
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBus {
    pub fn new() -> RecordingBus {
        RecordingBus {
            addr: "127.0.0.1:4000".to_string(),
            peers: vec![],
            sent: Mutex::new(vec![]),
        }
    }

    pub fn with_peer(mut self, host: &str, port: u16) -> RecordingBus {
        self.peers.push((host.to_string(), port));
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_with(&self, command: Command) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.command == command)
            .collect()
    }

    fn record(&self, kind: SendKind, command: Command, body: &[u8]) {
        self.sent.lock().unwrap().push(Sent {
            kind,
            command,
            body: body.to_vec(),
        });
    }
}

impl PeerBus for RecordingBus {
    fn self_addr(&self) -> String {
        self.addr.clone()
    }

    fn broadcast(&self, command: Command, body: &[u8], include_self: bool) {
        self.record(SendKind::Broadcast { include_self }, command, body);
    }

    fn send_one(&self, command: Command, body: &[u8]) {
        self.record(SendKind::Any, command, body);
    }

    fn send_to(&self, host: &str, p2p_port: u16, command: Command, body: &[u8]) -> Result<()> {
        if !self.peers.iter().any(|(h, p)| h == host && *p == p2p_port) {
            return Err(BlockchainError::PeerNotFound(format!("{host}:{p2p_port}")));
        }
        self.record(
            SendKind::To {
                host: host.to_string(),
                port: p2p_port,
            },
            command,
            body,
        );
        Ok(())
    }
}

/// Mining settings without pacing; `difficulty` "z" never matches
pub fn fast_mining(difficulty: &str) -> MiningSettings {
    MiningSettings {
        difficulty: difficulty.to_string(),
        max_rounds: 3,
        round_interval_ms: 0,
    }
}

pub fn fast_sync() -> SyncSettings {
    SyncSettings {
        request_interval_ms: 0,
        settle_ms: 0,
        max_gap_requests: 8,
        fork_depth: 16,
    }
}

pub fn engine_on(
    bus: RecordingBus,
    mining: MiningSettings,
) -> (Arc<ChainEngine>, Arc<RecordingBus>) {
    let bus = Arc::new(bus);
    let engine = ChainEngine::new(bus.clone(), &mining, &fast_sync());
    (Arc::new(engine), bus)
}

pub fn engine_with(mining: MiningSettings) -> (Arc<ChainEngine>, Arc<RecordingBus>) {
    engine_on(RecordingBus::new(), mining)
}

/// Unmined block directly on top of `parent`
pub fn child_of(parent: &Block, payload: &str, created_at: i64) -> Block {
    Block::new(
        parent.get_height() + 1,
        parent.get_hash().to_string(),
        payload.to_string(),
        created_at,
    )
}

/// Grow the engine's chain by `count` blocks with payloads `b1`, `b2`, ...
pub fn extend(engine: &ChainEngine, count: usize) -> Vec<Block> {
    let mut added = Vec::with_capacity(count);
    for i in 1..=count {
        let block = child_of(&engine.tail(), &format!("b{i}"), i as i64);
        engine.add_block(block.clone());
        added.push(block);
    }
    added
}
