//! Configuration management
//!
//! This module handles the node identity (host and ports) and the tuning knobs
//! for pacing, dispatch and mining.

pub mod settings;

pub use settings::{Config, MiningSettings, NetworkSettings, SyncSettings};
