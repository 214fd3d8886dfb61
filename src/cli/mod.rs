//! Command-line interface
//!
//! Startup flags for a node and the commands accepted on its console.

pub mod commands;

pub use commands::{ConsoleCommand, Opt, PeerArg};
