use crate::config::Config;
use crate::network::Node;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

/// A peer given as `host:api_port:p2p_port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerArg {
    pub host: String,
    pub api_port: u16,
    pub p2p_port: u16,
}

impl PeerArg {
    pub fn into_node(self) -> Node {
        Node::new(&self.host, self.api_port, self.p2p_port)
    }
}

impl FromStr for PeerArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, ':');
        let (Some(p2p), Some(api), Some(host)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!(
                "Invalid peer: {s}. Expected host:api_port:p2p_port"
            ));
        };
        if host.is_empty() {
            return Err(format!("Invalid peer: {s}. Host is empty"));
        }
        Ok(PeerArg {
            host: host.to_string(),
            api_port: parse_port(api)?,
            p2p_port: parse_port(p2p)?,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    s.parse::<u16>()
        .map_err(|e| format!("Invalid port: {s} ({e})"))
}

#[derive(Debug, Parser)]
#[command(name = "mesh-chain", about = "Peer-to-peer proof-of-work ledger node")]
pub struct Opt {
    #[arg(long, help = "Host to bind and advertise")]
    pub host: Option<String>,
    #[arg(long = "api-port", help = "Port advertised to peers for the API")]
    pub api_port: Option<u16>,
    #[arg(long = "p2p-port", help = "UDP port for peer traffic (0 = ephemeral)")]
    pub p2p_port: Option<u16>,
    #[arg(long, help = "Start as the first node of a network")]
    pub first: bool,
    #[arg(long, help = "TOML configuration file")]
    pub config: Option<PathBuf>,
    #[arg(
        long = "peer",
        help = "Peer to join at startup, as host:api_port:p2p_port (repeatable)"
    )]
    pub peers: Vec<PeerArg>,
    #[arg(long, help = "Sync the chain from this height after startup")]
    pub sync: Option<u32>,
}

impl Opt {
    /// Command-line flags win over file and environment
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        if let Some(port) = self.p2p_port {
            config.p2p_port = port;
        }
        if self.first {
            config.first = true;
        }
    }
}

/// One line typed at the node console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Blocks,
    Peers,
    Block(String),
    Mine(String),
    Peer(PeerArg),
    Sync(u32),
    Modify { height: u32, data: String },
    Check,
    Info,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name.to_lowercase().as_str() {
            "blocks" => Ok(ConsoleCommand::Blocks),
            "peers" => Ok(ConsoleCommand::Peers),
            "check" => Ok(ConsoleCommand::Check),
            "info" => Ok(ConsoleCommand::Info),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            "block" => Ok(ConsoleCommand::Block(required(rest, "block <data|index|hash>")?)),
            "mine" => Ok(ConsoleCommand::Mine(required(rest, "mine <data>")?)),
            "sync" => rest
                .parse::<u32>()
                .map(ConsoleCommand::Sync)
                .map_err(|_| "Usage: sync <height>".to_string()),
            "peer" => {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                let [host, api, p2p] = fields[..] else {
                    return Err("Usage: peer <host> <api_port> <p2p_port>".to_string());
                };
                Ok(ConsoleCommand::Peer(PeerArg {
                    host: host.to_string(),
                    api_port: parse_port(api)?,
                    p2p_port: parse_port(p2p)?,
                }))
            }
            "modify" => {
                let usage = || "Usage: modify <height> <data>".to_string();
                let (height, data) = rest.split_once(char::is_whitespace).ok_or_else(usage)?;
                Ok(ConsoleCommand::Modify {
                    height: height.parse().map_err(|_| usage())?,
                    data: data.trim().to_string(),
                })
            }
            "" => Err("Empty command".to_string()),
            _ => Err(format!(
                "Unknown command: {name}. Valid commands: blocks, peers, block, mine, peer, sync, modify, check, info, quit"
            )),
        }
    }
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("Usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}
