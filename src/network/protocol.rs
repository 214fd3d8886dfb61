//! Datagram wire format.
//!
//! Every datagram is `[1 byte command] ++ [body]`. Blocks and peer descriptors
//! travel as JSON records; block requests and modify requests use a 4-byte
//! little-endian height followed by a UTF-8 string.

use crate::error::{BlockchainError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    NewBlock = 1,
    AddPeer = 2,
    /// Reserved; no handler in this node
    DelPeer = 3,
    RequestBlock = 4,
    MiningRequest = 5,
    ModifyData = 6,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = BlockchainError;

    fn try_from(code: u8) -> Result<Command> {
        match code {
            1 => Ok(Command::NewBlock),
            2 => Ok(Command::AddPeer),
            3 => Ok(Command::DelPeer),
            4 => Ok(Command::RequestBlock),
            5 => Ok(Command::MiningRequest),
            6 => Ok(Command::ModifyData),
            other => Err(BlockchainError::Decode(format!(
                "Unknown command code {other}"
            ))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::NewBlock => "NEW_BLOCK",
            Command::AddPeer => "ADD_PEER",
            Command::DelPeer => "DEL_PEER",
            Command::RequestBlock => "REQUEST_BLOCK",
            Command::MiningRequest => "MINING_REQUEST",
            Command::ModifyData => "MODIFY_DATA",
        };
        f.write_str(name)
    }
}

pub fn encode_frame(command: Command, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.push(command.code());
    frame.extend_from_slice(body);
    frame
}

pub fn decode_frame(frame: &[u8]) -> Result<(Command, &[u8])> {
    let (&code, body) = frame
        .split_first()
        .ok_or_else(|| BlockchainError::Decode("Empty datagram".to_string()))?;
    Ok((Command::try_from(code)?, body))
}

fn split_height(body: &[u8]) -> Result<(u32, &[u8])> {
    if body.len() < 4 {
        return Err(BlockchainError::Decode(format!(
            "Body too short for a height: {} bytes",
            body.len()
        )));
    }
    let (head, rest) = body.split_at(4);
    let height = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    Ok((height, rest))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| BlockchainError::Decode(format!("Invalid UTF-8: {e}")))
}

/// `REQUEST_BLOCK` body: the height wanted and where to send it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub height: u32,
    /// `host:port` of the requester's p2p socket
    pub requester: String,
}

impl BlockRequest {
    pub fn new(height: u32, requester: String) -> BlockRequest {
        BlockRequest { height, requester }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = self.height.to_le_bytes().to_vec();
        body.extend_from_slice(self.requester.as_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<BlockRequest> {
        let (height, rest) = split_height(body)?;
        Ok(BlockRequest {
            height,
            requester: utf8(rest)?,
        })
    }

    pub fn requester_endpoint(&self) -> Result<(String, u16)> {
        parse_endpoint(&self.requester)
    }
}

/// `MODIFY_DATA` body: the height to rewrite and the new payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub height: u32,
    pub payload: String,
}

impl ModifyRequest {
    pub fn new(height: u32, payload: String) -> ModifyRequest {
        ModifyRequest { height, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = self.height.to_le_bytes().to_vec();
        body.extend_from_slice(self.payload.as_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<ModifyRequest> {
        let (height, rest) = split_height(body)?;
        Ok(ModifyRequest {
            height,
            payload: utf8(rest)?,
        })
    }
}

/// Split `host:port` on the last colon
pub fn parse_endpoint(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| BlockchainError::Decode(format!("Address without port: {addr}")))?;
    let port = port
        .parse::<u16>()
        .map_err(|e| BlockchainError::Decode(format!("Invalid port in {addr}: {e}")))?;
    Ok((host.to_string(), port))
}
