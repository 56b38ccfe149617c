//! Wire codec for membership messages
//!
//! Wire format (integers big-endian):
//! - 1 byte: message type
//! - JoinRequest / JoinReply: 4-byte id, 2-byte port, 8-byte heartbeat
//! - Gossip: 4-byte id, 2-byte port, 8-byte heartbeat, 4-byte entry count
//!   `n`, then `n` records of (4-byte id, 2-byte port, 8-byte heartbeat)

use crate::types::{DigestEntry, Heartbeat, NodeAddress};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const TAG_LEN: usize = 1;
const ADDRESS_LEN: usize = 4 + 2;
const HEARTBEAT_LEN: usize = 8;
const COUNT_LEN: usize = 4;

/// Size of one `(id, port, heartbeat)` record
pub const ENTRY_LEN: usize = ADDRESS_LEN + HEARTBEAT_LEN;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Message type tags
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    JoinRequest = 0,
    JoinReply = 1,
    Gossip = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::JoinRequest),
            1 => Ok(Self::JoinReply),
            2 => Ok(Self::Gossip),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

/// Snapshot of a sender's live view
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GossipDigest {
    pub sender: NodeAddress,
    pub heartbeat: Heartbeat,
    pub entries: Vec<DigestEntry>,
}

impl GossipDigest {
    pub fn new(
        sender: NodeAddress,
        heartbeat: Heartbeat,
        entries: impl IntoIterator<Item = DigestEntry>,
    ) -> Self {
        Self {
            sender,
            heartbeat,
            entries: entries.into_iter().collect(),
        }
    }
}

/// The three message kinds exchanged between nodes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    JoinRequest {
        sender: NodeAddress,
        heartbeat: Heartbeat,
    },
    JoinReply {
        sender: NodeAddress,
        heartbeat: Heartbeat,
    },
    Gossip(GossipDigest),
}

/// A message paired with its destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub to: NodeAddress,
    pub message: WireMessage,
}

impl WireMessage {
    pub fn to(self, to: NodeAddress) -> Outbound {
        Outbound { to, message: self }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinRequest { .. } => MessageType::JoinRequest,
            Self::JoinReply { .. } => MessageType::JoinReply,
            Self::Gossip(_) => MessageType::Gossip,
        }
    }

    pub fn sender(&self) -> NodeAddress {
        match self {
            Self::JoinRequest { sender, .. } | Self::JoinReply { sender, .. } => *sender,
            Self::Gossip(digest) => digest.sender,
        }
    }

    /// Exact number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::JoinRequest { .. } | Self::JoinReply { .. } => {
                TAG_LEN + ADDRESS_LEN + HEARTBEAT_LEN
            }
            Self::Gossip(digest) => {
                TAG_LEN + ADDRESS_LEN + HEARTBEAT_LEN + COUNT_LEN + digest.entries.len() * ENTRY_LEN
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        dst.put_u8(self.message_type() as u8);
        match self {
            Self::JoinRequest { sender, heartbeat } | Self::JoinReply { sender, heartbeat } => {
                put_address(&mut dst, *sender);
                dst.put_u64(*heartbeat);
            }
            Self::Gossip(digest) => {
                put_address(&mut dst, digest.sender);
                dst.put_u64(digest.heartbeat);
                dst.put_u32(digest.entries.len() as u32);
                for entry in &digest.entries {
                    put_address(&mut dst, entry.addr);
                    dst.put_u64(entry.heartbeat);
                }
            }
        }
        dst.freeze()
    }

    /// Decode a complete payload. Lengths are checked before every read and
    /// the payload must be consumed exactly.
    pub fn decode(mut src: &[u8]) -> Result<Self, CodecError> {
        if src.is_empty() {
            return Err(CodecError::Empty);
        }
        let message_type = MessageType::try_from(src.get_u8())?;

        ensure(&src, ADDRESS_LEN + HEARTBEAT_LEN)?;
        let sender = get_address(&mut src);
        let heartbeat = src.get_u64();

        let message = match message_type {
            MessageType::JoinRequest => Self::JoinRequest { sender, heartbeat },
            MessageType::JoinReply => Self::JoinReply { sender, heartbeat },
            MessageType::Gossip => {
                ensure(&src, COUNT_LEN)?;
                let count = src.get_u32() as usize;
                // Check the whole body up front so a bogus count cannot
                // drive a huge allocation
                let needed = count.checked_mul(ENTRY_LEN).unwrap_or(usize::MAX);
                ensure(&src, needed)?;

                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let addr = get_address(&mut src);
                    let heartbeat = src.get_u64();
                    entries.push(DigestEntry { addr, heartbeat });
                }
                Self::Gossip(GossipDigest {
                    sender,
                    heartbeat,
                    entries,
                })
            }
        };

        if src.has_remaining() {
            return Err(CodecError::TrailingBytes(src.remaining()));
        }
        Ok(message)
    }
}

fn ensure(src: &impl Buf, needed: usize) -> Result<(), CodecError> {
    if src.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

fn put_address(dst: &mut BytesMut, addr: NodeAddress) {
    dst.put_u32(addr.id);
    dst.put_u16(addr.port);
}

fn get_address(src: &mut impl Buf) -> NodeAddress {
    let id = src.get_u32();
    let port = src.get_u16();
    NodeAddress { id, port }
}
