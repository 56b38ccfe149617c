//! Error types for the membership core

use crate::codec::CodecError;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Membership protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Payload failed to decode
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport refused a send
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Join handshake never completed; the node cannot enter service
    #[error("join failed after {attempts} attempts")]
    JoinFailed { attempts: u32 },

    /// Protocol parameters are inconsistent
    #[error("invalid protocol parameters: {0}")]
    InvalidParams(String),

    /// `on_tick` called before `start`
    #[error("node not started")]
    NotStarted,
}
