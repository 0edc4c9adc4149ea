//! Error surface for the transport crate.
//!
//! Everything that can go wrong between "open a socket" and "decode a
//! response" lands here. Callers above the transport only need to know
//! whether the channel itself is gone ([`TransportError::is_connection`]) or
//! whether a frame was malformed.

use std::io;
use thiserror::Error;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

/// Errors surfaced by the framed request/response channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote endpoint could not be reached.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialled, as supplied by the caller.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Reading or writing the stream failed mid-session.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream, or the channel was already closed locally.
    #[error("channel closed")]
    Closed,

    /// A payload could not be serialized or failed validation.
    #[error("codec error: {0}")]
    Codec(String),

    /// A response arrived for a different request than the one outstanding.
    #[error("response sequence {got} does not match request {expected}")]
    Desync {
        /// Sequence number of the outstanding request.
        expected: u64,
        /// Sequence number echoed by the peer.
        got: u64,
    },

    /// A frame header announced a body larger than the channel accepts.
    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge {
        /// Announced body length.
        len: usize,
        /// Maximum accepted body length.
        limit: usize,
    },

    /// The envelope tag or schema version did not match the expected message.
    #[error("unexpected envelope tag {tag:#04x} version {ver} (expected tag {expected:#04x})")]
    UnexpectedEnvelope {
        /// Tag found on the wire.
        tag: u8,
        /// Schema version found on the wire.
        ver: u8,
        /// Tag the reader was waiting for.
        expected: u8,
    },
}

impl TransportError {
    /// Builds a [`TransportError::Codec`] from any displayable message.
    pub fn codec(msg: impl Into<String>) -> Self {
        TransportError::Codec(msg.into())
    }

    /// Returns true when the error means the channel is unusable.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. }
                | TransportError::Io(_)
                | TransportError::Closed
                | TransportError::Desync { .. }
                | TransportError::FrameTooLarge { .. }
        )
    }

    /// Returns true when the channel never opened.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, TransportError::Connect { .. })
    }
}
