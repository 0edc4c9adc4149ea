use device_abi::{DeviceError, TransportError};
use thiserror::Error;

/// Result alias used throughout the client.
pub type LoopbackResult<T> = Result<T, LoopbackError>;

/// Failures that abort a loopback run.
///
/// Verification mismatches are not errors; they are reported through
/// [`Verification`](crate::Verification).
#[derive(Debug, Error)]
pub enum LoopbackError {
    /// The channel could not be opened or was lost mid-run.
    #[error("{0}")]
    Connection(#[source] TransportError),

    /// The remote service rejected a call or answered malformed data.
    #[error(transparent)]
    RemoteOperation(DeviceError),

    /// The client was asked to do something the session protocol forbids.
    #[error("protocol misuse in {op}: {reason}")]
    ProtocolMisuse { op: &'static str, reason: String },

    /// An input array is shorter than the requested element count.
    #[error("{what} holds {len} elements but {required} are required")]
    OutOfRange {
        what: &'static str,
        len: usize,
        required: usize,
    },

    /// LMem regions overlap or overflow the address space.
    #[error("invalid LMem layout: {0}")]
    InvalidLayout(String),

    /// Configuration could not be read or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LoopbackError {
    pub(crate) fn misuse(op: &'static str, reason: impl Into<String>) -> Self {
        LoopbackError::ProtocolMisuse {
            op,
            reason: reason.into(),
        }
    }

    /// True when the channel to the service could not be opened at all.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, LoopbackError::Connection(err) if err.is_connect_failure())
    }
}

impl From<TransportError> for LoopbackError {
    fn from(err: TransportError) -> Self {
        if err.is_connection() {
            LoopbackError::Connection(err)
        } else {
            LoopbackError::RemoteOperation(DeviceError::Transport(err))
        }
    }
}

impl From<DeviceError> for LoopbackError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Transport(err) => err.into(),
            other => LoopbackError::RemoteOperation(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_abi::{FaultKind, RemoteFault};
    use std::io;

    #[test]
    fn lost_connection_maps_to_connection() {
        let err: LoopbackError = DeviceError::Transport(TransportError::Closed).into();
        assert!(matches!(err, LoopbackError::Connection(TransportError::Closed)));
        assert!(!err.is_connect_failure());
    }

    #[test]
    fn refused_connect_is_connect_failure() {
        let err: LoopbackError = TransportError::Connect {
            addr: "localhost:9090".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        }
        .into();
        assert!(err.is_connect_failure());
    }

    #[test]
    fn codec_errors_are_remote_errors() {
        let err: LoopbackError = TransportError::codec("bad archive").into();
        assert!(matches!(err, LoopbackError::RemoteOperation(_)));
    }

    #[test]
    fn remote_fault_message_names_operation() {
        let err: LoopbackError = DeviceError::Remote {
            op: "runAction",
            fault: RemoteFault::new(FaultKind::MissingParam, "parameter 'N' not set"),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "runAction failed: missing parameter: parameter 'N' not set"
        );
    }
}
