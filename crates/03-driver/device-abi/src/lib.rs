//! Device ABI types shared between the orchestration client and device services.
//!
//! This crate defines the protocol boundary between the client (layer 05) and
//! service implementations (layer 04): typed remote handles, the command and
//! report enums, remote faults, and the blocking [`DeviceService`] trait.

use std::fmt;
use thiserror::Error;

// Re-export the transport error so services do not need a direct dependency.
pub use transport::TransportError;

/// Untyped remote handle, as the service sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteHandle(u64);

impl RemoteHandle {
    /// Wraps a raw wire value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw wire value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(RemoteHandle);

        impl $name {
            /// Wraps a raw wire value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(RemoteHandle::from_raw(raw))
            }

            /// Returns the raw wire value.
            pub const fn raw(self) -> u64 {
                self.0.raw()
            }
        }

        impl From<RemoteHandle> for $name {
            fn from(handle: RemoteHandle) -> Self {
                Self(handle)
            }
        }

        impl From<$name> for RemoteHandle {
            fn from(handle: $name) -> Self {
                handle.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

typed_handle!(
    /// Loaded hardware configuration ("maxfile").
    ConfigHandle
);
typed_handle!(
    /// Engine instance running a configuration.
    EngineHandle
);
typed_handle!(
    /// Device-side buffer of 32-bit integers.
    BufferHandle
);
typed_handle!(
    /// Action under construction on the service.
    ActionHandle
);

/// Direction of an action stream binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamDirection {
    /// The buffer feeds data into the action.
    Input,
    /// The buffer receives data produced by the action.
    Output,
}

/// Command directed at a device service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCmd {
    /// Initialise the named configuration.
    InitConfiguration {
        /// Configuration name, e.g. `LMemLoopback`.
        name: String,
    },
    /// Load an engine bound to a configuration.
    LoadEngine {
        config: ConfigHandle,
        /// `"*"` selects any available engine.
        selector: String,
    },
    /// Allocate a buffer of `elements` 32-bit integers.
    AllocateBuffer { elements: u64 },
    /// Write host data into a buffer.
    SendData { buffer: BufferHandle, data: Vec<i32> },
    /// Read `count` elements back from a buffer.
    ReceiveData { buffer: BufferHandle, count: u64 },
    /// Create an action for a named operation of the configuration.
    NewAction {
        config: ConfigHandle,
        operation: String,
    },
    /// Set a scalar parameter on an action.
    SetActionParam {
        action: ActionHandle,
        name: String,
        value: u64,
    },
    /// Bind a buffer to a named stream of an action.
    BindStream {
        action: ActionHandle,
        direction: StreamDirection,
        stream: String,
        buffer: BufferHandle,
        bytes: u64,
    },
    /// Execute an action on an engine.
    RunAction {
        engine: EngineHandle,
        action: ActionHandle,
    },
    /// Release a buffer or action handle.
    ReleaseHandle { handle: RemoteHandle },
    /// Unload an engine.
    UnloadEngine { engine: EngineHandle },
    /// Free the loaded configuration.
    FreeConfiguration,
}

impl DeviceCmd {
    /// Returns the remote operation name, used in logs and errors.
    pub fn op_name(&self) -> &'static str {
        match self {
            DeviceCmd::InitConfiguration { .. } => "initConfiguration",
            DeviceCmd::LoadEngine { .. } => "loadEngine",
            DeviceCmd::AllocateBuffer { .. } => "allocateBuffer",
            DeviceCmd::SendData { .. } => "sendData",
            DeviceCmd::ReceiveData { .. } => "receiveData",
            DeviceCmd::NewAction { .. } => "newAction",
            DeviceCmd::SetActionParam { .. } => "setActionParam",
            DeviceCmd::BindStream {
                direction: StreamDirection::Input,
                ..
            } => "bindActionInput",
            DeviceCmd::BindStream {
                direction: StreamDirection::Output,
                ..
            } => "bindActionOutput",
            DeviceCmd::RunAction { .. } => "runAction",
            DeviceCmd::ReleaseHandle { .. } => "releaseHandle",
            DeviceCmd::UnloadEngine { .. } => "unloadEngine",
            DeviceCmd::FreeConfiguration => "freeConfiguration",
        }
    }
}

/// Report returned by a device service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceRep {
    /// Completed with nothing to return.
    Unit,
    /// Produced a new handle.
    Handle(RemoteHandle),
    /// Returned buffer contents.
    Data(Vec<i32>),
}

impl DeviceRep {
    fn kind(&self) -> &'static str {
        match self {
            DeviceRep::Unit => "unit",
            DeviceRep::Handle(_) => "handle",
            DeviceRep::Data(_) => "data",
        }
    }

    /// Expects a unit reply to `op`.
    pub fn into_unit(self, op: &'static str) -> DeviceResult<()> {
        match self {
            DeviceRep::Unit => Ok(()),
            other => Err(DeviceError::unexpected(op, "unit", &other)),
        }
    }

    /// Expects a handle reply to `op`.
    pub fn into_handle(self, op: &'static str) -> DeviceResult<RemoteHandle> {
        match self {
            DeviceRep::Handle(handle) => Ok(handle),
            other => Err(DeviceError::unexpected(op, "handle", &other)),
        }
    }

    /// Expects a data reply to `op`.
    pub fn into_data(self, op: &'static str) -> DeviceResult<Vec<i32>> {
        match self {
            DeviceRep::Data(data) => Ok(data),
            other => Err(DeviceError::unexpected(op, "data", &other)),
        }
    }
}

/// Classification of an application-level remote failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Handle unknown, already released, or of the wrong kind.
    InvalidHandle,
    /// Configuration name or handle not recognised.
    UnknownConfiguration,
    /// A configuration is already loaded.
    ConfigurationBusy,
    /// No engine matches the selector.
    NoEngine,
    /// The engine is already loaded or still in use.
    EngineBusy,
    /// Operation name not defined by the configuration.
    UnknownAction,
    /// Parameter name not defined for the operation.
    UnknownParam,
    /// A required parameter or stream was not supplied.
    MissingParam,
    /// Stream name not defined for the operation.
    UnknownStream,
    /// Address, length, or element count outside the valid range.
    OutOfBounds,
    /// Hardware or service failure.
    Internal,
}

impl FaultKind {
    /// Stable lowercase name used in messages.
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::InvalidHandle => "invalid handle",
            FaultKind::UnknownConfiguration => "unknown configuration",
            FaultKind::ConfigurationBusy => "configuration busy",
            FaultKind::NoEngine => "no engine",
            FaultKind::EngineBusy => "engine busy",
            FaultKind::UnknownAction => "unknown action",
            FaultKind::UnknownParam => "unknown parameter",
            FaultKind::MissingParam => "missing parameter",
            FaultKind::UnknownStream => "unknown stream",
            FaultKind::OutOfBounds => "out of bounds",
            FaultKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level failure reported by a device service.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteFault {
    pub kind: FaultKind,
    pub message: String,
}

impl RemoteFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Convenience result alias for device calls.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors surfaced by a [`DeviceService`] call.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The channel failed underneath the call.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service rejected the call.
    #[error("{op} failed: {fault}")]
    Remote {
        op: &'static str,
        #[source]
        fault: RemoteFault,
    },

    /// The service answered with the wrong reply shape.
    #[error("unexpected reply to {op}: expected {expected}, got {got}")]
    UnexpectedReply {
        op: &'static str,
        expected: &'static str,
        got: &'static str,
    },
}

impl DeviceError {
    fn unexpected(op: &'static str, expected: &'static str, got: &DeviceRep) -> Self {
        DeviceError::UnexpectedReply {
            op,
            expected,
            got: got.kind(),
        }
    }

    /// Returns the remote fault if the service rejected the call.
    pub fn fault(&self) -> Option<&RemoteFault> {
        match self {
            DeviceError::Remote { fault, .. } => Some(fault),
            _ => None,
        }
    }
}

/// Blocking device service: one call in, one report out.
pub trait DeviceService {
    /// Issues `cmd` and blocks until the service answers.
    fn call(&mut self, cmd: DeviceCmd) -> DeviceResult<DeviceRep>;

    /// Shuts the underlying channel. Defaults to a no-op for in-process services.
    fn shutdown(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

impl<S: DeviceService + ?Sized> DeviceService for &mut S {
    fn call(&mut self, cmd: DeviceCmd) -> DeviceResult<DeviceRep> {
        (**self).call(cmd)
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        (**self).shutdown()
    }
}

impl<S: DeviceService + ?Sized> DeviceService for Box<S> {
    fn call(&mut self, cmd: DeviceCmd) -> DeviceResult<DeviceRep> {
        (**self).call(cmd)
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        (**self).shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_handles_share_raw_values() {
        let buffer = BufferHandle::from_raw(0x40);
        let raw: RemoteHandle = buffer.into();
        assert_eq!(raw.raw(), 0x40);
        assert_eq!(BufferHandle::from(raw), buffer);
        assert_eq!(buffer.to_string(), "0x40");
    }

    #[test]
    fn stream_binding_names_follow_direction() {
        let bind = |direction| DeviceCmd::BindStream {
            action: ActionHandle::from_raw(1),
            direction,
            stream: "s".into(),
            buffer: BufferHandle::from_raw(2),
            bytes: 4,
        };
        assert_eq!(bind(StreamDirection::Input).op_name(), "bindActionInput");
        assert_eq!(bind(StreamDirection::Output).op_name(), "bindActionOutput");
    }

    #[test]
    fn wrong_reply_shape_is_reported() {
        let err = DeviceRep::Unit.into_handle("allocateBuffer").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unexpected reply to allocateBuffer: expected handle, got unit"
        );
    }

    #[test]
    fn remote_fault_display_includes_kind() {
        let err = DeviceError::Remote {
            op: "setActionParam",
            fault: RemoteFault::new(FaultKind::UnknownParam, "no parameter 'adress'"),
        };
        assert_eq!(
            err.to_string(),
            "setActionParam failed: unknown parameter: no parameter 'adress'"
        );
        assert_eq!(err.fault().map(|f| f.kind), Some(FaultKind::UnknownParam));
    }
}
