//! Codec and client adapter for device service messages.
//!
//! [`DeviceCodec`] maps the typed commands and reports from `device-abi` onto
//! the wire schema owned by `transport`. [`RemoteDevice`] wraps any
//! [`RpcChannel`] so the orchestration layer can talk to a remote service
//! through the same [`DeviceService`] trait an in-process service implements.

use device_abi::{
    ActionHandle, BufferHandle, ConfigHandle, DeviceCmd, DeviceError, DeviceRep, DeviceResult,
    DeviceService, EngineHandle, FaultKind, RemoteFault, RemoteHandle, StreamDirection,
};
use tracing::debug;
use transport::{Codec, RpcChannel};
use transport::schema::{CallV1, FaultKindV1, FaultV1, OutcomeV1, ReplyV1};

/// Codec for device commands and reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCodec;

impl Codec for DeviceCodec {
    type Cmd = DeviceCmd;
    type Rep = DeviceRep;
    type Fault = RemoteFault;

    fn encode_cmd(&self, cmd: Self::Cmd) -> CallV1 {
        match cmd {
            DeviceCmd::InitConfiguration { name } => CallV1::InitConfiguration { name },
            DeviceCmd::LoadEngine { config, selector } => CallV1::LoadEngine {
                config: config.raw(),
                selector,
            },
            DeviceCmd::AllocateBuffer { elements } => CallV1::AllocateBuffer { elements },
            DeviceCmd::SendData { buffer, data } => CallV1::SendData {
                buffer: buffer.raw(),
                data,
            },
            DeviceCmd::ReceiveData { buffer, count } => CallV1::ReceiveData {
                buffer: buffer.raw(),
                count,
            },
            DeviceCmd::NewAction { config, operation } => CallV1::NewAction {
                config: config.raw(),
                operation,
            },
            DeviceCmd::SetActionParam {
                action,
                name,
                value,
            } => CallV1::SetActionParam {
                action: action.raw(),
                name,
                value,
            },
            DeviceCmd::BindStream {
                action,
                direction: StreamDirection::Input,
                stream,
                buffer,
                bytes,
            } => CallV1::BindActionInput {
                action: action.raw(),
                stream,
                buffer: buffer.raw(),
                bytes,
            },
            DeviceCmd::BindStream {
                action,
                direction: StreamDirection::Output,
                stream,
                buffer,
                bytes,
            } => CallV1::BindActionOutput {
                action: action.raw(),
                stream,
                buffer: buffer.raw(),
                bytes,
            },
            DeviceCmd::RunAction { engine, action } => CallV1::RunAction {
                engine: engine.raw(),
                action: action.raw(),
            },
            DeviceCmd::ReleaseHandle { handle } => CallV1::ReleaseHandle {
                handle: handle.raw(),
            },
            DeviceCmd::UnloadEngine { engine } => CallV1::UnloadEngine {
                engine: engine.raw(),
            },
            DeviceCmd::FreeConfiguration => CallV1::FreeConfiguration,
        }
    }

    fn decode_cmd(&self, call: CallV1) -> Self::Cmd {
        match call {
            CallV1::InitConfiguration { name } => DeviceCmd::InitConfiguration { name },
            CallV1::LoadEngine { config, selector } => DeviceCmd::LoadEngine {
                config: ConfigHandle::from_raw(config),
                selector,
            },
            CallV1::AllocateBuffer { elements } => DeviceCmd::AllocateBuffer { elements },
            CallV1::SendData { buffer, data } => DeviceCmd::SendData {
                buffer: BufferHandle::from_raw(buffer),
                data,
            },
            CallV1::ReceiveData { buffer, count } => DeviceCmd::ReceiveData {
                buffer: BufferHandle::from_raw(buffer),
                count,
            },
            CallV1::NewAction { config, operation } => DeviceCmd::NewAction {
                config: ConfigHandle::from_raw(config),
                operation,
            },
            CallV1::SetActionParam {
                action,
                name,
                value,
            } => DeviceCmd::SetActionParam {
                action: ActionHandle::from_raw(action),
                name,
                value,
            },
            CallV1::BindActionInput {
                action,
                stream,
                buffer,
                bytes,
            } => DeviceCmd::BindStream {
                action: ActionHandle::from_raw(action),
                direction: StreamDirection::Input,
                stream,
                buffer: BufferHandle::from_raw(buffer),
                bytes,
            },
            CallV1::BindActionOutput {
                action,
                stream,
                buffer,
                bytes,
            } => DeviceCmd::BindStream {
                action: ActionHandle::from_raw(action),
                direction: StreamDirection::Output,
                stream,
                buffer: BufferHandle::from_raw(buffer),
                bytes,
            },
            CallV1::RunAction { engine, action } => DeviceCmd::RunAction {
                engine: EngineHandle::from_raw(engine),
                action: ActionHandle::from_raw(action),
            },
            CallV1::ReleaseHandle { handle } => DeviceCmd::ReleaseHandle {
                handle: RemoteHandle::from_raw(handle),
            },
            CallV1::UnloadEngine { engine } => DeviceCmd::UnloadEngine {
                engine: EngineHandle::from_raw(engine),
            },
            CallV1::FreeConfiguration => DeviceCmd::FreeConfiguration,
        }
    }

    fn encode_rep(&self, rep: Result<Self::Rep, Self::Fault>) -> OutcomeV1 {
        match rep {
            Ok(DeviceRep::Unit) => OutcomeV1::Reply(ReplyV1::Unit),
            Ok(DeviceRep::Handle(handle)) => OutcomeV1::Reply(ReplyV1::Handle(handle.raw())),
            Ok(DeviceRep::Data(data)) => OutcomeV1::Reply(ReplyV1::Data(data)),
            Err(fault) => OutcomeV1::Fault(FaultV1 {
                kind: encode_fault_kind(fault.kind),
                message: fault.message,
            }),
        }
    }

    fn decode_rep(&self, outcome: OutcomeV1) -> Result<Self::Rep, Self::Fault> {
        match outcome {
            OutcomeV1::Reply(ReplyV1::Unit) => Ok(DeviceRep::Unit),
            OutcomeV1::Reply(ReplyV1::Handle(raw)) => {
                Ok(DeviceRep::Handle(RemoteHandle::from_raw(raw)))
            }
            OutcomeV1::Reply(ReplyV1::Data(data)) => Ok(DeviceRep::Data(data)),
            OutcomeV1::Fault(fault) => Err(RemoteFault::new(
                decode_fault_kind(fault.kind),
                fault.message,
            )),
        }
    }
}

fn encode_fault_kind(kind: FaultKind) -> FaultKindV1 {
    match kind {
        FaultKind::InvalidHandle => FaultKindV1::InvalidHandle,
        FaultKind::UnknownConfiguration => FaultKindV1::UnknownConfiguration,
        FaultKind::ConfigurationBusy => FaultKindV1::ConfigurationBusy,
        FaultKind::NoEngine => FaultKindV1::NoEngine,
        FaultKind::EngineBusy => FaultKindV1::EngineBusy,
        FaultKind::UnknownAction => FaultKindV1::UnknownAction,
        FaultKind::UnknownParam => FaultKindV1::UnknownParam,
        FaultKind::MissingParam => FaultKindV1::MissingParam,
        FaultKind::UnknownStream => FaultKindV1::UnknownStream,
        FaultKind::OutOfBounds => FaultKindV1::OutOfBounds,
        FaultKind::Internal => FaultKindV1::Internal,
    }
}

fn decode_fault_kind(kind: FaultKindV1) -> FaultKind {
    match kind {
        FaultKindV1::InvalidHandle => FaultKind::InvalidHandle,
        FaultKindV1::UnknownConfiguration => FaultKind::UnknownConfiguration,
        FaultKindV1::ConfigurationBusy => FaultKind::ConfigurationBusy,
        FaultKindV1::NoEngine => FaultKind::NoEngine,
        FaultKindV1::EngineBusy => FaultKind::EngineBusy,
        FaultKindV1::UnknownAction => FaultKind::UnknownAction,
        FaultKindV1::UnknownParam => FaultKind::UnknownParam,
        FaultKindV1::MissingParam => FaultKind::MissingParam,
        FaultKindV1::UnknownStream => FaultKind::UnknownStream,
        FaultKindV1::OutOfBounds => FaultKind::OutOfBounds,
        FaultKindV1::Internal => FaultKind::Internal,
    }
}

/// [`DeviceService`] backed by a remote service reached over an [`RpcChannel`].
pub struct RemoteDevice<C: RpcChannel> {
    channel: C,
    codec: DeviceCodec,
}

impl<C: RpcChannel> RemoteDevice<C> {
    /// Wraps an open channel.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            codec: DeviceCodec,
        }
    }

    /// Returns the underlying channel.
    pub fn into_channel(self) -> C {
        self.channel
    }
}

impl<C: RpcChannel> DeviceService for RemoteDevice<C> {
    fn call(&mut self, cmd: DeviceCmd) -> DeviceResult<DeviceRep> {
        let op = cmd.op_name();
        debug!(op, "remote call");
        let outcome = self.channel.call(self.codec.encode_cmd(cmd))?;
        self.codec
            .decode_rep(outcome)
            .map_err(|fault| DeviceError::Remote { op, fault })
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        self.channel.close()?;
        Ok(())
    }
}
