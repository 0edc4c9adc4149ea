//! Device session: lifecycle of one connection to a device service.
//!
//! A [`DeviceSession`] wraps any [`DeviceService`] and enforces the session
//! protocol locally. Calls that would violate it (wrong state, released or
//! foreign handles, transfers larger than a buffer) fail with
//! [`LoopbackError::ProtocolMisuse`] before anything is sent.

use device_abi::{
    ActionHandle, BufferHandle, ConfigHandle, DeviceCmd, DeviceService, EngineHandle,
    RemoteHandle,
};
use device_codecs::RemoteDevice;
use tracing::{debug, warn};
use transport::{ChannelOptions, TcpChannel};

use crate::action::Action;
use crate::handles::{HandleClass, HandleKind, HandleTable};
use crate::{LoopbackError, LoopbackResult};

const WORD_BYTES: u64 = 4;

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    ConfigurationLoaded,
    EngineLoaded,
    EngineUnloaded,
    ConfigurationFreed,
}

/// Session over a TCP connection to a remote service.
pub type RemoteSession = DeviceSession<RemoteDevice<TcpChannel>>;

/// Opens a TCP channel to `host:port` and starts a session on it.
pub fn connect(host: &str, port: u16, options: &ChannelOptions) -> LoopbackResult<RemoteSession> {
    let channel = TcpChannel::connect(host, port, options)?;
    debug!(host, port, "session connected");
    Ok(DeviceSession::new(RemoteDevice::new(channel)))
}

/// Exclusive owner of one device service connection and every handle it
/// produces.
pub struct DeviceSession<S: DeviceService> {
    service: S,
    state: SessionState,
    handles: HandleTable,
    closed: bool,
}

impl<S: DeviceService> DeviceSession<S> {
    /// Starts a session on an already connected service.
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: SessionState::Connected,
            handles: HandleTable::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Initialises the named configuration on the service.
    pub fn load_configuration(&mut self, name: &str) -> LoopbackResult<ConfigHandle> {
        let cmd = DeviceCmd::InitConfiguration {
            name: name.to_string(),
        };
        let op = cmd.op_name();
        self.require(op, &[SessionState::Connected])?;
        let handle = self.service.call(cmd)?.into_handle(op)?;
        self.register(op, handle, HandleKind::Configuration)?;
        self.state = SessionState::ConfigurationLoaded;
        Ok(handle.into())
    }

    /// Loads an engine for `config`; `"*"` selects any engine.
    pub fn load_engine(
        &mut self,
        config: ConfigHandle,
        selector: &str,
    ) -> LoopbackResult<EngineHandle> {
        let op = "loadEngine";
        self.require(op, &[SessionState::ConfigurationLoaded])?;
        self.check(op, config.into(), HandleClass::Configuration)?;
        let handle = self
            .service
            .call(DeviceCmd::LoadEngine {
                config,
                selector: selector.to_string(),
            })?
            .into_handle(op)?;
        self.register(op, handle, HandleKind::Engine)?;
        self.state = SessionState::EngineLoaded;
        Ok(handle.into())
    }

    /// Allocates a device buffer of `elements` 32-bit integers.
    pub fn allocate(&mut self, elements: u64) -> LoopbackResult<BufferHandle> {
        let op = "allocateBuffer";
        self.require_configuration(op)?;
        let handle = self
            .service
            .call(DeviceCmd::AllocateBuffer { elements })?
            .into_handle(op)?;
        self.register(op, handle, HandleKind::Buffer { elements })?;
        Ok(handle.into())
    }

    /// Copies `data` into the start of `buffer`.
    pub fn send(&mut self, buffer: BufferHandle, data: &[i32]) -> LoopbackResult<()> {
        let op = "sendData";
        self.require_configuration(op)?;
        let elements = self.buffer_elements(op, buffer)?;
        if data.len() as u64 > elements {
            return Err(self.misuse(
                op,
                format!(
                    "{} elements do not fit buffer {buffer} of {elements}",
                    data.len()
                ),
            ));
        }
        self.service
            .call(DeviceCmd::SendData {
                buffer,
                data: data.to_vec(),
            })?
            .into_unit(op)?;
        Ok(())
    }

    /// Reads the first `count` elements of `buffer`.
    pub fn receive(&mut self, buffer: BufferHandle, count: u64) -> LoopbackResult<Vec<i32>> {
        let op = "receiveData";
        self.require_configuration(op)?;
        let elements = self.buffer_elements(op, buffer)?;
        if count > elements {
            return Err(self.misuse(
                op,
                format!("cannot read {count} elements from buffer {buffer} of {elements}"),
            ));
        }
        Ok(self
            .service
            .call(DeviceCmd::ReceiveData { buffer, count })?
            .into_data(op)?)
    }

    /// Releases a buffer. The handle is unusable afterwards.
    pub fn release(&mut self, buffer: BufferHandle) -> LoopbackResult<()> {
        self.release_handle(buffer.into(), HandleClass::Buffer)
    }

    /// Executes `action` on `engine` and blocks until it completes.
    ///
    /// Issues `newAction`, each parameter, each binding, `runAction`, then
    /// releases the action handle. The descriptor is consumed whether or not
    /// the run succeeds.
    ///
    /// ```compile_fail
    /// # use lmem_loopback::{Action, DeviceSession};
    /// # use device_abi::{DeviceService, EngineHandle};
    /// fn twice<S: DeviceService>(session: &mut DeviceSession<S>, engine: EngineHandle) {
    ///     let action = Action::builder("default").param("N", 4).build();
    ///     let _ = session.run(engine, action);
    ///     let _ = session.run(engine, action);
    /// }
    /// ```
    pub fn run(&mut self, engine: EngineHandle, action: Action) -> LoopbackResult<()> {
        let op = "runAction";
        self.require(op, &[SessionState::EngineLoaded])?;
        self.check(op, engine.into(), HandleClass::Engine)?;
        let config = self.configuration(op)?;
        for binding in action.streams() {
            let elements = self.buffer_elements(op, binding.buffer)?;
            if binding.bytes > elements.saturating_mul(WORD_BYTES) {
                return Err(self.misuse(
                    op,
                    format!(
                        "stream '{}' binds {} bytes but buffer {} holds {elements} elements",
                        binding.stream, binding.bytes, binding.buffer
                    ),
                ));
            }
        }

        let handle = self
            .service
            .call(DeviceCmd::NewAction {
                config,
                operation: action.operation().to_string(),
            })?
            .into_handle("newAction")?;
        self.register("newAction", handle, HandleKind::Action)?;
        let handle = ActionHandle::from(handle);

        for (name, value) in action.params() {
            self.service
                .call(DeviceCmd::SetActionParam {
                    action: handle,
                    name: name.clone(),
                    value: *value,
                })?
                .into_unit("setActionParam")?;
        }
        for binding in action.streams() {
            let cmd = DeviceCmd::BindStream {
                action: handle,
                direction: binding.direction,
                stream: binding.stream.clone(),
                buffer: binding.buffer,
                bytes: binding.bytes,
            };
            let bind_op = cmd.op_name();
            self.service.call(cmd)?.into_unit(bind_op)?;
        }
        self.service
            .call(DeviceCmd::RunAction {
                engine,
                action: handle,
            })?
            .into_unit(op)?;
        debug!(operation = action.operation(), "action executed");
        self.release_handle(handle.into(), HandleClass::Action)
    }

    /// Unloads the engine. No further actions can run.
    pub fn unload_engine(&mut self, engine: EngineHandle) -> LoopbackResult<()> {
        let op = "unloadEngine";
        self.require(op, &[SessionState::EngineLoaded])?;
        self.check(op, engine.into(), HandleClass::Engine)?;
        self.service
            .call(DeviceCmd::UnloadEngine { engine })?
            .into_unit(op)?;
        self.handles.release(op, engine.into(), HandleClass::Engine)?;
        self.state = SessionState::EngineUnloaded;
        Ok(())
    }

    /// Frees the configuration. Must follow [`unload_engine`](Self::unload_engine)
    /// if an engine was loaded.
    pub fn free_configuration(&mut self, config: ConfigHandle) -> LoopbackResult<()> {
        let op = "freeConfiguration";
        self.require(
            op,
            &[SessionState::ConfigurationLoaded, SessionState::EngineUnloaded],
        )?;
        self.check(op, config.into(), HandleClass::Configuration)?;
        self.service
            .call(DeviceCmd::FreeConfiguration)?
            .into_unit(op)?;
        self.handles
            .release(op, config.into(), HandleClass::Configuration)?;
        self.state = SessionState::ConfigurationFreed;
        Ok(())
    }

    /// Closes the channel. Fails without closing if any handle is still live.
    pub fn close(mut self) -> LoopbackResult<()> {
        let op = "close";
        self.require(
            op,
            &[SessionState::Connected, SessionState::ConfigurationFreed],
        )?;
        let live = self.handles.live_count();
        if live > 0 {
            return Err(self.misuse(op, format!("{live} handles are still live")));
        }
        self.closed = true;
        self.state = SessionState::Disconnected;
        self.service.shutdown()?;
        Ok(())
    }

    fn release_handle(&mut self, handle: RemoteHandle, class: HandleClass) -> LoopbackResult<()> {
        let op = "releaseHandle";
        self.check(op, handle, class)?;
        self.service
            .call(DeviceCmd::ReleaseHandle { handle })?
            .into_unit(op)?;
        self.handles.release(op, handle, class)
    }

    fn require_configuration(&self, op: &'static str) -> LoopbackResult<()> {
        self.require(
            op,
            &[
                SessionState::ConfigurationLoaded,
                SessionState::EngineLoaded,
                SessionState::EngineUnloaded,
            ],
        )
    }

    fn require(&self, op: &'static str, allowed: &[SessionState]) -> LoopbackResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.misuse(op, format!("not allowed in state {:?}", self.state)))
        }
    }

    fn configuration(&self, op: &'static str) -> LoopbackResult<ConfigHandle> {
        self.handles
            .live()
            .find(|(_, kind)| *kind == HandleKind::Configuration)
            .map(|(handle, _)| ConfigHandle::from(handle))
            .ok_or_else(|| self.misuse(op, "no configuration is loaded"))
    }

    fn check(&self, op: &'static str, handle: RemoteHandle, class: HandleClass) -> LoopbackResult<()> {
        self.handles
            .check(op, handle, class)
            .map(|_| ())
            .map_err(warned)
    }

    fn buffer_elements(&self, op: &'static str, buffer: BufferHandle) -> LoopbackResult<u64> {
        self.handles
            .buffer_elements(op, buffer.into())
            .map_err(warned)
    }

    fn register(
        &mut self,
        op: &'static str,
        handle: RemoteHandle,
        kind: HandleKind,
    ) -> LoopbackResult<()> {
        self.handles.register(op, handle, kind).map_err(warned)
    }

    fn misuse(&self, op: &'static str, reason: impl Into<String>) -> LoopbackError {
        warned(LoopbackError::misuse(op, reason))
    }
}

impl<S: DeviceService> Drop for DeviceSession<S> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let live: Vec<String> = self
            .handles
            .live()
            .map(|(handle, kind)| format!("{} {handle}", kind.class()))
            .collect();
        warn!(state = ?self.state, ?live, "device session dropped without close");
    }
}

fn warned(err: LoopbackError) -> LoopbackError {
    warn!(error = %err, "protocol misuse");
    err
}
