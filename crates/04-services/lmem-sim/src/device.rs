use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use device_abi::{
    ActionHandle, BufferHandle, ConfigHandle, DeviceCmd, DeviceError, DeviceRep, DeviceResult,
    DeviceService, EngineHandle, FaultKind, RemoteFault, RemoteHandle, StreamDirection,
};
use tracing::debug;

/// Configuration name served by default.
pub const CONFIGURATION_NAME: &str = "LMemLoopback";
/// Identifier of the single simulated engine.
pub const ENGINE_ID: &str = "local:0";
/// LMem capacity used when none is configured.
pub const DEFAULT_LMEM_BYTES: usize = 16 * 1024 * 1024;
/// Largest buffer the simulator will allocate, in elements.
pub const MAX_BUFFER_ELEMENTS: u64 = 1 << 24;

const FIRST_HANDLE: u64 = 0x1000;
const HANDLE_STRIDE: u64 = 0x10;
const WORD: usize = 4;

const WRITE_LMEM: &str = "writeLMem";
const READ_LMEM: &str = "readLMem";
const COMPUTE: &str = "default";
const CPU_TO_LMEM: &str = "cpu_to_lmem";
const LMEM_TO_CPU: &str = "lmem_to_cpu";

/// Static description of the simulated device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimConfig {
    /// Configuration name accepted by `initConfiguration`.
    pub configuration: String,
    /// Engine identifier accepted by `loadEngine` besides `"*"`.
    pub engine_id: String,
    /// LMem capacity in bytes.
    pub lmem_bytes: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            configuration: CONFIGURATION_NAME.to_string(),
            engine_id: ENGINE_ID.to_string(),
            lmem_bytes: DEFAULT_LMEM_BYTES,
        }
    }
}

impl SimConfig {
    /// Default device serving a differently named configuration.
    pub fn for_configuration(name: impl Into<String>) -> Self {
        Self {
            configuration: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    WriteLMem,
    ReadLMem,
    Compute,
}

impl Operation {
    fn parse(name: &str) -> Option<Self> {
        match name {
            WRITE_LMEM => Some(Operation::WriteLMem),
            READ_LMEM => Some(Operation::ReadLMem),
            COMPUTE => Some(Operation::Compute),
            _ => None,
        }
    }

    fn params(self) -> &'static [&'static str] {
        match self {
            Operation::WriteLMem | Operation::ReadLMem => &["address", "nbytes"],
            Operation::Compute => &["N"],
        }
    }

    fn stream(self, direction: StreamDirection) -> Option<&'static str> {
        match (self, direction) {
            (Operation::WriteLMem, StreamDirection::Input) => Some(CPU_TO_LMEM),
            (Operation::ReadLMem, StreamDirection::Output) => Some(LMEM_TO_CPU),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct PendingAction {
    op: Operation,
    params: BTreeMap<String, u64>,
    streams: BTreeMap<String, (BufferHandle, u64)>,
    executed: bool,
}

impl PendingAction {
    fn new(op: Operation) -> Self {
        Self {
            op,
            params: BTreeMap::new(),
            streams: BTreeMap::new(),
            executed: false,
        }
    }

    fn param(&self, name: &str) -> Result<u64, RemoteFault> {
        self.params.get(name).copied().ok_or_else(|| {
            RemoteFault::new(FaultKind::MissingParam, format!("parameter '{name}' not set"))
        })
    }

    fn stream(&self, name: &str) -> Result<(BufferHandle, u64), RemoteFault> {
        self.streams.get(name).copied().ok_or_else(|| {
            RemoteFault::new(FaultKind::MissingParam, format!("stream '{name}' not bound"))
        })
    }
}

enum Entry {
    Configuration,
    Engine,
    Buffer(Vec<i32>),
    Action(PendingAction),
}

/// In-process device service for the `LMemLoopback` configuration.
pub struct SimDevice {
    config: SimConfig,
    next_raw: u64,
    entries: HashMap<RemoteHandle, Entry>,
    configuration: Option<ConfigHandle>,
    engine: Option<EngineHandle>,
    lmem: Vec<u8>,
    bit_flips: Vec<usize>,
    executed: u64,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimDevice {
    /// Creates a device with nothing loaded.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            next_raw: FIRST_HANDLE,
            entries: HashMap::new(),
            configuration: None,
            engine: None,
            lmem: Vec::new(),
            bit_flips: Vec::new(),
            executed: 0,
        }
    }

    /// Makes the compute action flip the low bit of the result at each index.
    pub fn with_bit_flips(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.bit_flips = indices.into_iter().collect();
        self
    }

    /// Number of handles not yet released, including configuration and engine.
    pub fn live_handles(&self) -> usize {
        self.entries.len()
    }

    /// Number of actions executed since creation.
    pub fn executed_actions(&self) -> u64 {
        self.executed
    }

    /// True while a configuration is loaded.
    pub fn configuration_loaded(&self) -> bool {
        self.configuration.is_some()
    }

    /// True while an engine is loaded.
    pub fn engine_loaded(&self) -> bool {
        self.engine.is_some()
    }

    /// Executes one command against the simulated device.
    pub fn handle(&mut self, cmd: DeviceCmd) -> Result<DeviceRep, RemoteFault> {
        let op = cmd.op_name();
        let result = self.dispatch(cmd);
        match &result {
            Ok(_) => debug!(op, "sim call"),
            Err(fault) => debug!(op, %fault, "sim call rejected"),
        }
        result
    }

    fn dispatch(&mut self, cmd: DeviceCmd) -> Result<DeviceRep, RemoteFault> {
        match cmd {
            DeviceCmd::InitConfiguration { name } => {
                if name != self.config.configuration {
                    return Err(RemoteFault::new(
                        FaultKind::UnknownConfiguration,
                        format!("no configuration named '{name}'"),
                    ));
                }
                if self.configuration.is_some() {
                    return Err(RemoteFault::new(
                        FaultKind::ConfigurationBusy,
                        format!("configuration '{name}' already initialised"),
                    ));
                }
                self.lmem = vec![0; self.config.lmem_bytes];
                let handle = self.issue(Entry::Configuration);
                self.configuration = Some(handle.into());
                Ok(DeviceRep::Handle(handle))
            }
            DeviceCmd::LoadEngine { config, selector } => {
                self.expect_configuration(config)?;
                if selector != "*" && selector != self.config.engine_id {
                    return Err(RemoteFault::new(
                        FaultKind::NoEngine,
                        format!("no engine matches '{selector}'"),
                    ));
                }
                if self.engine.is_some() {
                    return Err(RemoteFault::new(FaultKind::EngineBusy, "engine already loaded"));
                }
                let handle = self.issue(Entry::Engine);
                self.engine = Some(handle.into());
                Ok(DeviceRep::Handle(handle))
            }
            DeviceCmd::AllocateBuffer { elements } => {
                if elements > MAX_BUFFER_ELEMENTS {
                    return Err(RemoteFault::new(
                        FaultKind::OutOfBounds,
                        format!("cannot allocate {elements} elements (limit {MAX_BUFFER_ELEMENTS})"),
                    ));
                }
                let handle = self.issue(Entry::Buffer(vec![0; elements as usize]));
                Ok(DeviceRep::Handle(handle))
            }
            DeviceCmd::SendData { buffer, data } => {
                let target = self.buffer_mut(buffer)?;
                if data.len() > target.len() {
                    return Err(RemoteFault::new(
                        FaultKind::OutOfBounds,
                        format!(
                            "{} elements do not fit buffer {buffer} of {}",
                            data.len(),
                            target.len()
                        ),
                    ));
                }
                target[..data.len()].copy_from_slice(&data);
                Ok(DeviceRep::Unit)
            }
            DeviceCmd::ReceiveData { buffer, count } => {
                let source = self.buffer(buffer)?;
                let count = usize::try_from(count).unwrap_or(usize::MAX);
                if count > source.len() {
                    return Err(RemoteFault::new(
                        FaultKind::OutOfBounds,
                        format!("buffer {buffer} holds only {} elements", source.len()),
                    ));
                }
                Ok(DeviceRep::Data(source[..count].to_vec()))
            }
            DeviceCmd::NewAction { config, operation } => {
                self.expect_configuration(config)?;
                let op = Operation::parse(&operation).ok_or_else(|| {
                    RemoteFault::new(
                        FaultKind::UnknownAction,
                        format!("configuration has no action '{operation}'"),
                    )
                })?;
                let handle = self.issue(Entry::Action(PendingAction::new(op)));
                Ok(DeviceRep::Handle(handle))
            }
            DeviceCmd::SetActionParam {
                action,
                name,
                value,
            } => {
                let pending = self.action_mut(action)?;
                if !pending.op.params().contains(&name.as_str()) {
                    return Err(RemoteFault::new(
                        FaultKind::UnknownParam,
                        format!("no parameter '{name}'"),
                    ));
                }
                pending.params.insert(name, value);
                Ok(DeviceRep::Unit)
            }
            DeviceCmd::BindStream {
                action,
                direction,
                stream,
                buffer,
                bytes,
            } => {
                let capacity = self.buffer(buffer)?.len() * WORD;
                if bytes % WORD as u64 != 0 || bytes > capacity as u64 {
                    return Err(RemoteFault::new(
                        FaultKind::OutOfBounds,
                        format!("{bytes} bytes is not a valid span of buffer {buffer} ({capacity} bytes)"),
                    ));
                }
                let pending = self.action_mut(action)?;
                if pending.op.stream(direction) != Some(stream.as_str()) {
                    return Err(RemoteFault::new(
                        FaultKind::UnknownStream,
                        format!("no {direction:?} stream '{stream}'"),
                    ));
                }
                pending.streams.insert(stream, (buffer, bytes));
                Ok(DeviceRep::Unit)
            }
            DeviceCmd::RunAction { engine, action } => {
                self.run(engine, action)?;
                Ok(DeviceRep::Unit)
            }
            DeviceCmd::ReleaseHandle { handle } => match self.entries.get(&handle) {
                Some(Entry::Buffer(_)) | Some(Entry::Action(_)) => {
                    self.entries.remove(&handle);
                    Ok(DeviceRep::Unit)
                }
                Some(Entry::Configuration) | Some(Entry::Engine) => Err(RemoteFault::new(
                    FaultKind::InvalidHandle,
                    format!("handle {handle} is released by unloadEngine/freeConfiguration"),
                )),
                None => Err(unknown_handle(handle)),
            },
            DeviceCmd::UnloadEngine { engine } => {
                if self.engine != Some(engine) {
                    return Err(unknown_handle(engine.into()));
                }
                self.entries.remove(&RemoteHandle::from(engine));
                self.engine = None;
                Ok(DeviceRep::Unit)
            }
            DeviceCmd::FreeConfiguration => {
                let Some(config) = self.configuration else {
                    return Err(RemoteFault::new(
                        FaultKind::InvalidHandle,
                        "no configuration loaded",
                    ));
                };
                if self.engine.is_some() {
                    return Err(RemoteFault::new(
                        FaultKind::EngineBusy,
                        "engine must be unloaded before freeing the configuration",
                    ));
                }
                self.entries.remove(&RemoteHandle::from(config));
                self.entries
                    .retain(|_, entry| !matches!(entry, Entry::Action(_)));
                self.configuration = None;
                self.lmem = Vec::new();
                Ok(DeviceRep::Unit)
            }
        }
    }

    fn run(&mut self, engine: EngineHandle, action: ActionHandle) -> Result<(), RemoteFault> {
        if self.engine != Some(engine) {
            return Err(RemoteFault::new(
                FaultKind::InvalidHandle,
                format!("engine {engine} is not loaded"),
            ));
        }
        let pending = self.action_mut(action)?.clone();
        if pending.executed {
            return Err(RemoteFault::new(
                FaultKind::InvalidHandle,
                format!("action {action} already executed"),
            ));
        }

        match pending.op {
            Operation::WriteLMem => {
                let (region, buffer) = self.transfer(&pending, CPU_TO_LMEM)?;
                let bytes: Vec<u8> = self.buffer(buffer)?[..region.len() / WORD]
                    .iter()
                    .flat_map(|value| value.to_le_bytes())
                    .collect();
                self.lmem[region].copy_from_slice(&bytes);
            }
            Operation::ReadLMem => {
                let (region, buffer) = self.transfer(&pending, LMEM_TO_CPU)?;
                let words: Vec<i32> = self.lmem[region]
                    .chunks_exact(WORD)
                    .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                self.buffer_mut(buffer)?[..words.len()].copy_from_slice(&words);
            }
            Operation::Compute => {
                let elements = pending.param("N")?;
                let block = elements
                    .checked_mul(WORD as u64)
                    .ok_or_else(|| out_of_bounds(elements))?;
                let a = self.lmem_range(0, block)?;
                let b = self.lmem_range(block, block)?;
                let out = self.lmem_range(block.saturating_mul(2), block)?;
                for i in 0..a.len() / WORD {
                    let lhs = read_word(&self.lmem, a.start + i * WORD);
                    let rhs = read_word(&self.lmem, b.start + i * WORD);
                    let mut sum = lhs.wrapping_add(rhs);
                    if self.bit_flips.contains(&i) {
                        sum ^= 1;
                    }
                    self.lmem[out.start + i * WORD..out.start + (i + 1) * WORD]
                        .copy_from_slice(&sum.to_le_bytes());
                }
            }
        }

        if let Some(Entry::Action(done)) = self.entries.get_mut(&RemoteHandle::from(action)) {
            done.executed = true;
        }
        self.executed += 1;
        Ok(())
    }

    /// Resolves the LMem region and bound buffer of a read or write action.
    fn transfer(
        &self,
        pending: &PendingAction,
        stream: &str,
    ) -> Result<(Range<usize>, BufferHandle), RemoteFault> {
        let address = pending.param("address")?;
        let nbytes = pending.param("nbytes")?;
        let (buffer, bound) = pending.stream(stream)?;
        if nbytes % WORD as u64 != 0 || nbytes > bound {
            return Err(RemoteFault::new(
                FaultKind::OutOfBounds,
                format!("nbytes {nbytes} does not fit the {bound} bytes bound to '{stream}'"),
            ));
        }
        // The buffer may have been released since it was bound.
        self.buffer(buffer)?;
        Ok((self.lmem_range(address, nbytes)?, buffer))
    }

    fn lmem_range(&self, address: u64, len: u64) -> Result<Range<usize>, RemoteFault> {
        let end = address
            .checked_add(len)
            .filter(|end| *end <= self.lmem.len() as u64)
            .ok_or_else(|| {
                RemoteFault::new(
                    FaultKind::OutOfBounds,
                    format!(
                        "LMem range {address}+{len} exceeds {} bytes",
                        self.lmem.len()
                    ),
                )
            })?;
        Ok(address as usize..end as usize)
    }

    fn issue(&mut self, entry: Entry) -> RemoteHandle {
        let handle = RemoteHandle::from_raw(self.next_raw);
        self.next_raw += HANDLE_STRIDE;
        self.entries.insert(handle, entry);
        handle
    }

    fn expect_configuration(&self, config: ConfigHandle) -> Result<(), RemoteFault> {
        if self.configuration == Some(config) {
            Ok(())
        } else {
            Err(RemoteFault::new(
                FaultKind::UnknownConfiguration,
                format!("configuration handle {config} is not loaded"),
            ))
        }
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&Vec<i32>, RemoteFault> {
        match self.entries.get(&RemoteHandle::from(buffer)) {
            Some(Entry::Buffer(data)) => Ok(data),
            _ => Err(unknown_handle(buffer.into())),
        }
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> Result<&mut Vec<i32>, RemoteFault> {
        match self.entries.get_mut(&RemoteHandle::from(buffer)) {
            Some(Entry::Buffer(data)) => Ok(data),
            _ => Err(unknown_handle(buffer.into())),
        }
    }

    fn action_mut(&mut self, action: ActionHandle) -> Result<&mut PendingAction, RemoteFault> {
        match self.entries.get_mut(&RemoteHandle::from(action)) {
            Some(Entry::Action(pending)) => Ok(pending),
            _ => Err(unknown_handle(action.into())),
        }
    }
}

impl DeviceService for SimDevice {
    fn call(&mut self, cmd: DeviceCmd) -> DeviceResult<DeviceRep> {
        let op = cmd.op_name();
        self.handle(cmd)
            .map_err(|fault| DeviceError::Remote { op, fault })
    }
}

fn read_word(lmem: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([lmem[at], lmem[at + 1], lmem[at + 2], lmem[at + 3]])
}

fn unknown_handle(handle: RemoteHandle) -> RemoteFault {
    RemoteFault::new(
        FaultKind::InvalidHandle,
        format!("handle {handle} is unknown or released"),
    )
}

fn out_of_bounds(elements: u64) -> RemoteFault {
    RemoteFault::new(
        FaultKind::OutOfBounds,
        format!("element count {elements} overflows the LMem address space"),
    )
}
