//! Session-scoped table of remote handles.
//!
//! Every handle the service hands out is registered here with its kind. The
//! session consults the table before each call so that released or foreign
//! handles never reach the wire.

use std::collections::BTreeMap;
use std::fmt;

use device_abi::RemoteHandle;

use crate::{LoopbackError, LoopbackResult};

/// What a remote handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Configuration,
    Engine,
    /// Device buffer of `elements` 32-bit integers.
    Buffer { elements: u64 },
    Action,
}

impl HandleKind {
    /// Kind without payload, for matching.
    pub fn class(self) -> HandleClass {
        match self {
            HandleKind::Configuration => HandleClass::Configuration,
            HandleKind::Engine => HandleClass::Engine,
            HandleKind::Buffer { .. } => HandleClass::Buffer,
            HandleKind::Action => HandleClass::Action,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleClass {
    Configuration,
    Engine,
    Buffer,
    Action,
}

impl fmt::Display for HandleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleClass::Configuration => "configuration",
            HandleClass::Engine => "engine",
            HandleClass::Buffer => "buffer",
            HandleClass::Action => "action",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Live,
    Released,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    kind: HandleKind,
    state: HandleState,
}

/// Arena of every handle seen during one session.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: BTreeMap<RemoteHandle, Entry>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a handle freshly returned by the service.
    ///
    /// A value the service reuses after release is accepted; a value that is
    /// still live is a protocol violation on the service side.
    pub fn register(
        &mut self,
        op: &'static str,
        handle: RemoteHandle,
        kind: HandleKind,
    ) -> LoopbackResult<()> {
        if let Some(existing) = self.entries.get(&handle) {
            if existing.state == HandleState::Live {
                return Err(LoopbackError::misuse(
                    op,
                    format!("service returned handle {handle} which is still live"),
                ));
            }
        }
        self.entries.insert(
            handle,
            Entry {
                kind,
                state: HandleState::Live,
            },
        );
        Ok(())
    }

    /// Ensures `handle` is live and of the expected class.
    pub fn check(
        &self,
        op: &'static str,
        handle: RemoteHandle,
        class: HandleClass,
    ) -> LoopbackResult<HandleKind> {
        match self.entries.get(&handle) {
            Some(entry) if entry.kind.class() != class => Err(LoopbackError::misuse(
                op,
                format!("handle {handle} has kind {}, expected {class}", entry.kind.class()),
            )),
            Some(Entry {
                kind,
                state: HandleState::Live,
            }) => Ok(*kind),
            Some(_) => Err(LoopbackError::misuse(
                op,
                format!("{class} handle {handle} was already released"),
            )),
            None => Err(LoopbackError::misuse(
                op,
                format!("{class} handle {handle} is unknown to this session"),
            )),
        }
    }

    /// Element count of a live buffer.
    pub fn buffer_elements(&self, op: &'static str, handle: RemoteHandle) -> LoopbackResult<u64> {
        match self.check(op, handle, HandleClass::Buffer)? {
            HandleKind::Buffer { elements } => Ok(elements),
            _ => Err(LoopbackError::misuse(op, format!("handle {handle} is not a buffer"))),
        }
    }

    /// Marks a live handle released. Call only after the service confirmed.
    pub fn release(
        &mut self,
        op: &'static str,
        handle: RemoteHandle,
        class: HandleClass,
    ) -> LoopbackResult<()> {
        self.check(op, handle, class)?;
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.state = HandleState::Released;
        }
        Ok(())
    }

    /// State of a handle, if it was ever registered.
    pub fn state(&self, handle: RemoteHandle) -> Option<HandleState> {
        self.entries.get(&handle).map(|entry| entry.state)
    }

    /// Live handles in ascending order.
    pub fn live(&self) -> impl Iterator<Item = (RemoteHandle, HandleKind)> + '_ {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state == HandleState::Live)
            .map(|(handle, entry)| (*handle, entry.kind))
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }
}
