//! Transport-visible message schema frozen for rkyv serialization.
//!
//! Types in this module define the stable, archived representation of device
//! calls and their outcomes. Any backward-incompatible change must bump the
//! schema version.

#![allow(missing_docs)]

use rkyv::{Archive, Deserialize, Serialize};
use std::string::String;
use std::vec::Vec;

/// Schema version for transport-visible messages.
pub const SCHEMA_VERSION_V1: u8 = 1;

/// Envelope tag for device calls (client to service).
pub const TAG_CALL: u8 = 0x01;
/// Envelope tag for call outcomes (service to client).
pub const TAG_OUTCOME: u8 = 0x11;

/// Raw remote handle as carried on the wire.
pub type RawHandle = u64;

/// A single call with the sequence number it must be answered under.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `RequestV1`."),
    bytecheck()
)]
pub struct RequestV1 {
    /// Monotonic per-channel sequence number.
    pub seq: u64,
    /// Operation requested from the service.
    pub call: CallV1,
}

/// Remote operations understood by the device service.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `CallV1`."),
    bytecheck()
)]
pub enum CallV1 {
    /// Initialise the named hardware configuration.
    InitConfiguration { name: String },
    /// Load an engine for a configuration; `selector` of `"*"` takes any engine.
    LoadEngine { config: RawHandle, selector: String },
    /// Allocate a buffer of 32-bit integers.
    AllocateBuffer { elements: u64 },
    /// Copy host data into a buffer.
    SendData { buffer: RawHandle, data: Vec<i32> },
    /// Copy `count` elements out of a buffer.
    ReceiveData { buffer: RawHandle, count: u64 },
    /// Start building an action for a named operation.
    NewAction { config: RawHandle, operation: String },
    /// Set a scalar action parameter.
    SetActionParam {
        action: RawHandle,
        name: String,
        value: u64,
    },
    /// Bind a buffer as an input stream of an action.
    BindActionInput {
        action: RawHandle,
        stream: String,
        buffer: RawHandle,
        bytes: u64,
    },
    /// Bind a buffer as an output stream of an action.
    BindActionOutput {
        action: RawHandle,
        stream: String,
        buffer: RawHandle,
        bytes: u64,
    },
    /// Execute an action on an engine, blocking until it completes.
    RunAction { engine: RawHandle, action: RawHandle },
    /// Release a buffer or action handle.
    ReleaseHandle { handle: RawHandle },
    /// Unload a previously loaded engine.
    UnloadEngine { engine: RawHandle },
    /// Free the loaded configuration.
    FreeConfiguration,
}

/// Outcome of a call, echoed under the request's sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `ResponseV1`."),
    bytecheck()
)]
pub struct ResponseV1 {
    /// Sequence number of the request being answered.
    pub seq: u64,
    /// Reply payload or remote fault.
    pub outcome: OutcomeV1,
}

/// Either a successful reply or an application-level fault.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `OutcomeV1`."),
    bytecheck()
)]
pub enum OutcomeV1 {
    Reply(ReplyV1),
    Fault(FaultV1),
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `ReplyV1`."),
    bytecheck()
)]
pub enum ReplyV1 {
    /// The call completed with nothing to return.
    Unit,
    /// The call produced a new remote handle.
    Handle(RawHandle),
    /// The call returned buffer contents.
    Data(Vec<i32>),
}

/// Application-level failure reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `FaultV1`."),
    bytecheck()
)]
pub struct FaultV1 {
    pub kind: FaultKindV1,
    pub message: String,
}

/// Fault classification carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `FaultKindV1`."),
    bytecheck()
)]
pub enum FaultKindV1 {
    InvalidHandle,
    UnknownConfiguration,
    ConfigurationBusy,
    NoEngine,
    EngineBusy,
    UnknownAction,
    UnknownParam,
    MissingParam,
    UnknownStream,
    OutOfBounds,
    Internal,
}
