//! LMem loopback verification client.
//!
//! Drives a remote device service through the `LMemLoopback` configuration:
//! two input blocks are streamed into LMem, summed on the device, read back
//! and compared against a host-side reference. The pieces:
//!
//! - [`DeviceSession`] owns the connection and enforces the session protocol
//!   against a table of live handles.
//! - [`Action`] and the typed presets in [`lmem`] describe device operations.
//! - [`run_loopback`] ties the device half, the reference and the verifier
//!   together and times each step.

pub mod action;
pub mod config;
mod error;
pub mod handles;
pub mod lmem;
pub mod reference;
mod run;
pub mod session;
pub mod timing;
pub mod verify;

pub use action::{Action, ActionBuilder, StreamBinding};
pub use config::LoopbackConfig;
pub use error::{LoopbackError, LoopbackResult};
pub use handles::{HandleClass, HandleKind, HandleState, HandleTable};
pub use lmem::{run_device, LMemLayout, LMemRegion, LoopbackCompute, ReadLMem, WriteLMem};
pub use reference::{generate_inputs, reference_sum};
pub use run::{run_loopback, RunReport};
pub use session::{connect, DeviceSession, RemoteSession, SessionState};
pub use timing::{StepTiming, StepTimings};
pub use verify::{verify, Mismatch, Verification};
