//! Simulated device service hosting the `LMemLoopback` configuration.
//!
//! [`SimDevice`] answers the same calls a remote accelerator service would:
//! it owns buffers, a byte-addressed LMem, one engine, and the three actions
//! the configuration defines (`writeLMem`, `readLMem`, `default`). It is used
//! in-process by tests and served over TCP by [`SimServer`].

mod device;
mod server;

pub use device::{
    SimConfig, SimDevice, CONFIGURATION_NAME, DEFAULT_LMEM_BYTES, ENGINE_ID, MAX_BUFFER_ELEMENTS,
};
pub use server::SimServer;
