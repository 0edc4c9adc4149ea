//! Cross-crate tests for the LMem loopback client.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tcp_e2e;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod wire_faults;
