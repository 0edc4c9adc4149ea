//! Blocking request/response transport used to reach the remote device service.
//!
//! This crate exposes the foundational pieces of the wire channel:
//! * [`Envelope`] – tag/version header that prefixes every frame.
//! * [`schema`] – rkyv-archived request and response payloads (`CallV1`, `OutcomeV1`).
//! * [`RpcChannel`] / [`TcpChannel`] – synchronous calls over a framed byte stream.
//! * [`TransportError`] – connection, framing and codec failures.

mod channel;
mod codec;
mod error;
mod frame;
pub mod schema;

pub use channel::{serve_stream, ChannelOptions, RpcChannel, TcpChannel};
pub use codec::{decode, encode, Codec};
pub use error::{TransportError, TransportResult};
pub use frame::{read_frame, write_frame, Envelope, ENVELOPE_LEN, MAX_FRAME_BYTES};
pub use schema::*;
