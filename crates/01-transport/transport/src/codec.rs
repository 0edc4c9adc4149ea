use rkyv::{
    api::high::{HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize, Serialize,
};

use crate::schema::{CallV1, OutcomeV1};
use crate::{TransportError, TransportResult};

/// Maps typed commands and reports onto the wire schema.
///
/// Client and service share one codec: the client encodes commands and
/// decodes outcomes, the service does the reverse.
pub trait Codec: Clone + Send + Sync + 'static {
    type Cmd: Send + 'static;
    type Rep: Send + 'static;
    type Fault: Send + 'static;

    fn encode_cmd(&self, cmd: Self::Cmd) -> CallV1;
    fn decode_cmd(&self, call: CallV1) -> Self::Cmd;
    fn encode_rep(&self, rep: Result<Self::Rep, Self::Fault>) -> OutcomeV1;
    fn decode_rep(&self, outcome: OutcomeV1) -> Result<Self::Rep, Self::Fault>;
}

/// Serializes a schema value into an aligned byte buffer.
pub fn encode<T>(value: &T) -> TransportResult<AlignedVec>
where
    T: Archive,
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    rkyv::to_bytes::<Error>(value)
        .map_err(|err| TransportError::codec(format!("serialize failure: {err}")))
}

/// Validates and deserializes a schema value. `payload` must be 16-byte aligned.
pub fn decode<T>(payload: &[u8]) -> TransportResult<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, HighDeserializer<Error>>,
{
    rkyv::from_bytes::<T, Error>(payload)
        .map_err(|err| TransportError::codec(format!("validation failure: {err}")))
}
