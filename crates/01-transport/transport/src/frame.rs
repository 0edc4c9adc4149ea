//! Length-prefixed frames carried over a byte stream.
//!
//! Layout:
//!
//! ```text
//! +-----------------+--------------------------------+---------------------------+
//! | u32 body_len LE | Envelope (8 bytes)             | rkyv archived payload ... |
//! +-----------------+--------------------------------+---------------------------+
//!                     [u8 tag][u8 ver][u16 flags LE][u32 reserved]
//! ```
//!
//! `body_len` counts the envelope plus the payload. Payloads are copied into an
//! [`AlignedVec`] on read so they can be validated in place by rkyv.

use std::io::{self, Read, Write};

use rkyv::util::AlignedVec;

use crate::{TransportError, TransportResult};

/// Size of the envelope that precedes every payload.
pub const ENVELOPE_LEN: usize = 8;
/// Largest frame body accepted by [`read_frame`].
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Metadata stored alongside each payload.
///
/// The envelope allows readers to identify the serialized type (`tag`),
/// enforce schema compatibility (`ver`), and carry lightweight bitflags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Application-defined discriminant used to select the rkyv schema.
    pub tag: u8,
    /// Schema epoch associated with this payload.
    pub ver: u8,
    /// Reserved bitflags that travel with the payload.
    pub flags: u16,
}

impl Envelope {
    /// Constructs an envelope with the given tag and schema version.
    pub const fn new(tag: u8, ver: u8) -> Self {
        Self { tag, ver, flags: 0 }
    }

    fn to_bytes(self) -> [u8; ENVELOPE_LEN] {
        let flags = self.flags.to_le_bytes();
        [self.tag, self.ver, flags[0], flags[1], 0, 0, 0, 0]
    }

    fn from_bytes(bytes: [u8; ENVELOPE_LEN]) -> Self {
        Self {
            tag: bytes[0],
            ver: bytes[1],
            flags: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}

/// Writes one frame and flushes the writer.
pub fn write_frame<W: Write>(writer: &mut W, envelope: Envelope, payload: &[u8]) -> TransportResult<()> {
    let body_len = ENVELOPE_LEN + payload.len();
    if body_len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len: body_len,
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX + body_len);
    frame.extend_from_slice(&(body_len as u32).to_le_bytes());
    frame.extend_from_slice(&envelope.to_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame, returning its envelope and an aligned copy of the payload.
///
/// A stream that ends before the length prefix yields [`TransportError::Closed`].
pub fn read_frame<R: Read>(reader: &mut R) -> TransportResult<(Envelope, AlignedVec)> {
    let mut prefix = [0u8; LEN_PREFIX];
    reader.read_exact(&mut prefix).map_err(eof_as_closed)?;
    let body_len = u32::from_le_bytes(prefix) as usize;
    if body_len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            len: body_len,
            limit: MAX_FRAME_BYTES,
        });
    }
    if body_len < ENVELOPE_LEN {
        return Err(TransportError::codec(format!(
            "frame body of {body_len} bytes is shorter than the envelope"
        )));
    }

    let mut header = [0u8; ENVELOPE_LEN];
    reader.read_exact(&mut header).map_err(eof_as_closed)?;
    let envelope = Envelope::from_bytes(header);

    let mut body = vec![0u8; body_len - ENVELOPE_LEN];
    reader.read_exact(&mut body).map_err(eof_as_closed)?;
    let mut payload = AlignedVec::with_capacity(body.len());
    payload.extend_from_slice(&body);
    Ok((envelope, payload))
}

fn eof_as_closed(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TransportError::Closed
    } else {
        TransportError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_carries_envelope_and_payload() {
        let mut wire = Vec::new();
        let envelope = Envelope {
            tag: 0x11,
            ver: 1,
            flags: 0xBEEF,
        };
        write_frame(&mut wire, envelope, &[1, 2, 3]).expect("write frame");
        assert_eq!(wire.len(), LEN_PREFIX + ENVELOPE_LEN + 3);

        let (read_env, payload) = read_frame(&mut Cursor::new(wire)).expect("read frame");
        assert_eq!(read_env, envelope);
        assert_eq!(payload.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn empty_stream_reports_closed() {
        let err = read_frame(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn truncated_body_reports_closed() {
        let mut wire = Vec::new();
        write_frame(&mut wire, Envelope::new(1, 1), &[9; 16]).expect("write frame");
        wire.truncate(wire.len() - 4);
        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        let wire = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes().to_vec();
        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { .. }));
    }

    #[test]
    fn body_shorter_than_envelope_is_codec_error() {
        let wire = 3u32.to_le_bytes().to_vec();
        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
    }

    mod prop {
        use super::*;
        use proptest::collection;
        use proptest::prelude::*;

        proptest! {
            /// Back-to-back frames on one stream come out whole and in order.
            #[test]
            fn consecutive_frames_stay_delimited(
                bodies in collection::vec(collection::vec(any::<u8>(), 0..64), 1..16)
            ) {
                let mut wire = Vec::new();
                for (i, body) in bodies.iter().enumerate() {
                    write_frame(&mut wire, Envelope::new(i as u8, 1), body).expect("write frame");
                }
                let mut cursor = Cursor::new(wire);
                for (i, body) in bodies.iter().enumerate() {
                    let (envelope, payload) = read_frame(&mut cursor).expect("read frame");
                    prop_assert_eq!(envelope.tag, i as u8);
                    prop_assert_eq!(payload.as_slice(), body.as_slice());
                }
                prop_assert!(matches!(read_frame(&mut cursor), Err(TransportError::Closed)));
            }
        }
    }
}
