//! Synchronous request/response channel over a framed byte stream.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use crate::codec::{decode, encode};
use crate::frame::{read_frame, write_frame, Envelope};
use crate::schema::{CallV1, OutcomeV1, RequestV1, ResponseV1, SCHEMA_VERSION_V1, TAG_CALL, TAG_OUTCOME};
use crate::{TransportError, TransportResult};

const CALL_ENVELOPE: Envelope = Envelope::new(TAG_CALL, SCHEMA_VERSION_V1);
const OUTCOME_ENVELOPE: Envelope = Envelope::new(TAG_OUTCOME, SCHEMA_VERSION_V1);

/// Blocking request/response channel.
///
/// Each call is sent and answered before the next one is issued; there is no
/// pipelining and no retry.
pub trait RpcChannel {
    /// Sends `call` and blocks until its outcome arrives.
    fn call(&mut self, call: CallV1) -> TransportResult<OutcomeV1>;

    /// Closes the channel. Further calls fail with [`TransportError::Closed`].
    fn close(&mut self) -> TransportResult<()>;
}

impl<C: RpcChannel + ?Sized> RpcChannel for Box<C> {
    fn call(&mut self, call: CallV1) -> TransportResult<OutcomeV1> {
        (**self).call(call)
    }

    fn close(&mut self) -> TransportResult<()> {
        (**self).close()
    }
}

/// Socket timeouts applied when opening a [`TcpChannel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Upper bound for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Read/write timeout per call; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// [`RpcChannel`] over a TCP stream.
pub struct TcpChannel {
    stream: TcpStream,
    next_seq: u64,
    closed: bool,
}

impl TcpChannel {
    /// Connects to `host:port`, trying every resolved address in order.
    pub fn connect(host: &str, port: u16, options: &ChannelOptions) -> TransportResult<Self> {
        let addr = format!("{host}:{port}");
        let resolved = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
        for candidate in resolved {
            match TcpStream::connect_timeout(&candidate, options.connect_timeout) {
                Ok(stream) => {
                    debug!(%candidate, "channel connected");
                    return Self::from_stream(stream, options).map_err(|source| {
                        TransportError::Connect {
                            addr: addr.clone(),
                            source,
                        }
                    });
                }
                Err(err) => {
                    trace!(%candidate, error = %err, "connect attempt failed");
                    last_err = err;
                }
            }
        }

        Err(TransportError::Connect {
            addr,
            source: last_err,
        })
    }

    fn from_stream(stream: TcpStream, options: &ChannelOptions) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(options.io_timeout)?;
        stream.set_write_timeout(options.io_timeout)?;
        Ok(Self {
            stream,
            next_seq: 0,
            closed: false,
        })
    }
}

impl RpcChannel for TcpChannel {
    fn call(&mut self, call: CallV1) -> TransportResult<OutcomeV1> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        let payload = encode(&RequestV1 { seq, call })?;
        write_frame(&mut self.stream, CALL_ENVELOPE, &payload)?;

        let (envelope, payload) = read_frame(&mut self.stream)?;
        ensure_envelope(envelope, TAG_OUTCOME)?;
        let response: ResponseV1 = decode(&payload)?;
        if response.seq != seq {
            return Err(TransportError::Desync {
                expected: seq,
                got: response.seq,
            });
        }
        Ok(response.outcome)
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer may already have hung up.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }
}

/// Answers calls arriving on `stream` until the peer closes it.
///
/// Returns the number of calls served. `handler` sees calls strictly in the
/// order they were sent.
pub fn serve_stream<S, F>(stream: &mut S, mut handler: F) -> TransportResult<u64>
where
    S: Read + Write,
    F: FnMut(CallV1) -> OutcomeV1,
{
    let mut served = 0;
    loop {
        let (envelope, payload) = match read_frame(stream) {
            Ok(frame) => frame,
            Err(TransportError::Closed) => return Ok(served),
            Err(err) => return Err(err),
        };
        ensure_envelope(envelope, TAG_CALL)?;
        let request: RequestV1 = decode(&payload)?;
        let outcome = handler(request.call);
        let reply = encode(&ResponseV1 {
            seq: request.seq,
            outcome,
        })?;
        write_frame(stream, OUTCOME_ENVELOPE, &reply)?;
        served += 1;
    }
}

fn ensure_envelope(envelope: Envelope, expected: u8) -> TransportResult<()> {
    if envelope.tag != expected || envelope.ver != SCHEMA_VERSION_V1 {
        return Err(TransportError::UnexpectedEnvelope {
            tag: envelope.tag,
            ver: envelope.ver,
            expected,
        });
    }
    Ok(())
}
