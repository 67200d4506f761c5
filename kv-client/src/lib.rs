//! Client-side half of the `kvd` wire protocol: a thin connection wrapper
//! plus a [`ClientDispatcher`] trait callers implement to react to
//! `GET_RESPONSE` messages.
//!
//! Grounded in the reference implementation's `i_client_dispatcher`
//! (`client/client.cpp`): a single callback invoked once per response,
//! free of any connection bookkeeping of its own.

use std::io;
use std::sync::atomic::{AtomicU16, Ordering};

use bytes::Bytes;
use kv_protocol::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Errors surfaced by [`Connection`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] kv_protocol::Error),
}

/// A decoded `GET_RESPONSE`, handed to a [`ClientDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponseView {
    pub request_id: u16,
    pub key: Bytes,
    pub value: Bytes,
    pub reads: u64,
    pub writes: u64,
}

/// Reacts to responses arriving on a [`Connection`]. Implementations are
/// not expected to be thread-safe; a connection drives its dispatcher from
/// a single task.
pub trait ClientDispatcher {
    fn process(&mut self, response: GetResponseView);
}

/// Logs every thousandth response it sees, mirroring the reference
/// implementation's `client_dispatcher::process`.
#[derive(Debug, Default)]
pub struct LoggingDispatcher {
    count: u64,
}

impl ClientDispatcher for LoggingDispatcher {
    fn process(&mut self, response: GetResponseView) {
        self.count += 1;
        if self.count % 1000 == 0 {
            // Keys/values are opaque bytes, not necessarily text; render
            // lossily for the log line only, never for protocol handling.
            tracing::info!(
                processed = self.count,
                key = %String::from_utf8_lossy(&response.key),
                value = %String::from_utf8_lossy(&response.value),
                reads = response.reads,
                writes = response.writes,
                "processed get responses"
            );
        }
    }
}

/// Generates nonzero `request_id` values for outgoing `GET`s. Zero is
/// reserved as invalid by the wire protocol.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicU16,
}

impl RequestIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(1),
        }
    }

    #[must_use]
    pub fn next_id(&self) -> u16 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
            // Wrapped around to zero; fetch_add already advanced past it.
        }
    }
}

/// A connected socket speaking the client side of the protocol: it sends
/// `GET`/`SET` and parses `GET_RESPONSE` frames out of whatever bytes
/// arrive, tolerating arbitrary chunking and pipelining.
pub struct Connection {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Connection {
    /// Connect to `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            buf: Vec::with_capacity(kv_protocol::READ_BUFFER_SIZE),
        })
    }

    /// Send a single message.
    pub async fn send(&mut self, message: &Message) -> io::Result<()> {
        self.stream.write_all(&message.serialize()).await
    }

    /// Read from the socket until at least one complete `GET_RESPONSE`
    /// frame is available, then dispatch every complete frame currently
    /// buffered. Returns the number of responses dispatched.
    pub async fn read_responses<D: ClientDispatcher>(
        &mut self,
        dispatcher: &mut D,
    ) -> Result<usize, Error> {
        let mut read_chunk = [0u8; 64 * 1024];
        loop {
            let dispatched = self.drain_responses(dispatcher)?;
            if dispatched > 0 {
                return Ok(dispatched);
            }
            let n = self.stream.read(&mut read_chunk).await?;
            if n == 0 {
                return Ok(0);
            }
            self.buf.extend_from_slice(&read_chunk[..n]);
        }
    }

    fn drain_responses<D: ClientDispatcher>(
        &mut self,
        dispatcher: &mut D,
    ) -> Result<usize, Error> {
        let mut consumed = 0usize;
        let mut dispatched = 0usize;

        loop {
            let Some(total_size) = kv_protocol::peek_total_size(&self.buf[consumed..]) else {
                break;
            };
            kv_protocol::validate_total_size(total_size)?;
            let total_size = total_size as usize;
            if self.buf.len() - consumed < total_size {
                break;
            }

            let frame = &self.buf[consumed..consumed + total_size];
            if let Message::GetResponse {
                request_id,
                key,
                value,
                reads,
                writes,
            } = kv_protocol::parse_client(frame)?
            {
                dispatcher.process(GetResponseView {
                    request_id,
                    key,
                    value,
                    reads,
                    writes,
                });
                dispatched += 1;
            }
            consumed += total_size;
        }

        if consumed > 0 {
            self.buf.drain(..consumed);
        }
        Ok(dispatched)
    }
}
