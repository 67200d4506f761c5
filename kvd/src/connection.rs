//! Per-socket connection handling.
//!
//! One `tokio::spawn`ed task owns a connection for its entire lifetime: it
//! reads framed requests, dispatches them against the store, and writes
//! framed responses back, in order. There is exactly one write in flight at
//! a time and exactly one read in flight at a time, so no locking is needed
//! around the socket itself.
//!
//! The reference implementation gives each connection a "serialization
//! domain" plus a weak reference back into it from an async read callback,
//! so that a connection torn down mid-read doesn't resurrect itself. A
//! single owning task gets the same guarantee for free: once the task
//! returns, the socket and every buffer it held are dropped, and there is no
//! callback left anywhere to run late.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kv_protocol::{self, Message};
use kv_store::Store;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::dispatcher;
use crate::signals::ShutdownWatch;

/// How long a connection may sit with no bytes read or written before it is
/// closed. Reset on every read and every completed write.
#[derive(Debug, Clone, Copy)]
pub struct IdleTimeout(pub Duration);

impl Default for IdleTimeout {
    fn default() -> Self {
        Self(Duration::from_secs(30))
    }
}

/// Drive a single accepted connection to completion.
///
/// Returns once the peer disconnects, a framing error is encountered, the
/// idle timeout fires, or shutdown is signaled. Errors are logged, not
/// propagated: one misbehaving client must never take down the acceptor.
pub async fn handle(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: Arc<Store>,
    idle_timeout: IdleTimeout,
    mut shutdown: ShutdownWatch,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(kv_protocol::READ_BUFFER_SIZE);
    let mut read_chunk = vec![0u8; 64 * 1024];

    loop {
        let idle = time::sleep_until(Instant::now() + idle_timeout.0);

        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!(%peer, "connection closing: shutdown signaled");
                break;
            }

            () = idle => {
                debug!(%peer, "connection closing: idle timeout");
                break;
            }

            read_result = stream.read(&mut read_chunk) => {
                match read_result {
                    Ok(0) => {
                        debug!(%peer, "connection closing: peer hung up");
                        break;
                    }
                    Ok(n) => {
                        buf.extend_from_slice(&read_chunk[..n]);
                    }
                    Err(e) => {
                        warn!(%peer, error = %e, "read error");
                        break;
                    }
                }
            }
        }

        match drain_messages(&mut buf, &store).await {
            Ok(responses) => {
                for response in responses {
                    // Re-arm the idle timer for every write start, and race the
                    // write itself against it: a peer that stops draining its
                    // receive buffer must not stall this task's `write_all`
                    // forever with nothing bounding it.
                    let idle = time::sleep(idle_timeout.0);
                    tokio::select! {
                        biased;

                        _ = shutdown.recv() => {
                            debug!(%peer, "connection closing: shutdown signaled during write");
                            return;
                        }

                        () = idle => {
                            debug!(%peer, "connection closing: idle timeout during write");
                            return;
                        }

                        write_result = write_message(&mut stream, &response) => {
                            if let Err(e) = write_result {
                                warn!(%peer, error = %e, "write error");
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "framing error, closing connection");
                break;
            }
        }
    }
}

/// Pull every fully-buffered message out of `buf`, dispatch each against
/// `store`, and collect the responses in arrival order. Leaves any trailing
/// partial message in `buf` for the next read to complete.
async fn drain_messages(
    buf: &mut Vec<u8>,
    store: &Arc<Store>,
) -> kv_protocol::Result<Vec<Message>> {
    let mut responses = Vec::new();
    let mut consumed = 0usize;

    loop {
        let Some(total_size) = kv_protocol::peek_total_size(&buf[consumed..]) else {
            break;
        };
        kv_protocol::validate_total_size(total_size)?;
        let total_size = total_size as usize;
        if buf.len() - consumed < total_size {
            break;
        }

        let frame = &buf[consumed..consumed + total_size];
        let message = kv_protocol::parse_server(frame)?;
        trace!(tag = ?message.tag(), "dispatching message");
        if let Some(response) = dispatcher::dispatch(store, message) {
            responses.push(response);
        }
        consumed += total_size;
    }

    if consumed > 0 {
        buf.drain(..consumed);
    }
    Ok(responses)
}

async fn write_message(stream: &mut TcpStream, message: &Message) -> io::Result<()> {
    let bytes = message.serialize();
    stream.write_all(&bytes).await
}
