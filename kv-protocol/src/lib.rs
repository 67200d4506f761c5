//! Pure length-framed binary codec for the `kvd` wire protocol.
//!
//! Every message shares a common envelope:
//!
//! ```text
//! total_size : u32   (little-endian, includes these 4 bytes)
//! type       : u8    (0=GET, 1=SET, 2=GET_RESPONSE)
//! payload    : type-specific
//! ```
//!
//! Length-prefixed fields are encoded as a `u32` length followed by that many
//! bytes; there is no padding, and no encoding is assumed or enforced on the
//! bytes themselves. Keys and values are opaque byte strings, not text: this
//! crate never validates or transcodes them, so arbitrary bytes (including
//! invalid UTF-8) round-trip unchanged. This crate does no I/O: it only turns
//! byte slices into [`Message`] values and back.

use std::fmt;

use bytes::Bytes;

/// Largest permitted `total_size`, including the envelope.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024; // 1 MiB

/// Size a connection read buffer must exceed so any single message fits
/// entirely after compaction.
pub const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

/// `total_size` (4 bytes) + `type` (1 byte).
const ENVELOPE_SIZE: u32 = 5;

const TYPE_GET: u8 = 0;
const TYPE_SET: u8 = 1;
const TYPE_GET_RESPONSE: u8 = 2;

/// Sentinel value returned in place of a GET_RESPONSE's `value` when the key
/// is absent. Preserved verbatim for wire compatibility with the reference
/// implementation.
pub const NOT_FOUND: &str = "not found";

/// [`NOT_FOUND`] as the raw bytes actually carried on the wire.
#[must_use]
pub fn not_found_bytes() -> Bytes {
    Bytes::from_static(NOT_FOUND.as_bytes())
}

/// Errors raised while parsing a framed message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Fewer than 4 bytes were supplied; the caller should wait for more.
    #[error("need at least 4 bytes to read total_size, got {0}")]
    Truncated(usize),
    /// `total_size` is smaller than the envelope itself.
    #[error("total_size {0} is smaller than the minimum envelope size (5)")]
    Undersize(u32),
    /// `total_size` exceeds [`MAX_MESSAGE_SIZE`].
    #[error("total_size {0} exceeds the maximum message size ({MAX_MESSAGE_SIZE})")]
    Oversize(u32),
    /// The buffer does not yet contain `total_size` bytes.
    #[error("message claims {expected} bytes but only {found} are available")]
    Incomplete { expected: u32, found: usize },
    /// The `type` tag did not match any known message kind.
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    /// A `request_id` field was zero, which is reserved as invalid.
    #[error("request_id must not be zero")]
    ZeroRequestId,
    /// A length-prefixed field claims more bytes than remain in the message.
    #[error("field of length {0} does not fit in the remaining message bytes")]
    StringTooLong(u32),
    /// A fixed-width field (request_id, reads, writes) ran past the end of
    /// the payload.
    #[error("payload truncated: wanted {expected} more bytes, found {found}")]
    PayloadTruncated { expected: usize, found: usize },
    /// Bytes remained in the framed message after decoding the expected payload.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    /// `parse_server` was asked to decode a GET_RESPONSE, or `parse_client` a
    /// GET/SET; the message was well-formed but not of the expected family.
    #[error("message type {0:?} is not valid in this direction")]
    WrongDirection(Tag),
}

/// The message type tag carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Get,
    Set,
    GetResponse,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tag::Get => "GET",
            Tag::Set => "SET",
            Tag::GetResponse => "GET_RESPONSE",
        };
        f.write_str(s)
    }
}

/// A fully decoded protocol message.
///
/// `key` and `value` are opaque byte strings: the wire format places no
/// constraint on their contents, so they are carried as [`Bytes`] rather than
/// `String` and are never validated as (or transcoded to) UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client request to read a key. `request_id` is echoed back verbatim.
    Get { key: Bytes, request_id: u16 },
    /// Client request to write a key.
    Set { key: Bytes, value: Bytes },
    /// Server response to a `Get`.
    GetResponse {
        key: Bytes,
        request_id: u16,
        reads: u64,
        writes: u64,
        value: Bytes,
    },
}

impl Message {
    /// The wire type tag for this message.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Message::Get { .. } => Tag::Get,
            Message::Set { .. } => Tag::Set,
            Message::GetResponse { .. } => Tag::GetResponse,
        }
    }

    /// Serialize this message into a fresh, fully-framed byte vector.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let type_tag = match self {
            Message::Get { key, request_id } => {
                put_bytes(&mut body, key);
                body.extend_from_slice(&request_id.to_le_bytes());
                TYPE_GET
            }
            Message::Set { key, value } => {
                put_bytes(&mut body, key);
                put_bytes(&mut body, value);
                TYPE_SET
            }
            Message::GetResponse {
                key,
                request_id,
                reads,
                writes,
                value,
            } => {
                put_bytes(&mut body, key);
                body.extend_from_slice(&request_id.to_le_bytes());
                body.extend_from_slice(&reads.to_le_bytes());
                body.extend_from_slice(&writes.to_le_bytes());
                put_bytes(&mut body, value);
                TYPE_GET_RESPONSE
            }
        };

        let total_size = ENVELOPE_SIZE as usize + body.len();
        let mut out = Vec::with_capacity(total_size);
        out.extend_from_slice(&(total_size as u32).to_le_bytes());
        out.push(type_tag);
        out.extend_from_slice(&body);
        out
    }
}

/// Parse a single framed message as sent by a client (GET or SET).
///
/// `buf` must contain exactly one framed message: `total_size` bytes,
/// nothing more and nothing less. Use [`peek_total_size`] against a
/// connection's read buffer to find message boundaries first.
pub fn parse_server(buf: &[u8]) -> Result<Message> {
    let (tag, payload) = decode_envelope(buf)?;
    match tag {
        Tag::Get => parse_get(payload).map(|(key, request_id)| Message::Get { key, request_id }),
        Tag::Set => parse_set(payload).map(|(key, value)| Message::Set { key, value }),
        Tag::GetResponse => Err(Error::WrongDirection(tag)),
    }
}

/// Parse a single framed message as sent by the server (GET_RESPONSE).
pub fn parse_client(buf: &[u8]) -> Result<Message> {
    let (tag, payload) = decode_envelope(buf)?;
    match tag {
        Tag::GetResponse => parse_get_response(payload),
        Tag::Get | Tag::Set => Err(Error::WrongDirection(tag)),
    }
}

/// Inspect the leading 4 bytes of `buf` and return the `total_size` they
/// encode, without validating or consuming anything else. Returns `None` if
/// fewer than 4 bytes are available.
#[must_use]
pub fn peek_total_size(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[..4]);
    Some(u32::from_le_bytes(raw))
}

/// Validate a `total_size` value read from an envelope against the protocol
/// bounds, independent of whether the bytes have arrived yet.
pub fn validate_total_size(total_size: u32) -> Result<()> {
    if total_size < ENVELOPE_SIZE {
        return Err(Error::Undersize(total_size));
    }
    if total_size > MAX_MESSAGE_SIZE {
        return Err(Error::Oversize(total_size));
    }
    Ok(())
}

fn decode_envelope(buf: &[u8]) -> Result<(Tag, &[u8])> {
    let total_size = peek_total_size(buf).ok_or(Error::Truncated(buf.len()))?;
    validate_total_size(total_size)?;
    if (buf.len() as u64) < u64::from(total_size) {
        return Err(Error::Incomplete {
            expected: total_size,
            found: buf.len(),
        });
    }
    let framed = &buf[..total_size as usize];
    let type_byte = framed[4];
    let tag = match type_byte {
        TYPE_GET => Tag::Get,
        TYPE_SET => Tag::Set,
        TYPE_GET_RESPONSE => Tag::GetResponse,
        other => return Err(Error::UnknownType(other)),
    };
    Ok((tag, &framed[5..]))
}

fn parse_get(payload: &[u8]) -> Result<(Bytes, u16)> {
    let mut cursor = Cursor::new(payload);
    let key = cursor.take_bytes()?;
    let request_id = cursor.take_u16()?;
    cursor.finish()?;
    if request_id == 0 {
        return Err(Error::ZeroRequestId);
    }
    Ok((key, request_id))
}

fn parse_set(payload: &[u8]) -> Result<(Bytes, Bytes)> {
    let mut cursor = Cursor::new(payload);
    let key = cursor.take_bytes()?;
    let value = cursor.take_bytes()?;
    cursor.finish()?;
    Ok((key, value))
}

fn parse_get_response(payload: &[u8]) -> Result<Message> {
    let mut cursor = Cursor::new(payload);
    let key = cursor.take_bytes()?;
    let request_id = cursor.take_u16()?;
    let reads = cursor.take_u64()?;
    let writes = cursor.take_u64()?;
    let value = cursor.take_bytes()?;
    cursor.finish()?;
    if request_id == 0 {
        return Err(Error::ZeroRequestId);
    }
    Ok(Message::GetResponse {
        key,
        request_id,
        reads,
        writes,
        value,
    })
}

fn put_bytes(out: &mut Vec<u8>, s: &[u8]) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s);
}

/// A minimal cursor over a payload slice, tracking consumed bytes so callers
/// can assert no trailing bytes remain.
struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::PayloadTruncated {
                expected: n,
                found: self.remaining(),
            });
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn take_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw))
    }

    fn take_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    fn take_bytes(&mut self) -> Result<Bytes> {
        let len = self.take_u32()?;
        if (len as usize) > self.remaining() {
            return Err(Error::StringTooLong(len));
        }
        let bytes = self.take(len as usize)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let bytes = msg.serialize();
        let decoded = match msg.tag() {
            Tag::GetResponse => parse_client(&bytes).expect("parse_client"),
            Tag::Get | Tag::Set => parse_server(&bytes).expect("parse_server"),
        };
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_get() {
        roundtrip(Message::Get {
            key: Bytes::from_static(b"foo"),
            request_id: 7,
        });
    }

    #[test]
    fn round_trips_set() {
        roundtrip(Message::Set {
            key: Bytes::from_static(b"foo"),
            value: Bytes::from_static(b"bar"),
        });
    }

    #[test]
    fn round_trips_get_response() {
        roundtrip(Message::GetResponse {
            key: Bytes::from_static(b"foo"),
            request_id: 7,
            reads: 1,
            writes: 1,
            value: Bytes::from_static(b"bar"),
        });
    }

    #[test]
    fn round_trips_empty_strings() {
        roundtrip(Message::Set {
            key: Bytes::new(),
            value: Bytes::new(),
        });
    }

    #[test]
    fn round_trips_non_utf8_value() {
        // Entry values are opaque bytes, not text: a value containing an
        // invalid UTF-8 byte sequence must survive the round trip unchanged
        // rather than being replaced with U+FFFD.
        roundtrip(Message::Set {
            key: Bytes::from_static(b"binary"),
            value: Bytes::from_static(&[0xFF, 0x00, 0xFE, b'a', 0xC0]),
        });
    }

    #[test]
    fn envelope_total_size_matches_serialized_length() {
        let bytes = Message::Set {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        }
        .serialize();
        let total_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(total_size as usize, bytes.len());
    }

    #[test]
    fn rejects_truncated_header() {
        assert_eq!(parse_server(&[0, 1]), Err(Error::Truncated(2)));
    }

    #[test]
    fn rejects_undersize_total_size() {
        // total_size = 4, which is below the 5-byte envelope minimum.
        let bytes = 4u32.to_le_bytes().to_vec();
        assert_eq!(parse_server(&bytes), Err(Error::Undersize(4)));
    }

    #[test]
    fn rejects_oversize_total_size() {
        let total_size = MAX_MESSAGE_SIZE + 1;
        let mut bytes = total_size.to_le_bytes().to_vec();
        bytes.push(TYPE_GET);
        assert_eq!(parse_server(&bytes), Err(Error::Oversize(total_size)));
    }

    #[test]
    fn rejects_incomplete_message() {
        let full = Message::Set {
            key: Bytes::from_static(b"longer-key"),
            value: Bytes::from_static(b"longer-value"),
        }
        .serialize();
        let partial = &full[..full.len() - 1];
        assert!(matches!(
            parse_server(partial),
            Err(Error::Incomplete { .. })
        ));
    }

    #[test]
    fn rejects_zero_request_id_in_get() {
        let mut bytes = Message::Get {
            key: Bytes::from_static(b"k"),
            request_id: 1,
        }
        .serialize();
        // request_id is the last two bytes of a GET payload.
        let len = bytes.len();
        bytes[len - 2] = 0;
        bytes[len - 1] = 0;
        assert_eq!(parse_server(&bytes), Err(Error::ZeroRequestId));
    }

    #[test]
    fn rejects_zero_request_id_in_get_response() {
        let mut bytes = Message::GetResponse {
            key: Bytes::from_static(b"k"),
            request_id: 1,
            reads: 0,
            writes: 0,
            value: Bytes::from_static(b"v"),
        }
        .serialize();
        // request_id immediately follows the key string in the payload.
        let request_id_offset = 5 + 4 + 1; // envelope + key len prefix + key byte
        bytes[request_id_offset] = 0;
        bytes[request_id_offset + 1] = 0;
        assert_eq!(parse_client(&bytes), Err(Error::ZeroRequestId));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        let mut bytes = Message::Get {
            key: Bytes::from_static(b"k"),
            request_id: 1,
        }
        .serialize();
        bytes[4] = 99;
        assert_eq!(parse_server(&bytes), Err(Error::UnknownType(99)));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut bytes = Message::Set {
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        }
        .serialize();
        bytes.push(0xFF);
        // Fix up total_size to match the new (corrupted) length so the
        // envelope itself still parses; the trailing byte should still be
        // rejected once the payload is fully consumed.
        let new_len = bytes.len() as u32;
        bytes[0..4].copy_from_slice(&new_len.to_le_bytes());
        assert_eq!(parse_server(&bytes), Err(Error::TrailingBytes(1)));
    }

    #[test]
    fn rejects_wrong_direction() {
        let response = Message::GetResponse {
            key: Bytes::from_static(b"k"),
            request_id: 1,
            reads: 0,
            writes: 0,
            value: Bytes::from_static(b"v"),
        }
        .serialize();
        assert_eq!(
            parse_server(&response),
            Err(Error::WrongDirection(Tag::GetResponse))
        );
    }

    /// Feed `stream` through a framing loop one `chunk_size`-byte slice at a
    /// time and return every message it yields, in arrival order.
    fn deliver_in_chunks(stream: &[u8], chunk_size: usize) -> Vec<Message> {
        let mut delivered = Vec::new();
        let mut buf: Vec<u8> = Vec::new();
        let mut offset = 0;
        while offset < stream.len() {
            let end = (offset + chunk_size).min(stream.len());
            buf.extend_from_slice(&stream[offset..end]);
            offset = end;

            loop {
                let Some(total_size) = peek_total_size(&buf) else {
                    break;
                };
                if validate_total_size(total_size).is_err() {
                    break;
                }
                if buf.len() < total_size as usize {
                    break;
                }
                let framed: Vec<u8> = buf.drain(..total_size as usize).collect();
                delivered.push(parse_server(&framed).expect("valid message"));
            }
        }
        delivered
    }

    #[test]
    fn framing_resilient_to_arbitrary_chunking() {
        // Two pipelined messages delivered as one contiguous byte stream.
        let mut stream = Message::Set {
            key: Bytes::from_static(b"a"),
            value: Bytes::from_static(b"1"),
        }
        .serialize();
        stream.extend(
            Message::Get {
                key: Bytes::from_static(b"a"),
                request_id: 5,
            }
            .serialize(),
        );

        for chunk_size in 1..=stream.len() {
            assert_eq!(
                deliver_in_chunks(&stream, chunk_size),
                vec![
                    Message::Set {
                        key: Bytes::from_static(b"a"),
                        value: Bytes::from_static(b"1"),
                    },
                    Message::Get {
                        key: Bytes::from_static(b"a"),
                        request_id: 5,
                    },
                ]
            );
        }
    }

    #[test]
    fn framing_resilient_to_random_binary_payloads_and_chunking() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0xC0FFEE);

        for _ in 0..200 {
            let message_count = rng.gen_range(1..=4);
            let mut messages = Vec::with_capacity(message_count);
            let mut stream = Vec::new();
            for _ in 0..message_count {
                let key: Vec<u8> = (0..rng.gen_range(0..32)).map(|_| rng.gen()).collect();
                let msg = if rng.gen_bool(0.5) {
                    Message::Get {
                        key: Bytes::from(key),
                        request_id: rng.gen_range(1..=u16::MAX),
                    }
                } else {
                    let value: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
                    Message::Set {
                        key: Bytes::from(key),
                        value: Bytes::from(value),
                    }
                };
                stream.extend(msg.serialize());
                messages.push(msg);
            }

            let chunk_size = rng.gen_range(1..=stream.len().max(1));
            assert_eq!(deliver_in_chunks(&stream, chunk_size), messages);
        }
    }
}
