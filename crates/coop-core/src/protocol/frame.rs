//! Length-prefixed wire framing.
//!
//! Wire format:
//!
//! ```text
//! [magic:8]["DDECPRT\0"] [length:8][u64, network byte order] [body:length]
//! ```
//!
//! [`FrameCodec`] implements [`tokio_util::codec::Decoder`] and
//! [`tokio_util::codec::Encoder`], so the read buffer with peek/consume
//! semantics is a [`bytes::BytesMut`] driven by `Framed`. The decoder
//! contract maps the protocol's frame outcomes one-to-one:
//!
//! - `Ok(None)` — PARTIAL: fewer bytes buffered than header, or than
//!   header + declared length. Non-fatal; the reader accumulates more bytes
//!   and retries. Nothing is consumed.
//! - `Ok(Some(msg))` — a complete frame was consumed and parsed.
//! - `Err(FrameError)` — ILLEGAL: bad magic or an absurd declared length.
//!   Terminal for the connection; the caller closes it.
//!
//! Body parsing is total: a body that fails protobuf decoding yields the
//! default (payload-less) message, which the session dispatcher's fallback
//! arm turns into connection teardown. Frame-level errors therefore stay
//! strictly about the header.

use bytes::{Buf, BufMut, BytesMut};
use prost::Message as _;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::messages::{HEADER_SIZE, MAGIC, MAX_FRAME_LEN};

/// Errors that terminate a connection (or invalidate a datagram).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The first 8 bytes do not match the frame magic.
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 8]),

    /// The header declares a body larger than [`MAX_FRAME_LEN`].
    #[error("declared frame length {0} exceeds the {MAX_FRAME_LEN} byte cap")]
    Oversized(u64),

    /// A datagram was shorter than its header declared. Only produced by
    /// [`decode_datagram`]; on a stream this situation is PARTIAL instead.
    #[error("truncated datagram: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Transport-level I/O failure surfaced through the codec.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

/// Codec for any prost message framed with magic + u64 length.
///
/// The session transport instantiates it as `FrameCodec<Message>`; discovery
/// reuses the same framing for `Beacon` datagrams.
pub struct FrameCodec<M> {
    _marker: std::marker::PhantomData<M>,
}

impl<M> FrameCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<M> Default for FrameCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: prost::Message + Default> Decoder for FrameCodec<M> {
    type Item = M;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<M>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek the header without consuming; a partial body must leave the
        // buffer untouched so the next read appends behind it.
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&src[..8]);
        if magic != MAGIC {
            return Err(FrameError::BadMagic(magic));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&src[8..HEADER_SIZE]);
        let body_len = u64::from_be_bytes(len_bytes);
        if body_len > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(body_len));
        }

        let body_len = body_len as usize;
        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len);
        // Total body parse: protobuf failures fall back to the default
        // message, whose missing payload the dispatcher rejects.
        Ok(Some(M::decode(&body[..]).unwrap_or_default()))
    }
}

impl<M: prost::Message> Encoder<M> for FrameCodec<M> {
    type Error = FrameError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = item.encode_to_vec();
        dst.reserve(HEADER_SIZE + body.len());
        dst.put_slice(&MAGIC);
        dst.put_u64(body.len() as u64);
        dst.put_slice(&body);
        Ok(())
    }
}

// ── Datagram helpers ──────────────────────────────────────────────────────────

/// Encodes one message as a standalone framed datagram (UDP beacons).
pub fn encode_datagram<M: prost::Message>(msg: &M) -> Vec<u8> {
    let body = msg.encode_to_vec();
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decodes one framed datagram. Datagrams are atomic, so a short buffer is an
/// error here rather than PARTIAL.
pub fn decode_datagram<M: prost::Message + Default>(bytes: &[u8]) -> Result<M, FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let mut magic = [0u8; 8];
    magic.copy_from_slice(&bytes[..8]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..HEADER_SIZE]);
    let body_len = u64::from_be_bytes(len_bytes);
    if body_len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(body_len));
    }

    let needed = HEADER_SIZE + body_len as usize;
    if bytes.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    Ok(M::decode(&bytes[HEADER_SIZE..needed]).unwrap_or_default())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
