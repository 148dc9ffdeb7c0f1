//! Length-prefixed framing.
//!
//! ```text
//! ┌──────────────────┬────────────────────────────┐
//! │ length: u32 (BE) │ CBOR payload (length bytes)│
//! └──────────────────┴────────────────────────────┘
//! ```
//!
//! TCP delivers a byte stream, not records: one read may carry half a frame
//! or several frames at once. [`FrameDecoder`] buffers whatever arrives and
//! only yields a message once its whole payload is present.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    message::{Message, WireMessage},
};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum payload size (64 KiB).
///
/// Protocol records are a handful of integers; anything near this limit is a
/// corrupt or hostile stream.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Append one framed message to `dst`.
pub fn encode(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&message.to_wire(), &mut payload)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: payload.len(), max: MAX_PAYLOAD_SIZE });
    }

    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(&payload);
    Ok(())
}

/// Encode one framed message into a fresh buffer.
pub fn encode_to_vec(message: &Message) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    encode(message, &mut buf)?;
    Ok(buf.to_vec())
}

fn decode_payload(payload: &[u8]) -> Result<Message> {
    let wire: WireMessage = ciborium::de::from_reader(payload)
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))?;
    Message::from_wire(wire)
}

/// Incremental decoder for a stream of frames.
///
/// Feed bytes with [`FrameDecoder::extend_from_slice`] or by reading straight
/// into [`FrameDecoder::buffer_mut`], then call [`FrameDecoder::decode_next`]
/// until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    /// Buffer that socket reads should append to.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Append received bytes.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A payload error consumes
    /// its frame, so the caller may log it and keep decoding. An error for
    /// which [`ProtocolError::is_fatal`] holds leaves the buffer untouched;
    /// the connection must be dropped.
    pub fn decode_next(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let size = u32::from_be_bytes(prefix) as usize;

        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge { size, max: MAX_PAYLOAD_SIZE });
        }

        let frame_len = LENGTH_PREFIX_SIZE + size;
        if self.buf.len() < frame_len {
            self.buf.reserve(frame_len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buf.split_to(size);
        decode_payload(&payload).map(Some)
    }
}
