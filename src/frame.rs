//! Inbound frame slicing.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// tag + length
const HEADER: usize = 5;

/// One tagged, length-prefixed backend message.
///
/// Wire layout is `tag:u8 ‖ length:u32_be ‖ payload[length−4]`, where
/// `length` includes itself but not the tag.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self { tag, payload: payload.into() }
    }

    /// Append the wire encoding of this frame to `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER + self.payload.len());
        buf.put_u8(self.tag);
        buf.put_u32(4 + self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }
}

#[derive(Clone, Copy)]
enum State {
    /// Accumulating the 5-byte `(tag, length)` header.
    Header,
    /// Accumulating `need` payload bytes.
    Payload { tag: u8, need: usize },
}

/// Reassembles frames out of arbitrarily sized read chunks.
///
/// Frame boundaries do not align with read boundaries: one chunk may
/// complete several frames and leave a partial header behind. The residual
/// stays buffered until later chunks complete it.
pub struct Slicer {
    buf: BytesMut,
    state: State,
}

impl Slicer {
    pub fn new() -> Self {
        Self { buf: BytesMut::new(), state: State::Header }
    }

    /// Feed one read chunk.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if the buffered bytes hold one.
    ///
    /// `Ok(None)` means more bytes are needed. A malformed length is fatal:
    /// no further frame can be located in the stream.
    pub fn next(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.state {
                State::Header => {
                    if self.buf.len() < HEADER {
                        return Ok(None);
                    }
                    let mut header = &self.buf[..HEADER];
                    let tag = header.get_u8();
                    let len = header.get_u32();
                    if len < 4 {
                        return Err(ProtocolError::MalformedLength { len });
                    }
                    self.buf.advance(HEADER);
                    let need = len as usize - 4;
                    if need == 0 {
                        return Ok(Some(Frame { tag, payload: Bytes::new() }));
                    }
                    self.state = State::Payload { tag, need };
                }
                State::Payload { tag, need } => {
                    if self.buf.len() < need {
                        return Ok(None);
                    }
                    let payload = self.buf.split_to(need).freeze();
                    self.state = State::Header;
                    return Ok(Some(Frame { tag, payload }));
                }
            }
        }
    }
}
