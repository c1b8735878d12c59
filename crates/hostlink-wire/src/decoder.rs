//! Incremental frame decoder.
//!
//! TCP delivers bytes in arbitrary pieces. [`FrameDecoder`] buffers them and
//! yields a [`HostMessage`] each time a complete frame has arrived. It never
//! blocks and never consumes bytes that belong to the next frame, so it can
//! be fed one byte at a time or many frames at once.

use bytes::{Buf, BytesMut};

use crate::codec::{self, FrameHeader, FRAME_HEADER_LEN};
use crate::error::WireResult;
use crate::message::HostMessage;

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the 8-byte header.
    AwaitingHeader,
    /// Header consumed; waiting for `body_len` body bytes.
    AwaitingBody { version: i32, body_len: usize },
}

/// Per-connection frame accumulator.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_size,
        }
    }

    /// Append freshly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the decoder sits on a frame boundary.
    pub fn is_awaiting_header(&self) -> bool {
        self.state == DecodeState::AwaitingHeader
    }

    /// Try to complete the next frame.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A body that fails to
    /// decode is dropped and the decoder moves on to the next frame; the
    /// error is frame-local (see [`crate::WireError::is_frame_local`]). A bad
    /// header leaves the stream unsynchronised and the connection should be
    /// closed.
    pub fn next_message(&mut self) -> WireResult<Option<HostMessage>> {
        if self.state == DecodeState::AwaitingHeader {
            if self.buffer.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }
            let mut raw = [0u8; FRAME_HEADER_LEN];
            raw.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
            let header = FrameHeader::parse(raw);
            let body_len = header.checked_body_len(self.max_frame_size)?;
            self.buffer.advance(FRAME_HEADER_LEN);
            self.state = DecodeState::AwaitingBody {
                version: header.version,
                body_len,
            };
        }

        let DecodeState::AwaitingBody { version, body_len } = self.state else {
            return Ok(None);
        };
        if self.buffer.len() < body_len {
            return Ok(None);
        }

        let body = self.buffer.split_to(body_len);
        self.state = DecodeState::AwaitingHeader;
        codec::decode_body(version, &body).map(Some)
    }

    /// Drain every complete frame currently buffered.
    pub fn decode_all(&mut self) -> Vec<WireResult<HostMessage>> {
        let mut out = Vec::new();
        loop {
            match self.next_message() {
                Ok(Some(msg)) => out.push(Ok(msg)),
                Ok(None) => break,
                Err(e) => {
                    let fatal = !e.is_frame_local();
                    out.push(Err(e));
                    if fatal {
                        break;
                    }
                }
            }
        }
        out
    }
}
