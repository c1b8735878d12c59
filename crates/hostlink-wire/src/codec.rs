//! Wire codec for host messages.
//!
//! Every frame is an 8-byte big-endian header followed by the body:
//!
//! ```text
//! offset 0: i32 message_version
//! offset 4: i32 body_length
//! offset 8: body_length bytes of MessagePack values:
//!   str  source_host_id
//!   str  target_host_id
//!   int  request_time (epoch millis)
//!   str  request_message_id
//!   bool is_reply
//!   [str reply_message_id]        present iff is_reply
//!   bool has_headers
//!   [map<str, any> headers]       present iff has_headers
//!   bin  content
//! ```
//!
//! The body values are written back to back, not wrapped in an array.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::DateTime;
use rmp::Marker;
use rmpv::Value;
use std::io::ErrorKind;

use crate::error::{WireError, WireResult};
use crate::message::{Headers, HostMessage};

/// Size of the fixed frame header (version + body length).
pub const FRAME_HEADER_LEN: usize = 8;

/// Default maximum body size accepted from the wire (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// The fixed part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: i32,
    pub body_len: i32,
}

impl FrameHeader {
    /// Parse the 8 header bytes.
    pub fn parse(bytes: [u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            version: i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            body_len: i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// The body length as a size, rejecting negative and oversized values.
    pub fn checked_body_len(&self, max_frame_size: usize) -> WireResult<usize> {
        let len = usize::try_from(self.body_len).map_err(|_| WireError::InvalidFrameHeader {
            length: self.body_len,
        })?;
        if len > max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: max_frame_size,
            });
        }
        Ok(len)
    }
}

/// Encode a message into a complete frame (header + body).
pub fn encode_frame(msg: &HostMessage) -> WireResult<Bytes> {
    let body = encode_body(msg)?;
    let body_len = i32::try_from(body.len()).map_err(|_| WireError::FrameTooLarge {
        size: body.len(),
        max: i32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.put_i32(msg.message_version);
    frame.put_i32(body_len);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

/// Encode only the body of a frame.
pub fn encode_body(msg: &HostMessage) -> WireResult<Vec<u8>> {
    msg.validate()?;

    let mut buf = Vec::with_capacity(64 + msg.content.len());
    rmp::encode::write_str(&mut buf, &msg.source_host_id).map_err(encode_err)?;
    rmp::encode::write_str(&mut buf, &msg.target_host_id).map_err(encode_err)?;
    rmp::encode::write_sint(&mut buf, msg.request_time.timestamp_millis()).map_err(encode_err)?;
    rmp::encode::write_str(&mut buf, &msg.request_message_id).map_err(encode_err)?;

    match &msg.reply_message_id {
        Some(reply_id) => {
            rmp::encode::write_bool(&mut buf, true).map_err(encode_err)?;
            rmp::encode::write_str(&mut buf, reply_id).map_err(encode_err)?;
        }
        None => rmp::encode::write_bool(&mut buf, false).map_err(encode_err)?,
    }

    if msg.headers.is_empty() {
        rmp::encode::write_bool(&mut buf, false).map_err(encode_err)?;
    } else {
        rmp::encode::write_bool(&mut buf, true).map_err(encode_err)?;
        let len = u32::try_from(msg.headers.len())
            .map_err(|_| WireError::Encode("too many headers".into()))?;
        rmp::encode::write_map_len(&mut buf, len).map_err(encode_err)?;
        for (key, value) in &msg.headers {
            rmp::encode::write_str(&mut buf, key).map_err(encode_err)?;
            rmpv::encode::write_value(&mut buf, value).map_err(encode_err)?;
        }
    }

    rmp::encode::write_bin(&mut buf, &msg.content).map_err(encode_err)?;
    Ok(buf)
}

/// Decode one complete frame held in memory.
pub fn decode_frame(frame: &[u8]) -> WireResult<HostMessage> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(WireError::Format(format!(
            "frame of {} bytes is shorter than its header",
            frame.len()
        )));
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
    let header = FrameHeader::parse(header);
    let body = &frame[FRAME_HEADER_LEN..];
    let body_len = header.checked_body_len(usize::MAX)?;
    if body_len != body.len() {
        return Err(WireError::Format(format!(
            "header declares {} body bytes, frame carries {}",
            body_len,
            body.len()
        )));
    }
    decode_body(header.version, body)
}

/// Decode a frame body into a message.
///
/// The body must be consumed exactly: running out early or leaving bytes
/// behind is a format error.
pub fn decode_body(version: i32, body: &[u8]) -> WireResult<HostMessage> {
    let mut rd = body;

    let source_host_id = read_string(&mut rd, "source_host_id")?;
    let target_host_id = read_string(&mut rd, "target_host_id")?;
    let millis = read_i64(&mut rd, "request_time")?;
    let request_time = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| WireError::Decode(format!("request_time {millis} out of range")))?;
    let request_message_id = read_string(&mut rd, "request_message_id")?;

    let reply_message_id = if read_bool(&mut rd, "is_reply")? {
        Some(read_string(&mut rd, "reply_message_id")?)
    } else {
        None
    };

    let headers = if read_bool(&mut rd, "has_headers")? {
        read_headers(&mut rd)?
    } else {
        Headers::new()
    };

    let content = match read_value(&mut rd, "content")? {
        Value::Binary(bytes) => Bytes::from(bytes),
        other => return Err(unexpected("content", "binary", &other)),
    };

    if !rd.is_empty() {
        return Err(WireError::Format(format!(
            "{} trailing bytes after content (body length {})",
            rd.len(),
            body.len()
        )));
    }

    let msg = HostMessage {
        source_host_id,
        target_host_id,
        request_time,
        request_message_id,
        reply_message_id,
        headers,
        content,
        message_version: version,
    };
    msg.validate()?;
    Ok(msg)
}

fn read_value(rd: &mut &[u8], field: &str) -> WireResult<Value> {
    check_markers(rd, field)?;
    rmpv::decode::read_value(rd).map_err(|e| match e {
        rmpv::decode::Error::InvalidMarkerRead(ref io)
        | rmpv::decode::Error::InvalidDataRead(ref io)
            if io.kind() == ErrorKind::UnexpectedEof =>
        {
            WireError::Format(format!("body ends before {field} is complete"))
        }
        other => WireError::Decode(format!("{field}: {other}")),
    })
}

/// Walk the markers of the next value and reject the reserved tag `0xc1`,
/// which the value reader would otherwise turn into nil.
///
/// Running out of bytes is left to the value reader, which reports it as a
/// format error.
fn check_markers(buf: &[u8], field: &str) -> WireResult<()> {
    let mut pos = 0usize;
    let mut pending: u64 = 1;
    while pending > 0 {
        let Some(&byte) = buf.get(pos) else {
            return Ok(());
        };
        pending -= 1;
        pos += 1;
        let (skip, children) = match Marker::from_u8(byte) {
            Marker::Reserved => {
                return Err(WireError::Decode(format!(
                    "{field}: reserved marker 0xc1 at offset {}",
                    pos - 1
                )));
            }
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::Null
            | Marker::True
            | Marker::False => (0, 0),
            Marker::U8 | Marker::I8 => (1, 0),
            Marker::U16 | Marker::I16 => (2, 0),
            Marker::U32 | Marker::I32 | Marker::F32 => (4, 0),
            Marker::U64 | Marker::I64 | Marker::F64 => (8, 0),
            Marker::FixStr(n) => (u64::from(n), 0),
            Marker::Str8 | Marker::Bin8 => (read_len(buf, &mut pos, 1), 0),
            Marker::Str16 | Marker::Bin16 => (read_len(buf, &mut pos, 2), 0),
            Marker::Str32 | Marker::Bin32 => (read_len(buf, &mut pos, 4), 0),
            Marker::FixArray(n) => (0, u64::from(n)),
            Marker::Array16 => (0, read_len(buf, &mut pos, 2)),
            Marker::Array32 => (0, read_len(buf, &mut pos, 4)),
            Marker::FixMap(n) => (0, 2 * u64::from(n)),
            Marker::Map16 => (0, 2 * read_len(buf, &mut pos, 2)),
            Marker::Map32 => (0, 2 * read_len(buf, &mut pos, 4)),
            // ext payloads: one type byte plus the data
            Marker::FixExt1 => (2, 0),
            Marker::FixExt2 => (3, 0),
            Marker::FixExt4 => (5, 0),
            Marker::FixExt8 => (9, 0),
            Marker::FixExt16 => (17, 0),
            Marker::Ext8 => (read_len(buf, &mut pos, 1) + 1, 0),
            Marker::Ext16 => (read_len(buf, &mut pos, 2) + 1, 0),
            Marker::Ext32 => (read_len(buf, &mut pos, 4) + 1, 0),
        };
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        pos = pos.saturating_add(skip).min(buf.len());
        pending = pending.saturating_add(children);
    }
    Ok(())
}

/// Big-endian length of `width` bytes at `pos`. A truncated length moves
/// `pos` to the end of the buffer.
fn read_len(buf: &[u8], pos: &mut usize, width: usize) -> u64 {
    match buf.get(*pos..*pos + width) {
        Some(bytes) => {
            *pos += width;
            bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
        }
        None => {
            *pos = buf.len();
            0
        }
    }
}

fn read_string(rd: &mut &[u8], field: &str) -> WireResult<String> {
    match read_value(rd, field)? {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| WireError::Decode(format!("{field}: invalid UTF-8"))),
        other => Err(unexpected(field, "string", &other)),
    }
}

fn read_i64(rd: &mut &[u8], field: &str) -> WireResult<i64> {
    match read_value(rd, field)? {
        Value::Integer(n) => n
            .as_i64()
            .ok_or_else(|| WireError::Decode(format!("{field}: integer does not fit in i64"))),
        other => Err(unexpected(field, "integer", &other)),
    }
}

fn read_bool(rd: &mut &[u8], field: &str) -> WireResult<bool> {
    match read_value(rd, field)? {
        Value::Boolean(b) => Ok(b),
        other => Err(unexpected(field, "bool", &other)),
    }
}

fn read_headers(rd: &mut &[u8]) -> WireResult<Headers> {
    let entries = match read_value(rd, "headers")? {
        Value::Map(entries) => entries,
        other => return Err(unexpected("headers", "map", &other)),
    };
    let mut headers = Headers::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| WireError::Decode("header key: invalid UTF-8".into()))?,
            other => return Err(unexpected("header key", "string", &other)),
        };
        headers.insert(key, value);
    }
    Ok(headers)
}

fn unexpected(field: &str, expected: &str, found: &Value) -> WireError {
    WireError::Decode(format!("{field}: expected {expected}, found {found}"))
}

fn encode_err(e: impl std::fmt::Display) -> WireError {
    WireError::Encode(e.to_string())
}
