//! Host message model.
//!
//! A [`HostMessage`] is the unit exchanged between two hosts. Its body is
//! schema-less: besides the routing fields it carries a map of dynamic
//! header values and an opaque content blob.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rmpv::Value;
use std::collections::BTreeMap;

use crate::error::{WireError, WireResult};

/// Current wire format version, written in every frame header.
pub const PROTOCOL_VERSION: i32 = 1;

/// Dynamic header map carried by a message.
pub type Headers = BTreeMap<String, Value>;

/// A message exchanged between two hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMessage {
    /// ID of the host that produced the message.
    pub source_host_id: String,
    /// ID of the host the message is addressed to.
    pub target_host_id: String,
    /// When the message was created (millisecond precision on the wire).
    pub request_time: DateTime<Utc>,
    /// Unique ID of the originating send.
    pub request_message_id: String,
    /// The request this message answers. `Some` iff the message is a reply.
    pub reply_message_id: Option<String>,
    /// Dynamic headers. Empty and absent are the same thing.
    pub headers: Headers,
    /// Opaque payload.
    pub content: Bytes,
    /// Wire format version, carried in the frame header.
    pub message_version: i32,
}

impl HostMessage {
    /// Create a new request from `source` to `target` with a fresh request ID.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            source_host_id: source.into(),
            target_host_id: target.into(),
            request_time: now_millis(),
            request_message_id: uuid::Uuid::new_v4().to_string(),
            reply_message_id: None,
            headers: Headers::new(),
            content: content.into(),
            message_version: PROTOCOL_VERSION,
        }
    }

    /// Build the reply to `request`, addressed back to its source.
    pub fn reply(request: &HostMessage, content: impl Into<Bytes>) -> Self {
        let mut reply = Self::new(
            request.target_host_id.clone(),
            request.source_host_id.clone(),
            content,
        );
        reply.reply_message_id = Some(request.request_message_id.clone());
        reply.message_version = request.message_version;
        reply
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.message_version = version;
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_message_id = id.into();
        self
    }

    /// Set the request time, truncated to whole milliseconds.
    pub fn with_request_time(mut self, time: DateTime<Utc>) -> Self {
        self.request_time = truncate_millis(time);
        self
    }

    /// A copy of this message addressed to another host.
    pub fn retarget(&self, target: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.target_host_id = target.into();
        copy
    }

    /// Whether this message answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.reply_message_id.is_some()
    }

    /// Whether this message answers the request with the given ID.
    pub fn is_reply_to(&self, request_message_id: &str) -> bool {
        self.reply_message_id.as_deref() == Some(request_message_id)
    }

    /// Check the message invariants. `request_time` must be whole
    /// milliseconds, the precision the wire carries; use
    /// [`with_request_time`](Self::with_request_time) to truncate.
    pub fn validate(&self) -> WireResult<()> {
        if self.source_host_id.is_empty() {
            return Err(WireError::InvalidMessage("empty source host id".into()));
        }
        if self.target_host_id.is_empty() {
            return Err(WireError::InvalidMessage("empty target host id".into()));
        }
        if self.request_message_id.is_empty() {
            return Err(WireError::InvalidMessage("empty request message id".into()));
        }
        if matches!(self.reply_message_id.as_deref(), Some("")) {
            return Err(WireError::InvalidMessage("empty reply message id".into()));
        }
        if self.request_time.timestamp_subsec_nanos() % 1_000_000 != 0 {
            return Err(WireError::InvalidMessage(format!(
                "request_time {} is finer than milliseconds",
                self.request_time
            )));
        }
        Ok(())
    }
}

/// The current time at the precision the wire carries.
fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_defaults() {
        let msg = HostMessage::new("alice", "bob", vec![1u8, 2]);
        assert_eq!(msg.source_host_id, "alice");
        assert_eq!(msg.target_host_id, "bob");
        assert!(!msg.is_reply());
        assert!(msg.headers.is_empty());
        assert_eq!(msg.message_version, PROTOCOL_VERSION);
        assert_eq!(msg.request_time.timestamp_subsec_nanos() % 1_000_000, 0);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = HostMessage::new("alice", "bob", Bytes::new());
        let b = HostMessage::new("alice", "bob", Bytes::new());
        assert_ne!(a.request_message_id, b.request_message_id);
    }

    #[test]
    fn test_reply_swaps_direction() {
        let request = HostMessage::new("alice", "bob", "ping").with_version(3);
        let reply = HostMessage::reply(&request, "pong");
        assert_eq!(reply.source_host_id, "bob");
        assert_eq!(reply.target_host_id, "alice");
        assert!(reply.is_reply());
        assert!(reply.is_reply_to(&request.request_message_id));
        assert_ne!(reply.request_message_id, request.request_message_id);
        assert_eq!(reply.message_version, 3);
    }

    #[test]
    fn test_validate_rejects_empty_ids() {
        let msg = HostMessage::new("", "bob", Bytes::new());
        assert!(matches!(msg.validate(), Err(WireError::InvalidMessage(_))));

        let msg = HostMessage::new("alice", "", Bytes::new());
        assert!(matches!(msg.validate(), Err(WireError::InvalidMessage(_))));

        let mut msg = HostMessage::new("alice", "bob", Bytes::new());
        msg.reply_message_id = Some(String::new());
        assert!(matches!(msg.validate(), Err(WireError::InvalidMessage(_))));
    }

    #[test]
    fn test_validate_rejects_sub_millisecond_time() {
        let mut msg = HostMessage::new("alice", "bob", Bytes::new());
        let precise = DateTime::from_timestamp(1_700_000_000, 128_880_599).unwrap();
        msg.request_time = precise;
        assert!(matches!(msg.validate(), Err(WireError::InvalidMessage(_))));

        let msg = msg.with_request_time(precise);
        assert_eq!(msg.request_time.timestamp_subsec_millis(), 128);
        assert_eq!(msg.request_time.timestamp_subsec_nanos(), 128_000_000);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_headers_and_retarget() {
        let msg = HostMessage::new("alice", "bob", Bytes::new())
            .with_header("trace", "t-1")
            .with_header("attempt", 2);
        let copy = msg.retarget("carol");
        assert_eq!(copy.target_host_id, "carol");
        assert_eq!(copy.request_message_id, msg.request_message_id);
        assert_eq!(copy.headers.get("trace"), Some(&Value::from("t-1")));
        assert_eq!(copy.headers.get("attempt"), Some(&Value::from(2)));
    }
}
