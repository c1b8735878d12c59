//! Command implementations.

pub mod config;
pub mod listen;
pub mod send;

use hostlink_wire::{
    load_config, Headers, Host, HostClient, HostGroup, HostLinkConfig, HostMessage, WireError,
    WireResult,
};
use rmpv::Value;
use serde::Serialize;
use std::path::PathBuf;

/// Resolve the config path and load it.
pub(crate) fn load(config: Option<PathBuf>) -> WireResult<HostLinkConfig> {
    let path = config.unwrap_or_else(|| crate::hostlink_home().join("config.toml"));
    load_config(&path)
}

/// Build a group holding every configured peer.
pub(crate) fn peer_group(
    config: &HostLinkConfig,
    client: &HostClient,
    group: HostGroup,
) -> WireResult<HostGroup> {
    for info in &config.peers {
        group.add_host(Host::new(info.clone(), client.clone())?);
    }
    Ok(group)
}

/// Parse `KEY=VALUE` header arguments. Integers, floats and booleans keep
/// their type; everything else is a string.
pub(crate) fn parse_headers(raw: &[String]) -> WireResult<Headers> {
    let mut headers = Headers::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| WireError::Config(format!("header '{item}' is not KEY=VALUE")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(WireError::Config(format!("header '{item}' has an empty key")));
        }
        headers.insert(key.to_string(), parse_header_value(value));
    }
    Ok(headers)
}

fn parse_header_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => Value::from(true),
        "false" => Value::from(false),
        _ => Value::from(raw),
    }
}

/// Printable view of a message.
#[derive(Serialize)]
pub(crate) struct MessageView {
    pub source: String,
    pub target: String,
    pub request_id: String,
    pub reply_to: Option<String>,
    pub time: String,
    pub version: i32,
    pub headers: Vec<(String, String)>,
    pub content: String,
}

impl From<&HostMessage> for MessageView {
    fn from(msg: &HostMessage) -> Self {
        Self {
            source: msg.source_host_id.clone(),
            target: msg.target_host_id.clone(),
            request_id: msg.request_message_id.clone(),
            reply_to: msg.reply_message_id.clone(),
            time: msg.request_time.to_rfc3339(),
            version: msg.message_version,
            headers: msg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            content: String::from_utf8_lossy(&msg.content).into_owned(),
        }
    }
}

/// Print a message as one JSON line or as readable text.
pub(crate) fn print_message(msg: &HostMessage, json: bool) {
    let view = MessageView::from(msg);
    if json {
        println!("{}", serde_json::to_string(&view).unwrap_or_default());
        return;
    }
    let kind = match &view.reply_to {
        Some(id) => format!("reply to {id}"),
        None => "request".to_string(),
    };
    println!(
        "[{}] {} -> {} ({}, id {})",
        view.time, view.source, view.target, kind, view.request_id
    );
    for (key, value) in &view.headers {
        println!("  {key}: {value}");
    }
    println!("  {}", view.content);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_types() {
        let raw = vec![
            "attempt=3".to_string(),
            "ratio=0.5".to_string(),
            "urgent=true".to_string(),
            "trace=abc=def".to_string(),
        ];
        let headers = parse_headers(&raw).unwrap();
        assert_eq!(headers["attempt"], Value::from(3i64));
        assert_eq!(headers["ratio"], Value::from(0.5f64));
        assert_eq!(headers["urgent"], Value::from(true));
        assert_eq!(headers["trace"], Value::from("abc=def"));
    }

    #[test]
    fn test_parse_headers_rejects_malformed() {
        assert!(parse_headers(&["novalue".to_string()]).is_err());
        assert!(parse_headers(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_message_view() {
        let msg = HostMessage::new("alice", "bob", "hi").with_header("k", 1);
        let view = MessageView::from(&msg);
        assert_eq!(view.content, "hi");
        assert_eq!(view.headers, vec![("k".to_string(), "1".to_string())]);
        assert!(view.reply_to.is_none());
    }
}
