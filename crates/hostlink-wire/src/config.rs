//! Node, transport and peer configuration.
//!
//! Configuration is normally read from a TOML file:
//!
//! ```toml
//! [node]
//! id = "alice"
//! listen_addr = "127.0.0.1:9001"
//!
//! [transport]
//! connect_timeout_ms = 5000
//!
//! [[peers]]
//! id = "bob"
//! address = "127.0.0.1"
//! port = 9002
//! ```
//!
//! The worker pool that runs connection tasks cannot be expressed in a file;
//! it is handed in through [`TransportConfig::with_worker`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{WireError, WireResult};
use crate::host::HostInfo;

/// Top-level configuration of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostLinkConfig {
    /// Identity and listening endpoint of the local node.
    pub node: NodeConfig,
    /// Socket behaviour shared by the listener and the client connector.
    pub transport: TransportConfig,
    /// Known remote hosts.
    pub peers: Vec<HostInfo>,
}

impl HostLinkConfig {
    /// Validate every section and reject duplicate peer IDs.
    pub fn validate(&self) -> WireResult<()> {
        self.node.validate()?;
        self.transport.validate()?;
        let mut seen = HashSet::new();
        for peer in &self.peers {
            peer.validate()?;
            if !seen.insert(peer.id.as_str()) {
                return Err(WireError::Config(format!("duplicate peer id '{}'", peer.id)));
            }
        }
        Ok(())
    }

    /// Find a configured peer by ID.
    pub fn peer(&self, id: &str) -> Option<&HostInfo> {
        self.peers.iter().find(|p| p.id == id)
    }
}

/// The local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's host ID.
    pub id: String,
    /// Software/protocol version string advertised by this node.
    pub version: String,
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "hostlink-node".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> WireResult<()> {
        if self.id.trim().is_empty() {
            return Err(WireError::Config("node id must not be empty".into()));
        }
        Ok(())
    }

    /// Listener configuration for this node.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.listen_addr,
        }
    }
}

/// Configuration of a [`crate::HostServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind; port 0 picks an ephemeral port.
    pub listen_addr: SocketAddr,
}

/// Socket behaviour shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bound on establishing an outbound connection.
    pub connect_timeout_ms: u64,
    /// Bound on writing and flushing one frame.
    pub write_timeout_ms: u64,
    /// A connection with no inbound bytes for this long is closed.
    pub idle_timeout_ms: u64,
    /// Largest body accepted from the wire.
    pub max_frame_size: usize,
    /// Set `TCP_NODELAY` on every connection.
    pub nodelay: bool,
    /// Runtime that runs accept and connection tasks.
    #[serde(skip)]
    pub worker: Option<Handle>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            idle_timeout_ms: 60_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
            worker: None,
        }
    }
}

impl TransportConfig {
    /// Run connection tasks on the given runtime instead of the ambient one.
    pub fn with_worker(mut self, worker: Handle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn validate(&self) -> WireResult<()> {
        if self.connect_timeout_ms == 0 {
            return Err(WireError::Config("connect_timeout_ms must be positive".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(WireError::Config("write_timeout_ms must be positive".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(WireError::Config("idle_timeout_ms must be positive".into()));
        }
        if self.max_frame_size == 0 || self.max_frame_size > i32::MAX as usize {
            return Err(WireError::Config(format!(
                "max_frame_size must be within 1..={}",
                i32::MAX
            )));
        }
        Ok(())
    }

    /// Validate and resolve the worker pool, falling back to the current runtime.
    pub(crate) fn resolve_worker(&self) -> WireResult<Handle> {
        self.validate()?;
        match &self.worker {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|_| {
                WireError::Config(
                    "no worker runtime configured and none is running on this thread".into(),
                )
            }),
        }
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> WireResult<HostLinkConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        WireError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config = parse_config(&contents)
        .map_err(|e| WireError::Config(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), peers = config.peers.len(), "Loaded configuration");
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(contents: &str) -> WireResult<HostLinkConfig> {
    let config: HostLinkConfig =
        toml::from_str(contents).map_err(|e| WireError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[node]
id = "alice"
version = "2.1.0"
listen_addr = "127.0.0.1:9001"

[transport]
connect_timeout_ms = 250
nodelay = false

[[peers]]
id = "bob"
version = "2.1.0"
address = "127.0.0.1"
port = 9002

[[peers]]
id = "carol"
address = "10.0.0.7"
port = 9003
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.node.id, "alice");
        assert_eq!(config.node.listen_addr.port(), 9001);
        assert_eq!(config.transport.connect_timeout(), Duration::from_millis(250));
        assert!(!config.transport.nodelay);
        // untouched fields keep their defaults
        assert_eq!(config.transport.write_timeout_ms, 5_000);
        assert_eq!(config.transport.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.peer("carol").unwrap().port, 9003);
        assert_eq!(config.peer("carol").unwrap().version, "");
        assert!(config.peer("dave").is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.node.id, "hostlink-node");
        assert!(config.peers.is_empty());
        assert!(config.transport.nodelay);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = parse_config("[transport]\nconnect_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, WireError::Config(_)));

        let err = parse_config("[node]\nid = \"\"\n").unwrap_err();
        assert!(matches!(err, WireError::Config(_)));

        let err = parse_config("[node]\nlisten_addr = \"not-an-address\"\n").unwrap_err();
        assert!(matches!(err, WireError::Config(_)));

        let err = parse_config("[[peers]]\nid = \"bob\"\naddress = \"127.0.0.1\"\nport = 0\n")
            .unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
    }

    #[test]
    fn test_duplicate_peers_rejected() {
        let toml = r#"
[[peers]]
id = "bob"
address = "127.0.0.1"
port = 9002

[[peers]]
id = "bob"
address = "127.0.0.1"
port = 9003
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate peer id"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.node.id, "alice");

        let missing = file.path().with_extension("missing");
        assert!(matches!(load_config(&missing), Err(WireError::Config(_))));
    }

    #[test]
    fn test_worker_resolution_outside_runtime() {
        let config = TransportConfig::default();
        assert!(matches!(config.resolve_worker(), Err(WireError::Config(_))));
    }

    #[tokio::test]
    async fn test_worker_resolution_inside_runtime() {
        let config = TransportConfig::default();
        assert!(config.resolve_worker().is_ok());
    }
}
