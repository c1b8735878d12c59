//! A single addressable peer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::client::HostClient;
use crate::connection::{ConnectionContext, MessageHandler, NoopHandler};
use crate::error::{WireError, WireResult};
use crate::message::HostMessage;

/// Identity and network address of a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Unique, stable host ID.
    pub id: String,
    /// Protocol/software version string.
    #[serde(default)]
    pub version: String,
    /// Hostname or IP address.
    pub address: String,
    pub port: u16,
}

impl HostInfo {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            address: address.into(),
            port,
        }
    }

    /// `address:port`, as used in logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> WireResult<()> {
        if self.id.trim().is_empty() {
            return Err(WireError::Config("host id must not be empty".into()));
        }
        if self.address.trim().is_empty() {
            return Err(WireError::Config(format!(
                "host '{}' has an empty address",
                self.id
            )));
        }
        if self.port == 0 {
            return Err(WireError::Config(format!("host '{}' has port 0", self.id)));
        }
        Ok(())
    }
}

/// A remote host reachable through a [`HostClient`].
///
/// Frames that arrive on connections opened to this host (typically replies)
/// are passed to its handler, a no-op unless one is set with
/// [`Host::with_handler`].
#[derive(Clone)]
pub struct Host {
    info: HostInfo,
    client: HostClient,
    handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("info", &self.info).finish()
    }
}

impl Host {
    pub fn new(info: HostInfo, client: HostClient) -> WireResult<Self> {
        info.validate()?;
        Ok(Self {
            info,
            client,
            handler: Arc::new(NoopHandler),
        })
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    pub fn info(&self) -> &HostInfo {
        &self.info
    }

    pub fn client(&self) -> &HostClient {
        &self.client
    }

    /// Send `message` to this host.
    ///
    /// A message from this host to itself is rejected before any I/O.
    pub async fn send_message(&self, message: &HostMessage) -> WireResult<()> {
        self.check_not_self(message)?;
        self.client.send_host_message(self, message).await
    }

    /// Send `message` to this host and wait for the matching reply.
    pub async fn request(&self, message: &HostMessage, wait: Duration) -> WireResult<HostMessage> {
        self.check_not_self(message)?;
        self.client.request(self, message, wait).await
    }

    fn check_not_self(&self, message: &HostMessage) -> WireResult<()> {
        if message.source_host_id == self.info.id && message.target_host_id == self.info.id {
            return Err(WireError::SelfSend {
                host_id: self.info.id.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for Host {
    async fn handle(&self, ctx: &ConnectionContext, message: HostMessage) {
        self.handler.handle(ctx, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_host_info_validation() {
        assert_ok!(HostInfo::new("bob", "1.0", "127.0.0.1", 9001).validate());
        assert_err!(HostInfo::new("", "1.0", "127.0.0.1", 9001).validate());
        assert_err!(HostInfo::new("bob", "1.0", " ", 9001).validate());
        assert_err!(HostInfo::new("bob", "1.0", "127.0.0.1", 0).validate());
        assert_eq!(
            HostInfo::new("bob", "1.0", "localhost", 9001).endpoint(),
            "localhost:9001"
        );
    }

    #[tokio::test]
    async fn test_self_send_rejected_without_io() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        // Nothing listens on port 9; any I/O attempt would surface as Connect.
        let host = Host::new(HostInfo::new("alice", "1.0", "127.0.0.1", 9), client.clone()).unwrap();
        let msg = HostMessage::new("alice", "alice", Bytes::from_static(b"hi"));
        match host.send_message(&msg).await {
            Err(WireError::SelfSend { host_id }) => assert_eq!(host_id, "alice"),
            other => panic!("Expected SelfSend, got {other:?}"),
        }
        assert!(matches!(
            host.request(&msg, Duration::from_millis(10)).await,
            Err(WireError::SelfSend { .. })
        ));
        assert_eq!(client.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_info() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        assert!(matches!(
            Host::new(HostInfo::new("bob", "1.0", "", 9001), client),
            Err(WireError::Config(_))
        ));
    }
}
