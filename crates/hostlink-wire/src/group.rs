//! Host group — membership registry and broadcast.
//!
//! The [`HostGroup`] keeps a lookup map and an ordered ID set behind a single
//! lock, so no reader ever sees one updated without the other. Broadcasts
//! work on a snapshot of the membership and send to every member
//! concurrently; one unreachable member does not stop the others.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::connection::{ConnectionContext, MessageHandler, NoopHandler};
use crate::error::{WireError, WireResult};
use crate::host::Host;
use crate::message::HostMessage;

#[derive(Debug, Default)]
struct Membership {
    hosts: HashMap<String, Arc<Host>>,
    order: BTreeSet<String>,
}

impl Membership {
    fn check(&self) -> WireResult<()> {
        if self.hosts.len() != self.order.len() {
            return Err(WireError::GroupInconsistent(format!(
                "{} hosts in map, {} ids in iteration set",
                self.hosts.len(),
                self.order.len()
            )));
        }
        if let Some(missing) = self.order.iter().find(|id| !self.hosts.contains_key(*id)) {
            return Err(WireError::GroupInconsistent(format!(
                "'{missing}' is iterated but not registered"
            )));
        }
        Ok(())
    }

    fn assert_consistent(&self) {
        if let Err(e) = self.check() {
            panic!("{e}");
        }
    }
}

/// Outcome of a group broadcast.
#[derive(Debug, Default)]
pub struct GroupSendReport {
    /// Members the message was written to.
    pub delivered: Vec<String>,
    /// Members whose send failed, with the reason.
    pub failed: Vec<(String, WireError)>,
}

impl GroupSendReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Thread-safe set of hosts that can be messaged individually or together.
#[derive(Clone)]
pub struct HostGroup {
    members: Arc<RwLock<Membership>>,
    handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for HostGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostGroup")
            .field("hosts", &self.host_ids())
            .finish()
    }
}

impl HostGroup {
    /// Create an empty group whose inbound messages go to a no-op handler.
    pub fn new() -> Self {
        Self::with_handler(Arc::new(NoopHandler))
    }

    /// Create an empty group that dispatches inbound messages to `handler`.
    pub fn with_handler(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            members: Arc::new(RwLock::new(Membership::default())),
            handler,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Membership> {
        self.members.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Membership> {
        self.members.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a host. Returns `false` if its ID is already present.
    pub fn add_host(&self, host: impl Into<Arc<Host>>) -> bool {
        let host = host.into();
        let mut members = self.write();
        if members.hosts.contains_key(host.id()) {
            return false;
        }
        members.order.insert(host.id().to_string());
        members.hosts.insert(host.id().to_string(), host);
        members.assert_consistent();
        true
    }

    /// Remove a host, returning it if it was a member.
    pub fn remove_host(&self, host_id: &str) -> Option<Arc<Host>> {
        let mut members = self.write();
        let removed = members.hosts.remove(host_id)?;
        members.order.remove(host_id);
        members.assert_consistent();
        Some(removed)
    }

    pub fn get_host(&self, host_id: &str) -> Option<Arc<Host>> {
        self.read().hosts.get(host_id).cloned()
    }

    pub fn contains(&self, host_id: &str) -> bool {
        self.read().hosts.contains_key(host_id)
    }

    pub fn len(&self) -> usize {
        self.read().hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Member IDs in iteration order.
    pub fn host_ids(&self) -> Vec<String> {
        self.read().order.iter().cloned().collect()
    }

    /// Snapshot of the members in iteration order.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        let members = self.read();
        members
            .order
            .iter()
            .filter_map(|id| members.hosts.get(id).cloned())
            .collect()
    }

    /// Verify that the lookup map and the iteration set agree.
    pub fn check_consistency(&self) -> WireResult<()> {
        self.read().check()
    }

    /// Send `message` to the member with the given ID.
    pub async fn send_message(&self, host_id: &str, message: &HostMessage) -> WireResult<()> {
        let host = self
            .get_host(host_id)
            .ok_or_else(|| WireError::HostNotFound(host_id.to_string()))?;
        host.send_message(message).await
    }

    /// Send `message` to every member except its source.
    ///
    /// Each member receives a copy addressed to its own ID. Sends run
    /// concurrently and independently.
    pub async fn send_group_message(&self, message: &HostMessage) -> GroupSendReport {
        let sends = self
            .hosts()
            .into_iter()
            .filter(|host| host.id() != message.source_host_id)
            .map(|host| async move {
                let copy = message.retarget(host.id());
                let result = host.send_message(&copy).await;
                (host.id().to_string(), result)
            });

        let mut report = GroupSendReport::default();
        for (host_id, result) in futures::future::join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(host_id),
                Err(e) => {
                    warn!("hostlink: group send to {} failed: {}", host_id, e);
                    report.failed.push((host_id, e));
                }
            }
        }
        report
    }
}

impl Default for HostGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for HostGroup {
    async fn handle(&self, ctx: &ConnectionContext, message: HostMessage) {
        self.handler.handle(ctx, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HostClient;
    use crate::config::TransportConfig;
    use crate::host::HostInfo;

    fn make_host(client: &HostClient, id: &str, port: u16) -> Host {
        Host::new(HostInfo::new(id, "1.0", "127.0.0.1", port), client.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let group = HostGroup::new();
        assert!(group.add_host(make_host(&client, "bob", 9002)));
        assert!(!group.add_host(make_host(&client, "bob", 9099)));
        assert_eq!(group.len(), 1);
        // the first registration wins
        assert_eq!(group.get_host("bob").unwrap().info().port, 9002);
        assert!(group.check_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_remove_and_lookup() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let group = HostGroup::new();
        group.add_host(make_host(&client, "bob", 9002));
        group.add_host(make_host(&client, "carol", 9003));

        assert!(group.remove_host("dave").is_none());
        assert_eq!(group.len(), 2);

        let removed = group.remove_host("bob").unwrap();
        assert_eq!(removed.id(), "bob");
        assert!(group.get_host("bob").is_none());
        assert!(!group.contains("bob"));
        assert_eq!(group.host_ids(), vec!["carol".to_string()]);
        assert!(group.check_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_iteration_order_is_stable() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let group = HostGroup::new();
        for id in ["delta", "alpha", "charlie", "bravo"] {
            group.add_host(make_host(&client, id, 9000));
        }
        let ids: Vec<_> = group.hosts().iter().map(|h| h.id().to_string()).collect();
        assert_eq!(ids, vec!["alpha", "bravo", "charlie", "delta"]);
        assert_eq!(ids, group.host_ids());
    }

    #[tokio::test]
    async fn test_send_to_absent_host() {
        let group = HostGroup::new();
        let msg = HostMessage::new("alice", "bob", bytes::Bytes::new());
        assert!(matches!(
            group.send_message("bob", &msg).await,
            Err(WireError::HostNotFound(id)) if id == "bob"
        ));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_group() {
        let group = HostGroup::new();
        let msg = HostMessage::new("alice", "*", bytes::Bytes::new());
        let report = group.send_group_message(&msg).await;
        assert_eq!(report.attempted(), 0);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_concurrent_membership_changes() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let group = HostGroup::new();
        let mut tasks = Vec::new();
        for worker in 0..8 {
            let group = group.clone();
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = format!("h{}", i % 10);
                    if (i + worker) % 3 == 0 {
                        group.remove_host(&id);
                    } else {
                        group.add_host(make_host(&client, &id, 9000));
                    }
                    group.check_consistency().unwrap();
                    let _ = group.hosts();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(group.check_consistency().is_ok());
        assert!(group.len() <= 10);
    }
}
