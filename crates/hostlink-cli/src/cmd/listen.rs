//! `hostlink listen` — serve the local node until Ctrl+C.

use async_trait::async_trait;
use hostlink_wire::{
    ConnectionContext, HostClient, HostGroup, HostMessage, HostServer, MessageHandler, WireResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Prints every message and optionally echoes requests back.
struct PrintHandler {
    node_id: String,
    echo: bool,
    json: bool,
}

#[async_trait]
impl MessageHandler for PrintHandler {
    async fn handle(&self, ctx: &ConnectionContext, message: HostMessage) {
        super::print_message(&message, self.json);
        if message.target_host_id != self.node_id {
            warn!(
                "hostlink: message {} is addressed to {}, not {}",
                message.request_message_id, message.target_host_id, self.node_id
            );
        }
        if self.echo && !message.is_reply() {
            if let Err(e) = ctx.reply(&message, message.content.clone()).await {
                warn!("hostlink: echo to {} failed: {}", ctx.peer_addr(), e);
            }
        }
    }
}

pub async fn cmd_listen(config: Option<PathBuf>, echo: bool, json: bool) -> WireResult<()> {
    let config = super::load(config)?;
    let client = HostClient::new(config.transport.clone())?;
    let handler = Arc::new(PrintHandler {
        node_id: config.node.id.clone(),
        echo,
        json,
    });
    let group = super::peer_group(&config, &client, HostGroup::with_handler(handler))?;

    let server = HostServer::new(config.node.server_config(), config.transport.clone(), group)?;
    let addr = server.start().await?;
    info!(
        "hostlink: node {} ready on {} ({} peers)",
        config.node.id,
        addr,
        server.group().len()
    );

    tokio::signal::ctrl_c().await?;
    info!("hostlink: shutting down");
    server.close().await;
    client.close();
    Ok(())
}
