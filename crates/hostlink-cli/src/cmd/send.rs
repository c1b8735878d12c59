//! `hostlink send` and `hostlink broadcast`.

use hostlink_wire::{Host, HostClient, HostGroup, HostMessage, WireError, WireResult};
use std::path::PathBuf;
use std::time::Duration;

pub struct SendOptions {
    pub to: String,
    pub content: String,
    pub headers: Vec<String>,
    pub wait_reply: bool,
    pub timeout_ms: u64,
    pub json: bool,
}

pub async fn cmd_send(config: Option<PathBuf>, opts: SendOptions) -> WireResult<()> {
    let config = super::load(config)?;
    let info = config
        .peer(&opts.to)
        .cloned()
        .ok_or_else(|| WireError::HostNotFound(opts.to.clone()))?;
    let headers = super::parse_headers(&opts.headers)?;

    let client = HostClient::new(config.transport.clone())?;
    let host = Host::new(info, client.clone())?;
    let message = HostMessage::new(config.node.id.clone(), opts.to.clone(), opts.content)
        .with_headers(headers);

    let result = if opts.wait_reply {
        let wait = Duration::from_millis(opts.timeout_ms);
        host.request(&message, wait).await.map(|reply| {
            super::print_message(&reply, opts.json);
        })
    } else {
        host.send_message(&message).await.map(|()| {
            println!("sent {} to {}", message.request_message_id, opts.to);
        })
    };
    client.close();
    result
}

pub async fn cmd_broadcast(
    config: Option<PathBuf>,
    content: String,
    headers: Vec<String>,
) -> WireResult<()> {
    let config = super::load(config)?;
    let headers = super::parse_headers(&headers)?;
    let client = HostClient::new(config.transport.clone())?;
    let group = super::peer_group(&config, &client, HostGroup::new())?;

    let message = HostMessage::new(config.node.id.clone(), "*", content).with_headers(headers);
    let report = group.send_group_message(&message).await;
    client.close();

    for id in &report.delivered {
        println!("  delivered  {id}");
    }
    for (id, err) in &report.failed {
        println!("  failed     {id}: {err}");
    }
    println!(
        "{} of {} peers reached",
        report.delivered.len(),
        report.attempted()
    );
    if !report.is_complete() {
        std::process::exit(2);
    }
    Ok(())
}
