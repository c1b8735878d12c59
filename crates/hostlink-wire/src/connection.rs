//! Per-connection plumbing shared by the listener and the client connector.
//!
//! Both directions run the same read loop: bytes from the socket are fed to
//! a [`FrameDecoder`] owned by the loop, and every completed message is
//! handed to a [`MessageHandler`] in arrival order. Handlers receive a
//! [`ConnectionContext`] that can write frames back on the same connection.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::codec;
use crate::decoder::FrameDecoder;
use crate::error::{WireError, WireResult};
use crate::message::HostMessage;

const READ_CHUNK: usize = 8 * 1024;

/// Receives messages decoded from a connection.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &ConnectionContext, message: HostMessage);
}

/// Handler that only logs what it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn handle(&self, ctx: &ConnectionContext, message: HostMessage) {
        debug!(
            "hostlink: unhandled message {} from {} ({})",
            message.request_message_id,
            message.source_host_id,
            ctx.peer_addr()
        );
    }
}

/// The connection a message arrived on.
#[derive(Clone)]
pub struct ConnectionContext {
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    write_timeout: Duration,
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl ConnectionContext {
    pub(crate) fn new(
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        writer: Arc<Mutex<OwnedWriteHalf>>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            peer_addr,
            local_addr,
            writer,
            write_timeout,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write a message on this connection.
    pub async fn send(&self, message: &HostMessage) -> WireResult<()> {
        let frame = codec::encode_frame(message)?;
        write_frame(
            &self.writer,
            &frame,
            self.write_timeout,
            &self.peer_addr.to_string(),
        )
        .await
    }

    /// Answer `request` on this connection.
    pub async fn reply(
        &self,
        request: &HostMessage,
        content: impl Into<bytes::Bytes>,
    ) -> WireResult<()> {
        self.send(&HostMessage::reply(request, content)).await
    }
}

/// Write one encoded frame and flush it, bounded by `timeout`.
pub(crate) async fn write_frame(
    writer: &Mutex<OwnedWriteHalf>,
    frame: &[u8],
    timeout: Duration,
    target: &str,
) -> WireResult<()> {
    let write = async {
        let mut writer = writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(WireError::Write {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(WireError::Timeout {
            op: "write",
            target: target.to_string(),
            after: timeout,
        }),
    }
}

/// Why a connection loop ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConnectionEnd {
    PeerClosed,
    Idle,
    Shutdown,
    Fatal(String),
}

/// Drive one connection until the peer closes, it idles out, a
/// connection-fatal error occurs or `shutdown` flips to `true`.
///
/// Messages are dispatched one at a time in arrival order.
pub(crate) async fn run_connection<R>(
    mut reader: R,
    ctx: ConnectionContext,
    handler: Arc<dyn MessageHandler>,
    mut decoder: FrameDecoder,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ConnectionEnd
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        if *shutdown.borrow() {
            return ConnectionEnd::Shutdown;
        }

        let read = tokio::select! {
            read = tokio::time::timeout(idle_timeout, reader.read(&mut chunk)) => read,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return ConnectionEnd::Shutdown;
                }
                continue;
            }
        };

        let n = match read {
            Ok(Ok(0)) => return ConnectionEnd::PeerClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return ConnectionEnd::Fatal(e.to_string()),
            Err(_) => return ConnectionEnd::Idle,
        };
        decoder.feed(&chunk[..n]);

        loop {
            match decoder.next_message() {
                Ok(Some(message)) => handler.handle(&ctx, message).await,
                Ok(None) => break,
                Err(e) if e.is_frame_local() => {
                    warn!("hostlink: dropped frame from {}: {}", ctx.peer_addr, e);
                }
                Err(e) => {
                    warn!("hostlink: closing connection to {}: {}", ctx.peer_addr, e);
                    return ConnectionEnd::Fatal(e.to_string());
                }
            }
        }
    }
}
