//! Outbound client connector.
//!
//! Every send opens a fresh TCP connection to the target host, writes one
//! frame and flushes it. The connection then stays open for inbound frames,
//! which are routed to the target [`Host`]'s handler until the peer closes,
//! the idle timeout elapses or the connector is closed.
//!
//! All socket work runs on the configured worker runtime; the async send
//! methods resolve once the connect and write have completed there.

use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::codec;
use crate::config::TransportConfig;
use crate::connection::{self, ConnectionContext, MessageHandler};
use crate::decoder::FrameDecoder;
use crate::error::{WireError, WireResult};
use crate::host::{Host, HostInfo};
use crate::message::HostMessage;

/// Shared outbound connector. Cloning is cheap; clones share the worker and
/// the closed state.
#[derive(Clone)]
pub struct HostClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: TransportConfig,
    worker: Handle,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for HostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostClient")
            .field("closed", &self.is_closed())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// An established outbound connection, split for reading and writing.
struct Outbound {
    reader: OwnedReadHalf,
    ctx: ConnectionContext,
    writer: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
}

/// Decrements the active-connection count when a reader task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HostClient {
    /// Create a connector. Fails if the transport configuration is invalid or
    /// no worker runtime is available.
    pub fn new(config: TransportConfig) -> WireResult<Self> {
        let worker = config.resolve_worker()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                worker,
                closed: AtomicBool::new(false),
                shutdown_tx,
                active: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Outbound connections still being read.
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Send `message` to `target` over a new connection.
    ///
    /// Resolves once the frame has been written and flushed. Replies that
    /// arrive later on the same connection go to `target`'s handler.
    pub async fn send_host_message(&self, target: &Host, message: &HostMessage) -> WireResult<()> {
        self.ensure_open()?;
        let frame = codec::encode_frame(message)?;
        let client = self.clone();
        self.run_on_worker(client.deliver(target.clone(), frame)).await
    }

    /// Send `message` to `target` and wait up to `wait` for its reply.
    ///
    /// Other frames that arrive first are passed to `target`'s handler. The
    /// connection is closed once the reply has been read.
    pub async fn request(
        &self,
        target: &Host,
        message: &HostMessage,
        wait: Duration,
    ) -> WireResult<HostMessage> {
        self.ensure_open()?;
        let frame = codec::encode_frame(message)?;
        let request_id = message.request_message_id.clone();
        let client = self.clone();
        self.run_on_worker(client.exchange(target.clone(), frame, request_id, wait))
            .await
    }

    /// Stop all reader tasks. Later sends fail with `ConnectorClosed`.
    /// Calling it again is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown_tx.send_replace(true);
        debug!(
            "hostlink: client connector closed ({} connections draining)",
            self.active_connections()
        );
    }

    fn ensure_open(&self) -> WireResult<()> {
        if self.is_closed() {
            Err(WireError::ConnectorClosed)
        } else {
            Ok(())
        }
    }

    async fn deliver(self, target: Host, frame: Bytes) -> WireResult<()> {
        let conn = self.connect(target.info()).await?;
        connection::write_frame(
            &conn.writer,
            &frame,
            self.inner.config.write_timeout(),
            &target.info().endpoint(),
        )
        .await?;
        self.spawn_reader(conn, Arc::new(target));
        Ok(())
    }

    async fn exchange(
        self,
        target: Host,
        frame: Bytes,
        request_id: String,
        wait: Duration,
    ) -> WireResult<HostMessage> {
        let endpoint = target.info().endpoint();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let mut conn = self.connect(target.info()).await?;
        connection::write_frame(
            &conn.writer,
            &frame,
            self.inner.config.write_timeout(),
            &endpoint,
        )
        .await?;

        let decoder = FrameDecoder::new(self.inner.config.max_frame_size);
        let read = read_reply(
            &mut conn,
            &target,
            decoder,
            &request_id,
            &endpoint,
            &mut shutdown,
        );
        match tokio::time::timeout(wait, read).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Timeout {
                op: "reply",
                target: endpoint,
                after: wait,
            }),
        }
    }

    async fn run_on_worker<T, F>(&self, fut: F) -> WireResult<T>
    where
        F: std::future::Future<Output = WireResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .worker
            .spawn(fut)
            .await
            .map_err(|e| WireError::Io(std::io::Error::other(e)))?
    }

    async fn connect(&self, info: &HostInfo) -> WireResult<Outbound> {
        let endpoint = info.endpoint();
        let timeout = self.inner.config.connect_timeout();
        let stream = match tokio::time::timeout(
            timeout,
            TcpStream::connect((info.address.as_str(), info.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(WireError::Connect {
                    target: endpoint,
                    source,
                })
            }
            Err(_) => {
                return Err(WireError::Timeout {
                    op: "connect",
                    target: endpoint,
                    after: timeout,
                })
            }
        };

        let connect_err = |source| WireError::Connect {
            target: info.endpoint(),
            source,
        };
        if self.inner.config.nodelay {
            stream.set_nodelay(true).map_err(connect_err)?;
        }
        let peer_addr: SocketAddr = stream.peer_addr().map_err(connect_err)?;
        let local_addr = stream.local_addr().map_err(connect_err)?;
        debug!("hostlink: connected to {} ({})", info.id, peer_addr);

        let (reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let ctx = ConnectionContext::new(
            peer_addr,
            local_addr,
            Arc::clone(&writer),
            self.inner.config.write_timeout(),
        );
        Ok(Outbound {
            reader,
            ctx,
            writer,
        })
    }

    fn spawn_reader(&self, conn: Outbound, handler: Arc<dyn MessageHandler>) {
        let guard = ActiveGuard::new(&self.inner.active);
        let decoder = FrameDecoder::new(self.inner.config.max_frame_size);
        let idle = self.inner.config.idle_timeout();
        let shutdown = self.inner.shutdown_tx.subscribe();
        let peer = conn.ctx.peer_addr();
        self.inner.worker.spawn(async move {
            let _guard = guard;
            let end =
                connection::run_connection(conn.reader, conn.ctx, handler, decoder, idle, shutdown)
                    .await;
            debug!("hostlink: outbound connection to {} ended: {:?}", peer, end);
        });
    }
}

/// Read frames until the reply to `request_id` arrives. Closing the
/// connector ends the wait with `ConnectorClosed`.
async fn read_reply(
    conn: &mut Outbound,
    target: &Host,
    mut decoder: FrameDecoder,
    request_id: &str,
    endpoint: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> WireResult<HostMessage> {
    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        let n = tokio::select! {
            read = conn.reader.read(&mut chunk) => read?,
            _ = shutdown.wait_for(|closed| *closed) => {
                debug!("hostlink: request to {} abandoned, connector closed", endpoint);
                return Err(WireError::ConnectorClosed);
            }
        };
        if n == 0 {
            return Err(WireError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("{endpoint} closed the connection before replying"),
            )));
        }
        decoder.feed(&chunk[..n]);
        loop {
            match decoder.next_message() {
                Ok(Some(msg)) if msg.is_reply_to(request_id) => return Ok(msg),
                Ok(Some(msg)) => target.handle(&conn.ctx, msg).await,
                Ok(None) => break,
                Err(e) if e.is_frame_local() => {
                    warn!("hostlink: dropped frame from {}: {}", endpoint, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        assert!(!client.is_closed());
        client.close();
        client.close();
        assert!(client.is_closed());
        assert_eq!(client.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let host = Host::new(HostInfo::new("bob", "1.0", "127.0.0.1", 9), client.clone()).unwrap();
        client.close();
        let msg = HostMessage::new("alice", "bob", bytes::Bytes::new());
        assert!(matches!(
            client.send_host_message(&host, &msg).await,
            Err(WireError::ConnectorClosed)
        ));
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            HostClient::new(TransportConfig::default()),
            Err(WireError::Config(_))
        ));
    }

    #[test]
    fn test_explicit_worker_outside_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let config = TransportConfig::default().with_worker(rt.handle().clone());
        let client = HostClient::new(config).unwrap();
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_close_ends_pending_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and hold the connection without ever replying.
        let silent = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            while stream.read(&mut buf).await.unwrap_or(0) > 0 {}
        });

        let client = HostClient::new(TransportConfig::default()).unwrap();
        let host = Host::new(HostInfo::new("bob", "1.0", "127.0.0.1", port), client.clone()).unwrap();
        let pending = tokio::spawn(async move {
            let msg = HostMessage::new("alice", "bob", bytes::Bytes::new());
            host.request(&msg, Duration::from_secs(30)).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close();
        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("request should end once the client is closed")
            .unwrap();
        assert!(matches!(result, Err(WireError::ConnectorClosed)), "got {result:?}");

        // The abandoned connection is dropped, so the peer sees EOF.
        tokio::time::timeout(Duration::from_secs(5), silent)
            .await
            .expect("connection should be closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_target_surfaces_connect_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = HostClient::new(TransportConfig::default()).unwrap();
        let host = Host::new(HostInfo::new("bob", "1.0", "127.0.0.1", port), client.clone()).unwrap();
        let msg = HostMessage::new("alice", "bob", bytes::Bytes::new());
        let err = client.send_host_message(&host, &msg).await.unwrap_err();
        assert!(matches!(err, WireError::Connect { .. }), "got {err:?}");
    }
}
