//! Inbound listener.
//!
//! A [`HostServer`] binds the configured address and accepts connections
//! until it is closed. Every connection gets its own [`FrameDecoder`], and
//! each decoded message is dispatched to the owning [`HostGroup`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{ServerConfig, TransportConfig};
use crate::connection::{self, ConnectionContext};
use crate::decoder::FrameDecoder;
use crate::error::{WireError, WireResult};
use crate::group::HostGroup;

enum ServerState {
    Idle,
    Running {
        local_addr: SocketAddr,
        accept: JoinHandle<()>,
    },
    Closed,
}

/// TCP listener feeding a host group.
pub struct HostServer {
    config: ServerConfig,
    transport: TransportConfig,
    worker: Handle,
    group: HostGroup,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<ServerState>,
}

impl HostServer {
    /// Create a listener for `group`. Nothing is bound until [`start`](Self::start).
    pub fn new(
        config: ServerConfig,
        transport: TransportConfig,
        group: HostGroup,
    ) -> WireResult<Self> {
        let worker = transport.resolve_worker()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            transport,
            worker,
            group,
            shutdown_tx,
            state: Mutex::new(ServerState::Idle),
        })
    }

    pub fn group(&self) -> &HostGroup {
        &self.group
    }

    /// Bind and start accepting. Returns the bound address.
    ///
    /// Calling it again while running returns the same address. After
    /// [`close`](Self::close) it fails with `ServerClosed`.
    pub async fn start(&self) -> WireResult<SocketAddr> {
        let mut state = self.state.lock().await;
        match &*state {
            ServerState::Running { local_addr, .. } => return Ok(*local_addr),
            ServerState::Closed => return Err(WireError::ServerClosed),
            ServerState::Idle => {}
        }

        // Bind on the worker so the listener lives on its reactor.
        let addr = self.config.listen_addr;
        let listener = self
            .worker
            .spawn(async move { TcpListener::bind(addr).await })
            .await
            .map_err(|e| WireError::Io(std::io::Error::other(e)))??;
        let local_addr = listener.local_addr()?;

        info!(
            "hostlink: listening on {} ({} hosts in group)",
            local_addr,
            self.group.len()
        );

        let accept = self.worker.spawn(accept_loop(
            listener,
            self.group.clone(),
            self.transport.clone(),
            self.shutdown_tx.subscribe(),
        ));
        *state = ServerState::Running { local_addr, accept };
        Ok(local_addr)
    }

    /// Stop accepting and signal open connections to finish.
    ///
    /// Connections stop once the frames they have already buffered are
    /// dispatched. Calling it again is a no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ServerState::Closed) {
            ServerState::Running { local_addr, accept } => {
                self.shutdown_tx.send_replace(true);
                let _ = accept.await;
                info!("hostlink: listener on {} closed", local_addr);
            }
            ServerState::Idle => {
                self.shutdown_tx.send_replace(true);
            }
            ServerState::Closed => {}
        }
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ServerState::Running { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, ServerState::Running { .. })
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    group: HostGroup,
    transport: TransportConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("hostlink: accepted connection from {}", addr);
                    tokio::spawn(serve_inbound(
                        stream,
                        addr,
                        group.clone(),
                        transport.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("hostlink: accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn serve_inbound(
    stream: TcpStream,
    peer_addr: SocketAddr,
    group: HostGroup,
    transport: TransportConfig,
    shutdown: watch::Receiver<bool>,
) {
    if transport.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("hostlink: set_nodelay on {} failed: {}", peer_addr, e);
        }
    }
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!("hostlink: dropping connection from {}: {}", peer_addr, e);
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    let ctx = ConnectionContext::new(
        peer_addr,
        local_addr,
        Arc::new(Mutex::new(writer)),
        transport.write_timeout(),
    );
    let end = connection::run_connection(
        reader,
        ctx,
        Arc::new(group),
        FrameDecoder::new(transport.max_frame_size),
        transport.idle_timeout(),
        shutdown,
    )
    .await;
    debug!("hostlink: inbound connection from {} ended: {:?}", peer_addr, end);
}
