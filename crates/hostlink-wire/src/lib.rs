//! hostlink wire — host-to-host message transport.
//!
//! Named hosts exchange binary-framed, schema-less messages over TCP. A host
//! group tracks membership and fans messages out to every member.
//!
//! ## Architecture
//!
//! - **HostMessage**: the routed value, with dynamic headers and opaque content
//! - **codec**: `[i32 version][i32 length][MessagePack body]` frames
//! - **FrameDecoder**: reassembles frames from partial TCP reads
//! - **Host** / **HostClient**: outbound sends, one connection per send
//! - **HostGroup**: membership registry and broadcast
//! - **HostServer**: inbound listener dispatching to the group
//! - **MessageHandler**: the extension point for received messages

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod group;
pub mod host;
pub mod message;
pub mod server;

pub use client::HostClient;
pub use config::{load_config, HostLinkConfig, NodeConfig, ServerConfig, TransportConfig};
pub use connection::{ConnectionContext, MessageHandler, NoopHandler};
pub use decoder::FrameDecoder;
pub use error::{WireError, WireResult};
pub use group::{GroupSendReport, HostGroup};
pub use host::{Host, HostInfo};
pub use message::{Headers, HostMessage, PROTOCOL_VERSION};
pub use server::HostServer;
