//! Clap CLI definitions for hostlink.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  hostlink check-config                 Validate ~/.hostlink/config.toml
  hostlink listen --echo                Serve the node and echo every request
  hostlink send --to bob --content hi   Send one message to peer `bob`
  hostlink send --to bob --wait-reply   Send and print the reply
  hostlink broadcast --content hello    Send to every configured peer";

/// hostlink — host-to-host messaging over TCP.
#[derive(Parser)]
#[command(name = "hostlink", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file (default: ~/.hostlink/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the node's listener and print incoming messages.
    Listen {
        /// Reply to every request with its own content.
        #[arg(long)]
        echo: bool,
        /// Print messages as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Send one message to a configured peer.
    Send {
        /// Target peer ID.
        #[arg(long)]
        to: String,
        /// Message content (UTF-8).
        #[arg(long, default_value = "")]
        content: String,
        /// Header as KEY=VALUE; repeatable.
        #[arg(long = "header", value_name = "KEY=VALUE")]
        headers: Vec<String>,
        /// Wait for the peer's reply and print it.
        #[arg(long)]
        wait_reply: bool,
        /// How long to wait for the reply.
        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
        /// Print the reply as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send one message to every configured peer.
    Broadcast {
        /// Message content (UTF-8).
        #[arg(long, default_value = "")]
        content: String,
        /// Header as KEY=VALUE; repeatable.
        #[arg(long = "header", value_name = "KEY=VALUE")]
        headers: Vec<String>,
    },
    /// Load and validate the config, then print the effective settings.
    CheckConfig,
}
