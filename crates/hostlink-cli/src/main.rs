//! hostlink CLI — run a node, send messages, broadcast to the group.

mod cli;
mod cmd;

use crate::cli::*;
use clap::Parser;
use std::path::PathBuf;

/// Returns the hostlink home directory (`~/.hostlink`).
pub(crate) fn hostlink_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".hostlink")
}

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let result = match cli.command {
        Commands::Listen { echo, json } => cmd::listen::cmd_listen(cli.config, echo, json).await,
        Commands::Send {
            to,
            content,
            headers,
            wait_reply,
            timeout_ms,
            json,
        } => {
            let opts = cmd::send::SendOptions {
                to,
                content,
                headers,
                wait_reply,
                timeout_ms,
                json,
            };
            cmd::send::cmd_send(cli.config, opts).await
        }
        Commands::Broadcast { content, headers } => {
            cmd::send::cmd_broadcast(cli.config, content, headers).await
        }
        Commands::CheckConfig => cmd::config::cmd_check_config(cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
