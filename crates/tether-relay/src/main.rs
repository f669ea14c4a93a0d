//! # tether-relay
//!
//! `serve` runs a chat relay on top of the Tether server; `probe` dials a
//! running relay, sends one `echo` request and prints the reply.

#![deny(unsafe_code)]

mod room;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tether_client::{Client, ClientConfig};
use tether_core::logging::{init_subscriber, init_subscriber_with_history};
use tether_server::{ServerConfig, TetherServer};
use tether_settings::{TetherSettings, load_settings_from_path, settings_path};

use crate::room::{Room, relay_handlers};

/// How long in-flight sockets get to finish after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tether chat relay.
#[derive(Parser, Debug)]
#[command(name = "tether-relay", about = "Tether chat relay and probe")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server until Ctrl-C.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one echo request to a running relay and print the reply.
    Probe {
        /// Relay WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
        url: String,
        /// Session key to present (random if omitted).
        #[arg(long)]
        key: Option<String>,
    },
}

fn load_settings() -> TetherSettings {
    let path = settings_path();
    match load_settings_from_path(&path) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("ignoring settings at {}: {err}", path.display());
            TetherSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings();

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(&settings).await
        }
        Command::Probe { url, key } => probe(&settings, url, key).await,
    }
}

async fn serve(settings: &TetherSettings) -> Result<()> {
    let logs =
        init_subscriber_with_history(&settings.logging.level, settings.logging.history_capacity);

    let room = Room::new();
    let handlers = relay_handlers(&room, logs).context("Failed to register relay handlers")?;
    let server = TetherServer::new(ServerConfig::from(settings), handlers);
    room.bind(server.registry().clone());

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("tether relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let aborted = server.shutdown().stop(vec![handle], SHUTDOWN_GRACE).await;
    tracing::info!(aborted, "Shutdown complete");
    Ok(())
}

async fn probe(settings: &TetherSettings, url: String, key: Option<String>) -> Result<()> {
    init_subscriber(&settings.logging.level);

    let mut config = ClientConfig::from_settings(url, settings);
    if let Some(key) = key {
        config = config.with_session_key(key);
    }
    let client = Client::new(config);
    client.open().await.context("Failed to connect")?;

    let reply = client
        .request("echo", json!({ "probe": client.session_key().as_str() }))
        .await
        .context("Echo request failed")?;
    client.close();

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from(["tether-relay", "serve", "--port", "9000"]).unwrap();
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            Command::Probe { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn probe_has_default_url() {
        let cli = Cli::try_parse_from(["tether-relay", "probe"]).unwrap();
        match cli.command {
            Command::Probe { url, key } => {
                assert_eq!(url, "ws://127.0.0.1:8080/ws");
                assert_eq!(key, None);
            }
            Command::Serve { .. } => panic!("expected probe"),
        }
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["tether-relay"]).is_err());
    }
}
