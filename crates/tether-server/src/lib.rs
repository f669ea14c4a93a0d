//! # tether-server
//!
//! The accepting endpoint. An Axum router upgrades `/ws` requests to
//! WebSockets, resolves each connection to a [`Session`](tether_session::Session)
//! through the [`SessionRegistry`](registry::SessionRegistry), and feeds
//! inbound frames to it. Sessions outlive their sockets so a peer that
//! reconnects under the same key resumes where it left off.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use registry::SessionRegistry;
pub use server::TetherServer;
