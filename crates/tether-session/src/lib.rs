//! # tether-session
//!
//! The endpoint-neutral half of Tether. A [`Session`] represents one remote
//! peer across physical reconnects: it stamps sequence ids, correlates
//! replies to requests, dispatches inbound messages to handlers, and runs
//! the ping/liveness heartbeat.
//!
//! Sessions send through a [`Transport`]. The acceptor binds a
//! [`Connection`] directly; the initiator binds an [`OutboundQueue`], which
//! rate-limits outbound frames and prioritizes inbound dispatch.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod pending;
pub mod queue;
mod runner;
pub mod session;

pub use config::SessionConfig;
pub use connection::{Connection, SendGuard, Transport};
pub use handler::{HandlerSet, MessageHandler, Responder};
pub use pending::PendingRequests;
pub use queue::{InboundHandler, OutboundQueue, Outgoing};
pub use session::{Dispatch, Session};

#[cfg(test)]
pub(crate) mod testing;
