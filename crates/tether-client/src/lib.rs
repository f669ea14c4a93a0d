//! # tether-client
//!
//! The initiating endpoint. A [`Client`] dials the server, routes traffic
//! through a rate-limited [`OutboundQueue`](tether_session::OutboundQueue),
//! and transparently reconnects with capped exponential backoff. The
//! session key rides along on every dial, so the server resumes the same
//! session after a reconnect.

#![deny(unsafe_code)]

pub mod client;
pub mod config;

pub use client::Client;
pub use config::ClientConfig;
