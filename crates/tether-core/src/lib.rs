//! # tether-core
//!
//! Foundation types shared by both Tether endpoints.
//!
//! - **Envelope codec**: [`envelope::Envelope`] plus `encode`/`decode`, the only
//!   place the wire shape is built or torn apart
//! - **Errors**: [`errors::ProtocolError`] and [`errors::TransportError`] via `thiserror`
//! - **Branded IDs**: `SessionKey`, `ConnectionId` as newtypes for type safety
//! - **Backoff**: exponential reconnect delay with cap and jitter
//! - **Logging**: `tracing` subscriber setup and an in-memory recent-log history

#![deny(unsafe_code)]

pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;
