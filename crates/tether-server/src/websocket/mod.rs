//! WebSocket connection handling.

pub mod socket;
