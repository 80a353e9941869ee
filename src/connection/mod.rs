//! Connection management for the call center client
//!
//! This module handles:
//! - A persistent TCP connection to the server with automatic reconnection
//! - Framing outgoing requests and decoding incoming responses

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
