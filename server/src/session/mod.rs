//! Session management for tracking connected clients
//!
//! This module handles:
//! - Tracking all connected client sessions
//! - Framing and decoding requests per connection
//! - Delivering replies and asynchronous notifications to specific clients

mod connection;
mod manager;

pub use connection::{ClientSession, SessionHandle, SessionId};
pub use manager::SessionManager;
