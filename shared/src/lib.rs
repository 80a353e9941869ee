//! Call Center Shared Types
//!
//! This crate provides the call routing core together with the protocol types
//! and codec shared by the call center server and the terminal client.

pub mod codec;
pub mod protocol;
pub mod router;
pub mod sink;
pub mod timer;

// Re-export commonly used types at crate root
pub use protocol::{Command, Request, Response, UnknownCommand};
pub use router::{
    CallRouter, InvariantViolation, Operator, OperatorState, Outcome, RouterConfig, RouterError,
    RouterEvent,
};
pub use sink::{NotificationSink, Target};
pub use timer::{Expiry, ManualTimer, Timer};

/// Identifier of a call, supplied by the caller
pub type CallId = String;

/// Identifier of an operator, taken from the configured operator list
pub type OperatorId = String;

/// Routing parameters for the system
pub mod routing {
    /// How long an operator may ring before the call is considered ignored
    pub const RING_TIMEOUT_MS: u64 = 10_000;

    /// TCP port the server listens on by default
    pub const DEFAULT_PORT: u16 = 5678;

    /// Operators in assignment order
    pub const DEFAULT_OPERATORS: [&str; 2] = ["A", "B"];
}
