//! Command dispatch and ring timeouts for the server
//!
//! This module handles:
//! - Applying client commands to the call router
//! - Scheduling and cancelling ring timeouts
//! - Routing timeout notifications to the client that owns the call

mod dispatcher;
mod timeout;

pub use dispatcher::{CommandDispatcher, DispatcherInput};
pub use timeout::TokioTimer;
