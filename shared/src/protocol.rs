//! Request and response envelopes exchanged between client and server

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Client -> server envelope
///
/// `id` is an operator id for `answer`/`reject` and a call id for
/// `call`/`hangup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    pub id: String,
}

impl Request {
    pub fn new(command: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            id: id.into(),
        }
    }
}

/// Server -> client envelope
///
/// The text may span several lines joined by `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub response: String,
}

impl Response {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// Commands understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Call,
    Answer,
    Reject,
    Hangup,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(Command::Call),
            "answer" => Ok(Command::Answer),
            "reject" => Ok(Command::Reject),
            "hangup" => Ok(Command::Hangup),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Call => write!(f, "call"),
            Command::Answer => write!(f, "answer"),
            Command::Reject => write!(f, "reject"),
            Command::Hangup => write!(f, "hangup"),
        }
    }
}
