//! Keyboard input parsing
//!
//! Each terminal line is `<command> <id>`. The command name is not checked
//! here; the server answers unknown names itself.

use callcenter_shared::Request;

pub const USAGE: &str = "Usage: <command> <id>";
pub const PROMPT: &str = "> ";

/// What a typed line turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInput {
    /// Blank line: just show the prompt again
    Empty,
    /// Too few tokens: print the usage message, send nothing
    Usage,
    /// A request to send to the server
    Request(Request),
}

/// Parse one line typed by the user
pub fn parse_line(line: &str) -> LineInput {
    let mut parts = line.split_whitespace();

    match (parts.next(), parts.next()) {
        (None, _) => LineInput::Empty,
        (Some(_), None) => LineInput::Usage,
        // Extra tokens are ignored
        (Some(command), Some(id)) => LineInput::Request(Request::new(command, id)),
    }
}
