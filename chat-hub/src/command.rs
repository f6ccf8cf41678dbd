//! Parsing of inbound chat lines into commands.
//!
//! Keywords are case-sensitive. A line is a control command only if it is
//! exactly `who` or starts with `rename|` or `to|`; everything else is chat.

use crate::error::{HubError, HubResult};

const DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List everyone currently online.
    Who,
    Rename { name: String },
    DirectMessage { to: String, text: String },
    /// Plain line for everyone.
    Chat(String),
}

impl Command {
    /// Classifies one framed line.
    ///
    /// Malformed `rename|` and `to|` lines are rejected with
    /// [`HubError::MalformedCommand`] rather than falling back to chat.
    pub fn parse(line: &str) -> HubResult<Self> {
        if line == "who" {
            return Ok(Command::Who);
        }
        if let Some(name) = line.strip_prefix("rename|") {
            return parse_rename(name);
        }
        if let Some(rest) = line.strip_prefix("to|") {
            return parse_direct(rest);
        }
        Ok(Command::Chat(line.to_string()))
    }
}

fn parse_rename(name: &str) -> HubResult<Command> {
    if name.trim().is_empty() {
        return Err(malformed("usage: rename|<name>"));
    }
    if name.contains(DELIMITER) {
        return Err(malformed("names cannot contain '|'"));
    }
    Ok(Command::Rename {
        name: name.to_string(),
    })
}

fn parse_direct(rest: &str) -> HubResult<Command> {
    // Only the first delimiter after the keyword separates name from
    // message; the message itself may contain more.
    let Some((to, text)) = rest.split_once(DELIMITER) else {
        return Err(malformed("usage: to|<name>|<message>"));
    };
    if to.is_empty() || text.is_empty() {
        return Err(malformed("usage: to|<name>|<message>"));
    }
    Ok(Command::DirectMessage {
        to: to.to_string(),
        text: text.to_string(),
    })
}

fn malformed(reason: &str) -> HubError {
    HubError::MalformedCommand(reason.to_string())
}
