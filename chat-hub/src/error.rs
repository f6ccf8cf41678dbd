use std::io;

/// Failures surfaced by the hub to a single session.
///
/// Everything except [`HubError::Transport`] is recoverable user input: the
/// router turns it into a text line for the requester and carries on.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("name '{0}' is already taken")]
    NameTaken(String),
    #[error("no user named '{0}' is online")]
    UserNotFound(String),
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
}

pub type HubResult<T> = Result<T, HubError>;
