//! Error types shared across the chat server.
//!
//! Protocol-level failures are values: the router turns each of them into the
//! matching reply line. Only [`CodecError`] ends a connection.

use thiserror::Error;

/// Failures while framing the byte stream.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A line grew past the maximum length without a terminator.
    #[error("line exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// A client or group name that is not a non-empty run of ASCII letters and digits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid name {0:?}: only ASCII letters and digits are allowed")]
pub struct NameError(pub String);

/// Failures while binding a name to a connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("name {0:?} is already in use")]
    NameTaken(String),

    #[error("connection is already registered as {0:?}")]
    AlreadyRegistered(String),
}

/// Reasons a `create_group` request is refused.
///
/// The reply sent to the client never carries the reason; it is only logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("name {0:?} is already in use")]
    NameTaken(String),

    #[error("member list is empty")]
    NoMembers,

    #[error("a client cannot open a group for itself alone")]
    SelfOnly,

    #[error("{0:?} is not a connected client")]
    UnknownMember(String),
}

/// A line that does not form a well-shaped command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("{command} expects: {usage}")]
    Usage {
        command: &'static str,
        usage: &'static str,
    },
}

/// A line typed into the client that is refused before reaching the server.
///
/// Each variant displays as the reply the server would have sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("ERROR: failed to create group \"{0}\".")]
    CreateGroup(String),

    #[error("ERROR: failed to send.")]
    Send,

    #[error("ERROR: failed to receive list of connected clients.")]
    Who,

    #[error("ERROR: Invalid input.")]
    InvalidInput,
}
