//! Command and reply vocabulary of the chat protocol.
//!
//! Clients send one [`Command`] per line; the server answers with [`Reply`]
//! lines. Keywords are case-sensitive and the first space separates the
//! keyword from its arguments.

use std::{collections::BTreeSet, fmt};

use crate::error::{NameError, ParseError};

/// Line typed on the server console to shut the server down.
pub const SHUTDOWN_TOKEN: &str = "EXIT";

const MEMBER_SEPARATOR: char = ',';

/// Returns `true` when `name` is a non-empty run of ASCII letters and digits.
pub fn is_legal_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

pub fn validate_name(name: &str) -> Result<&str, NameError> {
    if is_legal_name(name) {
        Ok(name)
    } else {
        Err(NameError(name.to_string()))
    }
}

/// Splits a comma-separated member list, dropping empty and illegal tokens.
///
/// Repeated names collapse and the result is sorted, so `a,a,b` and `b,a`
/// yield the same set.
pub fn parse_member_list(list: &str) -> BTreeSet<String> {
    list.split(MEMBER_SEPARATOR)
        .filter(|token| is_legal_name(token))
        .map(str::to_string)
        .collect()
}

/// Sorted, comma-joined form of a member set.
pub fn canonical_member_list<'a, I>(members: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    members
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// A request line sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Name { name: String },
    CreateGroup { group: String, members: String },
    Send { target: String, text: String },
    Who,
    Exit,
}

impl Command {
    /// Parses one protocol line (without its terminator).
    ///
    /// Only the shape is checked here. Whether names are legal, taken or
    /// reachable is the router's business.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let (keyword, args) = match line.split_once(' ') {
            Some((keyword, args)) => (keyword, Some(args)),
            None => (line, None),
        };

        match keyword {
            "name" => match args {
                Some(name) if !name.is_empty() => Ok(Command::Name {
                    name: name.to_string(),
                }),
                _ => Err(usage("name", "name <name>")),
            },
            "create_group" => {
                let (group, members) = match args {
                    Some(args) => args.split_once(' ').unwrap_or((args, "")),
                    None => ("", ""),
                };
                if group.is_empty() {
                    return Err(usage("create_group", "create_group <group> <member,...>"));
                }
                Ok(Command::CreateGroup {
                    group: group.to_string(),
                    members: members.to_string(),
                })
            }
            "send" => match args.and_then(|args| args.split_once(' ')) {
                Some((target, text)) if !target.is_empty() => Ok(Command::Send {
                    target: target.to_string(),
                    text: text.to_string(),
                }),
                _ => Err(usage("send", "send <target> <message>")),
            },
            "who" if args.is_none() => Ok(Command::Who),
            "who" => Err(usage("who", "who")),
            "exit" if args.is_none() => Ok(Command::Exit),
            "exit" => Err(usage("exit", "exit")),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Name { .. } => "name",
            Command::CreateGroup { .. } => "create_group",
            Command::Send { .. } => "send",
            Command::Who => "who",
            Command::Exit => "exit",
        }
    }
}

fn usage(command: &'static str, usage: &'static str) -> ParseError {
    ParseError::Usage { command, usage }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Name { name } => write!(f, "name {name}"),
            Command::CreateGroup { group, members } => write!(f, "create_group {group} {members}"),
            Command::Send { target, text } => write!(f, "send {target} {text}"),
            Command::Who => f.write_str("who"),
            Command::Exit => f.write_str("exit"),
        }
    }
}

/// A line sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Connected,
    NameInUse,
    GroupCreated { group: String },
    GroupFailed { group: String },
    Sent,
    SendFailed,
    /// Pushed to the recipients of a `send`.
    Message { sender: String, text: String },
    Roster(Vec<String>),
    Unregistered,
    InvalidInput,
    /// Pushed to every connection when the operator shuts the server down.
    Shutdown,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Connected => f.write_str("Connected Successfully."),
            Reply::NameInUse => f.write_str("Client name is already in use."),
            Reply::GroupCreated { group } => {
                write!(f, "Group \"{group}\" was created successfully.")
            }
            Reply::GroupFailed { group } => write!(f, "ERROR: failed to create group \"{group}\"."),
            Reply::Sent => f.write_str("Sent successfully."),
            Reply::SendFailed => f.write_str("ERROR: failed to send."),
            Reply::Message { sender, text } => write!(f, "{sender}: {text}"),
            Reply::Roster(names) => f.write_str(&names.join(",")),
            Reply::Unregistered => f.write_str("Unregistered successfully."),
            Reply::InvalidInput => f.write_str("ERROR: Invalid input."),
            Reply::Shutdown => f.write_str("exit"),
        }
    }
}
