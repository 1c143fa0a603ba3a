//! Line-oriented group chat over TCP.
//!
//! Clients register a name, send direct messages, form fixed groups and ask
//! for the roster. Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`codec`] frames the byte stream into newline-terminated lines.
//! - [`protocol`] defines the command and reply vocabulary.
//! - [`connections`] and [`groups`] are the registries behind the shared
//!   client/group namespace.
//! - [`router`] applies commands to the registries and queues replies.
//! - [`server`] accepts TCP connections and pumps lines between sockets and
//!   the router task.
//! - [`client`] is the terminal front-end, multiplexing stdin and server
//!   lines.
//!
//! Integration tests use this crate directly to exercise the server over
//! real sockets.

pub mod cli;
pub mod client;
pub mod codec;
pub mod connections;
pub mod error;
pub mod groups;
pub mod protocol;
pub mod router;
pub mod server;
