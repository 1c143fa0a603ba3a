//! Command routing.
//!
//! The [`Router`] owns both registries and is driven by a single task (see
//! [`run`]). Connection tasks only forward framed lines to it and drain their
//! outbox, so every registry mutation happens in the order lines arrived and
//! no handler ever awaits while it holds the registries.

use std::{collections::HashMap, net::SocketAddr, ops::ControlFlow};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    codec::MAX_LINE_LEN,
    connections::{ConnectionId, ConnectionRegistry},
    error::{CodecError, RegisterError},
    groups::GroupRegistry,
    protocol::{Command, Reply, is_legal_name},
};

/// Write side of a connection as seen by the router.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Instructions for a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    /// Flush what is queued, then drop the socket.
    Close,
}

/// Everything the router reacts to.
#[derive(Debug)]
pub enum Event {
    Connected {
        id: ConnectionId,
        peer: Option<SocketAddr>,
        outbox: Outbox,
    },
    Line {
        id: ConnectionId,
        line: String,
    },
    /// The peer went away (`error` is `None`) or the stream broke.
    Disconnected {
        id: ConnectionId,
        error: Option<CodecError>,
    },
    Shutdown,
}

/// Receives events until the channel closes or a shutdown is handled.
pub async fn run(mut router: Router, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        if router.handle(event).is_break() {
            break;
        }
    }
}

#[derive(Debug, Default)]
pub struct Router {
    /// Every open connection, named or not.
    connections: HashMap<ConnectionId, Outbox>,
    clients: ConnectionRegistry,
    groups: GroupRegistry,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> &ConnectionRegistry {
        &self.clients
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn handle(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Connected { id, peer, outbox } => {
                debug!(%id, ?peer, "connection accepted");
                self.connect(id, outbox);
            }
            Event::Line { id, line } => self.handle_line(id, &line),
            Event::Disconnected { id, error } => self.disconnect(id, error),
            Event::Shutdown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn connect(&mut self, id: ConnectionId, outbox: Outbox) {
        self.connections.insert(id, outbox);
    }

    /// Handles one complete line received on `id`.
    pub fn handle_line(&mut self, id: ConnectionId, line: &str) {
        if !self.connections.contains_key(&id) {
            debug!(%id, "dropping line from closed connection");
            return;
        }

        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(error) => {
                debug!(%id, %error, "invalid input");
                self.reply(id, Reply::InvalidInput);
                return;
            }
        };

        let sender = self.clients.name_of(id).map(str::to_string);
        match (sender, command) {
            (None, Command::Name { name }) => self.register(id, &name),
            (Some(sender), Command::CreateGroup { group, members }) => {
                self.create_group(id, &sender, &group, &members)
            }
            (Some(sender), Command::Send { target, text }) => {
                self.send(id, &sender, &target, &text)
            }
            (Some(sender), Command::Who) => self.who(id, &sender),
            (Some(sender), Command::Exit) => self.exit(id, &sender),
            (sender, command) => {
                debug!(%id, ?sender, keyword = command.keyword(), "command not allowed in this state");
                self.reply(id, Reply::InvalidInput);
            }
        }
    }

    /// Tears down a connection whose stream ended or failed. No reply is sent.
    pub fn disconnect(&mut self, id: ConnectionId, error: Option<CodecError>) {
        if self.connections.remove(&id).is_none() {
            return;
        }
        let name = self.purge(id);
        match error {
            None => info!(%id, ?name, "connection closed by peer"),
            Some(error) => warn!(%id, ?name, %error, "connection dropped"),
        }
    }

    /// Pushes the shutdown notice to every connection and closes them all.
    pub fn shutdown(&mut self) {
        info!(connections = self.connections.len(), "notifying clients of shutdown");
        let notice = Reply::Shutdown.to_string();
        for (id, outbox) in self.connections.drain() {
            if outbox.send(Outbound::Line(notice.clone())).is_err() {
                debug!(%id, "connection already gone during shutdown");
                continue;
            }
            if outbox.send(Outbound::Close).is_err() {
                debug!(%id, "connection already gone during shutdown");
            }
        }
        self.clients = ConnectionRegistry::new();
        self.groups = GroupRegistry::new();
    }

    /// Binds `name` to `id`. An illegal or taken name ends the connection;
    /// there is no second attempt.
    fn register(&mut self, id: ConnectionId, name: &str) {
        if !is_legal_name(name) {
            warn!(%id, name, "illegal client name");
            self.reject_name(id);
            return;
        }

        match self.clients.register(name, id, &self.groups) {
            Ok(()) => {
                info!(%id, name, "{name} connected");
                self.reply(id, Reply::Connected);
            }
            Err(RegisterError::NameTaken(_)) => {
                warn!(%id, name, "client name is already in use");
                self.reject_name(id);
            }
            Err(error @ RegisterError::AlreadyRegistered(_)) => {
                debug!(%id, %error, "duplicate registration");
                self.reply(id, Reply::InvalidInput);
            }
        }
    }

    fn reject_name(&mut self, id: ConnectionId) {
        self.reply(id, Reply::NameInUse);
        self.close(id);
    }

    fn create_group(&mut self, id: ConnectionId, sender: &str, group: &str, members: &str) {
        match self.groups.create(group, members, sender, &self.clients) {
            Ok(members) => {
                info!(sender, group, members = %members, "group \"{group}\" was created successfully");
                self.reply(
                    id,
                    Reply::GroupCreated {
                        group: group.to_string(),
                    },
                );
            }
            Err(error) => {
                info!(sender, group, %error, "failed to create group \"{group}\"");
                self.reply(
                    id,
                    Reply::GroupFailed {
                        group: group.to_string(),
                    },
                );
            }
        }
    }

    fn send(&mut self, id: ConnectionId, sender: &str, target: &str, text: &str) {
        let message = Reply::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        }
        .to_string();

        let delivered = if target == sender {
            false
        } else if message.len() >= MAX_LINE_LEN {
            // The pushed line plus its terminator must fit the receiver's frame.
            debug!(sender, target, len = message.len(), "message too long to deliver");
            false
        } else if let Some(recipient) = self.clients.lookup(target) {
            self.push(recipient, message)
        } else if self.groups.is_member(sender, target) {
            self.fan_out(sender, target, &message);
            true
        } else {
            false
        };

        if delivered {
            info!(sender, target, "\"{text}\" was sent successfully to {target}");
            self.reply(id, Reply::Sent);
        } else {
            info!(sender, target, "failed to send \"{text}\" to {target}");
            self.reply(id, Reply::SendFailed);
        }
    }

    /// Pushes to every member of `group` except `sender`. Members that have
    /// left are skipped.
    fn fan_out(&self, sender: &str, group: &str, message: &str) {
        for member in self.groups.members_of(group) {
            if member == sender {
                continue;
            }
            match self.clients.lookup(member) {
                Some(recipient) => {
                    self.push(recipient, message.to_string());
                }
                None => debug!(group, member, "skipping departed member"),
            }
        }
    }

    fn who(&mut self, id: ConnectionId, sender: &str) {
        info!(sender, "{sender}: requests the currently connected client names");
        let names = self.clients.all_names().map(str::to_string).collect();
        self.reply(id, Reply::Roster(names));
    }

    fn exit(&mut self, id: ConnectionId, sender: &str) {
        self.purge(id);
        info!(%id, sender, "{sender}: unregistered successfully");
        self.reply(id, Reply::Unregistered);
        self.close(id);
    }

    /// Removes the client bound to `id` from both registries.
    fn purge(&mut self, id: ConnectionId) -> Option<String> {
        let name = self.clients.unregister_connection(id)?;
        self.groups.remove_member(&name);
        Some(name)
    }

    fn reply(&self, id: ConnectionId, reply: Reply) {
        self.push(id, reply.to_string());
    }

    fn push(&self, id: ConnectionId, line: String) -> bool {
        let Some(outbox) = self.connections.get(&id) else {
            return false;
        };
        if outbox.send(Outbound::Line(line)).is_err() {
            warn!(%id, "connection task is gone; message not delivered");
            return false;
        }
        true
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(outbox) = self.connections.remove(&id) {
            if outbox.send(Outbound::Close).is_err() {
                debug!(%id, "connection already gone before close");
            }
        }
    }
}
