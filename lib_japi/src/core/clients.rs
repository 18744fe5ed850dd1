//! # Client Table
//!
//! Bookkeeping for live client connections. Every client carries the
//! sending half of its write channel: responses from the dispatcher and
//! push messages from producer tasks are both funneled through that channel
//! and written to the socket by a single writer task, so one JSON line is
//! always one uninterleaved write.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending half of a client's write channel. Lines are pre-framed
/// (trailing newline included) and shared, not cloned, across a fan-out.
pub(crate) type ClientSender = mpsc::UnboundedSender<Arc<String>>;

/// A live client connection.
pub(crate) struct Client {
    /// Socket identity, the raw file descriptor of the connection.
    pub(crate) socket: i32,
    /// Write channel drained by the client's writer task.
    pub(crate) sender: ClientSender,
    /// Cancelled when the client is removed; stops the reader task.
    pub(crate) token: CancellationToken,
}

/// Set of live clients. Guarded by the context lock, see
/// [`crate::core::context::JapiContext`].
pub(crate) struct ClientTable {
    clients: Vec<Client>,
}

impl ClientTable {
    pub(crate) fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    pub(crate) fn add(&mut self, client: Client) {
        self.clients.push(client);
    }

    /// Unlinks the first record matching `socket`.
    pub(crate) fn remove(&mut self, socket: i32) -> Option<Client> {
        let pos = self.clients.iter().position(|c| c.socket == socket)?;
        Some(self.clients.remove(pos))
    }

    pub(crate) fn sender_for(&self, socket: i32) -> Option<ClientSender> {
        self.clients
            .iter()
            .find(|c| c.socket == socket)
            .map(|c| c.sender.clone())
    }

    pub(crate) fn sockets(&self) -> Vec<i32> {
        self.clients.iter().map(|c| c.socket).collect()
    }
}
