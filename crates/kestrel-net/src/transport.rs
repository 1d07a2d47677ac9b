//! Transport contract shared by the loopback and UDP implementations.
//!
//! A transport moves opaque, already-signed datagrams between hosts. It owns
//! one inbound queue per remote; the game thread drains each queue once per
//! tick. Connection changes surface as [`TransportEvent`]s.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::packet::TagCode;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a remote host as seen from the local host.
///
/// A client always sees the server as [`RemoteId::SERVER`]. The server hands
/// out client ids starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(pub u32);

impl RemoteId {
    /// The server, from a client's point of view.
    pub const SERVER: RemoteId = RemoteId(0);
    /// No remote.
    pub const INVALID: RemoteId = RemoteId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote#{}", self.0)
    }
}

/// Delivery guarantee requested for a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Retransmitted until acknowledged or the retry budget is spent.
    Reliable,
    /// Sent once; may be lost.
    BestEffort,
}

/// Connection change reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(RemoteId),
    Disconnected(RemoteId),
}

// ---------------------------------------------------------------------------
// Control tags
// ---------------------------------------------------------------------------

/// Tags reserved by the transport. They never reach the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTag {
    /// Connection handshake.
    Join,
    /// Orderly disconnect.
    Quit,
    /// Reliable envelope carrying an inner datagram.
    Safe,
    /// Acknowledgement of a reliable envelope.
    Ack,
    /// Unreliable envelope carrying an inner datagram.
    Data,
    /// Keep-alive.
    Ping,
}

impl ControlTag {
    pub const fn code(self) -> TagCode {
        match self {
            ControlTag::Join => *b"JOIN",
            ControlTag::Quit => *b"QUIT",
            ControlTag::Safe => *b"SAFE",
            ControlTag::Ack => *b"ACKN",
            ControlTag::Data => *b"DATA",
            ControlTag::Ping => *b"PING",
        }
    }

    pub fn from_code(code: TagCode) -> Option<Self> {
        match &code {
            b"JOIN" => Some(ControlTag::Join),
            b"QUIT" => Some(ControlTag::Quit),
            b"SAFE" => Some(ControlTag::Safe),
            b"ACKN" => Some(ControlTag::Ack),
            b"DATA" => Some(ControlTag::Data),
            b"PING" => Some(ControlTag::Ping),
            _ => None,
        }
    }
}

/// Returns `true` if `code` is reserved for the transport.
pub fn is_control_tag(code: TagCode) -> bool {
    ControlTag::from_code(code).is_some()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection to the given remote.
    #[error("unknown remote {0}")]
    UnknownRemote(RemoteId),

    /// The operation needs a hosting transport.
    #[error("transport is not hosting")]
    NotHosting,

    /// The network thread is gone.
    #[error("transport closed")]
    Closed,

    /// Handshake did not complete in time.
    #[error("connection to {0} timed out")]
    ConnectTimeout(String),

    /// The server refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Datagram transport between one local host and its remotes.
///
/// All methods take `&self`; implementations synchronize internally so the
/// network side can fill inboxes while the game thread drains them.
pub trait Transport: Send + Sync {
    /// Queues `datagram` for `remote`.
    fn send(&self, remote: RemoteId, datagram: Vec<u8>, delivery: Delivery)
    -> Result<(), TransportError>;

    /// Sends `datagram` to every connected remote.
    fn broadcast(&self, datagram: &[u8], delivery: Delivery) {
        for remote in self.remotes() {
            if let Err(e) = self.send(remote, datagram.to_vec(), delivery) {
                tracing::debug!("broadcast to {remote} failed: {e}");
            }
        }
    }

    /// Currently connected remotes, in ascending id order.
    fn remotes(&self) -> Vec<RemoteId>;

    /// Takes every datagram queued from `remote`.
    fn drain(&self, remote: RemoteId) -> Vec<Vec<u8>>;

    /// Takes pending connection events.
    fn poll_events(&self) -> Vec<TransportEvent>;

    /// Id the server assigned to this host, if this is a client.
    fn local_id(&self) -> Option<RemoteId>;

    /// Whether this transport accepts connections.
    fn is_hosting(&self) -> bool;

    /// Drops the connection to `remote` and notifies it.
    fn disconnect(&self, remote: RemoteId);
}

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Inbound datagram queue for one remote.
#[derive(Debug, Default)]
pub struct RemoteInbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
}

impl RemoteInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, datagram: Vec<u8>) {
        self.queue.lock().push_back(datagram);
    }

    /// Empties the queue under a single lock acquisition.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_tags_recognised() {
        for tag in [b"JOIN", b"QUIT", b"SAFE", b"ACKN", b"DATA", b"PING"] {
            assert!(is_control_tag(*tag));
            assert_eq!(ControlTag::from_code(*tag).unwrap().code(), *tag);
        }
        assert!(!is_control_tag(*b"CMSG"));
        assert!(!is_control_tag(*b"join"));
    }

    #[test]
    fn test_inbox_drains_in_order() {
        let inbox = RemoteInbox::new();
        inbox.push(vec![1]);
        inbox.push(vec![2]);
        inbox.push(vec![3]);
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox.drain(), vec![vec![1], vec![2], vec![3]]);
        assert!(inbox.is_empty());
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn test_remote_id_sentinels() {
        assert!(RemoteId::SERVER.is_valid());
        assert!(!RemoteId::INVALID.is_valid());
        assert_eq!(RemoteId(3).to_string(), "remote#3");
    }
}
