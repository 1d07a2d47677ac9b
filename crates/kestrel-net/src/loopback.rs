//! In-memory transport for listen-server play and tests.
//!
//! A hosting endpoint hands out connected client endpoints with
//! [`LoopbackTransport::connect`]. Every pair of endpoints shares two
//! [`RemoteInbox`] queues, one per direction. Delivery is immediate; the host
//! can drop best-effort traffic to simulate loss.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::transport::{Delivery, RemoteId, RemoteInbox, Transport, TransportError, TransportEvent};

struct Peer {
    /// Datagrams from the peer to us.
    incoming: Arc<RemoteInbox>,
    /// Datagrams from us to the peer.
    outgoing: Arc<RemoteInbox>,
    /// The peer's endpoint.
    side: Weak<Side>,
    /// Our id as the peer sees it.
    id_there: RemoteId,
}

struct Side {
    peers: Mutex<BTreeMap<RemoteId, Peer>>,
    events: Sender<TransportEvent>,
}

impl Side {
    fn detach(&self, remote: RemoteId) -> Option<Peer> {
        let peer = self.peers.lock().remove(&remote)?;
        let _ = self.events.send(TransportEvent::Disconnected(remote));
        Some(peer)
    }
}

/// One endpoint of an in-memory connection set.
pub struct LoopbackTransport {
    side: Arc<Side>,
    events: Receiver<TransportEvent>,
    hosting: bool,
    local_id: Option<RemoteId>,
    next_client: AtomicU32,
    drop_best_effort: Arc<AtomicBool>,
}

impl LoopbackTransport {
    fn endpoint(hosting: bool, local_id: Option<RemoteId>, drop_best_effort: Arc<AtomicBool>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            side: Arc::new(Side {
                peers: Mutex::new(BTreeMap::new()),
                events: tx,
            }),
            events: rx,
            hosting,
            local_id,
            next_client: AtomicU32::new(1),
            drop_best_effort,
        }
    }

    /// Creates a hosting endpoint with no clients.
    pub fn host() -> Self {
        Self::endpoint(true, None, Arc::new(AtomicBool::new(false)))
    }

    /// Creates a client endpoint connected to this host.
    ///
    /// Both sides observe a [`TransportEvent::Connected`] on their next poll.
    pub fn connect(&self) -> Result<LoopbackTransport, TransportError> {
        if !self.hosting {
            return Err(TransportError::NotHosting);
        }
        let client_id = RemoteId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let client = Self::endpoint(false, Some(client_id), Arc::clone(&self.drop_best_effort));

        let to_client = Arc::new(RemoteInbox::new());
        let to_server = Arc::new(RemoteInbox::new());

        self.side.peers.lock().insert(
            client_id,
            Peer {
                incoming: Arc::clone(&to_server),
                outgoing: Arc::clone(&to_client),
                side: Arc::downgrade(&client.side),
                id_there: RemoteId::SERVER,
            },
        );
        client.side.peers.lock().insert(
            RemoteId::SERVER,
            Peer {
                incoming: to_client,
                outgoing: to_server,
                side: Arc::downgrade(&self.side),
                id_there: client_id,
            },
        );

        let _ = self.side.events.send(TransportEvent::Connected(client_id));
        let _ = client.side.events.send(TransportEvent::Connected(RemoteId::SERVER));
        tracing::debug!("Loopback client {client_id} connected");
        Ok(client)
    }

    /// When set, best-effort datagrams are silently discarded in both
    /// directions for every endpoint created from the same host.
    pub fn set_best_effort_loss(&self, enabled: bool) {
        self.drop_best_effort.store(enabled, Ordering::Relaxed);
    }

    /// Number of datagrams waiting in our inbox for `remote`.
    pub fn pending(&self, remote: RemoteId) -> usize {
        self.side
            .peers
            .lock()
            .get(&remote)
            .map_or(0, |peer| peer.incoming.len())
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, remote: RemoteId, datagram: Vec<u8>, delivery: Delivery) -> Result<(), TransportError> {
        let outgoing = {
            let peers = self.side.peers.lock();
            let peer = peers.get(&remote).ok_or(TransportError::UnknownRemote(remote))?;
            Arc::clone(&peer.outgoing)
        };
        if delivery == Delivery::BestEffort && self.drop_best_effort.load(Ordering::Relaxed) {
            tracing::trace!("Loopback dropped best-effort datagram to {remote}");
            return Ok(());
        }
        outgoing.push(datagram);
        Ok(())
    }

    fn remotes(&self) -> Vec<RemoteId> {
        self.side.peers.lock().keys().copied().collect()
    }

    fn drain(&self, remote: RemoteId) -> Vec<Vec<u8>> {
        let inbox = self.side.peers.lock().get(&remote).map(|peer| Arc::clone(&peer.incoming));
        inbox.map(|inbox| inbox.drain()).unwrap_or_default()
    }

    fn poll_events(&self) -> Vec<TransportEvent> {
        self.events.try_iter().collect()
    }

    fn local_id(&self) -> Option<RemoteId> {
        self.local_id
    }

    fn is_hosting(&self) -> bool {
        self.hosting
    }

    fn disconnect(&self, remote: RemoteId) {
        let Some(peer) = self.side.detach(remote) else {
            return;
        };
        if let Some(other) = peer.side.upgrade() {
            other.detach(peer.id_there);
        }
        tracing::debug!("Loopback link to {remote} closed");
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let peers: Vec<_> = std::mem::take(&mut *self.side.peers.lock()).into_values().collect();
        for peer in peers {
            if let Some(other) = peer.side.upgrade() {
                other.detach(peer.id_there);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_assigns_ids_and_reports_events() {
        let host = LoopbackTransport::host();
        let a = host.connect().unwrap();
        let b = host.connect().unwrap();

        assert_eq!(a.local_id(), Some(RemoteId(1)));
        assert_eq!(b.local_id(), Some(RemoteId(2)));
        assert_eq!(host.remotes(), vec![RemoteId(1), RemoteId(2)]);
        assert_eq!(a.remotes(), vec![RemoteId::SERVER]);
        assert_eq!(
            host.poll_events(),
            vec![
                TransportEvent::Connected(RemoteId(1)),
                TransportEvent::Connected(RemoteId(2))
            ]
        );
        assert_eq!(a.poll_events(), vec![TransportEvent::Connected(RemoteId::SERVER)]);
        assert!(host.poll_events().is_empty());
    }

    #[test]
    fn test_datagrams_flow_both_ways() {
        let host = LoopbackTransport::host();
        let client = host.connect().unwrap();

        host.send(RemoteId(1), vec![1, 2], Delivery::Reliable).unwrap();
        client.send(RemoteId::SERVER, vec![3], Delivery::BestEffort).unwrap();
        client.send(RemoteId::SERVER, vec![4], Delivery::Reliable).unwrap();

        assert_eq!(client.pending(RemoteId::SERVER), 1);
        assert_eq!(client.drain(RemoteId::SERVER), vec![vec![1, 2]]);
        assert_eq!(host.drain(RemoteId(1)), vec![vec![3], vec![4]]);
        assert!(host.drain(RemoteId(1)).is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let host = LoopbackTransport::host();
        let a = host.connect().unwrap();
        let b = host.connect().unwrap();
        host.broadcast(&[9], Delivery::Reliable);
        assert_eq!(a.drain(RemoteId::SERVER), vec![vec![9]]);
        assert_eq!(b.drain(RemoteId::SERVER), vec![vec![9]]);
    }

    #[test]
    fn test_loss_only_affects_best_effort() {
        let host = LoopbackTransport::host();
        let client = host.connect().unwrap();
        host.set_best_effort_loss(true);

        host.send(RemoteId(1), vec![1], Delivery::BestEffort).unwrap();
        host.send(RemoteId(1), vec![2], Delivery::Reliable).unwrap();
        client.send(RemoteId::SERVER, vec![3], Delivery::BestEffort).unwrap();

        assert_eq!(client.drain(RemoteId::SERVER), vec![vec![2]]);
        assert!(host.drain(RemoteId(1)).is_empty());
    }

    #[test]
    fn test_unknown_remote_errors() {
        let host = LoopbackTransport::host();
        let err = host.send(RemoteId(5), vec![], Delivery::Reliable).unwrap_err();
        assert!(matches!(err, TransportError::UnknownRemote(RemoteId(5))));
        assert!(host.drain(RemoteId(5)).is_empty());
    }

    #[test]
    fn test_client_cannot_host() {
        let host = LoopbackTransport::host();
        let client = host.connect().unwrap();
        assert!(matches!(client.connect(), Err(TransportError::NotHosting)));
    }

    #[test]
    fn test_disconnect_notifies_both_sides() {
        let host = LoopbackTransport::host();
        let client = host.connect().unwrap();
        host.poll_events();
        client.poll_events();

        host.disconnect(RemoteId(1));
        assert_eq!(host.poll_events(), vec![TransportEvent::Disconnected(RemoteId(1))]);
        assert_eq!(client.poll_events(), vec![TransportEvent::Disconnected(RemoteId::SERVER)]);
        assert!(host.remotes().is_empty());
        assert!(client.remotes().is_empty());
    }

    #[test]
    fn test_dropping_client_disconnects_it() {
        let host = LoopbackTransport::host();
        let client = host.connect().unwrap();
        host.poll_events();
        drop(client);
        assert_eq!(host.poll_events(), vec![TransportEvent::Disconnected(RemoteId(1))]);
        assert!(host.remotes().is_empty());
    }
}
