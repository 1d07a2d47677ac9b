//! UDP transport with optional reliable delivery.
//!
//! A dedicated network thread runs a current-thread tokio runtime that owns
//! the socket. The game thread talks to it through a command channel and
//! reads from per-remote [`RemoteInbox`] queues.
//!
//! Reliable datagrams travel in `SAFE` frames and are resent every
//! `resend_interval` until an `ACKN` arrives or `max_resends` is spent.
//! Receivers acknowledge every `SAFE` and drop repeats using a bounded window
//! of recently seen ids. A remote that stays silent for `timeout` is
//! disconnected; idle links carry a `PING` every `heartbeat_interval`.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::framing::{Frame, MAX_DATAGRAM, PROTOCOL_VERSION};
use crate::platform::{SocketConfig, bind_udp, ephemeral_for};
use crate::transport::{Delivery, RemoteId, RemoteInbox, Transport, TransportError, TransportEvent};

/// Number of recent `SAFE` ids remembered per remote for de-duplication.
const DEDUP_WINDOW: usize = 128;

/// How often the network thread checks resends, heartbeats and timeouts.
const SERVICE_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for [`UdpTransport`].
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Delay before an unacknowledged reliable datagram is resent. Default: 200ms.
    pub resend_interval: Duration,
    /// Resends before a reliable datagram is abandoned. Default: 10.
    pub max_resends: u32,
    /// Idle time before a keep-alive is sent. Default: 1s.
    pub heartbeat_interval: Duration,
    /// Silence after which a remote is disconnected. Default: 10s.
    pub timeout: Duration,
    /// Time a client waits for the server's `JOIN` reply. Default: 5s.
    pub connect_timeout: Duration,
    /// Maximum simultaneous clients on a host. Default: 64.
    pub max_clients: usize,
    pub socket: SocketConfig,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            resend_interval: Duration::from_millis(200),
            max_resends: 10,
            heartbeat_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            max_clients: 64,
            socket: SocketConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Game-thread handle
// ---------------------------------------------------------------------------

enum Command {
    Send {
        remote: RemoteId,
        datagram: Vec<u8>,
        delivery: Delivery,
    },
    Disconnect(RemoteId),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    inboxes: Mutex<BTreeMap<RemoteId, Arc<RemoteInbox>>>,
    local_id: Mutex<Option<RemoteId>>,
}

/// UDP implementation of [`Transport`].
pub struct UdpTransport {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    events: Receiver<TransportEvent>,
    hosting: bool,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl UdpTransport {
    /// Binds `addr` and starts accepting clients.
    pub fn host(addr: SocketAddr, config: UdpConfig) -> Result<Self, TransportError> {
        let socket = bind_udp(addr, &config.socket)?;
        let transport = Self::spawn(socket, None, config)?;
        tracing::info!("Hosting on {}", transport.local_addr);
        Ok(transport)
    }

    /// Connects to a server, blocking until the handshake completes or
    /// `connect_timeout` passes.
    pub fn connect(server: SocketAddr, config: UdpConfig) -> Result<Self, TransportError> {
        let socket = bind_udp(ephemeral_for(server), &config.socket)?;
        let wait = config.connect_timeout + Duration::from_millis(250);
        let (ready_tx, ready_rx) = bounded(1);
        let handshake = Handshake {
            server,
            nonce: rand::random(),
            ready: ready_tx,
            started: Instant::now(),
            last_attempt: Instant::now(),
        };
        let transport = Self::spawn(socket, Some(handshake), config)?;
        match ready_rx.recv_timeout(wait) {
            Ok(Ok(())) => {
                tracing::info!("Connected to {server} as {:?}", transport.local_id());
                Ok(transport)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::ConnectTimeout(server.to_string())),
        }
    }

    fn spawn(
        socket: std::net::UdpSocket,
        handshake: Option<Handshake>,
        config: UdpConfig,
    ) -> Result<Self, TransportError> {
        let local_addr = socket.local_addr()?;
        let hosting = handshake.is_none();
        let shared = Arc::new(Shared::default());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = unbounded();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let worker = Worker {
            hosting,
            handshake,
            config,
            shared: Arc::clone(&shared),
            events: event_tx,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_client: 1,
        };
        let thread = std::thread::Builder::new()
            .name("kestrel-net".into())
            .spawn(move || {
                runtime.block_on(async move {
                    match UdpSocket::from_std(socket) {
                        Ok(socket) => worker.run(socket, cmd_rx).await,
                        Err(e) => tracing::error!("UDP socket setup failed: {e}"),
                    }
                });
            })?;

        Ok(Self {
            shared,
            commands: cmd_tx,
            events: event_rx,
            hosting,
            local_addr,
            thread: Some(thread),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for UdpTransport {
    fn send(&self, remote: RemoteId, datagram: Vec<u8>, delivery: Delivery) -> Result<(), TransportError> {
        if !self.shared.inboxes.lock().contains_key(&remote) {
            return Err(TransportError::UnknownRemote(remote));
        }
        self.commands
            .send(Command::Send {
                remote,
                datagram,
                delivery,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn remotes(&self) -> Vec<RemoteId> {
        self.shared.inboxes.lock().keys().copied().collect()
    }

    fn drain(&self, remote: RemoteId) -> Vec<Vec<u8>> {
        let inbox = self.shared.inboxes.lock().get(&remote).map(Arc::clone);
        inbox.map(|inbox| inbox.drain()).unwrap_or_default()
    }

    fn poll_events(&self) -> Vec<TransportEvent> {
        self.events.try_iter().collect()
    }

    fn local_id(&self) -> Option<RemoteId> {
        *self.shared.local_id.lock()
    }

    fn is_hosting(&self) -> bool {
        self.hosting
    }

    fn disconnect(&self, remote: RemoteId) {
        let _ = self.commands.send(Command::Disconnect(remote));
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Network thread panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Network thread
// ---------------------------------------------------------------------------

struct Handshake {
    server: SocketAddr,
    nonce: u32,
    ready: Sender<Result<(), TransportError>>,
    started: Instant,
    last_attempt: Instant,
}

struct Unacked {
    frame: Vec<u8>,
    sent_at: Instant,
    resends: u32,
}

struct PeerState {
    addr: SocketAddr,
    last_heard: Instant,
    last_sent: Instant,
    next_safe: u32,
    unacked: BTreeMap<u32, Unacked>,
    seen: VecDeque<u32>,
}

impl PeerState {
    fn new(addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            addr,
            last_heard: now,
            last_sent: now,
            next_safe: 0,
            unacked: BTreeMap::new(),
            seen: VecDeque::with_capacity(DEDUP_WINDOW),
        }
    }

    /// Records `safe_id`; returns `false` if it was already seen.
    fn first_sighting(&mut self, safe_id: u32) -> bool {
        if self.seen.contains(&safe_id) {
            return false;
        }
        if self.seen.len() == DEDUP_WINDOW {
            self.seen.pop_front();
        }
        self.seen.push_back(safe_id);
        true
    }
}

struct Worker {
    hosting: bool,
    /// Pending client handshake; `None` once connected and always on a host.
    handshake: Option<Handshake>,
    config: UdpConfig,
    shared: Arc<Shared>,
    events: Sender<TransportEvent>,
    peers: HashMap<RemoteId, PeerState>,
    by_addr: HashMap<SocketAddr, RemoteId>,
    next_client: u32,
}

async fn send_raw(socket: &UdpSocket, addr: SocketAddr, bytes: &[u8]) {
    if let Err(e) = socket.send_to(bytes, addr).await {
        tracing::debug!("UDP send to {addr} failed: {e}");
    }
}

fn deliver(shared: &Shared, remote: RemoteId, payload: &[u8]) {
    let inbox = shared.inboxes.lock().get(&remote).map(Arc::clone);
    if let Some(inbox) = inbox {
        inbox.push(payload.to_vec());
    }
}

impl Worker {
    async fn run(mut self, socket: UdpSocket, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut service = tokio::time::interval(SERVICE_INTERVAL);
        service.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if let Some(handshake) = &self.handshake {
            let join = Frame::Join {
                version: PROTOCOL_VERSION,
                nonce: handshake.nonce,
                assigned: None,
            };
            send_raw(&socket, handshake.server, &join.encode()).await;
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Send { remote, datagram, delivery }) => {
                        self.send(&socket, remote, &datagram, delivery).await;
                    }
                    Some(Command::Disconnect(remote)) => {
                        if let Some(peer) = self.peers.get(&remote) {
                            send_raw(&socket, peer.addr, &Frame::Quit.encode()).await;
                        }
                        self.remove_peer(remote);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.on_datagram(&socket, &buf[..len], from).await,
                    Err(e) => tracing::debug!("UDP receive error: {e}"),
                },
                _ = service.tick() => {
                    if !self.service(&socket).await {
                        break;
                    }
                }
            }
        }

        let quit = Frame::Quit.encode();
        for peer in self.peers.values() {
            send_raw(&socket, peer.addr, &quit).await;
        }
        tracing::debug!("Network thread stopped");
    }

    fn add_peer(&mut self, id: RemoteId, addr: SocketAddr) {
        self.peers.insert(id, PeerState::new(addr));
        self.by_addr.insert(addr, id);
        self.shared
            .inboxes
            .lock()
            .insert(id, Arc::new(RemoteInbox::new()));
        let _ = self.events.send(TransportEvent::Connected(id));
    }

    fn remove_peer(&mut self, id: RemoteId) {
        let Some(peer) = self.peers.remove(&id) else {
            return;
        };
        self.by_addr.remove(&peer.addr);
        self.shared.inboxes.lock().remove(&id);
        let _ = self.events.send(TransportEvent::Disconnected(id));
        tracing::info!("{id} at {} disconnected", peer.addr);
    }

    async fn send(&mut self, socket: &UdpSocket, remote: RemoteId, datagram: &[u8], delivery: Delivery) {
        let Some(peer) = self.peers.get_mut(&remote) else {
            tracing::debug!("Dropping datagram for departed {remote}");
            return;
        };
        let now = Instant::now();
        let frame = match delivery {
            Delivery::BestEffort => Frame::Data(datagram).encode(),
            Delivery::Reliable => {
                let id = peer.next_safe;
                peer.next_safe = peer.next_safe.wrapping_add(1);
                let frame = Frame::Safe {
                    id,
                    payload: datagram,
                }
                .encode();
                peer.unacked.insert(
                    id,
                    Unacked {
                        frame: frame.clone(),
                        sent_at: now,
                        resends: 0,
                    },
                );
                frame
            }
        };
        peer.last_sent = now;
        send_raw(socket, peer.addr, &frame).await;
    }

    async fn on_datagram(&mut self, socket: &UdpSocket, bytes: &[u8], from: SocketAddr) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Dropping datagram from {from}: {e}");
                return;
            }
        };

        if let Frame::Join {
            version,
            nonce,
            assigned,
        } = frame
        {
            self.on_join(socket, from, version, nonce, assigned).await;
            return;
        }

        let Some(&id) = self.by_addr.get(&from) else {
            tracing::trace!("Ignoring {:?} from unknown {from}", frame.tag());
            return;
        };
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        peer.last_heard = Instant::now();

        match frame {
            Frame::Data(payload) => deliver(&self.shared, id, payload),
            Frame::Safe {
                id: safe_id,
                payload,
            } => {
                send_raw(socket, peer.addr, &Frame::Ack(safe_id).encode()).await;
                peer.last_sent = Instant::now();
                if peer.first_sighting(safe_id) {
                    deliver(&self.shared, id, payload);
                } else {
                    tracing::trace!("Duplicate reliable datagram {safe_id} from {id}");
                }
            }
            Frame::Ack(safe_id) => {
                peer.unacked.remove(&safe_id);
            }
            Frame::Ping | Frame::Join { .. } => {}
            Frame::Quit => self.remove_peer(id),
        }
    }

    async fn on_join(
        &mut self,
        socket: &UdpSocket,
        from: SocketAddr,
        version: u32,
        nonce: u32,
        assigned: Option<RemoteId>,
    ) {
        if version != PROTOCOL_VERSION {
            tracing::warn!("Rejecting {from}: protocol version {version}, expected {PROTOCOL_VERSION}");
            return;
        }

        if self.hosting {
            let id = match self.by_addr.get(&from) {
                Some(&id) => id,
                None => {
                    if self.peers.len() >= self.config.max_clients {
                        tracing::warn!("Rejecting {from}: client limit reached");
                        return;
                    }
                    let id = RemoteId(self.next_client);
                    self.next_client += 1;
                    self.add_peer(id, from);
                    tracing::info!("{id} joined from {from}");
                    id
                }
            };
            let reply = Frame::Join {
                version: PROTOCOL_VERSION,
                nonce,
                assigned: Some(id),
            };
            send_raw(socket, from, &reply.encode()).await;
            return;
        }

        let Some(assigned) = assigned else {
            return;
        };
        let accepted = self
            .handshake
            .as_ref()
            .is_some_and(|h| h.server == from && h.nonce == nonce);
        if !accepted {
            return;
        }
        if let Some(handshake) = self.handshake.take() {
            *self.shared.local_id.lock() = Some(assigned);
            self.add_peer(RemoteId::SERVER, from);
            let _ = handshake.ready.send(Ok(()));
        }
    }

    /// Periodic resend, keep-alive and timeout work. Returns `false` when the
    /// thread should stop.
    async fn service(&mut self, socket: &UdpSocket) -> bool {
        let now = Instant::now();

        if let Some(handshake) = &mut self.handshake {
            if now.duration_since(handshake.started) >= self.config.connect_timeout {
                let _ = handshake
                    .ready
                    .send(Err(TransportError::ConnectTimeout(handshake.server.to_string())));
                return false;
            }
            if now.duration_since(handshake.last_attempt) >= self.config.resend_interval {
                handshake.last_attempt = now;
                let join = Frame::Join {
                    version: PROTOCOL_VERSION,
                    nonce: handshake.nonce,
                    assigned: None,
                };
                send_raw(socket, handshake.server, &join.encode()).await;
            }
            return true;
        }

        let mut timed_out = Vec::new();
        for (&id, peer) in self.peers.iter_mut() {
            if now.duration_since(peer.last_heard) >= self.config.timeout {
                timed_out.push(id);
                continue;
            }

            let mut abandoned = Vec::new();
            for (&safe_id, pending) in peer.unacked.iter_mut() {
                if now.duration_since(pending.sent_at) < self.config.resend_interval {
                    continue;
                }
                if pending.resends >= self.config.max_resends {
                    abandoned.push(safe_id);
                    continue;
                }
                pending.resends += 1;
                pending.sent_at = now;
                send_raw(socket, peer.addr, &pending.frame).await;
                peer.last_sent = now;
            }
            for safe_id in abandoned {
                peer.unacked.remove(&safe_id);
                tracing::debug!(
                    "Reliable datagram {safe_id} to {id} abandoned after {} resends",
                    self.config.max_resends
                );
            }

            if now.duration_since(peer.last_sent) >= self.config.heartbeat_interval {
                send_raw(socket, peer.addr, &Frame::Ping.encode()).await;
                peer.last_sent = now;
            }
        }

        for id in timed_out {
            tracing::warn!("{id} timed out");
            self.remove_peer(id);
        }

        self.hosting || !self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> UdpConfig {
        UdpConfig {
            resend_interval: Duration::from_millis(30),
            heartbeat_interval: Duration::from_millis(50),
            timeout: Duration::from_millis(400),
            connect_timeout: Duration::from_secs(2),
            ..UdpConfig::default()
        }
    }

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// Polls `f` until it returns `Some` or two seconds pass.
    fn wait_for<T>(mut f: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(value) = f() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn raw_peer() -> std::net::UdpSocket {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn raw_join(socket: &std::net::UdpSocket, host: SocketAddr) -> RemoteId {
        let join = Frame::Join {
            version: PROTOCOL_VERSION,
            nonce: 5,
            assigned: None,
        };
        socket.send_to(&join.encode(), host).unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        match Frame::decode(&buf[..len]).unwrap() {
            Frame::Join {
                assigned: Some(id),
                nonce: 5,
                ..
            } => id,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_client_connects_and_exchanges_datagrams() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let client = UdpTransport::connect(host.local_addr(), fast_config()).unwrap();

        assert_eq!(client.local_id(), Some(RemoteId(1)));
        assert_eq!(client.remotes(), vec![RemoteId::SERVER]);
        wait_for(|| (host.remotes() == vec![RemoteId(1)]).then_some(()));
        assert_eq!(host.poll_events(), vec![TransportEvent::Connected(RemoteId(1))]);

        client
            .send(RemoteId::SERVER, b"reliable".to_vec(), Delivery::Reliable)
            .unwrap();
        let got = wait_for(|| {
            let d = host.drain(RemoteId(1));
            (!d.is_empty()).then_some(d)
        });
        assert_eq!(got, vec![b"reliable".to_vec()]);

        host.send(RemoteId(1), b"fast".to_vec(), Delivery::BestEffort)
            .unwrap();
        let got = wait_for(|| {
            let d = client.drain(RemoteId::SERVER);
            (!d.is_empty()).then_some(d)
        });
        assert_eq!(got, vec![b"fast".to_vec()]);
    }

    #[test]
    fn test_duplicate_safe_delivered_once_and_acked_twice() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let raw = raw_peer();
        let id = raw_join(&raw, host.local_addr());

        let safe = Frame::Safe {
            id: 9,
            payload: b"once",
        }
        .encode();
        raw.send_to(&safe, host.local_addr()).unwrap();
        raw.send_to(&safe, host.local_addr()).unwrap();

        let mut acks = 0;
        let mut buf = [0u8; 64];
        while acks < 2 {
            let (len, _) = raw.recv_from(&mut buf).unwrap();
            if Frame::decode(&buf[..len]).unwrap() == Frame::Ack(9) {
                acks += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(host.drain(id), vec![b"once".to_vec()]);
    }

    #[test]
    fn test_reliable_resent_until_acked() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let raw = raw_peer();
        let id = raw_join(&raw, host.local_addr());
        wait_for(|| host.remotes().contains(&id).then_some(()));

        host.send(id, b"important".to_vec(), Delivery::Reliable).unwrap();

        let mut copies = 0;
        let mut buf = [0u8; 64];
        while copies < 2 {
            let (len, _) = raw.recv_from(&mut buf).unwrap();
            if let Frame::Safe { id: safe_id, payload } = Frame::decode(&buf[..len]).unwrap() {
                assert_eq!(payload, b"important");
                copies += 1;
                if copies == 2 {
                    raw.send_to(&Frame::Ack(safe_id).encode(), host.local_addr())
                        .unwrap();
                }
            }
        }
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_silent_remote_times_out() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let raw = raw_peer();
        let id = raw_join(&raw, host.local_addr());

        wait_for(|| {
            host.poll_events()
                .contains(&TransportEvent::Disconnected(id))
                .then_some(())
        });
        assert!(host.remotes().is_empty());
    }

    #[test]
    fn test_wrong_version_ignored() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let raw = raw_peer();
        raw.set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        let join = Frame::Join {
            version: PROTOCOL_VERSION + 1,
            nonce: 1,
            assigned: None,
        };
        raw.send_to(&join.encode(), host.local_addr()).unwrap();
        let mut buf = [0u8; 64];
        assert!(raw.recv_from(&mut buf).is_err());
        assert!(host.remotes().is_empty());
    }

    #[test]
    fn test_client_disconnect_reaches_host() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let client = UdpTransport::connect(host.local_addr(), fast_config()).unwrap();
        wait_for(|| (!host.remotes().is_empty()).then_some(()));
        host.poll_events();

        drop(client);
        wait_for(|| {
            host.poll_events()
                .contains(&TransportEvent::Disconnected(RemoteId(1)))
                .then_some(())
        });
    }

    #[test]
    fn test_connect_to_nobody_times_out() {
        let silent = raw_peer();
        let config = UdpConfig {
            connect_timeout: Duration::from_millis(200),
            ..fast_config()
        };
        let result = UdpTransport::connect(silent.local_addr().unwrap(), config);
        assert!(matches!(result, Err(TransportError::ConnectTimeout(_))));
    }

    #[test]
    fn test_send_to_unknown_remote_fails() {
        let host = UdpTransport::host(localhost(), fast_config()).unwrap();
        let err = host.send(RemoteId(9), vec![1], Delivery::Reliable).unwrap_err();
        assert!(matches!(err, TransportError::UnknownRemote(RemoteId(9))));
    }
}
