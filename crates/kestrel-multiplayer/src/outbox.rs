//! Messages queued by handlers during a tick and sent at its end.

use kestrel_net::{Message, NetContext, RemoteId, Transport};
use tracing::{debug, trace};

/// Who receives a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    One(RemoteId),
    All,
    AllExcept(RemoteId),
}

#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<(Recipient, Message)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, recipient: Recipient, message: Message) {
        self.queue.push((recipient, message));
    }

    pub fn send_to(&mut self, remote: RemoteId, message: Message) {
        self.push(Recipient::One(remote), message);
    }

    pub fn broadcast(&mut self, message: Message) {
        self.push(Recipient::All, message);
    }

    pub fn broadcast_except(&mut self, remote: RemoteId, message: Message) {
        self.push(Recipient::AllExcept(remote), message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Recipient, Message)> {
        self.queue.iter()
    }

    /// Seals every queued message and hands it to `transport` with the
    /// message's own delivery class. Returns the number of datagrams sent.
    pub fn flush(&mut self, transport: &dyn Transport, net: &mut NetContext) -> usize {
        let mut sent = 0;
        for (recipient, message) in self.queue.drain(..) {
            let delivery = message.delivery();
            let bytes = net.seal(&message);
            let targets = match recipient {
                Recipient::One(remote) => vec![remote],
                Recipient::All => transport.remotes(),
                Recipient::AllExcept(skip) => transport
                    .remotes()
                    .into_iter()
                    .filter(|r| *r != skip)
                    .collect(),
            };
            for remote in targets {
                match transport.send(remote, bytes.clone(), delivery) {
                    Ok(()) => sent += 1,
                    Err(e) => debug!("Send of {} to {remote} failed: {e}", message.tag()),
                }
            }
            trace!("Flushed {} ({delivery:?})", message.tag());
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_net::{ChatMessage, Delivery, Direction, LoopbackTransport};

    fn chat(text: &str) -> Message {
        Message::Chat(ChatMessage { text: text.into() })
    }

    #[test]
    fn test_recipients() {
        let host = LoopbackTransport::host();
        let a = host.connect().unwrap();
        let b = host.connect().unwrap();
        let ra = a.local_id().unwrap();
        let mut net = NetContext::default();

        let mut outbox = Outbox::new();
        outbox.send_to(ra, chat("one"));
        outbox.broadcast(chat("all"));
        outbox.broadcast_except(ra, chat("not a"));
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox.flush(&host, &mut net), 4);
        assert!(outbox.is_empty());

        let texts = |t: &LoopbackTransport| -> Vec<String> {
            t.drain(RemoteId::SERVER)
                .iter()
                .filter_map(|d| net.unseal(d, Direction::ToClient))
                .map(|(_, m)| match m {
                    Message::Chat(c) => c.text,
                    other => panic!("unexpected {other:?}"),
                })
                .collect()
        };
        assert_eq!(texts(&a), vec!["one", "all"]);
        assert_eq!(texts(&b), vec!["all", "not a"]);
    }

    #[test]
    fn test_unknown_remote_is_skipped() {
        let host = LoopbackTransport::host();
        let mut net = NetContext::default();
        let mut outbox = Outbox::new();
        outbox.send_to(RemoteId(9), chat("lost"));
        assert_eq!(outbox.flush(&host, &mut net), 0);
        assert_eq!(chat("lost").delivery(), Delivery::Reliable);
    }
}
