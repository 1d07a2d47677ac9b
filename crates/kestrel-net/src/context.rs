//! Per-process network context.
//!
//! Owns the packet signer, the sequence counter and the millisecond clock that
//! stamp every outgoing packet. One instance is created at startup and handed
//! to whichever side (server or client) drives the transport.

use std::sync::Arc;
use std::time::Instant;

use crate::codec::WireReader;
use crate::messages::{Direction, Message, MessageTag};
use crate::packet::{
    Blake3Signer, IncomingPacket, OutgoingPacket, PacketError, PacketHeader, PacketSigner,
    open_packet,
};

/// Sequence, clock and signer shared by everything that builds packets.
pub struct NetContext {
    signer: Arc<dyn PacketSigner>,
    started: Instant,
    next_sequence: u32,
}

impl NetContext {
    pub fn new(signer: Arc<dyn PacketSigner>) -> Self {
        Self {
            signer,
            started: Instant::now(),
            next_sequence: 0,
        }
    }

    /// Context signing with a key derived from `passphrase`.
    pub fn with_passphrase(passphrase: &str) -> Self {
        Self::new(Arc::new(Blake3Signer::from_passphrase(passphrase)))
    }

    pub fn signer(&self) -> &Arc<dyn PacketSigner> {
        &self.signer
    }

    /// Milliseconds since the context was created, wrapping at `u32::MAX`.
    pub fn timestamp(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    /// Sequence number the next packet will carry.
    pub fn peek_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Builds a header for `tag`, advancing the sequence counter.
    pub fn next_header(&mut self, tag: MessageTag) -> PacketHeader {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        PacketHeader {
            sequence,
            timestamp: self.timestamp(),
            tag: tag.code(),
        }
    }

    /// Encodes and signs `message`.
    pub fn seal(&mut self, message: &Message) -> Vec<u8> {
        let mut packet = OutgoingPacket::new(self.next_header(message.tag()));
        message.encode(packet.body());
        packet.sign(self.signer.as_ref())
    }

    /// Verifies `bytes` and splits off the header.
    pub fn open<'a>(&self, bytes: &'a [u8]) -> Result<IncomingPacket<'a>, PacketError> {
        open_packet(bytes, self.signer.as_ref())
    }

    /// Opens and decodes a datagram in one step. Used by tests and tools that
    /// bypass the router.
    pub fn unseal(&self, bytes: &[u8], direction: Direction) -> Option<(PacketHeader, Message)> {
        let packet = self.open(bytes).ok()?;
        let tag = MessageTag::from_code(packet.header.tag)?;
        let mut body: WireReader<'_> = packet.body();
        let message = Message::decode(tag, direction, &mut body).ok()?;
        Some((packet.header, message))
    }
}

impl Default for NetContext {
    fn default() -> Self {
        Self::new(Arc::new(Blake3Signer::default()))
    }
}

impl std::fmt::Debug for NetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetContext")
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ChatMessage, EntityDelete};

    #[test]
    fn test_sequence_increments() {
        let mut ctx = NetContext::default();
        let a = ctx.next_header(MessageTag::Chat);
        let b = ctx.next_header(MessageTag::Chat);
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(ctx.peek_sequence(), 2);
        assert_eq!(a.tag, *b"CMSG");
    }

    #[test]
    fn test_seal_then_unseal() {
        let mut ctx = NetContext::default();
        let msg = Message::EntityDelete(EntityDelete { world_id: 1, uid: 2 });
        let bytes = ctx.seal(&msg);
        let (header, decoded) = ctx.unseal(&bytes, Direction::ToClient).unwrap();
        assert_eq!(header.tag, *b"ENTD");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_mismatched_contexts_reject() {
        let mut sender = NetContext::with_passphrase("one");
        let receiver = NetContext::with_passphrase("two");
        let bytes = sender.seal(&Message::Chat(ChatMessage { text: "x".into() }));
        assert!(receiver.unseal(&bytes, Direction::ToServer).is_none());
        assert_eq!(receiver.open(&bytes).unwrap_err(), PacketError::BadSignature);
    }
}
