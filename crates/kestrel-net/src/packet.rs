//! Packet envelope: header, body and trailing signature.
//!
//! ```text
//! +-----------+-----------+--------+----------------+-------------+
//! | sequence  | timestamp | tag    | body           | signature   |
//! | u32 LE    | u32 LE    | 4 ASCII| tag-specific   | u32 LE      |
//! +-----------+-----------+--------+----------------+-------------+
//! ```
//!
//! The signature covers every byte before it. Receivers drop anything that is
//! too short to hold a header and signature, or whose signature does not
//! verify.

use crate::codec::{WireReader, WireWriter};

/// Header length in bytes: sequence, timestamp and tag.
pub const HEADER_LEN: usize = 12;

/// Trailing signature length in bytes.
pub const SIGNATURE_LEN: usize = 4;

/// Four ASCII bytes naming a message kind.
pub type TagCode = [u8; 4];

/// Fixed header carried by every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sender-assigned, monotonically increasing sequence number.
    pub sequence: u32,
    /// Sender clock in milliseconds.
    pub timestamp: u32,
    /// Message kind.
    pub tag: TagCode,
}

impl PacketHeader {
    fn write(&self, w: &mut WireWriter) {
        w.write_u32(self.sequence);
        w.write_u32(self.timestamp);
        w.write_raw(&self.tag);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, crate::codec::CodecError> {
        Ok(Self {
            sequence: r.read_u32()?,
            timestamp: r.read_u32()?,
            tag: r.read_array()?,
        })
    }
}

/// Errors raised while opening a received packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Fewer bytes than a header plus signature.
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    /// The trailing signature did not match the contents.
    #[error("packet signature mismatch")]
    BadSignature,
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Computes and checks the trailing packet signature.
pub trait PacketSigner: Send + Sync {
    /// Signature over `bytes`.
    fn signature(&self, bytes: &[u8]) -> u32;

    /// Returns `true` when `signature` matches `bytes`.
    fn verify(&self, bytes: &[u8], signature: u32) -> bool {
        self.signature(bytes) == signature
    }
}

/// Keyed BLAKE3 signer truncated to 32 bits.
///
/// Both ends must share the key. This is an integrity check against
/// corrupted or foreign datagrams, not authentication.
#[derive(Clone)]
pub struct Blake3Signer {
    key: [u8; 32],
}

impl Blake3Signer {
    /// Key derivation context for passphrase-derived keys.
    const CONTEXT: &'static str = "kestrel 2024 packet signature";

    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derives the key from a shared passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(blake3::derive_key(Self::CONTEXT, passphrase.as_bytes()))
    }
}

impl Default for Blake3Signer {
    fn default() -> Self {
        Self::from_passphrase("")
    }
}

impl std::fmt::Debug for Blake3Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blake3Signer").finish_non_exhaustive()
    }
}

impl PacketSigner for Blake3Signer {
    fn signature(&self, bytes: &[u8]) -> u32 {
        let hash = blake3::keyed_hash(&self.key, bytes);
        let mut head = [0u8; 4];
        head.copy_from_slice(&hash.as_bytes()[..4]);
        u32::from_le_bytes(head)
    }
}

// ---------------------------------------------------------------------------
// Outgoing / incoming
// ---------------------------------------------------------------------------

/// A packet under construction. The header is written up front; the body is
/// appended through [`OutgoingPacket::body`] and the signature is added last.
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    writer: WireWriter,
}

impl OutgoingPacket {
    pub fn new(header: PacketHeader) -> Self {
        let mut writer = WireWriter::with_capacity(64);
        header.write(&mut writer);
        Self { writer }
    }

    /// Body writer.
    pub fn body(&mut self) -> &mut WireWriter {
        &mut self.writer
    }

    /// Appends the signature and returns the finished datagram.
    pub fn sign(mut self, signer: &dyn PacketSigner) -> Vec<u8> {
        let signature = signer.signature(self.writer.as_slice());
        self.writer.write_u32(signature);
        self.writer.into_bytes()
    }
}

/// A verified packet borrowed from the receive buffer.
#[derive(Debug, Clone)]
pub struct IncomingPacket<'a> {
    pub header: PacketHeader,
    body: &'a [u8],
}

impl<'a> IncomingPacket<'a> {
    /// Reader positioned at the start of the body.
    pub fn body(&self) -> WireReader<'a> {
        WireReader::new(self.body)
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Verifies the signature of `bytes` and splits off the header.
pub fn open_packet<'a>(
    bytes: &'a [u8],
    signer: &dyn PacketSigner,
) -> Result<IncomingPacket<'a>, PacketError> {
    if bytes.len() < HEADER_LEN + SIGNATURE_LEN {
        return Err(PacketError::TooShort(bytes.len()));
    }
    let (signed, trailer) = bytes.split_at(bytes.len() - SIGNATURE_LEN);
    let mut sig = [0u8; 4];
    sig.copy_from_slice(trailer);
    if !signer.verify(signed, u32::from_le_bytes(sig)) {
        return Err(PacketError::BadSignature);
    }

    let mut r = WireReader::new(signed);
    let header = PacketHeader::read(&mut r).map_err(|_| PacketError::TooShort(bytes.len()))?;
    Ok(IncomingPacket {
        header,
        body: r.read_rest(),
    })
}
