//! Transport frames carried in each UDP datagram.
//!
//! Application packets are already signed; the UDP transport wraps them in a
//! thin frame that carries handshake, reliability and keep-alive information.
//!
//! ```text
//! JOIN  version u32, nonce u32 [, assigned id u32]   (reply carries the id)
//! QUIT
//! PING
//! DATA  payload...
//! SAFE  safe id u32, payload...
//! ACKN  safe id u32
//! ```

use crate::codec::{CodecError, WireReader, WireWriter};
use crate::packet::TagCode;
use crate::transport::{ControlTag, RemoteId};

/// Transport protocol version exchanged in `JOIN`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram the transport will receive.
pub const MAX_DATAGRAM: usize = 65_507;

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame codec error: {0}")]
    Codec(#[from] CodecError),

    /// First four bytes are not a transport tag.
    #[error("unknown frame tag {0:?}")]
    UnknownTag(TagCode),
}

/// One decoded transport frame, borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Join {
        version: u32,
        nonce: u32,
        /// Present only in the server's reply.
        assigned: Option<RemoteId>,
    },
    Quit,
    Ping,
    Data(&'a [u8]),
    Safe { id: u32, payload: &'a [u8] },
    Ack(u32),
}

impl<'a> Frame<'a> {
    pub fn tag(&self) -> ControlTag {
        match self {
            Frame::Join { .. } => ControlTag::Join,
            Frame::Quit => ControlTag::Quit,
            Frame::Ping => ControlTag::Ping,
            Frame::Data(_) => ControlTag::Data,
            Frame::Safe { .. } => ControlTag::Safe,
            Frame::Ack(_) => ControlTag::Ack,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(16);
        w.write_raw(&self.tag().code());
        match *self {
            Frame::Join {
                version,
                nonce,
                assigned,
            } => {
                w.write_u32(version);
                w.write_u32(nonce);
                if let Some(id) = assigned {
                    w.write_u32(id.0);
                }
            }
            Frame::Quit | Frame::Ping => {}
            Frame::Data(payload) => w.write_raw(payload),
            Frame::Safe { id, payload } => {
                w.write_u32(id);
                w.write_raw(payload);
            }
            Frame::Ack(id) => w.write_u32(id),
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, FrameError> {
        let mut r = WireReader::new(bytes);
        let code: TagCode = r.read_array()?;
        let tag = ControlTag::from_code(code).ok_or(FrameError::UnknownTag(code))?;
        let frame = match tag {
            ControlTag::Join => {
                let version = r.read_u32()?;
                let nonce = r.read_u32()?;
                let assigned = if r.is_empty() {
                    None
                } else {
                    Some(RemoteId(r.read_u32()?))
                };
                Frame::Join {
                    version,
                    nonce,
                    assigned,
                }
            }
            ControlTag::Quit => Frame::Quit,
            ControlTag::Ping => Frame::Ping,
            ControlTag::Data => Frame::Data(r.read_rest()),
            ControlTag::Safe => Frame::Safe {
                id: r.read_u32()?,
                payload: r.read_rest(),
            },
            ControlTag::Ack => Frame::Ack(r.read_u32()?),
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_request_and_reply() {
        let request = Frame::Join {
            version: PROTOCOL_VERSION,
            nonce: 77,
            assigned: None,
        };
        let bytes = request.encode();
        assert_eq!(&bytes[..4], b"JOIN");
        assert_eq!(bytes.len(), 12);
        assert_eq!(Frame::decode(&bytes).unwrap(), request);

        let reply = Frame::Join {
            version: PROTOCOL_VERSION,
            nonce: 77,
            assigned: Some(RemoteId(3)),
        };
        assert_eq!(Frame::decode(&reply.encode()).unwrap(), reply);
    }

    #[test]
    fn test_safe_carries_payload() {
        let frame = Frame::Safe {
            id: 12,
            payload: b"inner packet",
        };
        let bytes = frame.encode();
        assert_eq!(&bytes[4..8], &12u32.to_le_bytes());
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_empty_frames() {
        assert_eq!(Frame::decode(b"PING").unwrap(), Frame::Ping);
        assert_eq!(Frame::decode(b"QUIT").unwrap(), Frame::Quit);
        assert_eq!(Frame::decode(b"DATA").unwrap(), Frame::Data(&[]));
    }

    #[test]
    fn test_bad_frames_rejected() {
        assert_eq!(
            Frame::decode(b"CMSGxxxx").unwrap_err(),
            FrameError::UnknownTag(*b"CMSG")
        );
        assert!(matches!(Frame::decode(b"AC"), Err(FrameError::Codec(_))));
        assert!(matches!(Frame::decode(b"ACKN\x01"), Err(FrameError::Codec(_))));
    }
}
