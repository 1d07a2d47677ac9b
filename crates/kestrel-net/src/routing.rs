//! Message routing: dispatch received datagrams to type-specific handlers.
//!
//! The [`MessageRouter`] holds one handler slot per [`MessageTag`], built once
//! at startup. [`MessageRouter::route_datagram`] verifies the envelope, decodes
//! the body and invokes the handler with mutable access to the caller's state.
//! Nothing here fails loudly: malformed, mis-signed, unknown and reserved
//! packets are logged at debug level and reported as a [`RouteOutcome`].

use crate::codec::CodecError;
use crate::context::NetContext;
use crate::messages::{Direction, Message, MessageTag};
use crate::packet::{PacketError, PacketHeader, TagCode};
use crate::transport::{RemoteId, Transport, is_control_tag};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Context provided to every message handler.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext {
    /// The remote that sent this message.
    pub remote: RemoteId,
    /// Envelope header of the packet.
    pub header: PacketHeader,
}

/// Trait for message handlers over some state `S`.
pub trait MessageHandler<S>: Send {
    /// Process a single incoming message.
    fn handle(&mut self, state: &mut S, msg: Message, ctx: &HandlerContext);
}

/// Blanket implementation for closures.
impl<S, F> MessageHandler<S> for F
where
    F: FnMut(&mut S, Message, &HandlerContext) + Send,
{
    fn handle(&mut self, state: &mut S, msg: Message, ctx: &HandlerContext) {
        self(state, msg, ctx);
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a datagram never reached a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Short or mis-signed envelope.
    Envelope(PacketError),
    /// A transport-reserved tag leaked through.
    ControlTag(TagCode),
    /// Tag not in the catalogue.
    UnknownTag(TagCode),
    /// Body did not decode.
    Malformed { tag: MessageTag, error: CodecError },
}

/// Result of routing one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A handler consumed the message.
    Handled(MessageTag),
    /// The message decoded but no handler is registered for its tag.
    Unhandled(MessageTag),
    Dropped(DropReason),
}

impl RouteOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, RouteOutcome::Handled(_))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes incoming messages to registered handlers by [`MessageTag`].
pub struct MessageRouter<S> {
    handlers: [Option<Box<dyn MessageHandler<S>>>; MessageTag::COUNT],
    direction: Direction,
}

impl<S> MessageRouter<S> {
    /// Create an empty router for packets travelling in `direction`.
    pub fn new(direction: Direction) -> Self {
        Self {
            handlers: std::array::from_fn(|_| None),
            direction,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Register a handler for a specific message tag, replacing any previous one.
    pub fn register<H: MessageHandler<S> + 'static>(&mut self, tag: MessageTag, handler: H) {
        self.handlers[tag.index()] = Some(Box::new(handler));
    }

    /// Route a decoded message to its handler.
    ///
    /// Returns `true` if a handler was found.
    pub fn route(&mut self, state: &mut S, msg: Message, ctx: &HandlerContext) -> bool {
        let tag = msg.tag();
        match self.handlers[tag.index()].as_mut() {
            Some(handler) => {
                handler.handle(state, msg, ctx);
                true
            }
            None => {
                tracing::debug!("No handler registered for {tag}, dropping message");
                false
            }
        }
    }

    /// Verify, decode and route one datagram from `remote`.
    pub fn route_datagram(
        &mut self,
        state: &mut S,
        net: &NetContext,
        remote: RemoteId,
        bytes: &[u8],
    ) -> RouteOutcome {
        let packet = match net.open(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Dropping packet from {remote}: {e}");
                return RouteOutcome::Dropped(DropReason::Envelope(e));
            }
        };
        let code = packet.header.tag;
        if is_control_tag(code) {
            tracing::debug!("Dropping reserved tag {:?} from {remote}", String::from_utf8_lossy(&code));
            return RouteOutcome::Dropped(DropReason::ControlTag(code));
        }
        let Some(tag) = MessageTag::from_code(code) else {
            tracing::debug!("Dropping unknown tag {:?} from {remote}", String::from_utf8_lossy(&code));
            return RouteOutcome::Dropped(DropReason::UnknownTag(code));
        };

        let mut body = packet.body();
        let msg = match Message::decode(tag, self.direction, &mut body) {
            Ok(msg) => msg,
            Err(error) => {
                tracing::debug!("Dropping malformed {tag} from {remote}: {error}");
                return RouteOutcome::Dropped(DropReason::Malformed { tag, error });
            }
        };
        if !body.is_empty() {
            tracing::trace!("{tag} from {remote} has {} trailing bytes", body.remaining());
        }

        let ctx = HandlerContext {
            remote,
            header: packet.header,
        };
        if self.route(state, msg, &ctx) {
            RouteOutcome::Handled(tag)
        } else {
            RouteOutcome::Unhandled(tag)
        }
    }

    /// Return an iterator over registered tags (useful for startup logging).
    pub fn registered_tags(&self) -> impl Iterator<Item = MessageTag> + '_ {
        MessageTag::ALL
            .into_iter()
            .filter(|tag| self.handlers[tag.index()].is_some())
    }
}

/// Drain every remote's inbox once and route what was queued.
///
/// Each inbox is taken under a single lock acquisition; handlers run after
/// the lock is released. Returns the number of handled messages.
pub fn process_incoming_messages<S>(
    transport: &dyn Transport,
    router: &mut MessageRouter<S>,
    state: &mut S,
    net: &NetContext,
) -> usize {
    let mut handled = 0;
    for remote in transport.remotes() {
        for datagram in transport.drain(remote) {
            if router.route_datagram(state, net, remote, &datagram).is_handled() {
                handled += 1;
            }
        }
    }
    handled
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
