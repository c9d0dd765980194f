//! Messaging patterns and the engine trait they all implement.
//!
//! Every socket owns exactly one `Protocol` engine, selected at open time by
//! [`Pattern`]. The engine runs entirely under the socket's state lock: it
//! decides where outgoing messages go, which incoming messages are kept, and
//! what the current pattern state allows. Blocking, timeouts and wakeups are
//! the socket core's business, not the engine's.

use filament_core::error::{Error, Result};
use filament_core::message::Message;
use filament_core::options::SocketOptions;
use std::time::Instant;

use crate::pipe::{PipeId, PipeSet};

mod bus;
mod pair;
mod pipeline;
mod pubsub;
mod reqrep;
mod survey;

pub(crate) use bus::BusProto;
pub(crate) use pair::{Pair0Proto, Pair1Proto};
pub(crate) use pipeline::{PullProto, PushProto};
pub(crate) use pubsub::{PubProto, SubProto};
pub(crate) use reqrep::{RepProto, ReqProto};
pub(crate) use survey::{RespondentProto, SurveyorProto};

/// The messaging pattern a socket speaks.
///
/// The numeric value is the pattern's wire identifier, exchanged during
/// transport handshakes so that mismatched peers can be rejected early. The
/// major/minor split (`value / 16`, `value % 16`) groups pattern families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Pattern {
    /// One-to-one bidirectional conversation.
    Pair0 = 16,
    /// Pair with optional polyamorous mode (many peers, explicit addressing).
    Pair1 = 17,
    /// Broadcast publisher; cannot receive.
    Pub0 = 32,
    /// Filtering subscriber; cannot send.
    Sub0 = 33,
    /// Request side of a request/reply conversation.
    Req0 = 48,
    /// Reply side of a request/reply conversation.
    Rep0 = 49,
    /// Load-balancing producer of a pipeline.
    Push0 = 80,
    /// Fair-merging consumer of a pipeline.
    Pull0 = 81,
    /// Broadcast questioner expecting many timed answers.
    Surveyor0 = 98,
    /// Answerer of surveys.
    Respondent0 = 99,
    /// Many-to-many broadcast without self-echo.
    Bus0 = 112,
}

impl Pattern {
    /// Wire identifier for handshakes and diagnostics.
    pub fn number(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::Pair0 => "pair",
            Pattern::Pair1 => "pair1",
            Pattern::Pub0 => "pub",
            Pattern::Sub0 => "sub",
            Pattern::Req0 => "req",
            Pattern::Rep0 => "rep",
            Pattern::Push0 => "push",
            Pattern::Pull0 => "pull",
            Pattern::Surveyor0 => "surveyor",
            Pattern::Respondent0 => "respondent",
            Pattern::Bus0 => "bus",
        }
    }

    /// The pattern a peer must speak for a connection to be valid.
    pub fn peer(self) -> Pattern {
        match self {
            Pattern::Pair0 => Pattern::Pair0,
            Pattern::Pair1 => Pattern::Pair1,
            Pattern::Pub0 => Pattern::Sub0,
            Pattern::Sub0 => Pattern::Pub0,
            Pattern::Req0 => Pattern::Rep0,
            Pattern::Rep0 => Pattern::Req0,
            Pattern::Push0 => Pattern::Pull0,
            Pattern::Pull0 => Pattern::Push0,
            Pattern::Surveyor0 => Pattern::Respondent0,
            Pattern::Respondent0 => Pattern::Surveyor0,
            Pattern::Bus0 => Pattern::Bus0,
        }
    }

    pub fn is_compatible(self, other: Pattern) -> bool {
        self.peer() == other
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an engine did with an outgoing message.
pub(crate) enum SendOutcome {
    /// Accepted and queued toward a transport.
    Sent,
    /// Could not go out right now; the message is handed back so a blocking
    /// caller can retry once conditions change. The error is what a
    /// non-blocking caller sees.
    Park(Message, Error),
    /// Hard failure; the message is consumed.
    Fail(Error),
}

/// What an engine produced for a receive attempt.
pub(crate) enum RecvOutcome {
    Msg(Message),
    /// Nothing yet; a blocking caller may wait. The error is what a
    /// non-blocking caller sees.
    Park(Error),
    Fail(Error),
}

/// What an engine did with a message arriving from a pipe.
pub(crate) enum DeliverOutcome {
    /// Kept; receivers should be woken.
    Queued,
    /// Filtered out or unroutable; silently discarded.
    Dropped,
    /// Receive queue is full; the message is handed back and the pump must
    /// wait for a receiver to drain the queue.
    Full(Message),
}

/// A pattern engine. All methods are called with the socket lock held.
pub(crate) trait Protocol: Send {
    fn pattern(&self) -> Pattern;

    fn pipe_attached(&mut self, id: PipeId);
    fn pipe_detached(&mut self, id: PipeId);

    fn try_send(&mut self, msg: Message, pipes: &PipeSet) -> SendOutcome;
    fn try_recv(&mut self, pipes: &PipeSet) -> RecvOutcome;
    fn deliver(&mut self, from: PipeId, msg: Message) -> DeliverOutcome;

    /// Earliest instant at which a parked receive must be re-attempted even
    /// without new input (survey expiry). `None` means no such point exists.
    fn recv_wake_hint(&self) -> Option<Instant> {
        None
    }

    /// Topic subscription; only meaningful for Sub sockets.
    fn subscribe(&mut self, _prefix: &[u8]) -> Result<()> {
        Err(Error::NotSupported)
    }

    fn unsubscribe(&mut self, _prefix: &[u8]) -> Result<()> {
        Err(Error::NotSupported)
    }
}

/// Builds the engine for a pattern, sized from the socket's options.
pub(crate) fn new_engine(pattern: Pattern, opts: &SocketOptions) -> Box<dyn Protocol> {
    match pattern {
        Pattern::Pair0 => Box::new(Pair0Proto::new(opts)),
        Pattern::Pair1 => Box::new(Pair1Proto::new(opts)),
        Pattern::Pub0 => Box::new(PubProto::new()),
        Pattern::Sub0 => Box::new(SubProto::new(opts)),
        Pattern::Req0 => Box::new(ReqProto::new()),
        Pattern::Rep0 => Box::new(RepProto::new(opts)),
        Pattern::Push0 => Box::new(PushProto::new()),
        Pattern::Pull0 => Box::new(PullProto::new(opts)),
        Pattern::Surveyor0 => Box::new(SurveyorProto::new(opts)),
        Pattern::Respondent0 => Box::new(RespondentProto::new(opts)),
        Pattern::Bus0 => Box::new(BusProto::new(opts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_numbers_are_stable() {
        assert_eq!(Pattern::Pair0.number(), 16);
        assert_eq!(Pattern::Pair1.number(), 17);
        assert_eq!(Pattern::Pub0.number(), 32);
        assert_eq!(Pattern::Sub0.number(), 33);
        assert_eq!(Pattern::Req0.number(), 48);
        assert_eq!(Pattern::Rep0.number(), 49);
        assert_eq!(Pattern::Push0.number(), 80);
        assert_eq!(Pattern::Pull0.number(), 81);
        assert_eq!(Pattern::Surveyor0.number(), 98);
        assert_eq!(Pattern::Respondent0.number(), 99);
        assert_eq!(Pattern::Bus0.number(), 112);
    }

    #[test]
    fn compatibility_is_symmetric() {
        let all = [
            Pattern::Pair0,
            Pattern::Pair1,
            Pattern::Pub0,
            Pattern::Sub0,
            Pattern::Req0,
            Pattern::Rep0,
            Pattern::Push0,
            Pattern::Pull0,
            Pattern::Surveyor0,
            Pattern::Respondent0,
            Pattern::Bus0,
        ];
        for a in all {
            for b in all {
                assert_eq!(a.is_compatible(b), b.is_compatible(a), "{a} vs {b}");
            }
        }
        assert!(Pattern::Req0.is_compatible(Pattern::Rep0));
        assert!(!Pattern::Req0.is_compatible(Pattern::Req0));
        assert!(Pattern::Bus0.is_compatible(Pattern::Bus0));
        assert!(!Pattern::Pub0.is_compatible(Pattern::Pub0));
    }
}
