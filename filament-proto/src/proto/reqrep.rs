//! Request/reply pattern.
//!
//! Every request carries a 32-bit correlation id in the message header. The
//! requester stamps it on the way out and accepts only a reply carrying the
//! id of its one outstanding request; stale replies are discarded. The
//! replier remembers which pipe and id the current request came from, and
//! routes the reply back with the same stamp.

use std::collections::VecDeque;

use filament_core::error::Error;
use filament_core::message::Message;
use filament_core::options::SocketOptions;
use rand::Rng;

use crate::pipe::{PipeId, PipeSend, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

/// Requester. One outstanding request at a time; a fresh send abandons the
/// previous conversation and its late reply, if any, is dropped on arrival.
pub(crate) struct ReqProto {
    /// Next correlation id. The high bit is always set, distinguishing
    /// request stamps from other header words.
    next_id: u32,
    outstanding: Option<u32>,
    reply: Option<Message>,
    cursor: usize,
}

impl ReqProto {
    pub(crate) fn new() -> Self {
        ReqProto {
            next_id: rand::thread_rng().gen::<u32>() | 0x8000_0000,
            outstanding: None,
            reply: None,
            cursor: 0,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1) | 0x8000_0000;
        id
    }
}

impl Protocol for ReqProto {
    fn pattern(&self) -> Pattern {
        Pattern::Req0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        let id = self.alloc_id();
        if msg.header_push_u32(id).is_err() {
            return SendOutcome::Fail(Error::OutOfMemory);
        }
        match pipes.send_round_robin(&mut self.cursor, msg) {
            PipeSend::Sent => {
                self.outstanding = Some(id);
                self.reply = None;
                SendOutcome::Sent
            }
            PipeSend::Full(mut m) => {
                m.header_pop_u32();
                SendOutcome::Park(m, Error::WouldBlock)
            }
            PipeSend::Gone(mut m) => {
                m.header_pop_u32();
                SendOutcome::Park(m, Error::NotConnected)
            }
        }
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        if let Some(msg) = self.reply.take() {
            self.outstanding = None;
            return RecvOutcome::Msg(msg);
        }
        if self.outstanding.is_some() {
            RecvOutcome::Park(Error::WouldBlock)
        } else {
            // Receive without a request in flight.
            RecvOutcome::Fail(Error::InvalidState)
        }
    }

    fn deliver(&mut self, _from: PipeId, mut msg: Message) -> DeliverOutcome {
        let Some(id) = msg.header_pop_u32() else {
            return DeliverOutcome::Dropped;
        };
        if self.outstanding != Some(id) || self.reply.is_some() {
            return DeliverOutcome::Dropped;
        }
        self.reply = Some(msg);
        DeliverOutcome::Queued
    }
}

/// Replier. Incoming requests queue up in arrival order; each receive arms
/// the reply route for exactly one send.
pub(crate) struct RepProto {
    backlog: VecDeque<(PipeId, u32, Message)>,
    cap: usize,
    /// Route armed by the last received request, consumed by the reply.
    current: Option<(PipeId, u32)>,
}

impl RepProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        RepProto {
            backlog: VecDeque::new(),
            cap: opts.recv_buffer,
            current: None,
        }
    }
}

impl Protocol for RepProto {
    fn pattern(&self) -> Pattern {
        Pattern::Rep0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, id: PipeId) {
        self.backlog.retain(|(p, _, _)| *p != id);
        // An armed reply route to a dead pipe stays; the reply is simply
        // discarded at send time.
    }

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        let Some((pipe, id)) = self.current else {
            // Reply without a pending request.
            return SendOutcome::Fail(Error::InvalidState);
        };
        if msg.header_push_u32(id).is_err() {
            return SendOutcome::Fail(Error::OutOfMemory);
        }
        match pipes.send_to(pipe, msg) {
            PipeSend::Sent => {
                self.current = None;
                SendOutcome::Sent
            }
            PipeSend::Full(mut m) => {
                m.header_pop_u32();
                SendOutcome::Park(m, Error::WouldBlock)
            }
            PipeSend::Gone(_) => {
                // Requester went away; the reply has nowhere to go.
                tracing::debug!(pipe = %pipe, "discarding reply, requester gone");
                self.current = None;
                SendOutcome::Sent
            }
        }
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        match self.backlog.pop_front() {
            Some((pipe, id, msg)) => {
                self.current = Some((pipe, id));
                RecvOutcome::Msg(msg)
            }
            None => RecvOutcome::Park(Error::WouldBlock),
        }
    }

    fn deliver(&mut self, from: PipeId, mut msg: Message) -> DeliverOutcome {
        if self.backlog.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        let Some(id) = msg.header_pop_u32() else {
            return DeliverOutcome::Dropped;
        };
        self.backlog.push_back((from, id, msg));
        DeliverOutcome::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipes(n: usize) -> (PipeSet, Vec<flume::Receiver<Message>>) {
        let mut set = PipeSet::default();
        let mut rxs = Vec::new();
        for i in 0..n {
            let (tx, rx) = flume::bounded(8);
            set.insert(PipeId(i as u32 + 1), tx);
            rxs.push(rx);
        }
        (set, rxs)
    }

    #[test]
    fn req_stamps_and_matches_correlation_id() {
        let mut req = ReqProto::new();
        let (set, rxs) = pipes(1);
        req.pipe_attached(PipeId(1));

        assert!(matches!(
            req.try_send(Message::from_slice(b"ask").unwrap(), &set),
            SendOutcome::Sent
        ));
        let mut wire = rxs[0].recv().unwrap();
        let id = wire.header_pop_u32().unwrap();
        assert!(id & 0x8000_0000 != 0);

        // A reply with the wrong id is dropped, the right one is kept.
        let mut bogus = Message::from_slice(b"bad").unwrap();
        bogus.header_push_u32(id ^ 1).unwrap();
        assert!(matches!(
            req.deliver(PipeId(1), bogus),
            DeliverOutcome::Dropped
        ));

        let mut good = Message::from_slice(b"ok").unwrap();
        good.header_push_u32(id).unwrap();
        assert!(matches!(req.deliver(PipeId(1), good), DeliverOutcome::Queued));
        match req.try_recv(&set) {
            RecvOutcome::Msg(m) => assert_eq!(m.body(), b"ok"),
            _ => panic!("expected reply"),
        }
    }

    #[test]
    fn req_recv_without_request_is_a_state_error() {
        let mut req = ReqProto::new();
        let (set, _rxs) = pipes(1);
        assert!(matches!(
            req.try_recv(&set),
            RecvOutcome::Fail(Error::InvalidState)
        ));
    }

    #[test]
    fn req_fresh_send_abandons_previous() {
        let mut req = ReqProto::new();
        let (set, rxs) = pipes(1);
        req.pipe_attached(PipeId(1));

        req.try_send(Message::from_slice(b"one").unwrap(), &set);
        let first = rxs[0].recv().unwrap().header_peek_u32().unwrap();
        req.try_send(Message::from_slice(b"two").unwrap(), &set);

        // The late reply to the first request no longer matches.
        let mut late = Message::from_slice(b"late").unwrap();
        late.header_push_u32(first).unwrap();
        assert!(matches!(req.deliver(PipeId(1), late), DeliverOutcome::Dropped));
    }

    #[test]
    fn rep_reply_without_request_is_a_state_error() {
        let opts = SocketOptions::default();
        let mut rep = RepProto::new(&opts);
        let (set, _rxs) = pipes(1);
        assert!(matches!(
            rep.try_send(Message::from_slice(b"oops").unwrap(), &set),
            SendOutcome::Fail(Error::InvalidState)
        ));
    }

    #[test]
    fn rep_routes_reply_to_requesting_pipe() {
        let opts = SocketOptions::default();
        let mut rep = RepProto::new(&opts);
        let (set, rxs) = pipes(2);
        rep.pipe_attached(PipeId(1));
        rep.pipe_attached(PipeId(2));

        let mut reqmsg = Message::from_slice(b"ask").unwrap();
        reqmsg.header_push_u32(0x8000_0001).unwrap();
        assert!(matches!(rep.deliver(PipeId(2), reqmsg), DeliverOutcome::Queued));

        match rep.try_recv(&set) {
            RecvOutcome::Msg(m) => assert_eq!(m.body(), b"ask"),
            _ => panic!("expected request"),
        }
        assert!(matches!(
            rep.try_send(Message::from_slice(b"ans").unwrap(), &set),
            SendOutcome::Sent
        ));
        assert!(rxs[0].is_empty());
        let mut out = rxs[1].recv().unwrap();
        assert_eq!(out.header_pop_u32(), Some(0x8000_0001));
        assert_eq!(out.body(), b"ans");
    }

    #[test]
    fn rep_discards_reply_when_requester_gone() {
        let opts = SocketOptions::default();
        let mut rep = RepProto::new(&opts);
        let (mut set, _rxs) = pipes(1);
        rep.pipe_attached(PipeId(1));

        let mut reqmsg = Message::from_slice(b"ask").unwrap();
        reqmsg.header_push_u32(7 | 0x8000_0000).unwrap();
        rep.deliver(PipeId(1), reqmsg);
        let _ = rep.try_recv(&set);

        set.remove(PipeId(1));
        rep.pipe_detached(PipeId(1));

        // Best effort: the reply is consumed without error.
        assert!(matches!(
            rep.try_send(Message::from_slice(b"ans").unwrap(), &set),
            SendOutcome::Sent
        ));
    }
}
