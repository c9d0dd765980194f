//! Pair patterns: one-to-one conversation (v0) and the polyamorous
//! variant (v1).

use std::collections::VecDeque;

use filament_core::error::Error;
use filament_core::message::Message;
use filament_core::options::SocketOptions;

use crate::pipe::{PipeId, PipeSend, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

/// Strict one-to-one pair. Only the first attached pipe carries traffic;
/// later arrivals wait in line and are promoted when the active peer leaves.
pub(crate) struct Pair0Proto {
    active: Option<PipeId>,
    standby: VecDeque<PipeId>,
    rxq: VecDeque<Message>,
    cap: usize,
    /// Set when the peer went away with nothing left to read, so the next
    /// receive reports the loss instead of waiting forever.
    aborted: bool,
}

impl Pair0Proto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        Pair0Proto {
            active: None,
            standby: VecDeque::new(),
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
            aborted: false,
        }
    }
}

impl Protocol for Pair0Proto {
    fn pattern(&self) -> Pattern {
        Pattern::Pair0
    }

    fn pipe_attached(&mut self, id: PipeId) {
        if self.active.is_none() {
            self.active = Some(id);
            self.aborted = false;
        } else {
            self.standby.push_back(id);
        }
    }

    fn pipe_detached(&mut self, id: PipeId) {
        if self.active == Some(id) {
            self.active = self.standby.pop_front();
            if self.active.is_none() && self.rxq.is_empty() {
                self.aborted = true;
            }
        } else {
            self.standby.retain(|p| *p != id);
        }
    }

    fn try_send(&mut self, msg: Message, pipes: &PipeSet) -> SendOutcome {
        let Some(peer) = self.active else {
            return SendOutcome::Park(msg, Error::NotConnected);
        };
        match pipes.send_to(peer, msg) {
            PipeSend::Sent => SendOutcome::Sent,
            PipeSend::Full(m) => SendOutcome::Park(m, Error::WouldBlock),
            PipeSend::Gone(m) => SendOutcome::Park(m, Error::NotConnected),
        }
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        if let Some(msg) = self.rxq.pop_front() {
            return RecvOutcome::Msg(msg);
        }
        if self.aborted {
            self.aborted = false;
            return RecvOutcome::Fail(Error::ConnectionAborted);
        }
        RecvOutcome::Park(Error::WouldBlock)
    }

    fn deliver(&mut self, from: PipeId, msg: Message) -> DeliverOutcome {
        if self.active != Some(from) {
            return DeliverOutcome::Dropped;
        }
        if self.rxq.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        self.rxq.push_back(msg);
        DeliverOutcome::Queued
    }
}

/// Pair v1. In the default mode it behaves exactly like v0. With the
/// `pair1-poly` option set it accepts any number of peers: incoming
/// messages carry their origin pipe id in the header, and outgoing
/// messages with such a stamp are routed back to that pipe.
pub(crate) struct Pair1Proto {
    poly: bool,
    mono: Pair0Proto,
    rxq: VecDeque<Message>,
    cap: usize,
    cursor: usize,
}

impl Pair1Proto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        Pair1Proto {
            poly: opts.pair1_poly,
            mono: Pair0Proto::new(opts),
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
            cursor: 0,
        }
    }
}

impl Protocol for Pair1Proto {
    fn pattern(&self) -> Pattern {
        Pattern::Pair1
    }

    fn pipe_attached(&mut self, id: PipeId) {
        self.mono.pipe_attached(id);
    }

    fn pipe_detached(&mut self, id: PipeId) {
        self.mono.pipe_detached(id);
    }

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        if !self.poly {
            return self.mono.try_send(msg, pipes);
        }
        if let Some(target) = msg.header_pop_u32() {
            return match pipes.send_to(PipeId(target), msg) {
                PipeSend::Sent => SendOutcome::Sent,
                PipeSend::Full(mut m) => {
                    // Re-stamp so a retry routes to the same peer.
                    if m.header_push_u32(target).is_err() {
                        return SendOutcome::Fail(Error::OutOfMemory);
                    }
                    SendOutcome::Park(m, Error::WouldBlock)
                }
                PipeSend::Gone(_) => SendOutcome::Fail(Error::NotFound),
            };
        }
        match pipes.send_round_robin(&mut self.cursor, msg) {
            PipeSend::Sent => SendOutcome::Sent,
            PipeSend::Full(m) => SendOutcome::Park(m, Error::WouldBlock),
            PipeSend::Gone(m) => SendOutcome::Park(m, Error::NotConnected),
        }
    }

    fn try_recv(&mut self, pipes: &PipeSet) -> RecvOutcome {
        if !self.poly {
            return self.mono.try_recv(pipes);
        }
        match self.rxq.pop_front() {
            Some(msg) => RecvOutcome::Msg(msg),
            None => RecvOutcome::Park(Error::WouldBlock),
        }
    }

    fn deliver(&mut self, from: PipeId, mut msg: Message) -> DeliverOutcome {
        if !self.poly {
            return self.mono.deliver(from, msg);
        }
        if self.rxq.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        if msg.header_push_u32(from.0).is_err() {
            return DeliverOutcome::Dropped;
        }
        self.rxq.push_back(msg);
        DeliverOutcome::Queued
    }
}
