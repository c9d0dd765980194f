//! Publish/subscribe pattern.
//!
//! Filtering happens on the subscriber: the publisher broadcasts every
//! message to every connected pipe, best effort, and each subscriber keeps
//! only messages whose body starts with one of its subscribed prefixes.

use std::collections::VecDeque;

use filament_core::error::{Error, Result};
use filament_core::message::Message;
use filament_core::options::SocketOptions;

use crate::pipe::{PipeId, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

/// Publisher. Send never blocks; slow subscribers lose messages.
pub(crate) struct PubProto;

impl PubProto {
    pub(crate) fn new() -> Self {
        PubProto
    }
}

impl Protocol for PubProto {
    fn pattern(&self) -> Pattern {
        Pattern::Pub0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, msg: Message, pipes: &PipeSet) -> SendOutcome {
        // Best effort fan-out; zero subscribers is not an error.
        pipes.broadcast(&msg, None);
        SendOutcome::Sent
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        RecvOutcome::Fail(Error::NotSupported)
    }

    fn deliver(&mut self, _from: PipeId, _msg: Message) -> DeliverOutcome {
        DeliverOutcome::Dropped
    }
}

/// Subscriber. Keeps messages matching any subscribed body prefix. With no
/// subscriptions everything is discarded; the empty prefix matches all.
pub(crate) struct SubProto {
    subs: Vec<Vec<u8>>,
    rxq: VecDeque<Message>,
    cap: usize,
}

impl SubProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        SubProto {
            subs: Vec::new(),
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
        }
    }

    fn matches(&self, body: &[u8]) -> bool {
        self.subs.iter().any(|p| body.starts_with(p))
    }
}

impl Protocol for SubProto {
    fn pattern(&self) -> Pattern {
        Pattern::Sub0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, _msg: Message, _pipes: &PipeSet) -> SendOutcome {
        SendOutcome::Fail(Error::NotSupported)
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        match self.rxq.pop_front() {
            Some(msg) => RecvOutcome::Msg(msg),
            None => RecvOutcome::Park(Error::WouldBlock),
        }
    }

    fn deliver(&mut self, _from: PipeId, msg: Message) -> DeliverOutcome {
        if !self.matches(msg.body()) {
            return DeliverOutcome::Dropped;
        }
        if self.rxq.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        self.rxq.push_back(msg);
        DeliverOutcome::Queued
    }

    fn subscribe(&mut self, prefix: &[u8]) -> Result<()> {
        if !self.subs.iter().any(|p| p == prefix) {
            self.subs.push(prefix.to_vec());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        let before = self.subs.len();
        self.subs.retain(|p| p != prefix);
        if self.subs.len() == before {
            return Err(Error::NotFound);
        }
        Ok(())
    }
}
