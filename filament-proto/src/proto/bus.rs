//! Bus pattern: every socket broadcasts to every peer and receives from all
//! of them, without ever seeing its own messages back.
//!
//! Messages arriving from a pipe are stamped with that pipe's id in the
//! header. When an application forwards such a message back out, the stamp
//! excludes the origin pipe from the broadcast, so a relay node does not
//! echo traffic to whoever sent it.

use std::collections::VecDeque;

use filament_core::error::Error;
use filament_core::message::Message;
use filament_core::options::SocketOptions;

use crate::pipe::{PipeId, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

pub(crate) struct BusProto {
    rxq: VecDeque<Message>,
    cap: usize,
}

impl BusProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        BusProto {
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
        }
    }
}

impl Protocol for BusProto {
    fn pattern(&self) -> Pattern {
        Pattern::Bus0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        let skip = msg.header_pop_u32().map(PipeId);
        // Best effort, like Pub: slow peers lose messages.
        pipes.broadcast(&msg, skip);
        SendOutcome::Sent
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        match self.rxq.pop_front() {
            Some(msg) => RecvOutcome::Msg(msg),
            None => RecvOutcome::Park(Error::WouldBlock),
        }
    }

    fn deliver(&mut self, from: PipeId, mut msg: Message) -> DeliverOutcome {
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
