//! Surveyor/respondent pattern.
//!
//! A survey is a broadcast question with a deadline. Each survey carries a
//! 32-bit survey id in the header; responses stamped with a stale id, or
//! arriving after the deadline, are discarded. Respondents answer the most
//! recent survey from each peer, routed back like a reply.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use filament_core::error::Error;
use filament_core::message::Message;
use filament_core::options::SocketOptions;
use hashbrown::HashMap;
use rand::Rng;

use crate::pipe::{PipeId, PipeSend, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

pub(crate) struct SurveyorProto {
    next_id: u32,
    /// Active survey id and its deadline, if one is open.
    survey: Option<(u32, Instant)>,
    survey_time: Duration,
    rxq: VecDeque<Message>,
    cap: usize,
}

impl SurveyorProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        SurveyorProto {
            next_id: rand::thread_rng().gen::<u32>() | 0x8000_0000,
            survey: None,
            survey_time: opts.survey_time,
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1) | 0x8000_0000;
        id
    }
}

impl Protocol for SurveyorProto {
    fn pattern(&self) -> Pattern {
        Pattern::Surveyor0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        let id = self.alloc_id();
        if msg.header_push_u32(id).is_err() {
            return SendOutcome::Fail(Error::OutOfMemory);
        }
        // A new survey cancels the previous one and its pending answers.
        pipes.broadcast(&msg, None);
        self.survey = Some((id, Instant::now() + self.survey_time));
        self.rxq.clear();
        SendOutcome::Sent
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        let Some((_, expiry)) = self.survey else {
            // No survey in flight.
            return RecvOutcome::Fail(Error::InvalidState);
        };
        if let Some(msg) = self.rxq.pop_front() {
            return RecvOutcome::Msg(msg);
        }
        if Instant::now() >= expiry {
            self.survey = None;
            return RecvOutcome::Fail(Error::Timeout);
        }
        RecvOutcome::Park(Error::WouldBlock)
    }

    fn deliver(&mut self, _from: PipeId, mut msg: Message) -> DeliverOutcome {
        let Some((id, expiry)) = self.survey else {
            return DeliverOutcome::Dropped;
        };
        if Instant::now() >= expiry {
            return DeliverOutcome::Dropped;
        }
        if self.rxq.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        if msg.header_pop_u32() != Some(id) {
            return DeliverOutcome::Dropped;
        }
        self.rxq.push_back(msg);
        DeliverOutcome::Queued
    }

    fn recv_wake_hint(&self) -> Option<Instant> {
        self.survey.map(|(_, expiry)| expiry)
    }
}

pub(crate) struct RespondentProto {
    /// Most recent survey id seen from each peer; answers to anything older
    /// are refused.
    last: HashMap<PipeId, u32>,
    backlog: VecDeque<(PipeId, u32, Message)>,
    cap: usize,
    current: Option<(PipeId, u32)>,
}

impl RespondentProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        RespondentProto {
            last: HashMap::new(),
            backlog: VecDeque::new(),
            cap: opts.recv_buffer,
            current: None,
        }
    }
}

impl Protocol for RespondentProto {
    fn pattern(&self) -> Pattern {
        Pattern::Respondent0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, id: PipeId) {
        self.last.remove(&id);
        self.backlog.retain(|(p, _, _)| *p != id);
    }

    fn try_send(&mut self, mut msg: Message, pipes: &PipeSet) -> SendOutcome {
        let Some((pipe, id)) = self.current else {
            return SendOutcome::Fail(Error::InvalidState);
        };
        // A newer survey from the same peer invalidates this answer.
        if self.last.get(&pipe) != Some(&id) {
            self.current = None;
            return SendOutcome::Fail(Error::InvalidState);
        }
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
                tracing::debug!(pipe = %pipe, "discarding response, surveyor gone");
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
        // Only the latest survey from a peer is worth answering.
        self.backlog.retain(|(p, _, _)| *p != from);
        self.last.insert(from, id);
        self.backlog.push_back((from, id, msg));
        DeliverOutcome::Queued
    }
}
