//! Pipeline pattern: Push distributes work round-robin, Pull merges results
//! fairly from every producer.

use std::collections::VecDeque;

use filament_core::error::Error;
use filament_core::message::Message;
use filament_core::options::SocketOptions;

use crate::pipe::{PipeId, PipeSend, PipeSet};
use crate::proto::{DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};

/// Work distributor. Each message goes to exactly one peer, chosen round
/// robin among peers with queue space.
pub(crate) struct PushProto {
    cursor: usize,
}

impl PushProto {
    pub(crate) fn new() -> Self {
        PushProto { cursor: 0 }
    }
}

impl Protocol for PushProto {
    fn pattern(&self) -> Pattern {
        Pattern::Push0
    }

    fn pipe_attached(&mut self, _id: PipeId) {}

    fn pipe_detached(&mut self, _id: PipeId) {}

    fn try_send(&mut self, msg: Message, pipes: &PipeSet) -> SendOutcome {
        match pipes.send_round_robin(&mut self.cursor, msg) {
            PipeSend::Sent => SendOutcome::Sent,
            PipeSend::Full(m) => SendOutcome::Park(m, Error::WouldBlock),
            PipeSend::Gone(m) => SendOutcome::Park(m, Error::NotConnected),
        }
    }

    fn try_recv(&mut self, _pipes: &PipeSet) -> RecvOutcome {
        RecvOutcome::Fail(Error::NotSupported)
    }

    fn deliver(&mut self, _from: PipeId, _msg: Message) -> DeliverOutcome {
        DeliverOutcome::Dropped
    }
}

/// Work collector. Messages from all producers merge into one queue in
/// arrival order; backpressure is applied per pipe by the pump threads.
pub(crate) struct PullProto {
    rxq: VecDeque<Message>,
    cap: usize,
}

impl PullProto {
    pub(crate) fn new(opts: &SocketOptions) -> Self {
        PullProto {
            rxq: VecDeque::new(),
            cap: opts.recv_buffer,
        }
    }
}

impl Protocol for PullProto {
    fn pattern(&self) -> Pattern {
        Pattern::Pull0
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
        if self.rxq.len() >= self.cap {
            return DeliverOutcome::Full(msg);
        }
        self.rxq.push_back(msg);
        DeliverOutcome::Queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_round_robins_across_peers() {
        let mut push = PushProto::new();
        let mut set = PipeSet::default();
        let mut rxs = Vec::new();
        for i in 1..=3u32 {
            let (tx, rx) = flume::bounded(8);
            set.insert(PipeId(i), tx);
            push.pipe_attached(PipeId(i));
            rxs.push(rx);
        }
        for _ in 0..9 {
            assert!(matches!(
                push.try_send(Message::from_slice(b"job").unwrap(), &set),
                SendOutcome::Sent
            ));
        }
        for rx in &rxs {
            assert_eq!(rx.len(), 3);
        }
    }

    #[test]
    fn push_with_no_peers_parks() {
        let mut push = PushProto::new();
        let set = PipeSet::default();
        match push.try_send(Message::from_slice(b"job").unwrap(), &set) {
            SendOutcome::Park(_, Error::NotConnected) => {}
            _ => panic!("expected park"),
        }
    }

    #[test]
    fn pull_merges_in_arrival_order() {
        let opts = SocketOptions::default();
        let mut pull = PullProto::new(&opts);
        let set = PipeSet::default();
        pull.deliver(PipeId(1), Message::from_slice(b"a").unwrap());
        pull.deliver(PipeId(2), Message::from_slice(b"b").unwrap());
        pull.deliver(PipeId(1), Message::from_slice(b"c").unwrap());
        let mut seen = Vec::new();
        while let RecvOutcome::Msg(m) = pull.try_recv(&set) {
            seen.push(m.body().to_vec());
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn pull_applies_backpressure_at_capacity() {
        let opts = SocketOptions::default().with_recv_buffer(1);
        let mut pull = PullProto::new(&opts);
        assert!(matches!(
            pull.deliver(PipeId(1), Message::from_slice(b"a").unwrap()),
            DeliverOutcome::Queued
        ));
        assert!(matches!(
            pull.deliver(PipeId(1), Message::from_slice(b"b").unwrap()),
            DeliverOutcome::Full(_)
        ));
    }
}
