//! Pipe identifiers and the per-socket pipe set.
//!
//! A pipe is one established transport connection attached to a socket. The
//! socket core owns the sending half of each pipe's queue here; the receiving
//! half is drained by a pump thread that feeds the pattern engine.

use filament_core::message::Message;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// Socket-scoped identifier for an attached transport connection.
///
/// Ids are never reused within a socket's lifetime, so a stale id held by a
/// pattern engine (for reply routing, say) simply fails to resolve after the
/// connection goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub u32);

impl std::fmt::Display for PipeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipe:{}", self.0)
    }
}

/// Outcome of pushing a message toward one pipe's transmit queue.
pub(crate) enum PipeSend {
    Sent,
    /// Queue full; the message is handed back for a later retry.
    Full(Message),
    /// Peer hung up; the message is handed back, the pipe is dead.
    Gone(Message),
}

/// The live pipes of a socket, in attach order.
///
/// Attach order matters for round-robin distribution (Push, Req): iteration
/// starts where the last send left off, not at the oldest pipe.
#[derive(Default)]
pub(crate) struct PipeSet {
    txs: HashMap<PipeId, flume::Sender<Message>>,
    order: SmallVec<[PipeId; 8]>,
}

impl PipeSet {
    pub(crate) fn insert(&mut self, id: PipeId, tx: flume::Sender<Message>) {
        self.order.push(id);
        self.txs.insert(id, tx);
    }

    /// Removes a pipe, dropping its sender so the transport tears down.
    pub(crate) fn remove(&mut self, id: PipeId) -> bool {
        self.order.retain(|p| *p != id);
        self.txs.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn contains(&self, id: PipeId) -> bool {
        self.txs.contains_key(&id)
    }

    pub(crate) fn ids(&self) -> &[PipeId] {
        &self.order
    }

    /// Non-blocking send to one specific pipe.
    pub(crate) fn send_to(&self, id: PipeId, msg: Message) -> PipeSend {
        match self.txs.get(&id) {
            Some(tx) => match tx.try_send(msg) {
                Ok(()) => PipeSend::Sent,
                Err(flume::TrySendError::Full(m)) => PipeSend::Full(m),
                Err(flume::TrySendError::Disconnected(m)) => PipeSend::Gone(m),
            },
            None => PipeSend::Gone(msg),
        }
    }

    /// Round-robin send starting after the previously used slot.
    ///
    /// Skips pipes whose queue is full or whose peer is gone. Hands the
    /// message back as `Full` when every live pipe is backed up, or as
    /// `Gone` when the set is empty.
    pub(crate) fn send_round_robin(&self, cursor: &mut usize, msg: Message) -> PipeSend {
        if self.order.is_empty() {
            return PipeSend::Gone(msg);
        }
        let n = self.order.len();
        let mut pending = msg;
        for step in 0..n {
            let idx = (*cursor + step) % n;
            let id = self.order[idx];
            match self.send_to(id, pending) {
                PipeSend::Sent => {
                    *cursor = (idx + 1) % n;
                    return PipeSend::Sent;
                }
                PipeSend::Full(m) | PipeSend::Gone(m) => pending = m,
            }
        }
        PipeSend::Full(pending)
    }

    /// Best-effort broadcast. Messages are cloned per pipe; pipes with a full
    /// queue or a dead peer are skipped. Returns how many pipes accepted.
    pub(crate) fn broadcast(&self, msg: &Message, skip: Option<PipeId>) -> usize {
        let mut delivered = 0;
        for id in &self.order {
            if Some(*id) == skip {
                continue;
            }
            let Ok(copy) = msg.try_clone() else { continue };
            if matches!(self.send_to(*id, copy), PipeSend::Sent) {
                delivered += 1;
            }
        }
        delivered
    }
}
