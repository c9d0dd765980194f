//! The AIO scheduler.
//!
//! One worker thread owns every parked asynchronous operation. Sockets post
//! `Wake` when conditions change (a message arrived, a pipe attached), the
//! worker re-attempts the parked operations of that socket, and a deadline
//! heap expires whatever never got its chance. Parked sends are additionally
//! retried on a short tick, because a transport draining its queue is not
//! observable as an event.

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use filament_core::error::Error;
use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::aio::{self, AioInner};

const SEND_RETRY_TICK: Duration = Duration::from_millis(5);

pub(crate) enum Cmd {
    Submit(Arc<AioInner>),
    Wake(u32),
    Drain(u32, flume::Sender<()>),
}

static CMDS: Lazy<flume::Sender<Cmd>> = Lazy::new(|| {
    let (tx, rx) = flume::unbounded();
    let spawned = std::thread::Builder::new()
        .name("filament-sched".into())
        .spawn(move || Worker::default().run(rx));
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn scheduler thread");
    }
    tx
});

/// Hand a freshly submitted operation to the worker.
pub(crate) fn submit(op: Arc<AioInner>) {
    let _ = CMDS.send(Cmd::Submit(op));
}

/// Tell the worker that a socket's conditions changed.
pub(crate) fn wake(socket_id: u32) {
    let _ = CMDS.send(Cmd::Wake(socket_id));
}

/// Cancel every parked operation of a socket and wait until that is done.
/// Called during socket close, before the socket tears down its pipes.
pub(crate) fn drain(socket_id: u32) {
    let (ack_tx, ack_rx) = flume::bounded(1);
    if CMDS.send(Cmd::Drain(socket_id, ack_tx)).is_ok() {
        let _ = ack_rx.recv();
    }
}

/// Deadline heap entry. Ordered soonest-first; the sequence number breaks
/// ties deterministically.
struct Deadline {
    at: Instant,
    seq: u64,
    op: Arc<AioInner>,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so BinaryHeap's max is the earliest deadline.
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Worker {
    parked: HashMap<u32, Vec<Arc<AioInner>>>,
    deadlines: BinaryHeap<Deadline>,
    seq: u64,
}

impl Worker {
    fn run(mut self, rx: flume::Receiver<Cmd>) {
        loop {
            self.expire();
            let cmd = match self.next_wake() {
                Some(at) => match rx.recv_deadline(at) {
                    Ok(cmd) => Some(cmd),
                    Err(flume::RecvTimeoutError::Timeout) => None,
                    Err(flume::RecvTimeoutError::Disconnected) => return,
                },
                None => match rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => return,
                },
            };
            match cmd {
                Some(Cmd::Submit(op)) => self.submit(op),
                Some(Cmd::Wake(id)) => self.retry(id),
                Some(Cmd::Drain(id, ack)) => {
                    self.drain(id);
                    let _ = ack.send(());
                }
                // Tick: deadlines were expired above; re-attempt sends.
                None => self.retry_all(),
            }
        }
    }

    fn submit(&mut self, op: Arc<AioInner>) {
        if let Some(at) = aio::pending_deadline(&op) {
            self.seq += 1;
            self.deadlines.push(Deadline {
                at,
                seq: self.seq,
                op: Arc::clone(&op),
            });
        }
        self.attempt(op);
    }

    /// Run one attempt; park the operation again if it cannot complete yet.
    fn attempt(&mut self, op: Arc<AioInner>) {
        let Some(socket) = aio::pending_socket(&op) else {
            return;
        };
        if !socket.attempt_aio(&op) {
            self.parked.entry(socket.id()).or_default().push(op);
        }
    }

    fn retry(&mut self, socket_id: u32) {
        if let Some(ops) = self.parked.remove(&socket_id) {
            for op in ops {
                self.attempt(op);
            }
        }
    }

    fn retry_all(&mut self) {
        let ids: Vec<u32> = self.parked.keys().copied().collect();
        for id in ids {
            self.retry(id);
        }
    }

    fn drain(&mut self, socket_id: u32) {
        if let Some(ops) = self.parked.remove(&socket_id) {
            for op in ops {
                aio::complete(&op, Err(Error::Canceled), None);
            }
        }
    }

    /// Complete overdue operations and drop entries that already finished.
    fn expire(&mut self) {
        let now = Instant::now();
        while let Some(head) = self.deadlines.peek() {
            if !aio::is_pending(&head.op) {
                self.deadlines.pop();
                continue;
            }
            if head.at > now {
                break;
            }
            if let Some(due) = self.deadlines.pop() {
                aio::complete(&due.op, Err(Error::Timeout), None);
            }
        }
        self.parked.retain(|_, ops| {
            ops.retain(|op| aio::is_pending(op));
            !ops.is_empty()
        });
    }

    fn next_wake(&self) -> Option<Instant> {
        let mut at = self.deadlines.peek().map(|d| d.at);
        if self
            .parked
            .values()
            .flatten()
            .any(|op| aio::is_parked_send(op))
        {
            let tick = Instant::now() + SEND_RETRY_TICK;
            at = Some(at.map_or(tick, |a| a.min(tick)));
        }
        at
    }
}
