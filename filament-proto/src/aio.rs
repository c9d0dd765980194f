//! Asynchronous I/O handles.
//!
//! An [`Aio`] carries one send or receive at a time through the scheduler.
//! Submitting never blocks; completion is observed through [`Aio::wait`]
//! and [`Aio::result`]. Every submitted operation finishes with exactly one
//! terminal result: success, a failure, `Timeout` when its deadline passes,
//! or `Canceled` when [`Aio::cancel`] or socket close gets there first.

use std::sync::Arc;
use std::time::Instant;

use filament_core::error::{Error, Result};
use filament_core::message::Message;
use parking_lot::{Condvar, Mutex};

use crate::scheduler;
use crate::socket::Socket;

pub(crate) enum OpKind {
    /// The message rides in the slot so an attempt can take it out and a
    /// failed attempt can put it back.
    Send(Option<Message>),
    Recv,
}

pub(crate) struct PendingOp {
    kind: OpKind,
    socket: Socket,
    deadline: Option<Instant>,
}

enum St {
    Idle,
    Pending(PendingOp),
    Done {
        result: Result<()>,
        msg: Option<Message>,
    },
}

pub(crate) struct AioInner {
    state: Mutex<St>,
    cv: Condvar,
}

/// What the scheduler found when it went to run an attempt.
pub(crate) enum Attempt {
    Send(Message, Option<Instant>),
    Recv(Option<Instant>),
    /// Not pending any more (completed or canceled under us).
    Gone,
}

/// Completion-based I/O handle, reusable across operations. Cheap to
/// clone; all clones share one operation slot.
#[derive(Clone)]
pub struct Aio {
    inner: Arc<AioInner>,
}

impl Aio {
    #[must_use]
    pub fn new() -> Self {
        Aio {
            inner: Arc::new(AioInner {
                state: Mutex::new(St::Idle),
                cv: Condvar::new(),
            }),
        }
    }

    /// Submit an asynchronous send. The deadline is sampled from the
    /// socket's send timeout now, not when the attempt runs.
    ///
    /// # Errors
    ///
    /// `Busy` while a previous operation is still in flight.
    pub fn send(&self, socket: &Socket, msg: Message) -> Result<()> {
        let deadline = socket.send_deadline();
        {
            let mut st = self.inner.state.lock();
            if matches!(*st, St::Pending(_)) {
                return Err(Error::Busy);
            }
            *st = St::Pending(PendingOp {
                kind: OpKind::Send(Some(msg)),
                socket: socket.clone(),
                deadline,
            });
        }
        scheduler::submit(Arc::clone(&self.inner));
        Ok(())
    }

    /// Submit an asynchronous receive.
    ///
    /// # Errors
    ///
    /// `Busy` while a previous operation is still in flight.
    pub fn recv(&self, socket: &Socket) -> Result<()> {
        let deadline = socket.recv_deadline();
        {
            let mut st = self.inner.state.lock();
            if matches!(*st, St::Pending(_)) {
                return Err(Error::Busy);
            }
            *st = St::Pending(PendingOp {
                kind: OpKind::Recv,
                socket: socket.clone(),
                deadline,
            });
        }
        scheduler::submit(Arc::clone(&self.inner));
        Ok(())
    }

    /// Block until the in-flight operation, if any, completes.
    pub fn wait(&self) {
        let mut st = self.inner.state.lock();
        while matches!(*st, St::Pending(_)) {
            self.inner.cv.wait(&mut st);
        }
    }

    /// Result of the last completed operation.
    ///
    /// # Errors
    ///
    /// `InvalidState` before any submission, `Busy` while one is in flight,
    /// otherwise the operation's own terminal result.
    pub fn result(&self) -> Result<()> {
        match &*self.inner.state.lock() {
            St::Idle => Err(Error::InvalidState),
            St::Pending(_) => Err(Error::Busy),
            St::Done { result, .. } => result.clone(),
        }
    }

    /// Take the message produced by a completed receive.
    pub fn take_msg(&self) -> Option<Message> {
        match &mut *self.inner.state.lock() {
            St::Done { msg, .. } => msg.take(),
            _ => None,
        }
    }

    /// Abort the in-flight operation with `Canceled`.
    ///
    /// Idempotent, and a no-op if the operation already completed; racing
    /// a cancel against completion yields exactly one of the two results.
    pub fn cancel(&self) {
        complete(&self.inner, Err(Error::Canceled), None);
    }
}

impl Default for Aio {
    fn default() -> Self {
        Self::new()
    }
}

/// Move a pending operation to `Done`, waking waiters.
///
/// Returns false when the operation was no longer pending; the caller's
/// result is discarded in that case.
pub(crate) fn complete(inner: &AioInner, result: Result<()>, msg: Option<Message>) -> bool {
    let mut st = inner.state.lock();
    if !matches!(*st, St::Pending(_)) {
        return false;
    }
    *st = St::Done { result, msg };
    inner.cv.notify_all();
    true
}

pub(crate) fn pending_socket(inner: &AioInner) -> Option<Socket> {
    match &*inner.state.lock() {
        St::Pending(p) => Some(p.socket.clone()),
        _ => None,
    }
}

pub(crate) fn pending_deadline(inner: &AioInner) -> Option<Instant> {
    match &*inner.state.lock() {
        St::Pending(p) => p.deadline,
        _ => None,
    }
}

pub(crate) fn is_pending(inner: &AioInner) -> bool {
    matches!(&*inner.state.lock(), St::Pending(_))
}

pub(crate) fn is_parked_send(inner: &AioInner) -> bool {
    matches!(
        &*inner.state.lock(),
        St::Pending(PendingOp {
            kind: OpKind::Send(_),
            ..
        })
    )
}

/// Claim the pending operation for one attempt. A send's message moves out
/// of the slot; a failed attempt must hand it back via [`repark_send`].
pub(crate) fn begin_attempt(inner: &AioInner) -> Attempt {
    let mut st = inner.state.lock();
    match &mut *st {
        St::Pending(p) => match &mut p.kind {
            OpKind::Send(slot) => match slot.take() {
                Some(m) => Attempt::Send(m, p.deadline),
                None => Attempt::Gone,
            },
            OpKind::Recv => Attempt::Recv(p.deadline),
        },
        _ => Attempt::Gone,
    }
}

/// Put a send's message back after a parked attempt. If the operation was
/// canceled in the meantime the message is dropped here.
pub(crate) fn repark_send(inner: &AioInner, msg: Message) {
    let mut st = inner.state.lock();
    if let St::Pending(p) = &mut *st {
        if let OpKind::Send(slot) = &mut p.kind {
            *slot = Some(msg);
        }
    }
}
