//! The socket core.
//!
//! A socket binds one pattern engine to a set of pipes and any number of
//! endpoints. All pattern state lives under one mutex; a condvar carries
//! every wakeup (message arrived, queue drained, pipe attached or detached,
//! socket closing). Blocking send and receive are loops over the engine's
//! non-blocking attempts, waiting on the condvar between tries, with the
//! deadline sampled once when the operation starts.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use filament_core::error::{Error, Result};
use filament_core::message::Message;
use filament_core::options::{keys, OptValue, SocketOptions};
use filament_core::stats::StatNode;
use filament_core::transport::PipeConn;
use filament_core::url::Url;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::aio::{self, AioInner, Attempt};
use crate::endpoint::{self, Dialer, EndpointHandle, Listener};
use crate::pipe::{PipeId, PipeSet};
use crate::proto::{self, DeliverOutcome, Pattern, Protocol, RecvOutcome, SendOutcome};
use crate::scheduler;

static NEXT_SOCKET_ID: AtomicU32 = AtomicU32::new(1);

/// Sockets alive in this process, for statistics snapshots.
static REGISTRY: Lazy<Mutex<Vec<Weak<Inner>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// A parked blocking send re-tries on this cadence, because a transport
/// draining its queue produces no wakeup of its own.
const SEND_WAIT_SLICE: Duration = Duration::from_millis(5);

/// How long a pump waits on a full receive queue before re-checking.
const PUMP_WAIT_SLICE: Duration = Duration::from_millis(100);

pub(crate) enum Lifecycle {
    Open,
    Closing,
    Closed,
}

#[derive(Default)]
struct StatCounters {
    tx_msgs: AtomicU64,
    rx_msgs: AtomicU64,
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
}

pub(crate) struct State {
    lifecycle: Lifecycle,
    engine: Box<dyn Protocol>,
    pipes: PipeSet,
    opts: SocketOptions,
    endpoints: Vec<EndpointHandle>,
    next_pipe: u32,
}

pub(crate) struct Inner {
    id: u32,
    state: Mutex<State>,
    cv: Condvar,
    stats: StatCounters,
}

/// A messaging socket. Cheap to clone; all clones share one socket.
///
/// Sockets must be closed explicitly: background threads (endpoints, pipe
/// pumps) hold references and keep running until [`Socket::close`].
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    /// Open a socket with default options.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the rest of the surface.
    pub fn open(pattern: Pattern) -> Result<Socket> {
        Self::open_with(pattern, SocketOptions::default())
    }

    /// Open a socket with explicit options.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` mirrors the rest of the surface.
    pub fn open_with(pattern: Pattern, opts: SocketOptions) -> Result<Socket> {
        let engine = proto::new_engine(pattern, &opts);
        let inner = Arc::new(Inner {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Open,
                engine,
                pipes: PipeSet::default(),
                opts,
                endpoints: Vec::new(),
                next_pipe: 1,
            }),
            cv: Condvar::new(),
            stats: StatCounters::default(),
        });
        let mut reg = REGISTRY.lock();
        reg.retain(|w| w.strong_count() > 0);
        reg.push(Arc::downgrade(&inner));
        drop(reg);
        tracing::debug!(id = inner.id, pattern = %pattern, "socket opened");
        Ok(Socket { inner })
    }

    /// Process-unique socket id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// The pattern this socket speaks, as reported by its engine.
    #[must_use]
    pub fn pattern(&self) -> Pattern {
        self.inner.state.lock().engine.pattern()
    }

    /// Snapshot of the current options.
    #[must_use]
    pub fn options(&self) -> SocketOptions {
        self.inner.state.lock().opts.clone()
    }

    /// Set an option by name.
    ///
    /// Queue depths apply to connections established afterwards; timeouts
    /// apply to operations submitted afterwards. `pair1-poly` only takes
    /// effect while no connection is attached yet.
    ///
    /// # Errors
    ///
    /// `Closed` after close, plus whatever the registry rejects.
    pub fn set_option(&self, name: &str, value: OptValue) -> Result<()> {
        let mut st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        st.opts.set(name, value)?;
        if name == keys::PAIR1_POLY && st.pipes.is_empty() {
            // The engine snapshots this flag at construction.
            let pattern = st.engine.pattern();
            st.engine = proto::new_engine(pattern, &st.opts);
        }
        Ok(())
    }

    /// Read an option by name.
    ///
    /// # Errors
    ///
    /// `Closed` after close, `NotSupported` for an unknown name.
    pub fn get_option(&self, name: &str) -> Result<OptValue> {
        let st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        st.opts.get(name)
    }

    /// Subscribe to a body prefix (Sub sockets only).
    ///
    /// # Errors
    ///
    /// `NotSupported` on other patterns, `Closed` after close.
    pub fn subscribe(&self, prefix: &[u8]) -> Result<()> {
        let mut st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        st.engine.subscribe(prefix)
    }

    /// Drop a previously subscribed prefix (Sub sockets only).
    ///
    /// # Errors
    ///
    /// `NotFound` if the prefix was never subscribed, `NotSupported` on
    /// other patterns, `Closed` after close.
    pub fn unsubscribe(&self, prefix: &[u8]) -> Result<()> {
        let mut st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        st.engine.unsubscribe(prefix)
    }

    /// Bind a listening endpoint.
    ///
    /// The bind itself happens synchronously, so address errors surface
    /// here; accepted connections attach in the background.
    ///
    /// # Errors
    ///
    /// `InvalidAddress`, `AddressInUse`, `NotSupported` for an unknown
    /// scheme, `Closed` after close.
    pub fn listen(&self, url: &str) -> Result<Listener> {
        let url: Url = url.parse()?;
        if !matches!(self.inner.state.lock().lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        let listener = endpoint::spawn_listener(self, url)?;
        let mut st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            drop(st);
            listener.close();
            return Err(Error::Closed);
        }
        st.endpoints.push(EndpointHandle::Listener(listener.clone()));
        Ok(listener)
    }

    /// Start a dialing endpoint.
    ///
    /// Connection attempts run in the background and retry with bounded
    /// exponential backoff, both for the initial connection and after a
    /// connection drops; transient carrier failures never surface here.
    ///
    /// # Errors
    ///
    /// `InvalidAddress`, `NotSupported` for an unknown scheme, `Closed`
    /// after close.
    pub fn dial(&self, url: &str) -> Result<Dialer> {
        let url: Url = url.parse()?;
        if !matches!(self.inner.state.lock().lifecycle, Lifecycle::Open) {
            return Err(Error::Closed);
        }
        let dialer = endpoint::spawn_dialer(self, url)?;
        let mut st = self.inner.state.lock();
        if !matches!(st.lifecycle, Lifecycle::Open) {
            drop(st);
            dialer.close();
            return Err(Error::Closed);
        }
        st.endpoints.push(EndpointHandle::Dialer(dialer.clone()));
        Ok(dialer)
    }

    /// Send a message, blocking up to the send timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline passes, `Closed` when the socket closes
    /// underneath the call, pattern-specific failures otherwise. The
    /// message is consumed in every case.
    pub fn send(&self, msg: Message) -> Result<()> {
        self.send_impl(msg, false)
    }

    /// Send without blocking.
    ///
    /// # Errors
    ///
    /// `WouldBlock` or `NotConnected` when the message cannot go out right
    /// now; otherwise as [`Socket::send`].
    pub fn try_send(&self, msg: Message) -> Result<()> {
        self.send_impl(msg, true)
    }

    /// Receive a message, blocking up to the receive timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` when the deadline passes, `Closed` when the socket closes
    /// underneath the call, pattern-specific failures otherwise.
    pub fn recv(&self) -> Result<Message> {
        self.recv_impl(false)
    }

    /// Receive without blocking.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when nothing is ready; otherwise as [`Socket::recv`].
    pub fn try_recv(&self) -> Result<Message> {
        self.recv_impl(true)
    }

    fn send_impl(&self, msg: Message, nonblock: bool) -> Result<()> {
        let mut st = self.inner.state.lock();
        let nonblock = nonblock || st.opts.is_send_nonblocking();
        let deadline = st
            .opts
            .send_timeout
            .resolve(None)
            .map(|d| Instant::now() + d);
        let mut pending = msg;
        loop {
            if !matches!(st.lifecycle, Lifecycle::Open) {
                return Err(Error::Closed);
            }
            let nbytes = pending.len() as u64;
            let State { engine, pipes, .. } = &mut *st;
            match engine.try_send(pending, pipes) {
                SendOutcome::Sent => {
                    self.inner.stats.tx_msgs.fetch_add(1, Ordering::Relaxed);
                    self.inner.stats.tx_bytes.fetch_add(nbytes, Ordering::Relaxed);
                    return Ok(());
                }
                SendOutcome::Fail(e) => return Err(e),
                SendOutcome::Park(m, e) => {
                    if nonblock {
                        return Err(e);
                    }
                    let now = Instant::now();
                    if deadline.is_some_and(|d| now >= d) {
                        return Err(Error::Timeout);
                    }
                    pending = m;
                    let mut until = now + SEND_WAIT_SLICE;
                    if let Some(d) = deadline {
                        until = until.min(d);
                    }
                    let _ = self.inner.cv.wait_until(&mut st, until);
                }
            }
        }
    }

    fn recv_impl(&self, nonblock: bool) -> Result<Message> {
        let mut st = self.inner.state.lock();
        let nonblock = nonblock || st.opts.is_recv_nonblocking();
        let deadline = st
            .opts
            .recv_timeout
            .resolve(None)
            .map(|d| Instant::now() + d);
        loop {
            if !matches!(st.lifecycle, Lifecycle::Open) {
                return Err(Error::Closed);
            }
            let State { engine, pipes, .. } = &mut *st;
            match engine.try_recv(pipes) {
                RecvOutcome::Msg(m) => {
                    drop(st);
                    // Space freed; wake pumps parked on a full queue.
                    self.inner.cv.notify_all();
                    return Ok(m);
                }
                RecvOutcome::Fail(e) => return Err(e),
                RecvOutcome::Park(e) => {
                    if nonblock {
                        return Err(e);
                    }
                    let now = Instant::now();
                    if deadline.is_some_and(|d| now >= d) {
                        return Err(Error::Timeout);
                    }
                    let mut until = deadline;
                    if let Some(hint) = st.engine.recv_wake_hint() {
                        until = Some(until.map_or(hint, |u| u.min(hint)));
                    }
                    match until {
                        Some(u) => {
                            let _ = self.inner.cv.wait_until(&mut st, u);
                        }
                        None => self.inner.cv.wait(&mut st),
                    }
                }
            }
        }
    }

    /// Close the socket: cancel parked asynchronous operations, close
    /// every endpoint, detach every pipe and fail blocked calls with
    /// `Closed`. Idempotent.
    pub fn close(&self) {
        {
            let mut st = self.inner.state.lock();
            if !matches!(st.lifecycle, Lifecycle::Open) {
                return;
            }
            st.lifecycle = Lifecycle::Closing;
        }
        self.inner.cv.notify_all();
        scheduler::drain(self.inner.id);
        let endpoints = std::mem::take(&mut self.inner.state.lock().endpoints);
        for ep in &endpoints {
            ep.close();
        }
        let ids: Vec<PipeId> = self.inner.state.lock().pipes.ids().to_vec();
        for id in ids {
            self.detach_pipe(id);
        }
        self.inner.state.lock().lifecycle = Lifecycle::Closed;
        self.inner.cv.notify_all();
        tracing::debug!(id = self.inner.id, "socket closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !matches!(self.inner.state.lock().lifecycle, Lifecycle::Open)
    }

    /// Deadline for a send submitted now, from the current send timeout.
    pub(crate) fn send_deadline(&self) -> Option<Instant> {
        let t = self.inner.state.lock().opts.send_timeout;
        t.resolve(None).map(|d| Instant::now() + d)
    }

    /// Deadline for a receive submitted now, from the current receive
    /// timeout.
    pub(crate) fn recv_deadline(&self) -> Option<Instant> {
        let t = self.inner.state.lock().opts.recv_timeout;
        t.resolve(None).map(|d| Instant::now() + d)
    }

    /// Attach an established connection and start its pump thread.
    ///
    /// Returns the pipe id and a channel whose disconnection signals that
    /// the pump exited (peer hangup or detach); `None` when the socket is
    /// no longer open, in which case the connection is dropped.
    pub(crate) fn attach_pipe(&self, conn: PipeConn) -> Option<(PipeId, flume::Receiver<()>)> {
        let PipeConn { tx, rx } = conn;
        let id = {
            let mut st = self.inner.state.lock();
            if !matches!(st.lifecycle, Lifecycle::Open) {
                return None;
            }
            let id = PipeId(st.next_pipe);
            st.next_pipe += 1;
            st.pipes.insert(id, tx);
            st.engine.pipe_attached(id);
            id
        };
        self.inner.cv.notify_all();
        scheduler::wake(self.inner.id);
        tracing::debug!(socket = self.inner.id, %id, "pipe attached");

        let (closed_tx, closed_rx) = flume::bounded::<()>(1);
        let sock = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("filament-pipe-{}-{}", self.inner.id, id.0))
            .spawn(move || {
                let _closed = closed_tx;
                run_pump(&sock, id, &rx);
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn pipe pump");
            self.detach_pipe(id);
            return None;
        }
        Some((id, closed_rx))
    }

    /// Remove a pipe from the socket, informing the engine. Idempotent.
    pub(crate) fn detach_pipe(&self, id: PipeId) {
        let removed = {
            let mut st = self.inner.state.lock();
            let removed = st.pipes.remove(id);
            if removed {
                st.engine.pipe_detached(id);
            }
            removed
        };
        if removed {
            tracing::debug!(socket = self.inner.id, %id, "pipe detached");
            self.inner.cv.notify_all();
            scheduler::wake(self.inner.id);
        }
    }

    /// Run one attempt of a submitted asynchronous operation. Returns true
    /// when the operation reached a terminal state, false to stay parked.
    pub(crate) fn attempt_aio(&self, op: &Arc<AioInner>) -> bool {
        let mut st = self.inner.state.lock();
        match aio::begin_attempt(op) {
            Attempt::Gone => true,
            Attempt::Send(msg, deadline) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    aio::complete(op, Err(Error::Timeout), None);
                    return true;
                }
                if !matches!(st.lifecycle, Lifecycle::Open) {
                    aio::complete(op, Err(Error::Closed), None);
                    return true;
                }
                let nbytes = msg.len() as u64;
                let State { engine, pipes, .. } = &mut *st;
                match engine.try_send(msg, pipes) {
                    SendOutcome::Sent => {
                        self.inner.stats.tx_msgs.fetch_add(1, Ordering::Relaxed);
                        self.inner.stats.tx_bytes.fetch_add(nbytes, Ordering::Relaxed);
                        aio::complete(op, Ok(()), None);
                        true
                    }
                    SendOutcome::Park(m, _) => {
                        aio::repark_send(op, m);
                        false
                    }
                    SendOutcome::Fail(e) => {
                        aio::complete(op, Err(e), None);
                        true
                    }
                }
            }
            Attempt::Recv(deadline) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    aio::complete(op, Err(Error::Timeout), None);
                    return true;
                }
                if !matches!(st.lifecycle, Lifecycle::Open) {
                    aio::complete(op, Err(Error::Closed), None);
                    return true;
                }
                let State { engine, pipes, .. } = &mut *st;
                match engine.try_recv(pipes) {
                    RecvOutcome::Msg(m) => {
                        aio::complete(op, Ok(()), Some(m));
                        drop(st);
                        self.inner.cv.notify_all();
                        true
                    }
                    RecvOutcome::Park(_) => false,
                    RecvOutcome::Fail(e) => {
                        aio::complete(op, Err(e), None);
                        true
                    }
                }
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Socket {
        Socket { inner }
    }
}

/// Drain one pipe's inbound queue into the pattern engine. Runs on a
/// dedicated thread per pipe; exits when the transport hangs up, the pipe
/// detaches, or the socket closes.
fn run_pump(socket: &Socket, id: PipeId, rx: &flume::Receiver<Message>) {
    'inbound: for msg in rx.iter() {
        let mut pending = msg;
        loop {
            let mut st = socket.inner.state.lock();
            if !matches!(st.lifecycle, Lifecycle::Open) {
                break 'inbound;
            }
            if !st.pipes.contains(id) {
                break 'inbound;
            }
            let nbytes = pending.len() as u64;
            match st.engine.deliver(id, pending) {
                DeliverOutcome::Queued => {
                    socket.inner.stats.rx_msgs.fetch_add(1, Ordering::Relaxed);
                    socket.inner.stats.rx_bytes.fetch_add(nbytes, Ordering::Relaxed);
                    drop(st);
                    socket.inner.cv.notify_all();
                    scheduler::wake(socket.inner.id);
                    continue 'inbound;
                }
                DeliverOutcome::Dropped => continue 'inbound,
                DeliverOutcome::Full(back) => {
                    pending = back;
                    // Backpressure: wait for a receiver to drain the queue.
                    // Capped so a missed wakeup cannot wedge the pump.
                    let _ = socket
                        .inner
                        .cv
                        .wait_for(&mut st, PUMP_WAIT_SLICE);
                }
            }
        }
    }
    socket.detach_pipe(id);
}

/// Immutable snapshot of every live socket's counters.
///
/// The tree root is named `filament`; each socket contributes a
/// `socket.<id>` branch with `pipes`, `endpoints` and message/byte
/// counters as leaves.
#[must_use]
pub fn stats_snapshot() -> Arc<StatNode> {
    let mut reg = REGISTRY.lock();
    reg.retain(|w| w.strong_count() > 0);
    let mut children = vec![StatNode::leaf("sockets", reg.len() as u64)];
    for w in reg.iter() {
        let Some(inner) = w.upgrade() else { continue };
        let (pattern, pipes, endpoints) = {
            let st = inner.state.lock();
            (st.engine.pattern(), st.pipes.len() as u64, st.endpoints.len() as u64)
        };
        children.push(StatNode::branch(
            format!("socket.{}", inner.id),
            vec![
                StatNode::leaf("pattern", u64::from(pattern.number())),
                StatNode::leaf("pipes", pipes),
                StatNode::leaf("endpoints", endpoints),
                StatNode::leaf("tx-msgs", inner.stats.tx_msgs.load(Ordering::Relaxed)),
                StatNode::leaf("rx-msgs", inner.stats.rx_msgs.load(Ordering::Relaxed)),
                StatNode::leaf("tx-bytes", inner.stats.tx_bytes.load(Ordering::Relaxed)),
                StatNode::leaf("rx-bytes", inner.stats.rx_bytes.load(Ordering::Relaxed)),
            ],
        ));
    }
    Arc::new(StatNode::branch("filament", children))
}
