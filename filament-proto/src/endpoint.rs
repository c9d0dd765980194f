//! Listening and dialing endpoints.
//!
//! A listener binds synchronously (so address errors surface to the
//! caller) and accepts connections on a background thread. A dialer runs
//! its whole life on a background thread: connect, hand the connection to
//! the socket, wait for it to die, reconnect. Transient carrier failures
//! are retried with bounded exponential backoff and never surface to the
//! application; only closing the endpoint stops the loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use filament_core::backoff::Backoff;
use filament_core::error::{Error, Result};
use filament_core::transport::{driver_for, Acceptor, TransportDriver};
use filament_core::url::Url;
use parking_lot::Mutex;

use crate::pipe::PipeId;
use crate::socket::{self, Socket};

static NEXT_ENDPOINT_ID: AtomicU32 = AtomicU32::new(1);

/// Where an endpoint is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Created, not yet started.
    Idle,
    /// Binding or spawning.
    Starting,
    /// Accepting or maintaining connections.
    Running,
    /// Close requested, winding down.
    Stopping,
    /// Terminal; an endpoint never restarts.
    Closed,
}

/// An endpoint owned by a socket. Closed as a group when the socket closes.
pub(crate) enum EndpointHandle {
    Listener(Listener),
    Dialer(Dialer),
}

impl EndpointHandle {
    pub(crate) fn close(&self) {
        match self {
            EndpointHandle::Listener(l) => l.close(),
            EndpointHandle::Dialer(d) => d.close(),
        }
    }
}

struct ListenerInner {
    id: u32,
    url: Url,
    state: Mutex<EndpointState>,
    acceptor: Arc<dyn Acceptor>,
    socket: Weak<socket::Inner>,
    /// Pipes accepted here, detached from the socket on close. May contain
    /// ids of pipes that already died; detaching those is a no-op.
    pipes: Mutex<Vec<PipeId>>,
}

/// A bound listening endpoint. Cheap to clone; all clones share one
/// listener.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    /// Endpoint id, unique within the process.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.inner.state.lock()
    }

    /// Stop accepting, unbind, and detach the connections this listener
    /// produced. Terminal and idempotent.
    pub fn close(&self) {
        {
            let mut st = self.inner.state.lock();
            if matches!(*st, EndpointState::Closed | EndpointState::Stopping) {
                return;
            }
            *st = EndpointState::Stopping;
        }
        self.inner.acceptor.close();
        let pipes = std::mem::take(&mut *self.inner.pipes.lock());
        if let Some(inner) = self.inner.socket.upgrade() {
            let sock = Socket::from_inner(inner);
            for id in pipes {
                sock.detach_pipe(id);
            }
        }
        *self.inner.state.lock() = EndpointState::Closed;
    }
}

/// Bind a listener for the socket and start its accept thread.
pub(crate) fn spawn_listener(socket: &Socket, url: Url) -> Result<Listener> {
    let driver = driver_for(&url)?;
    let opts = socket.options();
    let acceptor: Arc<dyn Acceptor> = Arc::from(driver.bind(&url, &opts)?);
    let listener = Listener {
        inner: Arc::new(ListenerInner {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            url,
            state: Mutex::new(EndpointState::Starting),
            acceptor,
            socket: socket.downgrade(),
            pipes: Mutex::new(Vec::new()),
        }),
    };
    let thread_sock = socket.clone();
    let thread_inner = Arc::clone(&listener.inner);
    let spawned = std::thread::Builder::new()
        .name(format!("filament-listen-{}", listener.inner.id))
        .spawn(move || run_listener(&thread_sock, &thread_inner));
    if let Err(e) = spawned {
        listener.inner.acceptor.close();
        return Err(e.into());
    }
    *listener.inner.state.lock() = EndpointState::Running;
    tracing::debug!(id = listener.inner.id, url = %listener.inner.url, "listener started");
    Ok(listener)
}

fn run_listener(socket: &Socket, inner: &Arc<ListenerInner>) {
    loop {
        match inner.acceptor.accept() {
            Ok(conn) => match socket.attach_pipe(conn) {
                Some((id, _closed_rx)) => {
                    inner.pipes.lock().push(id);
                    tracing::debug!(listener = inner.id, %id, "inbound connection");
                }
                // Socket is closing; nothing more to accept for.
                None => break,
            },
            Err(Error::Closed) => break,
            Err(e) => {
                tracing::warn!(listener = inner.id, error = %e, "accept failed");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    *inner.state.lock() = EndpointState::Closed;
}

struct DialerInner {
    id: u32,
    url: Url,
    state: Mutex<EndpointState>,
    /// Dropping this wakes and stops the dial loop.
    stop: Mutex<Option<flume::Sender<()>>>,
    socket: Weak<socket::Inner>,
    current: Mutex<Option<PipeId>>,
}

/// A dialing endpoint. Cheap to clone; all clones share one dialer.
#[derive(Clone)]
pub struct Dialer {
    inner: Arc<DialerInner>,
}

impl Dialer {
    /// Endpoint id, unique within the process.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.inner.state.lock()
    }

    /// Stop dialing and detach the current connection, if any. Terminal
    /// and idempotent.
    pub fn close(&self) {
        {
            let mut st = self.inner.state.lock();
            if matches!(*st, EndpointState::Closed | EndpointState::Stopping) {
                return;
            }
            *st = EndpointState::Stopping;
        }
        // Wakes the dial loop out of any sleep or connection watch.
        drop(self.inner.stop.lock().take());
        let current = self.inner.current.lock().take();
        if let (Some(id), Some(inner)) = (current, self.inner.socket.upgrade()) {
            Socket::from_inner(inner).detach_pipe(id);
        }
        *self.inner.state.lock() = EndpointState::Closed;
    }
}

/// Start a dial loop for the socket. The first connection attempt happens
/// on the background thread too, so even an initially refused address just
/// keeps retrying.
pub(crate) fn spawn_dialer(socket: &Socket, url: Url) -> Result<Dialer> {
    let driver = driver_for(&url)?;
    let (stop_tx, stop_rx) = flume::bounded::<()>(0);
    let dialer = Dialer {
        inner: Arc::new(DialerInner {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            url,
            state: Mutex::new(EndpointState::Starting),
            stop: Mutex::new(Some(stop_tx)),
            socket: socket.downgrade(),
            current: Mutex::new(None),
        }),
    };
    let thread_sock = socket.clone();
    let thread_inner = Arc::clone(&dialer.inner);
    let spawned = std::thread::Builder::new()
        .name(format!("filament-dial-{}", dialer.inner.id))
        .spawn(move || run_dialer(&thread_sock, &thread_inner, driver, &stop_rx));
    if let Err(e) = spawned {
        return Err(e.into());
    }
    *dialer.inner.state.lock() = EndpointState::Running;
    tracing::debug!(id = dialer.inner.id, url = %dialer.inner.url, "dialer started");
    Ok(dialer)
}

fn run_dialer(
    socket: &Socket,
    inner: &Arc<DialerInner>,
    driver: &'static dyn TransportDriver,
    stop_rx: &flume::Receiver<()>,
) {
    let opts = socket.options();
    let mut backoff = Backoff::from_options(&opts);
    loop {
        if matches!(
            *inner.state.lock(),
            EndpointState::Stopping | EndpointState::Closed
        ) {
            break;
        }
        match driver.dial(&inner.url, &opts) {
            Ok(conn) => {
                backoff.reset();
                let Some((id, closed_rx)) = socket.attach_pipe(conn) else {
                    break;
                };
                *inner.current.lock() = Some(id);
                tracing::debug!(dialer = inner.id, %id, "connected");
                let stop = watch_connection(stop_rx, &closed_rx);
                *inner.current.lock() = None;
                socket.detach_pipe(id);
                if stop {
                    break;
                }
                tracing::debug!(dialer = inner.id, %id, "connection lost, redialing");
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    dialer = inner.id,
                    error = %e,
                    ?delay,
                    attempt = backoff.attempt(),
                    "dial failed, backing off"
                );
                match stop_rx.recv_timeout(delay) {
                    Err(flume::RecvTimeoutError::Timeout) => {}
                    // A stop signal or a dropped sender both mean close.
                    _ => break,
                }
            }
            Err(e) => {
                tracing::warn!(dialer = inner.id, url = %inner.url, error = %e, "dial failed permanently");
                break;
            }
        }
    }
    *inner.state.lock() = EndpointState::Closed;
}

/// Block until the dialer is asked to stop (true) or the connection's pump
/// exits (false).
fn watch_connection(stop_rx: &flume::Receiver<()>, closed_rx: &flume::Receiver<()>) -> bool {
    flume::Selector::new()
        .recv(stop_rx, |_| true)
        .recv(closed_rx, |_| false)
        .wait()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Pattern;
    use filament_core::message::Message;

    fn unique_name(tag: &str) -> String {
        static N: AtomicU32 = AtomicU32::new(0);
        format!("inproc://endpoint-{tag}-{}", N.fetch_add(1, Ordering::Relaxed))
    }

    #[test]
    fn listener_binds_synchronously_and_rejects_duplicates() {
        let addr = unique_name("dup");
        let a = Socket::open(Pattern::Pair0).unwrap();
        let b = Socket::open(Pattern::Pair0).unwrap();
        let listener = a.listen(&addr).unwrap();
        assert_eq!(listener.state(), EndpointState::Running);
        assert!(matches!(b.listen(&addr), Err(Error::AddressInUse)));
        a.close();
        b.close();
        assert_eq!(listener.state(), EndpointState::Closed);
    }

    #[test]
    fn dialer_connects_and_carries_traffic() {
        let addr = unique_name("pair");
        let a = Socket::open(Pattern::Pair0).unwrap();
        let b = Socket::open(Pattern::Pair0).unwrap();
        a.listen(&addr).unwrap();
        b.dial(&addr).unwrap();

        b.send(Message::from_slice(b"ping").unwrap()).unwrap();
        assert_eq!(a.recv().unwrap().body(), b"ping");
        a.send(Message::from_slice(b"pong").unwrap()).unwrap();
        assert_eq!(b.recv().unwrap().body(), b"pong");

        a.close();
        b.close();
    }

    #[test]
    fn dialer_retries_until_listener_appears() {
        let addr = unique_name("retry");
        let a = Socket::open(Pattern::Pair0).unwrap();
        let b = Socket::open(Pattern::Pair0).unwrap();
        // Dial first: the address is unbound, so the first attempts are
        // refused and retried in the background.
        b.dial(&addr).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        a.listen(&addr).unwrap();

        b.send(Message::from_slice(b"late").unwrap()).unwrap();
        assert_eq!(a.recv().unwrap().body(), b"late");

        a.close();
        b.close();
    }

    #[test]
    fn closed_dialer_stays_closed() {
        let addr = unique_name("closed");
        let s = Socket::open(Pattern::Pair0).unwrap();
        let dialer = s.dial(&addr).unwrap();
        dialer.close();
        assert_eq!(dialer.state(), EndpointState::Closed);
        dialer.close();
        assert_eq!(dialer.state(), EndpointState::Closed);
        s.close();
    }
}
