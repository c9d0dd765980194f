//! In-process transport driver.
//!
//! The reference driver: connections inside one process rendezvous
//! through a global endpoint registry, and a "connection" is nothing but
//! two cross-connected bounded channels. Messages move by ownership
//! transfer; no serialization, no syscalls.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::{Error, Result};
use crate::options::SocketOptions;
use crate::transport::{Acceptor, PipeConn, TransportDriver};
use crate::url::Url;

/// Half-built connection handed from a dialer to the bound acceptor.
struct Handoff {
    conn: PipeConn,
}

/// Global registry of bound inproc endpoints.
static REGISTRY: Lazy<DashMap<String, flume::Sender<Handoff>>> = Lazy::new(DashMap::new);

/// The `inproc://` driver.
pub struct InprocDriver;

impl TransportDriver for InprocDriver {
    fn scheme(&self) -> &'static str {
        "inproc"
    }

    fn dial(&self, url: &Url, opts: &SocketOptions) -> Result<PipeConn> {
        let name = url.path();
        let handoff_tx = REGISTRY
            .get(name)
            .map(|entry| entry.value().clone())
            // Nothing bound yet: refused, so dialers retry with backoff.
            .ok_or(Error::ConnectionRefused)?;

        // Two directed queues make one full-duplex connection.
        let (to_listener_tx, to_listener_rx) = flume::bounded(opts.send_buffer);
        let (to_dialer_tx, to_dialer_rx) = flume::bounded(opts.recv_buffer);

        let listener_side = PipeConn {
            tx: to_dialer_tx,
            rx: to_listener_rx,
        };
        handoff_tx
            .send(Handoff {
                conn: listener_side,
            })
            .map_err(|_| Error::ConnectionRefused)?;

        debug!(endpoint = %name, "inproc dial established");
        Ok(PipeConn {
            tx: to_listener_tx,
            rx: to_dialer_rx,
        })
    }

    fn bind(&self, url: &Url, _opts: &SocketOptions) -> Result<Box<dyn Acceptor>> {
        let name = url.path().to_string();
        let (handoff_tx, handoff_rx) = flume::unbounded();

        match REGISTRY.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(Error::AddressInUse),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(handoff_tx);
            }
        }

        debug!(endpoint = %name, "inproc endpoint bound");
        Ok(Box::new(InprocAcceptor {
            name,
            handoff_rx,
            closed: std::sync::atomic::AtomicBool::new(false),
        }))
    }
}

struct InprocAcceptor {
    name: String,
    handoff_rx: flume::Receiver<Handoff>,
    closed: std::sync::atomic::AtomicBool,
}

impl Acceptor for InprocAcceptor {
    fn accept(&self) -> Result<PipeConn> {
        // Errors once close() removed the registry entry (the only
        // long-lived sender).
        match self.handoff_rx.recv() {
            Ok(handoff) => Ok(handoff.conn),
            Err(_) => Err(Error::Closed),
        }
    }

    fn close(&self) {
        // Guard against a later Drop removing a rebound endpoint.
        if !self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            debug!(endpoint = %self.name, "inproc endpoint unbound");
            REGISTRY.remove(&self.name);
        }
    }
}

impl Drop for InprocAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::transport::driver_for;
    use std::time::Duration;

    fn url(name: &str) -> Url {
        Url::parse(&format!("inproc://{name}")).unwrap()
    }

    #[test]
    fn duplicate_bind_rejected() {
        let opts = SocketOptions::default();
        let u = url("dup-bind");
        let first = InprocDriver.bind(&u, &opts).unwrap();
        assert!(matches!(
            InprocDriver.bind(&u, &opts),
            Err(Error::AddressInUse)
        ));
        first.close();
        // Rebindable after close.
        let again = InprocDriver.bind(&u, &opts).unwrap();
        again.close();
    }

    #[test]
    fn dial_unbound_refused() {
        let opts = SocketOptions::default();
        assert!(matches!(
            InprocDriver.dial(&url("nobody-home"), &opts),
            Err(Error::ConnectionRefused)
        ));
    }

    #[test]
    fn round_trip() {
        let opts = SocketOptions::default();
        let u = url("round-trip");
        let acceptor = driver_for(&u).unwrap().bind(&u, &opts).unwrap();
        let dialer_conn = InprocDriver.dial(&u, &opts).unwrap();
        let listener_conn = acceptor.accept().unwrap();

        dialer_conn
            .tx
            .send(Message::from_slice(b"ping").unwrap())
            .unwrap();
        let got = listener_conn
            .rx
            .recv_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(got.body(), b"ping");

        listener_conn
            .tx
            .send(Message::from_slice(b"pong").unwrap())
            .unwrap();
        let got = dialer_conn
            .rx
            .recv_timeout(Duration::from_millis(100))
            .unwrap();
        assert_eq!(got.body(), b"pong");

        acceptor.close();
    }

    #[test]
    fn accept_unblocks_on_close() {
        let opts = SocketOptions::default();
        let u = url("close-unblocks");
        let acceptor = InprocDriver.bind(&u, &opts).unwrap();
        let acceptor = std::sync::Arc::new(acceptor);

        let waiter = {
            let acceptor = acceptor.clone();
            std::thread::spawn(move || acceptor.accept())
        };
        std::thread::sleep(Duration::from_millis(20));
        acceptor.close();
        assert!(matches!(waiter.join().unwrap(), Err(Error::Closed)));
    }
}
