//! The transport-driver seam.
//!
//! A transport driver turns a URL into established connections. The
//! engine never sees carrier details: every established connection is a
//! [`PipeConn`], a pair of bounded message channels pumped by whatever
//! machinery the driver runs underneath (threads for tcp, a rendezvous
//! for inproc).

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::options::SocketOptions;
use crate::url::Url;

/// One established transport-level channel.
///
/// `tx` carries messages toward the remote peer; `rx` yields messages the
/// peer sent. Dropping both ends closes the connection; a disconnected
/// channel means the peer (or the driver's pump) went away.
pub struct PipeConn {
    /// Outbound queue, bounded by the send-buffer option.
    pub tx: flume::Sender<Message>,
    /// Inbound queue, bounded by the recv-buffer option.
    pub rx: flume::Receiver<Message>,
}

/// A bound listener endpoint produced by [`TransportDriver::bind`].
pub trait Acceptor: Send + Sync {
    /// Block until the next inbound connection is established.
    ///
    /// # Errors
    ///
    /// `Closed` once [`Acceptor::close`] has been called; carrier errors
    /// otherwise.
    fn accept(&self) -> Result<PipeConn>;

    /// Unbind and wake any blocked `accept` with `Closed`. Idempotent.
    fn close(&self);
}

/// A pluggable connection carrier.
pub trait TransportDriver: Send + Sync {
    /// URL scheme this driver owns.
    fn scheme(&self) -> &'static str;

    /// Establish one outbound connection.
    fn dial(&self, url: &Url, opts: &SocketOptions) -> Result<PipeConn>;

    /// Bind a listener.
    fn bind(&self, url: &Url, opts: &SocketOptions) -> Result<Box<dyn Acceptor>>;
}

static DRIVERS: Lazy<Vec<Box<dyn TransportDriver>>> = Lazy::new(|| {
    vec![
        Box::new(crate::inproc::InprocDriver),
        Box::new(crate::tcp::TcpDriver),
    ]
});

/// Resolve the driver for a URL's scheme.
///
/// # Errors
///
/// `NotSupported` for a scheme no driver owns.
pub fn driver_for(url: &Url) -> Result<&'static dyn TransportDriver> {
    DRIVERS
        .iter()
        .map(AsRef::as_ref)
        .find(|d| d.scheme() == url.scheme())
        .ok_or(Error::NotSupported)
}
