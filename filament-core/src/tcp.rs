//! TCP transport driver.
//!
//! Each established connection runs a reader thread and a writer thread
//! pumping between the stream and the pipe's bounded channels. The wire
//! framing is internal to this driver: a 4-byte header length, an 8-byte
//! body length (both big-endian), then header and body bytes.
//!
//! Dropping a connection's [`PipeConn`] ends the writer pump, which shuts
//! the stream down and in turn unblocks the reader pump.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::options::SocketOptions;
use crate::transport::{Acceptor, PipeConn, TransportDriver};
use crate::url::Url;

// Headers carry a handful of u32 tags at most.
const MAX_HEADER_LEN: u32 = 256;

/// The `tcp://` driver.
pub struct TcpDriver;

impl TransportDriver for TcpDriver {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    fn dial(&self, url: &Url, opts: &SocketOptions) -> Result<PipeConn> {
        let host = url.host().ok_or(Error::InvalidAddress)?;
        let port = url.port().ok_or(Error::InvalidAddress)?;
        let stream = TcpStream::connect((host, port))?;
        configure(&stream)?;
        debug!(%url, "tcp dial established");
        Ok(spawn_pumps(stream, opts))
    }

    fn bind(&self, url: &Url, opts: &SocketOptions) -> Result<Box<dyn Acceptor>> {
        let host = url.host().ok_or(Error::InvalidAddress)?;
        let port = url.port().ok_or(Error::InvalidAddress)?;
        let listener = TcpListener::bind((host, port))?;
        debug!(%url, "tcp listener bound");
        Ok(Box::new(TcpAcceptor {
            listener,
            opts: opts.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct TcpAcceptor {
    listener: TcpListener,
    opts: SocketOptions,
    closed: AtomicBool,
}

impl Acceptor for TcpAcceptor {
    fn accept(&self) -> Result<PipeConn> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            if let Err(e) = configure(&stream) {
                warn!(%peer, error = %e, "tcp accept: socket configuration failed");
                continue;
            }
            trace!(%peer, "tcp connection accepted");
            return Ok(spawn_pumps(stream, &self.opts));
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // A blocking accept only notices the flag on its next wakeup, so
        // poke the listener with a throwaway local connection.
        if let Ok(mut addr) = self.listener.local_addr() {
            if addr.ip().is_unspecified() {
                addr.set_ip(std::net::IpAddr::from([127, 0, 0, 1]));
            }
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(100));
        }
    }
}

fn configure(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)))?;
    Ok(())
}

/// Spawn the reader and writer pumps for one connection.
fn spawn_pumps(stream: TcpStream, opts: &SocketOptions) -> PipeConn {
    let (out_tx, out_rx) = flume::bounded::<Message>(opts.send_buffer);
    let (in_tx, in_rx) = flume::bounded::<Message>(opts.recv_buffer);
    let max_msg_size = opts.max_msg_size;

    let reader = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            // No reader: surface as an immediately-dead pipe.
            warn!(error = %e, "tcp stream clone failed");
            drop(in_tx);
            return PipeConn {
                tx: out_tx,
                rx: in_rx,
            };
        }
    };

    let spawned = thread::Builder::new()
        .name("filament-tcp-rd".into())
        .spawn(move || {
            let mut reader = reader;
            loop {
                match read_frame(&mut reader, max_msg_size) {
                    Ok(Some(msg)) => {
                        if in_tx.send(msg).is_err() {
                            break; // pipe detached
                        }
                    }
                    Ok(None) => {
                        trace!("tcp reader: peer closed");
                        break;
                    }
                    Err(e) => {
                        trace!(error = %e, "tcp reader: terminating");
                        break;
                    }
                }
            }
            let _ = reader.shutdown(Shutdown::Both);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn tcp reader");
        let _ = stream.shutdown(Shutdown::Both);
        return PipeConn {
            tx: out_tx,
            rx: in_rx,
        };
    }

    let spawned = thread::Builder::new()
        .name("filament-tcp-wr".into())
        .spawn(move || {
            let mut writer = stream;
            for msg in out_rx.iter() {
                if let Err(e) = write_frame(&mut writer, &msg) {
                    trace!(error = %e, "tcp writer: terminating");
                    break;
                }
            }
            // Channel closed or write failed: tear the stream down so
            // the reader pump unblocks too.
            let _ = writer.shutdown(Shutdown::Both);
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn tcp writer");
    }

    PipeConn {
        tx: out_tx,
        rx: in_rx,
    }
}

fn write_frame<W: Write>(w: &mut W, msg: &Message) -> std::io::Result<()> {
    let mut prefix = [0u8; 12];
    prefix[..4].copy_from_slice(&(msg.header_len() as u32).to_be_bytes());
    prefix[4..].copy_from_slice(&(msg.len() as u64).to_be_bytes());
    w.write_all(&prefix)?;
    w.write_all(msg.header())?;
    w.write_all(msg.body())?;
    w.flush()
}

/// Read one frame. `Ok(None)` is a clean EOF on a frame boundary.
fn read_frame<R: Read>(r: &mut R, max_msg_size: Option<usize>) -> Result<Option<Message>> {
    let mut prefix = [0u8; 12];
    match r.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut hl = [0u8; 4];
    hl.copy_from_slice(&prefix[..4]);
    let mut bl = [0u8; 8];
    bl.copy_from_slice(&prefix[4..]);
    let header_len = u32::from_be_bytes(hl);
    let body_len = u64::from_be_bytes(bl);
    if header_len > MAX_HEADER_LEN {
        return Err(Error::ProtocolError);
    }
    let body_len = usize::try_from(body_len).map_err(|_| Error::ProtocolError)?;
    if let Some(max) = max_msg_size {
        if body_len > max {
            return Err(Error::MessageTooLarge {
                size: body_len,
                max,
            });
        }
    }

    let mut header = vec![0u8; header_len as usize];
    r.read_exact(&mut header).map_err(mid_frame_eof)?;
    let mut msg = Message::alloc(body_len)?;
    r.read_exact(msg.body_mut()).map_err(mid_frame_eof)?;
    msg.header_set(&header)?;
    Ok(Some(msg))
}

fn mid_frame_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ProtocolError
    } else {
        e.into()
    }
}
