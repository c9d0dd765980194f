//! Handle-based binding surface.
//!
//! Flat functions over opaque `u64` handles, shaped for embedding behind a
//! C FFI or a language binding. Sockets, asynchronous I/O objects and
//! messages each live in a process-wide table; handles are generation
//! tagged, so a handle is permanently invalidated the moment its object is
//! freed and a recycled table slot never resurrects an old handle. A stale
//! handle fails with [`Error::Closed`], never undefined behavior.
//!
//! All functions may be called concurrently from any thread; per-object
//! serialization happens inside the engine.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use filament_core::handle::{Handle, HandleTable};

use crate::{Aio, Error, Message, OptValue, Pattern, Result, Socket, StatCursor, Url};

/// Flag for [`send_bytes`] / [`recv_bytes`]: fail with `WouldBlock` (or
/// `NotConnected`) instead of waiting.
pub const NONBLOCK: u32 = 2;

static SOCKETS: Lazy<HandleTable<Socket>> = Lazy::new(HandleTable::new);
static AIOS: Lazy<HandleTable<Aio>> = Lazy::new(HandleTable::new);
static MSGS: Lazy<HandleTable<Mutex<Option<Message>>>> = Lazy::new(HandleTable::new);

fn socket(h: Handle) -> Result<Arc<Socket>> {
    SOCKETS.get(h).ok_or(Error::Closed)
}

fn aio(h: Handle) -> Result<Arc<Aio>> {
    AIOS.get(h).ok_or(Error::Closed)
}

/// Take the message out of a message handle, consuming the handle.
fn take_msg(h: Handle) -> Result<Message> {
    let slot = MSGS.remove(h).ok_or(Error::Closed)?;
    let msg = slot.lock().take();
    msg.ok_or(Error::InvalidState)
}

/// Open a socket for a pattern.
///
/// # Errors
///
/// Currently infallible; the `Result` mirrors the rest of the surface.
pub fn open(pattern: Pattern) -> Result<Handle> {
    let sock = Socket::open(pattern)?;
    let h = SOCKETS.insert(sock);
    tracing::debug!(handle = h.raw(), %pattern, "handle opened");
    Ok(h)
}

/// Close a socket and invalidate its handle.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn close(h: Handle) -> Result<()> {
    let sock = SOCKETS.remove(h).ok_or(Error::Closed)?;
    sock.close();
    tracing::debug!(handle = h.raw(), "handle closed");
    Ok(())
}

/// Process-unique id of the socket behind a handle.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn socket_id(h: Handle) -> Result<u32> {
    Ok(socket(h)?.id())
}

/// Bind a listening endpoint to the socket.
///
/// # Errors
///
/// As [`Socket::listen`], plus `Closed` for a stale handle.
pub fn listen(h: Handle, url: &str) -> Result<()> {
    socket(h)?.listen(url)?;
    Ok(())
}

/// Start a dialing endpoint on the socket.
///
/// # Errors
///
/// As [`Socket::dial`], plus `Closed` for a stale handle.
pub fn dial(h: Handle, url: &str) -> Result<()> {
    socket(h)?.dial(url)?;
    Ok(())
}

/// Send a byte buffer on the socket. Pass [`NONBLOCK`] in `flags` to fail
/// instead of waiting.
///
/// # Errors
///
/// As [`Socket::send`] / [`Socket::try_send`], plus `Closed` for a stale
/// handle and `OutOfMemory` if the message cannot be allocated.
pub fn send_bytes(h: Handle, data: &[u8], flags: u32) -> Result<()> {
    let sock = socket(h)?;
    let msg = Message::from_slice(data)?;
    if flags & NONBLOCK != 0 {
        sock.try_send(msg)
    } else {
        sock.send(msg)
    }
}

/// Receive a message body from the socket. Pass [`NONBLOCK`] in `flags`
/// to fail instead of waiting.
///
/// # Errors
///
/// As [`Socket::recv`] / [`Socket::try_recv`], plus `Closed` for a stale
/// handle.
pub fn recv_bytes(h: Handle, flags: u32) -> Result<Vec<u8>> {
    let sock = socket(h)?;
    let msg = if flags & NONBLOCK != 0 {
        sock.try_recv()?
    } else {
        sock.recv()?
    };
    Ok(msg.into_body())
}

/// Allocate a message with a zero-filled body of `size` bytes.
///
/// # Errors
///
/// `OutOfMemory` if the allocation fails.
pub fn msg_alloc(size: usize) -> Result<Handle> {
    let msg = Message::alloc(size)?;
    Ok(MSGS.insert(Mutex::new(Some(msg))))
}

/// Free a message handle and the message it still owns, if any.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn msg_free(h: Handle) -> Result<()> {
    MSGS.remove(h).map(|_| ()).ok_or(Error::Closed)
}

/// Copy of the message body behind a handle.
///
/// # Errors
///
/// `Closed` for a stale handle, `InvalidState` if the message was already
/// handed off.
pub fn msg_body(h: Handle) -> Result<Vec<u8>> {
    let slot = MSGS.get(h).ok_or(Error::Closed)?;
    let guard = slot.lock();
    let msg = guard.as_ref().ok_or(Error::InvalidState)?;
    Ok(msg.body().to_vec())
}

/// Append bytes to the message body behind a handle.
///
/// # Errors
///
/// `Closed` for a stale handle, `InvalidState` if the message was already
/// handed off, `OutOfMemory` if growing fails.
pub fn msg_append(h: Handle, data: &[u8]) -> Result<()> {
    let slot = MSGS.get(h).ok_or(Error::Closed)?;
    let mut guard = slot.lock();
    let msg = guard.as_mut().ok_or(Error::InvalidState)?;
    msg.append(data)
}

/// Send the message behind `msg` on the socket behind `sock`, without
/// copying the body. The message handle is consumed whether or not the
/// send succeeds.
///
/// # Errors
///
/// As [`send_bytes`], plus `InvalidState` if the message was already
/// handed off.
pub fn send_msg(sock: Handle, msg: Handle, flags: u32) -> Result<()> {
    let s = socket(sock)?;
    let m = take_msg(msg)?;
    if flags & NONBLOCK != 0 {
        s.try_send(m)
    } else {
        s.send(m)
    }
}

/// Receive a message on the socket behind `sock`, returning a fresh
/// message handle.
///
/// # Errors
///
/// As [`recv_bytes`].
pub fn recv_msg(sock: Handle, flags: u32) -> Result<Handle> {
    let s = socket(sock)?;
    let m = if flags & NONBLOCK != 0 {
        s.try_recv()?
    } else {
        s.recv()?
    };
    Ok(MSGS.insert(Mutex::new(Some(m))))
}

/// Set a socket option by name.
///
/// # Errors
///
/// As [`Socket::set_option`], plus `Closed` for a stale handle.
pub fn set_option(h: Handle, name: &str, value: OptValue) -> Result<()> {
    socket(h)?.set_option(name, value)
}

/// Read a socket option by name.
///
/// # Errors
///
/// As [`Socket::get_option`], plus `Closed` for a stale handle.
pub fn get_option(h: Handle, name: &str) -> Result<OptValue> {
    socket(h)?.get_option(name)
}

/// Subscribe a Sub socket to a body prefix.
///
/// # Errors
///
/// As [`Socket::subscribe`], plus `Closed` for a stale handle.
pub fn subscribe(h: Handle, prefix: &[u8]) -> Result<()> {
    socket(h)?.subscribe(prefix)
}

/// Drop a Sub socket's subscription.
///
/// # Errors
///
/// As [`Socket::unsubscribe`], plus `Closed` for a stale handle.
pub fn unsubscribe(h: Handle, prefix: &[u8]) -> Result<()> {
    socket(h)?.unsubscribe(prefix)
}

/// Allocate an asynchronous I/O object.
#[must_use]
pub fn aio_alloc() -> Handle {
    AIOS.insert(Aio::new())
}

/// Cancel whatever the AIO is doing, wait for it to settle, and free it.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn aio_free(h: Handle) -> Result<()> {
    let a = AIOS.remove(h).ok_or(Error::Closed)?;
    a.cancel();
    a.wait();
    Ok(())
}

/// Submit an asynchronous send of the message behind `msg`. The message
/// handle is consumed whether or not the submission succeeds.
///
/// # Errors
///
/// `Busy` while the AIO has an operation in flight, `Closed` for stale
/// handles, `InvalidState` if the message was already handed off.
pub fn aio_send(h: Handle, sock: Handle, msg: Handle) -> Result<()> {
    let a = aio(h)?;
    let s = socket(sock)?;
    let m = take_msg(msg)?;
    a.send(&s, m)
}

/// Submit an asynchronous receive.
///
/// # Errors
///
/// `Busy` while the AIO has an operation in flight, `Closed` for stale
/// handles.
pub fn aio_recv(h: Handle, sock: Handle) -> Result<()> {
    let a = aio(h)?;
    let s = socket(sock)?;
    a.recv(&s)
}

/// Block until the AIO's in-flight operation, if any, completes.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn aio_wait(h: Handle) -> Result<()> {
    aio(h)?.wait();
    Ok(())
}

/// Terminal result of the AIO's last operation.
///
/// # Errors
///
/// As [`Aio::result`], plus `Closed` for a stale handle.
pub fn aio_result(h: Handle) -> Result<()> {
    aio(h)?.result()
}

/// Take the message produced by a completed asynchronous receive,
/// returning a fresh message handle.
///
/// # Errors
///
/// `NotFound` when there is no message to take, `Closed` for a stale
/// handle.
pub fn aio_take_msg(h: Handle) -> Result<Handle> {
    let m = aio(h)?.take_msg().ok_or(Error::NotFound)?;
    Ok(MSGS.insert(Mutex::new(Some(m))))
}

/// Abort the AIO's in-flight operation with `Canceled`.
///
/// # Errors
///
/// `Closed` if the handle is stale.
pub fn aio_cancel(h: Handle) -> Result<()> {
    aio(h)?.cancel();
    Ok(())
}

/// Parse an address string.
///
/// # Errors
///
/// `InvalidAddress` for a malformed address.
pub fn url_parse(s: &str) -> Result<Url> {
    s.parse()
}

/// Cursor over a fresh statistics snapshot.
#[must_use]
pub fn stats_cursor() -> StatCursor {
    StatCursor::new(crate::stats_snapshot())
}

/// Human-readable text for a stable error code. Unknown codes map to a
/// fixed "unknown error" string.
#[must_use]
pub fn strerror(code: u32) -> &'static str {
    Error::strerror(code)
}

/// Engine version string.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
