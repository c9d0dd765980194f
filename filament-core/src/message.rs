//! Owned message buffers.
//!
//! A `Message` is the unit of exchange between sockets: an owned body plus
//! a protocol-internal header region. The header carries routing state
//! (correlation ids, survey ids, origin pipe ids) and is never shown to
//! application code except through pattern-specific accessors.
//!
//! Ownership is a move: a message is held by exactly one owner at a time
//! (the application, an in-flight AIO, or a pipe queue) and hand-off never
//! copies. `Message` deliberately does not implement `Clone`; duplication
//! is the explicit, fallible [`Message::try_clone`].

use crate::error::{Error, Result};

/// An owned, resizable message with a header/body split.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Message {
    header: Vec<u8>,
    body: Vec<u8>,
}

impl Message {
    /// Create an empty message.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Allocate a message with a zero-filled body of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocation cannot be satisfied.
    pub fn alloc(size: usize) -> Result<Self> {
        let mut body = Vec::new();
        body.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
        body.resize(size, 0);
        Ok(Self {
            header: Vec::new(),
            body,
        })
    }

    /// Build a message by copying a byte slice into the body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut body = Vec::new();
        body.try_reserve_exact(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        body.extend_from_slice(bytes);
        Ok(Self {
            header: Vec::new(),
            body,
        })
    }

    /// Resize the body, preserving the existing prefix and zero-filling
    /// any growth.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size > self.body.len() {
            let grow = new_size - self.body.len();
            self.body.try_reserve(grow).map_err(|_| Error::OutOfMemory)?;
        }
        self.body.resize(new_size, 0);
        Ok(())
    }

    /// Current body content.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mutable view of the body.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.body
    }

    /// Body length in bytes, independent of capacity.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Check if the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Append bytes to the body.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.body
            .try_reserve(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    /// Prepend bytes to the body.
    pub fn insert(&mut self, bytes: &[u8]) -> Result<()> {
        self.body
            .try_reserve(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        self.body.splice(0..0, bytes.iter().copied());
        Ok(())
    }

    /// Drop the first `n` body bytes.
    pub fn trim(&mut self, n: usize) -> Result<()> {
        if n > self.body.len() {
            return Err(Error::InvalidArgument);
        }
        self.body.drain(..n);
        Ok(())
    }

    /// Truncate the body to `len` bytes.
    pub fn truncate(&mut self, len: usize) {
        self.body.truncate(len);
    }

    /// Clear the body. The header keeps any routing state; use
    /// [`header_clear`](Self::header_clear) to drop that too.
    pub fn clear(&mut self) {
        self.body.clear();
    }

    /// Consume the message, yielding the body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Explicit, fallible duplication.
    pub fn try_clone(&self) -> Result<Self> {
        let mut header = Vec::new();
        header
            .try_reserve_exact(self.header.len())
            .map_err(|_| Error::OutOfMemory)?;
        header.extend_from_slice(&self.header);
        let mut body = Vec::new();
        body.try_reserve_exact(self.body.len())
            .map_err(|_| Error::OutOfMemory)?;
        body.extend_from_slice(&self.body);
        Ok(Self { header, body })
    }

    // --- header region (protocol-internal) ---

    /// Raw header content.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// Header length in bytes.
    #[must_use]
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Discard the header region.
    pub fn header_clear(&mut self) {
        self.header.clear();
    }

    /// Replace the header region wholesale.
    pub fn header_set(&mut self, bytes: &[u8]) -> Result<()> {
        self.header.clear();
        self.header
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::OutOfMemory)?;
        self.header.extend_from_slice(bytes);
        Ok(())
    }

    /// Push a big-endian u32 onto the end of the header.
    ///
    /// Correlation ids, survey ids and pipe ids all travel this way.
    pub fn header_push_u32(&mut self, v: u32) -> Result<()> {
        self.header.try_reserve(4).map_err(|_| Error::OutOfMemory)?;
        self.header.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Pop a big-endian u32 off the end of the header.
    pub fn header_pop_u32(&mut self) -> Option<u32> {
        if self.header.len() < 4 {
            return None;
        }
        let at = self.header.len() - 4;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.header[at..]);
        self.header.truncate(at);
        Some(u32::from_be_bytes(raw))
    }

    /// Peek the trailing header u32 without removing it.
    #[must_use]
    pub fn header_peek_u32(&self) -> Option<u32> {
        if self.header.len() < 4 {
            return None;
        }
        let at = self.header.len() - 4;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.header[at..]);
        Some(u32::from_be_bytes(raw))
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self {
            header: Vec::new(),
            body,
        }
    }
}
