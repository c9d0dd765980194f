/// Filament Error Types
///
/// One closed taxonomy for every fallible operation in the engine. The
/// numeric codes are stable, as is the `strerror` text, so the handle
/// surface can hand both to a binding layer.

use std::io;
use thiserror::Error;

/// Main error type for filament operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An argument was malformed or out of range
    #[error("invalid argument")]
    InvalidArgument,

    /// Memory could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    /// Resource busy (e.g. an AIO with an operation already in flight)
    #[error("resource busy")]
    Busy,

    /// Deadline elapsed before the operation could complete
    #[error("timed out")]
    Timeout,

    /// Remote peer refused the connection
    #[error("connection refused")]
    ConnectionRefused,

    /// Operation on a closed socket, endpoint or handle
    #[error("object closed")]
    Closed,

    /// Operation cannot proceed without blocking
    #[error("resource unavailable, try again")]
    WouldBlock,

    /// Option, scheme or operation not supported
    #[error("not supported")]
    NotSupported,

    /// Bind address already in use
    #[error("address in use")]
    AddressInUse,

    /// Operation invalid in the protocol's current state
    #[error("incorrect state")]
    InvalidState,

    /// Named object does not exist
    #[error("entry not found")]
    NotFound,

    /// Peer violated the protocol
    #[error("protocol error")]
    ProtocolError,

    /// Address unreachable
    #[error("address unreachable")]
    Unreachable,

    /// Address was malformed
    #[error("invalid address")]
    InvalidAddress,

    /// Operation not permitted
    #[error("permission denied")]
    PermissionDenied,

    /// Message exceeds the negotiated size limit
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Connection reset by peer
    #[error("connection reset")]
    ConnectionReset,

    /// Connection aborted
    #[error("connection aborted")]
    ConnectionAborted,

    /// Operation canceled
    #[error("operation canceled")]
    Canceled,

    /// No connected peer is able to carry the message
    #[error("not connected")]
    NotConnected,
}

/// Result type alias for filament operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable numeric code for this error, for the handle surface.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::OutOfMemory => 2,
            Self::InvalidArgument => 3,
            Self::Busy => 4,
            Self::Timeout => 5,
            Self::ConnectionRefused => 6,
            Self::Closed => 7,
            Self::WouldBlock => 8,
            Self::NotSupported => 9,
            Self::AddressInUse => 10,
            Self::InvalidState => 11,
            Self::NotFound => 12,
            Self::ProtocolError => 13,
            Self::Unreachable => 14,
            Self::InvalidAddress => 15,
            Self::PermissionDenied => 16,
            Self::MessageTooLarge { .. } => 17,
            Self::ConnectionAborted => 18,
            Self::ConnectionReset => 19,
            Self::Canceled => 20,
            Self::NotConnected => 21,
        }
    }

    /// Map a stable code back to a human-readable string.
    ///
    /// The mapping never changes between calls; unknown codes map to a
    /// fixed "unknown error" string.
    #[must_use]
    pub const fn strerror(code: u32) -> &'static str {
        match code {
            0 => "no error",
            2 => "out of memory",
            3 => "invalid argument",
            4 => "resource busy",
            5 => "timed out",
            6 => "connection refused",
            7 => "object closed",
            8 => "resource unavailable, try again",
            9 => "not supported",
            10 => "address in use",
            11 => "incorrect state",
            12 => "entry not found",
            13 => "protocol error",
            14 => "address unreachable",
            15 => "invalid address",
            16 => "permission denied",
            17 => "message too large",
            18 => "connection aborted",
            19 => "connection reset",
            20 => "operation canceled",
            21 => "not connected",
            _ => "unknown error",
        }
    }

    /// Transient transport failures are retried by dialers and never
    /// surface to the application.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused
                | Self::ConnectionReset
                | Self::ConnectionAborted
                | Self::Unreachable
                | Self::Timeout
        )
    }

    /// Check if this error terminates the object it was raised on.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Canceled)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            io::ErrorKind::AddrInUse => Self::AddressInUse,
            io::ErrorKind::AddrNotAvailable => Self::InvalidAddress,
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            io::ErrorKind::UnexpectedEof => Self::ConnectionAborted,
            _ => Self::ProtocolError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_distinct() {
        let all = [
            Error::OutOfMemory,
            Error::InvalidArgument,
            Error::Busy,
            Error::Timeout,
            Error::ConnectionRefused,
            Error::Closed,
            Error::WouldBlock,
            Error::NotSupported,
            Error::AddressInUse,
            Error::InvalidState,
            Error::NotFound,
            Error::ProtocolError,
            Error::Unreachable,
            Error::InvalidAddress,
            Error::PermissionDenied,
            Error::MessageTooLarge { size: 2, max: 1 },
            Error::ConnectionAborted,
            Error::ConnectionReset,
            Error::Canceled,
            Error::NotConnected,
        ];
        let mut codes: Vec<u32> = all.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn strerror_round_trip() {
        assert_eq!(Error::strerror(Error::Timeout.code()), "timed out");
        assert_eq!(Error::strerror(Error::Closed.code()), "object closed");
        assert_eq!(Error::strerror(9999), "unknown error");
        // Stable across calls
        assert_eq!(Error::strerror(5), Error::strerror(5));
    }

    #[test]
    fn io_error_mapping() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(Error::from(refused), Error::ConnectionRefused);
        assert!(Error::ConnectionRefused.is_transient());
        assert!(!Error::InvalidState.is_transient());
    }
}
