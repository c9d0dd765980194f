//! Filament Core
//!
//! This crate contains the protocol-agnostic building blocks of the
//! filament messaging engine:
//! - Owned message buffers with a protocol-internal header region (`message`)
//! - The error taxonomy with stable codes (`error`)
//! - URL parsing (`url`)
//! - Typed socket options (`options`)
//! - Bounded exponential dial backoff (`backoff`)
//! - Generation-tagged handle arena (`handle`)
//! - Immutable statistics snapshots (`stats`)
//! - The transport-driver seam plus the inproc and tcp drivers
//!   (`transport`, `inproc`, `tcp`)

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod backoff;
pub mod error;
pub mod handle;
pub mod inproc;
pub mod message;
pub mod options;
pub mod stats;
pub mod tcp;
pub mod transport;
pub mod url;

// Small prelude so downstream crates pull the common types in one line.
pub mod prelude {
    pub use crate::backoff::Backoff;
    pub use crate::error::{Error, Result};
    pub use crate::handle::{Handle, HandleTable};
    pub use crate::message::Message;
    pub use crate::options::{OptValue, SocketOptions, TimeoutOpt};
    pub use crate::stats::{StatCursor, StatNode};
    pub use crate::transport::{Acceptor, PipeConn, TransportDriver};
    pub use crate::url::Url;
}
