//! # Filament
//!
//! An asynchronous multi-pattern messaging engine. Applications talk
//! through pattern-typed sockets; the engine handles framing, connection
//! management with automatic redial, message routing, and completion-based
//! asynchronous I/O.
//!
//! ## Architecture
//!
//! Filament is layered as three crates:
//!
//! - **`filament-core`**: messages, errors, options, URLs, statistics and
//!   the transport drivers (`inproc`, `tcp`)
//! - **`filament-proto`**: the socket core, the pattern engines, endpoints
//!   and the AIO scheduler
//! - **`filament`**: public API surface (this crate), including the
//!   handle-based [`handle`] binding surface
//!
//! ## Patterns
//!
//! | Pattern | Peers | Shape |
//! |---|---|---|
//! | `Pair0` / `Pair1` | pair | bidirectional conversation |
//! | `Req0` / `Rep0` | req ↔ rep | correlated request/reply |
//! | `Pub0` / `Sub0` | pub → sub | broadcast with subscriber-side filtering |
//! | `Push0` / `Pull0` | push → pull | load-balanced pipeline |
//! | `Surveyor0` / `Respondent0` | svy ↔ resp | timed many-answer question |
//! | `Bus0` | mesh | broadcast without self-echo |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use filament::{Message, Pattern, Socket};
//!
//! # fn main() -> filament::Result<()> {
//! let server = Socket::open(Pattern::Pair0)?;
//! server.listen("inproc://demo")?;
//!
//! let client = Socket::open(Pattern::Pair0)?;
//! client.dial("inproc://demo")?;
//!
//! client.send(Message::from_slice(b"hello")?)?;
//! let msg = server.recv()?;
//! assert_eq!(msg.body(), b"hello");
//!
//! client.close();
//! server.close();
//! # Ok(())
//! # }
//! ```
//!
//! Sockets must be closed explicitly: endpoints and connection pumps run
//! on background threads and keep going until [`Socket::close`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use filament_core::error::{Error, Result};
pub use filament_core::message::Message;
pub use filament_core::options::{keys, OptValue, SocketOptions, TimeoutOpt};
pub use filament_core::stats::{StatCursor, StatNode};
pub use filament_core::url::Url;

pub use filament_proto::{
    stats_snapshot, Aio, Dialer, EndpointState, Listener, Pattern, PipeId, Socket,
};

pub mod dev_tracing;
pub mod handle;
