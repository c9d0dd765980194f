//! Protocol layer: sockets, pattern engines, endpoints and asynchronous I/O.
//!
//! This crate builds the messaging semantics on top of the plumbing in
//! `filament-core`. A [`Socket`] owns one pattern engine (Pair, Req/Rep,
//! Pub/Sub, Push/Pull, Bus or Surveyor/Respondent), a set of pipes fed by
//! transport connections, and any number of [`Dialer`]/[`Listener`]
//! endpoints. The [`Aio`] type and its scheduler provide completion-based
//! send/receive on top of the same socket core.

#![cfg_attr(not(test), deny(unsafe_code))]

pub mod aio;
pub mod endpoint;
pub mod pipe;
pub mod proto;
pub mod socket;

pub(crate) mod scheduler;

pub use aio::Aio;
pub use endpoint::{Dialer, EndpointState, Listener};
pub use pipe::PipeId;
pub use proto::Pattern;
pub use socket::{stats_snapshot, Socket};
