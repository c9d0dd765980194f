//! Socket configuration options.
//!
//! Two views of the same data: the typed [`SocketOptions`] snapshot the
//! engine reads, and a name-keyed get/set registry the handle surface
//! exposes to binding layers. Timeouts are sampled when an operation is
//! submitted, so changing one never retargets an in-flight deadline.

use std::time::Duration;

use crate::error::{Error, Result};

/// Option names understood by [`SocketOptions::set`] / [`SocketOptions::get`].
pub mod keys {
    /// Receive deadline (`TimeoutOpt`).
    pub const RECV_TIMEOUT: &str = "recv-timeout";
    /// Send deadline (`TimeoutOpt`).
    pub const SEND_TIMEOUT: &str = "send-timeout";
    /// Per-pipe receive queue depth, in messages.
    pub const RECV_BUFFER: &str = "recv-buffer";
    /// Per-pipe send queue depth, in messages.
    pub const SEND_BUFFER: &str = "send-buffer";
    /// Initial dial retry delay, in milliseconds.
    pub const RECONNECT_TIME_MIN: &str = "reconnect-time-min";
    /// Dial retry backoff cap, in milliseconds.
    pub const RECONNECT_TIME_MAX: &str = "reconnect-time-max";
    /// Maximum accepted message size in bytes, 0 = unlimited.
    pub const MAX_MSG_SIZE: &str = "max-msg-size";
    /// How long a surveyor collects responses, in milliseconds.
    pub const SURVEY_TIME: &str = "survey-time";
    /// Pair v1 polyamorous mode (many peers, header-addressed sends).
    pub const PAIR1_POLY: &str = "pair1-poly";
}

/// A timeout value as the binding surface expresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOpt {
    /// Block forever.
    Infinite,
    /// Use the engine default for the operation.
    Default,
    /// Wait up to this many milliseconds; zero means non-blocking.
    Millis(u32),
}

impl TimeoutOpt {
    /// Resolve to a concrete deadline duration.
    ///
    /// `None` means block indefinitely.
    #[must_use]
    pub fn resolve(self, default: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Default => default,
            Self::Millis(ms) => Some(Duration::from_millis(u64::from(ms))),
        }
    }
}

/// A typed option value for the name-keyed registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptValue {
    /// A timeout.
    Ms(TimeoutOpt),
    /// A size or count.
    Size(usize),
    /// A flag.
    Bool(bool),
}

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use filament_core::options::{SocketOptions, TimeoutOpt};
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(TimeoutOpt::Millis(5000))
///     .with_send_timeout(TimeoutOpt::Millis(5000));
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Receive deadline; `Infinite` blocks, `Millis(0)` polls.
    pub recv_timeout: TimeoutOpt,
    /// Send deadline; `Infinite` blocks, `Millis(0)` polls.
    pub send_timeout: TimeoutOpt,
    /// Per-pipe receive queue depth (messages).
    pub recv_buffer: usize,
    /// Per-pipe send queue depth (messages).
    pub send_buffer: usize,
    /// First dial retry delay.
    pub reconnect_min: Duration,
    /// Backoff cap for dial retries.
    pub reconnect_max: Duration,
    /// Reject messages larger than this; `None` = unlimited.
    pub max_msg_size: Option<usize>,
    /// Survey collection window.
    pub survey_time: Duration,
    /// Pair v1 many-peer mode.
    pub pair1_poly: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: TimeoutOpt::Infinite,
            send_timeout: TimeoutOpt::Infinite,
            recv_buffer: 128,
            send_buffer: 128,
            reconnect_min: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(8),
            max_msg_size: None,
            survey_time: Duration::from_secs(1),
            pair1_poly: false,
        }
    }
}

impl SocketOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the receive deadline.
    #[must_use]
    pub fn with_recv_timeout(mut self, t: TimeoutOpt) -> Self {
        self.recv_timeout = t;
        self
    }

    /// Set the send deadline.
    #[must_use]
    pub fn with_send_timeout(mut self, t: TimeoutOpt) -> Self {
        self.send_timeout = t;
        self
    }

    /// Set the per-pipe receive queue depth.
    #[must_use]
    pub fn with_recv_buffer(mut self, depth: usize) -> Self {
        self.recv_buffer = depth;
        self
    }

    /// Set the per-pipe send queue depth.
    #[must_use]
    pub fn with_send_buffer(mut self, depth: usize) -> Self {
        self.send_buffer = depth;
        self
    }

    /// Set the first dial retry delay.
    #[must_use]
    pub fn with_reconnect_min(mut self, d: Duration) -> Self {
        self.reconnect_min = d;
        self
    }

    /// Set the dial retry backoff cap.
    #[must_use]
    pub fn with_reconnect_max(mut self, d: Duration) -> Self {
        self.reconnect_max = d;
        self
    }

    /// Set the maximum accepted message size.
    #[must_use]
    pub fn with_max_msg_size(mut self, limit: Option<usize>) -> Self {
        self.max_msg_size = limit;
        self
    }

    /// Set the survey collection window.
    #[must_use]
    pub fn with_survey_time(mut self, d: Duration) -> Self {
        self.survey_time = d;
        self
    }

    /// Enable Pair v1 many-peer mode.
    #[must_use]
    pub fn with_pair1_poly(mut self, enabled: bool) -> Self {
        self.pair1_poly = enabled;
        self
    }

    /// Set an option by name.
    ///
    /// # Errors
    ///
    /// `NotSupported` for an unknown name, `InvalidArgument` on a type or
    /// range mismatch.
    pub fn set(&mut self, name: &str, value: OptValue) -> Result<()> {
        match (name, value) {
            (keys::RECV_TIMEOUT, OptValue::Ms(t)) => self.recv_timeout = t,
            (keys::SEND_TIMEOUT, OptValue::Ms(t)) => self.send_timeout = t,
            (keys::RECV_BUFFER, OptValue::Size(n)) if n > 0 => self.recv_buffer = n,
            (keys::SEND_BUFFER, OptValue::Size(n)) if n > 0 => self.send_buffer = n,
            (keys::RECONNECT_TIME_MIN, OptValue::Ms(TimeoutOpt::Millis(ms))) => {
                self.reconnect_min = Duration::from_millis(u64::from(ms));
            }
            (keys::RECONNECT_TIME_MAX, OptValue::Ms(TimeoutOpt::Millis(ms))) => {
                self.reconnect_max = Duration::from_millis(u64::from(ms));
            }
            (keys::MAX_MSG_SIZE, OptValue::Size(n)) => {
                self.max_msg_size = if n == 0 { None } else { Some(n) };
            }
            (keys::SURVEY_TIME, OptValue::Ms(TimeoutOpt::Millis(ms))) => {
                self.survey_time = Duration::from_millis(u64::from(ms));
            }
            (keys::PAIR1_POLY, OptValue::Bool(b)) => self.pair1_poly = b,
            (
                keys::RECV_TIMEOUT
                | keys::SEND_TIMEOUT
                | keys::RECV_BUFFER
                | keys::SEND_BUFFER
                | keys::RECONNECT_TIME_MIN
                | keys::RECONNECT_TIME_MAX
                | keys::MAX_MSG_SIZE
                | keys::SURVEY_TIME
                | keys::PAIR1_POLY,
                _,
            ) => return Err(Error::InvalidArgument),
            _ => return Err(Error::NotSupported),
        }
        Ok(())
    }

    /// Read an option by name.
    ///
    /// # Errors
    ///
    /// `NotSupported` for an unknown name.
    pub fn get(&self, name: &str) -> Result<OptValue> {
        let v = match name {
            keys::RECV_TIMEOUT => OptValue::Ms(self.recv_timeout),
            keys::SEND_TIMEOUT => OptValue::Ms(self.send_timeout),
            keys::RECV_BUFFER => OptValue::Size(self.recv_buffer),
            keys::SEND_BUFFER => OptValue::Size(self.send_buffer),
            keys::RECONNECT_TIME_MIN => {
                OptValue::Ms(TimeoutOpt::Millis(self.reconnect_min.as_millis() as u32))
            }
            keys::RECONNECT_TIME_MAX => {
                OptValue::Ms(TimeoutOpt::Millis(self.reconnect_max.as_millis() as u32))
            }
            keys::MAX_MSG_SIZE => OptValue::Size(self.max_msg_size.unwrap_or(0)),
            keys::SURVEY_TIME => {
                OptValue::Ms(TimeoutOpt::Millis(self.survey_time.as_millis() as u32))
            }
            keys::PAIR1_POLY => OptValue::Bool(self.pair1_poly),
            _ => return Err(Error::NotSupported),
        };
        Ok(v)
    }

    /// Check if receive operations should poll rather than block.
    #[must_use]
    pub fn is_recv_nonblocking(&self) -> bool {
        matches!(self.recv_timeout, TimeoutOpt::Millis(0))
    }

    /// Check if send operations should poll rather than block.
    #[must_use]
    pub fn is_send_nonblocking(&self) -> bool {
        matches!(self.send_timeout, TimeoutOpt::Millis(0))
    }
}
