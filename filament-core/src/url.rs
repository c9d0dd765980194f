//! URL parsing for transport addressing.
//!
//! A `Url` splits `scheme://rest` into the pieces the transport drivers
//! and the handle surface need: scheme, host, port, path.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed transport URL.
///
/// Supported forms:
/// - `inproc://name`
/// - `tcp://host:port`
/// - `ipc:///path/to/socket` (unix)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Url {
    scheme: String,
    host: Option<String>,
    port: Option<u16>,
    path: String,
}

impl Url {
    /// Parse a URL string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAddress` on a missing scheme, an empty endpoint
    /// name, or an unparsable port.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// The scheme, without the `://` separator.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host portion for host:port schemes, `None` otherwise.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Port for host:port schemes, `None` otherwise.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Everything after `scheme://` (endpoint name, socket path, or
    /// host:port as written).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true for `inproc://` URLs.
    #[must_use]
    pub fn is_inproc(&self) -> bool {
        self.scheme == "inproc"
    }

    /// Returns true for `tcp://` URLs.
    #[must_use]
    pub fn is_tcp(&self) -> bool {
        self.scheme == "tcp"
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s.split_once("://").ok_or(Error::InvalidAddress)?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(Error::InvalidAddress);
        }

        let (host, port) = match scheme {
            "tcp" => {
                // IPv6 literals arrive bracketed: tcp://[::1]:5555
                let (h, p) = if let Some(bracketed) = rest.strip_prefix('[') {
                    let (h, tail) = bracketed.split_once(']').ok_or(Error::InvalidAddress)?;
                    let p = tail.strip_prefix(':').ok_or(Error::InvalidAddress)?;
                    (h, p)
                } else {
                    rest.rsplit_once(':').ok_or(Error::InvalidAddress)?
                };
                if h.is_empty() {
                    return Err(Error::InvalidAddress);
                }
                let port: u16 = p.parse().map_err(|_| Error::InvalidAddress)?;
                (Some(h.to_string()), Some(port))
            }
            _ => (None, None),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
            path: rest.to_string(),
        })
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}
