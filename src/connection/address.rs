//! Dial target parsing
//!
//! Supports formats:
//! * host:port, [v6]:port, :port (local host)
//! * dns:///host:port
//! * http://host:port
//! * unix:/path/to/socket, unix:///path/to/socket

use crate::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Parsed dial target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// TCP host and port
    Tcp {
        /// Host name or IP literal (IPv6 without brackets)
        host: String,
        /// Port
        port: u16,
    },
    /// Unix domain socket path
    Unix(PathBuf),
}

impl Target {
    /// Parse an address string
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Config("address must not be empty".into()));
        }

        if let Some(path) = address
            .strip_prefix("unix://")
            .or_else(|| address.strip_prefix("unix:"))
        {
            return Self::parse_unix(address, path);
        }

        let rest = address
            .strip_prefix("dns:///")
            .or_else(|| address.strip_prefix("http://"))
            .unwrap_or(address);

        if rest.contains("://") {
            return Err(Error::Config(format!(
                "unsupported address scheme in '{}': expected host:port, dns:///, http:// or unix:",
                address
            )));
        }

        Self::parse_tcp(address, rest.trim_end_matches('/'))
    }

    fn parse_unix(address: &str, path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::Config(format!(
                "unix address '{}' has no socket path",
                address
            )));
        }
        Ok(Target::Unix(PathBuf::from(path)))
    }

    fn parse_tcp(address: &str, host_port: &str) -> Result<Self> {
        let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
            // [::1]:port
            let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
                Error::Config(format!("unterminated IPv6 literal in '{}'", address))
            })?;
            let port = rest.strip_prefix(':').ok_or_else(|| {
                Error::Config(format!("missing port in address '{}'", address))
            })?;
            (host, port)
        } else {
            let (host, port) = host_port.rsplit_once(':').ok_or_else(|| {
                Error::Config(format!("missing port in address '{}'", address))
            })?;
            if host.contains(':') {
                return Err(Error::Config(format!(
                    "IPv6 address '{}' must be written as [host]:port",
                    address
                )));
            }
            (host, port)
        };

        let port = port
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("invalid port in address '{}'", address)))?;
        if port == 0 {
            return Err(Error::Config(format!(
                "port 0 cannot be dialed in address '{}'",
                address
            )));
        }

        let host = if host.is_empty() { "localhost" } else { host };

        Ok(Target::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// Whether this is a Unix socket target
    pub fn is_unix(&self) -> bool {
        matches!(self, Target::Unix(_))
    }

    /// Unix socket path, if any
    pub fn unix_path(&self) -> Option<&Path> {
        match self {
            Target::Unix(path) => Some(path),
            Target::Tcp { .. } => None,
        }
    }

    /// Whether traffic to this target stays on the local machine
    ///
    /// Host names other than `localhost` are not resolved and count as remote.
    pub fn is_loopback(&self) -> bool {
        match self {
            Target::Unix(_) => true,
            Target::Tcp { host, .. } => {
                host.eq_ignore_ascii_case("localhost")
                    || host
                        .parse::<IpAddr>()
                        .map(|ip| ip.is_loopback())
                        .unwrap_or(false)
            }
        }
    }

    /// URI handed to the HTTP/2 endpoint
    ///
    /// Unix targets get a placeholder authority; the connector ignores it.
    pub fn endpoint_uri(&self, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        match self {
            Target::Tcp { host, port } if host.contains(':') => {
                format!("{}://[{}]:{}", scheme, host, port)
            }
            Target::Tcp { host, port } => format!("{}://{}:{}", scheme, host, port),
            Target::Unix(_) => format!("{}://localhost", scheme),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Target::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Target::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}
