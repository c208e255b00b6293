//! Dial options and their resolution into settings
//!
//! Options form an ordered list. Resolution folds the list left to right, so
//! when two entries configure the same concern the later one wins.

use super::address::Target;
use super::backoff::BackoffConfig;
use super::tls::TlsConfig;
use crate::{Error, Result};
use std::time::Duration;
use tonic::transport::Endpoint;

/// A single directive affecting how a connection is dialed
#[derive(Debug, Clone, PartialEq)]
pub enum DialOption {
    /// Wait until the HTTP/2 connection is usable before returning
    Block,
    /// Return immediately and connect on the first call
    Lazy,
    /// Plaintext transport
    Insecure,
    /// TLS transport (TCP targets only)
    Tls(TlsConfig),
    /// Bound on opening the socket, per attempt
    ConnectTimeout(Duration),
    /// Deadline applied to every call made over the channel
    RequestTimeout(Duration),
    /// Set `TCP_NODELAY` on TCP sockets
    TcpNodelay(bool),
    /// Interval between HTTP/2 keepalive pings
    Http2KeepaliveInterval(Duration),
    /// How long to wait for a keepalive ping acknowledgement
    KeepaliveTimeout(Duration),
    /// Send keepalive pings while no call is in flight
    KeepaliveWhileIdle(bool),
    /// Maximum number of in-flight calls on the channel
    ConcurrencyLimit(usize),
    /// `user-agent` header sent with every call
    UserAgent(String),
    /// Retry refused or unreachable dials with exponential backoff
    Backoff(BackoffConfig),
    /// Fail on the first transport error
    NoRetry,
}

/// Whether a dial waits for the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectMode {
    /// Wait for the HTTP/2 connection
    Block,
    /// Connect on first use
    #[default]
    Lazy,
}

/// Transport security
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Security {
    /// Plaintext
    #[default]
    Insecure,
    /// TLS with the given configuration
    Tls(TlsConfig),
}

impl Security {
    /// Whether TLS is in use
    pub fn is_tls(&self) -> bool {
        matches!(self, Security::Tls(_))
    }
}

/// Typed view of an option list after last-wins resolution
#[derive(Debug, Clone, PartialEq)]
pub struct DialSettings {
    /// Connect mode
    pub connect_mode: ConnectMode,
    /// Transport security
    pub security: Security,
    /// Socket open timeout per attempt
    pub connect_timeout: Option<Duration>,
    /// Per-call deadline
    pub request_timeout: Option<Duration>,
    /// `TCP_NODELAY`
    pub tcp_nodelay: bool,
    /// HTTP/2 keepalive ping interval
    pub http2_keepalive_interval: Option<Duration>,
    /// HTTP/2 keepalive acknowledgement timeout
    pub keepalive_timeout: Option<Duration>,
    /// Ping while idle
    pub keepalive_while_idle: bool,
    /// In-flight call limit
    pub concurrency_limit: Option<usize>,
    /// User agent
    pub user_agent: Option<String>,
    /// Dial retry policy (None = no retry)
    pub backoff: Option<BackoffConfig>,
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            connect_mode: ConnectMode::default(),
            security: Security::default(),
            connect_timeout: None,
            request_timeout: None,
            tcp_nodelay: true,
            http2_keepalive_interval: None,
            keepalive_timeout: None,
            keepalive_while_idle: false,
            concurrency_limit: None,
            user_agent: None,
            backoff: None,
        }
    }
}

impl DialSettings {
    /// Resolve an ordered option list; later entries override earlier ones
    pub fn resolve(options: &[DialOption]) -> Self {
        options.iter().fold(Self::default(), |mut settings, option| {
            settings.apply(option);
            settings
        })
    }

    fn apply(&mut self, option: &DialOption) {
        match option {
            DialOption::Block => self.connect_mode = ConnectMode::Block,
            DialOption::Lazy => self.connect_mode = ConnectMode::Lazy,
            DialOption::Insecure => self.security = Security::Insecure,
            DialOption::Tls(tls) => self.security = Security::Tls(tls.clone()),
            DialOption::ConnectTimeout(timeout) => self.connect_timeout = Some(*timeout),
            DialOption::RequestTimeout(timeout) => self.request_timeout = Some(*timeout),
            DialOption::TcpNodelay(enabled) => self.tcp_nodelay = *enabled,
            DialOption::Http2KeepaliveInterval(interval) => {
                self.http2_keepalive_interval = Some(*interval)
            }
            DialOption::KeepaliveTimeout(timeout) => self.keepalive_timeout = Some(*timeout),
            DialOption::KeepaliveWhileIdle(enabled) => self.keepalive_while_idle = *enabled,
            DialOption::ConcurrencyLimit(limit) => self.concurrency_limit = Some(*limit),
            DialOption::UserAgent(agent) => self.user_agent = Some(agent.clone()),
            DialOption::Backoff(config) => self.backoff = Some(config.clone()),
            DialOption::NoRetry => self.backoff = None,
        }
    }

    /// Build the HTTP/2 endpoint for `target`
    pub fn endpoint(&self, target: &Target) -> Result<Endpoint> {
        if self.security.is_tls() && target.is_unix() {
            return Err(Error::Config(
                "TLS is only supported for TCP connections".into(),
            ));
        }

        let uri = target.endpoint_uri(self.security.is_tls());
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::Config(format!("invalid endpoint for {}: {}", target, e)))?;

        if let Security::Tls(tls) = &self.security {
            endpoint = endpoint
                .tls_config(tls.client_tls_config())
                .map_err(|e| Error::Config(format!("invalid TLS configuration: {}", e)))?;
        }
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(interval) = self.http2_keepalive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.keepalive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        endpoint = endpoint.keep_alive_while_idle(self.keepalive_while_idle);

        if let Some(limit) = self.concurrency_limit {
            if limit == 0 {
                return Err(Error::Config("concurrency limit must be at least 1".into()));
            }
            endpoint = endpoint.concurrency_limit(limit);
        }
        if let Some(agent) = &self.user_agent {
            endpoint = endpoint
                .user_agent(agent.clone())
                .map_err(|e| Error::Config(format!("invalid user agent '{}': {}", agent, e)))?;
        }

        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp() -> Target {
        Target::parse("127.0.0.1:7001").unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = DialSettings::resolve(&[]);
        assert_eq!(settings, DialSettings::default());
        assert_eq!(settings.connect_mode, ConnectMode::Lazy);
        assert_eq!(settings.security, Security::Insecure);
        assert!(settings.tcp_nodelay);
        assert!(settings.backoff.is_none());
    }

    #[test]
    fn test_last_entry_wins_per_concern() {
        let tls = TlsConfig::builder().build().unwrap();
        let settings = DialSettings::resolve(&[
            DialOption::Block,
            DialOption::Tls(tls.clone()),
            DialOption::ConnectTimeout(Duration::from_secs(1)),
            DialOption::Lazy,
            DialOption::ConnectTimeout(Duration::from_secs(3)),
        ]);
        assert_eq!(settings.connect_mode, ConnectMode::Lazy);
        assert_eq!(settings.security, Security::Tls(tls));
        assert_eq!(settings.connect_timeout, Some(Duration::from_secs(3)));

        let settings = DialSettings::resolve(&[
            DialOption::Tls(TlsConfig::builder().build().unwrap()),
            DialOption::Insecure,
        ]);
        assert_eq!(settings.security, Security::Insecure);
    }

    #[test]
    fn test_unrelated_concerns_do_not_interfere() {
        let settings = DialSettings::resolve(&[
            DialOption::UserAgent("host/1.0".into()),
            DialOption::TcpNodelay(false),
            DialOption::Block,
            DialOption::RequestTimeout(Duration::from_millis(250)),
        ]);
        assert_eq!(settings.user_agent.as_deref(), Some("host/1.0"));
        assert!(!settings.tcp_nodelay);
        assert_eq!(settings.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.connect_mode, ConnectMode::Block);
    }

    #[test]
    fn test_no_retry_clears_backoff() {
        let settings = DialSettings::resolve(&[
            DialOption::Backoff(BackoffConfig::default()),
            DialOption::NoRetry,
        ]);
        assert!(settings.backoff.is_none());

        let settings = DialSettings::resolve(&[
            DialOption::NoRetry,
            DialOption::Backoff(BackoffConfig::default()),
        ]);
        assert_eq!(settings.backoff, Some(BackoffConfig::default()));
    }

    #[test]
    fn test_endpoint_builds_for_tcp() {
        let settings = DialSettings::resolve(&[
            DialOption::RequestTimeout(Duration::from_secs(2)),
            DialOption::Http2KeepaliveInterval(Duration::from_secs(30)),
            DialOption::ConcurrencyLimit(8),
            DialOption::UserAgent("host/1.0".into()),
        ]);
        let endpoint = settings.endpoint(&tcp()).expect("endpoint");
        assert_eq!(endpoint.uri().scheme_str(), Some("http"));
        assert_eq!(endpoint.uri().host(), Some("127.0.0.1"));
        assert_eq!(endpoint.uri().port_u16(), Some(7001));
    }

    #[test]
    fn test_endpoint_rejects_zero_concurrency() {
        let settings = DialSettings::resolve(&[DialOption::ConcurrencyLimit(0)]);
        assert!(matches!(settings.endpoint(&tcp()), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_rejects_invalid_user_agent() {
        let settings = DialSettings::resolve(&[DialOption::UserAgent("bad\nagent".into())]);
        assert!(matches!(settings.endpoint(&tcp()), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_rejects_tls_over_unix() {
        let settings = DialSettings::resolve(&[DialOption::Tls(TlsConfig::builder().build().unwrap())]);
        let unix = Target::parse("unix:///tmp/plugin.sock").unwrap();
        assert!(matches!(settings.endpoint(&unix), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_uses_https_for_tls() {
        let settings = DialSettings::resolve(&[DialOption::Tls(TlsConfig::builder().build().unwrap())]);
        let endpoint = settings.endpoint(&tcp()).expect("endpoint");
        assert_eq!(endpoint.uri().scheme_str(), Some("https"));
    }
}
