//! TLS configuration for dialing plugins that are not on the local machine.
//!
//! Plugins reached over loopback are always dialed without transport security.
//! A `TlsConfig` only takes effect through [`crate::connection::dial`] when the
//! caller's options resolve to [`crate::DialOption::Tls`].

use crate::{Error, Result};
use rustls_pemfile::Item;
use std::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

/// TLS configuration for secure plugin connections.
///
/// Without a custom CA the bundled webpki root certificates are used.
///
/// # Examples
///
/// ```ignore
/// use plugin_channel::connection::TlsConfig;
///
/// // With the bundled webpki root certificates
/// let tls = TlsConfig::builder().build()?;
///
/// // With custom CA certificate and SNI override
/// let tls = TlsConfig::builder()
///     .ca_cert_path("/path/to/ca.pem")
///     .domain_name("plugin.internal")
///     .build()?;
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM-encoded CA bundle (None = bundled webpki roots)
    ca_cert_pem: Option<Vec<u8>>,
    /// Name to verify the server certificate against
    domain_name: Option<String>,
    /// PEM-encoded client certificate and private key (mTLS)
    identity: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsConfig {
    /// Create a new TLS configuration builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Server name override used for SNI and certificate verification.
    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// Check if a custom CA bundle is configured.
    pub fn has_custom_ca(&self) -> bool {
        self.ca_cert_pem.is_some()
    }

    /// Check if a client identity is configured.
    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Build the tonic TLS settings for this configuration.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        let mut config = ClientTlsConfig::new();
        if let Some(domain) = &self.domain_name {
            config = config.domain_name(domain.clone());
        }
        if let Some(pem) = &self.ca_cert_pem {
            config = config.ca_certificate(Certificate::from_pem(pem));
        }
        if let Some((cert, key)) = &self.identity {
            config = config.identity(Identity::from_pem(cert, key));
        }
        config
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("custom_ca", &self.ca_cert_pem.is_some())
            .field("domain_name", &self.domain_name)
            .field("identity", &self.identity.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builder for TLS configuration.
#[derive(Default)]
pub struct TlsConfigBuilder {
    ca_cert_path: Option<String>,
    ca_cert_pem: Option<Vec<u8>>,
    domain_name: Option<String>,
    identity: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsConfigBuilder {
    /// Set the path to a custom CA certificate file (PEM format).
    ///
    /// The file is read by [`build`](Self::build).
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Set an in-memory CA bundle (PEM format).
    ///
    /// Takes precedence over [`ca_cert_path`](Self::ca_cert_path).
    pub fn ca_cert_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    /// Override the server name checked against the certificate.
    pub fn domain_name(mut self, name: impl Into<String>) -> Self {
        self.domain_name = Some(name.into());
        self
    }

    /// Present a client certificate (mutual TLS).
    pub fn identity_pem(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.identity = Some((cert.into(), key.into()));
        self
    }

    /// Build the TLS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - CA certificate file cannot be read
    /// - CA bundle holds no certificate
    /// - client identity lacks a certificate or a private key
    /// - domain name is not a valid host name
    pub fn build(self) -> Result<TlsConfig> {
        let ca_cert_pem = match (self.ca_cert_pem, &self.ca_cert_path) {
            (Some(pem), _) => Some(pem),
            (None, Some(path)) => Some(fs::read(path).map_err(|e| {
                Error::Config(format!(
                    "Failed to read CA certificate file '{}': {}",
                    path, e
                ))
            })?),
            (None, None) => None,
        };

        if let Some(pem) = &ca_cert_pem {
            let source = self.ca_cert_path.as_deref().unwrap_or("<memory>");
            if count_certificates(pem, source)? == 0 {
                return Err(Error::Config(format!(
                    "No valid certificates found in '{}'",
                    source
                )));
            }
        }

        if let Some((cert, key)) = &self.identity {
            if count_certificates(cert, "<client certificate>")? == 0 {
                return Err(Error::Config(
                    "client identity has no certificate".to_string(),
                ));
            }
            let mut reader = std::io::Cursor::new(key);
            match rustls_pemfile::private_key(&mut reader) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(Error::Config(
                        "client identity has no private key".to_string(),
                    ))
                }
                Err(e) => {
                    return Err(Error::Config(format!(
                        "Failed to parse client private key: {}",
                        e
                    )))
                }
            }
        }

        let domain_name = self
            .domain_name
            .as_deref()
            .map(parse_server_name)
            .transpose()?;

        Ok(TlsConfig {
            ca_cert_pem,
            domain_name,
            identity: self.identity,
        })
    }
}

/// Count X.509 certificates in a PEM buffer.
fn count_certificates(pem: &[u8], source: &str) -> Result<usize> {
    let mut reader = std::io::Cursor::new(pem);
    let mut found_certs = 0;

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(Item::X509Certificate(_))) => found_certs += 1,
            Ok(Some(_)) => {
                // Skip non-certificate items (private keys, etc.)
            }
            Ok(None) => break,
            Err(_) => {
                return Err(Error::Config(format!(
                    "Failed to parse certificate from '{}'",
                    source
                )));
            }
        }
    }

    Ok(found_certs)
}

/// Parse server name from hostname for TLS SNI (Server Name Indication).
///
/// # Errors
///
/// Returns an error if the hostname is invalid.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    // Remove trailing dot if present
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
    {
        return Err(Error::Config(format!(
            "Invalid hostname for TLS: '{}'",
            hostname
        )));
    }

    Ok(hostname.to_string())
}
