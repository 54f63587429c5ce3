//! Provider configuration.
//!
//! Settings are resolved once, at `configure` time, with this precedence:
//!
//! 1. an explicit (non-null) value in the provider configuration
//! 2. the matching environment variable
//! 3. the built-in default (only `url` has one)
//!
//! | Attribute | Environment variable | Default |
//! |-----------|----------------------|---------|
//! | `url`     | `PUPPETDB_URL`       | `https://puppet:8140` |
//! | `ca`      | `PUPPETDB_CA`        | |
//! | `cert`    | `PUPPETDB_CERT`      | |
//! | `key`     | `PUPPETDB_KEY`       | |
//!
//! `ca`, `cert` and `key` each hold either a file path or inline PEM
//! content, see [`CredentialSource`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ProviderError, PuppetDbError};

/// URL used when neither the configuration nor the environment sets one.
pub const DEFAULT_URL: &str = "https://puppet:8140";

/// Environment variable for the PuppetDB URL.
pub const ENV_URL: &str = "PUPPETDB_URL";
/// Environment variable for the CA certificate source.
pub const ENV_CA: &str = "PUPPETDB_CA";
/// Environment variable for the client certificate source.
pub const ENV_CERT: &str = "PUPPETDB_CERT";
/// Environment variable for the client private key source.
pub const ENV_KEY: &str = "PUPPETDB_KEY";

/// Default bound on a single in-flight HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a piece of certificate material comes from.
///
/// A value starting with `/` is a file path; anything else is inline PEM.
/// Relative paths are therefore read as inline content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Absolute path to a PEM file.
    File(PathBuf),
    /// PEM content given directly.
    Inline(String),
}

impl CredentialSource {
    /// Classify a configured value.
    pub fn classify(value: &str) -> Self {
        if value.starts_with('/') {
            Self::File(PathBuf::from(value))
        } else {
            Self::Inline(value.to_string())
        }
    }

    /// Whether this source is a file path.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// Provider configuration as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// PuppetDB base URL.
    #[serde(default)]
    pub url: Option<String>,
    /// CA certificate (path or PEM).
    #[serde(default)]
    pub ca: Option<String>,
    /// Client certificate (path or PEM).
    #[serde(default)]
    pub cert: Option<String>,
    /// Client private key (path or PEM).
    #[serde(default)]
    pub key: Option<String>,
}

impl ProviderConfig {
    /// Parse the provider configuration value. `null` means nothing is set.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> ConnectionConfig {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve against a custom environment lookup.
    pub fn resolve_with<F>(self, env: F) -> ConnectionConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: Option<String>, var: &str| {
            explicit.or_else(|| env(var)).unwrap_or_default()
        };

        let mut base_url = pick(self.url, ENV_URL);
        if base_url.is_empty() {
            base_url = DEFAULT_URL.to_string();
        }

        ConnectionConfig {
            base_url,
            ca: pick(self.ca, ENV_CA),
            cert: pick(self.cert, ENV_CERT),
            key: pick(self.key, ENV_KEY),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Resolved, read-only connection settings.
///
/// Built once when the provider is configured and shared by every operation.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// PuppetDB base URL, e.g. `https://puppet:8140`.
    pub base_url: String,
    /// CA certificate source. Only consulted when `cert` is set.
    pub ca: String,
    /// Client certificate source. Empty disables mutual TLS.
    pub cert: String,
    /// Client private key source.
    pub key: String,
    /// Bound on a single in-flight request.
    pub timeout: Duration,
}

impl ConnectionConfig {
    /// Plain HTTPS settings for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ca: String::new(),
            cert: String::new(),
            key: String::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the CA certificate source.
    pub fn with_ca(mut self, ca: impl Into<String>) -> Self {
        self.ca = ca.into();
        self
    }

    /// Set the client certificate and key sources.
    pub fn with_client_cert(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.cert = cert.into();
        self.key = key.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a client certificate is configured.
    pub fn mutual_tls(&self) -> bool {
        !self.cert.is_empty()
    }

    /// Full URL for `segments` under `/pdb/`.
    ///
    /// Each segment is percent-encoded, so a `/`, `?` or `#` inside one
    /// stays part of that segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, PuppetDbError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            PuppetDbError::Configuration(format!("invalid PuppetDB URL {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                PuppetDbError::Configuration(format!(
                    "PuppetDB URL {} cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("pdb")
            .extend(segments);
        Ok(url)
    }

    /// Check that the certificate and key are sourced the same way.
    ///
    /// Returns the two classified sources when mutual TLS is enabled.
    pub fn client_credential_sources(
        &self,
    ) -> Result<Option<(CredentialSource, CredentialSource)>, PuppetDbError> {
        if !self.mutual_tls() {
            return Ok(None);
        }

        let cert = CredentialSource::classify(&self.cert);
        let key = CredentialSource::classify(&self.key);
        match (cert.is_file(), key.is_file()) {
            (true, false) => Err(PuppetDbError::Configuration(
                "cert points to a file but key is a string".to_string(),
            )),
            (false, true) => Err(PuppetDbError::Configuration(
                "cert is a string but key points to a file".to_string(),
            )),
            _ => Ok(Some((cert, key))),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("base_url", &self.base_url)
            .field("ca", &self.ca)
            .field("cert", &self.cert)
            .field("key", &if self.key.is_empty() { "" } else { "<redacted>" })
            .field("timeout", &self.timeout)
            .finish()
    }
}
