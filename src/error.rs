//! Error types for the PuppetDB provider.
//!
//! [`PuppetDbError`] is what the PuppetDB client and the retrying lookup
//! report. [`ProviderError`] is what lifecycle operations hand back to the
//! plugin host.

use thiserror::Error;

/// Failures talking to PuppetDB.
#[derive(Debug, Error)]
pub enum PuppetDbError {
    /// Connection settings are unusable (mixed cert/key sourcing, unreadable
    /// or unparsable certificate material).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// PuppetDB answered, but with an embedded error or a body we could not
    /// make sense of.
    #[error("PuppetDB error: {0}")]
    Application(String),

    /// PuppetDB could not be reached (connection refused, TLS handshake,
    /// timeout, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node never became visible before the deadline.
    #[error("timed out waiting for node '{certname}' to appear in PuppetDB after {attempts} attempt(s)")]
    DeadlineExceeded {
        /// Certificate name that was waited for.
        certname: String,
        /// Number of lookups performed.
        attempts: u32,
    },

    /// The wait for the node was cancelled by the caller.
    #[error("lookup of node '{certname}' was cancelled")]
    Cancelled {
        /// Certificate name that was waited for.
        certname: String,
    },
}

/// Coarse classification of a [`PuppetDbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuppetDbErrorKind {
    /// See [`PuppetDbError::Configuration`].
    Configuration,
    /// See [`PuppetDbError::Application`].
    Application,
    /// See [`PuppetDbError::Transport`].
    Transport,
    /// See [`PuppetDbError::DeadlineExceeded`].
    DeadlineExceeded,
    /// See [`PuppetDbError::Cancelled`].
    Cancelled,
}

impl PuppetDbError {
    /// The kind of this error.
    pub fn kind(&self) -> PuppetDbErrorKind {
        match self {
            Self::Configuration(_) => PuppetDbErrorKind::Configuration,
            Self::Application(_) => PuppetDbErrorKind::Application,
            Self::Transport(_) => PuppetDbErrorKind::Transport,
            Self::DeadlineExceeded { .. } => PuppetDbErrorKind::DeadlineExceeded,
            Self::Cancelled { .. } => PuppetDbErrorKind::Cancelled,
        }
    }
}

/// Errors returned from provider lifecycle operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Input did not satisfy the schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider is misconfigured or not configured yet.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource or data source type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A PuppetDB request failed.
    #[error(transparent)]
    PuppetDb(#[from] PuppetDbError),

    /// An unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Returns the bare message for string-carrying variants.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::PuppetDb(err) => err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("node agent01".to_string());
        assert_eq!(format!("{}", err), "Resource not found: node agent01");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("puppetdb_fact".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: puppetdb_fact");
    }

    #[test]
    fn test_puppetdb_error_is_transparent() {
        let err: ProviderError = PuppetDbError::Application("boom".to_string()).into();
        assert_eq!(format!("{}", err), "PuppetDB error: boom");
        assert_eq!(err.message(), "PuppetDB error: boom");
    }

    #[test]
    fn test_deadline_exceeded_names_node() {
        let err = PuppetDbError::DeadlineExceeded {
            certname: "agent01.example.com".to_string(),
            attempts: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("agent01.example.com"));
        assert!(msg.contains("4 attempt(s)"));
        assert_eq!(err.kind(), PuppetDbErrorKind::DeadlineExceeded);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PuppetDbError::Configuration(String::new()).kind(),
            PuppetDbErrorKind::Configuration
        );
        assert_eq!(
            PuppetDbError::Cancelled {
                certname: "a".to_string()
            }
            .kind(),
            PuppetDbErrorKind::Cancelled
        );
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("provider is not configured".to_string());
        assert_eq!(err.message(), "provider is not configured");

        let err = ProviderError::Internal("oops".to_string());
        assert_eq!(err.message(), "oops");
    }
}
