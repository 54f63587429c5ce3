//! Minimal PuppetDB HTTP client.
//!
//! One call, one request: no retries and no connection reuse. Retrying is
//! the caller's business, see [`crate::retry`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument, trace};

use crate::config::ConnectionConfig;
use crate::error::PuppetDbError;
use crate::puppetdb::model::{CommandEnvelope, NodeRecord, NodeResponse, QueryOutcome};
use crate::puppetdb::tls::build_http_client;

/// Path segments of the command endpoint.
pub const COMMAND_PATH: &[&str] = &["cmd", "v1"];

/// Path segments of the node query for `certname`.
pub fn node_path(certname: &str) -> [&str; 4] {
    ["query", "v4", "nodes", certname]
}

/// Anything that can look a node up once.
///
/// [`PuppetDbClient`] is the real implementation; the retrying lookup is
/// generic over this so it can be driven by scripted lookups.
#[async_trait]
pub trait NodeLookup: Send + Sync {
    /// Look up `certname` once.
    async fn lookup_node(&self, certname: &str) -> QueryOutcome;
}

/// Client for the PuppetDB query and command APIs.
///
/// Cheap to clone; clones share the same read-only [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct PuppetDbClient {
    config: Arc<ConnectionConfig>,
}

impl PuppetDbClient {
    /// Create a client for the given settings.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Issue one request against `{base_url}/pdb/` followed by the `path`
    /// segments.
    ///
    /// A 404 is [`QueryOutcome::NotFound`] whatever the body says. Any other
    /// response must be a JSON object; an embedded non-empty `error` field is
    /// a failure even on 200.
    #[instrument(skip(self, command))]
    pub async fn query(
        &self,
        path: &[&str],
        method: Method,
        command: Option<&CommandEnvelope>,
    ) -> QueryOutcome {
        self.try_query(path, method, command).await.into()
    }

    /// Fetch a node.
    pub async fn get_node(&self, certname: &str) -> QueryOutcome {
        trace!(certname = %certname, "Requesting node");
        let outcome = self.query(&node_path(certname), Method::GET, None).await;
        trace!(certname = %certname, outcome = outcome.label(), "Requested node");
        outcome
    }

    /// Send the `deactivate node` command.
    pub async fn deactivate_node(&self, certname: &str) -> QueryOutcome {
        trace!(certname = %certname, "Requesting node deletion");
        let envelope = CommandEnvelope::deactivate_node(certname);
        let outcome = self
            .query(COMMAND_PATH, Method::POST, Some(&envelope))
            .await;
        trace!(certname = %certname, outcome = outcome.label(), "Requested node deletion");
        outcome
    }

    async fn try_query(
        &self,
        path: &[&str],
        method: Method,
        command: Option<&CommandEnvelope>,
    ) -> Result<Option<NodeRecord>, PuppetDbError> {
        let url = self.config.endpoint(path)?;
        let client = build_http_client(&self.config).await?;

        let mut request = client
            .request(method, url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(command) = command {
            let body = serde_json::to_vec(command).map_err(|e| {
                PuppetDbError::Application(format!("failed to encode command: {e}"))
            })?;
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "PuppetDB responded");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.bytes().await?;
        let parsed: NodeResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(PuppetDbError::Application(format!(
                    "malformed response from PuppetDB: {e}"
                )));
            }
            Err(_) => {
                return Err(PuppetDbError::Application(format!(
                    "PuppetDB returned HTTP {status}"
                )));
            }
        };

        if !parsed.error.is_empty() {
            return Err(PuppetDbError::Application(parsed.error));
        }
        if !status.is_success() {
            return Err(PuppetDbError::Application(format!(
                "PuppetDB returned HTTP {status}"
            )));
        }

        Ok(Some(parsed.node))
    }
}

#[async_trait]
impl NodeLookup for PuppetDbClient {
    async fn lookup_node(&self, certname: &str) -> QueryOutcome {
        self.get_node(certname).await
    }
}
