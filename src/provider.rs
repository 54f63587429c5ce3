//! The PuppetDB provider.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ProviderConfig;
use crate::data_sources;
use crate::error::ProviderError;
use crate::puppetdb::PuppetDbClient;
use crate::resources;
use crate::retry::RetryPolicy;
use crate::schema::{Attribute, Diagnostic, ProviderSchema, Schema};
use crate::service::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation::validate;

/// Name of the node resource.
pub const RESOURCE_NODE: &str = resources::node::TYPE_NAME;
/// Name of the node data source.
pub const DATA_SOURCE_NODE: &str = data_sources::node::TYPE_NAME;

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Provider for nodes registered in PuppetDB.
///
/// The client is built on the first [`configure`](ProviderService::configure)
/// and never replaced afterwards.
pub struct PuppetDbProvider {
    client: OnceLock<PuppetDbClient>,
    retry_policy: RetryPolicy,
    shutdown: CancellationToken,
    env: EnvLookup,
}

impl fmt::Debug for PuppetDbProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PuppetDbProvider")
            .field("client", &self.client.get())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Default for PuppetDbProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PuppetDbProvider {
    /// Create an unconfigured provider reading the process environment.
    pub fn new() -> Self {
        Self {
            client: OnceLock::new(),
            retry_policy: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
            env: Arc::new(|name| std::env::var(name).ok()),
        }
    }

    /// Use `policy` when waiting for nodes.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Resolve unset attributes through `env` instead of the process
    /// environment.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Start out configured with `client`.
    ///
    /// The first client wins: once a client is set, later calls and
    /// [`configure`](ProviderService::configure) leave it in place.
    pub fn with_client(self, client: PuppetDbClient) -> Self {
        if let Err(rejected) = self.client.set(client) {
            debug!(
                url = %rejected.config().base_url,
                "Provider already has a client, ignoring the new one"
            );
        }
        self
    }

    /// The retry policy in use.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// The configured client.
    pub fn client(&self) -> Result<&PuppetDbClient, ProviderError> {
        self.client.get().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    fn resolve(&self, config: Value) -> Result<crate::config::ConnectionConfig, ProviderError> {
        Ok(ProviderConfig::from_value(config)?.resolve_with(|name: &str| (self.env)(name)))
    }

    fn provider_schema() -> Schema {
        Schema::new(0)
            .with_description("PuppetDB connection settings")
            .with_attribute(
                "url",
                Attribute::optional_string()
                    .with_description("PuppetDB base URL (PUPPETDB_URL, default https://puppet:8140)"),
            )
            .with_attribute(
                "ca",
                Attribute::optional_string()
                    .with_description("CA certificate, as a path or PEM content (PUPPETDB_CA)"),
            )
            .with_attribute(
                "cert",
                Attribute::optional_string()
                    .with_description("Client certificate, as a path or PEM content (PUPPETDB_CERT)"),
            )
            .with_attribute(
                "key",
                Attribute::optional_string()
                    .with_description("Client private key, as a path or PEM content (PUPPETDB_KEY)")
                    .sensitive(),
            )
    }
}

fn unknown_resource(resource_type: &str) -> ProviderError {
    ProviderError::UnknownResource(resource_type.to_string())
}

#[async_trait::async_trait]
impl ProviderService for PuppetDbProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(Self::provider_schema())
            .with_resource(RESOURCE_NODE, resources::node::schema())
            .with_data_source(DATA_SOURCE_NODE, data_sources::node::schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&Self::provider_schema(), &config);
        if !diagnostics.is_empty() {
            return Ok(diagnostics);
        }

        let resolved = self.resolve(config)?;
        if let Err(err) = resolved.client_credential_sources() {
            diagnostics.push(
                Diagnostic::error("Invalid client certificate configuration")
                    .with_detail(err.to_string())
                    .with_attribute("key"),
            );
        }
        if resolved.mutual_tls() && resolved.ca.is_empty() {
            diagnostics.push(
                Diagnostic::error("No CA certificate configured")
                    .with_detail("Mutual TLS requires a CA to verify the PuppetDB server certificate")
                    .with_attribute("ca"),
            );
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let resolved = self.resolve(config)?;
        let base_url = resolved.base_url.clone();
        let mutual_tls = resolved.mutual_tls();

        if self.client.set(PuppetDbClient::new(resolved)).is_err() {
            warn!("Provider already configured, keeping the first configuration");
            return Ok(vec![Diagnostic::warning("Provider already configured")
                .with_detail("The first configuration stays in effect")]);
        }

        info!(url = %base_url, mutual_tls, "Provider configured");
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        debug!("Stopping provider, cancelling pending node lookups");
        self.shutdown.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match resource_type {
            RESOURCE_NODE => Ok(validate(&resources::node::schema(), &config)),
            other => Err(unknown_resource(other)),
        }
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        match resource_type {
            RESOURCE_NODE => resources::node::upgrade_state(version, state),
            other => Err(unknown_resource(other)),
        }
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        match resource_type {
            RESOURCE_NODE => resources::node::plan(prior_state, proposed_state),
            other => Err(unknown_resource(other)),
        }
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        match resource_type {
            RESOURCE_NODE => {
                resources::node::create(
                    self.client()?,
                    &self.retry_policy,
                    self.shutdown.child_token(),
                    planned_state,
                )
                .await
            }
            other => Err(unknown_resource(other)),
        }
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        match resource_type {
            RESOURCE_NODE => resources::node::read(self.client()?, current_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        match resource_type {
            RESOURCE_NODE => {
                resources::node::update(
                    self.client()?,
                    &self.retry_policy,
                    self.shutdown.child_token(),
                    prior_state,
                    planned_state,
                )
                .await
            }
            other => Err(unknown_resource(other)),
        }
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        match resource_type {
            RESOURCE_NODE => resources::node::delete(self.client()?, current_state).await,
            other => Err(unknown_resource(other)),
        }
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        match resource_type {
            RESOURCE_NODE => resources::node::import(id),
            other => Err(unknown_resource(other)),
        }
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        match data_source_type {
            DATA_SOURCE_NODE => Ok(validate(&data_sources::node::schema(), &config)),
            other => Err(unknown_resource(other)),
        }
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        match data_source_type {
            DATA_SOURCE_NODE => data_sources::node::read(self.client()?, config).await,
            other => Err(unknown_resource(other)),
        }
    }
}
