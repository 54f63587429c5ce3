//! PuppetDB Provider
//!
//! A provider that ties infrastructure-as-code resources to nodes known by
//! [PuppetDB](https://www.puppet.com/docs/puppetdb/latest/).
//!
//! # Overview
//!
//! - **`puppetdb_node` resource**: waits for a freshly provisioned node to
//!   check in and report, records what PuppetDB knows about it, and
//!   deactivates it on destroy
//! - **`puppetdb_node` data source**: a single node lookup
//! - **PuppetDB client**: HTTP/JSON over optional mutual TLS, see [`puppetdb`]
//! - **Retrying lookup**: exponential backoff with jitter, a deadline and
//!   cancellation, see [`retry`]
//!
//! # Quick Start
//!
//! ```ignore
//! use puppetdb_provider::{init_logging, ProviderService, PuppetDbProvider};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = PuppetDbProvider::new();
//!     provider
//!         .configure(json!({
//!             "url": "https://puppetdb.example.com:8081",
//!             "ca": "/etc/puppetlabs/puppet/ssl/certs/ca.pem",
//!             "cert": "/etc/puppetlabs/puppet/ssl/certs/terraform.pem",
//!             "key": "/etc/puppetlabs/puppet/ssl/private_keys/terraform.pem"
//!         }))
//!         .await?;
//!
//!     let state = provider
//!         .create("puppetdb_node", json!({"certname": "agent01.example.com"}))
//!         .await?;
//!     tracing::info!(status = %state["latest_report_status"], "Node registered");
//!     Ok(())
//! }
//! ```
//!
//! # Provider Protocol
//!
//! [`ProviderService`] is the contract with the plugin host:
//!
//! - **schema / metadata**: provider config, resource and data source schemas
//! - **validate_provider_config / configure / stop**
//! - **validate_resource_config / upgrade_resource_state / plan**
//! - **create / read / update / delete / import_resource**
//! - **validate_data_source_config / read_data_source**

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data_sources;
pub mod error;
pub mod logging;
pub mod provider;
pub mod puppetdb;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod service;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use config::{ConnectionConfig, CredentialSource, ProviderConfig};
pub use error::{ProviderError, PuppetDbError, PuppetDbErrorKind};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::PuppetDbProvider;
pub use puppetdb::{NodeLookup, NodeRecord, PuppetDbClient, QueryOutcome};
pub use retry::{RetryObserver, RetryPolicy, RetryingLookup};
pub use schema::ProviderSchema;
pub use service::ProviderService;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
pub use tracing;
