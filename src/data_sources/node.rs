//! The `puppetdb_node` data source: one lookup, no waiting.

use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::puppetdb::{PuppetDbClient, QueryOutcome};
use crate::resources::node::{certname_of, state_from, with_node_attributes, CERTNAME};
use crate::schema::{Attribute, Schema};

/// Data source type name.
pub const TYPE_NAME: &str = "puppetdb_node";

/// Schema of the data source.
pub fn schema() -> Schema {
    with_node_attributes(
        Schema::new(0)
            .with_description("Look up a node in PuppetDB")
            .with_attribute(
                CERTNAME,
                Attribute::required_string().with_description("Certificate name of the node"),
            ),
    )
}

/// Look the node up. An unknown node is an error.
pub async fn read(client: &PuppetDbClient, config: Value) -> Result<Value, ProviderError> {
    let certname = certname_of(&config)?;
    match client.get_node(certname).await {
        QueryOutcome::Success(node) => state_from(certname, &node),
        QueryOutcome::NotFound => {
            debug!(certname = %certname, "Node not found");
            Err(ProviderError::NotFound(format!("node '{certname}'")))
        }
        QueryOutcome::Failure(err) => Err(err.into()),
    }
}
