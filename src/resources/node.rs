//! The `puppetdb_node` resource.
//!
//! Creating the resource does not create anything in PuppetDB: it waits
//! until the node has checked in and reported at least once, then records
//! what PuppetDB knows about it. Deleting it deactivates the node.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::puppetdb::{NodeRecord, PuppetDbClient, QueryOutcome};
use crate::retry::{RetryPolicy, RetryingLookup};
use crate::schema::{Attribute, Schema};
use crate::types::{AttributeChange, ImportedResource, PlanResult};

/// Resource type name.
pub const TYPE_NAME: &str = "puppetdb_node";

/// Current schema version.
pub const SCHEMA_VERSION: u64 = 1;

/// Attribute identifying the node.
pub const CERTNAME: &str = "certname";

/// Attribute present in version 0 state only.
const LEGACY_ID: &str = "id";

const COMPUTED_STRINGS: [(&str, &str); 11] = [
    ("deactivated", "When the node was deactivated"),
    ("expired", "When the node expired"),
    ("cached_catalog_status", "Cached catalog status of the last run"),
    ("catalog_environment", "Environment of the last catalog"),
    ("facts_environment", "Environment of the last facts"),
    ("report_environment", "Environment of the last report"),
    ("catalog_timestamp", "When the last catalog was stored"),
    ("facts_timestamp", "When the last facts were stored"),
    ("report_timestamp", "When the last report was stored"),
    (
        "latest_report_corrective_change",
        "Whether the last report made a corrective change",
    ),
    ("latest_report_hash", "Hash of the last report"),
];

const COMPUTED_BOOLS: [(&str, &str); 2] = [
    ("latest_report_noop", "Whether the last run was a noop run"),
    (
        "latest_report_noop_pending",
        "Whether the last noop run had pending changes",
    ),
];

const LATEST_REPORT_STATUS: (&str, &str) = (
    "latest_report_status",
    "Status of the last report (changed, unchanged or failed)",
);

/// Add every computed node attribute to `schema`.
pub(crate) fn with_node_attributes(schema: Schema) -> Schema {
    let schema = COMPUTED_STRINGS
        .iter()
        .chain(std::iter::once(&LATEST_REPORT_STATUS))
        .fold(schema, |s, (name, description)| {
            s.with_attribute(*name, Attribute::computed_string().with_description(*description))
        });
    COMPUTED_BOOLS.iter().fold(schema, |s, (name, description)| {
        s.with_attribute(*name, Attribute::computed_bool().with_description(*description))
    })
}

/// Schema of the resource.
pub fn schema() -> Schema {
    with_node_attributes(
        Schema::new(SCHEMA_VERSION)
            .with_description("A node registered in PuppetDB")
            .with_attribute(
                CERTNAME,
                Attribute::required_string()
                    .with_description("Certificate name of the node")
                    .with_force_new(),
            ),
    )
}

/// Extract the certificate name from a state or configuration.
pub(crate) fn certname_of(state: &Value) -> Result<&str, ProviderError> {
    match state.get(CERTNAME) {
        Some(Value::String(certname)) if !certname.is_empty() => Ok(certname.as_str()),
        Some(Value::String(_)) => Err(ProviderError::Validation(
            "'certname' must not be empty".to_string(),
        )),
        _ => Err(ProviderError::Validation(
            "'certname' is required".to_string(),
        )),
    }
}

/// Resource state for `node`, keyed to the requested `certname`.
pub(crate) fn state_from(certname: &str, node: &NodeRecord) -> Result<Value, ProviderError> {
    let mut state = serde_json::to_value(node)?;
    if let Value::Object(map) = &mut state {
        map.insert(CERTNAME.to_string(), Value::String(certname.to_string()));
    }
    Ok(state)
}

/// State with only `certname` known; computed attributes are null until
/// the apply fills them in.
fn unknown_state(certname: &str) -> Value {
    let mut map = Map::new();
    map.insert(CERTNAME.to_string(), Value::String(certname.to_string()));
    for (name, _) in COMPUTED_STRINGS
        .iter()
        .chain(std::iter::once(&LATEST_REPORT_STATUS))
        .chain(COMPUTED_BOOLS.iter())
    {
        map.insert(name.to_string(), Value::Null);
    }
    Value::Object(map)
}

/// Plan a change. A null `proposed` state plans a destroy.
pub fn plan(prior: Option<Value>, proposed: Value) -> Result<PlanResult, ProviderError> {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        let Some(prior) = prior else {
            return Ok(PlanResult::no_change(Value::Null));
        };
        let certname = certname_of(&prior)?;
        return Ok(PlanResult::with_changes(
            Value::Null,
            vec![AttributeChange::removed(CERTNAME, Value::from(certname))],
            false,
        ));
    }

    let certname = certname_of(&proposed)?;
    let Some(prior) = prior else {
        return Ok(PlanResult::with_changes(
            unknown_state(certname),
            vec![AttributeChange::added(CERTNAME, Value::from(certname))],
            false,
        ));
    };

    let prior_certname = certname_of(&prior)?;
    if prior_certname != certname {
        return Ok(PlanResult::with_changes(
            unknown_state(certname),
            vec![AttributeChange::modified(
                CERTNAME,
                Value::from(prior_certname),
                Value::from(certname),
            )],
            true,
        ));
    }

    Ok(PlanResult::no_change(prior))
}

/// Wait for the planned node to appear in PuppetDB and record it.
pub async fn create(
    client: &PuppetDbClient,
    policy: &RetryPolicy,
    cancel: CancellationToken,
    planned: Value,
) -> Result<Value, ProviderError> {
    let certname = certname_of(&planned)?;
    info!(certname = %certname, "Waiting for node to appear in PuppetDB");
    wait_for_node(client, policy, cancel, certname).await
}

/// Refresh the state of the node.
///
/// Returns `Value::Null` when PuppetDB no longer knows the node.
pub async fn read(client: &PuppetDbClient, current: Value) -> Result<Value, ProviderError> {
    let certname = certname_of(&current)?;
    match client.get_node(certname).await {
        QueryOutcome::Success(node) => state_from(certname, &node),
        QueryOutcome::NotFound => {
            info!(certname = %certname, "Node is gone from PuppetDB, removing from state");
            Ok(Value::Null)
        }
        QueryOutcome::Failure(err) => Err(err.into()),
    }
}

/// Same as [`create`], keyed to the planned certname.
pub async fn update(
    client: &PuppetDbClient,
    policy: &RetryPolicy,
    cancel: CancellationToken,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let certname = certname_of(&planned)?;
    debug!(
        certname = %certname,
        prior = ?prior.get(CERTNAME),
        "Refreshing node"
    );
    wait_for_node(client, policy, cancel, certname).await
}

/// Deactivate the node. A node PuppetDB does not know counts as deleted.
pub async fn delete(client: &PuppetDbClient, current: Value) -> Result<(), ProviderError> {
    let certname = certname_of(&current)?;
    match client.deactivate_node(certname).await {
        QueryOutcome::Success(_) => {
            info!(certname = %certname, "Node deactivated");
            Ok(())
        }
        QueryOutcome::NotFound => {
            debug!(certname = %certname, "Node already absent from PuppetDB");
            Ok(())
        }
        QueryOutcome::Failure(err) => Err(err.into()),
    }
}

/// Import a node by certificate name. Only `certname` is set; the host
/// reads the rest.
pub fn import(id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
    if id.is_empty() {
        return Err(ProviderError::Validation(
            "import ID must be a certificate name".to_string(),
        ));
    }
    let mut state = Map::new();
    state.insert(CERTNAME.to_string(), Value::String(id.to_string()));
    Ok(vec![ImportedResource::new(TYPE_NAME, Value::Object(state))])
}

/// Upgrade state written by an older schema version.
pub fn upgrade_state(version: i64, state: Value) -> Result<Value, ProviderError> {
    match version {
        0 => {
            let Value::Object(mut map) = state else {
                return Err(ProviderError::Validation(
                    "version 0 state must be an object".to_string(),
                ));
            };
            map.remove(LEGACY_ID);
            Ok(Value::Object(map))
        }
        v if v == SCHEMA_VERSION as i64 => Ok(state),
        v => Err(ProviderError::Validation(format!(
            "cannot upgrade {TYPE_NAME} state from schema version {v}"
        ))),
    }
}

async fn wait_for_node(
    client: &PuppetDbClient,
    policy: &RetryPolicy,
    cancel: CancellationToken,
    certname: &str,
) -> Result<Value, ProviderError> {
    let outcome = RetryingLookup::new(client, policy.clone())
        .with_cancellation(cancel)
        .retry_lookup(certname, policy.deadline_from_now())
        .await;

    match outcome {
        QueryOutcome::Success(node) => state_from(certname, &node),
        // The retrying lookup turns a persistent 404 into DeadlineExceeded.
        QueryOutcome::NotFound => Err(ProviderError::NotFound(format!("node '{certname}'"))),
        QueryOutcome::Failure(err) => {
            warn!(certname = %certname, error = %err, "Failed waiting for node");
            Err(err.into())
        }
    }
}
