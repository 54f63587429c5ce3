//! PuppetDB wire types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::PuppetDbError;

/// Command name for node deactivation.
pub const DEACTIVATE_NODE_COMMAND: &str = "deactivate node";

/// Version of the deactivate-node command payload.
pub const DEACTIVATE_NODE_VERSION: u32 = 3;

/// A node as reported by `query/v4/nodes/<certname>`.
///
/// Null values from PuppetDB are read as empty strings (or `false`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Certificate name identifying the node.
    #[serde(default, deserialize_with = "lenient_string")]
    pub certname: String,
    /// Deactivation timestamp, empty while the node is active.
    #[serde(default, deserialize_with = "lenient_string")]
    pub deactivated: String,
    /// Expiry timestamp, empty unless the node expired.
    #[serde(default, deserialize_with = "lenient_string")]
    pub expired: String,
    /// Cached catalog status of the latest run.
    #[serde(default, deserialize_with = "lenient_string")]
    pub cached_catalog_status: String,
    /// Environment of the latest catalog.
    #[serde(default, deserialize_with = "lenient_string")]
    pub catalog_environment: String,
    /// Environment of the latest facts.
    #[serde(default, deserialize_with = "lenient_string")]
    pub facts_environment: String,
    /// Environment of the latest report.
    #[serde(default, deserialize_with = "lenient_string")]
    pub report_environment: String,
    /// When the latest catalog was stored.
    #[serde(default, deserialize_with = "lenient_string")]
    pub catalog_timestamp: String,
    /// When the latest facts were stored.
    #[serde(default, deserialize_with = "lenient_string")]
    pub facts_timestamp: String,
    /// When the latest report was stored.
    #[serde(default, deserialize_with = "lenient_string")]
    pub report_timestamp: String,
    /// Whether the latest report made a corrective change.
    #[serde(default, deserialize_with = "lenient_string")]
    pub latest_report_corrective_change: String,
    /// Hash of the latest report.
    #[serde(default, deserialize_with = "lenient_string")]
    pub latest_report_hash: String,
    /// Whether the latest run was a noop run.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub latest_report_noop: bool,
    /// Whether the latest noop run had pending changes.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub latest_report_noop_pending: bool,
    /// Status of the latest report (`changed`, `unchanged`, `failed`).
    #[serde(default, deserialize_with = "lenient_string")]
    pub latest_report_status: String,
}

/// Response body shape: a node plus the optional embedded `error`.
#[derive(Debug, Deserialize)]
pub(crate) struct NodeResponse {
    #[serde(flatten)]
    pub node: NodeRecord,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: String,
}

/// A command sent to `cmd/v1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    /// Command name, e.g. `deactivate node`.
    pub command: String,
    /// Command payload version.
    pub version: u32,
    /// Command payload.
    pub payload: Map<String, Value>,
}

impl CommandEnvelope {
    /// Build an arbitrary command.
    pub fn new(command: impl Into<String>, version: u32, payload: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            version,
            payload,
        }
    }

    /// The `deactivate node` command for `certname`.
    pub fn deactivate_node(certname: &str) -> Self {
        let mut payload = Map::new();
        payload.insert("certname".to_string(), Value::String(certname.to_string()));
        Self::new(DEACTIVATE_NODE_COMMAND, DEACTIVATE_NODE_VERSION, payload)
    }
}

/// Result of a single PuppetDB request.
///
/// `NotFound` is kept apart from `Failure`: its meaning depends on the
/// caller (retry during create, success during delete, state removal during
/// read).
#[derive(Debug)]
pub enum QueryOutcome {
    /// The request succeeded and the body parsed.
    Success(NodeRecord),
    /// PuppetDB answered 404.
    NotFound,
    /// Anything else.
    Failure(PuppetDbError),
}

impl QueryOutcome {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::NotFound => "not_found",
            Self::Failure(_) => "failure",
        }
    }

    /// Whether this is [`QueryOutcome::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Collapse into a `Result`, with `NotFound` as `Ok(None)`.
    pub fn into_result(self) -> Result<Option<NodeRecord>, PuppetDbError> {
        match self {
            Self::Success(node) => Ok(Some(node)),
            Self::NotFound => Ok(None),
            Self::Failure(err) => Err(err),
        }
    }
}

impl From<Result<Option<NodeRecord>, PuppetDbError>> for QueryOutcome {
    fn from(result: Result<Option<NodeRecord>, PuppetDbError>) -> Self {
        match result {
            Ok(Some(node)) => Self::Success(node),
            Ok(None) => Self::NotFound,
            Err(err) => Self::Failure(err),
        }
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_record_maps_every_field() {
        let body = json!({
            "certname": "agent01.example.com",
            "deactivated": "2024-01-02T03:04:05.000Z",
            "expired": "2024-01-03T03:04:05.000Z",
            "cached_catalog_status": "not_used",
            "catalog_environment": "production",
            "facts_environment": "staging",
            "report_environment": "testing",
            "catalog_timestamp": "2024-01-01T00:00:01.000Z",
            "facts_timestamp": "2024-01-01T00:00:02.000Z",
            "report_timestamp": "2024-01-01T00:00:03.000Z",
            "latest_report_corrective_change": "true",
            "latest_report_hash": "c0ffee",
            "latest_report_noop": true,
            "latest_report_noop_pending": false,
            "latest_report_status": "changed"
        });

        let resp: NodeResponse = serde_json::from_value(body).unwrap();
        assert!(resp.error.is_empty());
        let node = resp.node;
        assert_eq!(node.certname, "agent01.example.com");
        assert_eq!(node.deactivated, "2024-01-02T03:04:05.000Z");
        assert_eq!(node.expired, "2024-01-03T03:04:05.000Z");
        assert_eq!(node.cached_catalog_status, "not_used");
        assert_eq!(node.catalog_environment, "production");
        assert_eq!(node.facts_environment, "staging");
        assert_eq!(node.report_environment, "testing");
        assert_eq!(node.catalog_timestamp, "2024-01-01T00:00:01.000Z");
        assert_eq!(node.facts_timestamp, "2024-01-01T00:00:02.000Z");
        assert_eq!(node.report_timestamp, "2024-01-01T00:00:03.000Z");
        assert_eq!(node.latest_report_corrective_change, "true");
        assert_eq!(node.latest_report_hash, "c0ffee");
        assert!(node.latest_report_noop);
        assert!(!node.latest_report_noop_pending);
        assert_eq!(node.latest_report_status, "changed");
    }

    #[test]
    fn test_nulls_and_missing_fields() {
        let resp: NodeResponse = serde_json::from_value(json!({
            "certname": "agent01",
            "deactivated": null,
            "latest_report_noop": null,
            "latest_report_corrective_change": false
        }))
        .unwrap();
        assert_eq!(resp.node.deactivated, "");
        assert_eq!(resp.node.report_environment, "");
        assert!(!resp.node.latest_report_noop);
        assert_eq!(resp.node.latest_report_corrective_change, "false");
    }

    #[test]
    fn test_embedded_error() {
        let resp: NodeResponse =
            serde_json::from_value(json!({"error": "No information is known about node"}))
                .unwrap();
        assert_eq!(resp.error, "No information is known about node");
    }

    #[test]
    fn test_non_bool_noop_is_rejected() {
        let result: Result<NodeResponse, _> =
            serde_json::from_value(json!({"latest_report_noop": "yes"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_deactivate_envelope_wire_shape() {
        let envelope = CommandEnvelope::deactivate_node("agent01.example.com");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "command": "deactivate node",
                "version": 3,
                "payload": {"certname": "agent01.example.com"}
            })
        );
    }

    #[test]
    fn test_outcome_conversions() {
        let outcome = QueryOutcome::from(Ok(None));
        assert!(outcome.is_not_found());
        assert_eq!(outcome.label(), "not_found");
        assert!(matches!(outcome.into_result(), Ok(None)));

        let outcome = QueryOutcome::Failure(PuppetDbError::Application("x".to_string()));
        assert_eq!(outcome.label(), "failure");
        assert!(outcome.into_result().is_err());
    }
}
