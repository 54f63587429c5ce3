//! Value types exchanged with the plugin host.

use serde::{Deserialize, Serialize};

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<serde_json::Value>,
    /// The value after the change (None if deleting).
    pub after: Option<serde_json::Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(
        path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: serde_json::Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: serde_json::Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: serde_json::Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Resource and data source names a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("certname", json!("agent01"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("agent01")));

        let removed = AttributeChange::removed("certname", json!("agent01"));
        assert_eq!(removed.before, Some(json!("agent01")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("certname", json!("a"), json!("b"));
        assert_eq!(modified.before, Some(json!("a")));
        assert_eq!(modified.after, Some(json!("b")));
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"certname": "agent01"}));
        assert!(no_change.changes.is_empty());
        assert!(!no_change.requires_replace);

        let replace = PlanResult::with_changes(
            json!({"certname": "agent02"}),
            vec![AttributeChange::modified(
                "certname",
                json!("agent01"),
                json!("agent02"),
            )],
            true,
        );
        assert_eq!(replace.changes.len(), 1);
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("puppetdb_node", json!({"certname": "agent01"}));
        assert_eq!(imported.resource_type, "puppetdb_node");
        assert_eq!(imported.state["certname"], "agent01");
    }
}
