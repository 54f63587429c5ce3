//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` configuration against a [`Schema`] and
//! reports problems as [`Diagnostic`]s.
//!
//! # Example
//!
//! ```
//! use puppetdb_provider::schema::{Attribute, Schema};
//! use puppetdb_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::new(1).with_attribute("certname", Attribute::required_string());
//!
//! assert!(validate(&schema, &json!({"certname": "agent01"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"certname": 42}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("certname".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, Schema};
use serde_json::Value;

/// Validate a JSON configuration against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - The configuration must be an object (or null, meaning empty)
/// - Required attributes must be present and non-null
/// - Computed-only attributes must not be set
/// - Attribute types must match the schema
/// - Attributes unknown to the schema are rejected
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let empty = serde_json::Map::new();
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return vec![Diagnostic::error("Expected object")
                .with_detail(format!("Got {}", value_type_name(other)))];
        }
    };

    let mut diagnostics = Vec::new();
    for (name, attr) in &schema.attributes {
        validate_attribute(name, attr, obj.get(name), &mut diagnostics);
    }
    for (name, v) in obj {
        if !schema.attributes.contains_key(name) && !v.is_null() {
            diagnostics.push(
                Diagnostic::error(format!("Unsupported attribute '{}'", name))
                    .with_detail("This attribute is not defined in the schema")
                    .with_attribute(name.as_str()),
            );
        }
    }
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

fn validate_attribute(
    name: &str,
    attr: &Attribute,
    value: Option<&Value>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", name))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(name),
                );
            }
        }
        Some(_) if attr.is_computed_only() => {
            diagnostics.push(
                Diagnostic::error(format!("Attribute '{}' is read-only", name))
                    .with_detail("This attribute is set by the provider")
                    .with_attribute(name),
            );
        }
        Some(v) => {
            let matches = match attr.attr_type {
                AttributeType::String => v.is_string(),
                AttributeType::Bool => v.is_boolean(),
            };
            if !matches {
                let expected = match attr.attr_type {
                    AttributeType::String => "string",
                    AttributeType::Bool => "bool",
                };
                diagnostics.push(
                    Diagnostic::error(format!("Invalid type for attribute '{}'", name))
                        .with_detail(format!("Expected {}, got {}", expected, value_type_name(v)))
                        .with_attribute(name),
                );
            }
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_schema() -> Schema {
        Schema::new(1)
            .with_attribute("certname", Attribute::required_string())
            .with_attribute("latest_report_noop", Attribute::computed_bool())
    }

    #[test]
    fn test_validate_required_string() {
        let schema = node_schema();

        assert!(validate(&schema, &json!({"certname": "agent01"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("certname".to_string()));

        let diagnostics = validate(&schema, &json!({"certname": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"certname": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_computed_attribute_cannot_be_set() {
        let diagnostics = validate(
            &node_schema(),
            &json!({"certname": "agent01", "latest_report_noop": true}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("read-only"));

        // Null computed attributes are how unknown values arrive.
        let diagnostics = validate(
            &node_schema(),
            &json!({"certname": "agent01", "latest_report_noop": null}),
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_attribute() {
        let diagnostics = validate(&node_schema(), &json!({"certname": "a", "id": "a"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("id".to_string()));
    }

    #[test]
    fn test_non_object() {
        let diagnostics = validate(&node_schema(), &json!("agent01"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Expected object");
    }

    #[test]
    fn test_null_config_with_optional_attributes() {
        let schema = Schema::new(0).with_attribute("url", Attribute::optional_string());
        assert!(validate_result(&schema, &Value::Null).is_ok());
        assert!(validate_result(&schema, &json!({"url": true})).is_err());
    }
}
