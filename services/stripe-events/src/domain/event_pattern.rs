/// Event pattern evaluation for EventBridge-style rules
///
/// A pattern is a JSON object whose leaves are arrays of allowed scalar
/// values. Keys are ANDed; values inside a leaf are ORed.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::domain_event::DomainEvent;
use super::stripe_event_type::{EventSource, StripeEventType};

/// Detail key carrying the Stripe event name
pub const STRIPE_EVENT_DETAIL_KEY: &str = "stripeEvent";

/// Pattern validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    #[error("pattern is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("pattern must be a JSON object")]
    NotAnObject,
    #[error("pattern object at '{0}' must not be empty")]
    EmptyObject(String),
    #[error("value list at '{0}' must not be empty")]
    EmptyValueList(String),
    #[error("value at '{0}' must be an array or object")]
    InvalidLeaf(String),
    #[error("allowed values at '{0}' must be scalars")]
    NonScalarValue(String),
}

/// Validated event pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct EventPattern {
    root: Map<String, Value>,
}

impl EventPattern {
    /// Pattern matching `source ∈ {source}` and `detail.stripeEvent ∈ event_types`
    pub fn for_stripe(source: EventSource, event_types: &[StripeEventType]) -> Self {
        let events: Vec<Value> = event_types
            .iter()
            .map(|t| Value::String(t.as_str().to_string()))
            .collect();

        let mut detail = Map::new();
        detail.insert(STRIPE_EVENT_DETAIL_KEY.to_string(), Value::Array(events));

        let mut root = Map::new();
        root.insert(
            "source".to_string(),
            Value::Array(vec![Value::String(source.as_str().to_string())]),
        );
        root.insert("detail".to_string(), Value::Object(detail));

        Self { root }
    }

    /// Parse and validate a pattern from its JSON text
    pub fn from_json(text: &str) -> Result<Self, PatternError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| PatternError::InvalidJson(e.to_string()))?;
        Self::try_from(value)
    }

    /// JSON text of the pattern
    pub fn to_json(&self) -> String {
        Value::Object(self.root.clone()).to_string()
    }

    /// Check whether a domain event matches
    pub fn matches(&self, event: &DomainEvent) -> bool {
        self.matches_value(&event.to_json_value())
    }

    /// Check whether an arbitrary JSON event matches
    pub fn matches_value(&self, event: &Value) -> bool {
        Self::match_object(&self.root, event)
    }

    /// Allowed `source` values
    pub fn sources(&self) -> Vec<&str> {
        Self::leaf_strings(self.root.get("source"))
    }

    /// Allowed `detail.<key>` values
    pub fn detail_values(&self, key: &str) -> Vec<&str> {
        let leaf = self
            .root
            .get("detail")
            .and_then(|d| d.as_object())
            .and_then(|d| d.get(key));
        Self::leaf_strings(leaf)
    }

    fn leaf_strings(leaf: Option<&Value>) -> Vec<&str> {
        leaf.and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    fn match_object(pattern: &Map<String, Value>, event: &Value) -> bool {
        pattern.iter().all(|(key, expected)| {
            let Some(actual) = event.get(key) else {
                // Every pattern key must exist in the event
                return false;
            };
            match expected {
                Value::Object(nested) => Self::match_object(nested, actual),
                Value::Array(allowed) => Self::match_leaf(allowed, actual),
                _ => false,
            }
        })
    }

    fn match_leaf(allowed: &[Value], actual: &Value) -> bool {
        match actual {
            Value::Array(items) => items.iter().any(|item| allowed.contains(item)),
            other => allowed.contains(other),
        }
    }

    fn validate(path: &str, object: &Map<String, Value>) -> Result<(), PatternError> {
        if object.is_empty() {
            return Err(PatternError::EmptyObject(path.to_string()));
        }

        for (key, value) in object {
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };

            match value {
                Value::Object(nested) => Self::validate(&child, nested)?,
                Value::Array(values) => {
                    if values.is_empty() {
                        return Err(PatternError::EmptyValueList(child));
                    }
                    if values.iter().any(|v| v.is_array() || v.is_object()) {
                        return Err(PatternError::NonScalarValue(child));
                    }
                }
                _ => return Err(PatternError::InvalidLeaf(child)),
            }
        }

        Ok(())
    }
}

impl TryFrom<Value> for EventPattern {
    type Error = PatternError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(root) = value else {
            return Err(PatternError::NotAnObject);
        };
        Self::validate("", &root)?;
        Ok(Self { root })
    }
}

impl From<EventPattern> for Value {
    fn from(pattern: EventPattern) -> Self {
        Value::Object(pattern.root)
    }
}
