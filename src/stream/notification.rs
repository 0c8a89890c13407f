//! CDC notification envelope and batch parsing

use crate::error::InvocationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "MODIFY")]
    Modify,
    #[serde(rename = "REMOVE")]
    Remove,
    #[serde(other)]
    Unknown,
}

/// One change notification from the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamNotification {
    pub event_kind: EventKind,
    pub source_id: String,
    #[serde(default)]
    pub new_image: Option<Map<String, Value>>,
    #[serde(default)]
    pub old_image: Option<Map<String, Value>>,
}

const ACCOUNT_ID_KEYS: [&str; 2] = ["accountId", "account_id"];

impl StreamNotification {
    pub fn insert(source_id: impl Into<String>, new_image: Map<String, Value>) -> Self {
        Self {
            event_kind: EventKind::Insert,
            source_id: source_id.into(),
            new_image: Some(new_image),
            old_image: None,
        }
    }

    /// Account id from the new image
    ///
    /// Accepts plain strings and typed attribute wrappers such as `{"S": "acct-1"}`.
    pub fn account_id(&self) -> Option<String> {
        let image = self.new_image.as_ref()?;
        ACCOUNT_ID_KEYS
            .iter()
            .filter_map(|key| image.get(*key))
            .find_map(attribute_string)
    }
}

fn attribute_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("S").and_then(Value::as_str)?,
        _ => return None,
    };
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parsed batch; entries that are not valid notifications are counted, not fatal
#[derive(Debug, Clone, Default)]
pub struct CdcBatch {
    pub notifications: Vec<StreamNotification>,
    pub malformed: usize,
}

impl CdcBatch {
    pub fn new(notifications: Vec<StreamNotification>) -> Self {
        Self {
            notifications,
            malformed: 0,
        }
    }

    /// Parse a batch from either a bare array or `{"records": [...]}`
    pub fn from_json(input: &str) -> Result<Self, InvocationError> {
        let value: Value = serde_json::from_str(input)?;
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut map) => match map.remove("records").or_else(|| map.remove("Records")) {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(InvocationError::InvalidBatch(
                        "expected a `records` array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(InvocationError::InvalidBatch(
                    "expected an array of notifications".to_string(),
                ))
            }
        };

        let mut batch = CdcBatch::default();
        for (idx, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<StreamNotification>(entry) {
                Ok(notification) => batch.notifications.push(notification),
                Err(e) => {
                    log::warn!("Skipping malformed notification #{}: {}", idx, e);
                    batch.malformed += 1;
                }
            }
        }
        Ok(batch)
    }

    pub fn len(&self) -> usize {
        self.notifications.len() + self.malformed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
