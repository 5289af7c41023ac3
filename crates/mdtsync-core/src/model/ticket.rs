// ── Ticket and project domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Fields a patch may never touch: they identify the ticket.
const IMMUTABLE_FIELDS: [&str; 2] = ["key", "scope"];

/// A ticket as held in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Ticket key, e.g. `"MDT-042"`. Also the tracking key.
    pub key: String,
    /// Owning project id.
    pub scope: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "type")]
    pub ticket_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    /// Everything else from the frontmatter, untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Ticket {
    pub fn new(scope: impl Into<String>, key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            scope: scope.into(),
            title: title.into(),
            status: None,
            priority: None,
            ticket_type: None,
            last_modified: Utc::now(),
            fields: Map::new(),
        }
    }

    /// Shallow-merge `patch` into a copy of this ticket.
    ///
    /// Known fields are type-checked on the way back; `lastModified`
    /// is bumped to now unless the patch sets it.
    pub fn merged(&self, patch: &TicketPatch) -> Result<Self, CoreError> {
        let value = serde_json::to_value(self).map_err(|e| CoreError::Internal(e.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(CoreError::Internal("ticket did not serialize to an object".into()));
        };

        map.insert("lastModified".into(), Value::String(Utc::now().to_rfc3339()));
        for (field, value) in patch.fields() {
            if IMMUTABLE_FIELDS.contains(&field.as_str()) {
                return Err(CoreError::InvalidPatch {
                    message: format!("field '{field}' cannot be changed"),
                });
            }
            map.insert(field.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(map)).map_err(|e| CoreError::InvalidPatch {
            message: e.to_string(),
        })
    }

    /// Field value by wire name, for display and `--fields` selection.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "key" | "code" => Some(Value::String(self.key.clone())),
            "scope" => Some(Value::String(self.scope.clone())),
            "title" => Some(Value::String(self.title.clone())),
            "status" => self.status.clone().map(Value::String),
            "priority" => self.priority.clone().map(Value::String),
            "type" => self.ticket_type.clone().map(Value::String),
            "lastModified" => Some(Value::String(self.last_modified.to_rfc3339())),
            other => self.fields.get(other).cloned(),
        }
    }
}

// ── TicketPatch ──────────────────────────────────────────────────────

/// Ordered set of field updates, sent verbatim as the `PATCH` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketPatch(Map<String, Value>);

impl TicketPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn status(self, status: impl Into<String>) -> Self {
        self.set("status", status.into())
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.set("title", title.into())
    }

    pub fn priority(self, priority: impl Into<String>) -> Self {
        self.set("priority", priority.into())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, Value)> for TicketPatch {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for TicketPatch {
    fn from(fields: BTreeMap<String, String>) -> Self {
        fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    }
}

// ── Project ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ticket() -> Ticket {
        let mut t = Ticket::new("MDT", "MDT-001", "Fix sync");
        t.status = Some("Proposed".into());
        t.fields.insert("assignee".into(), json!("sam"));
        t
    }

    #[test]
    fn merge_overrides_known_and_extra_fields() {
        let patch = TicketPatch::new()
            .status("Done")
            .set("assignee", "kai")
            .set("phaseEpic", "Phase B");
        let merged = ticket().merged(&patch).unwrap();

        assert_eq!(merged.status.as_deref(), Some("Done"));
        assert_eq!(merged.title, "Fix sync");
        assert_eq!(merged.fields["assignee"], "kai");
        assert_eq!(merged.fields["phaseEpic"], "Phase B");
    }

    #[test]
    fn merge_rejects_identity_fields() {
        let patch = TicketPatch::new().set("key", "MDT-999");
        let err = ticket().merged(&patch).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPatch { .. }));
    }

    #[test]
    fn merge_rejects_ill_typed_known_field() {
        let patch = TicketPatch::new().set("status", 5);
        assert!(ticket().merged(&patch).is_err());
    }

    #[test]
    fn patch_serializes_as_plain_object() {
        let patch = TicketPatch::new().status("Done").priority("High");
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "status": "Done", "priority": "High" })
        );
    }

    #[test]
    fn field_lookup_covers_frontmatter() {
        let t = ticket();
        assert_eq!(t.field("code").unwrap(), "MDT-001");
        assert_eq!(t.field("assignee").unwrap(), "sam");
        assert!(t.field("priority").is_none());
    }
}
