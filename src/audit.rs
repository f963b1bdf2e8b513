//! Audit trail for collection mutations.
//!
//! Every create/update/delete/status-change is recorded to a capped,
//! newest-first history alongside the collection itself. Update entries
//! carry field-level before/after values.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "STATUS_CHANGE")]
    StatusChange,
}

/// One before/after pair for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, FieldChange>>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, entity_id: &str, label: String) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            entity_id: entity_id.to_string(),
            label,
            changes: None,
        }
    }

    pub fn with_changes(mut self, changes: Option<BTreeMap<String, FieldChange>>) -> Self {
        self.changes = changes;
        self
    }
}

/// Field-level diff of two entities, keyed by field name.
///
/// Compares the serialized form, so it works for any entity type. Returns
/// `None` when nothing changed or the entities don't serialize to objects.
pub fn diff_changes<E: Serialize>(old: &E, new: &E) -> Option<BTreeMap<String, FieldChange>> {
    let old_value = serde_json::to_value(old).ok()?;
    let new_value = serde_json::to_value(new).ok()?;
    let (Value::Object(old_map), Value::Object(new_map)) = (old_value, new_value) else {
        return None;
    };

    let mut changes = BTreeMap::new();
    for (field, new_val) in &new_map {
        let old_val = old_map.get(field).cloned().unwrap_or(Value::Null);
        if old_val != *new_val {
            changes.insert(
                field.clone(),
                FieldChange {
                    from: old_val,
                    to: new_val.clone(),
                },
            );
        }
    }

    (!changes.is_empty()).then_some(changes)
}

// ============================================================================
// Tests
// ============================================================================
