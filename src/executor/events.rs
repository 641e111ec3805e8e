//! Mutation events.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::value::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }
}

/// Notification of one committed row change.
///
/// `record` is the row after the change (the deleted row for `Delete`);
/// `old_record` is only set for `Update`, where it holds the row before the
/// change with the same attributes as `record`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub event_type: EventType,
    pub record_name: String,
    pub record: Record,
    pub old_record: Option<Record>,
}

impl MutationEvent {
    pub fn create(record_name: impl Into<String>, record: Record) -> Self {
        Self {
            event_type: EventType::Create,
            record_name: record_name.into(),
            record,
            old_record: None,
        }
    }

    pub fn update(record_name: impl Into<String>, record: Record, old_record: Record) -> Self {
        Self {
            event_type: EventType::Update,
            record_name: record_name.into(),
            record,
            old_record: Some(old_record),
        }
    }

    pub fn delete(record_name: impl Into<String>, record: Record) -> Self {
        Self {
            event_type: EventType::Delete,
            record_name: record_name.into(),
            record,
            old_record: None,
        }
    }

    /// Id of the affected row.
    pub fn id(&self) -> Option<i64> {
        self.record.id()
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "type": self.event_type.as_str(),
            "recordName": self.record_name,
            "record": self.record.to_json(),
            "oldRecord": self.old_record.as_ref().map(Record::to_json),
        })
    }
}
