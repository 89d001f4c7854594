//! Pipeline data model: records, batches, fetch attempts, dead-letter envelopes

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use stormfeed_common::SourceType;

/// Name of the field injected into every record
pub const SOURCE_TYPE_FIELD: &str = "sourceType";

/// One data row: header-ordered `(field, value)` pairs plus its source type.
///
/// Values are kept exactly as they appeared in the document. Serializes to a
/// JSON object in header order followed by `sourceType`; an upstream column
/// that is itself called `sourceType` is shadowed by the injected tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    source_type: SourceType,
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(source_type: SourceType, fields: Vec<(String, String)>) -> Self {
        Self {
            source_type,
            fields,
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Value of the first field named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// JSON message body sent to the broker
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in self.visible_fields() {
            map.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        map.insert(
            SOURCE_TYPE_FIELD.to_string(),
            serde_json::Value::String(self.source_type.tag().to_string()),
        );
        serde_json::Value::Object(map)
    }

    fn visible_fields(&self) -> impl Iterator<Item = &(String, String)> {
        self.fields.iter().filter(|(key, _)| key != SOURCE_TYPE_FIELD)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in self.visible_fields() {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(SOURCE_TYPE_FIELD, &self.source_type)?;
        map.end()
    }
}

/// Ordered group of records published in one broker request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub source_type: SourceType,
    /// Position of the batch within its document, starting at 1
    pub sequence: u32,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Broker message bodies, in record order
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.records.iter().map(Record::to_json).collect()
    }
}

/// Outcome of a single fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Skipped,
    RetryScheduled,
    Failed,
}

/// Record of one fetch attempt for one source type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobAttempt {
    pub source_type: SourceType,
    /// 1-based
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
}

/// A record that could not be delivered to its primary destination
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub original_record: Record,
    pub metadata: DeadLetterMetadata,
}

/// Diagnostics attached to every dead-lettered record
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMetadata {
    pub timestamp: DateTime<Utc>,
    pub original_destination: String,
    pub error_kind: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    pub attempt_number: u32,
    /// Shared by every envelope produced from the same batch
    pub batch_id: Uuid,
    pub source_url: String,
    pub source_type: SourceType,
}

/// Contents of a fallback file written when the dead-letter destination is unreachable
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFallbackRecord {
    pub failed_envelopes: Vec<DeadLetterEnvelope>,
    pub file_metadata: FallbackFileMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackFileMetadata {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub reason: String,
}
