//! Bus events, sources and subscription filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Who emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Plugin,
    System,
}

/// Event origin: a kind plus a stable id (plugin id or subsystem name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub kind: SourceKind,
    pub id: String,
}

impl EventSource {
    pub fn plugin(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Plugin,
            id: id.into(),
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::System,
            id: id.into(),
        }
    }
}

/// An emitted event. Events are immutable once emitted; the bus shares them
/// behind an `Arc` between history and handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Unique event id
    pub id: uuid::Uuid,
    /// Event type, e.g. `plugin:loaded`
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Set on requests; responders reply against it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(
        event_type: impl Into<String>,
        payload: Value,
        source: EventSource,
        metadata: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            source,
            metadata,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Post-match filter applied after the type pattern.
///
/// Every field that is set must hold; `metadata` is a subset-equality check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionFilter {
    pub source_kind: Option<SourceKind>,
    pub source_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl SubscriptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = Some(kind);
        self
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        if let Some(kind) = self.source_kind {
            if event.source.kind != kind {
                return false;
            }
        }

        if let Some(ref id) = self.source_id {
            if &event.source.id != id {
                return false;
            }
        }

        self.metadata
            .iter()
            .all(|(key, expected)| event.metadata.get(key) == Some(expected))
    }
}
