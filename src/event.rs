//! Event encoding, decoding, and the row types shared by every store backend.
//!
//! No I/O occurs here. Stores persist [`NewEvent`]s and hand back
//! [`StoredEvent`]s; aggregates only ever see their own typed `Event` enum.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::aggregate::Aggregate;

/// An encoded event that has not been assigned a version yet.
///
/// Produced by [`encode_domain_event`]. The store assigns the
/// `resource_version` at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Newly generated UUID v4 event ID.
    pub event_id: Uuid,
    /// Event type tag extracted from the adjacently tagged domain event.
    pub event_type: String,
    /// Wall-clock time at which the event was encoded.
    pub event_timestamp: DateTime<Utc>,
    /// JSON payload (the `"data"` portion of the adjacently tagged enum).
    pub payload: Value,
}

impl NewEvent {
    /// Attach the identity and version the store assigned to this event.
    pub fn into_stored(
        self,
        resource_id: Uuid,
        resource_type: &str,
        resource_version: u64,
    ) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            resource_id,
            resource_type: resource_type.to_string(),
            resource_version,
            event_type: self.event_type,
            event_timestamp: self.event_timestamp,
            payload: self.payload,
        }
    }
}

/// A committed event as read back from an [`EventStore`](crate::EventStore).
///
/// `(resource_id, resource_version)` is unique and versions of one resource
/// are contiguous from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// The resource (aggregate instance) this event belongs to.
    pub resource_id: Uuid,
    /// The aggregate kind of the resource (e.g. `"DatasetReview"`).
    pub resource_type: String,
    /// 1-based position of this event in its resource's stream.
    pub resource_version: u64,
    /// Event type tag (e.g. `"Started"`).
    pub event_type: String,
    /// When the event was recorded.
    pub event_timestamp: DateTime<Utc>,
    /// Event-specific fields. `null` for fieldless variants.
    pub payload: Value,
}

/// Encode a domain event into a [`NewEvent`] ready for appending.
///
/// Serializes the adjacently tagged domain event
/// (`#[serde(tag = "type", content = "data")]`), extracts the `"type"` and
/// `"data"` fields, stamps the current time, and generates a fresh UUID v4
/// event ID.
///
/// # Arguments
///
/// * `event` - Reference to the domain event to encode.
///
/// # Returns
///
/// A [`NewEvent`] with all fields populated.
///
/// # Errors
///
/// Returns `serde_json::Error` if the domain event cannot be serialized, or
/// if it does not serialize to an adjacently tagged object.
pub fn encode_domain_event<A: Aggregate>(event: &A::Event) -> serde_json::Result<NewEvent> {
    // Serialize the adjacently tagged domain event. This produces JSON like:
    //   {"type": "PublicationRequested"}            (unit variant)
    //   {"type": "Started", "data": {...}}          (variant with fields)
    let value = serde_json::to_value(event)?;
    let Value::Object(mut obj) = value else {
        return Err(serde::ser::Error::custom(
            "aggregate event must serialize to a tagged JSON object",
        ));
    };

    let event_type = match obj.remove("type") {
        Some(Value::String(tag)) => tag,
        _ => {
            return Err(serde::ser::Error::custom(
                "aggregate event must carry a string \"type\" tag",
            ));
        }
    };

    // Absent for unit variants, so default to null.
    let payload = obj.remove("data").unwrap_or(Value::Null);

    Ok(NewEvent {
        event_id: Uuid::new_v4(),
        event_type,
        event_timestamp: Utc::now(),
        payload,
    })
}

/// Decode a stored row back into the aggregate's event enum.
///
/// Rebuilds the adjacently tagged JSON object from `event_type` and
/// `payload` and deserializes it into `A::Event`.
///
/// # Errors
///
/// Returns `serde_json::Error` if the tag is unknown to `A::Event` or the
/// payload does not match the variant's fields.
pub fn decode_domain_event<A: Aggregate>(stored: &StoredEvent) -> serde_json::Result<A::Event> {
    let tagged = if stored.payload.is_null() {
        serde_json::json!({ "type": stored.event_type })
    } else {
        serde_json::json!({
            "type": stored.event_type,
            "data": stored.payload,
        })
    };
    serde_json::from_value(tagged)
}

/// Selects events by type and by payload field values.
///
/// An event matches when its `event_type` is in [`types`](EventFilter::types)
/// (an empty set admits every type) and, for every entry of
/// [`predicates`](EventFilter::predicates), its payload object holds that
/// top-level field with exactly the expected JSON value.
///
/// # Examples
///
/// ```
/// use reviewfold::EventFilter;
/// use serde_json::json;
///
/// let filter = EventFilter::for_types(["Started"])
///     .with_predicate("author_id", json!("0000-0002-1825-0097"));
/// assert!(filter.types.contains("Started"));
/// assert_eq!(filter.predicates.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Admitted event types. Empty admits all.
    pub types: BTreeSet<String>,
    /// Required payload field values.
    pub predicates: Map<String, Value>,
}

impl EventFilter {
    /// A filter admitting every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter admitting the given event types.
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            predicates: Map::new(),
        }
    }

    /// Require a payload field to hold `value`.
    ///
    /// # Arguments
    ///
    /// * `field` - Top-level payload field name.
    /// * `value` - The exact JSON value the field must hold.
    ///
    /// # Returns
    ///
    /// The updated filter.
    pub fn with_predicate(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.insert(field.into(), value.into());
        self
    }

    /// Whether `event_type` is admitted by the type set.
    pub fn admits_type(&self, event_type: &str) -> bool {
        self.types.is_empty() || self.types.contains(event_type)
    }

    /// Whether `payload` satisfies every predicate.
    ///
    /// A payload that is not a JSON object only satisfies an empty predicate
    /// set.
    pub fn admits_payload(&self, payload: &Value) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        let Some(fields) = payload.as_object() else {
            return false;
        };
        self.predicates
            .iter()
            .all(|(field, expected)| fields.get(field) == Some(expected))
    }

    /// Whether a stored event matches this filter.
    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.admits_type(&event.event_type) && self.admits_payload(&event.payload)
    }
}
