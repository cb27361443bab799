use std::collections::HashMap;
use std::time::SystemTime;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Error when encoding or decoding an event payload.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("payload error: {message}")]
pub struct PayloadError {
    pub message: String,
}

/// Metadata key holding the id of the command that produced an event.
pub(crate) const CAUSATION_ID: &str = "causation_id";

/// An immutable fact produced by an aggregate, stored durably and published.
///
/// `sequence` is the aggregate version this event moves the aggregate to;
/// the first event of an aggregate carries sequence 1.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DomainEvent {
    pub aggregate_id: String,
    pub sequence: u64,
    pub event_name: String,
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

impl DomainEvent {
    pub fn new(
        aggregate_id: impl Into<String>,
        sequence: u64,
        event_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        DomainEvent {
            aggregate_id: aggregate_id.into(),
            sequence,
            event_name: event_name.into(),
            payload,
            timestamp: SystemTime::now(),
            metadata: HashMap::new(),
        }
    }

    /// Build an event with a bitcode-encoded payload.
    pub fn encode<T: Serialize>(
        aggregate_id: impl Into<String>,
        sequence: u64,
        event_name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, PayloadError> {
        let bytes = bitcode::serialize(payload).map_err(|e| PayloadError {
            message: e.to_string(),
        })?;
        Ok(Self::new(aggregate_id, sequence, event_name, bytes))
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deserialize the payload into the specified type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        bitcode::deserialize(&self.payload).map_err(|e| PayloadError {
            message: e.to_string(),
        })
    }

    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// The command that caused this event, if recorded.
    pub fn causation_id(&self) -> Option<&str> {
        self.meta(CAUSATION_ID)
    }
}
