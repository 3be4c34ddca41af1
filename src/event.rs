//! Typed events pushed by the proxy over its event stream.
//!
//! Every frame is a JSON envelope `{"type": "<Tag>", "data": <payload>}`. The
//! tag set is closed: [`EventKind`] has one variant per tag and [`Event`] one
//! variant per payload shape, so adding a tag is a compile-checked change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Type tag of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    MetricsUpdate,
    ConfigChanged,
    RuleUpdated,
    Error,
    CacheOperation,
    BackendHealthChanged,
}

impl EventKind {
    /// All tags, in wire-table order
    pub const ALL: [EventKind; 6] = [
        EventKind::MetricsUpdate,
        EventKind::ConfigChanged,
        EventKind::RuleUpdated,
        EventKind::Error,
        EventKind::CacheOperation,
        EventKind::BackendHealthChanged,
    ];

    /// The tag as it appears in the `type` field
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MetricsUpdate => "MetricsUpdate",
            EventKind::ConfigChanged => "ConfigChanged",
            EventKind::RuleUpdated => "RuleUpdated",
            EventKind::Error => "Error",
            EventKind::CacheOperation => "CacheOperation",
            EventKind::BackendHealthChanged => "BackendHealthChanged",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| DecodeError::UnknownType(tag.to_string()))
    }
}

/// A decoded event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Periodic system metrics snapshot
    MetricsUpdate(SystemMetrics),
    /// Configuration changed on the server; consumers should refetch
    ConfigChanged,
    /// A forwarding rule was created or modified
    RuleUpdated(RuleUpdated),
    /// Server-side error to surface to the operator
    Error(ServerError),
    /// Content cache activity
    CacheOperation(CacheOperation),
    /// A backend's health status changed
    BackendHealthChanged(BackendHealthChanged),
}

impl Event {
    /// The type tag of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MetricsUpdate(_) => EventKind::MetricsUpdate,
            Event::ConfigChanged => EventKind::ConfigChanged,
            Event::RuleUpdated(_) => EventKind::RuleUpdated,
            Event::Error(_) => EventKind::Error,
            Event::CacheOperation(_) => EventKind::CacheOperation,
            Event::BackendHealthChanged(_) => EventKind::BackendHealthChanged,
        }
    }

    /// Decode a text frame into an event.
    pub fn decode(frame: &str) -> Result<Event, DecodeError> {
        let envelope: Envelope = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;
        let kind: EventKind = envelope.kind.parse()?;

        fn payload<T: serde::de::DeserializeOwned>(
            kind: EventKind,
            data: serde_json::Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data).map_err(|source| DecodeError::InvalidPayload { kind, source })
        }

        Ok(match kind {
            EventKind::MetricsUpdate => Event::MetricsUpdate(payload(kind, envelope.data)?),
            EventKind::ConfigChanged => Event::ConfigChanged,
            EventKind::RuleUpdated => Event::RuleUpdated(payload(kind, envelope.data)?),
            EventKind::Error => Event::Error(payload(kind, envelope.data)?),
            EventKind::CacheOperation => Event::CacheOperation(payload(kind, envelope.data)?),
            EventKind::BackendHealthChanged => {
                Event::BackendHealthChanged(payload(kind, envelope.data)?)
            }
        })
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Why a frame was dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or not an object with a string `type`
    #[error("invalid frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// Tag outside the known set
    #[error("unknown event type '{0}'")]
    UnknownType(String),
    /// Known tag whose payload has the wrong shape
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
    /// Binary frame that is not UTF-8 text
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// System metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_response_time: f64,
    pub cache_hit_ratio: f64,
    pub active_connections: u32,
    pub uptime_seconds: u64,
    #[serde(default)]
    pub rule_metrics: HashMap<String, RuleMetrics>,
}

/// Per-rule metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_response_time: f64,
    /// Keyed by backend URL
    #[serde(default)]
    pub backend_health: HashMap<String, BackendHealth>,
}

/// Health of a single backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub is_healthy: bool,
    pub last_check: String,
    pub response_time: f64,
    pub error_count: u32,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_ratio: f64,
    pub memory_usage_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleUpdated {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

/// Content cache activity (e.g. an `invalidate` of one content source)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOperation {
    pub operation: String,
    pub source: String,
    #[serde(default)]
    pub stats: Option<CacheStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealthChanged {
    pub backend: String,
    pub health: BackendHealth,
}
