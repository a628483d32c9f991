use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};

// ============================================================================
// Core Message Types
// ============================================================================

/// The message that is forked to every route and returned as the aggregate
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub payload: Payload,
    /// Read-only metadata travelling with the message
    pub attributes: IndexMap<String, serde_json::Value>,
    /// Flow variables; routes may add to their own copy
    pub variables: IndexMap<String, Payload>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            attributes: IndexMap::new(),
            variables: IndexMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Replace the payload, keeping id, metadata and variables
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Whether the message can be copied once per route without consuming anything.
    ///
    /// Variables are checked too, since every copy carries them.
    pub fn is_repeatable(&self) -> bool {
        self.payload.is_repeatable() && self.variables.values().all(Payload::is_repeatable)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Message body
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
    /// Single-consumption byte stream; the only variant that cannot be forked
    Stream(ConsumableStream),
    /// Ordered route results, see `CollectList`
    Collection(Vec<Message>),
    /// Route key to result or failure marker, in configuration order
    RouteMap(IndexMap<String, RouteEntry>),
}

impl Payload {
    pub fn is_repeatable(&self) -> bool {
        match self {
            Payload::Stream(_) => false,
            Payload::Collection(messages) => messages.iter().all(Message::is_repeatable),
            Payload::RouteMap(entries) => entries.values().all(|entry| match entry {
                RouteEntry::Success(message) => message.is_repeatable(),
                RouteEntry::Failed(_) => true,
            }),
            _ => true,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_route_map(&self) -> Option<&IndexMap<String, RouteEntry>> {
        match self {
            Payload::RouteMap(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[Message]> {
        match self {
            Payload::Collection(messages) => Some(messages),
            _ => None,
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Empty => serializer.serialize_none(),
            Payload::Json(value) => value.serialize(serializer),
            Payload::Text(text) => serializer.serialize_str(text),
            Payload::Bytes(bytes) => serializer
                .serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes)),
            Payload::Stream(_) => Err(<S::Error as serde::ser::Error>::custom(
                "stream payloads cannot be serialized",
            )),
            Payload::Collection(messages) => serializer.collect_seq(messages),
            Payload::RouteMap(entries) => serializer.collect_map(entries),
        }
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<ConsumableStream> for Payload {
    fn from(value: ConsumableStream) -> Self {
        Payload::Stream(value)
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// A byte stream that can be read exactly once.
///
/// Clones share the same underlying stream, so whichever clone calls
/// [`ConsumableStream::take`] first gets the data.
#[derive(Clone)]
pub struct ConsumableStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl ConsumableStream {
    pub fn new(stream: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
        }
    }

    pub fn take(&self) -> Option<ByteStream> {
        self.inner.lock().take()
    }

    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl fmt::Debug for ConsumableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumableStream")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

// ============================================================================
// Route Result Types
// ============================================================================

/// One entry of a collected route map
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RouteEntry {
    Success(Message),
    Failed(FailureMarker),
}

impl RouteEntry {
    pub fn is_success(&self) -> bool {
        matches!(self, RouteEntry::Success(_))
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            RouteEntry::Success(message) => Some(message),
            RouteEntry::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureMarker> {
        match self {
            RouteEntry::Success(_) => None,
            RouteEntry::Failed(marker) => Some(marker),
        }
    }
}

/// Explicit record of a failed route inside an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMarker {
    pub route_index: usize,
    pub route_name: String,
    pub cause: RouteError,
}

/// Why a single route did not produce a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum RouteError {
    #[error("route execution failed: {0}")]
    Execution(String),

    #[error("route transport error: {0}")]
    Transport(String),

    #[error("route timed out after {0}ms")]
    Timeout(u64),

    #[error("route panicked: {0}")]
    Panicked(String),

    #[error("route cancelled")]
    Cancelled,
}

impl RouteError {
    pub fn execution(message: impl Into<String>) -> Self {
        RouteError::Execution(message.into())
    }

    /// Transport and timeout failures may succeed on another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::Transport(_) | RouteError::Timeout(_))
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Aggregation policy selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    CollectMap,
    CollectList,
    FirstSuccessful,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::CollectMap => "collect_map",
            StrategyKind::CollectList => "collect_list",
            StrategyKind::FirstSuccessful => "first_successful",
        };
        f.write_str(name)
    }
}

/// How a collected map represents failed routes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failed routes appear in the map as `Failed` entries
    #[default]
    Marker,
    /// Failed routes are left out of the map and listed in the
    /// `failedRoutes` attribute instead
    Omit,
}
