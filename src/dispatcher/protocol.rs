//! Messages exchanged between dispatcher handles and the codec worker.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Correlates one request with exactly one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    IsReady,
    Decode,
    Encode,
    ManufacturerList,
    SportList,
    Shutdown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::IsReady => "isReady",
            MessageType::Decode => "decode",
            MessageType::Encode => "encode",
            MessageType::ManufacturerList => "manufacturerList",
            MessageType::SportList => "sportList",
            MessageType::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum Payload {
    Empty,
    Bytes(Vec<u8>),
    Json(Value),
}

/// What the worker sends back. `result` is the serialized codec result.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: RequestId,
    pub kind: MessageType,
    pub result: Value,
}

/// A queued request together with the channel its response goes to.
/// Shutdown messages carry no reply channel.
#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub kind: MessageType,
    pub payload: Payload,
    pub reply: Option<oneshot::Sender<Response>>,
}

/// A typed result and the wall-clock time the dispatcher spent on it,
/// initialization included.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timed<T> {
    pub request_id: RequestId,
    pub result: T,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

fn as_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_types_use_wire_names() {
        let encoded = serde_json::to_value(MessageType::ManufacturerList).unwrap();
        assert_eq!(encoded, Value::String("manufacturerList".into()));
        assert_eq!(MessageType::IsReady.to_string(), "isReady");
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn timed_serializes_elapsed_in_millis() {
        let timed = Timed {
            request_id: RequestId::new(),
            result: 7,
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&timed).unwrap();
        assert_eq!(json["elapsedMs"], 1500);
        assert_eq!(json["result"], 7);
    }
}
