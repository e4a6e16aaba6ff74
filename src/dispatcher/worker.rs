use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::protocol::{Envelope, MessageType, Payload, Response};
use crate::service::{ActivityCodec, elapsed_ms};

pub(super) type Factory = Box<dyn FnOnce() -> Result<Box<dyn ActivityCodec>, String> + Send>;

/// Body of the codec thread. Builds the codec, reports the outcome on
/// `ready`, then serves the queue one envelope at a time until a shutdown
/// message arrives or every sender is gone. Envelopes still queued at that
/// point are dropped, which closes their reply channels.
pub(super) fn run(
    factory: Factory,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let started = Instant::now();
    let codec = match factory() {
        Ok(codec) => codec,
        Err(err) => {
            error!(error = %err, "codec failed to start");
            let _ = ready.send(Err(err));
            return;
        }
    };
    info!(elapsed_ms = elapsed_ms(started), "codec started");
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(envelope) = queue.blocking_recv() {
        if envelope.kind == MessageType::Shutdown {
            info!(request_id = %envelope.id, "codec shutting down");
            break;
        }

        let handled = Instant::now();
        let result = handle(codec.as_ref(), envelope.kind, envelope.payload);
        debug!(
            request_id = %envelope.id,
            kind = %envelope.kind,
            elapsed_ms = elapsed_ms(handled),
            "handled request"
        );

        if let Some(reply) = envelope.reply {
            let response = Response {
                id: envelope.id,
                kind: envelope.kind,
                result,
            };
            if reply.send(response).is_err() {
                warn!(request_id = %envelope.id, "caller went away before the response");
            }
        }
    }
}

fn handle(codec: &dyn ActivityCodec, kind: MessageType, payload: Payload) -> Value {
    match (kind, payload) {
        (MessageType::IsReady, _) => Value::Bool(true),
        (MessageType::Decode, Payload::Bytes(bytes)) => {
            let result = codec.decode(&bytes);
            let total = result.total_elapsed;
            serialize_timed(&result, total)
        }
        (MessageType::Encode, Payload::Json(request)) => {
            let result = codec.encode(request);
            let total = result.total_elapsed;
            serialize_timed(&result, total)
        }
        (MessageType::ManufacturerList, _) => serialize(&codec.manufacturer_list()),
        (MessageType::SportList, _) => serialize(&codec.sport_list()),
        (kind, _) => {
            error!(%kind, "request payload does not match its type");
            Value::Null
        }
    }
}

/// Serialize a codec result and account for the time serialization took.
fn serialize_timed<T: Serialize>(result: &T, total_elapsed: u64) -> Value {
    let started = Instant::now();
    let mut value = serialize(result);
    let took = elapsed_ms(started);
    if let Some(object) = value.as_object_mut() {
        object.insert("serializationTook".into(), took.into());
        object.insert("totalElapsed".into(), total_elapsed.saturating_add(took).into());
    }
    value
}

fn serialize<T: Serialize>(result: &T) -> Value {
    serde_json::to_value(result).unwrap_or_else(|err| {
        error!(error = %err, "failed to serialize codec result");
        Value::Null
    })
}
