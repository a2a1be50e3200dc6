use axum::body::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::messages::MessageStreamEvent;

#[derive(Debug, Error)]
pub enum SseError {
    #[error("failed to serialize sse payload for `{event}`: {source}")]
    Serialize {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Encodes one `event:`/`data:` frame. The payload is serialized compactly so
/// the `data:` line never spans multiple lines.
pub fn encode_event<T>(event: &str, payload: &T) -> Result<Bytes, SseError>
where
    T: Serialize + ?Sized,
{
    let data = serde_json::to_string(payload).map_err(|source| SseError::Serialize {
        event: event.to_string(),
        source,
    })?;

    let mut frame = String::with_capacity(event.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(event);
    frame.push('\n');
    frame.push_str("data: ");
    frame.push_str(&data);
    frame.push_str("\n\n");
    Ok(Bytes::from(frame))
}

pub fn encode_stream_event(event: &MessageStreamEvent) -> Result<Bytes, SseError> {
    encode_event(event.name(), event)
}
