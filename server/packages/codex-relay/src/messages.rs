//! Anthropic Messages API request shapes and streaming events.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;

static MESSAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub const DEFAULT_MODEL: &str = "codex";

pub fn next_message_id() -> String {
    format!(
        "msg_relay_{}",
        MESSAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// The parts of a Messages request the relay reads. Fields it does not need
/// are ignored, whatever their shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRequest {
    pub model: Option<String>,
    pub messages: Vec<RequestMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub role: Option<String>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
    Other(Value),
}

impl From<&Value> for MessageContent {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(parts) => Self::Parts(parts.clone()),
            other => Self::Other(other.clone()),
        }
    }
}

impl RequestMessage {
    /// Returns `None` for array elements that are not objects.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            role: object.get("role").and_then(Value::as_str).map(str::to_string),
            content: object
                .get("content")
                .map(MessageContent::from)
                .unwrap_or(MessageContent::Other(Value::Null)),
        })
    }
}

impl StreamRequest {
    /// Parses a request body, falling back to an empty request when it is not JSON.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_value(&value),
            Err(err) => {
                tracing::warn!(error = %err, bytes = body.len(), "malformed messages request body");
                Self::default()
            }
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let model = value
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);
        let messages = value
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(RequestMessage::from_value)
                    .collect()
            })
            .unwrap_or_default();
        Self { model, messages }
    }

    /// Joins every textual part of every message with newlines.
    pub fn prompt_text(&self) -> String {
        let mut texts: Vec<&str> = Vec::new();
        for message in &self.messages {
            match &message.content {
                MessageContent::Text(text) => texts.push(text),
                MessageContent::Parts(parts) => {
                    for part in parts {
                        if part.get("type").and_then(Value::as_str) == Some("text") {
                            texts.push(part.get("text").and_then(Value::as_str).unwrap_or(""));
                        }
                    }
                }
                MessageContent::Other(_) => {}
            }
        }
        texts.join("\n")
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .filter(|model| !model.is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageStub {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub content: Vec<Value>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
}

/// Always serialized as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageDeltaBody {}

/// One event of the Messages streaming protocol. The serialized `type`
/// matches [`MessageStreamEvent::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageStreamEvent {
    MessageStart { message: MessageStub },
    ContentBlockStart { index: u32, content_block: ContentBlock },
    ContentBlockDelta { index: u32, delta: ContentDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { delta: MessageDeltaBody, usage: Usage },
    MessageStop,
}

impl MessageStreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
        }
    }

    pub fn opening(message_id: String, model: &str) -> [Self; 2] {
        [
            Self::MessageStart {
                message: MessageStub {
                    id: message_id,
                    kind: "message",
                    role: "assistant",
                    content: Vec::new(),
                    model: model.to_string(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            Self::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Text {
                    text: String::new(),
                },
            },
        ]
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta { text: text.into() },
        }
    }

    pub fn closing() -> [Self; 3] {
        [
            Self::ContentBlockStop { index: 0 },
            Self::MessageDelta {
                delta: MessageDeltaBody::default(),
                usage: Usage::default(),
            },
            Self::MessageStop,
        ]
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn prompt_text_collects_strings_and_text_parts() {
        let request = StreamRequest::from_body(
            json!({
                "model": "claude-sonnet-4-5",
                "messages": [
                    { "role": "user", "content": "first" },
                    { "role": "assistant", "content": [
                        { "type": "text", "text": "second" },
                        { "type": "image", "source": {} },
                        { "type": "text" },
                        "stray"
                    ]},
                    { "role": "user" }
                ]
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(request.prompt_text(), "first\nsecond\n");
        assert_eq!(request.model_name(), "claude-sonnet-4-5");
    }

    #[test]
    fn mistyped_fields_do_not_drop_the_prompt() {
        let request = StreamRequest::from_body(
            json!({
                "model": 123,
                "messages": [{ "role": "user", "content": "Working directory: /tmp" }]
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(request.prompt_text(), "Working directory: /tmp");
        assert_eq!(request.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn malformed_message_elements_are_skipped() {
        let request = StreamRequest::from_body(
            json!({
                "messages": [
                    { "role": "user", "content": "keep me" },
                    { "role": 7, "content": "and me" },
                    "stray",
                    5
                ]
            })
            .to_string()
            .as_bytes(),
        );
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].role, None);
        assert_eq!(request.prompt_text(), "keep me\nand me");
    }

    #[test]
    fn malformed_body_is_an_empty_request() {
        let request = StreamRequest::from_body(b"not json");
        assert!(request.messages.is_empty());
        assert_eq!(request.prompt_text(), "");
        assert_eq!(request.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn event_type_matches_event_name() {
        let mut events = Vec::new();
        events.extend(MessageStreamEvent::opening("msg_test".to_string(), "codex"));
        events.push(MessageStreamEvent::text_delta("hi\n"));
        events.extend(MessageStreamEvent::closing());

        for event in &events {
            let value = serde_json::to_value(event).expect("serialize event");
            assert_eq!(value["type"], event.name());
        }
    }

    #[test]
    fn closing_events_have_expected_shape() {
        let [stop, delta, message_stop] = MessageStreamEvent::closing();
        assert_eq!(
            serde_json::to_value(&stop).expect("stop"),
            json!({ "type": "content_block_stop", "index": 0 })
        );
        assert_eq!(
            serde_json::to_value(&delta).expect("delta"),
            json!({
                "type": "message_delta",
                "delta": {},
                "usage": { "input_tokens": 0, "output_tokens": 0 }
            })
        );
        assert_eq!(
            serde_json::to_value(&message_stop).expect("message_stop"),
            json!({ "type": "message_stop" })
        );
    }

    #[test]
    fn text_delta_shape() {
        assert_eq!(
            serde_json::to_value(MessageStreamEvent::text_delta("hi\n")).expect("delta"),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": { "type": "text_delta", "text": "hi\n" }
            })
        );
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(next_message_id(), next_message_id());
    }
}
