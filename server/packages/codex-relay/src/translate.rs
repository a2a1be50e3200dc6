//! Maps Codex `exec --json` output lines to text fragments for the client.

use serde_json::Value;

pub const TURN_COMPLETED_MARKER: &str = "[turn.completed]";
const ITEM_COMPLETED: &str = "item.completed";

/// Item kinds whose `text` is forwarded to the client as-is.
const CONVERSATIONAL_ITEM_KINDS: &[&str] = &["agent_message", "reasoning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateMode {
    /// Readable summaries of known events.
    Pretty,
    /// Every line forwarded untouched.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentItem {
    pub kind: String,
    pub text: Option<String>,
}

impl AgentItem {
    /// Returns `None` when `value` is not an object.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self {
            kind: object
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            text: object
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    ItemCompleted { item: Option<AgentItem> },
    TurnCompleted,
    Other { kind: String },
}

impl AgentEvent {
    /// Returns `None` when the line is not a JSON object.
    pub fn parse(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let object = value.as_object()?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("event");

        Some(match kind {
            ITEM_COMPLETED => Self::ItemCompleted {
                item: object.get("item").and_then(AgentItem::from_value),
            },
            "turn.completed" => Self::TurnCompleted,
            other => Self::Other {
                kind: other.to_string(),
            },
        })
    }
}

/// One translated output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub text: String,
    pub turn_completed: bool,
}

/// Translates one line of agent stdout. Blank lines and empty fragments yield `None`.
pub fn translate_line(line: &str, mode: TranslateMode) -> Option<Translation> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let translation = match mode {
        TranslateMode::Raw => passthrough(line),
        TranslateMode::Pretty => match AgentEvent::parse(line) {
            None => passthrough(line),
            Some(AgentEvent::TurnCompleted) => Translation {
                text: TURN_COMPLETED_MARKER.to_string(),
                turn_completed: true,
            },
            Some(AgentEvent::ItemCompleted { item }) => match item {
                Some(AgentItem {
                    kind,
                    text: Some(text),
                }) if CONVERSATIONAL_ITEM_KINDS.contains(&kind.as_str()) => Translation {
                    text,
                    turn_completed: false,
                },
                Some(_) => passthrough(line),
                None => Translation {
                    text: ITEM_COMPLETED.to_string(),
                    turn_completed: false,
                },
            },
            Some(AgentEvent::Other { kind }) => Translation {
                text: kind,
                turn_completed: false,
            },
        },
    };

    (!translation.text.is_empty()).then_some(translation)
}

fn passthrough(line: &str) -> Translation {
    Translation {
        text: line.to_string(),
        turn_completed: false,
    }
}
