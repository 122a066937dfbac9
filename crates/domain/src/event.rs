use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for engine output and turn input.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One user-submitted input to an ongoing conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Events produced by the conversational engine while it processes turns.
///
/// The engine is opaque; only two facts about its output matter to the
/// session layer: a `system` event with subtype `init` carries the engine's
/// conversation id, and a `result` event ends the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Engine bookkeeping (`init` acknowledgment, status notices).
    System {
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(flatten)]
        data: serde_json::Map<String, serde_json::Value>,
    },

    /// Assistant output (text, tool use) for the current turn.
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: serde_json::Value,
    },

    /// Echoed user-side content (tool results fed back by the engine).
    User {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        message: serde_json::Value,
    },

    /// Terminal event: the current turn is fully resolved.
    Result {
        subtype: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Any event type this crate does not model.
    #[serde(other)]
    Unknown,
}

impl EngineEvent {
    /// Build the `system/init` acknowledgment for a conversation id.
    pub fn init(session_id: impl Into<String>) -> Self {
        Self::System {
            subtype: "init".into(),
            session_id: Some(session_id.into()),
            data: serde_json::Map::new(),
        }
    }

    /// Whether this event resolves the in-flight turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    /// The conversation id carried by an `init` acknowledgment, if any.
    pub fn init_session_id(&self) -> Option<&str> {
        match self {
            Self::System {
                subtype,
                session_id: Some(id),
                ..
            } if subtype == "init" => Some(id.as_str()),
            _ => None,
        }
    }

    /// Short event name (used as the SSE `event:` field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Assistant { .. } => "assistant",
            Self::User { .. } => "user",
            Self::Result { .. } => "result",
            Self::Unknown => "unknown",
        }
    }
}

/// Token usage reported with a `result` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}
