//! Input-side wire messages for the process engine.
//!
//! Each message is a single line of JSON (newline-delimited).  Output lines
//! decode directly into [`aw_domain::EngineEvent`].

use serde::{Deserialize, Serialize};

use aw_domain::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user turn as written to the engine's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: UserMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub role: String,
    pub content: String,
}

impl From<&Turn> for UserInput {
    fn from(turn: &Turn) -> Self {
        Self {
            kind: "user".into(),
            message: UserMessage {
                role: "user".into(),
                content: turn.text.clone(),
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An out-of-band control request (e.g. interrupt).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub request: ControlBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlBody {
    pub subtype: String,
}

impl ControlRequest {
    pub fn interrupt(request_id: impl Into<String>) -> Self {
        Self {
            kind: "control_request".into(),
            request_id: request_id.into(),
            request: ControlBody {
                subtype: "interrupt".into(),
            },
        }
    }
}
