use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// One committed entry of the conversation history. Only ever constructed
/// from complete text, never from a partially streamed reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub is_from_user: bool,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            is_from_user: true,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            is_from_user: false,
            text: text.into(),
        }
    }
}

/// A single user prompt bound to one connection.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    pub id: RequestId,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl StreamRequest {
    /// Build a request from raw user input. Surrounding whitespace is trimmed;
    /// empty or whitespace-only input yields `None`.
    pub fn from_input(raw: &str) -> Option<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            id: RequestId::new(),
            text: text.to_owned(),
            submitted_at: Utc::now(),
        })
    }
}
