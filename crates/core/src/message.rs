//! The unit exchanged over the framed channel and the HTTP control plane.
//!
//! A request carries `command` + `data` + `id`; a response carries the same
//! `id` with `success` and either `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved command sent by the peer once per connection.
pub const REGISTER_COMMAND: &str = "register";

/// Periodic liveness message from the peer. Never answered.
pub const KEEPALIVE_COMMAND: &str = "keepalive";

/// Error string used for synthesized deadline replies.
pub const TIMEOUT_ERROR: &str = "Timeout";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Message {
    pub fn request(id: impl Into<String>, command: &str, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            command: Some(command.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: Some(true),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: Some(false),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn timeout(id: impl Into<String>) -> Self {
        Self::failure(id, TIMEOUT_ERROR)
    }

    /// A message without a command is a reply to an earlier request.
    pub fn is_response(&self) -> bool {
        self.command.is_none()
    }

    /// Case-insensitive match on the command token.
    pub fn is_command(&self, token: &str) -> bool {
        self.command
            .as_deref()
            .map(|c| c.eq_ignore_ascii_case(token))
            .unwrap_or(false)
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Look up a string field in `data`, treating empty strings as absent.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(false)
    }
}
