//! Wire types for calls to the remote send functions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::types::IdempotencyKey;

/// Non-delivery actions a remote function understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeAction {
    Health,
}

/// JSON body POSTed to a channel's remote function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub channel: Channel,
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_params: Option<Map<String, Value>>,
    /// Fresh per call; identifies this HTTP request only.
    pub request_id: String,
    /// Stable across retries of one logical dispatch.
    pub idempotency_key: IdempotencyKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ProbeAction>,
}

impl DispatchRequest {
    /// Build a synthetic health probe for `channel`. The key lives in the
    /// reserved `health:` namespace so it never collides with queue rows.
    pub fn health_probe(channel: Channel) -> Self {
        let request_id = uuid::Uuid::new_v4().to_string();
        Self {
            channel,
            recipients: Vec::new(),
            template_id: None,
            subject: None,
            body: None,
            template_params: None,
            idempotency_key: IdempotencyKey::new(format!("health:{channel}:{request_id}")),
            request_id,
            action: Some(ProbeAction::Health),
        }
    }

    pub fn is_health_probe(&self) -> bool {
        self.action == Some(ProbeAction::Health)
    }
}

/// Normalized reply from a remote function: `{ ok, status, body }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionReply {
    pub ok: bool,
    pub status: u16,
    #[serde(default)]
    pub body: Value,
}

impl FunctionReply {
    pub fn ok(body: Value) -> Self {
        Self {
            ok: true,
            status: 200,
            body,
        }
    }

    pub fn failed(status: u16, body: Value) -> Self {
        Self {
            ok: false,
            status,
            body,
        }
    }

    /// Provider message id, read from `body.id`, `body.message_id` or
    /// `body.external_id`.
    pub fn external_id(&self) -> Option<String> {
        ["id", "message_id", "external_id"]
            .iter()
            .find_map(|field| match self.body.get(*field)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Short human-readable error description taken from the body.
    pub fn error_message(&self) -> String {
        let detail = ["error", "message", "detail"]
            .iter()
            .find_map(|field| self.body.get(*field).and_then(Value::as_str));
        match detail {
            Some(detail) => format!("provider returned status {}: {detail}", self.status),
            None => format!("provider returned status {}", self.status),
        }
    }
}
