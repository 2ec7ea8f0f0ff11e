use std::collections::HashMap;

use serde::Deserialize;

use courier_core::Channel;

/// Configuration for one channel's send function.
///
/// # Example
///
/// ```toml
/// [[functions]]
/// channel = "email"
/// name = "send-email"
/// url = "https://project.functions.example.com/send-email"
/// token_env = "COURIER_FUNCTION_TOKEN"
///
/// [[functions]]
/// channel = "sms"
/// kind = "log"
/// ```
#[derive(Debug, Deserialize)]
pub struct FunctionSection {
    pub channel: Channel,
    /// Function name used in logs. Defaults to `send-{channel}`.
    pub name: Option<String>,
    #[serde(default)]
    pub kind: FunctionKind,
    /// Endpoint URL (required for `"http"`).
    pub url: Option<String>,
    /// Per-request HTTP timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Name of the environment variable holding the bearer token.
    pub token_env: Option<String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl FunctionSection {
    pub fn function_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("send-{}", self.channel))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    #[default]
    Http,
    Log,
}
