use serde::Deserialize;

/// Where the operator API listens, and how long shutdown may take.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for dispatch workers to finish their current pass
    /// once the listener has stopped.
    pub shutdown_timeout_seconds: u64,
}

impl ServerConfig {
    /// `host:port`, with either half replaced by a command-line override.
    pub fn bind_addr(&self, host: Option<&str>, port: Option<u16>) -> String {
        format!(
            "{}:{}",
            host.unwrap_or(&self.host),
            port.unwrap_or(self.port)
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}
