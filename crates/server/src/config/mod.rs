mod audit;
mod background;
mod executor;
mod functions;
mod health;
mod queue;
mod server;

#[cfg(test)]
mod tests;

pub use audit::*;
pub use background::*;
pub use executor::*;
pub use functions::*;
pub use health::*;
pub use queue::*;
pub use server::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the Courier server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct CourierConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Pending action queue and automation registry backend.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Automation log backend.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Dispatch executor configuration.
    #[serde(default)]
    pub executor: ExecutorSection,
    /// Send function definitions, one per channel.
    ///
    /// Supported kinds: `"http"` (POST to a deployed function) and `"log"`
    /// (logs and replies ok).
    #[serde(default)]
    pub functions: Vec<FunctionSection>,
    /// Health probe configuration.
    #[serde(default)]
    pub health: HealthConfig,
    /// Background worker configuration.
    #[serde(default)]
    pub background: BackgroundSection,
}

impl CourierConfig {
    /// Read `path`, or fall back to defaults when the file does not exist.
    ///
    /// Returns the config and whether the file was found.
    pub fn load(path: &Path) -> Result<(Self, bool), ServerError> {
        if !path.exists() {
            return Ok((Self::default(), false));
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Ok((config, true))
    }
}
