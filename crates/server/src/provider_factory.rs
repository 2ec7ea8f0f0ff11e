use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use courier_provider::{FunctionConfig, HttpFunction, LogFunction, ProviderRegistry};

use crate::config::{FunctionKind, FunctionSection};
use crate::error::ServerError;

/// Build the send function registry from `[[functions]]`.
///
/// Bearer tokens are read from the environment variable each entry names.
/// All HTTP functions share one client.
pub fn create_providers(functions: &[FunctionSection]) -> Result<ProviderRegistry, ServerError> {
    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| ServerError::Config(format!("http client: {e}")))?;
    let mut registry = ProviderRegistry::new();

    for section in functions {
        let name = section.function_name();
        if registry.get(section.channel).is_some() {
            return Err(ServerError::Config(format!(
                "more than one function configured for channel {}",
                section.channel
            )));
        }
        match section.kind {
            FunctionKind::Log => {
                registry.register(Arc::new(LogFunction::new(&name, section.channel)));
            }
            FunctionKind::Http => {
                let url = section.url.as_deref().ok_or_else(|| {
                    ServerError::Config(format!("function {name} requires a url"))
                })?;
                let mut config = FunctionConfig::new(&name, section.channel, url);
                if let Some(var) = &section.token_env {
                    match std::env::var(var) {
                        Ok(token) => config = config.with_bearer_token(token),
                        Err(_) => warn!(function = %name, env = %var, "token variable not set"),
                    }
                }
                for (key, value) in &section.headers {
                    config = config.with_header(key, value);
                }
                let mut function = HttpFunction::new(config, client.clone());
                if let Some(ms) = section.timeout_ms {
                    function = function.with_timeout(Duration::from_millis(ms));
                }
                registry.register(Arc::new(function));
            }
        }
        info!(
            function = %name,
            channel = %section.channel,
            kind = ?section.kind,
            "send function registered"
        );
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Channel;
    use courier_provider::DynProvider;

    fn section(channel: Channel, kind: FunctionKind, url: Option<&str>) -> FunctionSection {
        FunctionSection {
            channel,
            name: None,
            kind,
            url: url.map(str::to_owned),
            timeout_ms: None,
            token_env: None,
            headers: std::collections::HashMap::new(),
        }
    }

    #[test]
    fn registers_one_function_per_channel() {
        let registry = create_providers(&[
            section(Channel::Email, FunctionKind::Http, Some("http://localhost:1/send")),
            section(Channel::Sms, FunctionKind::Log, None),
        ])
        .unwrap();
        assert_eq!(registry.channels(), vec![Channel::Email, Channel::Sms]);
        assert_eq!(registry.get(Channel::Sms).unwrap().name(), "send-sms");
    }

    #[test]
    fn http_function_needs_a_url() {
        let err = create_providers(&[section(Channel::Email, FunctionKind::Http, None)])
            .err()
            .unwrap();
        assert!(err.to_string().contains("requires a url"));
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        let err = create_providers(&[
            section(Channel::Sms, FunctionKind::Log, None),
            section(Channel::Sms, FunctionKind::Log, None),
        ])
        .err()
        .unwrap();
        assert!(err.to_string().contains("channel sms"));
    }
}
