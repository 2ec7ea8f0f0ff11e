use std::collections::HashMap;
use std::sync::Arc;

use courier_core::Channel;

use crate::provider::DynProvider;

/// Maps each channel to the remote function that delivers on it.
///
/// Built once at startup and then shared immutably (usually inside an
/// `Arc`).
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn DynProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own channel, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn DynProvider>) {
        self.providers.insert(provider.channel(), provider);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn DynProvider>> {
        self.providers.get(&channel).cloned()
    }

    /// Registered channels in stable order.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.providers.keys().copied().collect();
        channels.sort_unstable();
        channels
    }

    /// Iterate over every registered provider in channel order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn DynProvider>> + '_ {
        self.channels()
            .into_iter()
            .filter_map(|channel| self.get(channel))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogFunction;

    #[test]
    fn empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(Channel::Email).is_none());
    }

    #[test]
    fn register_and_lookup_by_channel() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(LogFunction::new("send-email", Channel::Email)));
        registry.register(Arc::new(LogFunction::new("send-sms", Channel::Sms)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.channels(), vec![Channel::Email, Channel::Sms]);
        assert_eq!(registry.get(Channel::Sms).unwrap().name(), "send-sms");
        assert!(registry.get(Channel::Whatsapp).is_none());
    }

    #[test]
    fn register_replaces_same_channel() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(LogFunction::new("old", Channel::Email)));
        registry.register(Arc::new(LogFunction::new("new", Channel::Email)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(Channel::Email).unwrap().name(), "new");
    }

    #[test]
    fn iter_follows_channel_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(LogFunction::new("send-sms", Channel::Sms)));
        registry.register(Arc::new(LogFunction::new("send-email", Channel::Email)));
        let names: Vec<String> = registry.iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, vec!["send-email", "send-sms"]);
    }
}
