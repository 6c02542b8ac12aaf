//! Provider registry - providers looked up by name

use crate::core::Target;
use crate::error::{ProvisionError, Result};
use crate::provider::ProviderFacade;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Name-keyed set of providers for one target kind
///
/// Registration normally happens once at startup; lookups may happen from
/// many tasks concurrently.
pub struct ProviderRegistry<T: Target> {
    providers: RwLock<BTreeMap<String, Arc<dyn ProviderFacade<T>>>>,
}

impl<T: Target> ProviderRegistry<T> {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a provider under its own name
    ///
    /// # Panics
    ///
    /// Panics if the name is empty or already registered. Registration is
    /// start-up wiring, so either is a programming error.
    pub fn register(&self, provider: Arc<dyn ProviderFacade<T>>) {
        if let Err(err) = self.try_register(provider) {
            panic!("{}", err);
        }
    }

    /// Register a provider, reporting a duplicate name as an error
    pub fn try_register(&self, provider: Arc<dyn ProviderFacade<T>>) -> Result<()> {
        let name = provider.name().to_string();
        if name.trim().is_empty() {
            return Err(ProvisionError::Config(format!(
                "{} provider registered with an empty name",
                T::KIND
            )));
        }

        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&name) {
            return Err(ProvisionError::DuplicateProvider(name));
        }
        info!(kind = T::KIND, provider = %name, "registered provider");
        providers.insert(name, provider);
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn ProviderFacade<T>>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownProvider(name.to_string()))
    }

    /// Registered provider names, sorted
    pub fn providers(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Target> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cluster, PipelineDefinition};
    use crate::provider::DelegateProvider;

    fn provider(name: &str) -> Arc<dyn ProviderFacade<Cluster>> {
        let definition: PipelineDefinition<Cluster> = PipelineDefinition::builder().build().unwrap();
        Arc::new(DelegateProvider::new(name, definition))
    }

    #[test]
    fn test_providers_are_sorted() {
        let registry = ProviderRegistry::new();
        registry.register(provider("kubeadm"));
        registry.register(provider("k3s"));
        registry.register(provider("bke"));

        assert_eq!(registry.providers(), vec!["bke", "k3s", "kubeadm"]);
        assert_eq!(registry.get_provider("k3s").unwrap().name(), "k3s");
    }

    #[test]
    fn test_unknown_provider() {
        let registry: ProviderRegistry<Cluster> = ProviderRegistry::new();
        let err = registry.get_provider("nope").err().unwrap();
        assert!(matches!(err, ProvisionError::UnknownProvider(ref n) if n == "nope"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_try_register_duplicate() {
        let registry = ProviderRegistry::new();
        registry.try_register(provider("kubeadm")).unwrap();
        let err = registry.try_register(provider("kubeadm")).unwrap_err();
        assert!(matches!(err, ProvisionError::DuplicateProvider(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_register_duplicate_panics() {
        let registry = ProviderRegistry::new();
        registry.register(provider("kubeadm"));
        registry.register(provider("kubeadm"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = ProviderRegistry::new();
        assert!(registry.try_register(provider(" ")).is_err());
        assert!(registry.is_empty());
    }
}
