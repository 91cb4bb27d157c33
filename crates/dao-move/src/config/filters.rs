//! Ordered transforms applied to a service's configuration at read time.

use std::fmt;
use std::sync::Arc;

use super::ServiceConfig;

/// One configuration transform.
pub type ConfigFilter = Arc<dyn Fn(ServiceConfig) -> ServiceConfig + Send + Sync>;

/// Ordered list of configuration transforms.
///
/// Owned by whoever constructs the orchestrator and injected into it; filters run
/// in registration order every time a service configuration is read.
#[derive(Clone, Default)]
pub struct ConfigFilters {
    filters: Vec<ConfigFilter>,
}

impl ConfigFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter.
    pub fn push<F>(&mut self, filter: F)
    where
        F: Fn(ServiceConfig) -> ServiceConfig + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(filter));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with<F>(mut self, filter: F) -> Self
    where
        F: Fn(ServiceConfig) -> ServiceConfig + Send + Sync + 'static,
    {
        self.push(filter);
        self
    }

    /// Run every filter in order.
    pub fn apply(&self, config: ServiceConfig) -> ServiceConfig {
        self.filters.iter().fold(config, |acc, filter| filter(acc))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl fmt::Debug for ConfigFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigFilters")
            .field("len", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_apply_in_order() {
        let filters = ConfigFilters::new()
            .with(|c| c.with_prefix("a_"))
            .with(|c| {
                let prefix = format!("{}b_", c.prefix.clone().unwrap_or_default());
                c.with_prefix(prefix)
            });

        let out = filters.apply(ServiceConfig::default());
        assert_eq!(out.prefix.as_deref(), Some("a_b_"));
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_empty_filters_are_identity() {
        let filters = ConfigFilters::default();
        let config = ServiceConfig::default().with_value("k", "v");
        assert!(filters.is_empty());
        assert_eq!(filters.apply(config.clone()), config);
    }
}
