//! Configuration registry.
//!
//! Loads per-context configurations from the store, caches successful loads
//! and falls back to the built-in default whenever the stored document is
//! missing, malformed, fails validation, or the store is unreachable.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use nestguard_core::defaults::CONFIG_CACHE_TTL_SECS;
use nestguard_core::{
    logging, Clock, ConfigStore, Configuration, Context, Error, Result, StoredConfiguration,
    SystemClock,
};

use crate::cache::{ConfigCache, TtlCache};

/// Runtime settings for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: CONFIG_CACHE_TTL_SECS,
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CONFIG_CACHE_TTL_SECS` | `300` | Configuration cache TTL |
    pub fn from_env() -> Self {
        let cache_ttl_secs = std::env::var("CONFIG_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(CONFIG_CACHE_TTL_SECS);

        Self { cache_ttl_secs }
    }

    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }
}

/// Loads and caches scoring/decision configuration.
pub struct ConfigurationRegistry {
    store: Arc<dyn ConfigStore>,
    cache: Arc<dyn ConfigCache>,
    clock: Arc<dyn Clock>,
}

impl ConfigurationRegistry {
    pub fn new(store: Arc<dyn ConfigStore>, cache: Arc<dyn ConfigCache>) -> Self {
        Self {
            store,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Registry with a [`TtlCache`] on the system clock.
    pub fn with_config(store: Arc<dyn ConfigStore>, config: RegistryConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ConfigStore>,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = TtlCache::new(Duration::from_secs(config.cache_ttl_secs), clock.clone());
        Self {
            store,
            cache: Arc::new(cache),
            clock,
        }
    }

    /// Load the configuration for `(context, scope_id)`.
    ///
    /// Never fails: any store, parse or validation problem yields the
    /// built-in default for the context. Only successful loads are cached.
    #[instrument(skip(self), fields(subsystem = logging::SUBSYSTEM_CONFIG, context = %context))]
    pub async fn load(&self, context: &Context, scope_id: Option<&str>) -> Arc<Configuration> {
        let key = (context.clone(), scope_id.map(String::from));
        if let Some(hit) = self.cache.get(&key) {
            debug!(version = hit.version, "Configuration cache hit");
            return hit;
        }

        match self.fetch(context, scope_id).await {
            Ok(config) => {
                debug!(version = config.version, "Configuration loaded");
                let config = Arc::new(config);
                self.cache.insert(key, config.clone());
                config
            }
            Err(e) => {
                warn!(error = %e, "Falling back to built-in configuration");
                Arc::new(Configuration::builtin(context))
            }
        }
    }

    async fn fetch(&self, context: &Context, scope_id: Option<&str>) -> Result<Configuration> {
        let mut stored = None;
        if let Some(scope) = scope_id {
            stored = self.read(context, Some(scope)).await?;
        }
        if stored.is_none() {
            stored = self.read(context, None).await?;
        }

        match stored {
            Some(doc) => parse_stored(doc),
            None => {
                debug!("No stored configuration, using built-in default");
                Ok(Configuration::builtin(context))
            }
        }
    }

    async fn read(
        &self,
        context: &Context,
        scope_id: Option<&str>,
    ) -> Result<Option<StoredConfiguration>> {
        self.store
            .get(context, scope_id)
            .await
            .map_err(|e| Error::ConfigurationLoad(e.to_string()))
    }

    /// Clear every cached scope of `context` immediately.
    pub fn invalidate(&self, context: &Context) -> usize {
        let removed = self.cache.invalidate_context(context);
        debug!(
            subsystem = logging::SUBSYSTEM_CONFIG,
            context = %context,
            removed,
            "Configuration cache invalidated"
        );
        removed
    }

    /// Validate and store an administrative update, then invalidate.
    ///
    /// Returns the version assigned to the stored document.
    #[instrument(skip(self, config), fields(subsystem = logging::SUBSYSTEM_CONFIG, context = %config.context))]
    pub async fn update(&self, mut config: Configuration) -> Result<u32> {
        config.validate()?;

        let current = self
            .read(&config.context, config.scope_id.as_deref())
            .await?
            .map(|doc| doc.version)
            .unwrap_or(0);
        let version = current.max(config.version) + 1;
        config.version = version;

        let doc = StoredConfiguration {
            context: config.context.clone(),
            scope_id: config.scope_id.clone(),
            version,
            body: serde_json::to_value(&config)?,
            updated_at: self.clock.now(),
        };
        self.store.put(doc).await?;
        self.invalidate(&config.context);

        info!(version, "Configuration updated");
        Ok(version)
    }

    /// List stored configurations.
    pub async fn list(&self, context: Option<&Context>) -> Result<Vec<StoredConfiguration>> {
        self.store.list(context).await
    }
}

/// Decode and validate a stored document.
pub fn parse_stored(doc: StoredConfiguration) -> Result<Configuration> {
    let mut config: Configuration = serde_json::from_value(doc.body)?;
    if config.context != doc.context {
        return Err(Error::InvalidConfiguration(format!(
            "document context '{}' does not match key '{}'",
            config.context, doc.context
        )));
    }
    config.version = doc.version;
    config.scope_id = doc.scope_id;
    config.validate()?;
    Ok(config)
}
