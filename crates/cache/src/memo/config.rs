//! Memo cache configuration types and builder
//!
//! A memo cache needs no configuration to work. These settings only affect
//! how the cache reports itself: the name carried by its log records and
//! whether it keeps access counters.

/// Name used when none is configured
pub const DEFAULT_CACHE_NAME: &str = "memo";

/// Configuration for memo cache behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoConfig {
    /// Name reported in every log record emitted by the cache
    pub name: String,

    /// Whether to collect hit/computation/failure counters
    pub track_metrics: bool,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self { name: DEFAULT_CACHE_NAME.to_string(), track_metrics: true }
    }
}

impl MemoConfig {
    /// Create a new configuration builder
    pub fn builder() -> MemoConfigBuilder {
        MemoConfigBuilder::default()
    }

    /// Quick preset for a named cache with default settings
    ///
    /// # Example
    /// ```
    /// use coalesce_cache::MemoConfig;
    ///
    /// let config = MemoConfig::named("schema-lookups");
    /// assert_eq!(config.name, "schema-lookups");
    /// ```
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

/// Builder for `MemoConfig` with fluent API
#[derive(Debug, Default)]
pub struct MemoConfigBuilder {
    config: MemoConfig,
}

impl MemoConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name reported in log records
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Enable or disable metrics tracking
    pub const fn track_metrics(mut self, enabled: bool) -> Self {
        self.config.track_metrics = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MemoConfig {
        self.config
    }
}
