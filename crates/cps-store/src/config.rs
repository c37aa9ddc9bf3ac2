//! Configuration types for the data store.

use serde::Deserialize;

use crate::error::{CpsError, CpsResult};

/// Configuration for the data store services.
///
/// # Example
///
/// ```rust
/// use cps_store::{SchemaCacheConfig, StoreConfig};
///
/// let config = StoreConfig::builder()
///     .with_schema_cache(SchemaCacheConfig { capacity: 64 })
///     .with_default_query_limit(1_000)
///     .build();
/// assert_eq!(config.schema_cache.capacity, 64);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Schema context cache settings.
    pub schema_cache: SchemaCacheConfig,
    /// Limit applied to CPS path queries that do not pass their own (None = unlimited).
    pub default_query_limit: Option<usize>,
}

impl StoreConfig {
    /// Creates a new builder for StoreConfig.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Reads a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> CpsResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CpsError::data_validation("Invalid store configuration", e.to_string()))
    }
}

/// Builder for StoreConfig.
#[derive(Debug, Clone, Default)]
pub struct StoreConfigBuilder {
    schema_cache: SchemaCacheConfig,
    default_query_limit: Option<usize>,
}

impl StoreConfigBuilder {
    /// Sets the schema context cache configuration.
    pub fn with_schema_cache(mut self, schema_cache: SchemaCacheConfig) -> Self {
        self.schema_cache = schema_cache;
        self
    }

    /// Sets the default query limit.
    pub fn with_default_query_limit(mut self, limit: usize) -> Self {
        self.default_query_limit = Some(limit);
        self
    }

    /// Builds the StoreConfig.
    pub fn build(self) -> StoreConfig {
        StoreConfig {
            schema_cache: self.schema_cache,
            default_query_limit: self.default_query_limit,
        }
    }
}

/// Configuration for the schema context cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchemaCacheConfig {
    /// Maximum number of cached schema contexts (one per schema set).
    pub capacity: usize,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}
