//! Configuration for the cm-handle inventory.

use serde::Deserialize;

use crate::error::{NcmpError, NcmpResult};

/// Where the inventory keeps its data and how it batches writes.
///
/// # Example
///
/// ```rust
/// use cps_ncmp::NcmpConfig;
///
/// let config = NcmpConfig::builder().with_delete_batch_size(10).build();
/// assert_eq!(config.dataspace, "NCMP-Admin");
/// assert_eq!(config.delete_batch_size, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NcmpConfig {
    /// Dataspace holding the cm-handle registry.
    pub dataspace: String,
    /// Anchor holding the cm-handle registry.
    pub dmi_registry_anchor: String,
    /// Schema set the registry anchor is bound to.
    pub dmi_registry_schema_set: String,
    /// Dataspace holding one schema set and anchor per cm-handle.
    pub operational_dataspace: String,
    /// Cm-handles deleted per store call when removing handles.
    pub delete_batch_size: usize,
    /// Cm-handles written per store call when persisting new handles.
    pub persist_batch_size: usize,
}

impl Default for NcmpConfig {
    fn default() -> Self {
        Self {
            dataspace: "NCMP-Admin".to_string(),
            dmi_registry_anchor: "ncmp-dmi-registry".to_string(),
            dmi_registry_schema_set: "ncmp-dmi-registry-model".to_string(),
            operational_dataspace: "NFP-Operational".to_string(),
            delete_batch_size: 100,
            persist_batch_size: 100,
        }
    }
}

impl NcmpConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> NcmpConfigBuilder {
        NcmpConfigBuilder::default()
    }

    /// Reads a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> NcmpResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| NcmpError::data_validation("Invalid inventory configuration", e.to_string()))
    }
}

/// Builder for NcmpConfig.
#[derive(Debug, Clone, Default)]
pub struct NcmpConfigBuilder {
    config: NcmpConfig,
}

impl NcmpConfigBuilder {
    /// Sets the registry dataspace.
    pub fn with_dataspace(mut self, dataspace: impl Into<String>) -> Self {
        self.config.dataspace = dataspace.into();
        self
    }

    /// Sets the registry anchor.
    pub fn with_dmi_registry_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.config.dmi_registry_anchor = anchor.into();
        self
    }

    /// Sets the registry schema set.
    pub fn with_dmi_registry_schema_set(mut self, schema_set: impl Into<String>) -> Self {
        self.config.dmi_registry_schema_set = schema_set.into();
        self
    }

    /// Sets the per-cm-handle module dataspace.
    pub fn with_operational_dataspace(mut self, dataspace: impl Into<String>) -> Self {
        self.config.operational_dataspace = dataspace.into();
        self
    }

    /// Sets the delete batch size (at least 1).
    pub fn with_delete_batch_size(mut self, size: usize) -> Self {
        self.config.delete_batch_size = size.max(1);
        self
    }

    /// Sets the persist batch size (at least 1).
    pub fn with_persist_batch_size(mut self, size: usize) -> Self {
        self.config.persist_batch_size = size.max(1);
        self
    }

    /// Builds the NcmpConfig.
    pub fn build(self) -> NcmpConfig {
        self.config
    }
}
