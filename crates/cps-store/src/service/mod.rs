//! Services over the fragment table.
//!
//! [`CpsStore`] wires one fragment repository, one schema context cache and
//! the services that share them.
//!
//! # Example
//!
//! ```rust
//! use cps_store::{CpsStore, FetchDescendantsOption, YangResource};
//!
//! let store = CpsStore::new();
//! let yang = r#"module stores { container bookstore { list categories { key "code"; } } }"#;
//!
//! store.admin().create_dataspace("my-dataspace").unwrap();
//! store
//!     .admin()
//!     .create_schema_set("my-dataspace", "stores", vec![YangResource::new("stores.yang", yang).unwrap()])
//!     .unwrap();
//! store.admin().create_anchor("my-dataspace", "stores", "my-anchor").unwrap();
//!
//! store
//!     .data()
//!     .save_data("my-dataspace", "my-anchor", r#"{"bookstore": {"categories": [{"code": "1"}]}}"#)
//!     .unwrap();
//!
//! let nodes = store
//!     .query()
//!     .query_data_nodes(
//!         "my-dataspace",
//!         "my-anchor",
//!         "//categories[@code='1']",
//!         FetchDescendantsOption::OMIT_DESCENDANTS,
//!         None,
//!     )
//!     .unwrap();
//! assert_eq!(nodes[0].xpath, "/bookstore/categories[@code='1']");
//! ```

mod data;
mod delta;
mod query;

pub use data::CpsDataService;
pub use delta::CpsDeltaService;
pub use query::CpsQueryService;

use std::sync::Arc;

use crate::admin::CpsAdminService;
use crate::config::StoreConfig;
use crate::fragment::{FragmentRepository, InMemoryFragmentRepository};
use crate::schema::{JsonSchemaService, SchemaContextCache, SchemaService};

/// The data store with its services.
#[derive(Debug, Clone)]
pub struct CpsStore {
    config: StoreConfig,
    admin: Arc<CpsAdminService>,
    data: Arc<CpsDataService>,
    query: Arc<CpsQueryService>,
    delta: Arc<CpsDeltaService>,
}

impl Default for CpsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CpsStore {
    /// An in-memory store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// An in-memory store parsing JSON with [`JsonSchemaService`].
    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(InMemoryFragmentRepository::new()),
            Arc::new(JsonSchemaService),
        )
    }

    /// A store over the given repository and schema service.
    pub fn with_components(
        config: StoreConfig,
        fragments: Arc<dyn FragmentRepository>,
        schema_service: Arc<dyn SchemaService>,
    ) -> Self {
        let admin = Arc::new(CpsAdminService::new(Arc::clone(&fragments)));
        let schemas = Arc::new(SchemaContextCache::new(&config.schema_cache, schema_service));
        let data = Arc::new(CpsDataService::new(
            Arc::clone(&admin),
            Arc::clone(&fragments),
            schemas,
        ));
        let query = Arc::new(CpsQueryService::new(
            Arc::clone(&admin),
            fragments,
            config.default_query_limit,
        ));
        let delta = Arc::new(CpsDeltaService::new(Arc::clone(&data)));
        Self {
            config,
            admin,
            data,
            query,
            delta,
        }
    }

    /// The configuration the store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Dataspaces, schema sets and anchors.
    pub fn admin(&self) -> &Arc<CpsAdminService> {
        &self.admin
    }

    /// Data node CRUD.
    pub fn data(&self) -> &Arc<CpsDataService> {
        &self.data
    }

    /// CPS path queries.
    pub fn query(&self) -> &Arc<CpsQueryService> {
        &self.query
    }

    /// Delta reports.
    pub fn delta(&self) -> &Arc<CpsDeltaService> {
        &self.delta
    }
}
