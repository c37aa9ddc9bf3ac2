//! # cps-store
//!
//! Path-indexed hierarchical data store for YANG-modelled data.
//!
//! Data is organised in dataspaces; each anchor binds a schema set to one tree
//! of fragments. A fragment is one data node: its xpath, its parent and its
//! leaves. On top of the fragment table this crate provides:
//!
//! - **CPS path queries**: compiled by [`cps_path`] and turned into a
//!   [`FragmentQuery`](query_builder::FragmentQuery) by a single query builder
//!   that owns all escaping
//! - **Descendant prefetch**: bounded breadth-first fetch plus arena-based
//!   tree reassembly ([`to_trees`])
//! - **Delta reports**: structural diff between two data node forests
//! - **Admin and data services**: dataspaces, schema sets, anchors and data
//!   node CRUD with tolerant batch deletes
//!
//! ## Quick Start
//!
//! ```rust
//! use cps_store::{CpsStore, FetchDescendantsOption, YangResource};
//!
//! let store = CpsStore::new();
//! let yang = r#"module stores { container bookstore { list categories { key "code"; } } }"#;
//! store.admin().create_dataspace("ds").unwrap();
//! store
//!     .admin()
//!     .create_schema_set("ds", "stores", vec![YangResource::new("stores.yang", yang).unwrap()])
//!     .unwrap();
//! store.admin().create_anchor("ds", "stores", "shop").unwrap();
//! store
//!     .data()
//!     .save_data("ds", "shop", r#"{"bookstore": {"categories": [{"code": "1"}, {"code": "2"}]}}"#)
//!     .unwrap();
//!
//! let categories = store
//!     .data()
//!     .get_data_nodes("ds", "shop", "/bookstore", FetchDescendantsOption::DIRECT_CHILDREN_ONLY)
//!     .unwrap();
//! assert_eq!(categories[0].child_data_nodes.len(), 2);
//! ```
//!
//! ## With Configuration
//!
//! ```rust
//! use cps_store::{CpsStore, SchemaCacheConfig, StoreConfig};
//!
//! let config = StoreConfig::builder()
//!     .with_schema_cache(SchemaCacheConfig { capacity: 16 })
//!     .with_default_query_limit(1_000)
//!     .build();
//! let store = CpsStore::with_config(config);
//! assert_eq!(store.config().default_query_limit, Some(1_000));
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel` - Converts multi-root results to data nodes with rayon
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         cps-store                            │
//! │                                                              │
//! │  CpsStore                                                    │
//! │  ├── CpsAdminService   dataspaces, schema sets, anchors      │
//! │  ├── CpsDataService    parse → NewFragment → insert/update   │
//! │  ├── CpsQueryService   cps path → FragmentQuery → prefetch   │
//! │  └── CpsDeltaService   DeltaReport (flat, grouped) + apply   │
//! │                                                              │
//! │  Storage:                                                    │
//! │  ├── FragmentRepository (trait)                              │
//! │  └── InMemoryFragmentRepository (hashbrown + parking_lot)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod admin;
mod config;
mod data_node;
pub mod delta;
mod error;
mod fragment;
mod prefetch;
pub mod query_builder;
mod schema;
mod service;
pub mod tree;
mod validation;

// Public re-exports
pub use admin::{
    Anchor, CascadeDeleteAllowed, CpsAdminService, Dataspace, ModuleReference, SchemaSet,
    YangResource,
};
pub use config::{SchemaCacheConfig, StoreConfig, StoreConfigBuilder};
pub use data_node::{Attributes, DataNode, DataNodeBuilder, LeafValue};
pub use delta::{
    get_delta_between_data_nodes, get_grouped_delta_between_data_nodes, DeltaAction, DeltaReport,
    GroupedDeltaReport,
};
pub use error::{CpsError, CpsResult, ErrorKind};
pub use fragment::{
    AnchorId, FragmentEntity, FragmentId, FragmentRepository, InMemoryFragmentRepository,
    NewFragment, ParentConstraint,
};
pub use prefetch::FetchDescendantsOption;
pub use schema::{ContentType, JsonSchemaService, SchemaContext, SchemaContextCache, SchemaService};
pub use service::{CpsDataService, CpsDeltaService, CpsQueryService, CpsStore};
pub use tree::{to_trees, FragmentTree};
pub use validation::CpsValidator;

// Re-export commonly used items from cps-path for convenience
pub use cps_path::xpath::ROOT_XPATH;
pub use cps_path::{CpsPathError, CpsPathQuery};
