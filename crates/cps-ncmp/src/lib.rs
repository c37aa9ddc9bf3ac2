//! # cps-ncmp
//!
//! Cm-handle inventory on top of [`cps_store`].
//!
//! DMI plugins register the network elements they serve as *cm-handles*. This
//! crate keeps those registrations in a reserved anchor of the data store and
//! provides:
//!
//! - **Registration**: one entry point processing removed, created, updated
//!   and upgraded cm-handles, with a response per cm-handle
//! - **Lifecycle**: batched state transitions (ADVISED, READY, LOCKED,
//!   DELETING, DELETED)
//! - **Trust levels**: effective trust of a cm-handle is the lower of its own
//!   level and its DMI plugin's level
//! - **Queries**: by state, sync state, properties, modules, CPS path, trust
//!   level and DMI plugin, AND-combined
//!
//! ## Quick Start
//!
//! ```rust
//! use cps_ncmp::{DmiPluginRegistration, NcmpInventoryFacade, NcmpServiceCmHandle};
//! use cps_store::CpsStore;
//!
//! let facade = NcmpInventoryFacade::new(CpsStore::new()).unwrap();
//!
//! let mut registration = DmiPluginRegistration::for_plugin("my-dmi-plugin");
//! registration.created_cm_handles = vec![
//!     NcmpServiceCmHandle::new("ch-1").with_alternate_id("fdn-1"),
//!     NcmpServiceCmHandle::new("ch-2").with_alternate_id("fdn-1"),
//! ];
//! let response = facade.update_dmi_registration(&registration).unwrap();
//!
//! // First proposer of an alternate id wins
//! let accepted: Vec<&str> = response
//!     .created_cm_handles
//!     .iter()
//!     .filter(|r| r.is_success())
//!     .map(|r| r.cm_handle_id.as_str())
//!     .collect();
//! assert_eq!(accepted, vec!["ch-1"]);
//! assert_eq!(facade.resolve_cm_handle_id("fdn-1").unwrap(), "ch-1");
//! ```
//!
//! ## With Configuration
//!
//! ```rust
//! use cps_ncmp::{NcmpConfig, NcmpInventoryFacade};
//! use cps_store::CpsStore;
//!
//! let config = NcmpConfig::builder()
//!     .with_delete_batch_size(20)
//!     .build();
//! let facade = NcmpInventoryFacade::with_config(CpsStore::new(), config).unwrap();
//! assert_eq!(facade.inventory().config().delete_batch_size, 20);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          cps-ncmp                            │
//! │                                                              │
//! │  NcmpInventoryFacade                                         │
//! │  ├── CmHandleRegistrationService  remove → create → update   │
//! │  │   ├── CmHandlePropertyHandler           → upgrade         │
//! │  │   └── AlternateIdChecker                                  │
//! │  ├── LcmEventsCmHandleStateHandler  batched transitions      │
//! │  ├── TrustLevelManager              KeyValueCache x2         │
//! │  └── ParameterizedCmHandleQueryService                       │
//! │      └── CmHandleQueryService       one condition each       │
//! │                                                              │
//! │  InventoryPersistence  →  cps-store (NCMP-Admin dataspace)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alternate_id;
mod cache;
mod config;
mod error;
mod facade;
pub mod inventory;
pub mod lcm;
pub mod models;
pub mod query;
pub mod registration;
pub mod state;
pub mod trust;

// Public re-exports
pub use alternate_id::{AlternateIdChecker, Operation};
pub use cache::{ConcurrentKeyValueCache, KeyValueCache};
pub use config::{NcmpConfig, NcmpConfigBuilder};
pub use error::{NcmpError, NcmpResult};
pub use facade::{NcmpCaches, NcmpInventoryFacade};
pub use inventory::InventoryPersistence;
pub use lcm::{CmHandleTransitionPair, LcmEventsCmHandleStateHandler};
pub use models::{
    CmHandleRegistrationResponse, CmHandleState, CompositeState, DataStoreSyncState, DmiPluginRegistration,
    DmiPluginRegistrationResponse, LockReason, LockReasonCategory, NcmpResponseStatus, NcmpServiceCmHandle,
    Property, RegistrationStatus, TrustLevel, UpgradedCmHandles, YangModelCmHandle,
};
pub use query::{
    CmHandleQueryParametersValidator, CmHandleQueryService, CmHandleQueryServiceParameters, ConditionProperties,
    ParameterizedCmHandleQueryService, QueryResult,
};
pub use registration::{CmHandlePropertyHandler, CmHandleRegistrationService};
pub use trust::TrustLevelManager;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _: Option<NcmpConfig> = None;
        let _: Option<NcmpResult<()>> = None;
        let _: Option<CmHandleRegistrationResponse> = None;
        let _ = NcmpCaches::default();
        let _ = CompositeState::default();
    }

    #[test]
    fn test_re_exports() {
        assert_eq!(inventory::NCMP_DMI_REGISTRY_PARENT, "/dmi-registry");
        assert_eq!(TrustLevel::Complete.effective(TrustLevel::Incomplete), TrustLevel::Incomplete);
        assert_eq!(query::HAS_ALL_MODULES, "hasAllModules");
    }
}
