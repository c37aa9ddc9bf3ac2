//! Domain models of the cm-handle inventory.

pub mod cm_handle;
pub mod composite_state;
pub mod registration;

pub use cm_handle::{NcmpServiceCmHandle, Property, RequiredDmiService, TrustLevel, YangModelCmHandle};
pub use composite_state::{
    current_timestamp, CmHandleState, CompositeState, CompositeStateBuilder, DataStoreSyncState,
    DataStores, LockReason, LockReasonCategory, Operational, TIMESTAMP_FORMAT,
};
pub use registration::{
    CmHandleRegistrationResponse, DmiPluginRegistration, DmiPluginRegistrationResponse,
    NcmpResponseStatus, RegistrationStatus, UpgradedCmHandles,
};
