//! Lifecycle state of a cm-handle, as persisted under `.../cm-handles[@id]/state`.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use cps_store::DataNode;
use serde::{Deserialize, Serialize};

use crate::error::{NcmpError, NcmpResult};

/// Timestamp format of `last-update-time` and `last-sync-time`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// The current time formatted with [`TIMESTAMP_FORMAT`].
pub fn current_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle state of a cm-handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmHandleState {
    /// Registered, module sync pending.
    #[default]
    Advised,
    /// Modules synced; usable.
    Ready,
    /// Sync or upgrade failed or in progress.
    Locked,
    /// Removal in progress.
    Deleting,
    /// Removed.
    Deleted,
}

impl CmHandleState {
    /// The persisted spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            CmHandleState::Advised => "ADVISED",
            CmHandleState::Ready => "READY",
            CmHandleState::Locked => "LOCKED",
            CmHandleState::Deleting => "DELETING",
            CmHandleState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for CmHandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmHandleState {
    type Err = NcmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADVISED" => Ok(CmHandleState::Advised),
            "READY" => Ok(CmHandleState::Ready),
            "LOCKED" => Ok(CmHandleState::Locked),
            "DELETING" => Ok(CmHandleState::Deleting),
            "DELETED" => Ok(CmHandleState::Deleted),
            other => Err(NcmpError::data_validation(
                "Invalid cm-handle state",
                format!("'{other}' is not a cm-handle state"),
            )),
        }
    }
}

/// Why a cm-handle is LOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReasonCategory {
    /// Module sync failed.
    ModuleSyncFailed,
    /// Module upgrade requested.
    ModuleUpgrade,
    /// Module upgrade failed.
    ModuleUpgradeFailed,
    /// The DMI plugin misbehaved.
    LockedMisbehaving,
}

/// Sync state of the operational datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStoreSyncState {
    /// Data synced.
    Synchronized,
    /// Sync enabled but not yet done.
    Unsynchronized,
    /// Sync failed.
    Failed,
    /// Sync disabled.
    NoneRequested,
}

impl DataStoreSyncState {
    /// The persisted spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStoreSyncState::Synchronized => "SYNCHRONIZED",
            DataStoreSyncState::Unsynchronized => "UNSYNCHRONIZED",
            DataStoreSyncState::Failed => "FAILED",
            DataStoreSyncState::NoneRequested => "NONE_REQUESTED",
        }
    }
}

impl fmt::Display for DataStoreSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CompositeState
// ============================================================================

/// Category and detail of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReason {
    /// Lock category; cleared when a locked handle is retried.
    #[serde(rename = "reason", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<LockReasonCategory>,
    /// Free text, e.g. the requested module set tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LockReason {
    /// Creates a lock reason.
    pub fn new(category: LockReasonCategory, details: impl Into<String>) -> Self {
        Self {
            category: Some(category),
            details: Some(details.into()),
        }
    }
}

/// Operational datastore status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Operational {
    /// Sync state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_state: Option<DataStoreSyncState>,
    /// When the data was last synced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
}

/// Datastores of a cm-handle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataStores {
    /// The operational datastore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operational: Option<Operational>,
}

/// State, lock reason and datastore sync status of a cm-handle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompositeState {
    /// Lifecycle state.
    pub cm_handle_state: CmHandleState,
    /// Set while LOCKED, kept across a retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_reason: Option<LockReason>,
    /// When the state last changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Whether operational data is synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sync_enabled: Option<bool>,
    /// Datastore sync status.
    #[serde(rename = "datastores", skip_serializing_if = "Option::is_none")]
    pub data_stores: Option<DataStores>,
}

impl CompositeState {
    /// Starts a builder.
    pub fn builder() -> CompositeStateBuilder {
        CompositeStateBuilder::default()
    }

    /// Reads a composite state from its `state` data node.
    pub fn from_data_node(node: &DataNode) -> NcmpResult<Self> {
        Ok(serde_json::from_value(node.to_json_value())?)
    }

    /// Stamps `last-update-time` with the current time.
    pub fn set_last_update_time_now(&mut self) {
        self.last_update_time = Some(current_timestamp());
    }

    /// Sync state of the operational datastore, if recorded.
    pub fn operational_sync_state(&self) -> Option<DataStoreSyncState> {
        self.data_stores
            .as_ref()
            .and_then(|stores| stores.operational.as_ref())
            .and_then(|operational| operational.sync_state)
    }
}

/// Builder for [`CompositeState`].
#[derive(Debug, Clone, Default)]
pub struct CompositeStateBuilder {
    state: CompositeState,
}

impl CompositeStateBuilder {
    /// Sets the state and stamps the update time.
    pub fn with_cm_handle_state(mut self, state: CmHandleState) -> Self {
        self.state.cm_handle_state = state;
        self.state.set_last_update_time_now();
        self
    }

    /// Sets the lock reason.
    pub fn with_lock_reason(mut self, category: LockReasonCategory, details: impl Into<String>) -> Self {
        self.state.lock_reason = Some(LockReason::new(category, details));
        self
    }

    /// Sets the operational sync state.
    pub fn with_operational_data_stores(mut self, sync_state: DataStoreSyncState, last_sync_time: Option<String>) -> Self {
        self.state.data_stores = Some(DataStores {
            operational: Some(Operational {
                sync_state: Some(sync_state),
                last_sync_time,
            }),
        });
        self
    }

    /// Sets the data sync flag.
    pub fn with_data_sync_enabled(mut self, enabled: bool) -> Self {
        self.state.data_sync_enabled = Some(enabled);
        self
    }

    /// Builds the state.
    pub fn build(self) -> CompositeState {
        self.state
    }
}
