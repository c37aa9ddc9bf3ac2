//! Composite state transitions. Every helper stamps `last-update-time`.

use crate::models::{CmHandleState, CompositeState, DataStoreSyncState, DataStores, Operational};

/// Moves `composite_state` to `state`.
pub fn set_composite_state(state: CmHandleState, composite_state: &mut CompositeState) {
    composite_state.cm_handle_state = state;
    composite_state.set_last_update_time_now();
}

/// Resets data sync on a handle becoming READY: sync disabled, nothing requested.
pub fn set_initial_data_store_sync_state(composite_state: &mut CompositeState) {
    composite_state.data_sync_enabled = Some(false);
    set_operational_sync_state(DataStoreSyncState::NoneRequested, composite_state);
}

/// Sets the data sync flag and the matching operational sync state.
pub fn set_data_sync_enabled_flag_with_data_sync_state(enabled: bool, composite_state: &mut CompositeState) {
    composite_state.data_sync_enabled = Some(enabled);
    let sync_state = if enabled {
        DataStoreSyncState::Unsynchronized
    } else {
        DataStoreSyncState::NoneRequested
    };
    set_operational_sync_state(sync_state, composite_state);
}

/// Re-queues a LOCKED handle: back to ADVISED keeping only the lock details.
pub fn set_composite_state_for_retry(composite_state: &mut CompositeState) {
    if let Some(lock_reason) = composite_state.lock_reason.as_mut() {
        lock_reason.category = None;
    }
    set_composite_state(CmHandleState::Advised, composite_state);
}

fn set_operational_sync_state(sync_state: DataStoreSyncState, composite_state: &mut CompositeState) {
    let data_stores = composite_state.data_stores.get_or_insert_with(DataStores::default);
    let operational = data_stores.operational.get_or_insert_with(Operational::default);
    operational.sync_state = Some(sync_state);
    composite_state.set_last_update_time_now();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LockReasonCategory;

    #[test]
    fn test_set_state_stamps_time() {
        let mut state = CompositeState::default();
        assert!(state.last_update_time.is_none());
        set_composite_state(CmHandleState::Ready, &mut state);
        assert_eq!(state.cm_handle_state, CmHandleState::Ready);
        assert!(state.last_update_time.is_some());
    }

    #[test]
    fn test_initial_sync_state() {
        let mut state = CompositeState::default();
        set_initial_data_store_sync_state(&mut state);
        assert_eq!(state.data_sync_enabled, Some(false));
        assert_eq!(state.operational_sync_state(), Some(DataStoreSyncState::NoneRequested));
    }

    #[test]
    fn test_data_sync_flag() {
        let mut state = CompositeState::default();
        set_data_sync_enabled_flag_with_data_sync_state(true, &mut state);
        assert_eq!(state.operational_sync_state(), Some(DataStoreSyncState::Unsynchronized));
        set_data_sync_enabled_flag_with_data_sync_state(false, &mut state);
        assert_eq!(state.data_sync_enabled, Some(false));
        assert_eq!(state.operational_sync_state(), Some(DataStoreSyncState::NoneRequested));
    }

    #[test]
    fn test_retry_keeps_only_the_lock_details() {
        let mut state = CompositeState::builder()
            .with_cm_handle_state(CmHandleState::Locked)
            .with_lock_reason(LockReasonCategory::ModuleSyncFailed, "timeout")
            .build();
        set_composite_state_for_retry(&mut state);
        assert_eq!(state.cm_handle_state, CmHandleState::Advised);
        let lock_reason = state.lock_reason.unwrap();
        assert_eq!(lock_reason.category, None);
        assert_eq!(lock_reason.details.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_retry_without_lock_reason() {
        let mut state = CompositeState::builder()
            .with_cm_handle_state(CmHandleState::Locked)
            .build();
        set_composite_state_for_retry(&mut state);
        assert_eq!(state.cm_handle_state, CmHandleState::Advised);
        assert!(state.lock_reason.is_none());
    }
}
