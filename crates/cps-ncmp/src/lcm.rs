//! Batched cm-handle state transitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::NcmpResult;
use crate::inventory::InventoryPersistence;
use crate::models::{CmHandleState, CompositeState, YangModelCmHandle};
use crate::state::{set_composite_state, set_composite_state_for_retry, set_initial_data_store_sync_state};

/// A handle before and after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmHandleTransitionPair {
    /// Handle as it was.
    pub current: YangModelCmHandle,
    /// Handle with the new state.
    pub target: YangModelCmHandle,
}

/// Applies state transitions and persists them in as few store calls as possible.
#[derive(Debug)]
pub struct LcmEventsCmHandleStateHandler {
    inventory: Arc<InventoryPersistence>,
}

impl LcmEventsCmHandleStateHandler {
    /// Creates a handler persisting through `inventory`.
    pub fn new(inventory: Arc<InventoryPersistence>) -> Self {
        Self { inventory }
    }

    /// Moves each handle to its target state.
    ///
    /// Handles already in their target state are skipped. Handles without a
    /// state are new and saved whole; DELETED transitions are not persisted;
    /// every other state is saved in one batch.
    pub fn update_cm_handle_state_batch(
        &self,
        targets: Vec<(YangModelCmHandle, CmHandleState)>,
    ) -> NcmpResult<Vec<CmHandleTransitionPair>> {
        let mut transitions = Vec::with_capacity(targets.len());
        for (cm_handle, target_state) in targets {
            if cm_handle.cm_handle_state() == Some(target_state) {
                debug!(cm_handle_id = %cm_handle.id, state = %target_state, "cm-handle already in target state");
                continue;
            }
            let target = to_target(&cm_handle, target_state);
            transitions.push(CmHandleTransitionPair {
                current: cm_handle,
                target,
            });
        }
        let skipped = self.persist(&transitions)?;
        transitions.retain(|transition| !skipped.contains(&transition.target.id));
        for transition in &transitions {
            if let Some(state) = transition.target.cm_handle_state() {
                info!(cm_handle_id = %transition.target.id, "{} is now in {} state", transition.target.id, state);
            }
        }
        Ok(transitions)
    }

    /// Registers new handles in state ADVISED.
    ///
    /// Handles whose alternate id was taken by the time of the write are not
    /// persisted and have no transition in the result.
    pub fn initiate_state_advised(&self, cm_handles: Vec<YangModelCmHandle>) -> NcmpResult<Vec<CmHandleTransitionPair>> {
        let targets = cm_handles
            .into_iter()
            .map(|cm_handle| (cm_handle, CmHandleState::Advised))
            .collect();
        self.update_cm_handle_state_batch(targets)
    }

    /// Writes the transitions, returning the ids of new handles that were not
    /// persisted because their alternate id is taken.
    fn persist(&self, transitions: &[CmHandleTransitionPair]) -> NcmpResult<Vec<String>> {
        let mut new_cm_handles = Vec::new();
        let mut states = BTreeMap::new();
        for transition in transitions {
            let Some(state) = transition.target.composite_state.as_ref() else {
                continue;
            };
            if transition.current.composite_state.is_none() {
                new_cm_handles.push(transition.target.clone());
            } else if state.cm_handle_state != CmHandleState::Deleted {
                states.insert(transition.target.id.clone(), state.clone());
            }
        }
        let skipped = self.inventory.save_cm_handle_batch(&new_cm_handles)?;
        self.inventory.save_cm_handle_state_batch(&states)?;
        Ok(skipped)
    }
}

fn to_target(cm_handle: &YangModelCmHandle, target_state: CmHandleState) -> YangModelCmHandle {
    let mut target = cm_handle.clone();
    let mut composite_state = cm_handle.composite_state.clone().unwrap_or_default();
    match target_state {
        CmHandleState::Ready => {
            set_initial_data_store_sync_state(&mut composite_state);
            set_composite_state(CmHandleState::Ready, &mut composite_state);
        }
        CmHandleState::Advised if cm_handle.composite_state.is_none() => {
            composite_state = CompositeState::builder()
                .with_cm_handle_state(CmHandleState::Advised)
                .build();
        }
        CmHandleState::Advised if cm_handle.cm_handle_state() == Some(CmHandleState::Locked) => {
            set_composite_state_for_retry(&mut composite_state);
        }
        other => set_composite_state(other, &mut composite_state),
    }
    target.composite_state = Some(composite_state);
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NcmpConfig;
    use crate::models::{DataStoreSyncState, LockReasonCategory};
    use cps_store::{CpsStore, ErrorKind};

    fn handler() -> (LcmEventsCmHandleStateHandler, Arc<InventoryPersistence>) {
        let inventory = Arc::new(InventoryPersistence::new(CpsStore::new(), NcmpConfig::default()));
        inventory.initialize().unwrap();
        (LcmEventsCmHandleStateHandler::new(Arc::clone(&inventory)), inventory)
    }

    fn new_cm_handle(id: &str) -> YangModelCmHandle {
        YangModelCmHandle {
            id: id.to_string(),
            dmi_service_name: "dmi-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_initiate_advised_persists_new_handles() {
        let (handler, inventory) = handler();
        let transitions = handler
            .initiate_state_advised(vec![new_cm_handle("ch-1"), new_cm_handle("ch-2")])
            .unwrap();
        assert_eq!(transitions.len(), 2);
        assert!(transitions[0].current.composite_state.is_none());
        let state = inventory.get_cm_handle_state("ch-2").unwrap();
        assert_eq!(state.cm_handle_state, CmHandleState::Advised);
        assert!(state.last_update_time.is_some());
    }

    #[test]
    fn test_ready_sets_initial_sync_state_and_skips_repeats() {
        let (handler, inventory) = handler();
        handler.initiate_state_advised(vec![new_cm_handle("ch-1")]).unwrap();
        let advised = inventory.get_yang_model_cm_handle("ch-1").unwrap();
        let transitions = handler
            .update_cm_handle_state_batch(vec![(advised, CmHandleState::Ready)])
            .unwrap();
        assert_eq!(transitions.len(), 1);

        let state = inventory.get_cm_handle_state("ch-1").unwrap();
        assert_eq!(state.cm_handle_state, CmHandleState::Ready);
        assert_eq!(state.data_sync_enabled, Some(false));
        assert_eq!(state.operational_sync_state(), Some(DataStoreSyncState::NoneRequested));

        let ready = inventory.get_yang_model_cm_handle("ch-1").unwrap();
        let repeated = handler
            .update_cm_handle_state_batch(vec![(ready, CmHandleState::Ready)])
            .unwrap();
        assert!(repeated.is_empty());
    }

    #[test]
    fn test_retry_from_locked_keeps_only_lock_details() {
        let (handler, inventory) = handler();
        let mut cm_handle = new_cm_handle("ch-1");
        handler.initiate_state_advised(vec![cm_handle.clone()]).unwrap();
        cm_handle.composite_state = Some(
            CompositeState::builder()
                .with_cm_handle_state(CmHandleState::Locked)
                .with_lock_reason(LockReasonCategory::ModuleSyncFailed, "dmi unreachable")
                .build(),
        );
        inventory
            .save_cm_handle_state("ch-1", cm_handle.composite_state.as_ref().unwrap())
            .unwrap();

        handler
            .update_cm_handle_state_batch(vec![(cm_handle, CmHandleState::Advised)])
            .unwrap();
        let state = inventory.get_cm_handle_state("ch-1").unwrap();
        assert_eq!(state.cm_handle_state, CmHandleState::Advised);
        let lock_reason = state.lock_reason.unwrap();
        assert_eq!(lock_reason.category, None);
        assert_eq!(lock_reason.details.as_deref(), Some("dmi unreachable"));
    }

    #[test]
    fn test_handle_with_taken_alternate_id_has_no_transition() {
        let (handler, inventory) = handler();
        let mut holder = new_cm_handle("ch-0");
        holder.alternate_id = "fdn-1".to_string();
        handler.initiate_state_advised(vec![holder]).unwrap();

        let mut late = new_cm_handle("ch-1");
        late.alternate_id = "fdn-1".to_string();
        let transitions = handler
            .initiate_state_advised(vec![late, new_cm_handle("ch-2")])
            .unwrap();
        let ids: Vec<&str> = transitions.iter().map(|t| t.target.id.as_str()).collect();
        assert_eq!(ids, vec!["ch-2"]);
        assert!(!inventory.is_existing_cm_handle_id("ch-1").unwrap());
    }

    #[test]
    fn test_deleted_is_not_persisted() {
        let (handler, inventory) = handler();
        handler.initiate_state_advised(vec![new_cm_handle("ch-1")]).unwrap();
        let cm_handle = inventory.get_yang_model_cm_handle("ch-1").unwrap();
        inventory.delete_data_node("/dmi-registry/cm-handles[@id='ch-1']").unwrap();

        let transitions = handler
            .update_cm_handle_state_batch(vec![(cm_handle, CmHandleState::Deleted)])
            .unwrap();
        assert_eq!(transitions[0].target.cm_handle_state(), Some(CmHandleState::Deleted));
        assert_eq!(inventory.get_cm_handle_state("ch-1").unwrap_err().kind(), ErrorKind::NotFound);
    }
}
