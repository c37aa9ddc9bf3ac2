//! Cm-handle registration: the single entry point DMI plugins call.
//!
//! A registration is processed category by category in a fixed order:
//! removed, created, updated, upgraded. Each category yields one response per
//! cm-handle; a failure in one category does not stop the next.

mod properties;

pub use properties::CmHandlePropertyHandler;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cps_store::{CpsError, CpsValidator, ErrorKind};
use tracing::{error, info, warn};

use crate::alternate_id::{AlternateIdChecker, Operation};
use crate::cache::KeyValueCache;
use crate::error::{NcmpError, NcmpResult};
use crate::inventory::{cm_handle_id_of, cm_handle_xpath, InventoryPersistence};
use crate::lcm::LcmEventsCmHandleStateHandler;
use crate::models::{
    CmHandleRegistrationResponse, CmHandleState, CompositeState, DataStoreSyncState,
    DmiPluginRegistration, DmiPluginRegistrationResponse, LockReasonCategory, NcmpResponseStatus,
    NcmpServiceCmHandle, UpgradedCmHandles, YangModelCmHandle,
};
use crate::state::{set_composite_state, set_data_sync_enabled_flag_with_data_sync_state};
use crate::trust::TrustLevelManager;
use properties::to_failure;

/// Lock detail recorded for a requested module upgrade.
pub fn module_upgrade_details(module_set_tag: &str) -> String {
    format!("Upgrade to ModuleSetTag: {module_set_tag}")
}

/// Registers, updates, upgrades and removes cm-handles.
pub struct CmHandleRegistrationService {
    inventory: Arc<InventoryPersistence>,
    lcm: Arc<LcmEventsCmHandleStateHandler>,
    trust: Arc<TrustLevelManager>,
    alternate_ids: Arc<AlternateIdChecker>,
    properties: CmHandlePropertyHandler,
    module_sync_started_on_cm_handles: Arc<dyn KeyValueCache<String>>,
}

impl std::fmt::Debug for CmHandleRegistrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmHandleRegistrationService")
            .field("delete_batch_size", &self.inventory.config().delete_batch_size)
            .finish_non_exhaustive()
    }
}

impl CmHandleRegistrationService {
    /// Creates the service from its collaborators.
    pub fn new(
        inventory: Arc<InventoryPersistence>,
        lcm: Arc<LcmEventsCmHandleStateHandler>,
        trust: Arc<TrustLevelManager>,
        alternate_ids: Arc<AlternateIdChecker>,
        module_sync_started_on_cm_handles: Arc<dyn KeyValueCache<String>>,
    ) -> Self {
        let properties = CmHandlePropertyHandler::new(Arc::clone(&inventory), Arc::clone(&alternate_ids));
        Self {
            inventory,
            lcm,
            trust,
            alternate_ids,
            properties,
            module_sync_started_on_cm_handles,
        }
    }

    /// Processes one registration request.
    ///
    /// Fails only for an invalid combination of plugin names or a failed
    /// state transition; everything else is reported per cm-handle.
    pub fn update_dmi_registration(
        &self,
        registration: &DmiPluginRegistration,
    ) -> NcmpResult<DmiPluginRegistrationResponse> {
        registration.validate()?;
        self.trust.register_dmi_plugin(registration);

        let mut response = DmiPluginRegistrationResponse::default();
        if !registration.removed_cm_handles.is_empty() {
            response.removed_cm_handles = self.process_removed_cm_handles(&registration.removed_cm_handles)?;
        }
        if !registration.created_cm_handles.is_empty() {
            response.created_cm_handles = self.process_created_cm_handles(registration);
        }
        if !registration.updated_cm_handles.is_empty() {
            response.updated_cm_handles = self
                .properties
                .update_cm_handle_properties(&registration.updated_cm_handles);
        }
        if let Some(upgraded) = &registration.upgraded_cm_handles {
            if !upgraded.cm_handles.is_empty() {
                response.upgraded_cm_handles = self.process_upgraded_cm_handles(upgraded);
            }
        }
        Ok(response)
    }

    // ========================================================================
    // Remove
    // ========================================================================

    fn process_removed_cm_handles(&self, cm_handle_ids: &[String]) -> NcmpResult<Vec<CmHandleRegistrationResponse>> {
        let cm_handles = self.inventory.get_yang_model_cm_handles(cm_handle_ids)?;
        let found: HashSet<String> = cm_handles.iter().map(|h| h.id.clone()).collect();
        self.lcm.update_cm_handle_state_batch(
            cm_handles
                .iter()
                .map(|cm_handle| (cm_handle.clone(), CmHandleState::Deleting))
                .collect(),
        )?;

        let batch_size = self.inventory.config().delete_batch_size.max(1);
        let mut responses = Vec::with_capacity(cm_handle_ids.len());
        for batch in cm_handle_ids.chunks(batch_size) {
            match self.batch_delete_cm_handles(batch, &found) {
                Ok(()) => responses.extend(CmHandleRegistrationResponse::successes(batch)),
                Err(e) => {
                    error!(error = %e, count = batch.len(), "batch delete failed, deleting one by one");
                    responses.extend(batch.iter().map(|id| self.delete_cm_handle(id)));
                }
            }
        }

        let deleted: HashSet<&str> = responses
            .iter()
            .filter(|response| response.is_success())
            .map(|response| response.cm_handle_id.as_str())
            .collect();
        let targets = cm_handles
            .into_iter()
            .filter(|cm_handle| deleted.contains(cm_handle.id.as_str()))
            .map(|cm_handle| {
                let mut deleting = cm_handle;
                if let Some(state) = deleting.composite_state.as_mut() {
                    set_composite_state(CmHandleState::Deleting, state);
                }
                (deleting, CmHandleState::Deleted)
            })
            .collect();
        self.lcm.update_cm_handle_state_batch(targets)?;
        Ok(responses)
    }

    fn batch_delete_cm_handles(&self, batch: &[String], found: &HashSet<String>) -> NcmpResult<()> {
        let missing: Vec<String> = batch
            .iter()
            .filter(|id| !found.contains(*id))
            .map(|id| cm_handle_xpath(id))
            .collect();
        if !missing.is_empty() {
            let config = self.inventory.config();
            return Err(NcmpError::Cps(CpsError::DataNodesNotFound {
                dataspace: config.dataspace.clone(),
                anchor: config.dmi_registry_anchor.clone(),
                xpaths: missing,
            }));
        }
        self.inventory.delete_schema_sets_with_cascade(batch)?;
        let xpaths: Vec<String> = batch.iter().map(|id| cm_handle_xpath(id)).collect();
        self.inventory.delete_data_nodes(&xpaths)?;
        self.trust.remove_cm_handles(batch);
        self.remove_module_sync_markers(batch);
        Ok(())
    }

    fn delete_cm_handle(&self, cm_handle_id: &str) -> CmHandleRegistrationResponse {
        let result = self
            .inventory
            .delete_schema_set_with_cascade(cm_handle_id)
            .and_then(|()| self.inventory.delete_data_node(&cm_handle_xpath(cm_handle_id)));
        match result {
            Ok(()) => {
                self.trust.remove_cm_handles(&[cm_handle_id]);
                self.remove_module_sync_markers(&[cm_handle_id]);
                CmHandleRegistrationResponse::success(cm_handle_id)
            }
            Err(e) => {
                warn!(cm_handle_id, error = %e, "failed to delete cm-handle");
                to_failure(cm_handle_id, &e)
            }
        }
    }

    fn remove_module_sync_markers<S: AsRef<str>>(&self, cm_handle_ids: &[S]) {
        for cm_handle_id in cm_handle_ids {
            self.module_sync_started_on_cm_handles.remove(cm_handle_id.as_ref());
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    fn process_created_cm_handles(&self, registration: &DmiPluginRegistration) -> Vec<CmHandleRegistrationResponse> {
        let cm_handles = &registration.created_cm_handles;
        let rejected: HashSet<String> = match self
            .alternate_ids
            .ids_of_cm_handles_with_rejected_alternate_id(cm_handles, Operation::Create)
        {
            Ok(rejected) => rejected.into_iter().collect(),
            Err(e) => {
                let ids: Vec<&str> = cm_handles.iter().map(|h| h.cm_handle_id.as_str()).collect();
                return CmHandleRegistrationResponse::failures_from_error(&ids, &e);
            }
        };

        let mut responses = Vec::with_capacity(cm_handles.len());
        let mut accepted: Vec<&NcmpServiceCmHandle> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for cm_handle in cm_handles {
            let id = cm_handle.cm_handle_id.as_str();
            if rejected.contains(id) {
                responses.push(CmHandleRegistrationResponse::failure(
                    id,
                    NcmpResponseStatus::AlternateIdAlreadyAssociated,
                ));
            } else if CpsValidator.validate_name(id).is_err() {
                responses.push(CmHandleRegistrationResponse::failure(id, NcmpResponseStatus::CmHandleInvalidId));
            } else if !seen.insert(id) {
                responses.push(CmHandleRegistrationResponse::failure(id, NcmpResponseStatus::CmHandleAlreadyExist));
            } else {
                accepted.push(cm_handle);
            }
        }
        responses.extend(self.persist_created_cm_handles(registration, &accepted));
        responses
    }

    fn persist_created_cm_handles(
        &self,
        registration: &DmiPluginRegistration,
        cm_handles: &[&NcmpServiceCmHandle],
    ) -> Vec<CmHandleRegistrationResponse> {
        let mut responses = Vec::with_capacity(cm_handles.len());
        let mut new_cm_handles = Vec::with_capacity(cm_handles.len());
        for cm_handle in cm_handles {
            match self.inventory.is_existing_cm_handle_id(&cm_handle.cm_handle_id) {
                Ok(true) => responses.push(CmHandleRegistrationResponse::failure(
                    &cm_handle.cm_handle_id,
                    NcmpResponseStatus::CmHandleAlreadyExist,
                )),
                Ok(false) => new_cm_handles.push(*cm_handle),
                Err(e) => responses.push(to_failure(&cm_handle.cm_handle_id, &e)),
            }
        }
        if new_cm_handles.is_empty() {
            return responses;
        }

        let records: Vec<YangModelCmHandle> = new_cm_handles
            .iter()
            .map(|cm_handle| YangModelCmHandle::from_registration(registration, cm_handle))
            .collect();
        let ids: Vec<&str> = new_cm_handles.iter().map(|h| h.cm_handle_id.as_str()).collect();
        match self.lcm.initiate_state_advised(records) {
            Ok(transitions) => {
                let persisted: HashSet<&str> = transitions
                    .iter()
                    .map(|transition| transition.target.id.as_str())
                    .collect();
                let initial_trust_levels: BTreeMap<String, _> = new_cm_handles
                    .iter()
                    .filter(|h| persisted.contains(h.cm_handle_id.as_str()))
                    .map(|h| (h.cm_handle_id.clone(), h.registration_trust_level))
                    .collect();
                self.trust.register_cm_handles(&initial_trust_levels);
                info!(count = persisted.len(), "cm-handles registered");
                responses.extend(ids.iter().map(|id| {
                    if persisted.contains(id) {
                        CmHandleRegistrationResponse::success(*id)
                    } else {
                        CmHandleRegistrationResponse::failure(*id, NcmpResponseStatus::AlternateIdAlreadyAssociated)
                    }
                }));
            }
            Err(e @ NcmpError::Cps(CpsError::AlreadyDefined { .. })) => {
                let existing: HashSet<String> = match &e {
                    NcmpError::Cps(CpsError::AlreadyDefined { names, .. }) => {
                        names.iter().filter_map(|xpath| cm_handle_id_of(xpath)).collect()
                    }
                    _ => HashSet::new(),
                };
                warn!(count = existing.len(), "cm-handles already exist");
                responses.extend(ids.iter().map(|id| {
                    if existing.contains(*id) {
                        CmHandleRegistrationResponse::failure(*id, NcmpResponseStatus::CmHandleAlreadyExist)
                    } else {
                        CmHandleRegistrationResponse::failure_from_error(*id, &e)
                    }
                }));
            }
            Err(e) => {
                error!(error = %e, "failed to register cm-handles");
                responses.extend(ids.iter().map(|id| to_failure(id, &e)));
            }
        }
        responses
    }

    // ========================================================================
    // Upgrade
    // ========================================================================

    fn process_upgraded_cm_handles(&self, upgraded: &UpgradedCmHandles) -> Vec<CmHandleRegistrationResponse> {
        let module_set_tag = upgraded.module_set_tag.trim();
        let mut responses = Vec::with_capacity(upgraded.cm_handles.len());
        let mut targets = Vec::new();
        for cm_handle_id in &upgraded.cm_handles {
            let cm_handle = match self.inventory.get_yang_model_cm_handle(cm_handle_id) {
                Ok(cm_handle) => cm_handle,
                Err(e) => {
                    responses.push(to_failure(cm_handle_id, &e));
                    continue;
                }
            };
            if cm_handle.cm_handle_state() != Some(CmHandleState::Ready) {
                warn!(cm_handle_id = %cm_handle_id, "cm-handle is not ready, upgrade rejected");
                responses.push(CmHandleRegistrationResponse::failure(
                    cm_handle_id,
                    NcmpResponseStatus::CmHandlesNotReady,
                ));
                continue;
            }
            if !module_set_tag.is_empty() && cm_handle.module_set_tag == module_set_tag {
                info!(cm_handle_id = %cm_handle_id, module_set_tag, "cm-handle already has the module set tag");
                responses.push(CmHandleRegistrationResponse::success(cm_handle_id));
                continue;
            }
            let mut locked = cm_handle.clone();
            locked.composite_state = Some(
                CompositeState::builder()
                    .with_cm_handle_state(CmHandleState::Ready)
                    .with_lock_reason(LockReasonCategory::ModuleUpgrade, module_upgrade_details(module_set_tag))
                    .build(),
            );
            targets.push((locked, CmHandleState::Locked));
        }

        let ids: Vec<String> = targets.iter().map(|(cm_handle, _)| cm_handle.id.clone()).collect();
        match self.lcm.update_cm_handle_state_batch(targets) {
            Ok(_) => responses.extend(CmHandleRegistrationResponse::successes(&ids)),
            Err(e) => {
                error!(error = %e, "failed to lock cm-handles for upgrade");
                responses.extend(CmHandleRegistrationResponse::failures_from_error(&ids, &e));
            }
        }
        responses
    }

    // ========================================================================
    // Data sync
    // ========================================================================

    /// Enables or disables data sync of a READY cm-handle.
    pub fn set_data_sync_enabled(&self, cm_handle_id: &str, data_sync_enabled: bool) -> NcmpResult<()> {
        let mut composite_state = self.inventory.get_cm_handle_state(cm_handle_id)?;
        if composite_state.data_sync_enabled == Some(data_sync_enabled) {
            info!(cm_handle_id, data_sync_enabled, "data sync flag unchanged");
            return Ok(());
        }
        if composite_state.cm_handle_state != CmHandleState::Ready {
            return Err(NcmpError::StateMismatch(format!(
                "Cm-Handle not in READY state. Cm handle state is: {}",
                composite_state.cm_handle_state
            )));
        }
        if !data_sync_enabled && composite_state.operational_sync_state() == Some(DataStoreSyncState::Synchronized) {
            self.delete_synced_data(cm_handle_id)?;
        }
        set_data_sync_enabled_flag_with_data_sync_state(data_sync_enabled, &mut composite_state);
        self.inventory.save_cm_handle_state(cm_handle_id, &composite_state)
    }

    // Synced operational data lives in the cm-handle's own anchor.
    fn delete_synced_data(&self, cm_handle_id: &str) -> NcmpResult<()> {
        let store = self.inventory.store();
        let dataspace = &self.inventory.config().operational_dataspace;
        match store.data().delete_all_data_nodes(dataspace, cm_handle_id) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(cm_handle_id, "no synced data to delete");
                Ok(())
            }
            result => Ok(result?),
        }
    }
}
