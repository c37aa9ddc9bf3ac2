//! Trust levels of DMI plugins and cm-handles.
//!
//! A cm-handle's effective trust level is the lower of its own level and the
//! level of the DMI plugin serving its data.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::KeyValueCache;
use crate::error::NcmpResult;
use crate::inventory::InventoryPersistence;
use crate::models::{DmiPluginRegistration, NcmpServiceCmHandle, RequiredDmiService, TrustLevel};

/// Keeps the per-plugin and per-handle trust caches.
pub struct TrustLevelManager {
    trust_level_per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
    trust_level_per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
    inventory: Arc<InventoryPersistence>,
}

impl std::fmt::Debug for TrustLevelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustLevelManager").finish_non_exhaustive()
    }
}

impl TrustLevelManager {
    /// Creates a manager over the given caches.
    pub fn new(
        trust_level_per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
        trust_level_per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
        inventory: Arc<InventoryPersistence>,
    ) -> Self {
        Self {
            trust_level_per_cm_handle,
            trust_level_per_dmi_plugin,
            inventory,
        }
    }

    /// Marks the registering plugin as fully trusted.
    pub fn register_dmi_plugin(&self, registration: &DmiPluginRegistration) {
        let dmi_service_name = registration.dmi_data_service_name();
        self.trust_level_per_dmi_plugin
            .put(dmi_service_name.to_string(), TrustLevel::Complete);
        debug!(dmi_service_name, "dmi plugin registered as trusted");
    }

    /// Records the initial trust level of new handles; a missing level
    /// counts as COMPLETE.
    pub fn register_cm_handles(&self, initial_trust_levels: &BTreeMap<String, Option<TrustLevel>>) {
        let entries = initial_trust_levels
            .iter()
            .map(|(cm_handle_id, level)| {
                let level = level.unwrap_or(TrustLevel::Complete);
                if level == TrustLevel::None {
                    info!(cm_handle_id = %cm_handle_id, "cm-handle registered without trust");
                }
                (cm_handle_id.clone(), level)
            })
            .collect();
        self.trust_level_per_cm_handle.put_all(entries);
    }

    /// Sets a plugin's trust level and reports effective changes of the
    /// handles it serves.
    pub fn update_dmi<S: AsRef<str>>(&self, dmi_service_name: &str, cm_handle_ids: &[S], new_level: TrustLevel) {
        let old_level = self
            .trust_level_per_dmi_plugin
            .put(dmi_service_name.to_string(), new_level)
            .unwrap_or(TrustLevel::None);
        for cm_handle_id in cm_handle_ids {
            let cm_handle_id = cm_handle_id.as_ref();
            let own = self
                .trust_level_per_cm_handle
                .get(cm_handle_id)
                .unwrap_or(TrustLevel::None);
            log_effective_change(cm_handle_id, own.effective(old_level), own.effective(new_level));
        }
    }

    /// Sets a handle's own trust level.
    pub fn update_cm_handle_trust_level(&self, cm_handle_id: &str, new_level: TrustLevel) -> NcmpResult<()> {
        let dmi_level = self.dmi_trust_level_of(cm_handle_id)?;
        let old_level = self
            .trust_level_per_cm_handle
            .put(cm_handle_id.to_string(), new_level)
            .unwrap_or(TrustLevel::None);
        log_effective_change(cm_handle_id, old_level.effective(dmi_level), new_level.effective(dmi_level));
        Ok(())
    }

    /// The effective trust level of a persisted handle.
    pub fn effective_trust_level(&self, cm_handle_id: &str) -> NcmpResult<TrustLevel> {
        let dmi_level = self.dmi_trust_level_of(cm_handle_id)?;
        let own = self
            .trust_level_per_cm_handle
            .get(cm_handle_id)
            .unwrap_or(TrustLevel::None);
        Ok(own.effective(dmi_level))
    }

    /// Fills in `current_trust_level`; missing cache entries count as NONE.
    pub fn apply_effective_trust_levels(&self, cm_handles: &mut [NcmpServiceCmHandle]) {
        let dmi_levels = self.trust_level_per_dmi_plugin.entries();
        let ids: Vec<String> = cm_handles.iter().map(|h| h.cm_handle_id.clone()).collect();
        let own_levels = self.trust_level_per_cm_handle.get_all(&ids);
        for cm_handle in cm_handles {
            let dmi_level = dmi_levels
                .get(cm_handle.dmi_data_service())
                .copied()
                .unwrap_or(TrustLevel::None);
            let own = own_levels
                .get(&cm_handle.cm_handle_id)
                .copied()
                .unwrap_or(TrustLevel::None);
            cm_handle.current_trust_level = Some(own.effective(dmi_level));
        }
    }

    /// [`apply_effective_trust_levels`](Self::apply_effective_trust_levels) for one handle.
    pub fn apply_effective_trust_level(&self, cm_handle: &mut NcmpServiceCmHandle) {
        self.apply_effective_trust_levels(std::slice::from_mut(cm_handle));
    }

    /// Forgets removed handles.
    pub fn remove_cm_handles<S: AsRef<str>>(&self, cm_handle_ids: &[S]) {
        for cm_handle_id in cm_handle_ids {
            if self.trust_level_per_cm_handle.remove(cm_handle_id.as_ref()).is_none() {
                debug!(cm_handle_id = cm_handle_id.as_ref(), "no trust level to remove");
            }
        }
    }

    fn dmi_trust_level_of(&self, cm_handle_id: &str) -> NcmpResult<TrustLevel> {
        let cm_handle = self.inventory.get_yang_model_cm_handle(cm_handle_id)?;
        let dmi_service_name = cm_handle.resolve_dmi_service_name(RequiredDmiService::Data);
        Ok(self
            .trust_level_per_dmi_plugin
            .get(dmi_service_name)
            .unwrap_or(TrustLevel::None))
    }
}

fn log_effective_change(cm_handle_id: &str, old: TrustLevel, new: TrustLevel) {
    if old == new {
        debug!(cm_handle_id, trust_level = %new, "effective trust level unchanged");
    } else {
        info!(cm_handle_id, old = %old, new = %new, "effective trust level changed");
    }
}
