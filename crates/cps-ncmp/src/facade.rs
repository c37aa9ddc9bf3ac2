//! One object wiring the inventory services together.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cps_store::{CpsStore, ErrorKind, ModuleReference};
use tracing::debug;

use crate::alternate_id::AlternateIdChecker;
use crate::cache::{ConcurrentKeyValueCache, KeyValueCache};
use crate::config::NcmpConfig;
use crate::error::NcmpResult;
use crate::inventory::InventoryPersistence;
use crate::lcm::LcmEventsCmHandleStateHandler;
use crate::models::{
    CompositeState, DmiPluginRegistration, DmiPluginRegistrationResponse, NcmpServiceCmHandle, TrustLevel,
};
use crate::query::{CmHandleQueryService, CmHandleQueryServiceParameters, ParameterizedCmHandleQueryService};
use crate::registration::CmHandleRegistrationService;
use crate::trust::TrustLevelManager;

/// Shared caches, injected so that several facades (or a distributed map)
/// can share them.
#[derive(Clone)]
pub struct NcmpCaches {
    /// Registered trust level per cm-handle id.
    pub trust_level_per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
    /// Trust level per DMI plugin name.
    pub trust_level_per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
    /// Cm-handles whose module sync is in progress.
    pub module_sync_started_on_cm_handles: Arc<dyn KeyValueCache<String>>,
}

impl Default for NcmpCaches {
    fn default() -> Self {
        Self {
            trust_level_per_cm_handle: Arc::new(ConcurrentKeyValueCache::new()),
            trust_level_per_dmi_plugin: Arc::new(ConcurrentKeyValueCache::new()),
            module_sync_started_on_cm_handles: Arc::new(ConcurrentKeyValueCache::new()),
        }
    }
}

impl std::fmt::Debug for NcmpCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcmpCaches").finish_non_exhaustive()
    }
}

/// Entry point to the cm-handle inventory.
#[derive(Debug)]
pub struct NcmpInventoryFacade {
    inventory: Arc<InventoryPersistence>,
    registration: CmHandleRegistrationService,
    queries: Arc<CmHandleQueryService>,
    parameterized_queries: ParameterizedCmHandleQueryService,
    trust: Arc<TrustLevelManager>,
    lcm: Arc<LcmEventsCmHandleStateHandler>,
    caches: NcmpCaches,
}

impl NcmpInventoryFacade {
    /// Creates a facade with the default configuration and fresh caches.
    pub fn new(store: CpsStore) -> NcmpResult<Self> {
        Self::with_config(store, NcmpConfig::default())
    }

    /// Creates a facade with fresh caches.
    pub fn with_config(store: CpsStore, config: NcmpConfig) -> NcmpResult<Self> {
        Self::with_caches(store, config, NcmpCaches::default())
    }

    /// Creates a facade over existing caches, initializing the registry.
    pub fn with_caches(store: CpsStore, config: NcmpConfig, caches: NcmpCaches) -> NcmpResult<Self> {
        let inventory = Arc::new(InventoryPersistence::new(store, config));
        inventory.initialize()?;

        let lcm = Arc::new(LcmEventsCmHandleStateHandler::new(Arc::clone(&inventory)));
        let trust = Arc::new(TrustLevelManager::new(
            Arc::clone(&caches.trust_level_per_cm_handle),
            Arc::clone(&caches.trust_level_per_dmi_plugin),
            Arc::clone(&inventory),
        ));
        let alternate_ids = Arc::new(AlternateIdChecker::new(Arc::clone(&inventory)));
        let registration = CmHandleRegistrationService::new(
            Arc::clone(&inventory),
            Arc::clone(&lcm),
            Arc::clone(&trust),
            alternate_ids,
            Arc::clone(&caches.module_sync_started_on_cm_handles),
        );
        let queries = Arc::new(CmHandleQueryService::new(
            Arc::clone(&inventory),
            Arc::clone(&caches.trust_level_per_dmi_plugin),
            Arc::clone(&caches.trust_level_per_cm_handle),
        ));
        let parameterized_queries =
            ParameterizedCmHandleQueryService::new(Arc::clone(&queries), Arc::clone(&inventory), Arc::clone(&trust));

        debug!(dataspace = %inventory.config().dataspace, "inventory facade ready");
        Ok(Self {
            inventory,
            registration,
            queries,
            parameterized_queries,
            trust,
            lcm,
            caches,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Registry persistence.
    pub fn inventory(&self) -> &Arc<InventoryPersistence> {
        &self.inventory
    }

    /// Single-condition queries.
    pub fn queries(&self) -> &Arc<CmHandleQueryService> {
        &self.queries
    }

    /// Trust level manager.
    pub fn trust(&self) -> &Arc<TrustLevelManager> {
        &self.trust
    }

    /// State transition handler.
    pub fn lcm(&self) -> &Arc<LcmEventsCmHandleStateHandler> {
        &self.lcm
    }

    /// The injected caches.
    pub fn caches(&self) -> &NcmpCaches {
        &self.caches
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Processes a DMI plugin registration.
    pub fn update_dmi_registration(
        &self,
        registration: &DmiPluginRegistration,
    ) -> NcmpResult<DmiPluginRegistrationResponse> {
        self.registration.update_dmi_registration(registration)
    }

    /// Enables or disables data sync of a READY cm-handle.
    pub fn set_data_sync_enabled(&self, cm_handle_id: &str, data_sync_enabled: bool) -> NcmpResult<()> {
        self.registration.set_data_sync_enabled(cm_handle_id, data_sync_enabled)
    }

    // ========================================================================
    // Searches
    // ========================================================================

    /// References of every cm-handle served by `dmi_plugin`.
    pub fn get_all_cm_handle_references_by_dmi_plugin_identifier(
        &self,
        dmi_plugin: &str,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.queries
            .get_cm_handle_references_by_dmi_plugin_identifier(dmi_plugin, output_alternate_id)
    }

    /// Inventory search: cps-path, public and additional properties, DMI plugin.
    pub fn execute_parameterized_cm_handle_id_search(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.parameterized_queries
            .query_cm_handle_ids_for_inventory(parameters, output_alternate_id)
    }

    /// Cm-handle search returning full cm-handles.
    pub fn execute_cm_handle_search(
        &self,
        parameters: &CmHandleQueryServiceParameters,
    ) -> NcmpResult<Vec<NcmpServiceCmHandle>> {
        self.parameterized_queries.query_cm_handles(parameters)
    }

    /// Cm-handle search returning references.
    pub fn execute_cm_handle_id_search(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.parameterized_queries
            .query_cm_handle_reference_ids(parameters, output_alternate_id)
    }

    // ========================================================================
    // Single cm-handle
    // ========================================================================

    /// Modules of the referenced cm-handle; empty if it does not exist.
    pub fn get_yang_resources_module_references(&self, cm_handle_reference: &str) -> NcmpResult<Vec<ModuleReference>> {
        let cm_handle_id = match self.resolve_cm_handle_id(cm_handle_reference) {
            Ok(cm_handle_id) => cm_handle_id,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        self.inventory.get_yang_resources_module_references(&cm_handle_id)
    }

    /// The referenced cm-handle with its effective trust level.
    pub fn get_ncmp_service_cm_handle(&self, cm_handle_reference: &str) -> NcmpResult<NcmpServiceCmHandle> {
        let cm_handle_id = self.resolve_cm_handle_id(cm_handle_reference)?;
        let mut cm_handle = self
            .inventory
            .get_yang_model_cm_handle(&cm_handle_id)?
            .to_ncmp_service_cm_handle();
        self.trust.apply_effective_trust_level(&mut cm_handle);
        Ok(cm_handle)
    }

    /// Public properties of the referenced cm-handle.
    pub fn get_cm_handle_public_properties(&self, cm_handle_reference: &str) -> NcmpResult<BTreeMap<String, String>> {
        let cm_handle_id = self.resolve_cm_handle_id(cm_handle_reference)?;
        Ok(self
            .inventory
            .get_yang_model_cm_handle(&cm_handle_id)?
            .public_properties
            .into_iter()
            .map(|property| (property.name, property.value))
            .collect())
    }

    /// Composite state of the referenced cm-handle.
    pub fn get_cm_handle_composite_state(&self, cm_handle_reference: &str) -> NcmpResult<Option<CompositeState>> {
        let cm_handle_id = self.resolve_cm_handle_id(cm_handle_reference)?;
        Ok(self.inventory.get_yang_model_cm_handle(&cm_handle_id)?.composite_state)
    }

    /// Cm-handle id for a reference that is either an id or an alternate id.
    pub fn resolve_cm_handle_id(&self, cm_handle_reference: &str) -> NcmpResult<String> {
        if self.inventory.is_existing_cm_handle_id(cm_handle_reference)? {
            return Ok(cm_handle_reference.to_string());
        }
        Ok(self
            .inventory
            .get_yang_model_cm_handle_by_alternate_id(cm_handle_reference)?
            .id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CmHandleState, TrustLevel};

    fn facade() -> NcmpInventoryFacade {
        let facade = NcmpInventoryFacade::new(CpsStore::new()).unwrap();
        let mut registration = DmiPluginRegistration::for_plugin("dmi-1");
        registration.created_cm_handles = vec![NcmpServiceCmHandle::new("ch-1")
            .with_alternate_id("fdn-1")
            .with_public_property("color", Some("red"))
            .with_registration_trust_level(TrustLevel::Incomplete)];
        facade.update_dmi_registration(&registration).unwrap();
        facade
    }

    #[test]
    fn test_initialization_is_repeatable() {
        let store = CpsStore::new();
        NcmpInventoryFacade::new(store.clone()).unwrap();
        assert!(NcmpInventoryFacade::new(store).is_ok());
    }

    #[test]
    fn test_reference_resolves_id_and_alternate_id() {
        let facade = facade();
        assert_eq!(facade.resolve_cm_handle_id("ch-1").unwrap(), "ch-1");
        assert_eq!(facade.resolve_cm_handle_id("fdn-1").unwrap(), "ch-1");
        let err = facade.resolve_cm_handle_id("nothing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_cm_handle_carries_effective_trust() {
        let facade = facade();
        let cm_handle = facade.get_ncmp_service_cm_handle("fdn-1").unwrap();
        assert_eq!(cm_handle.cm_handle_id, "ch-1");
        assert_eq!(cm_handle.current_trust_level, Some(TrustLevel::Incomplete));
    }

    #[test]
    fn test_public_properties_and_state() {
        let facade = facade();
        let properties = facade.get_cm_handle_public_properties("ch-1").unwrap();
        assert_eq!(properties.get("color").map(String::as_str), Some("red"));
        let state = facade.get_cm_handle_composite_state("ch-1").unwrap().unwrap();
        assert_eq!(state.cm_handle_state, CmHandleState::Advised);
    }

    #[test]
    fn test_module_references_of_unknown_reference_are_empty() {
        let facade = facade();
        assert!(facade.get_yang_resources_module_references("nothing").unwrap().is_empty());
    }
}
