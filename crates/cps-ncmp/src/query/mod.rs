//! Cm-handle queries over the registry.
//!
//! [`CmHandleQueryService`] answers single-condition queries. The
//! [`ParameterizedCmHandleQueryService`] composes them: every requested
//! condition yields a [`QueryResult`], results are intersected, and the
//! first empty intersection stops evaluation.
//!
//! Every query that returns references takes `output_alternate_id`: when set,
//! alternate ids are returned instead of cm-handle ids.

mod parameterized;
mod types;
mod validator;

pub use parameterized::ParameterizedCmHandleQueryService;
pub use types::{
    CmHandleQueryServiceParameters, ConditionProperties, QueryResult, CM_HANDLE_QUERY_CONDITIONS,
    CM_HANDLE_WITH_CPS_PATH, CM_HANDLE_WITH_DMI_PLUGIN, CM_HANDLE_WITH_TRUST_LEVEL, HAS_ALL_ADDITIONAL_PROPERTIES,
    HAS_ALL_MODULES, HAS_ALL_PROPERTIES, INVENTORY_QUERY_CONDITIONS,
};
pub use validator::CmHandleQueryParametersValidator;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cps_path::quote;
use cps_store::{DataNode, FetchDescendantsOption};
use tracing::debug;

use crate::cache::KeyValueCache;
use crate::error::NcmpResult;
use crate::inventory::{cm_handle_id_of, InventoryPersistence, CM_HANDLES, NCMP_DMI_REGISTRY_PARENT};
use crate::models::{CmHandleState, DataStoreSyncState, TrustLevel};

const ANCESTOR_CM_HANDLES: &str = "/ancestor::cm-handles";

/// Leaves naming the DMI plugins serving a cm-handle.
const DMI_SERVICE_LEAVES: [&str; 3] = ["dmi-service-name", "dmi-data-service-name", "dmi-model-service-name"];

#[derive(Debug, Clone, Copy)]
enum PropertyList {
    Additional,
    Public,
}

impl PropertyList {
    fn name(self) -> &'static str {
        match self {
            PropertyList::Additional => "additional-properties",
            PropertyList::Public => "public-properties",
        }
    }
}

/// Single-condition queries over the cm-handle registry.
pub struct CmHandleQueryService {
    inventory: Arc<InventoryPersistence>,
    trust_level_per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
    trust_level_per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
}

impl std::fmt::Debug for CmHandleQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmHandleQueryService").finish_non_exhaustive()
    }
}

impl CmHandleQueryService {
    /// Creates the service over the registry and the trust caches.
    pub fn new(
        inventory: Arc<InventoryPersistence>,
        trust_level_per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
        trust_level_per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
    ) -> Self {
        Self {
            inventory,
            trust_level_per_dmi_plugin,
            trust_level_per_cm_handle,
        }
    }

    /// References of cm-handles whose additional properties contain every
    /// given pair. An empty map selects nothing.
    pub fn query_cm_handle_additional_properties(
        &self,
        property_pairs: &BTreeMap<String, String>,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.query_cm_handle_any_properties(property_pairs, PropertyList::Additional, output_alternate_id)
    }

    /// References of cm-handles whose public properties contain every given
    /// pair. An empty map selects nothing.
    pub fn query_cm_handle_public_properties(
        &self,
        property_pairs: &BTreeMap<String, String>,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.query_cm_handle_any_properties(property_pairs, PropertyList::Public, output_alternate_id)
    }

    /// References of cm-handles whose effective trust level equals the level
    /// given as the (single) value of `trust_level_pairs`.
    pub fn query_cm_handles_by_trust_level(
        &self,
        trust_level_pairs: &BTreeMap<String, String>,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        let Some(level) = trust_level_pairs.values().next() else {
            return Ok(BTreeSet::new());
        };
        let target: TrustLevel = level.parse()?;
        let mut references = BTreeSet::new();
        for (dmi_plugin, dmi_level) in self.trust_level_per_dmi_plugin.entries() {
            let candidates = self.get_cm_handle_references_map_by_dmi_plugin_identifier(&dmi_plugin)?;
            for (cm_handle_id, alternate_id) in candidates {
                let own_level = self
                    .trust_level_per_cm_handle
                    .get(&cm_handle_id)
                    .unwrap_or(TrustLevel::None);
                if own_level.effective(dmi_level) == target {
                    references.insert(if output_alternate_id { alternate_id } else { cm_handle_id });
                }
            }
        }
        Ok(references)
    }

    /// Ids of the cm-handles in `state`.
    pub fn query_cm_handle_ids_by_state(&self, state: CmHandleState) -> NcmpResult<Vec<String>> {
        let cps_path = format!("//state[@cm-handle-state={}]", quote(state.as_str()));
        Ok(self
            .query_ncmp_registry_by_cps_path(&cps_path, FetchDescendantsOption::OMIT_DESCENDANTS)?
            .iter()
            .filter_map(|node| cm_handle_id_of(&node.xpath))
            .collect())
    }

    /// Runs `cps_path` against the registry.
    pub fn query_ncmp_registry_by_cps_path(
        &self,
        cps_path: &str,
        option: FetchDescendantsOption,
    ) -> NcmpResult<Vec<DataNode>> {
        self.inventory.query_registry(cps_path, option)
    }

    /// The cm-handle records that contain a node selected by `cps_path`.
    pub fn query_cm_handle_ancestors_by_cps_path(
        &self,
        cps_path: &str,
        option: FetchDescendantsOption,
    ) -> NcmpResult<Vec<DataNode>> {
        let query = cps_path::parse(cps_path)?;
        if query.xpath_prefix.ends_with(&format!("/{CM_HANDLES}")) {
            return self.query_ncmp_registry_by_cps_path(cps_path, option);
        }
        self.query_ncmp_registry_by_cps_path(&format!("{cps_path}{ANCESTOR_CM_HANDLES}"), option)
    }

    /// Returns true if the cm-handle is in `state`.
    pub fn cm_handle_has_state(&self, cm_handle_id: &str, state: CmHandleState) -> NcmpResult<bool> {
        Ok(self.inventory.get_cm_handle_state(cm_handle_id)?.cm_handle_state == state)
    }

    /// Cm-handle records (without descendants) whose operational datastore
    /// is in `sync_state`.
    pub fn query_cm_handles_by_operational_sync_state(
        &self,
        sync_state: DataStoreSyncState,
    ) -> NcmpResult<Vec<DataNode>> {
        let cps_path = format!(
            "//state/datastores/operational[@sync-state={}]",
            quote(sync_state.as_str())
        );
        self.query_cm_handle_ancestors_by_cps_path(&cps_path, FetchDescendantsOption::OMIT_DESCENDANTS)
    }

    /// References of the cm-handles served by `dmi_plugin` in any role.
    pub fn get_cm_handle_references_by_dmi_plugin_identifier(
        &self,
        dmi_plugin: &str,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        Ok(self
            .cm_handles_by_dmi_plugin(dmi_plugin)?
            .iter()
            .map(|node| reference_of(node, output_alternate_id))
            .collect())
    }

    /// Cm-handle id to alternate id for the cm-handles served by `dmi_plugin`.
    pub fn get_cm_handle_references_map_by_dmi_plugin_identifier(
        &self,
        dmi_plugin: &str,
    ) -> NcmpResult<BTreeMap<String, String>> {
        Ok(self
            .cm_handles_by_dmi_plugin(dmi_plugin)?
            .iter()
            .map(|node| (reference_of(node, false), reference_of(node, true)))
            .collect())
    }

    fn cm_handles_by_dmi_plugin(&self, dmi_plugin: &str) -> NcmpResult<Vec<DataNode>> {
        let mut nodes = Vec::new();
        for leaf in DMI_SERVICE_LEAVES {
            let cps_path = format!(
                "{NCMP_DMI_REGISTRY_PARENT}/{CM_HANDLES}[@{leaf}={}]",
                quote(dmi_plugin)
            );
            nodes.extend(self.query_ncmp_registry_by_cps_path(&cps_path, FetchDescendantsOption::OMIT_DESCENDANTS)?);
        }
        Ok(nodes)
    }

    fn query_cm_handle_any_properties(
        &self,
        property_pairs: &BTreeMap<String, String>,
        list: PropertyList,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        let mut references: Option<BTreeSet<String>> = None;
        for (name, value) in property_pairs {
            let cps_path = format!(
                "//{}[@name={} and @value={}]",
                list.name(),
                quote(name),
                quote(value)
            );
            let matched: BTreeSet<String> = self
                .query_cm_handle_ancestors_by_cps_path(&cps_path, FetchDescendantsOption::OMIT_DESCENDANTS)?
                .iter()
                .map(|node| reference_of(node, output_alternate_id))
                .collect();
            let narrowed = match references {
                None => matched,
                Some(mut so_far) => {
                    so_far.retain(|reference| matched.contains(reference));
                    so_far
                }
            };
            if narrowed.is_empty() {
                debug!(property = %name, "no cm-handle matches every property");
                return Ok(narrowed);
            }
            references = Some(narrowed);
        }
        Ok(references.unwrap_or_default())
    }
}

/// Id or alternate id of a cm-handle record.
pub(crate) fn reference_of(node: &DataNode, output_alternate_id: bool) -> String {
    let leaf = if output_alternate_id { "alternate-id" } else { "id" };
    node.leaf_str(leaf).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConcurrentKeyValueCache;
    use crate::config::NcmpConfig;
    use crate::models::{Property, YangModelCmHandle};
    use crate::state::set_initial_data_store_sync_state;
    use cps_store::CpsStore;

    struct Fixture {
        service: CmHandleQueryService,
        per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>>,
        per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>>,
    }

    fn cm_handle(id: &str, dmi: &str, alternate_id: &str) -> YangModelCmHandle {
        YangModelCmHandle {
            id: id.to_string(),
            dmi_service_name: dmi.to_string(),
            alternate_id: alternate_id.to_string(),
            composite_state: Some(
                crate::models::CompositeState::builder()
                    .with_cm_handle_state(CmHandleState::Advised)
                    .build(),
            ),
            ..Default::default()
        }
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(InventoryPersistence::new(CpsStore::new(), NcmpConfig::default()));
        inventory.initialize().unwrap();

        let mut ch1 = cm_handle("ch-1", "dmi-1", "fdn-1");
        ch1.public_properties = vec![Property::new("color", "red"), Property::new("size", "big")];
        ch1.dmi_properties = vec![Property::new("secret", "s1")];
        let mut ch2 = cm_handle("ch-2", "dmi-1", "fdn-2");
        ch2.public_properties = vec![Property::new("color", "red")];
        if let Some(state) = ch2.composite_state.as_mut() {
            state.cm_handle_state = CmHandleState::Ready;
            set_initial_data_store_sync_state(state);
        }
        let mut ch3 = cm_handle("ch-3", "", "fdn-3");
        ch3.dmi_data_service_name = "dmi-2".to_string();
        ch3.dmi_model_service_name = "dmi-2".to_string();
        inventory.save_cm_handle_batch(&[ch1, ch2, ch3]).unwrap();

        let per_dmi_plugin: Arc<dyn KeyValueCache<TrustLevel>> = Arc::new(ConcurrentKeyValueCache::new());
        let per_cm_handle: Arc<dyn KeyValueCache<TrustLevel>> = Arc::new(ConcurrentKeyValueCache::new());
        let service = CmHandleQueryService::new(inventory, Arc::clone(&per_dmi_plugin), Arc::clone(&per_cm_handle));
        Fixture {
            service,
            per_dmi_plugin,
            per_cm_handle,
        }
    }

    fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn set(references: &[&str]) -> BTreeSet<String> {
        references.iter().map(|r| r.to_string()).collect()
    }

    mod properties {
        use super::*;

        #[test]
        fn test_public_properties_are_and_combined() {
            let f = fixture();
            let red = f
                .service
                .query_cm_handle_public_properties(&pairs(&[("color", "red")]), false)
                .unwrap();
            assert_eq!(red, set(&["ch-1", "ch-2"]));

            let red_and_big = f
                .service
                .query_cm_handle_public_properties(&pairs(&[("color", "red"), ("size", "big")]), false)
                .unwrap();
            assert_eq!(red_and_big, set(&["ch-1"]));
        }

        #[test]
        fn test_alternate_ids_on_request() {
            let f = fixture();
            let references = f
                .service
                .query_cm_handle_public_properties(&pairs(&[("color", "red")]), true)
                .unwrap();
            assert_eq!(references, set(&["fdn-1", "fdn-2"]));
        }

        #[test]
        fn test_additional_properties_are_a_separate_list() {
            let f = fixture();
            assert_eq!(
                f.service
                    .query_cm_handle_additional_properties(&pairs(&[("secret", "s1")]), false)
                    .unwrap(),
                set(&["ch-1"])
            );
            assert!(f
                .service
                .query_cm_handle_public_properties(&pairs(&[("secret", "s1")]), false)
                .unwrap()
                .is_empty());
        }

        #[test]
        fn test_empty_pairs_select_nothing() {
            let f = fixture();
            assert!(f
                .service
                .query_cm_handle_public_properties(&BTreeMap::new(), false)
                .unwrap()
                .is_empty());
        }
    }

    mod state {
        use super::*;

        #[test]
        fn test_ids_by_state() {
            let f = fixture();
            let mut advised = f.service.query_cm_handle_ids_by_state(CmHandleState::Advised).unwrap();
            advised.sort();
            assert_eq!(advised, vec!["ch-1", "ch-3"]);
            assert_eq!(
                f.service.query_cm_handle_ids_by_state(CmHandleState::Ready).unwrap(),
                vec!["ch-2"]
            );
        }

        #[test]
        fn test_cm_handle_has_state() {
            let f = fixture();
            assert!(f.service.cm_handle_has_state("ch-2", CmHandleState::Ready).unwrap());
            assert!(!f.service.cm_handle_has_state("ch-1", CmHandleState::Ready).unwrap());
        }

        #[test]
        fn test_by_operational_sync_state() {
            let f = fixture();
            let nodes = f
                .service
                .query_cm_handles_by_operational_sync_state(DataStoreSyncState::NoneRequested)
                .unwrap();
            assert_eq!(nodes.len(), 1);
            assert_eq!(nodes[0].leaf_str("id"), Some("ch-2"));
        }

        #[test]
        fn test_ancestor_axis_not_doubled() {
            let f = fixture();
            let nodes = f
                .service
                .query_cm_handle_ancestors_by_cps_path(
                    "/dmi-registry/cm-handles[@id='ch-1']",
                    FetchDescendantsOption::OMIT_DESCENDANTS,
                )
                .unwrap();
            assert_eq!(nodes.len(), 1);
            assert_eq!(nodes[0].leaf_str("id"), Some("ch-1"));
        }
    }

    mod dmi_plugin {
        use super::*;

        #[test]
        fn test_references_by_dmi_plugin_in_any_role() {
            let f = fixture();
            assert_eq!(
                f.service.get_cm_handle_references_by_dmi_plugin_identifier("dmi-1", false).unwrap(),
                set(&["ch-1", "ch-2"])
            );
            assert_eq!(
                f.service.get_cm_handle_references_by_dmi_plugin_identifier("dmi-2", true).unwrap(),
                set(&["fdn-3"])
            );
            let map = f
                .service
                .get_cm_handle_references_map_by_dmi_plugin_identifier("dmi-2")
                .unwrap();
            assert_eq!(map.get("ch-3").map(String::as_str), Some("fdn-3"));
        }

        #[test]
        fn test_trust_level_uses_effective_level() {
            let f = fixture();
            f.per_dmi_plugin.put("dmi-1".to_string(), TrustLevel::Incomplete);
            f.per_dmi_plugin.put("dmi-2".to_string(), TrustLevel::Complete);
            f.per_cm_handle.put("ch-1".to_string(), TrustLevel::Complete);
            f.per_cm_handle.put("ch-2".to_string(), TrustLevel::None);
            f.per_cm_handle.put("ch-3".to_string(), TrustLevel::Complete);

            let query = |level: &str| {
                f.service
                    .query_cm_handles_by_trust_level(&pairs(&[("trustLevel", level)]), false)
                    .unwrap()
            };
            assert_eq!(query("INCOMPLETE"), set(&["ch-1"]));
            assert_eq!(query("NONE"), set(&["ch-2"]));
            assert_eq!(query("COMPLETE"), set(&["ch-3"]));
        }

        #[test]
        fn test_unknown_trust_level_is_rejected() {
            let f = fixture();
            assert!(f
                .service
                .query_cm_handles_by_trust_level(&pairs(&[("trustLevel", "HALF")]), false)
                .is_err());
        }
    }
}
