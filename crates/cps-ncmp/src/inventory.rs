//! Persistence of the cm-handle registry.
//!
//! Every cm-handle is one element of the `/dmi-registry/cm-handles` list in
//! the registry anchor. Module data lives in the operational dataspace, where
//! each cm-handle owns a schema set and an anchor named by its id.

use std::collections::{BTreeMap, HashMap, HashSet};

use cps_path::quote;
use cps_path::xpath::{child_xpath, list_element_keys, segment_name, split_xpath_segments};
use cps_store::{
    CascadeDeleteAllowed, CpsError, CpsStore, CpsValidator, DataNode, ErrorKind,
    FetchDescendantsOption, ModuleReference, YangResource,
};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::NcmpConfig;
use crate::error::{NcmpError, NcmpResult};
use crate::models::{CompositeState, YangModelCmHandle};

/// Parent xpath of the cm-handle list.
pub const NCMP_DMI_REGISTRY_PARENT: &str = "/dmi-registry";

/// Name of the cm-handle list.
pub const CM_HANDLES: &str = "cm-handles";

const DMI_REGISTRY_YANG: &str = include_str!("../resources/dmi-registry@2024-02-23.yang");

/// Xpath of a cm-handle record.
///
/// ```rust
/// use cps_ncmp::inventory::cm_handle_xpath;
///
/// assert_eq!(cm_handle_xpath("ch-1"), "/dmi-registry/cm-handles[@id='ch-1']");
/// ```
pub fn cm_handle_xpath(cm_handle_id: &str) -> String {
    child_xpath(NCMP_DMI_REGISTRY_PARENT, CM_HANDLES, &[("id", cm_handle_id)])
}

/// CPS path selecting the cm-handle holding `alternate_id`.
pub fn alternate_id_cps_path(alternate_id: &str) -> String {
    format!("{NCMP_DMI_REGISTRY_PARENT}/{CM_HANDLES}[@alternate-id={}]", quote(alternate_id))
}

/// Id of the cm-handle an xpath belongs to, if the xpath is inside the registry.
///
/// ```rust
/// use cps_ncmp::inventory::cm_handle_id_of;
///
/// let xpath = "/dmi-registry/cm-handles[@id='ch-1']/state";
/// assert_eq!(cm_handle_id_of(xpath).as_deref(), Some("ch-1"));
/// assert_eq!(cm_handle_id_of("/dmi-registry"), None);
/// ```
pub fn cm_handle_id_of(xpath: &str) -> Option<String> {
    let segments = split_xpath_segments(xpath);
    let position = segments
        .iter()
        .position(|segment| segment_name(segment) == CM_HANDLES)?;
    let list_element = format!("/{}", segments[..=position].join("/"));
    list_element_keys(&list_element)
        .ok()?
        .into_iter()
        .find_map(|(key, value)| (key == "id").then_some(value))
}

/// Reads and writes cm-handle records.
#[derive(Debug)]
pub struct InventoryPersistence {
    store: CpsStore,
    config: NcmpConfig,
    // Serializes alternate-id checks with the writes they guard.
    alternate_id_guard: Mutex<()>,
}

impl InventoryPersistence {
    /// Creates the persistence layer over an existing store.
    pub fn new(store: CpsStore, config: NcmpConfig) -> Self {
        Self {
            store,
            config,
            alternate_id_guard: Mutex::new(()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &CpsStore {
        &self.store
    }

    /// The configuration.
    pub fn config(&self) -> &NcmpConfig {
        &self.config
    }

    /// Creates the dataspaces, the registry schema set, its anchor and the
    /// empty `/dmi-registry` container. Parts that already exist are kept.
    pub fn initialize(&self) -> NcmpResult<()> {
        let admin = self.store.admin();
        for dataspace in [&self.config.dataspace, &self.config.operational_dataspace] {
            ignore_already_defined(admin.create_dataspace(dataspace))?;
        }
        let resource = YangResource::new("dmi-registry@2024-02-23.yang", DMI_REGISTRY_YANG)?;
        ignore_already_defined(admin.create_schema_set(
            &self.config.dataspace,
            &self.config.dmi_registry_schema_set,
            vec![resource],
        ))?;
        ignore_already_defined(
            admin
                .create_anchor(
                    &self.config.dataspace,
                    &self.config.dmi_registry_schema_set,
                    &self.config.dmi_registry_anchor,
                )
                .map(|_| ()),
        )?;
        ignore_already_defined(self.store.data().save_data(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            r#"{"dmi-registry": {}}"#,
        ))?;
        info!(
            dataspace = %self.config.dataspace,
            anchor = %self.config.dmi_registry_anchor,
            "cm-handle registry initialized"
        );
        Ok(())
    }

    // ========================================================================
    // Composite state
    // ========================================================================

    /// The composite state of a cm-handle.
    pub fn get_cm_handle_state(&self, cm_handle_id: &str) -> NcmpResult<CompositeState> {
        CpsValidator.validate_name(cm_handle_id)?;
        let xpath = format!("{}/state", cm_handle_xpath(cm_handle_id));
        let nodes = self.get_data_node(&xpath, FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS)?;
        match nodes.first() {
            Some(node) => CompositeState::from_data_node(node),
            None => Err(self.not_found(xpath)),
        }
    }

    /// Replaces the composite state of a cm-handle.
    pub fn save_cm_handle_state(&self, cm_handle_id: &str, composite_state: &CompositeState) -> NcmpResult<()> {
        let states = BTreeMap::from([(cm_handle_id.to_string(), composite_state.clone())]);
        self.save_cm_handle_state_batch(&states)
    }

    /// Replaces the composite states of several cm-handles in one store call.
    pub fn save_cm_handle_state_batch(&self, states: &BTreeMap<String, CompositeState>) -> NcmpResult<()> {
        if states.is_empty() {
            return Ok(());
        }
        let mut payloads = BTreeMap::new();
        for (cm_handle_id, composite_state) in states {
            let payload = serde_json::to_string(&json!({ "state": composite_state }))?;
            payloads.insert(cm_handle_xpath(cm_handle_id), payload);
        }
        self.store.data().update_data_nodes_and_descendants(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            &payloads,
        )?;
        debug!(count = states.len(), "saved cm-handle states");
        Ok(())
    }

    // ========================================================================
    // Cm-handle records
    // ========================================================================

    /// A cm-handle with its state and properties.
    pub fn get_yang_model_cm_handle(&self, cm_handle_id: &str) -> NcmpResult<YangModelCmHandle> {
        CpsValidator.validate_name(cm_handle_id)?;
        let nodes = self.get_cm_handle_data_node_by_cm_handle_id(cm_handle_id)?;
        match nodes.first() {
            Some(node) => YangModelCmHandle::from_data_node(node),
            None => Err(self.not_found(cm_handle_xpath(cm_handle_id))),
        }
    }

    /// The cm-handles that exist among `cm_handle_ids`. Invalid ids are
    /// logged and skipped.
    pub fn get_yang_model_cm_handles<S: AsRef<str>>(&self, cm_handle_ids: &[S]) -> NcmpResult<Vec<YangModelCmHandle>> {
        let valid = valid_cm_handle_ids(cm_handle_ids);
        to_yang_model_cm_handles(&self.get_cm_handle_data_nodes_with_option(
            &valid,
            FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS,
        )?)
    }

    /// Like [`get_yang_model_cm_handles`](Self::get_yang_model_cm_handles)
    /// but without state and properties.
    pub fn get_yang_model_cm_handles_without_properties<S: AsRef<str>>(
        &self,
        cm_handle_ids: &[S],
    ) -> NcmpResult<Vec<YangModelCmHandle>> {
        let valid = valid_cm_handle_ids(cm_handle_ids);
        to_yang_model_cm_handles(
            &self.get_cm_handle_data_nodes_with_option(&valid, FetchDescendantsOption::OMIT_DESCENDANTS)?,
        )
    }

    /// The cm-handle holding `alternate_id`.
    pub fn get_yang_model_cm_handle_by_alternate_id(&self, alternate_id: &str) -> NcmpResult<YangModelCmHandle> {
        let node = self.get_cm_handle_data_node_by_alternate_id(
            alternate_id,
            FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS,
        )?;
        YangModelCmHandle::from_data_node(&node)
    }

    /// The cm-handles holding any of `alternate_ids`; unknown ids are skipped.
    pub fn get_yang_model_cm_handles_by_alternate_ids<S: AsRef<str>>(
        &self,
        alternate_ids: &[S],
    ) -> NcmpResult<Vec<YangModelCmHandle>> {
        to_yang_model_cm_handles(
            &self.query_by_alternate_ids(alternate_ids, FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS)?,
        )
    }

    /// Which cm-handle holds each of `alternate_ids`, read with one query.
    /// Alternate ids nobody holds are absent from the map.
    pub fn get_alternate_id_holders<S: AsRef<str>>(&self, alternate_ids: &[S]) -> NcmpResult<HashMap<String, String>> {
        Ok(self
            .query_by_alternate_ids(alternate_ids, FetchDescendantsOption::OMIT_DESCENDANTS)?
            .iter()
            .filter_map(|node| {
                let alternate_id = node.leaf_str("alternate-id")?;
                let cm_handle_id = node.leaf_str("id")?;
                Some((alternate_id.to_string(), cm_handle_id.to_string()))
            })
            .collect())
    }

    fn query_by_alternate_ids<S: AsRef<str>>(
        &self,
        alternate_ids: &[S],
        option: FetchDescendantsOption,
    ) -> NcmpResult<Vec<DataNode>> {
        let conditions: Vec<String> = alternate_ids
            .iter()
            .map(|alternate_id| alternate_id.as_ref().trim())
            .filter(|alternate_id| !alternate_id.is_empty())
            .map(|alternate_id| format!("@alternate-id={}", quote(alternate_id)))
            .collect();
        if conditions.is_empty() {
            return Ok(Vec::new());
        }
        let cps_path = format!(
            "{NCMP_DMI_REGISTRY_PARENT}/{CM_HANDLES}[{}]",
            conditions.join(" or ")
        );
        self.query_registry(&cps_path, option)
    }

    /// Persists a new cm-handle.
    ///
    /// Fails with [`NcmpError::AlternateIdAlreadyAssociated`] if its alternate
    /// id is held by another handle.
    pub fn save_cm_handle(&self, cm_handle: &YangModelCmHandle) -> NcmpResult<()> {
        if self.save_cm_handle_batch(std::slice::from_ref(cm_handle))?.is_empty() {
            return Ok(());
        }
        Err(NcmpError::AlternateIdAlreadyAssociated {
            cm_handle_id: cm_handle.id.clone(),
            alternate_id: cm_handle.alternate_id.clone(),
        })
    }

    /// Persists new cm-handles in batches.
    ///
    /// A handle whose alternate id is held by another handle, or claimed by
    /// an earlier handle of the batch, is not written; the ids of those
    /// handles are returned. Existing ids fail with [`CpsError::AlreadyDefined`].
    pub fn save_cm_handle_batch(&self, cm_handles: &[YangModelCmHandle]) -> NcmpResult<Vec<String>> {
        if cm_handles.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.alternate_id_guard.lock();
        let (accepted, rejected) = self.partition_by_free_alternate_id(cm_handles)?;
        for batch in accepted.chunks(self.config.persist_batch_size.max(1)) {
            let payload = serde_json::to_string(&json!({ CM_HANDLES: batch }))?;
            self.store.data().save_list_elements(
                &self.config.dataspace,
                &self.config.dmi_registry_anchor,
                NCMP_DMI_REGISTRY_PARENT,
                &payload,
            )?;
            debug!(count = batch.len(), "persisted cm-handles");
        }
        Ok(rejected)
    }

    fn partition_by_free_alternate_id<'a>(
        &self,
        cm_handles: &'a [YangModelCmHandle],
    ) -> NcmpResult<(Vec<&'a YangModelCmHandle>, Vec<String>)> {
        let proposed: Vec<&str> = cm_handles.iter().map(|cm_handle| cm_handle.alternate_id.as_str()).collect();
        let holders = self.get_alternate_id_holders(&proposed)?;
        let mut claimed = HashSet::new();
        let mut accepted = Vec::with_capacity(cm_handles.len());
        let mut rejected = Vec::new();
        for cm_handle in cm_handles {
            let alternate_id = cm_handle.alternate_id.trim();
            let held_by_other = holders
                .get(alternate_id)
                .is_some_and(|holder| *holder != cm_handle.id);
            if !alternate_id.is_empty() && (held_by_other || !claimed.insert(alternate_id)) {
                warn!(
                    cm_handle_id = %cm_handle.id,
                    alternate_id,
                    "alternate id taken at write time, cm-handle not persisted"
                );
                rejected.push(cm_handle.id.clone());
            } else {
                accepted.push(cm_handle);
            }
        }
        Ok((accepted, rejected))
    }

    // ========================================================================
    // Data nodes
    // ========================================================================

    /// The record of a cm-handle as a data node, with all descendants.
    pub fn get_cm_handle_data_node_by_cm_handle_id(&self, cm_handle_id: &str) -> NcmpResult<Vec<DataNode>> {
        self.get_data_node(
            &cm_handle_xpath(cm_handle_id),
            FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS,
        )
    }

    /// The record of the cm-handle holding `alternate_id`.
    pub fn get_cm_handle_data_node_by_alternate_id(
        &self,
        alternate_id: &str,
        option: FetchDescendantsOption,
    ) -> NcmpResult<DataNode> {
        let cps_path = alternate_id_cps_path(alternate_id);
        self.query_registry(&cps_path, option)?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(cps_path))
    }

    /// Records of the cm-handles among `cm_handle_ids`; unknown ids are skipped.
    pub fn get_cm_handle_data_nodes<S: AsRef<str>>(&self, cm_handle_ids: &[S]) -> NcmpResult<Vec<DataNode>> {
        self.get_cm_handle_data_nodes_with_option(cm_handle_ids, FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS)
    }

    fn get_cm_handle_data_nodes_with_option<S: AsRef<str>>(
        &self,
        cm_handle_ids: &[S],
        option: FetchDescendantsOption,
    ) -> NcmpResult<Vec<DataNode>> {
        if cm_handle_ids.is_empty() {
            return Ok(Vec::new());
        }
        let xpaths: Vec<String> = cm_handle_ids
            .iter()
            .map(|id| cm_handle_xpath(id.as_ref()))
            .collect();
        self.get_data_nodes(&xpaths, option)
    }

    /// Returns true if a record exists for `cm_handle_id`.
    pub fn is_existing_cm_handle_id(&self, cm_handle_id: &str) -> NcmpResult<bool> {
        match self.get_data_node(&cm_handle_xpath(cm_handle_id), FetchDescendantsOption::OMIT_DESCENDANTS) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Ids (or alternate ids) of the cm-handles whose module set contains
    /// every module in `module_names`.
    pub fn get_cm_handle_references_with_given_modules<S: AsRef<str>>(
        &self,
        module_names: &[S],
        output_alternate_id: bool,
    ) -> NcmpResult<Vec<String>> {
        let cm_handle_ids = self
            .store
            .admin()
            .query_anchor_names(&self.config.operational_dataspace, module_names)?;
        if !output_alternate_id {
            return Ok(cm_handle_ids);
        }
        Ok(self
            .get_yang_model_cm_handles_without_properties(&cm_handle_ids)?
            .into_iter()
            .map(|cm_handle| cm_handle.alternate_id)
            .collect())
    }

    /// Sets one leaf of a cm-handle record in place.
    pub fn update_cm_handle_field(&self, cm_handle_id: &str, field: &str, value: &str) -> NcmpResult<()> {
        let values = BTreeMap::from([(cm_handle_id.to_string(), value.to_string())]);
        self.update_cm_handle_fields(field, &values)
    }

    /// Sets one leaf on several cm-handle records in one store call.
    ///
    /// Setting `alternate-id` to a value held by another handle fails with
    /// [`NcmpError::AlternateIdAlreadyAssociated`].
    pub fn update_cm_handle_fields(&self, field: &str, values: &BTreeMap<String, String>) -> NcmpResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let _guard = self.alternate_id_guard.lock();
        if field == "alternate-id" {
            let proposed: Vec<&str> = values.values().map(String::as_str).collect();
            let holders = self.get_alternate_id_holders(&proposed)?;
            for (cm_handle_id, alternate_id) in values {
                if holders
                    .get(alternate_id.trim())
                    .is_some_and(|holder| holder != cm_handle_id)
                {
                    return Err(NcmpError::AlternateIdAlreadyAssociated {
                        cm_handle_id: cm_handle_id.clone(),
                        alternate_id: alternate_id.clone(),
                    });
                }
            }
        }
        let records: Vec<serde_json::Value> = values
            .iter()
            .map(|(cm_handle_id, value)| json!({ "id": cm_handle_id, field: value }))
            .collect();
        let payload = serde_json::to_string(&json!({ CM_HANDLES: records }))?;
        self.store.data().update_node_leaves(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            NCMP_DMI_REGISTRY_PARENT,
            &payload,
        )?;
        debug!(field, count = values.len(), "updated cm-handle field");
        Ok(())
    }

    /// Modules synced for a cm-handle.
    pub fn get_yang_resources_module_references(&self, cm_handle_id: &str) -> NcmpResult<Vec<ModuleReference>> {
        CpsValidator.validate_name(cm_handle_id)?;
        Ok(self
            .store
            .admin()
            .get_yang_resources_module_references(&self.config.operational_dataspace, cm_handle_id)?)
    }

    /// Deletes a cm-handle's schema set with its anchor; a missing schema set
    /// is logged and ignored.
    pub fn delete_schema_set_with_cascade(&self, schema_set_name: &str) -> NcmpResult<()> {
        CpsValidator.validate_name(schema_set_name)?;
        match self.store.admin().delete_schema_set(
            &self.config.operational_dataspace,
            schema_set_name,
            CascadeDeleteAllowed::Allowed,
        ) {
            Err(CpsError::SchemaSetNotFound { .. }) => {
                warn!(schema_set = schema_set_name, "schema set not found, nothing to delete");
                Ok(())
            }
            result => Ok(result?),
        }
    }

    /// Deletes several schema sets with their anchors; missing ones are skipped.
    pub fn delete_schema_sets_with_cascade<S: AsRef<str>>(&self, schema_set_names: &[S]) -> NcmpResult<()> {
        CpsValidator.validate_names(schema_set_names)?;
        Ok(self
            .store
            .admin()
            .delete_schema_sets_with_cascade(&self.config.operational_dataspace, schema_set_names)?)
    }

    // ========================================================================
    // Registry anchor passthroughs
    // ========================================================================

    /// Data nodes at `xpath` in the registry.
    pub fn get_data_node(&self, xpath: &str, option: FetchDescendantsOption) -> NcmpResult<Vec<DataNode>> {
        Ok(self.store.data().get_data_nodes(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            xpath,
            option,
        )?)
    }

    /// Data nodes at several xpaths in the registry; unknown xpaths are skipped.
    pub fn get_data_nodes<S: AsRef<str>>(&self, xpaths: &[S], option: FetchDescendantsOption) -> NcmpResult<Vec<DataNode>> {
        Ok(self.store.data().get_data_nodes_for_multiple_xpaths(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            xpaths,
            option,
        )?)
    }

    /// Runs a CPS path query against the registry.
    pub fn query_registry(&self, cps_path: &str, option: FetchDescendantsOption) -> NcmpResult<Vec<DataNode>> {
        Ok(self.store.query().query_data_nodes(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            cps_path,
            option,
            None,
        )?)
    }

    /// Makes the list under `parent_xpath` hold exactly `nodes`.
    pub fn replace_list_content(&self, parent_xpath: &str, nodes: &[DataNode]) -> NcmpResult<()> {
        Ok(self.store.data().replace_list_content(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            parent_xpath,
            nodes,
        )?)
    }

    /// Deletes the node at `xpath`; fails if it does not exist.
    pub fn delete_data_node(&self, xpath: &str) -> NcmpResult<()> {
        Ok(self.store.data().delete_data_node(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            xpath,
        )?)
    }

    /// Deletes the nodes at `xpaths`; missing ones are skipped.
    pub fn delete_data_nodes<S: AsRef<str>>(&self, xpaths: &[S]) -> NcmpResult<()> {
        Ok(self.store.data().delete_data_nodes(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            xpaths,
        )?)
    }

    /// Deletes a list element, or a whole list.
    pub fn delete_list_or_list_element(&self, xpath: &str) -> NcmpResult<()> {
        Ok(self.store.data().delete_list_or_list_element(
            &self.config.dataspace,
            &self.config.dmi_registry_anchor,
            xpath,
        )?)
    }

    fn not_found(&self, xpath: String) -> NcmpError {
        NcmpError::Cps(CpsError::DataNodeNotFound {
            dataspace: self.config.dataspace.clone(),
            anchor: self.config.dmi_registry_anchor.clone(),
            xpath,
        })
    }
}

fn ignore_already_defined(result: Result<(), CpsError>) -> Result<(), CpsError> {
    match result {
        Err(CpsError::AlreadyDefined { .. }) => Ok(()),
        other => other,
    }
}

fn valid_cm_handle_ids<S: AsRef<str>>(cm_handle_ids: &[S]) -> Vec<&str> {
    cm_handle_ids
        .iter()
        .map(AsRef::as_ref)
        .filter(|id| match CpsValidator.validate_name(id) {
            Ok(()) => true,
            Err(e) => {
                error!(cm_handle_id = %id, error = %e, "invalid cm-handle id skipped");
                false
            }
        })
        .collect()
}

fn to_yang_model_cm_handles(nodes: &[DataNode]) -> NcmpResult<Vec<YangModelCmHandle>> {
    nodes.iter().map(YangModelCmHandle::from_data_node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CmHandleState;
    use crate::state::set_composite_state;

    fn inventory() -> InventoryPersistence {
        let inventory = InventoryPersistence::new(CpsStore::new(), NcmpConfig::default());
        inventory.initialize().unwrap();
        inventory
    }

    fn cm_handle(id: &str, alternate_id: &str) -> YangModelCmHandle {
        let mut state = CompositeState::default();
        set_composite_state(CmHandleState::Advised, &mut state);
        YangModelCmHandle {
            id: id.to_string(),
            dmi_service_name: "dmi-1".to_string(),
            alternate_id: alternate_id.to_string(),
            composite_state: Some(state),
            ..Default::default()
        }
    }

    mod records {
        use super::*;
        use crate::models::Property;

        #[test]
        fn test_initialize_is_repeatable() {
            let inventory = inventory();
            inventory.initialize().unwrap();
            assert!(inventory.get_yang_model_cm_handles(&["ch-1"]).unwrap().is_empty());
        }

        #[test]
        fn test_save_and_read_back() {
            let inventory = inventory();
            let mut record = cm_handle("ch-1", "fdn-1");
            record.public_properties = vec![Property::new("color", "red")];
            inventory.save_cm_handle(&record).unwrap();

            let read = inventory.get_yang_model_cm_handle("ch-1").unwrap();
            assert_eq!(read.alternate_id, "fdn-1");
            assert_eq!(read.public_properties, record.public_properties);
            assert_eq!(read.cm_handle_state(), Some(CmHandleState::Advised));

            let by_alternate_id = inventory.get_yang_model_cm_handle_by_alternate_id("fdn-1").unwrap();
            assert_eq!(by_alternate_id.id, "ch-1");
            assert!(inventory.is_existing_cm_handle_id("ch-1").unwrap());
            assert!(!inventory.is_existing_cm_handle_id("ch-2").unwrap());
        }

        #[test]
        fn test_duplicate_id_is_already_defined() {
            let inventory = inventory();
            inventory.save_cm_handle(&cm_handle("ch-1", "")).unwrap();
            let err = inventory.save_cm_handle(&cm_handle("ch-1", "")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AlreadyDefined);
        }

        #[test]
        fn test_bulk_read_skips_invalid_and_unknown_ids() {
            let inventory = inventory();
            inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", ""), cm_handle("ch-2", "")])
                .unwrap();
            let found = inventory
                .get_yang_model_cm_handles(&["ch-1", "bad id!", "ch-9", "ch-2"])
                .unwrap();
            let ids: Vec<&str> = found.iter().map(|h| h.id.as_str()).collect();
            assert_eq!(ids.len(), 2);
            assert!(ids.contains(&"ch-1") && ids.contains(&"ch-2"));

            let bare = inventory.get_yang_model_cm_handles_without_properties(&["ch-1"]).unwrap();
            assert!(bare[0].composite_state.is_none());
        }

        #[test]
        fn test_lookup_by_alternate_ids() {
            let inventory = inventory();
            inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", "fdn-1"), cm_handle("ch-2", "fdn-2"), cm_handle("ch-3", "")])
                .unwrap();
            let found = inventory
                .get_yang_model_cm_handles_by_alternate_ids(&["fdn-2", "fdn-9", ""])
                .unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, "ch-2");
            assert!(inventory.get_yang_model_cm_handle_by_alternate_id("fdn-9").is_err());
        }

        #[test]
        fn test_persist_in_small_batches() {
            let config = NcmpConfig::builder().with_persist_batch_size(2).build();
            let inventory = InventoryPersistence::new(CpsStore::new(), config);
            inventory.initialize().unwrap();
            let records: Vec<_> = (0..5).map(|i| cm_handle(&format!("ch-{i}"), "")).collect();
            inventory.save_cm_handle_batch(&records).unwrap();
            assert_eq!(inventory.get_cm_handle_data_nodes(&["ch-0", "ch-4"]).unwrap().len(), 2);
        }
    }

    mod alternate_id_guard {
        use super::*;

        #[test]
        fn test_alternate_id_of_another_handle_is_rejected() {
            let inventory = inventory();
            inventory.save_cm_handle(&cm_handle("ch-1", "fdn-1")).unwrap();
            let err = inventory.save_cm_handle(&cm_handle("ch-2", "fdn-1")).unwrap_err();
            assert!(matches!(err, NcmpError::AlternateIdAlreadyAssociated { .. }));
            assert!(!inventory.is_existing_cm_handle_id("ch-2").unwrap());
        }

        #[test]
        fn test_alternate_id_repeated_in_batch_skips_only_the_later_handle() {
            let inventory = inventory();
            let skipped = inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", "fdn-1"), cm_handle("ch-2", "fdn-1"), cm_handle("ch-3", "fdn-3")])
                .unwrap();
            assert_eq!(skipped, vec!["ch-2".to_string()]);
            assert!(inventory.is_existing_cm_handle_id("ch-1").unwrap());
            assert!(!inventory.is_existing_cm_handle_id("ch-2").unwrap());
            assert!(inventory.is_existing_cm_handle_id("ch-3").unwrap());
        }

        #[test]
        fn test_batch_with_held_alternate_id_persists_the_others() {
            let inventory = inventory();
            inventory.save_cm_handle(&cm_handle("ch-1", "fdn-1")).unwrap();
            let skipped = inventory
                .save_cm_handle_batch(&[cm_handle("ch-2", "fdn-1"), cm_handle("ch-3", "fdn-3")])
                .unwrap();
            assert_eq!(skipped, vec!["ch-2".to_string()]);
            assert!(inventory.is_existing_cm_handle_id("ch-3").unwrap());
        }

        #[test]
        fn test_alternate_id_holders_in_one_read() {
            let inventory = inventory();
            inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", "fdn-1"), cm_handle("ch-2", "fdn-2"), cm_handle("ch-3", "")])
                .unwrap();
            let holders = inventory.get_alternate_id_holders(&["fdn-1", "fdn-2", "fdn-9", ""]).unwrap();
            assert_eq!(holders.len(), 2);
            assert_eq!(holders["fdn-1"], "ch-1");
            assert_eq!(holders["fdn-2"], "ch-2");
        }

        #[test]
        fn test_field_update_guards_alternate_id() {
            let inventory = inventory();
            inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", "fdn-1"), cm_handle("ch-2", "")])
                .unwrap();
            assert!(inventory.update_cm_handle_field("ch-2", "alternate-id", "fdn-1").is_err());
            inventory.update_cm_handle_field("ch-1", "alternate-id", "fdn-1").unwrap();
            inventory.update_cm_handle_field("ch-2", "alternate-id", "fdn-2").unwrap();
            assert_eq!(inventory.get_yang_model_cm_handle("ch-2").unwrap().alternate_id, "fdn-2");
        }
    }

    mod state {
        use super::*;

        #[test]
        fn test_state_batch_round_trip() {
            let inventory = inventory();
            inventory
                .save_cm_handle_batch(&[cm_handle("ch-1", ""), cm_handle("ch-2", "")])
                .unwrap();
            let mut ready = CompositeState::default();
            set_composite_state(CmHandleState::Ready, &mut ready);
            let mut locked = CompositeState::default();
            set_composite_state(CmHandleState::Locked, &mut locked);
            inventory
                .save_cm_handle_state_batch(&BTreeMap::from([
                    ("ch-1".to_string(), ready),
                    ("ch-2".to_string(), locked),
                    ("ch-9".to_string(), CompositeState::default()),
                ]))
                .unwrap();
            assert_eq!(inventory.get_cm_handle_state("ch-1").unwrap().cm_handle_state, CmHandleState::Ready);
            assert_eq!(inventory.get_cm_handle_state("ch-2").unwrap().cm_handle_state, CmHandleState::Locked);
            assert_eq!(inventory.get_cm_handle_state("ch-9").unwrap_err().kind(), ErrorKind::NotFound);
        }
    }

    mod modules {
        use super::*;

        #[test]
        fn test_references_with_given_modules() {
            let inventory = inventory();
            inventory.save_cm_handle(&cm_handle("ch-1", "fdn-1")).unwrap();
            let admin = inventory.store().admin();
            let module = YangResource::new("m1.yang", "module m1 { revision 2024-01-01; }").unwrap();
            admin.create_schema_set("NFP-Operational", "ch-1", vec![module]).unwrap();
            admin.create_anchor("NFP-Operational", "ch-1", "ch-1").unwrap();

            assert_eq!(inventory.get_cm_handle_references_with_given_modules(&["m1"], false).unwrap(), vec!["ch-1"]);
            assert_eq!(inventory.get_cm_handle_references_with_given_modules(&["m1"], true).unwrap(), vec!["fdn-1"]);
            assert!(inventory.get_cm_handle_references_with_given_modules(&["m2"], false).unwrap().is_empty());
            assert_eq!(inventory.get_yang_resources_module_references("ch-1").unwrap()[0].module_name, "m1");

            inventory.delete_schema_set_with_cascade("ch-1").unwrap();
            inventory.delete_schema_set_with_cascade("ch-1").unwrap();
            assert!(inventory.get_cm_handle_references_with_given_modules(&["m1"], false).unwrap().is_empty());
        }
    }

    #[test]
    fn test_cm_handle_id_of() {
        assert_eq!(
            cm_handle_id_of("/dmi-registry/cm-handles[@id='ch-1']/public-properties[@name='x']").as_deref(),
            Some("ch-1")
        );
        assert_eq!(alternate_id_cps_path("a'b"), "/dmi-registry/cm-handles[@alternate-id=\"a'b\"]");
    }
}
