//! Multi-condition cm-handle search.

use std::collections::BTreeSet;
use std::sync::Arc;

use cps_store::FetchDescendantsOption;
use tracing::debug;

use crate::error::NcmpResult;
use crate::inventory::{InventoryPersistence, NCMP_DMI_REGISTRY_PARENT};
use crate::models::{NcmpServiceCmHandle, YangModelCmHandle};
use crate::query::types::{
    CmHandleQueryServiceParameters, QueryResult, CM_HANDLE_QUERY_CONDITIONS, CM_HANDLE_WITH_CPS_PATH,
    CM_HANDLE_WITH_DMI_PLUGIN, CM_HANDLE_WITH_TRUST_LEVEL, HAS_ALL_ADDITIONAL_PROPERTIES, HAS_ALL_MODULES,
    HAS_ALL_PROPERTIES, INVENTORY_QUERY_CONDITIONS,
};
use crate::query::validator::CmHandleQueryParametersValidator;
use crate::query::{reference_of, CmHandleQueryService};
use crate::trust::TrustLevelManager;

type SubQuery = fn(&ParameterizedCmHandleQueryService, &CmHandleQueryServiceParameters, bool) -> NcmpResult<QueryResult>;

/// AND-combines cm-handle query conditions.
#[derive(Debug)]
pub struct ParameterizedCmHandleQueryService {
    queries: Arc<CmHandleQueryService>,
    inventory: Arc<InventoryPersistence>,
    trust: Arc<TrustLevelManager>,
    validator: CmHandleQueryParametersValidator,
}

impl ParameterizedCmHandleQueryService {
    /// Creates the service.
    pub fn new(
        queries: Arc<CmHandleQueryService>,
        inventory: Arc<InventoryPersistence>,
        trust: Arc<TrustLevelManager>,
    ) -> Self {
        Self {
            queries,
            inventory,
            trust,
            validator: CmHandleQueryParametersValidator,
        }
    }

    /// References matching the cps-path, public property, module and trust
    /// level conditions.
    pub fn query_cm_handle_reference_ids(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.validator
            .validate_cm_handle_query_parameters(parameters, &CM_HANDLE_QUERY_CONDITIONS)?;
        self.execute_queries(
            parameters,
            output_alternate_id,
            &[
                Self::execute_cps_path_query,
                Self::query_cm_handles_by_public_properties,
                Self::execute_module_name_query,
                Self::query_cm_handles_by_trust_level,
            ],
        )
    }

    /// References matching the cps-path, public property, additional property
    /// and DMI plugin conditions.
    pub fn query_cm_handle_ids_for_inventory(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<BTreeSet<String>> {
        self.validator
            .validate_cm_handle_query_parameters(parameters, &INVENTORY_QUERY_CONDITIONS)?;
        self.execute_queries(
            parameters,
            output_alternate_id,
            &[
                Self::execute_cps_path_query,
                Self::query_cm_handles_by_public_properties,
                Self::query_cm_handles_by_additional_properties,
                Self::query_cm_handles_by_dmi_plugin,
            ],
        )
    }

    /// Full cm-handles matching the search, with effective trust levels.
    pub fn query_cm_handles(&self, parameters: &CmHandleQueryServiceParameters) -> NcmpResult<Vec<NcmpServiceCmHandle>> {
        if parameters.cm_handle_query_parameters.is_empty() {
            return self.get_all_cm_handles();
        }
        let ids: Vec<String> = self
            .query_cm_handle_reference_ids(parameters, false)?
            .into_iter()
            .collect();
        let mut cm_handles: Vec<NcmpServiceCmHandle> = self
            .inventory
            .get_yang_model_cm_handles(&ids)?
            .iter()
            .map(YangModelCmHandle::to_ncmp_service_cm_handle)
            .collect();
        self.trust.apply_effective_trust_levels(&mut cm_handles);
        Ok(cm_handles)
    }

    /// Every registered cm-handle, with effective trust levels.
    pub fn get_all_cm_handles(&self) -> NcmpResult<Vec<NcmpServiceCmHandle>> {
        let registry = self
            .inventory
            .get_data_node(NCMP_DMI_REGISTRY_PARENT, FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS)?;
        let mut cm_handles = Vec::new();
        for node in registry.iter().flat_map(|root| &root.child_data_nodes) {
            cm_handles.push(YangModelCmHandle::from_data_node(node)?.to_ncmp_service_cm_handle());
        }
        self.trust.apply_effective_trust_levels(&mut cm_handles);
        Ok(cm_handles)
    }

    fn execute_queries(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
        sub_queries: &[SubQuery],
    ) -> NcmpResult<BTreeSet<String>> {
        if parameters.cm_handle_query_parameters.is_empty() {
            return self.get_all_cm_handle_references(output_alternate_id);
        }
        let mut combined = QueryResult::NoFilter;
        for sub_query in sub_queries {
            let result = sub_query(self, parameters, output_alternate_id)?;
            if result.is_empty_match() {
                debug!("sub-query matched nothing, skipping the remaining conditions");
                return Ok(BTreeSet::new());
            }
            combined = combined.intersect(result);
            if combined.is_empty_match() {
                return Ok(BTreeSet::new());
            }
        }
        match combined {
            QueryResult::Matches(references) => Ok(references),
            QueryResult::NoFilter => Ok(BTreeSet::new()),
        }
    }

    fn get_all_cm_handle_references(&self, output_alternate_id: bool) -> NcmpResult<BTreeSet<String>> {
        let registry = self
            .inventory
            .get_data_node(NCMP_DMI_REGISTRY_PARENT, FetchDescendantsOption::DIRECT_CHILDREN_ONLY)?;
        Ok(registry
            .iter()
            .flat_map(|root| &root.child_data_nodes)
            .map(|node| reference_of(node, output_alternate_id))
            .collect())
    }

    // ========================================================================
    // Sub-queries
    // ========================================================================

    fn execute_cps_path_query(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let condition = parameters.property_pairs(CM_HANDLE_WITH_CPS_PATH);
        if !self.validator.validate_cps_path_condition_properties(&condition)? {
            return Ok(QueryResult::Matches(BTreeSet::new()));
        }
        let Some(cps_path) = condition.get("cpsPath") else {
            return Ok(QueryResult::NoFilter);
        };
        Ok(self
            .queries
            .query_cm_handle_ancestors_by_cps_path(cps_path, FetchDescendantsOption::OMIT_DESCENDANTS)?
            .iter()
            .map(|node| reference_of(node, output_alternate_id))
            .collect())
    }

    fn query_cm_handles_by_public_properties(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let pairs = parameters.property_pairs(HAS_ALL_PROPERTIES);
        if pairs.is_empty() {
            return Ok(QueryResult::NoFilter);
        }
        Ok(QueryResult::Matches(
            self.queries.query_cm_handle_public_properties(&pairs, output_alternate_id)?,
        ))
    }

    fn query_cm_handles_by_additional_properties(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let pairs = parameters.property_pairs(HAS_ALL_ADDITIONAL_PROPERTIES);
        if pairs.is_empty() {
            return Ok(QueryResult::NoFilter);
        }
        Ok(QueryResult::Matches(
            self.queries.query_cm_handle_additional_properties(&pairs, output_alternate_id)?,
        ))
    }

    fn execute_module_name_query(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let conditions = parameters.conditions(HAS_ALL_MODULES);
        if conditions.is_empty() {
            return Ok(QueryResult::NoFilter);
        }
        let mut module_names = Vec::with_capacity(conditions.len());
        for condition in conditions {
            self.validator.validate_module_name_condition_properties(condition)?;
            if let Some(module_name) = condition.get("moduleName") {
                module_names.push(module_name.as_str());
            }
        }
        Ok(self
            .inventory
            .get_cm_handle_references_with_given_modules(&module_names, output_alternate_id)?
            .into_iter()
            .collect())
    }

    fn query_cm_handles_by_trust_level(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let pairs = parameters.property_pairs(CM_HANDLE_WITH_TRUST_LEVEL);
        if pairs.is_empty() {
            return Ok(QueryResult::NoFilter);
        }
        Ok(QueryResult::Matches(
            self.queries.query_cm_handles_by_trust_level(&pairs, output_alternate_id)?,
        ))
    }

    fn query_cm_handles_by_dmi_plugin(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        output_alternate_id: bool,
    ) -> NcmpResult<QueryResult> {
        let pairs = parameters.property_pairs(CM_HANDLE_WITH_DMI_PLUGIN);
        let Some(dmi_plugin) = pairs.get("dmiPluginName") else {
            return Ok(QueryResult::NoFilter);
        };
        Ok(QueryResult::Matches(
            self.queries
                .get_cm_handle_references_by_dmi_plugin_identifier(dmi_plugin, output_alternate_id)?,
        ))
    }
}
