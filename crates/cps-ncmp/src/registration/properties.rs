//! Partial updates of registered cm-handles.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use cps_path::xpath::child_xpath;
use cps_store::{CpsValidator, DataNode, ErrorKind};
use tracing::{info, warn};

use crate::alternate_id::{AlternateIdChecker, Operation};
use crate::error::{NcmpError, NcmpResult};
use crate::inventory::InventoryPersistence;
use crate::models::{CmHandleRegistrationResponse, NcmpResponseStatus, NcmpServiceCmHandle};

/// The two property lists of a cm-handle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyType {
    Dmi,
    Public,
}

impl PropertyType {
    fn list_name(self) -> &'static str {
        match self {
            PropertyType::Dmi => "additional-properties",
            PropertyType::Public => "public-properties",
        }
    }
}

/// Applies `updated_cm_handles` of a registration.
#[derive(Debug)]
pub struct CmHandlePropertyHandler {
    inventory: Arc<InventoryPersistence>,
    alternate_ids: Arc<AlternateIdChecker>,
}

impl CmHandlePropertyHandler {
    /// Creates the handler.
    pub fn new(inventory: Arc<InventoryPersistence>, alternate_ids: Arc<AlternateIdChecker>) -> Self {
        Self {
            inventory,
            alternate_ids,
        }
    }

    /// Updates alternate id, data producer identifier and properties of each
    /// handle, capturing one response per handle.
    pub fn update_cm_handle_properties(&self, cm_handles: &[NcmpServiceCmHandle]) -> Vec<CmHandleRegistrationResponse> {
        let rejected: HashSet<String> = match self
            .alternate_ids
            .ids_of_cm_handles_with_rejected_alternate_id(cm_handles, Operation::Update)
        {
            Ok(rejected) => rejected.into_iter().collect(),
            Err(error) => {
                let ids: Vec<&str> = cm_handles.iter().map(|h| h.cm_handle_id.as_str()).collect();
                return CmHandleRegistrationResponse::failures_from_error(&ids, &error);
            }
        };
        cm_handles
            .iter()
            .map(|cm_handle| {
                let cm_handle_id = cm_handle.cm_handle_id.as_str();
                if rejected.contains(cm_handle_id) {
                    return CmHandleRegistrationResponse::failure(
                        cm_handle_id,
                        NcmpResponseStatus::AlternateIdAlreadyAssociated,
                    );
                }
                match self.update(cm_handle) {
                    Ok(()) => CmHandleRegistrationResponse::success(cm_handle_id),
                    Err(error) => to_failure(cm_handle_id, &error),
                }
            })
            .collect()
    }

    fn update(&self, cm_handle: &NcmpServiceCmHandle) -> NcmpResult<()> {
        CpsValidator.validate_name(&cm_handle.cm_handle_id)?;
        let nodes = self
            .inventory
            .get_cm_handle_data_node_by_cm_handle_id(&cm_handle.cm_handle_id)?;
        let Some(existing) = nodes.first() else {
            return Ok(());
        };
        if !cm_handle.alternate_id.trim().is_empty() {
            self.inventory
                .update_cm_handle_field(&cm_handle.cm_handle_id, "alternate-id", cm_handle.alternate_id.trim())?;
        }
        self.update_data_producer_identifier(existing, cm_handle)?;
        self.update_properties(existing, PropertyType::Dmi, &cm_handle.dmi_properties)?;
        self.update_properties(existing, PropertyType::Public, &cm_handle.public_properties)
    }

    fn update_data_producer_identifier(&self, existing: &DataNode, cm_handle: &NcmpServiceCmHandle) -> NcmpResult<()> {
        let proposed = cm_handle.data_producer_identifier.trim();
        if proposed.is_empty() {
            return Ok(());
        }
        let current = existing.leaf_str("data-producer-identifier").unwrap_or("");
        if current.is_empty() {
            info!(cm_handle_id = %cm_handle.cm_handle_id, data_producer_identifier = proposed, "setting data producer identifier");
            return self.inventory.update_cm_handle_field(
                &cm_handle.cm_handle_id,
                "data-producer-identifier",
                proposed,
            );
        }
        if current != proposed {
            warn!(
                cm_handle_id = %cm_handle.cm_handle_id,
                current,
                proposed,
                "data producer identifier cannot be changed once set"
            );
        }
        Ok(())
    }

    fn update_properties(
        &self,
        existing: &DataNode,
        property_type: PropertyType,
        updates: &BTreeMap<String, Option<String>>,
    ) -> NcmpResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let list_name = property_type.list_name();
        let current: Vec<&DataNode> = existing.list_elements(list_name).collect();
        let mut replacement: Vec<DataNode> = current
            .iter()
            .filter(|node| node.leaf_str("name").is_some_and(|name| !updates.contains_key(name)))
            .map(|node| (*node).clone())
            .collect();
        replacement.extend(updates.iter().filter_map(|(name, value)| {
            value.as_ref().map(|value| {
                DataNode::builder()
                    .with_xpath(child_xpath(&existing.xpath, list_name, &[("name", name)]))
                    .with_leaf("name", name.as_str())
                    .with_leaf("value", value.as_str())
                    .build()
            })
        }));

        if replacement.is_empty() {
            for node in current {
                info!(xpath = %node.xpath, "removing cm-handle property");
                self.inventory.delete_data_node(&node.xpath)?;
            }
            return Ok(());
        }
        self.inventory.replace_list_content(&existing.xpath, &replacement)
    }
}

/// Maps a per-handle failure to its response code.
pub(crate) fn to_failure(cm_handle_id: &str, error: &NcmpError) -> CmHandleRegistrationResponse {
    if let NcmpError::AlternateIdAlreadyAssociated { .. } = error {
        return CmHandleRegistrationResponse::failure(
            cm_handle_id,
            NcmpResponseStatus::AlternateIdAlreadyAssociated,
        );
    }
    match error.kind() {
        ErrorKind::NotFound => {
            CmHandleRegistrationResponse::failure(cm_handle_id, NcmpResponseStatus::CmHandlesNotFound)
        }
        ErrorKind::Validation => {
            CmHandleRegistrationResponse::failure(cm_handle_id, NcmpResponseStatus::CmHandleInvalidId)
        }
        _ => CmHandleRegistrationResponse::failure_from_error(cm_handle_id, error),
    }
}
