//! Alternate-id acceptance for registrations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::error::NcmpResult;
use crate::inventory::InventoryPersistence;
use crate::models::NcmpServiceCmHandle;

/// Registration category a batch of handles comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// New handles: nothing is stored yet.
    Create,
    /// Existing handles: compared against their stored alternate id.
    Update,
}

/// Decides which proposed alternate ids may be applied.
///
/// This is an advisory check; the inventory re-checks under its write guard.
#[derive(Debug)]
pub struct AlternateIdChecker {
    inventory: Arc<InventoryPersistence>,
}

impl AlternateIdChecker {
    /// Creates a checker reading from `inventory`.
    pub fn new(inventory: Arc<InventoryPersistence>) -> Self {
        Self { inventory }
    }

    /// Whether `proposed_alternate_id` may be set on a handle whose stored
    /// alternate id is `current_alternate_id`.
    ///
    /// A blank current id accepts any id nobody holds; otherwise only the
    /// current id itself is accepted.
    pub fn can_apply_alternate_id(
        &self,
        cm_handle_id: &str,
        current_alternate_id: &str,
        proposed_alternate_id: &str,
    ) -> NcmpResult<bool> {
        let holders = self.inventory.get_alternate_id_holders(&[proposed_alternate_id])?;
        Ok(accepts(cm_handle_id, current_alternate_id, proposed_alternate_id, &holders))
    }

    /// Ids of the handles whose proposed alternate id is rejected.
    ///
    /// Within the batch the first handle proposing an alternate id wins; an
    /// empty proposal is always accepted. Stored alternate ids are read once
    /// per batch.
    pub fn ids_of_cm_handles_with_rejected_alternate_id(
        &self,
        cm_handles: &[NcmpServiceCmHandle],
        operation: Operation,
    ) -> NcmpResult<Vec<String>> {
        let proposed: Vec<&str> = cm_handles
            .iter()
            .map(|cm_handle| cm_handle.alternate_id.as_str())
            .filter(|alternate_id| !alternate_id.is_empty())
            .collect();
        if proposed.is_empty() {
            return Ok(Vec::new());
        }
        let holders = self.inventory.get_alternate_id_holders(&proposed)?;
        let current = match operation {
            Operation::Create => HashMap::new(),
            Operation::Update => self.current_alternate_ids(cm_handles)?,
        };

        let mut accepted_in_batch: HashSet<&str> = HashSet::new();
        let mut rejected = Vec::new();
        for cm_handle in cm_handles {
            let proposed = cm_handle.alternate_id.as_str();
            if proposed.is_empty() {
                continue;
            }
            if accepted_in_batch.contains(proposed) {
                warn!(
                    cm_handle_id = %cm_handle.cm_handle_id,
                    alternate_id = proposed,
                    "alternate id already proposed earlier in this batch"
                );
                rejected.push(cm_handle.cm_handle_id.clone());
                continue;
            }
            let current_alternate_id = current
                .get(cm_handle.cm_handle_id.as_str())
                .map_or("", String::as_str);
            if accepts(&cm_handle.cm_handle_id, current_alternate_id, proposed, &holders) {
                accepted_in_batch.insert(proposed);
            } else {
                rejected.push(cm_handle.cm_handle_id.clone());
            }
        }
        Ok(rejected)
    }

    // An unknown handle has no alternate id; the update itself reports it.
    fn current_alternate_ids(&self, cm_handles: &[NcmpServiceCmHandle]) -> NcmpResult<HashMap<String, String>> {
        let ids: Vec<&str> = cm_handles
            .iter()
            .filter(|cm_handle| !cm_handle.alternate_id.is_empty())
            .map(|cm_handle| cm_handle.cm_handle_id.as_str())
            .collect();
        Ok(self
            .inventory
            .get_yang_model_cm_handles_without_properties(&ids)?
            .into_iter()
            .map(|cm_handle| (cm_handle.id, cm_handle.alternate_id))
            .collect())
    }
}

fn accepts(
    cm_handle_id: &str,
    current_alternate_id: &str,
    proposed_alternate_id: &str,
    holders: &HashMap<String, String>,
) -> bool {
    if current_alternate_id.trim().is_empty() {
        if holders.contains_key(proposed_alternate_id.trim()) {
            warn!(
                cm_handle_id,
                alternate_id = proposed_alternate_id,
                "alternate id is already associated with another cm-handle"
            );
            return false;
        }
        return true;
    }
    if current_alternate_id == proposed_alternate_id {
        return true;
    }
    warn!(
        cm_handle_id,
        current = current_alternate_id,
        proposed = proposed_alternate_id,
        "alternate id update ignored, cannot change the alternate id of a cm-handle"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NcmpConfig;
    use crate::models::YangModelCmHandle;
    use cps_store::CpsStore;

    fn checker() -> (AlternateIdChecker, Arc<InventoryPersistence>) {
        let inventory = Arc::new(InventoryPersistence::new(CpsStore::new(), NcmpConfig::default()));
        inventory.initialize().unwrap();
        inventory
            .save_cm_handle(&YangModelCmHandle {
                id: "ch-1".to_string(),
                alternate_id: "fdn-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        (AlternateIdChecker::new(Arc::clone(&inventory)), inventory)
    }

    #[test]
    fn test_can_apply() {
        let (checker, _) = checker();
        assert!(checker.can_apply_alternate_id("ch-2", "", "fdn-2").unwrap());
        assert!(!checker.can_apply_alternate_id("ch-2", "", "fdn-1").unwrap());
        assert!(checker.can_apply_alternate_id("ch-1", "fdn-1", "fdn-1").unwrap());
        assert!(!checker.can_apply_alternate_id("ch-1", "fdn-1", "fdn-3").unwrap());
    }

    #[test]
    fn test_first_proposer_in_batch_wins() {
        let (checker, _) = checker();
        let batch = vec![
            NcmpServiceCmHandle::new("A").with_alternate_id("x"),
            NcmpServiceCmHandle::new("B").with_alternate_id("x"),
            NcmpServiceCmHandle::new("C"),
            NcmpServiceCmHandle::new("D"),
            NcmpServiceCmHandle::new("E").with_alternate_id("fdn-1"),
        ];
        let rejected = checker
            .ids_of_cm_handles_with_rejected_alternate_id(&batch, Operation::Create)
            .unwrap();
        assert_eq!(rejected, vec!["B", "E"]);
    }

    #[test]
    fn test_update_compares_with_stored_alternate_id() {
        let (checker, _) = checker();
        let batch = vec![
            NcmpServiceCmHandle::new("ch-1").with_alternate_id("fdn-1"),
            NcmpServiceCmHandle::new("ch-1").with_alternate_id("fdn-9"),
            NcmpServiceCmHandle::new("unknown").with_alternate_id("fdn-7"),
        ];
        let rejected = checker
            .ids_of_cm_handles_with_rejected_alternate_id(&batch, Operation::Update)
            .unwrap();
        assert_eq!(rejected, vec!["ch-1"]);
    }
}
