//! Delta reports between anchors, or between an anchor and a payload, and
//! applying a report back to an anchor.

use std::sync::Arc;

use cps_path::xpath::{is_root_xpath, list_element_keys, normalized_parent_xpath, normalized_xpath, ROOT_XPATH};
use serde::Deserialize;
use tracing::debug;

use crate::data_node::{Attributes, DataNode};
use crate::delta::{
    get_delta_between_data_nodes, get_grouped_delta_between_data_nodes, DeltaAction, DeltaReport,
    GroupedDeltaReport,
};
use crate::error::{CpsError, CpsResult};
use crate::prefetch::FetchDescendantsOption;
use crate::service::data::CpsDataService;

/// Computes delta reports from stored data and applies them.
#[derive(Debug)]
pub struct CpsDeltaService {
    data: Arc<CpsDataService>,
}

impl CpsDeltaService {
    /// Creates the service.
    pub fn new(data: Arc<CpsDataService>) -> Self {
        Self { data }
    }

    /// Delta from the data at `xpath` in `source_anchor` to the same xpath in
    /// `target_anchor`. A side without data counts as empty.
    pub fn get_delta_by_dataspace_and_anchors(
        &self,
        dataspace: &str,
        source_anchor: &str,
        target_anchor: &str,
        xpath: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<DeltaReport>> {
        let (source, target) = self.read_both(dataspace, source_anchor, target_anchor, xpath, option)?;
        Ok(get_delta_between_data_nodes(&source, &target))
    }

    /// Grouped variant of [`get_delta_by_dataspace_and_anchors`](Self::get_delta_by_dataspace_and_anchors).
    pub fn get_grouped_delta_by_dataspace_and_anchors(
        &self,
        dataspace: &str,
        source_anchor: &str,
        target_anchor: &str,
        xpath: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<GroupedDeltaReport>> {
        let (source, target) = self.read_both(dataspace, source_anchor, target_anchor, xpath, option)?;
        Ok(get_grouped_delta_between_data_nodes(&source, &target))
    }

    fn read_both(
        &self,
        dataspace: &str,
        source_anchor: &str,
        target_anchor: &str,
        xpath: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<(Vec<DataNode>, Vec<DataNode>)> {
        let source = self
            .data
            .get_data_nodes_for_multiple_xpaths(dataspace, source_anchor, &[xpath], option)?;
        let target = self
            .data
            .get_data_nodes_for_multiple_xpaths(dataspace, target_anchor, &[xpath], option)?;
        Ok((source, target))
    }

    /// Delta from the data at `xpath` to a JSON payload for the same node,
    /// parsed with the source anchor's schema set.
    pub fn get_delta_by_dataspace_anchor_and_payload(
        &self,
        dataspace: &str,
        source_anchor: &str,
        xpath: &str,
        json: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<DeltaReport>> {
        let source = self
            .data
            .get_data_nodes_for_multiple_xpaths(dataspace, source_anchor, &[xpath], option)?;
        let parent_xpath = if is_root_xpath(xpath) {
            ROOT_XPATH.to_string()
        } else {
            normalized_parent_xpath(xpath)?
        };
        let target = self
            .data
            .parse_payload(dataspace, source_anchor, &parent_xpath, json)?;
        Ok(get_delta_between_data_nodes(&source, &target))
    }

    /// Applies a delta report given as a JSON array to an anchor.
    ///
    /// Every entry is validated before anything is written: xpaths must parse
    /// and actions must be `add`, `remove` or `update`.
    pub fn apply_changes_in_delta_report(&self, dataspace: &str, anchor: &str, json: &str) -> CpsResult<()> {
        let entries: Vec<DeltaReportEntry> = serde_json::from_str(json)
            .map_err(|error| CpsError::data_validation("Invalid delta report.", error.to_string()))?;
        let reports = entries
            .into_iter()
            .map(DeltaReportEntry::validate)
            .collect::<CpsResult<Vec<_>>>()?;
        self.apply_delta_report(dataspace, anchor, &reports)
    }

    /// Applies delta entries in order.
    ///
    /// Applying `delta(A, B)` to an anchor holding A leaves it holding B.
    /// Entries are not applied atomically: a failing entry stops the apply
    /// and the entries before it stay applied.
    pub fn apply_delta_report(&self, dataspace: &str, anchor: &str, reports: &[DeltaReport]) -> CpsResult<()> {
        for report in reports {
            match report.action {
                DeltaAction::Remove => self
                    .data
                    .delete_data_nodes(dataspace, anchor, &[report.xpath.as_str()])?,
                DeltaAction::Update => self.apply_update(dataspace, anchor, report)?,
                DeltaAction::Add => self.apply_add(dataspace, anchor, report)?,
            }
        }
        debug!(dataspace, anchor, entries = reports.len(), "applied delta report");
        Ok(())
    }

    fn apply_update(&self, dataspace: &str, anchor: &str, report: &DeltaReport) -> CpsResult<()> {
        let stored = self.data.get_data_nodes(
            dataspace,
            anchor,
            &report.xpath,
            FetchDescendantsOption::OMIT_DESCENDANTS,
        )?;
        let mut leaves = stored
            .into_iter()
            .next()
            .map(|node| node.leaves)
            .unwrap_or_default();
        let keys: Vec<String> = list_element_keys(&report.xpath)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        if let Some(source) = &report.source_data {
            for name in source.keys().filter(|name| !keys.contains(name)) {
                leaves.remove(name);
            }
        }
        if let Some(target) = &report.target_data {
            leaves.extend(target.clone());
        }
        self.data
            .replace_node_leaves(dataspace, anchor, &report.xpath, leaves)
    }

    fn apply_add(&self, dataspace: &str, anchor: &str, report: &DeltaReport) -> CpsResult<()> {
        let parent_xpath = normalized_parent_xpath(&report.xpath)?;
        let payload = DataNode::builder()
            .with_xpath(report.xpath.clone())
            .with_leaves(report.target_data.clone().unwrap_or_default())
            .build()
            .to_named_json_value();
        self.data
            .save_data_under(dataspace, anchor, &parent_xpath, &payload.to_string())
    }
}

/// A delta entry as received, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeltaReportEntry {
    action: String,
    xpath: String,
    #[serde(default)]
    source_data: Option<Attributes>,
    #[serde(default)]
    target_data: Option<Attributes>,
}

impl DeltaReportEntry {
    fn validate(self) -> CpsResult<DeltaReport> {
        let xpath = normalized_xpath(&self.xpath).map_err(|error| {
            CpsError::data_validation(
                format!("Error while parsing xpath expression '{}'.", self.xpath),
                error.to_string(),
            )
        })?;
        let action = DeltaAction::from_name(&self.action).ok_or_else(|| {
            CpsError::data_validation(
                "Invalid 'action' in delta report.",
                format!(
                    "Unsupported action '{}' at xpath: {xpath}. Valid actions are: 'add', 'remove' or 'update'.",
                    self.action
                ),
            )
        })?;
        Ok(DeltaReport {
            action,
            xpath,
            source_data: self.source_data,
            target_data: self.target_data,
        })
    }
}
