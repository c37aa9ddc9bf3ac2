//! CPS path queries over one anchor or a whole dataspace.

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::admin::CpsAdminService;
use crate::data_node::DataNode;
use crate::error::CpsResult;
use crate::fragment::{AnchorId, FragmentRepository};
use crate::prefetch::FetchDescendantsOption;
use crate::query_builder::QueryScope;
use crate::tree::{to_data_nodes, to_data_nodes_across_anchors, to_trees};

/// Runs CPS path queries.
pub struct CpsQueryService {
    admin: Arc<CpsAdminService>,
    fragments: Arc<dyn FragmentRepository>,
    default_limit: Option<usize>,
}

impl std::fmt::Debug for CpsQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpsQueryService")
            .field("default_limit", &self.default_limit)
            .finish_non_exhaustive()
    }
}

impl CpsQueryService {
    /// Creates the service; `default_limit` applies when a query sets none.
    pub fn new(
        admin: Arc<CpsAdminService>,
        fragments: Arc<dyn FragmentRepository>,
        default_limit: Option<usize>,
    ) -> Self {
        Self {
            admin,
            fragments,
            default_limit,
        }
    }

    /// Data nodes of one anchor matching `cps_path`, with descendants per `option`.
    pub fn query_data_nodes(
        &self,
        dataspace: &str,
        anchor: &str,
        cps_path: &str,
        option: FetchDescendantsOption,
        limit: Option<usize>,
    ) -> CpsResult<Vec<DataNode>> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let query = cps_path::parse(cps_path)?;
        let matches = self.fragments.find_by_cps_path(
            QueryScope::Anchor(anchor.id),
            &query,
            limit.or(self.default_limit),
        )?;
        debug!(anchor = %anchor.name, cps_path, matches = matches.len(), "queried data nodes");
        let rows = self.fragments.prefetch_descendants(&matches, option);
        Ok(to_data_nodes(
            &to_trees(&rows),
            option,
            Some(&anchor.name),
            Some(&anchor.dataspace_name),
        ))
    }

    /// Data nodes of every anchor in the dataspace matching `cps_path`.
    pub fn query_data_nodes_across_anchors(
        &self,
        dataspace: &str,
        cps_path: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<DataNode>> {
        let dataspace = self.admin.get_dataspace(dataspace)?;
        let anchors = self.admin.get_anchors(&dataspace.name)?;
        let query = cps_path::parse(cps_path)?;
        let anchor_names: HashMap<AnchorId, String> = anchors
            .iter()
            .map(|anchor| (anchor.id, anchor.name.clone()))
            .collect();
        let scope = QueryScope::Dataspace {
            name: dataspace.name.clone(),
            anchor_ids: anchors.iter().map(|anchor| anchor.id).collect(),
        };
        let matches = self
            .fragments
            .find_by_cps_path(scope, &query, self.default_limit)?;
        let rows = self.fragments.prefetch_descendants(&matches, option);
        Ok(to_data_nodes_across_anchors(
            &to_trees(&rows),
            option,
            &anchor_names,
            Some(&dataspace.name),
        ))
    }
}
