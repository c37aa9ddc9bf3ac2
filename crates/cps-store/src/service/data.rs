//! Reading and writing data nodes of an anchor.

use std::collections::BTreeMap;
use std::sync::Arc;

use cps_path::xpath::{child_xpath, is_path_to_list_element, is_root_xpath, normalized_xpath, ROOT_XPATH};
use hashbrown::HashSet;
use tracing::{debug, warn};

use crate::admin::{Anchor, CpsAdminService};
use crate::data_node::{Attributes, DataNode};
use crate::error::{CpsError, CpsResult};
use crate::fragment::{FragmentEntity, FragmentId, FragmentRepository, NewFragment};
use crate::prefetch::FetchDescendantsOption;
use crate::schema::{ContentType, SchemaContextCache};
use crate::tree::{to_data_nodes, to_trees};

/// CRUD on the data nodes of an anchor.
pub struct CpsDataService {
    admin: Arc<CpsAdminService>,
    fragments: Arc<dyn FragmentRepository>,
    schemas: Arc<SchemaContextCache>,
}

impl std::fmt::Debug for CpsDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpsDataService").finish_non_exhaustive()
    }
}

impl CpsDataService {
    /// Creates the service.
    pub fn new(
        admin: Arc<CpsAdminService>,
        fragments: Arc<dyn FragmentRepository>,
        schemas: Arc<SchemaContextCache>,
    ) -> Self {
        Self {
            admin,
            fragments,
            schemas,
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Saves top-level data.
    pub fn save_data(&self, dataspace: &str, anchor: &str, json: &str) -> CpsResult<()> {
        self.save_data_under(dataspace, anchor, ROOT_XPATH, json)
    }

    /// Saves data as children of the node at `parent_xpath`.
    pub fn save_data_under(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let (parent_xpath, parent_id) = self.parent_fragment(&anchor, parent_xpath)?;
        let nodes = self.parse(&anchor, json, &parent_xpath)?;
        self.insert(&anchor, parent_id, &nodes)
    }

    /// Adds list elements under `parent_xpath`. Fails with
    /// [`CpsError::AlreadyDefined`] listing every element that already exists.
    pub fn save_list_elements(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let (parent_xpath, parent_id) = self.parent_fragment(&anchor, parent_xpath)?;
        let nodes = self.parse(&anchor, json, &parent_xpath)?;
        if nodes.is_empty() {
            return Err(CpsError::data_validation(
                "No list elements",
                "the payload contains no list elements",
            ));
        }
        if let Some(node) = nodes.iter().find(|node| !node.is_list_element()) {
            return Err(CpsError::data_validation(
                "Not a list element",
                format!("{} is not a list element", node.xpath),
            ));
        }
        self.insert(&anchor, parent_id, &nodes)
    }

    fn insert(&self, anchor: &Anchor, parent_id: Option<FragmentId>, nodes: &[DataNode]) -> CpsResult<()> {
        let trees: Vec<NewFragment> = nodes.iter().map(NewFragment::from).collect();
        let ids = self.fragments.insert_batch(anchor.id, parent_id, &trees)?;
        debug!(anchor = %anchor.name, nodes = ids.len(), "saved data nodes");
        Ok(())
    }

    // ========================================================================
    // Read
    // ========================================================================

    /// Data nodes at `xpath`: `/` returns every top-level node, a list xpath
    /// without predicate returns every list element.
    pub fn get_data_nodes(
        &self,
        dataspace: &str,
        anchor: &str,
        xpath: &str,
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<DataNode>> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let fragments = self.find_fragments(&anchor, xpath)?;
        if fragments.is_empty() {
            return Err(CpsError::DataNodeNotFound {
                dataspace: dataspace.to_string(),
                anchor: anchor.name,
                xpath: xpath.to_string(),
            });
        }
        Ok(self.materialize(&anchor, &fragments, option))
    }

    /// Data nodes at several xpaths; unknown and unparsable xpaths are skipped.
    pub fn get_data_nodes_for_multiple_xpaths<S: AsRef<str>>(
        &self,
        dataspace: &str,
        anchor: &str,
        xpaths: &[S],
        option: FetchDescendantsOption,
    ) -> CpsResult<Vec<DataNode>> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let mut fragments = Vec::new();
        for xpath in xpaths {
            match self.find_fragments(&anchor, xpath.as_ref()) {
                Ok(found) => fragments.extend(found),
                Err(CpsError::PathParsing(error)) => {
                    debug!(xpath = xpath.as_ref(), %error, "skipping unparsable xpath");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(self.materialize(&anchor, &fragments, option))
    }

    fn find_fragments(&self, anchor: &Anchor, xpath: &str) -> CpsResult<Vec<FragmentEntity>> {
        if is_root_xpath(xpath) {
            return Ok(self.fragments.find_roots_by_anchor(anchor.id));
        }
        let xpath = normalized_xpath(xpath)?;
        if let Some(fragment) = self.fragments.find_by_anchor_and_xpath(anchor.id, &xpath) {
            return Ok(vec![fragment]);
        }
        if is_path_to_list_element(&xpath)? {
            return Ok(Vec::new());
        }
        Ok(self.fragments.find_list_by_anchor_and_xpath(anchor.id, &xpath))
    }

    fn materialize(
        &self,
        anchor: &Anchor,
        fragments: &[FragmentEntity],
        option: FetchDescendantsOption,
    ) -> Vec<DataNode> {
        let rows = self.fragments.prefetch_descendants(fragments, option);
        to_data_nodes(
            &to_trees(&rows),
            option,
            Some(&anchor.name),
            Some(&anchor.dataspace_name),
        )
    }

    /// Parses a payload with the anchor's schema set, placing the nodes under
    /// `parent_xpath`.
    pub fn parse_payload(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<Vec<DataNode>> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let parent_xpath = if is_root_xpath(parent_xpath) {
            ROOT_XPATH.to_string()
        } else {
            normalized_xpath(parent_xpath)?
        };
        self.parse(&anchor, json, &parent_xpath)
    }

    fn parse(&self, anchor: &Anchor, json: &str, parent_xpath: &str) -> CpsResult<Vec<DataNode>> {
        let schema_set = self
            .admin
            .get_schema_set(&anchor.dataspace_name, &anchor.schema_set_name)?;
        self.schemas
            .parse_with_retry(&schema_set, ContentType::Json, json, parent_xpath)
    }

    fn parent_fragment(&self, anchor: &Anchor, parent_xpath: &str) -> CpsResult<(String, Option<FragmentId>)> {
        if is_root_xpath(parent_xpath) {
            return Ok((ROOT_XPATH.to_string(), None));
        }
        let xpath = normalized_xpath(parent_xpath)?;
        let parent = self
            .fragments
            .find_by_anchor_and_xpath(anchor.id, &xpath)
            .ok_or_else(|| CpsError::DataNodeNotFound {
                dataspace: anchor.dataspace_name.clone(),
                anchor: anchor.name.clone(),
                xpath: xpath.clone(),
            })?;
        Ok((xpath, Some(parent.id)))
    }

    // ========================================================================
    // Update
    // ========================================================================

    /// Merges the leaves of every node in the payload into the stored nodes.
    ///
    /// Top-level payload nodes must exist; missing descendants are added.
    pub fn update_node_leaves(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let (parent_xpath, _) = self.parent_fragment(&anchor, parent_xpath)?;
        let nodes = self.parse(&anchor, json, &parent_xpath)?;

        let mut updates = Vec::new();
        let mut additions = Vec::new();
        let mut missing = Vec::new();
        for node in &nodes {
            match self.fragments.find_by_anchor_and_xpath(anchor.id, &node.xpath) {
                Some(existing) => self.collect_leaf_updates(&anchor, existing, node, &mut updates, &mut additions),
                None => missing.push(node.xpath.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(CpsError::DataNodesNotFound {
                dataspace: anchor.dataspace_name,
                anchor: anchor.name,
                xpaths: missing,
            });
        }

        self.fragments.update_attributes(&updates)?;
        for (parent_id, subtree) in additions {
            self.fragments.insert(anchor.id, Some(parent_id), &subtree)?;
        }
        debug!(anchor = %anchor.name, updated = updates.len(), "merged data node leaves");
        Ok(())
    }

    fn collect_leaf_updates(
        &self,
        anchor: &Anchor,
        existing: FragmentEntity,
        node: &DataNode,
        updates: &mut Vec<(FragmentId, Attributes)>,
        additions: &mut Vec<(FragmentId, NewFragment)>,
    ) {
        for child in &node.child_data_nodes {
            match self.fragments.find_by_anchor_and_xpath(anchor.id, &child.xpath) {
                Some(stored) => self.collect_leaf_updates(anchor, stored, child, updates, additions),
                None => additions.push((existing.id, NewFragment::from(child))),
            }
        }
        let mut merged = existing.attributes;
        merged.extend(node.leaves.clone());
        updates.push((existing.id, merged));
    }

    /// Sets the leaves of the node at `xpath` to exactly `leaves`. Descendants
    /// are kept.
    pub fn replace_node_leaves(
        &self,
        dataspace: &str,
        anchor: &str,
        xpath: &str,
        leaves: Attributes,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let xpath = normalized_xpath(xpath)?;
        let existing = self
            .fragments
            .find_by_anchor_and_xpath(anchor.id, &xpath)
            .ok_or_else(|| CpsError::DataNodeNotFound {
                dataspace: anchor.dataspace_name.clone(),
                anchor: anchor.name.clone(),
                xpath: xpath.clone(),
            })?;
        self.fragments.update_attributes(&[(existing.id, leaves)])?;
        debug!(anchor = %anchor.name, %xpath, "replaced data node leaves");
        Ok(())
    }

    /// Replaces the nodes in the payload, with their descendants.
    pub fn update_data_node_and_descendants(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<()> {
        let payloads = BTreeMap::from([(parent_xpath.to_string(), json.to_string())]);
        self.update_data_nodes_and_descendants(dataspace, anchor, &payloads)
    }

    /// Replaces nodes parsed from several payloads, keyed by parent xpath.
    /// Nodes that do not exist are skipped.
    pub fn update_data_nodes_and_descendants(
        &self,
        dataspace: &str,
        anchor: &str,
        payloads: &BTreeMap<String, String>,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let mut nodes = Vec::new();
        for (parent_xpath, json) in payloads {
            let parent_xpath = if is_root_xpath(parent_xpath) {
                ROOT_XPATH.to_string()
            } else {
                normalized_xpath(parent_xpath)?
            };
            nodes.extend(self.parse(&anchor, json, &parent_xpath)?);
        }
        self.replace_nodes(&anchor, &nodes)
    }

    fn replace_nodes(&self, anchor: &Anchor, nodes: &[DataNode]) -> CpsResult<()> {
        for node in nodes {
            match self.fragments.find_by_anchor_and_xpath(anchor.id, &node.xpath) {
                Some(existing) => self
                    .fragments
                    .replace_subtree(existing.id, &NewFragment::from(node))?,
                None => warn!(
                    dataspace = %anchor.dataspace_name,
                    anchor = %anchor.name,
                    xpath = %node.xpath,
                    "data node not found, update skipped"
                ),
            }
        }
        Ok(())
    }

    /// Makes the list under `parent_xpath` contain exactly `nodes`: other
    /// elements are removed, existing ones replaced and new ones added.
    pub fn replace_list_content(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        nodes: &[DataNode],
    ) -> CpsResult<()> {
        let Some(first) = nodes.first() else {
            return Err(CpsError::data_validation(
                "Empty list",
                "replacing list content needs at least one list element",
            ));
        };
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let (parent_xpath, parent_id) = self.parent_fragment(&anchor, parent_xpath)?;
        let list_xpath = child_xpath(&parent_xpath, first.name(), &[]);

        let wanted: HashSet<&str> = nodes.iter().map(|node| node.xpath.as_str()).collect();
        let obsolete: Vec<String> = self
            .fragments
            .find_list_by_anchor_and_xpath(anchor.id, &list_xpath)
            .into_iter()
            .map(|fragment| fragment.xpath)
            .filter(|xpath| !wanted.contains(xpath.as_str()))
            .collect();
        self.fragments.delete_by_anchor_and_xpaths(anchor.id, &obsolete);

        let mut added = Vec::new();
        for node in nodes {
            match self.fragments.find_by_anchor_and_xpath(anchor.id, &node.xpath) {
                Some(existing) => self
                    .fragments
                    .replace_subtree(existing.id, &NewFragment::from(node))?,
                None => added.push(NewFragment::from(node)),
            }
        }
        if !added.is_empty() {
            self.fragments.insert_batch(anchor.id, parent_id, &added)?;
        }
        debug!(
            anchor = %anchor.name,
            list = %list_xpath,
            removed = obsolete.len(),
            added = added.len(),
            "replaced list content"
        );
        Ok(())
    }

    /// [`replace_list_content`](Self::replace_list_content) with elements parsed from JSON.
    pub fn replace_list_content_json(
        &self,
        dataspace: &str,
        anchor: &str,
        parent_xpath: &str,
        json: &str,
    ) -> CpsResult<()> {
        let nodes = self.parse_payload(dataspace, anchor, parent_xpath, json)?;
        self.replace_list_content(dataspace, anchor, parent_xpath, &nodes)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Deletes the node at `xpath` with its descendants; fails if nothing
    /// matches. A list xpath without predicate deletes the whole list.
    pub fn delete_data_node(&self, dataspace: &str, anchor: &str, xpath: &str) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        if is_root_xpath(xpath) {
            self.fragments.delete_by_anchor(anchor.id);
            return Ok(());
        }
        let normalized = normalized_xpath(xpath)?;
        if self.delete_at(&anchor, &normalized)? == 0 {
            return Err(CpsError::DataNodeNotFound {
                dataspace: dataspace.to_string(),
                anchor: anchor.name,
                xpath: normalized,
            });
        }
        Ok(())
    }

    /// Deletes the nodes at `xpaths`; xpaths matching nothing are skipped.
    pub fn delete_data_nodes<S: AsRef<str>>(
        &self,
        dataspace: &str,
        anchor: &str,
        xpaths: &[S],
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        if xpaths.iter().any(|xpath| is_root_xpath(xpath.as_ref())) {
            self.fragments.delete_by_anchor(anchor.id);
            return Ok(());
        }
        let mut existing = Vec::new();
        for xpath in xpaths {
            let normalized = normalized_xpath(xpath.as_ref())?;
            if self
                .fragments
                .find_by_anchor_and_xpath(anchor.id, &normalized)
                .is_some()
            {
                existing.push(normalized);
            } else if !is_path_to_list_element(&normalized)? {
                self.fragments
                    .delete_list_by_anchor_and_xpath(anchor.id, &normalized);
            }
        }
        let deleted = self.fragments.delete_by_anchor_and_xpaths(anchor.id, &existing);
        debug!(anchor = %anchor.name, requested = xpaths.len(), deleted, "deleted data nodes");
        Ok(())
    }

    /// Deletes a list element, or every element of a list.
    pub fn delete_list_or_list_element(
        &self,
        dataspace: &str,
        anchor: &str,
        list_xpath: &str,
    ) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let normalized = normalized_xpath(list_xpath)?;
        let deleted = if is_path_to_list_element(&normalized)? {
            self.fragments
                .delete_by_anchor_and_xpaths(anchor.id, std::slice::from_ref(&normalized))
        } else {
            self.fragments
                .delete_list_by_anchor_and_xpath(anchor.id, &normalized)
        };
        if deleted == 0 {
            return Err(CpsError::DataNodeNotFound {
                dataspace: dataspace.to_string(),
                anchor: anchor.name,
                xpath: normalized,
            });
        }
        Ok(())
    }

    /// Deletes every data node of an anchor.
    pub fn delete_all_data_nodes(&self, dataspace: &str, anchor: &str) -> CpsResult<()> {
        let anchor = self.admin.get_anchor(dataspace, anchor)?;
        let deleted = self.fragments.delete_by_anchor(anchor.id);
        debug!(anchor = %anchor.name, deleted, "deleted all data nodes");
        Ok(())
    }

    fn delete_at(&self, anchor: &Anchor, xpath: &str) -> CpsResult<usize> {
        if self.fragments.find_by_anchor_and_xpath(anchor.id, xpath).is_some() {
            return Ok(self
                .fragments
                .delete_by_anchor_and_xpaths(anchor.id, &[xpath.to_string()]));
        }
        if is_path_to_list_element(xpath)? {
            return Ok(0);
        }
        Ok(self.fragments.delete_list_by_anchor_and_xpath(anchor.id, xpath))
    }
}
