//! The fragment table: one row per data node, keyed by `(anchor, xpath)`.
//!
//! [`FragmentRepository`] is the seam between the services and storage;
//! [`InMemoryFragmentRepository`] implements it with `hashbrown` indexes
//! behind a `parking_lot::RwLock`. Every mutation holds the write lock for
//! its whole duration, so a batch is applied completely or not at all.
//!
//! Parent/child integrity is enforced with a [`ParentConstraint`]. Deleting a
//! fragment that still has children fails under `Restrict`; batch deletes
//! switch the table to `Cascade` through a guard that restores `Restrict`
//! when it goes out of scope.

use std::collections::{BTreeSet, VecDeque};
use std::ops::{Deref, DerefMut};

use cps_path::xpath::{ancestor_xpath, is_root_xpath};
use cps_path::CpsPathQuery;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use tracing::debug;

use crate::data_node::{Attributes, DataNode};
use crate::error::{CpsError, CpsResult};
use crate::prefetch::FetchDescendantsOption;
use crate::query_builder::{FragmentQuery, ParentCondition, QueryScope};

/// Identifier of a fragment. Ids grow monotonically, so id order is creation order.
pub type FragmentId = u64;

/// Identifier of an anchor.
pub type AnchorId = u64;

/// A stored fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentEntity {
    /// Fragment id.
    pub id: FragmentId,
    /// Owning anchor.
    pub anchor_id: AnchorId,
    /// Normalized xpath, unique within the anchor.
    pub xpath: String,
    /// Parent fragment; None for top-level fragments.
    pub parent_id: Option<FragmentId>,
    /// Leaves.
    pub attributes: Attributes,
}

/// A subtree to insert or to replace an existing subtree with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewFragment {
    /// Normalized xpath.
    pub xpath: String,
    /// Leaves.
    pub attributes: Attributes,
    /// Children.
    pub children: Vec<NewFragment>,
}

impl From<&DataNode> for NewFragment {
    fn from(node: &DataNode) -> Self {
        Self {
            xpath: node.xpath.clone(),
            attributes: node.leaves.clone(),
            children: node.child_data_nodes.iter().map(NewFragment::from).collect(),
        }
    }
}

impl NewFragment {
    fn collect_xpaths<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.xpath);
        for child in &self.children {
            child.collect_xpaths(out);
        }
    }
}

/// What happens to children when their parent is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentConstraint {
    /// Deleting a fragment with children fails.
    #[default]
    Restrict,
    /// Children are deleted with their parent.
    Cascade,
}

// ============================================================================
// FragmentRepository
// ============================================================================

/// Storage of fragments.
///
/// Lookups by xpath expect normalized xpaths. Batch lookups and deletes are
/// tolerant: unknown xpaths are skipped.
pub trait FragmentRepository: Send + Sync {
    /// Inserts subtrees under `parent_id` (or at the top level).
    ///
    /// Fails with [`CpsError::AlreadyDefined`] listing every conflicting
    /// xpath; in that case nothing is inserted. Returns the ids of the
    /// subtree roots.
    fn insert_batch(
        &self,
        anchor_id: AnchorId,
        parent_id: Option<FragmentId>,
        trees: &[NewFragment],
    ) -> CpsResult<Vec<FragmentId>>;

    /// Inserts a single subtree.
    fn insert(
        &self,
        anchor_id: AnchorId,
        parent_id: Option<FragmentId>,
        tree: &NewFragment,
    ) -> CpsResult<FragmentId> {
        let ids = self.insert_batch(anchor_id, parent_id, std::slice::from_ref(tree))?;
        ids.first()
            .copied()
            .ok_or_else(|| CpsError::Store(format!("insert of {} returned no id", tree.xpath)))
    }

    /// Finds a fragment by xpath.
    fn find_by_anchor_and_xpath(&self, anchor_id: AnchorId, xpath: &str) -> Option<FragmentEntity>;

    /// Finds fragments by xpath, skipping unknown xpaths.
    fn find_by_anchor_and_xpaths(&self, anchor_id: AnchorId, xpaths: &[String]) -> Vec<FragmentEntity>;

    /// Finds fragments by xpath in any of the anchors.
    fn find_by_anchors_and_xpaths(
        &self,
        anchor_ids: &[AnchorId],
        xpaths: &[String],
    ) -> Vec<FragmentEntity> {
        anchor_ids
            .iter()
            .flat_map(|anchor_id| self.find_by_anchor_and_xpaths(*anchor_id, xpaths))
            .collect()
    }

    /// Finds every element of the list at `list_xpath` (xpaths `list_xpath[@...]`).
    fn find_list_by_anchor_and_xpath(&self, anchor_id: AnchorId, list_xpath: &str) -> Vec<FragmentEntity>;

    /// Top-level fragments of an anchor.
    fn find_roots_by_anchor(&self, anchor_id: AnchorId) -> Vec<FragmentEntity>;

    /// Direct children of a fragment, in creation order.
    fn children_of(&self, fragment_id: FragmentId) -> Vec<FragmentEntity>;

    /// Replaces the attributes of several fragments. Fails without changes if
    /// any fragment no longer exists.
    fn update_attributes(&self, updates: &[(FragmentId, Attributes)]) -> CpsResult<()>;

    /// Makes the subtree at `fragment_id` equal to `replacement`: attributes
    /// are copied, matching children are updated recursively, new children are
    /// inserted and children absent from the replacement are deleted.
    fn replace_subtree(&self, fragment_id: FragmentId, replacement: &NewFragment) -> CpsResult<()>;

    /// Deletes one fragment, honouring the current parent constraint.
    fn delete_fragment(&self, fragment_id: FragmentId) -> CpsResult<()>;

    /// Deletes every fragment of an anchor. Returns the number deleted.
    fn delete_by_anchor(&self, anchor_id: AnchorId) -> usize;

    /// Deletes the fragments at `xpaths` with their descendants; unknown
    /// xpaths are skipped. Returns the number of fragments deleted.
    fn delete_by_anchor_and_xpaths(&self, anchor_id: AnchorId, xpaths: &[String]) -> usize;

    /// Deletes every element of the list at `list_xpath`. Returns the number of
    /// fragments deleted.
    fn delete_list_by_anchor_and_xpath(&self, anchor_id: AnchorId, list_xpath: &str) -> usize;

    /// Runs a compiled query.
    fn execute(&self, query: &FragmentQuery) -> Vec<FragmentEntity>;

    /// The given fragments plus their descendants down to the option's depth,
    /// as flat rows.
    fn prefetch_descendants(
        &self,
        fragments: &[FragmentEntity],
        option: FetchDescendantsOption,
    ) -> Vec<FragmentEntity>;

    /// Compiles and runs a CPS path query, then lifts the results to the
    /// ancestor named by an `ancestor::` axis.
    fn find_by_cps_path(
        &self,
        scope: QueryScope,
        query: &CpsPathQuery,
        limit: Option<usize>,
    ) -> CpsResult<Vec<FragmentEntity>> {
        let plan = FragmentQuery::from_cps_path(scope.clone(), query, limit)?;
        debug!(sql = %plan.to_sql(), "executing fragment query");
        let fragments = self.execute(&plan);

        let Some(identifier) = &query.ancestor_schema_node_identifier else {
            return Ok(fragments);
        };
        let mut per_anchor: HashMap<AnchorId, BTreeSet<String>> = HashMap::new();
        for fragment in &fragments {
            if let Some(ancestor) = ancestor_xpath(&fragment.xpath, identifier) {
                per_anchor.entry(fragment.anchor_id).or_default().insert(ancestor);
            }
        }
        let mut ancestors: Vec<FragmentEntity> = per_anchor
            .into_iter()
            .flat_map(|(anchor_id, xpaths)| {
                let xpaths: Vec<String> = xpaths.into_iter().collect();
                self.find_by_anchor_and_xpaths(anchor_id, &xpaths)
            })
            .collect();
        ancestors.sort_by_key(|fragment| fragment.id);
        Ok(ancestors)
    }
}

// ============================================================================
// In-memory table
// ============================================================================

#[derive(Debug, Default)]
struct FragmentTable {
    next_id: FragmentId,
    rows: HashMap<FragmentId, FragmentEntity>,
    by_xpath: HashMap<AnchorId, HashMap<String, FragmentId>>,
    children: HashMap<FragmentId, BTreeSet<FragmentId>>,
    roots: HashMap<AnchorId, BTreeSet<FragmentId>>,
    constraint: ParentConstraint,
}

impl FragmentTable {
    fn id_of(&self, anchor_id: AnchorId, xpath: &str) -> Option<FragmentId> {
        self.by_xpath.get(&anchor_id)?.get(xpath).copied()
    }

    fn row(&self, id: FragmentId) -> Option<FragmentEntity> {
        self.rows.get(&id).cloned()
    }

    fn insert_tree(
        &mut self,
        anchor_id: AnchorId,
        parent_id: Option<FragmentId>,
        tree: &NewFragment,
    ) -> FragmentId {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.insert(
            id,
            FragmentEntity {
                id,
                anchor_id,
                xpath: tree.xpath.clone(),
                parent_id,
                attributes: tree.attributes.clone(),
            },
        );
        self.by_xpath
            .entry(anchor_id)
            .or_default()
            .insert(tree.xpath.clone(), id);
        match parent_id {
            Some(parent) => {
                self.children.entry(parent).or_default().insert(id);
            }
            None => {
                self.roots.entry(anchor_id).or_default().insert(id);
            }
        }
        for child in &tree.children {
            self.insert_tree(anchor_id, Some(id), child);
        }
        id
    }

    /// Removes one row, applying the parent constraint to its children.
    fn delete_row(&mut self, id: FragmentId) -> CpsResult<usize> {
        let Some(row) = self.rows.get(&id) else {
            return Ok(0);
        };
        let has_children = self.children.get(&id).is_some_and(|c| !c.is_empty());
        if has_children && self.constraint == ParentConstraint::Restrict {
            return Err(CpsError::ReferentialIntegrity {
                xpath: row.xpath.clone(),
            });
        }

        let mut deleted = 0;
        if let Some(children) = self.children.remove(&id) {
            for child in children {
                deleted += self.delete_row(child)?;
            }
        }
        if let Some(row) = self.rows.remove(&id) {
            if let Some(index) = self.by_xpath.get_mut(&row.anchor_id) {
                index.remove(&row.xpath);
            }
            match row.parent_id {
                Some(parent) => {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.remove(&id);
                    }
                }
                None => {
                    if let Some(roots) = self.roots.get_mut(&row.anchor_id) {
                        roots.remove(&id);
                    }
                }
            }
            deleted += 1;
        }
        Ok(deleted)
    }

    fn cascade(&mut self) -> CascadeGuard<'_> {
        let previous = std::mem::replace(&mut self.constraint, ParentConstraint::Cascade);
        CascadeGuard {
            table: self,
            previous,
        }
    }

    fn replace_subtree(&mut self, id: FragmentId, replacement: &NewFragment) -> CpsResult<()> {
        let Some(row) = self.rows.get_mut(&id) else {
            return Err(CpsError::Store(format!(
                "fragment {} no longer exists",
                replacement.xpath
            )));
        };
        row.attributes = replacement.attributes.clone();
        let anchor_id = row.anchor_id;

        let existing: Vec<FragmentId> = self
            .children
            .get(&id)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default();
        let wanted: HashSet<&str> = replacement
            .children
            .iter()
            .map(|child| child.xpath.as_str())
            .collect();

        let obsolete: Vec<FragmentId> = existing
            .into_iter()
            .filter(|child| {
                self.rows
                    .get(child)
                    .is_some_and(|row| !wanted.contains(row.xpath.as_str()))
            })
            .collect();
        {
            let mut cascade = self.cascade();
            for child in obsolete {
                cascade.delete_row(child)?;
            }
        }

        for child in &replacement.children {
            match self.id_of(anchor_id, &child.xpath) {
                Some(child_id) if self.rows.get(&child_id).and_then(|r| r.parent_id) == Some(id) => {
                    self.replace_subtree(child_id, child)?;
                }
                Some(_) => {
                    return Err(CpsError::data_nodes_already_defined(vec![child.xpath.clone()]));
                }
                None => {
                    self.insert_tree(anchor_id, Some(id), child);
                }
            }
        }
        Ok(())
    }
}

/// Switches the table to [`ParentConstraint::Cascade`] while alive.
struct CascadeGuard<'a> {
    table: &'a mut FragmentTable,
    previous: ParentConstraint,
}

impl Deref for CascadeGuard<'_> {
    type Target = FragmentTable;

    fn deref(&self) -> &FragmentTable {
        self.table
    }
}

impl DerefMut for CascadeGuard<'_> {
    fn deref_mut(&mut self) -> &mut FragmentTable {
        self.table
    }
}

impl Drop for CascadeGuard<'_> {
    fn drop(&mut self) {
        self.table.constraint = self.previous;
    }
}

/// [`FragmentRepository`] backed by in-process hash indexes.
///
/// # Example
///
/// ```rust
/// use cps_store::{FragmentRepository, InMemoryFragmentRepository, NewFragment};
///
/// let repository = InMemoryFragmentRepository::new();
/// let tree = NewFragment {
///     xpath: "/bookstore".to_string(),
///     children: vec![NewFragment {
///         xpath: "/bookstore/categories[@code='1']".to_string(),
///         ..Default::default()
///     }],
///     ..Default::default()
/// };
/// let id = repository.insert(1, None, &tree).unwrap();
/// assert_eq!(repository.children_of(id).len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryFragmentRepository {
    table: RwLock<FragmentTable>,
}

impl InMemoryFragmentRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored fragments.
    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    /// Returns true if no fragments are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The constraint currently in force.
    pub fn parent_constraint(&self) -> ParentConstraint {
        self.table.read().constraint
    }
}

impl FragmentRepository for InMemoryFragmentRepository {
    fn insert_batch(
        &self,
        anchor_id: AnchorId,
        parent_id: Option<FragmentId>,
        trees: &[NewFragment],
    ) -> CpsResult<Vec<FragmentId>> {
        let mut table = self.table.write();

        if let Some(parent) = parent_id {
            if !table.rows.contains_key(&parent) {
                return Err(CpsError::Store(format!("parent fragment {parent} does not exist")));
            }
        }

        let mut xpaths = Vec::new();
        for tree in trees {
            tree.collect_xpaths(&mut xpaths);
        }
        let mut seen = HashSet::with_capacity(xpaths.len());
        let mut conflicts: Vec<String> = Vec::new();
        for xpath in xpaths {
            if (!seen.insert(xpath) || table.id_of(anchor_id, xpath).is_some())
                && !conflicts.iter().any(|c| c == xpath)
            {
                conflicts.push(xpath.to_string());
            }
        }
        if !conflicts.is_empty() {
            return Err(CpsError::data_nodes_already_defined(conflicts));
        }

        Ok(trees
            .iter()
            .map(|tree| table.insert_tree(anchor_id, parent_id, tree))
            .collect())
    }

    fn find_by_anchor_and_xpath(&self, anchor_id: AnchorId, xpath: &str) -> Option<FragmentEntity> {
        let table = self.table.read();
        let id = table.id_of(anchor_id, xpath)?;
        table.row(id)
    }

    fn find_by_anchor_and_xpaths(&self, anchor_id: AnchorId, xpaths: &[String]) -> Vec<FragmentEntity> {
        let table = self.table.read();
        let mut ids: Vec<FragmentId> = xpaths
            .iter()
            .filter_map(|xpath| table.id_of(anchor_id, xpath))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().filter_map(|id| table.row(id)).collect()
    }

    fn find_list_by_anchor_and_xpath(&self, anchor_id: AnchorId, list_xpath: &str) -> Vec<FragmentEntity> {
        let prefix = format!("{list_xpath}[@");
        let table = self.table.read();
        let Some(index) = table.by_xpath.get(&anchor_id) else {
            return Vec::new();
        };
        let mut ids: Vec<FragmentId> = index
            .iter()
            .filter(|(xpath, _)| is_list_element_of(xpath, &prefix))
            .map(|(_, id)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| table.row(id)).collect()
    }

    fn find_roots_by_anchor(&self, anchor_id: AnchorId) -> Vec<FragmentEntity> {
        let table = self.table.read();
        table
            .roots
            .get(&anchor_id)
            .map(|roots| roots.iter().filter_map(|id| table.row(*id)).collect())
            .unwrap_or_default()
    }

    fn children_of(&self, fragment_id: FragmentId) -> Vec<FragmentEntity> {
        let table = self.table.read();
        table
            .children
            .get(&fragment_id)
            .map(|children| children.iter().filter_map(|id| table.row(*id)).collect())
            .unwrap_or_default()
    }

    fn update_attributes(&self, updates: &[(FragmentId, Attributes)]) -> CpsResult<()> {
        let mut table = self.table.write();
        if let Some((missing, _)) = updates.iter().find(|(id, _)| !table.rows.contains_key(id)) {
            return Err(CpsError::Store(format!("fragment {missing} no longer exists")));
        }
        for (id, attributes) in updates {
            if let Some(row) = table.rows.get_mut(id) {
                row.attributes = attributes.clone();
            }
        }
        Ok(())
    }

    fn replace_subtree(&self, fragment_id: FragmentId, replacement: &NewFragment) -> CpsResult<()> {
        self.table.write().replace_subtree(fragment_id, replacement)
    }

    fn delete_fragment(&self, fragment_id: FragmentId) -> CpsResult<()> {
        self.table.write().delete_row(fragment_id).map(|_| ())
    }

    fn delete_by_anchor(&self, anchor_id: AnchorId) -> usize {
        let mut table = self.table.write();
        let roots: Vec<FragmentId> = table
            .roots
            .get(&anchor_id)
            .map(|roots| roots.iter().copied().collect())
            .unwrap_or_default();
        let mut cascade = table.cascade();
        let deleted = roots
            .into_iter()
            .map(|id| cascade.delete_row(id).unwrap_or(0))
            .sum();
        cascade.roots.remove(&anchor_id);
        cascade.by_xpath.remove(&anchor_id);
        deleted
    }

    fn delete_by_anchor_and_xpaths(&self, anchor_id: AnchorId, xpaths: &[String]) -> usize {
        let mut table = self.table.write();
        if xpaths.iter().any(|xpath| is_root_xpath(xpath)) {
            drop(table);
            return self.delete_by_anchor(anchor_id);
        }
        let ids: Vec<FragmentId> = xpaths
            .iter()
            .filter_map(|xpath| table.id_of(anchor_id, xpath))
            .collect();
        let mut cascade = table.cascade();
        ids.into_iter()
            .map(|id| cascade.delete_row(id).unwrap_or(0))
            .sum()
    }

    fn delete_list_by_anchor_and_xpath(&self, anchor_id: AnchorId, list_xpath: &str) -> usize {
        let xpaths: Vec<String> = self
            .find_list_by_anchor_and_xpath(anchor_id, list_xpath)
            .into_iter()
            .map(|fragment| fragment.xpath)
            .collect();
        self.delete_by_anchor_and_xpaths(anchor_id, &xpaths)
    }

    fn execute(&self, query: &FragmentQuery) -> Vec<FragmentEntity> {
        let table = self.table.read();
        let mut ids: Vec<FragmentId> = table
            .rows
            .values()
            .filter(|row| query.scope.includes(row.anchor_id))
            .filter(|row| query.matches_xpath(&row.xpath))
            .filter(|row| match &query.parent {
                None => true,
                Some(ParentCondition::IsNull) => row.parent_id.is_none(),
                Some(ParentCondition::Xpath(parent_xpath)) => {
                    row.parent_id.is_some() && row.parent_id == table.id_of(row.anchor_id, parent_xpath)
                }
            })
            .filter(|row| query.matches_attributes(&row.attributes))
            .map(|row| row.id)
            .collect();
        ids.sort_unstable();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        ids.into_iter().filter_map(|id| table.row(id)).collect()
    }

    fn prefetch_descendants(
        &self,
        fragments: &[FragmentEntity],
        option: FetchDescendantsOption,
    ) -> Vec<FragmentEntity> {
        if !option.has_next() {
            return fragments.to_vec();
        }
        let table = self.table.read();
        let mut seen: HashSet<FragmentId> = HashSet::new();
        let mut rows = Vec::new();
        let mut queue: VecDeque<(FragmentId, usize)> =
            fragments.iter().map(|fragment| (fragment.id, 0)).collect();

        while let Some((id, generation)) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(row) = table.row(id) else {
                continue;
            };
            rows.push(row);
            if option.includes_generation(generation + 1) {
                if let Some(children) = table.children.get(&id) {
                    queue.extend(children.iter().map(|child| (*child, generation + 1)));
                }
            }
        }
        rows
    }
}

/// `prefix` is `list[@`; matches `list[@k='v']` but not `list[@k='v']/child`.
fn is_list_element_of(xpath: &str, prefix: &str) -> bool {
    xpath.starts_with(prefix)
        && cps_path::xpath::split_xpath_segments(xpath).len()
            == cps_path::xpath::split_xpath_segments(&prefix[..prefix.len() - 2]).len()
}
