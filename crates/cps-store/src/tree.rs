//! Reassembling fragment trees from flat rows and converting them to data nodes.
//!
//! Rows come back from [`FragmentRepository::prefetch_descendants`] or a query
//! in no particular order. [`to_trees`] loads them into an id-indexed arena,
//! wires children to parents in a second pass and only then builds the owned
//! trees, so the result never depends on parent-before-child ordering.
//!
//! [`FragmentRepository::prefetch_descendants`]: crate::FragmentRepository::prefetch_descendants

use hashbrown::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::data_node::DataNode;
use crate::fragment::{AnchorId, FragmentEntity, FragmentId};
use crate::prefetch::FetchDescendantsOption;

/// A fragment with its loaded children, ordered by fragment id.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentTree {
    /// The fragment itself.
    pub fragment: FragmentEntity,
    /// Children present in the loaded row set.
    pub children: Vec<FragmentTree>,
}

impl FragmentTree {
    /// Number of fragments in this tree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(FragmentTree::size).sum::<usize>()
    }

    /// Every fragment of the tree, parents before children.
    pub fn flatten(&self) -> Vec<FragmentEntity> {
        let mut rows = Vec::with_capacity(self.size());
        self.collect_rows(&mut rows);
        rows
    }

    fn collect_rows(&self, rows: &mut Vec<FragmentEntity>) {
        rows.push(self.fragment.clone());
        for child in &self.children {
            child.collect_rows(rows);
        }
    }
}

/// Builds trees from flat rows.
///
/// Rows whose parent is not in the set become roots. Duplicate ids are
/// collapsed. Roots and children are ordered by id.
pub fn to_trees(rows: &[FragmentEntity]) -> Vec<FragmentTree> {
    let mut arena: Vec<Option<FragmentEntity>> = {
        let mut sorted: Vec<&FragmentEntity> = rows.iter().collect();
        sorted.sort_by_key(|row| row.id);
        sorted.dedup_by_key(|row| row.id);
        sorted.into_iter().cloned().map(Some).collect()
    };

    let index: HashMap<FragmentId, usize> = arena
        .iter()
        .enumerate()
        .filter_map(|(slot, row)| row.as_ref().map(|row| (row.id, slot)))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
    let mut roots = Vec::new();
    for (slot, row) in arena.iter().enumerate() {
        match row
            .as_ref()
            .and_then(|row| row.parent_id)
            .and_then(|parent| index.get(&parent))
        {
            Some(&parent_slot) => children[parent_slot].push(slot),
            None => roots.push(slot),
        }
    }

    roots
        .into_iter()
        .filter_map(|slot| assemble(slot, &mut arena, &children))
        .collect()
}

fn assemble(
    slot: usize,
    arena: &mut [Option<FragmentEntity>],
    children: &[Vec<usize>],
) -> Option<FragmentTree> {
    let fragment = arena[slot].take()?;
    let children = children[slot]
        .iter()
        .filter_map(|child| assemble(*child, arena, children))
        .collect();
    Some(FragmentTree { fragment, children })
}

/// Converts one tree to a data node, including children while `option` allows.
pub fn to_data_node(
    tree: &FragmentTree,
    option: FetchDescendantsOption,
    anchor_name: Option<&str>,
    dataspace: Option<&str>,
) -> DataNode {
    let child_data_nodes = if option.has_next() {
        tree.children
            .iter()
            .map(|child| to_data_node(child, option.next(), anchor_name, dataspace))
            .collect()
    } else {
        Vec::new()
    };
    DataNode {
        xpath: tree.fragment.xpath.clone(),
        leaves: tree.fragment.attributes.clone(),
        child_data_nodes,
        anchor_name: anchor_name.map(str::to_string),
        dataspace: dataspace.map(str::to_string),
        module_name_prefix: None,
    }
}

/// Converts trees of one anchor to data nodes.
pub fn to_data_nodes(
    trees: &[FragmentTree],
    option: FetchDescendantsOption,
    anchor_name: Option<&str>,
    dataspace: Option<&str>,
) -> Vec<DataNode> {
    #[cfg(feature = "parallel")]
    {
        trees
            .par_iter()
            .map(|tree| to_data_node(tree, option, anchor_name, dataspace))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        trees
            .iter()
            .map(|tree| to_data_node(tree, option, anchor_name, dataspace))
            .collect()
    }
}

/// Converts trees spanning several anchors; each node is tagged with the name
/// of the anchor owning its root fragment.
pub fn to_data_nodes_across_anchors(
    trees: &[FragmentTree],
    option: FetchDescendantsOption,
    anchor_names: &HashMap<AnchorId, String>,
    dataspace: Option<&str>,
) -> Vec<DataNode> {
    let convert = |tree: &FragmentTree| {
        let anchor_name = anchor_names.get(&tree.fragment.anchor_id).map(String::as_str);
        to_data_node(tree, option, anchor_name, dataspace)
    };
    #[cfg(feature = "parallel")]
    {
        trees.par_iter().map(convert).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        trees.iter().map(convert).collect()
    }
}
