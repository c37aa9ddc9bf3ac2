//! Structural diff between two data node forests.
//!
//! Nodes are matched by xpath. Both forests are flattened parents-first; the
//! report lists removed and updated nodes in reference order, followed by
//! added nodes in comparand order. Every node missing on one side gets its
//! own entry, whether it carries leaves, children, both or neither.
//!
//! [`get_grouped_delta_between_data_nodes`] condenses the same differences:
//! siblings removed or added together become one entry under their parent,
//! carrying their full content.

use std::fmt;

use cps_path::xpath::{list_element_keys, split_xpath_segments};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_node::{Attributes, DataNode, LeafValue};

/// What happened to the node at an xpath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    /// Present only in the comparand.
    Add,
    /// Present only in the reference.
    Remove,
    /// Present in both with different leaves.
    Update,
}

impl DeltaAction {
    /// The serialized spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaAction::Add => "add",
            DeltaAction::Remove => "remove",
            DeltaAction::Update => "update",
        }
    }

    /// Parses a serialized spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        [DeltaAction::Add, DeltaAction::Remove, DeltaAction::Update]
            .into_iter()
            .find(|action| action.as_str() == name)
    }
}

impl fmt::Display for DeltaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a delta report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeltaReport {
    /// The change.
    pub action: DeltaAction,
    /// Xpath of the node.
    pub xpath: String,
    /// Reference-side leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Attributes>,
    /// Comparand-side leaves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_data: Option<Attributes>,
}

impl DeltaReport {
    fn removed(node: &DataNode) -> Self {
        Self {
            action: DeltaAction::Remove,
            xpath: node.xpath.clone(),
            source_data: non_empty(node.leaves.clone()),
            target_data: None,
        }
    }

    fn added(node: &DataNode) -> Self {
        Self {
            action: DeltaAction::Add,
            xpath: node.xpath.clone(),
            source_data: None,
            target_data: non_empty(node.leaves.clone()),
        }
    }
}

fn non_empty(attributes: Attributes) -> Option<Attributes> {
    (!attributes.is_empty()).then_some(attributes)
}

/// Computes the delta turning `reference` into `comparand`.
///
/// Update entries of list elements also carry the key leaves of the element
/// on each non-empty side, so a side can be read without its xpath.
///
/// # Example
///
/// ```rust
/// use cps_store::delta::{get_delta_between_data_nodes, DeltaAction};
/// use cps_store::DataNode;
///
/// let before = vec![DataNode::builder().with_xpath("/shop").with_leaf("name", "A").build()];
/// let after = vec![DataNode::builder().with_xpath("/shop").with_leaf("name", "B").build()];
///
/// let delta = get_delta_between_data_nodes(&before, &after);
/// assert_eq!(delta.len(), 1);
/// assert_eq!(delta[0].action, DeltaAction::Update);
/// assert!(get_delta_between_data_nodes(&before, &before).is_empty());
/// ```
pub fn get_delta_between_data_nodes(reference: &[DataNode], comparand: &[DataNode]) -> Vec<DeltaReport> {
    let reference_nodes = flatten(reference);
    let comparand_nodes = flatten(comparand);
    let reference_by_xpath = index(&reference_nodes);
    let comparand_by_xpath = index(&comparand_nodes);

    let mut report = Vec::new();
    for node in &reference_nodes {
        match comparand_by_xpath.get(node.xpath.as_str()) {
            None => report.push(DeltaReport::removed(node)),
            Some(other) => report.extend(updated(node, other)),
        }
    }
    report.extend(
        comparand_nodes
            .iter()
            .filter(|node| !reference_by_xpath.contains_key(node.xpath.as_str()))
            .map(|node| DeltaReport::added(node)),
    );
    report
}

fn updated(reference: &DataNode, comparand: &DataNode) -> Option<DeltaReport> {
    let mut source = Attributes::new();
    let mut target = Attributes::new();

    for (name, value) in &reference.leaves {
        match comparand.leaves.get(name) {
            Some(other) if other == value => {}
            Some(other) => {
                source.insert(name.clone(), value.clone());
                target.insert(name.clone(), other.clone());
            }
            None => {
                source.insert(name.clone(), value.clone());
            }
        }
    }
    for (name, value) in &comparand.leaves {
        if !reference.leaves.contains_key(name) {
            target.insert(name.clone(), value.clone());
        }
    }

    if source.is_empty() && target.is_empty() {
        return None;
    }
    Some(DeltaReport {
        action: DeltaAction::Update,
        xpath: reference.xpath.clone(),
        source_data: non_empty(with_key_leaves(reference, source)),
        target_data: non_empty(with_key_leaves(comparand, target)),
    })
}

/// Adds the key leaves of a list element to a non-empty set of changed leaves.
/// Keys are taken from the node's own leaves, or from its xpath predicate.
fn with_key_leaves(node: &DataNode, mut changed: Attributes) -> Attributes {
    if changed.is_empty() || !node.is_list_element() {
        return changed;
    }
    for (name, text) in list_element_keys(&node.xpath).unwrap_or_default() {
        let value = node
            .leaves
            .get(&name)
            .cloned()
            .unwrap_or(LeafValue::String(text));
        changed.entry(name).or_insert(value);
    }
    changed
}

fn flatten(nodes: &[DataNode]) -> Vec<&DataNode> {
    fn visit<'a>(node: &'a DataNode, out: &mut Vec<&'a DataNode>) {
        out.push(node);
        for child in &node.child_data_nodes {
            visit(child, out);
        }
    }
    let mut out = Vec::new();
    for node in nodes {
        visit(node, &mut out);
    }
    out
}

fn index<'a>(nodes: &[&'a DataNode]) -> HashMap<&'a str, &'a DataNode> {
    nodes.iter().map(|node| (node.xpath.as_str(), *node)).collect()
}

// ============================================================================
// Grouped reports
// ============================================================================

/// One entry of a grouped delta report.
///
/// Data is keyed by node name, the way a JSON payload for the entry's xpath
/// would be: list elements are collected into arrays under the list name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupedDeltaReport {
    /// The change.
    pub action: DeltaAction,
    /// Parent xpath of removed or added siblings (their own xpath at top
    /// level), or the xpath of an updated node.
    pub xpath: String,
    /// Reference-side content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_data: Option<Map<String, Value>>,
    /// Comparand-side content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_data: Option<Map<String, Value>>,
}

/// Computes a grouped delta turning `reference` into `comparand`.
///
/// Levels are compared top-down. At each level the removed siblings form one
/// REMOVE entry, each matched node contributes its UPDATE entry followed by
/// the grouped delta of its children, and the added siblings form one ADD
/// entry.
///
/// ```rust
/// use cps_store::delta::{get_grouped_delta_between_data_nodes, DeltaAction};
/// use cps_store::DataNode;
///
/// let item = |id: &str| {
///     DataNode::builder()
///         .with_xpath(format!("/shop/items[@id='{id}']"))
///         .with_leaf("id", id)
///         .build()
/// };
/// let shop = |items| vec![DataNode::builder().with_xpath("/shop").with_child_data_nodes(items).build()];
///
/// let delta = get_grouped_delta_between_data_nodes(&shop(vec![]), &shop(vec![item("1"), item("2")]));
/// assert_eq!(delta.len(), 1);
/// assert_eq!(delta[0].action, DeltaAction::Add);
/// assert_eq!(delta[0].xpath, "/shop");
/// assert_eq!(delta[0].target_data.as_ref().unwrap()["items"].as_array().unwrap().len(), 2);
/// ```
pub fn get_grouped_delta_between_data_nodes(
    reference: &[DataNode],
    comparand: &[DataNode],
) -> Vec<GroupedDeltaReport> {
    let mut report = Vec::new();
    group_level(reference, comparand, &mut report);
    report
}

fn group_level(reference: &[DataNode], comparand: &[DataNode], report: &mut Vec<GroupedDeltaReport>) {
    let reference_by_xpath: HashMap<&str, &DataNode> =
        reference.iter().map(|node| (node.xpath.as_str(), node)).collect();
    let comparand_by_xpath: HashMap<&str, &DataNode> =
        comparand.iter().map(|node| (node.xpath.as_str(), node)).collect();

    let removed: Vec<&DataNode> = reference
        .iter()
        .filter(|node| !comparand_by_xpath.contains_key(node.xpath.as_str()))
        .collect();
    if let Some(first) = removed.first() {
        report.push(GroupedDeltaReport {
            action: DeltaAction::Remove,
            xpath: grouping_xpath(first),
            source_data: Some(content_by_name(&removed)),
            target_data: None,
        });
    }

    for node in reference {
        let Some(other) = comparand_by_xpath.get(node.xpath.as_str()) else {
            continue;
        };
        if let Some(update) = updated(node, other) {
            report.push(GroupedDeltaReport {
                action: DeltaAction::Update,
                xpath: update.xpath,
                source_data: update.source_data.map(|leaves| named_leaves(node, leaves)),
                target_data: update.target_data.map(|leaves| named_leaves(other, leaves)),
            });
        }
        if !node.child_data_nodes.is_empty() || !other.child_data_nodes.is_empty() {
            group_level(&node.child_data_nodes, &other.child_data_nodes, report);
        }
    }

    let added: Vec<&DataNode> = comparand
        .iter()
        .filter(|node| !reference_by_xpath.contains_key(node.xpath.as_str()))
        .collect();
    if let Some(first) = added.first() {
        report.push(GroupedDeltaReport {
            action: DeltaAction::Add,
            xpath: grouping_xpath(first),
            source_data: None,
            target_data: Some(content_by_name(&added)),
        });
    }
}

fn grouping_xpath(node: &DataNode) -> String {
    let segments = split_xpath_segments(&node.xpath);
    match segments.split_last() {
        Some((_, parents)) if !parents.is_empty() => format!("/{}", parents.join("/")),
        _ => node.xpath.clone(),
    }
}

fn content_by_name(nodes: &[&DataNode]) -> Map<String, Value> {
    let container = DataNode::builder()
        .with_child_data_nodes(nodes.iter().map(|node| (*node).clone()).collect())
        .build();
    into_object(container.to_json_value())
}

fn named_leaves(node: &DataNode, leaves: Attributes) -> Map<String, Value> {
    let mut partial = DataNode::builder().with_xpath(node.xpath.clone()).with_leaves(leaves);
    if let Some(prefix) = &node.module_name_prefix {
        partial = partial.with_module_name_prefix(prefix.clone());
    }
    into_object(partial.build().to_named_json_value())
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(object) => object,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_node::LeafValue;

    fn bookstore(name: &str, categories: &[(&str, &str)]) -> Vec<DataNode> {
        let children = categories
            .iter()
            .map(|(code, label)| {
                DataNode::builder()
                    .with_xpath(format!("/bookstore/categories[@code='{code}']"))
                    .with_leaf("code", *code)
                    .with_leaf("name", *label)
                    .build()
            })
            .collect();
        vec![DataNode::builder()
            .with_xpath("/bookstore")
            .with_leaf("bookstore-name", name)
            .with_child_data_nodes(children)
            .build()]
    }

    mod reports {
        use super::*;

        #[test]
        fn test_identical_forests_have_no_delta() {
            let tree = bookstore("Chapters", &[("1", "SciFi"), ("2", "Kids")]);
            assert!(get_delta_between_data_nodes(&tree, &tree).is_empty());
        }

        #[test]
        fn test_removed_node() {
            let before = bookstore("Chapters", &[("1", "SciFi"), ("2", "Kids")]);
            let after = bookstore("Chapters", &[("1", "SciFi")]);
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(delta.len(), 1);
            assert_eq!(delta[0].action, DeltaAction::Remove);
            assert_eq!(delta[0].xpath, "/bookstore/categories[@code='2']");
            assert_eq!(
                delta[0].source_data.as_ref().and_then(|d| d.get("name")),
                Some(&LeafValue::from("Kids"))
            );
            assert!(delta[0].target_data.is_none());
        }

        #[test]
        fn test_added_node_comes_after_updates() {
            let before = bookstore("Chapters", &[("1", "SciFi")]);
            let after = bookstore("Easons", &[("1", "SciFi"), ("3", "Comedy")]);
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(
                delta.iter().map(|d| (d.action, d.xpath.as_str())).collect::<Vec<_>>(),
                vec![
                    (DeltaAction::Update, "/bookstore"),
                    (DeltaAction::Add, "/bookstore/categories[@code='3']"),
                ]
            );
        }

        #[test]
        fn test_leaf_presence_differences() {
            let before = vec![DataNode::builder()
                .with_xpath("/shop")
                .with_leaf("old", "x")
                .with_leaf("same", 1_i64)
                .build()];
            let after = vec![DataNode::builder()
                .with_xpath("/shop")
                .with_leaf("new", true)
                .with_leaf("same", 1_i64)
                .build()];
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(delta.len(), 1);
            let source = delta[0].source_data.as_ref().unwrap();
            let target = delta[0].target_data.as_ref().unwrap();
            assert_eq!(source.keys().collect::<Vec<_>>(), vec!["old"]);
            assert_eq!(target.keys().collect::<Vec<_>>(), vec!["new"]);
        }

        #[test]
        fn test_one_sided_update_omits_other_side() {
            let before = vec![DataNode::builder().with_xpath("/shop").build()];
            let after = vec![DataNode::builder().with_xpath("/shop").with_leaf("name", "A").build()];
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(delta[0].action, DeltaAction::Update);
            assert!(delta[0].source_data.is_none());
            assert!(delta[0].target_data.is_some());
        }

        #[test]
        fn test_empty_nodes_on_both_sides_produce_nothing() {
            let node = vec![DataNode::builder().with_xpath("/empty").build()];
            assert!(get_delta_between_data_nodes(&node, &node.clone()).is_empty());
        }

        fn shop_with_item() -> Vec<DataNode> {
            vec![DataNode::builder()
                .with_xpath("/shop")
                .with_child_data_nodes(vec![DataNode::builder()
                    .with_xpath("/shop/item")
                    .with_leaf("id", 1_i64)
                    .build()])
                .build()]
        }

        #[test]
        fn test_removed_container_without_leaves_has_its_own_entry() {
            let delta = get_delta_between_data_nodes(&shop_with_item(), &[]);
            assert_eq!(
                delta.iter().map(|d| (d.action, d.xpath.as_str())).collect::<Vec<_>>(),
                vec![(DeltaAction::Remove, "/shop"), (DeltaAction::Remove, "/shop/item")]
            );
            assert!(delta[0].source_data.is_none());
            assert!(delta[1].source_data.is_some());
        }

        #[test]
        fn test_added_container_without_leaves_has_its_own_entry() {
            let delta = get_delta_between_data_nodes(&[], &shop_with_item());
            assert_eq!(
                delta.iter().map(|d| (d.action, d.xpath.as_str())).collect::<Vec<_>>(),
                vec![(DeltaAction::Add, "/shop"), (DeltaAction::Add, "/shop/item")]
            );
            assert!(delta[0].target_data.is_none());
        }

        #[test]
        fn test_update_of_list_element_carries_key_leaves() {
            let before = bookstore("Chapters", &[("1", "SciFi")]);
            let after = bookstore("Chapters", &[("1", "Fantasy")]);
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(delta.len(), 1);
            let source = delta[0].source_data.as_ref().unwrap();
            let target = delta[0].target_data.as_ref().unwrap();
            assert_eq!(source.get("code"), Some(&LeafValue::from("1")));
            assert_eq!(source.get("name"), Some(&LeafValue::from("SciFi")));
            assert_eq!(target.get("code"), Some(&LeafValue::from("1")));
            assert_eq!(target.get("name"), Some(&LeafValue::from("Fantasy")));
        }

        #[test]
        fn test_key_leaves_fall_back_to_the_xpath_predicate() {
            let element = |leaves: &[(&str, &str)]| {
                let mut builder = DataNode::builder().with_xpath("/shop/items[@id='7']");
                for (name, value) in leaves {
                    builder = builder.with_leaf(*name, *value);
                }
                vec![builder.build()]
            };
            let delta = get_delta_between_data_nodes(&element(&[]), &element(&[("label", "x")]));
            assert!(delta[0].source_data.is_none());
            let target = delta[0].target_data.as_ref().unwrap();
            assert_eq!(target.get("id"), Some(&LeafValue::from("7")));
            assert_eq!(target.get("label"), Some(&LeafValue::from("x")));
        }

        #[test]
        fn test_containers_do_not_get_key_leaves() {
            let before = bookstore("Chapters", &[]);
            let after = bookstore("Easons", &[]);
            let delta = get_delta_between_data_nodes(&before, &after);
            assert_eq!(
                delta[0].source_data.as_ref().unwrap().keys().collect::<Vec<_>>(),
                vec!["bookstore-name"]
            );
        }
    }

    mod grouped {
        use super::*;

        #[test]
        fn test_identical_forests_have_no_grouped_delta() {
            let tree = bookstore("Chapters", &[("1", "SciFi")]);
            assert!(get_grouped_delta_between_data_nodes(&tree, &tree).is_empty());
        }

        #[test]
        fn test_removed_siblings_are_grouped_under_their_parent() {
            let before = bookstore("Chapters", &[("1", "SciFi"), ("2", "Kids"), ("3", "Comedy")]);
            let after = bookstore("Chapters", &[("1", "SciFi")]);
            let delta = get_grouped_delta_between_data_nodes(&before, &after);
            assert_eq!(delta.len(), 1);
            assert_eq!(delta[0].action, DeltaAction::Remove);
            assert_eq!(delta[0].xpath, "/bookstore");
            let source = delta[0].source_data.as_ref().unwrap();
            assert_eq!(
                source["categories"],
                serde_json::json!([{"code": "2", "name": "Kids"}, {"code": "3", "name": "Comedy"}])
            );
        }

        #[test]
        fn test_order_is_remove_update_children_then_add() {
            let before = bookstore("Chapters", &[("1", "SciFi"), ("2", "Kids")]);
            let mut after = bookstore("Easons", &[("1", "Fantasy"), ("4", "Poetry")]);
            after.push(DataNode::builder().with_xpath("/library").with_leaf("open", true).build());
            let delta = get_grouped_delta_between_data_nodes(&before, &after);
            assert_eq!(
                delta.iter().map(|d| (d.action, d.xpath.as_str())).collect::<Vec<_>>(),
                vec![
                    (DeltaAction::Update, "/bookstore"),
                    (DeltaAction::Remove, "/bookstore"),
                    (DeltaAction::Update, "/bookstore/categories[@code='1']"),
                    (DeltaAction::Add, "/bookstore"),
                    (DeltaAction::Add, "/library"),
                ]
            );
            assert_eq!(
                delta[2].target_data.as_ref().unwrap()["categories"],
                serde_json::json!([{"code": "1", "name": "Fantasy"}])
            );
            assert_eq!(
                delta[4].target_data.as_ref().unwrap()["library"],
                serde_json::json!({"open": true})
            );
        }

        #[test]
        fn test_update_names_the_container() {
            let before = bookstore("Chapters", &[]);
            let after = bookstore("Easons", &[]);
            let delta = get_grouped_delta_between_data_nodes(&before, &after);
            assert_eq!(
                delta[0].source_data.as_ref().unwrap()["bookstore"],
                serde_json::json!({"bookstore-name": "Chapters"})
            );
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use proptest::sample::Index;
        use std::collections::BTreeMap;

        /// A node of the shared universe: parent index, presence on each side,
        /// and its value on each side.
        #[derive(Debug, Clone)]
        struct Slot {
            parent: Index,
            in_reference: bool,
            in_comparand: bool,
            reference_value: i64,
            comparand_value: i64,
        }

        fn slots() -> impl Strategy<Value = Vec<Slot>> {
            prop::collection::vec(
                (any::<Index>(), any::<bool>(), any::<bool>(), 0i64..3, 0i64..3).prop_map(
                    |(parent, in_reference, in_comparand, reference_value, comparand_value)| Slot {
                        parent,
                        in_reference,
                        in_comparand,
                        reference_value,
                        comparand_value,
                    },
                ),
                1..20,
            )
        }

        /// Parent of each slot (slot 0 is the root) and its xpath.
        fn layout(slots: &[Slot]) -> (Vec<Option<usize>>, Vec<String>) {
            let mut parents = Vec::with_capacity(slots.len());
            let mut xpaths: Vec<String> = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter().enumerate() {
                let parent = (i > 0).then(|| slot.parent.index(i));
                let xpath = match parent {
                    Some(p) => format!("{}/n[@id='{i}']", xpaths[p]),
                    None => "/root".to_string(),
                };
                parents.push(parent);
                xpaths.push(xpath);
            }
            (parents, xpaths)
        }

        /// Presence per side; a slot is present only under a present parent.
        fn presence(slots: &[Slot], parents: &[Option<usize>], side: fn(&Slot) -> bool) -> Vec<bool> {
            let mut present: Vec<bool> = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter().enumerate() {
                let parent_present = parents[i].map_or(true, |p| present[p]);
                present.push(parent_present && side(slot));
            }
            present
        }

        fn build(
            i: usize,
            parents: &[Option<usize>],
            xpaths: &[String],
            present: &[bool],
            value: &dyn Fn(usize) -> i64,
        ) -> DataNode {
            let children = (0..parents.len())
                .filter(|child| parents[*child] == Some(i) && present[*child])
                .map(|child| build(child, parents, xpaths, present, value))
                .collect();
            let mut builder = DataNode::builder().with_xpath(xpaths[i].clone());
            // Odd slots carry no leaves so structural containers are covered too.
            if i % 2 == 0 {
                builder = builder.with_leaf("v", value(i));
            }
            builder.with_child_data_nodes(children).build()
        }

        fn forest(
            parents: &[Option<usize>],
            xpaths: &[String],
            present: &[bool],
            value: &dyn Fn(usize) -> i64,
        ) -> Vec<DataNode> {
            if present[0] {
                vec![build(0, parents, xpaths, present, value)]
            } else {
                Vec::new()
            }
        }

        proptest! {
            #[test]
            fn every_difference_has_exactly_one_entry(universe in slots()) {
                let (parents, xpaths) = layout(&universe);
                let in_reference = presence(&universe, &parents, |slot| slot.in_reference);
                let in_comparand = presence(&universe, &parents, |slot| slot.in_comparand);
                let reference = forest(&parents, &xpaths, &in_reference, &|i| universe[i].reference_value);
                let comparand = forest(&parents, &xpaths, &in_comparand, &|i| universe[i].comparand_value);

                let delta = get_delta_between_data_nodes(&reference, &comparand);
                let mut entries: BTreeMap<&str, Vec<&DeltaReport>> = BTreeMap::new();
                for entry in &delta {
                    entries.entry(entry.xpath.as_str()).or_default().push(entry);
                }

                let mut expected_entries = 0;
                for i in 0..universe.len() {
                    let found = entries.get(xpaths[i].as_str()).cloned().unwrap_or_default();
                    let changed_leaf = i % 2 == 0 && universe[i].reference_value != universe[i].comparand_value;
                    match (in_reference[i], in_comparand[i]) {
                        (true, false) => {
                            prop_assert_eq!(found.len(), 1);
                            prop_assert_eq!(found[0].action, DeltaAction::Remove);
                            expected_entries += 1;
                        }
                        (false, true) => {
                            prop_assert_eq!(found.len(), 1);
                            prop_assert_eq!(found[0].action, DeltaAction::Add);
                            expected_entries += 1;
                        }
                        (true, true) if changed_leaf => {
                            prop_assert_eq!(found.len(), 1);
                            prop_assert_eq!(found[0].action, DeltaAction::Update);
                            let source = found[0].source_data.clone().unwrap_or_default();
                            let target = found[0].target_data.clone().unwrap_or_default();
                            prop_assert_eq!(source.get("v"), Some(&LeafValue::Integer(universe[i].reference_value)));
                            prop_assert_eq!(target.get("v"), Some(&LeafValue::Integer(universe[i].comparand_value)));
                            expected_entries += 1;
                        }
                        _ => prop_assert!(found.is_empty()),
                    }
                }
                prop_assert_eq!(delta.len(), expected_entries);
            }
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn test_json_shape() {
            let report = DeltaReport {
                action: DeltaAction::Update,
                xpath: "/shop".to_string(),
                source_data: Some([("name".to_string(), LeafValue::from("A"))].into_iter().collect()),
                target_data: None,
            };
            let json = serde_json::to_value(&report).unwrap();
            assert_eq!(
                json,
                serde_json::json!({"action": "update", "xpath": "/shop", "source-data": {"name": "A"}})
            );
        }
    }
}
