//! Property and end-to-end tests for the data store.

use std::fs;

use cps_store::{
    get_delta_between_data_nodes, to_trees, CpsStore, DataNode, DeltaAction, FetchDescendantsOption,
    FragmentEntity, LeafValue, YangResource,
};
use proptest::prelude::*;
use proptest::sample::Index;

const YANG: &str = r#"module stores {
    container bookstore {
        list categories {
            key "code";
            list books { key "title"; }
        }
    }
}"#;

/// Parent index for every node after the first; node 0 is the root.
fn shape_strategy() -> impl Strategy<Value = Vec<Index>> {
    prop::collection::vec(any::<Index>(), 0..24)
}

fn parents_of(shape: &[Index]) -> Vec<Option<usize>> {
    std::iter::once(None)
        .chain(shape.iter().enumerate().map(|(i, index)| Some(index.index(i + 1))))
        .collect()
}

fn xpaths_of(parents: &[Option<usize>]) -> Vec<String> {
    let mut xpaths: Vec<String> = Vec::with_capacity(parents.len());
    for (i, parent) in parents.iter().enumerate() {
        let xpath = match parent {
            Some(p) => format!("{}/n[@id='{i}']", xpaths[*p]),
            None => "/root".to_string(),
        };
        xpaths.push(xpath);
    }
    xpaths
}

fn rows_of(shape: &[Index]) -> Vec<FragmentEntity> {
    let parents = parents_of(shape);
    let xpaths = xpaths_of(&parents);
    parents
        .iter()
        .zip(xpaths)
        .enumerate()
        .map(|(i, (parent, xpath))| FragmentEntity {
            id: i as u64 + 1,
            anchor_id: 1,
            xpath,
            parent_id: parent.map(|p| p as u64 + 1),
            attributes: Default::default(),
        })
        .collect()
}

fn forest_of(shape: &[Index], values: &[i64]) -> Vec<DataNode> {
    let parents = parents_of(shape);
    let xpaths = xpaths_of(&parents);

    fn build(i: usize, parents: &[Option<usize>], xpaths: &[String], values: &[i64]) -> DataNode {
        let children = (0..parents.len())
            .filter(|child| parents[*child] == Some(i))
            .map(|child| build(child, parents, xpaths, values))
            .collect();
        DataNode::builder()
            .with_xpath(xpaths[i].clone())
            .with_leaf("id", i as i64)
            .with_leaf("v", values.get(i).copied().unwrap_or_default())
            .with_child_data_nodes(children)
            .build()
    }

    vec![build(0, &parents, &xpaths, values)]
}

fn set_leaf(nodes: &mut [DataNode], xpath: &str, value: i64) {
    for node in nodes {
        if node.xpath == xpath {
            node.leaves.insert("v".to_string(), LeafValue::Integer(value));
        }
        set_leaf(&mut node.child_data_nodes, xpath, value);
    }
}

proptest! {
    #[test]
    fn trees_do_not_depend_on_row_order(
        (rows, shuffled) in shape_strategy()
            .prop_map(|shape| rows_of(&shape))
            .prop_flat_map(|rows| (Just(rows.clone()), Just(rows).prop_shuffle()))
    ) {
        let expected = to_trees(&rows);
        prop_assert_eq!(expected.len(), 1);
        prop_assert_eq!(expected[0].size(), rows.len());
        prop_assert_eq!(to_trees(&shuffled), expected);
    }

    #[test]
    fn delta_of_a_forest_with_itself_is_empty(
        shape in shape_strategy(),
        values in prop::collection::vec(any::<i64>(), 25),
    ) {
        let forest = forest_of(&shape, &values);
        prop_assert!(get_delta_between_data_nodes(&forest, &forest).is_empty());
    }

    #[test]
    fn delta_reports_exactly_the_changed_leaf(
        shape in shape_strategy(),
        values in prop::collection::vec(-1000i64..1000, 25),
        target in any::<Index>(),
        new_value in 1000i64..2000,
    ) {
        let before = forest_of(&shape, &values);
        let xpaths = xpaths_of(&parents_of(&shape));
        let changed = target.index(xpaths.len());
        let mut after = before.clone();
        set_leaf(&mut after, &xpaths[changed], new_value);

        let delta = get_delta_between_data_nodes(&before, &after);
        prop_assert_eq!(delta.len(), 1);
        prop_assert_eq!(delta[0].action, DeltaAction::Update);
        prop_assert_eq!(&delta[0].xpath, &xpaths[changed]);
        let target_data = delta[0].target_data.clone().unwrap_or_default();
        prop_assert_eq!(target_data.get("v"), Some(&LeafValue::Integer(new_value)));
        // List elements also report their key leaf; the root is a container.
        let source_data = delta[0].source_data.clone().unwrap_or_default();
        let expected_keys: Vec<&str> = if changed == 0 { vec!["v"] } else { vec!["id", "v"] };
        prop_assert_eq!(source_data.keys().map(String::as_str).collect::<Vec<_>>(), expected_keys);
    }
}

#[test]
fn test_delta_accounts_for_removed_and_added_subtrees() {
    let shape: Vec<Index> = Vec::new();
    let before = forest_of(&shape, &[1]);
    let mut after = before.clone();
    after[0].child_data_nodes.push(
        DataNode::builder()
            .with_xpath("/root/n[@id='x']")
            .with_leaf("id", "x")
            .with_child_data_nodes(vec![DataNode::builder()
                .with_xpath("/root/n[@id='x']/n[@id='y']")
                .with_leaf("id", "y")
                .build()])
            .build(),
    );

    let added = get_delta_between_data_nodes(&before, &after);
    assert_eq!(
        added.iter().map(|d| (d.action, d.xpath.as_str())).collect::<Vec<_>>(),
        vec![
            (DeltaAction::Add, "/root/n[@id='x']"),
            (DeltaAction::Add, "/root/n[@id='x']/n[@id='y']"),
        ]
    );

    let removed = get_delta_between_data_nodes(&after, &before);
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|d| d.action == DeltaAction::Remove && d.target_data.is_none()));
}

// ============================================================================
// Services
// ============================================================================

fn store() -> CpsStore {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = CpsStore::new();
    store.admin().create_dataspace("ds").unwrap();
    store
        .admin()
        .create_schema_set("ds", "stores", vec![YangResource::new("stores.yang", YANG).unwrap()])
        .unwrap();
    store.admin().create_anchor("ds", "stores", "shop").unwrap();
    store
        .data()
        .save_data(
            "ds",
            "shop",
            r#"{"bookstore": {"categories": [
                {"code": "1", "books": [{"title": "Dune"}]},
                {"code": "2"},
                {"code": "3"}
            ]}}"#,
        )
        .unwrap();
    store
}

fn category_codes(store: &CpsStore) -> Vec<String> {
    store
        .data()
        .get_data_nodes("ds", "shop", "/bookstore", FetchDescendantsOption::DIRECT_CHILDREN_ONLY)
        .unwrap()[0]
        .child_data_nodes
        .iter()
        .filter_map(|node| node.leaf_str("code").map(str::to_string))
        .collect()
}

#[test]
fn test_batch_delete_tolerates_missing_xpaths() {
    let store = store();
    store
        .data()
        .delete_data_nodes(
            "ds",
            "shop",
            &[
                "/bookstore/categories[@code='1']",
                "/bookstore/categories[@code='42']",
                "/bookstore/unknown",
                "/bookstore/categories[@code='3']",
            ],
        )
        .unwrap();
    assert_eq!(category_codes(&store), vec!["2"]);
}

#[test]
fn test_batch_delete_of_nothing_changes_nothing() {
    let store = store();
    store
        .data()
        .delete_data_nodes("ds", "shop", &["/bookstore/categories[@code='9']"])
        .unwrap();
    assert_eq!(category_codes(&store), vec!["1", "2", "3"]);
}

#[test]
fn test_descendants_are_deleted_with_their_parent() {
    let store = store();
    store
        .data()
        .delete_data_nodes("ds", "shop", &["/bookstore/categories[@code='1']"])
        .unwrap();
    let books = store
        .query()
        .query_data_nodes("ds", "shop", "//books", FetchDescendantsOption::OMIT_DESCENDANTS, None)
        .unwrap();
    assert!(books.is_empty());
}

#[test]
fn test_load_yang_resources_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b-stores.yang"), YANG).unwrap();
    fs::write(
        dir.path().join("a-registry.yang"),
        "module registry { revision 2024-02-20; }",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "not yang").unwrap();

    let resources = YangResource::load_dir(dir.path()).unwrap();
    assert_eq!(
        resources.iter().map(|r| r.module_name.as_str()).collect::<Vec<_>>(),
        vec!["registry", "stores"]
    );
    assert_eq!(resources[0].revision, "2024-02-20");
    assert_eq!(resources[1].file_name, "b-stores.yang");
}
