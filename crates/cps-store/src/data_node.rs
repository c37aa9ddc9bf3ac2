//! The data node model: a tree of leaves addressed by xpath.
//!
//! Leaves are held as a [`LeafValue`] tagged union so numeric, boolean and
//! leaf-list values survive a round trip through the fragment table without
//! losing their type.

use std::collections::BTreeMap;
use std::fmt;

use cps_path::xpath::{segment_name, split_xpath_segments};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Leaves of a node, ordered by name.
pub type Attributes = BTreeMap<String, LeafValue>;

// ============================================================================
// LeafValue
// ============================================================================

/// The value of a leaf or leaf-list.
///
/// Serializes untagged, so `{"a": 1, "b": "x", "c": [1, 2]}` maps directly
/// onto JSON payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LeafValue {
    /// Text value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Decimal value.
    Decimal(f64),
    /// Boolean value.
    Boolean(bool),
    /// Leaf-list.
    List(Vec<LeafValue>),
}

impl LeafValue {
    /// Converts a JSON scalar or array of scalars. Objects and null yield None.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(LeafValue::String(s.clone())),
            Value::Bool(b) => Some(LeafValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(LeafValue::Integer(i)),
                None => n.as_f64().map(LeafValue::Decimal),
            },
            Value::Array(items) => items
                .iter()
                .map(LeafValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(LeafValue::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Converts to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            LeafValue::String(s) => Value::String(s.clone()),
            LeafValue::Integer(i) => Value::Number((*i).into()),
            LeafValue::Decimal(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
            LeafValue::Boolean(b) => Value::Bool(*b),
            LeafValue::List(items) => Value::Array(items.iter().map(LeafValue::to_json).collect()),
        }
    }

    /// The value as text, the way a JSON `->>` accessor renders it.
    pub fn as_text(&self) -> String {
        match self {
            LeafValue::String(s) => s.clone(),
            LeafValue::List(_) => self.to_json().to_string(),
            other => other.to_string(),
        }
    }

    /// Borrows a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LeafValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer coercion: integers, whole decimals and numeric strings.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LeafValue::Integer(i) => Some(*i),
            LeafValue::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            LeafValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Elements of a leaf-list (a scalar is a one-element list).
    pub fn elements(&self) -> &[LeafValue] {
        match self {
            LeafValue::List(items) => items,
            scalar => std::slice::from_ref(scalar),
        }
    }
}

impl fmt::Display for LeafValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafValue::String(s) => f.write_str(s),
            LeafValue::Integer(i) => write!(f, "{i}"),
            LeafValue::Decimal(d) => write!(f, "{d}"),
            LeafValue::Boolean(b) => write!(f, "{b}"),
            LeafValue::List(_) => f.write_str(&self.to_json().to_string()),
        }
    }
}

impl From<&str> for LeafValue {
    fn from(value: &str) -> Self {
        LeafValue::String(value.to_string())
    }
}

impl From<String> for LeafValue {
    fn from(value: String) -> Self {
        LeafValue::String(value)
    }
}

impl From<i64> for LeafValue {
    fn from(value: i64) -> Self {
        LeafValue::Integer(value)
    }
}

impl From<f64> for LeafValue {
    fn from(value: f64) -> Self {
        LeafValue::Decimal(value)
    }
}

impl From<bool> for LeafValue {
    fn from(value: bool) -> Self {
        LeafValue::Boolean(value)
    }
}

// ============================================================================
// DataNode
// ============================================================================

/// A node of a data tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataNode {
    /// Normalized absolute xpath.
    pub xpath: String,
    /// Leaves of this node.
    #[serde(default)]
    pub leaves: Attributes,
    /// Children, in creation order.
    #[serde(default)]
    pub child_data_nodes: Vec<DataNode>,
    /// Anchor the node was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_name: Option<String>,
    /// Dataspace the node was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataspace: Option<String>,
    /// Module prefix of the node's name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name_prefix: Option<String>,
}

impl DataNode {
    /// Starts a builder.
    pub fn builder() -> DataNodeBuilder {
        DataNodeBuilder::default()
    }

    /// Looks up a leaf.
    pub fn leaf(&self, name: &str) -> Option<&LeafValue> {
        self.leaves.get(name)
    }

    /// Looks up a text leaf.
    pub fn leaf_str(&self, name: &str) -> Option<&str> {
        self.leaves.get(name).and_then(LeafValue::as_str)
    }

    /// The node name: the last xpath step without its predicate.
    pub fn name(&self) -> &str {
        split_xpath_segments(&self.xpath)
            .last()
            .copied()
            .map(segment_name)
            .unwrap_or("")
    }

    /// Returns true if the last xpath step carries a key predicate.
    pub fn is_list_element(&self) -> bool {
        split_xpath_segments(&self.xpath)
            .last()
            .is_some_and(|segment| segment.contains('['))
    }

    /// Finds a direct child by name.
    pub fn child(&self, name: &str) -> Option<&DataNode> {
        self.child_data_nodes.iter().find(|child| child.name() == name)
    }

    /// Direct children that are elements of the list `name`.
    pub fn list_elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a DataNode> + 'a {
        self.child_data_nodes
            .iter()
            .filter(move |child| child.is_list_element() && child.name() == name)
    }

    /// Renders the content of this node as a JSON object.
    ///
    /// Leaves become members, containers become nested objects and list
    /// elements are collected into arrays under the list name.
    ///
    /// ```rust
    /// use cps_store::DataNode;
    ///
    /// let node = DataNode::builder()
    ///     .with_xpath("/shop")
    ///     .with_leaf("name", "corner")
    ///     .with_child_data_nodes(vec![
    ///         DataNode::builder().with_xpath("/shop/items[@id='1']").with_leaf("id", "1").build(),
    ///         DataNode::builder().with_xpath("/shop/items[@id='2']").with_leaf("id", "2").build(),
    ///     ])
    ///     .build();
    /// let json = node.to_json_value();
    /// assert_eq!(json["name"], "corner");
    /// assert_eq!(json["items"][1]["id"], "2");
    /// ```
    pub fn to_json_value(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.leaves {
            object.insert(name.clone(), value.to_json());
        }
        for child in &self.child_data_nodes {
            let name = child.name().to_string();
            let content = child.to_json_value();
            if child.is_list_element() {
                match object
                    .entry(name)
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    Value::Array(elements) => elements.push(content),
                    other => *other = Value::Array(vec![content]),
                }
            } else {
                object.insert(name, content);
            }
        }
        Value::Object(object)
    }

    /// Renders the node wrapped in an object keyed by its (prefixed) name.
    pub fn to_named_json_value(&self) -> Value {
        let name = match &self.module_name_prefix {
            Some(prefix) => format!("{prefix}:{}", self.name()),
            None => self.name().to_string(),
        };
        let content = if self.is_list_element() {
            Value::Array(vec![self.to_json_value()])
        } else {
            self.to_json_value()
        };
        let mut object = Map::new();
        object.insert(name, content);
        Value::Object(object)
    }
}

// ============================================================================
// DataNodeBuilder
// ============================================================================

/// Builder for [`DataNode`].
#[derive(Debug, Clone, Default)]
pub struct DataNodeBuilder {
    node: DataNode,
}

impl DataNodeBuilder {
    /// Sets the xpath.
    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.node.xpath = xpath.into();
        self
    }

    /// Replaces all leaves.
    pub fn with_leaves(mut self, leaves: Attributes) -> Self {
        self.node.leaves = leaves;
        self
    }

    /// Adds a single leaf.
    pub fn with_leaf(mut self, name: impl Into<String>, value: impl Into<LeafValue>) -> Self {
        self.node.leaves.insert(name.into(), value.into());
        self
    }

    /// Replaces all children.
    pub fn with_child_data_nodes(mut self, children: Vec<DataNode>) -> Self {
        self.node.child_data_nodes = children;
        self
    }

    /// Sets the anchor name.
    pub fn with_anchor_name(mut self, anchor_name: impl Into<String>) -> Self {
        self.node.anchor_name = Some(anchor_name.into());
        self
    }

    /// Sets the dataspace name.
    pub fn with_dataspace(mut self, dataspace: impl Into<String>) -> Self {
        self.node.dataspace = Some(dataspace.into());
        self
    }

    /// Sets the module name prefix.
    pub fn with_module_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node.module_name_prefix = Some(prefix.into());
        self
    }

    /// Builds the DataNode.
    pub fn build(self) -> DataNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod leaf_value {
        use super::*;

        #[test]
        fn test_untagged_deserialization() {
            let leaves: Attributes =
                serde_json::from_value(json!({"s": "x", "i": 3, "d": 1.5, "b": true, "l": ["a", 1]}))
                    .unwrap();
            assert_eq!(leaves["s"], LeafValue::String("x".into()));
            assert_eq!(leaves["i"], LeafValue::Integer(3));
            assert_eq!(leaves["d"], LeafValue::Decimal(1.5));
            assert_eq!(leaves["b"], LeafValue::Boolean(true));
            assert_eq!(
                leaves["l"],
                LeafValue::List(vec!["a".into(), LeafValue::Integer(1)])
            );
        }

        #[test]
        fn test_as_text() {
            assert_eq!(LeafValue::from("x").as_text(), "x");
            assert_eq!(LeafValue::from(12).as_text(), "12");
            assert_eq!(LeafValue::from(false).as_text(), "false");
            assert_eq!(
                LeafValue::List(vec!["a".into(), 2.into()]).as_text(),
                r#"["a",2]"#
            );
        }

        #[test]
        fn test_as_integer() {
            assert_eq!(LeafValue::from("42").as_integer(), Some(42));
            assert_eq!(LeafValue::from(3.0).as_integer(), Some(3));
            assert_eq!(LeafValue::from(3.5).as_integer(), None);
            assert_eq!(LeafValue::from("abc").as_integer(), None);
        }

        #[test]
        fn test_from_json_rejects_objects_and_null() {
            assert!(LeafValue::from_json(&json!({"a": 1})).is_none());
            assert!(LeafValue::from_json(&Value::Null).is_none());
            assert!(LeafValue::from_json(&json!([1, {"a": 1}])).is_none());
        }
    }

    mod data_node {
        use super::*;

        fn sample() -> DataNode {
            DataNode::builder()
                .with_xpath("/dmi-registry/cm-handles[@id='ch-1']")
                .with_leaf("id", "ch-1")
                .with_child_data_nodes(vec![
                    DataNode::builder()
                        .with_xpath("/dmi-registry/cm-handles[@id='ch-1']/state")
                        .with_leaf("cm-handle-state", "READY")
                        .build(),
                    DataNode::builder()
                        .with_xpath(
                            "/dmi-registry/cm-handles[@id='ch-1']/public-properties[@name='p1']",
                        )
                        .with_leaf("name", "p1")
                        .with_leaf("value", "v1")
                        .build(),
                ])
                .build()
        }

        #[test]
        fn test_name_and_list_detection() {
            let node = sample();
            assert_eq!(node.name(), "cm-handles");
            assert!(node.is_list_element());
            assert!(!node.child_data_nodes[0].is_list_element());
            assert_eq!(node.child("state").unwrap().name(), "state");
            assert_eq!(node.list_elements("public-properties").count(), 1);
        }

        #[test]
        fn test_to_json_value() {
            let json = sample().to_json_value();
            assert_eq!(
                json,
                json!({
                    "id": "ch-1",
                    "state": {"cm-handle-state": "READY"},
                    "public-properties": [{"name": "p1", "value": "v1"}]
                })
            );
        }

        #[test]
        fn test_to_named_json_value_uses_prefix() {
            let node = DataNode::builder()
                .with_xpath("/bookstore")
                .with_module_name_prefix("stores")
                .with_leaf("name", "x")
                .build();
            assert_eq!(
                node.to_named_json_value(),
                json!({"stores:bookstore": {"name": "x"}})
            );
        }

        #[test]
        fn test_root_name_is_empty() {
            assert_eq!(DataNode::default().name(), "");
        }
    }
}
