//! Compiled representation of a CPS path.
//!
//! A [`CpsPathQuery`] is produced by [`crate::parse`] and is immutable once
//! built. Every textual part of it (prefix, parent path, full xpath) is held
//! in normalized form: list predicates use single quotes unless the value
//! itself contains one.

use std::fmt;

// ============================================================================
// Building blocks
// ============================================================================

/// Whether a path is anchored at the root or matches anywhere in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CpsPathPrefixType {
    /// `/a/b/c`: the path starts at a top-level container.
    Absolute,
    /// `//c`: the trailing part may appear at any depth.
    Descendant,
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComparativeOperator {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `<`
    LessThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<=`
    LessThanOrEqual,
}

impl ComparativeOperator {
    /// The operator as written in a CPS path (and in SQL).
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparativeOperator::Equal => "=",
            ComparativeOperator::NotEqual => "!=",
            ComparativeOperator::GreaterThan => ">",
            ComparativeOperator::LessThan => "<",
            ComparativeOperator::GreaterThanOrEqual => ">=",
            ComparativeOperator::LessThanOrEqual => "<=",
        }
    }
}

impl fmt::Display for ComparativeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean operator joining two leaf conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BooleanOperator {
    /// `and`
    And,
    /// `or`
    Or,
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanOperator::And => f.write_str("and"),
            BooleanOperator::Or => f.write_str("or"),
        }
    }
}

/// Literal on the right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConditionValue {
    /// An integer literal, compared numerically.
    Integer(i64),
    /// A quoted string literal, compared as text.
    String(String),
}

impl ConditionValue {
    /// The literal as text, without quotes.
    pub fn as_text(&self) -> String {
        match self {
            ConditionValue::Integer(value) => value.to_string(),
            ConditionValue::String(value) => value.clone(),
        }
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionValue::Integer(value) => write!(f, "{value}"),
            ConditionValue::String(value) => f.write_str(&quote(value)),
        }
    }
}

/// `@name <op> value`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeafCondition {
    /// Leaf name (module prefix stripped).
    pub name: String,
    /// Comparison operator.
    pub operator: ComparativeOperator,
    /// Comparison value.
    pub value: ConditionValue,
}

impl LeafCondition {
    /// Creates an equality condition on a string value.
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operator: ComparativeOperator::Equal,
            value: ConditionValue::String(value.into()),
        }
    }
}

impl fmt::Display for LeafCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}{}{}", self.name, self.operator, self.value)
    }
}

/// `leaf[text()='value']`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextFunctionCondition {
    /// The leaf (or leaf-list) name.
    pub leaf_name: String,
    /// Value to match, as text.
    pub value: String,
}

/// `[contains(@leaf,'value')]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContainsFunctionCondition {
    /// The leaf name.
    pub leaf_name: String,
    /// Substring to search for (case-sensitive).
    pub value: String,
}

// ============================================================================
// CpsPathQuery
// ============================================================================

/// A parsed CPS path.
///
/// # Example
///
/// ```rust
/// use cps_path::{parse, CpsPathPrefixType};
///
/// let query = parse("/dmi-registry/cm-handles[@id=\"ch-1\"]/state").unwrap();
/// assert_eq!(query.prefix_type, CpsPathPrefixType::Absolute);
/// assert_eq!(query.xpath_prefix, "/dmi-registry/cm-handles[@id='ch-1']/state");
/// assert_eq!(query.normalized_parent_path, "/dmi-registry/cm-handles[@id='ch-1']");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpsPathQuery {
    /// Absolute or descendant.
    pub prefix_type: CpsPathPrefixType,
    /// Normalized path up to and including the last container, without the
    /// trailing leaf conditions.
    pub xpath_prefix: String,
    /// The full path, normalized.
    pub normalized_xpath: String,
    /// Path of the parent of the last container (empty for a top-level container).
    pub normalized_parent_path: String,
    /// For descendant paths: the part after the leading `//`.
    pub descendant_name: Option<String>,
    /// Names of all containers on the path, in order.
    pub container_names: Vec<String>,
    /// Conditions on the last container, in the order written.
    pub leaf_conditions: Vec<LeafCondition>,
    /// Operators joining `leaf_conditions`; always one fewer than the conditions.
    pub boolean_operators: Vec<BooleanOperator>,
    /// `text()` condition on a leaf of the last container.
    pub text_function_condition: Option<TextFunctionCondition>,
    /// `contains()` condition on a leaf of the last container.
    pub contains_function_condition: Option<ContainsFunctionCondition>,
    /// Target of the `ancestor::` axis, if any.
    pub ancestor_schema_node_identifier: Option<String>,
}

impl CpsPathQuery {
    /// Returns true if the last container carries leaf conditions.
    pub fn has_leaf_conditions(&self) -> bool {
        !self.leaf_conditions.is_empty()
    }

    /// Returns true if the path ends with a `text()` condition.
    pub fn has_text_function_condition(&self) -> bool {
        self.text_function_condition.is_some()
    }

    /// Returns true if the path carries a `contains()` condition.
    pub fn has_contains_function_condition(&self) -> bool {
        self.contains_function_condition.is_some()
    }

    /// Returns true if the path ends with an `ancestor::` axis.
    pub fn has_ancestor_axis(&self) -> bool {
        self.ancestor_schema_node_identifier.is_some()
    }

    /// Returns true if the path addresses a single list element, i.e. its
    /// last step is a key predicate (`=` conditions joined by `and`).
    pub fn is_path_to_list_element(&self) -> bool {
        self.has_leaf_conditions()
            && !self.has_text_function_condition()
            && !self.has_contains_function_condition()
            && !self.has_ancestor_axis()
            && self
                .leaf_conditions
                .iter()
                .all(|condition| condition.operator == ComparativeOperator::Equal)
            && self
                .boolean_operators
                .iter()
                .all(|operator| *operator == BooleanOperator::And)
    }
}

impl fmt::Display for CpsPathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized_xpath)
    }
}

/// Quotes a literal the way stored xpaths quote key values, so it can be
/// embedded in a CPS path predicate.
///
/// ```rust
/// assert_eq!(cps_path::quote("ch-1"), "'ch-1'");
/// assert_eq!(cps_path::quote("it's"), "\"it's\"");
/// ```
pub fn quote(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_prefers_single_quotes() {
        assert_eq!(quote("abc"), "'abc'");
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a'b\"c"), "'a''b\"c'");
    }

    #[test]
    fn test_leaf_condition_display() {
        let condition = LeafCondition::equal("id", "ch-1");
        assert_eq!(condition.to_string(), "@id='ch-1'");

        let numeric = LeafCondition {
            name: "price".to_string(),
            operator: ComparativeOperator::GreaterThanOrEqual,
            value: ConditionValue::Integer(10),
        };
        assert_eq!(numeric.to_string(), "@price>=10");
    }

    #[test]
    fn test_condition_value_as_text() {
        assert_eq!(ConditionValue::Integer(-3).as_text(), "-3");
        assert_eq!(ConditionValue::String("x".into()).as_text(), "x");
    }
}
