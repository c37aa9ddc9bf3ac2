//! Compiles a [`CpsPathQuery`] into a [`FragmentQuery`].
//!
//! This module is the only place that escapes user text for `LIKE` patterns
//! and string literals. A [`FragmentQuery`] is a typed plan: it renders to
//! SQL-like text for diagnostics ([`FragmentQuery::to_sql`]) and is evaluated
//! natively by the fragment table with the same semantics.

use std::fmt::Write as _;

use cps_path::{BooleanOperator, ComparativeOperator, ConditionValue, CpsPathPrefixType, CpsPathQuery};

use crate::data_node::{Attributes, LeafValue};
use crate::error::{CpsError, CpsResult};
use crate::fragment::AnchorId;

// ============================================================================
// Escaping
// ============================================================================

/// Escapes text for use inside a `LIKE` pattern with `\` as escape character.
///
/// ```rust
/// use cps_store::query_builder::escape_for_like;
///
/// assert_eq!(escape_for_like(r"50%_off\"), r"50\%\_off\\");
/// ```
pub fn escape_for_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escapes text for use inside a single-quoted string literal.
pub fn escape_for_string_literal(text: &str) -> String {
    text.replace('\'', "''")
}

fn literal(text: &str) -> String {
    format!("'{}'", escape_for_string_literal(text))
}

// ============================================================================
// LIKE patterns
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Literal(char),
    AnyChar,
    AnySequence,
}

/// A `LIKE` pattern: `%` matches any sequence, `_` any single character and
/// `\` escapes the next character. Matching is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern {
    pattern: String,
    tokens: Vec<LikeToken>,
}

impl LikePattern {
    /// Compiles a raw pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            tokens.push(match c {
                '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
                '%' => LikeToken::AnySequence,
                '_' => LikeToken::AnyChar,
                other => LikeToken::Literal(other),
            });
        }
        Self { pattern, tokens }
    }

    /// A pattern matching exactly `text`.
    pub fn exact(text: &str) -> Self {
        Self::new(escape_for_like(text))
    }

    /// A pattern matching any text containing `text`.
    pub fn containing(text: &str) -> Self {
        Self::new(format!("%{}%", escape_for_like(text)))
    }

    /// The raw pattern text.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Appends raw pattern text (wildcards stay active).
    pub fn concat(&self, suffix: &str) -> Self {
        Self::new(format!("{}{suffix}", self.pattern))
    }

    /// Tests `text` against the pattern.
    ///
    /// ```rust
    /// use cps_store::query_builder::LikePattern;
    ///
    /// let pattern = LikePattern::new("%/books[@%]");
    /// assert!(pattern.matches("/bookstore/books[@title='x']"));
    /// assert!(!pattern.matches("/bookstore/books"));
    /// assert!(LikePattern::exact("a_b").matches("a_b"));
    /// assert!(!LikePattern::exact("a_b").matches("axb"));
    /// ```
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let tokens = &self.tokens;
        let (mut p, mut t) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            let step = match tokens.get(p) {
                Some(LikeToken::Literal(c)) if *c == text[t] => Some(false),
                Some(LikeToken::AnyChar) => Some(false),
                Some(LikeToken::AnySequence) => Some(true),
                _ => None,
            };
            match step {
                Some(false) => {
                    p += 1;
                    t += 1;
                }
                Some(true) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                None => match backtrack {
                    Some((star, consumed)) => {
                        p = star + 1;
                        t = consumed + 1;
                        backtrack = Some((star, consumed + 1));
                    }
                    None => return false,
                },
            }
        }
        tokens[p.min(tokens.len())..]
            .iter()
            .all(|token| *token == LikeToken::AnySequence)
    }
}

// ============================================================================
// Query plan
// ============================================================================

/// Which anchors a query runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// A single anchor.
    Anchor(AnchorId),
    /// Every anchor of a dataspace.
    Dataspace {
        /// Dataspace name (for rendering).
        name: String,
        /// Anchors of the dataspace.
        anchor_ids: Vec<AnchorId>,
    },
}

impl QueryScope {
    /// Returns true if fragments of `anchor_id` are in scope.
    pub fn includes(&self, anchor_id: AnchorId) -> bool {
        match self {
            QueryScope::Anchor(id) => *id == anchor_id,
            QueryScope::Dataspace { anchor_ids, .. } => anchor_ids.contains(&anchor_id),
        }
    }
}

/// Condition on the parent of a matching fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentCondition {
    /// Top-level fragment.
    IsNull,
    /// The parent is the fragment at this xpath (same anchor).
    Xpath(String),
}

/// Value side of a leaf comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonValue {
    /// Compared against the leaf cast to an integer.
    Integer(i64),
    /// Compared against the leaf text.
    Text(String),
}

/// Leaf conditions combined left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafExpression {
    /// A single comparison.
    Compare {
        /// Leaf name.
        name: String,
        /// Operator.
        operator: ComparativeOperator,
        /// Right-hand side.
        value: ComparisonValue,
    },
    /// Both sides must hold.
    And(Box<LeafExpression>, Box<LeafExpression>),
    /// Either side must hold.
    Or(Box<LeafExpression>, Box<LeafExpression>),
}

impl LeafExpression {
    fn evaluate(&self, attributes: &Attributes) -> bool {
        match self {
            LeafExpression::Compare {
                name,
                operator,
                value,
            } => {
                let Some(leaf) = attributes.get(name) else {
                    return false;
                };
                match value {
                    ComparisonValue::Integer(expected) => leaf
                        .as_integer()
                        .is_some_and(|actual| compare(actual, *operator, *expected)),
                    ComparisonValue::Text(expected) => match operator {
                        ComparativeOperator::NotEqual => leaf.as_text() != *expected,
                        _ => leaf.as_text() == *expected,
                    },
                }
            }
            LeafExpression::And(left, right) => left.evaluate(attributes) && right.evaluate(attributes),
            LeafExpression::Or(left, right) => left.evaluate(attributes) || right.evaluate(attributes),
        }
    }

    fn render(&self, sql: &mut String) {
        match self {
            LeafExpression::Compare {
                name,
                operator,
                value,
            } => match value {
                ComparisonValue::Integer(expected) => {
                    let _ = write!(sql, "(attributes->>{})::int {operator} {expected}", literal(name));
                }
                ComparisonValue::Text(expected) => {
                    let _ = write!(sql, "attributes->>{} {operator} {}", literal(name), literal(expected));
                }
            },
            LeafExpression::And(left, right) | LeafExpression::Or(left, right) => {
                let keyword = if matches!(self, LeafExpression::And(..)) { "AND" } else { "OR" };
                sql.push('(');
                left.render(sql);
                let _ = write!(sql, " {keyword} ");
                right.render(sql);
                sql.push(')');
            }
        }
    }
}

fn compare(actual: i64, operator: ComparativeOperator, expected: i64) -> bool {
    match operator {
        ComparativeOperator::Equal => actual == expected,
        ComparativeOperator::NotEqual => actual != expected,
        ComparativeOperator::GreaterThan => actual > expected,
        ComparativeOperator::LessThan => actual < expected,
        ComparativeOperator::GreaterThanOrEqual => actual >= expected,
        ComparativeOperator::LessThanOrEqual => actual <= expected,
    }
}

/// `leaf[text()='value']`: leaf value, leaf-list element or integer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextCondition {
    /// Leaf or leaf-list name.
    pub leaf_name: String,
    /// Value to match.
    pub value: String,
}

impl TextCondition {
    fn evaluate(&self, attributes: &Attributes) -> bool {
        let Some(leaf) = attributes.get(&self.leaf_name) else {
            return false;
        };
        if leaf.as_text() == self.value {
            return true;
        }
        let as_integer = self.value.parse::<i64>().ok();
        match leaf {
            LeafValue::List(elements) => elements.iter().any(|element| match element {
                LeafValue::String(s) => *s == self.value,
                other => as_integer.is_some() && other.as_integer() == as_integer,
            }),
            _ => false,
        }
    }
}

/// `[contains(@leaf,'value')]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainsCondition {
    /// Leaf name.
    pub leaf_name: String,
    /// `%escaped value%`
    pub pattern: LikePattern,
}

/// A compiled fragment query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentQuery {
    /// Anchors in scope.
    pub scope: QueryScope,
    /// Escaped xpath prefix pattern (`p` in the xpath condition).
    pub xpath_pattern: LikePattern,
    list_element_pattern: LikePattern,
    nested_list_pattern: LikePattern,
    /// Parent condition (absolute paths only).
    pub parent: Option<ParentCondition>,
    /// Leaf conditions.
    pub leaves: Option<LeafExpression>,
    /// `text()` condition.
    pub text: Option<TextCondition>,
    /// `contains()` condition.
    pub contains: Option<ContainsCondition>,
    /// Maximum number of fragments to return.
    pub limit: Option<usize>,
}

impl FragmentQuery {
    /// Compiles a parsed CPS path.
    ///
    /// # Errors
    ///
    /// [`CpsError::DataValidation`] when a string value is compared with an
    /// operator other than `=` or `!=`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cps_store::query_builder::{FragmentQuery, QueryScope};
    ///
    /// let query = cps_path::parse("//books[@lang='en']").unwrap();
    /// let plan = FragmentQuery::from_cps_path(QueryScope::Anchor(1), &query, Some(10)).unwrap();
    /// assert!(plan.to_sql().contains("xpath LIKE '%/books'"));
    /// ```
    pub fn from_cps_path(
        scope: QueryScope,
        query: &CpsPathQuery,
        limit: Option<usize>,
    ) -> CpsResult<Self> {
        let xpath_pattern = match query.prefix_type {
            CpsPathPrefixType::Absolute => LikePattern::exact(&query.xpath_prefix),
            CpsPathPrefixType::Descendant => {
                let name = query.descendant_name.as_deref().unwrap_or_default();
                LikePattern::new(format!("%/{}", escape_for_like(name)))
            }
        };

        let parent = match query.prefix_type {
            CpsPathPrefixType::Absolute if query.normalized_parent_path.is_empty() => {
                Some(ParentCondition::IsNull)
            }
            CpsPathPrefixType::Absolute => {
                Some(ParentCondition::Xpath(query.normalized_parent_path.clone()))
            }
            CpsPathPrefixType::Descendant => None,
        };

        Ok(Self {
            scope,
            list_element_pattern: xpath_pattern.concat("[@%]"),
            nested_list_pattern: xpath_pattern.concat("[@%]/%[@%]"),
            xpath_pattern,
            parent,
            leaves: leaf_expression(query)?,
            text: query
                .text_function_condition
                .as_ref()
                .map(|condition| TextCondition {
                    leaf_name: condition.leaf_name.clone(),
                    value: condition.value.clone(),
                }),
            contains: query
                .contains_function_condition
                .as_ref()
                .map(|condition| ContainsCondition {
                    leaf_name: condition.leaf_name.clone(),
                    pattern: LikePattern::containing(&condition.value),
                }),
            limit,
        })
    }

    /// Tests a fragment xpath against the xpath condition.
    pub fn matches_xpath(&self, xpath: &str) -> bool {
        self.xpath_pattern.matches(xpath)
            || (self.list_element_pattern.matches(xpath) && !self.nested_list_pattern.matches(xpath))
    }

    /// Tests fragment attributes against the leaf, `text()` and `contains()` conditions.
    pub fn matches_attributes(&self, attributes: &Attributes) -> bool {
        self.leaves
            .as_ref()
            .map_or(true, |expression| expression.evaluate(attributes))
            && self
                .text
                .as_ref()
                .map_or(true, |condition| condition.evaluate(attributes))
            && self.contains.as_ref().map_or(true, |condition| {
                attributes
                    .get(&condition.leaf_name)
                    .is_some_and(|leaf| condition.pattern.matches(&leaf.as_text()))
            })
    }

    /// Renders the plan as SQL-like text.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT * FROM fragment WHERE ");
        match &self.scope {
            QueryScope::Anchor(id) => {
                let _ = write!(sql, "anchor_id = {id}");
            }
            QueryScope::Dataspace { name, .. } => {
                let _ = write!(
                    sql,
                    "dataspace_id = (SELECT id FROM dataspace WHERE name = {})",
                    literal(name)
                );
            }
        }
        let p = literal(self.xpath_pattern.as_str());
        let _ = write!(
            sql,
            " AND (xpath LIKE {p} OR (xpath LIKE {} AND xpath NOT LIKE {}))",
            literal(self.list_element_pattern.as_str()),
            literal(self.nested_list_pattern.as_str())
        );
        match &self.parent {
            Some(ParentCondition::IsNull) => sql.push_str(" AND parent_id IS NULL"),
            Some(ParentCondition::Xpath(xpath)) => {
                let _ = write!(
                    sql,
                    " AND parent_id = (SELECT id FROM fragment parent WHERE parent.anchor_id = fragment.anchor_id AND parent.xpath = {})",
                    literal(xpath)
                );
            }
            None => {}
        }
        if let Some(expression) = &self.leaves {
            sql.push_str(" AND ");
            expression.render(&mut sql);
        }
        if let Some(text) = &self.text {
            let leaf = literal(&text.leaf_name);
            let _ = write!(
                sql,
                " AND (attributes->>{leaf} = {value} OR attributes->{leaf} @> {list}",
                value = literal(&text.value),
                list = literal(&format!("[\"{}\"]", text.value)),
            );
            if let Ok(number) = text.value.parse::<i64>() {
                let _ = write!(sql, " OR attributes->{leaf} @> '[{number}]'");
            }
            sql.push(')');
        }
        if let Some(contains) = &self.contains {
            let _ = write!(
                sql,
                " AND attributes->>{} LIKE {}",
                literal(&contains.leaf_name),
                literal(contains.pattern.as_str())
            );
        }
        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        sql
    }
}

fn leaf_expression(query: &CpsPathQuery) -> CpsResult<Option<LeafExpression>> {
    let mut expression: Option<LeafExpression> = None;
    let mut operators = query.boolean_operators.iter();
    for condition in &query.leaf_conditions {
        let value = match &condition.value {
            ConditionValue::Integer(i) => ComparisonValue::Integer(*i),
            ConditionValue::String(s) => {
                if !matches!(
                    condition.operator,
                    ComparativeOperator::Equal | ComparativeOperator::NotEqual
                ) {
                    return Err(CpsError::data_validation(
                        "Only '=' and '!=' operators are allowed for strings",
                        format!("@{} {} '{s}'", condition.name, condition.operator),
                    ));
                }
                ComparisonValue::Text(s.clone())
            }
        };
        let compare = LeafExpression::Compare {
            name: condition.name.clone(),
            operator: condition.operator,
            value,
        };
        expression = Some(match expression {
            None => compare,
            Some(left) => match operators.next() {
                Some(BooleanOperator::Or) => LeafExpression::Or(Box::new(left), Box::new(compare)),
                _ => LeafExpression::And(Box::new(left), Box::new(compare)),
            },
        });
    }
    Ok(expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(path: &str) -> FragmentQuery {
        let query = cps_path::parse(path).unwrap();
        FragmentQuery::from_cps_path(QueryScope::Anchor(1), &query, None).unwrap()
    }

    fn attributes(pairs: &[(&str, LeafValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    mod escaping {
        use super::*;

        #[test]
        fn test_escape_for_like() {
            assert_eq!(escape_for_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
            assert_eq!(escape_for_like("plain"), "plain");
        }

        #[test]
        fn test_escape_for_string_literal() {
            assert_eq!(escape_for_string_literal("it's"), "it''s");
        }

        #[test]
        fn test_like_wildcards() {
            assert!(LikePattern::new("a%").matches("abc"));
            assert!(LikePattern::new("a_c").matches("abc"));
            assert!(!LikePattern::new("a_c").matches("abbc"));
            assert!(LikePattern::new("%b%").matches("abc"));
            assert!(LikePattern::new("%").matches(""));
            assert!(!LikePattern::new("a").matches(""));
        }

        #[test]
        fn test_escaped_wildcards_are_literal() {
            let pattern = LikePattern::exact("50%");
            assert!(pattern.matches("50%"));
            assert!(!pattern.matches("500"));
            assert!(LikePattern::containing("_x").matches("a_xb"));
            assert!(!LikePattern::containing("_x").matches("ayxb"));
        }

        #[test]
        fn test_case_sensitive() {
            assert!(!LikePattern::containing("Mat").matches("matilda"));
        }
    }

    mod xpath_condition {
        use super::*;

        #[test]
        fn test_absolute_path_matches_container_and_list_elements() {
            let plan = plan("/bookstore/categories");
            assert!(plan.matches_xpath("/bookstore/categories"));
            assert!(plan.matches_xpath("/bookstore/categories[@code='1']"));
            assert!(!plan.matches_xpath("/bookstore/categories[@code='1']/books[@title='x']"));
            assert!(!plan.matches_xpath("/bookstore/categoriesX"));
            assert_eq!(
                plan.parent,
                Some(ParentCondition::Xpath("/bookstore".to_string()))
            );
        }

        #[test]
        fn test_top_level_has_null_parent() {
            assert_eq!(plan("/bookstore").parent, Some(ParentCondition::IsNull));
        }

        #[test]
        fn test_descendant_path_matches_at_any_depth() {
            let plan = plan("//books");
            assert!(plan.matches_xpath("/bookstore/categories[@code='1']/books[@title='x']"));
            assert!(plan.matches_xpath("/books"));
            assert!(!plan.matches_xpath("/bookstore/ebooks"));
            assert!(plan.parent.is_none());
        }

        #[test]
        fn test_underscore_in_name_is_not_a_wildcard() {
            let plan = plan("/a/my_list");
            assert!(plan.matches_xpath("/a/my_list"));
            assert!(!plan.matches_xpath("/a/myXlist"));
        }
    }

    mod leaf_conditions {
        use super::*;

        #[test]
        fn test_string_equality() {
            let plan = plan("//books[@lang='en']");
            assert!(plan.matches_attributes(&attributes(&[("lang", "en".into())])));
            assert!(!plan.matches_attributes(&attributes(&[("lang", "fr".into())])));
            assert!(!plan.matches_attributes(&Attributes::new()));
        }

        #[test]
        fn test_integer_comparison_casts_leaf() {
            let plan = plan("//books[@price>10]");
            assert!(plan.matches_attributes(&attributes(&[("price", 15.into())])));
            assert!(plan.matches_attributes(&attributes(&[("price", "20".into())])));
            assert!(!plan.matches_attributes(&attributes(&[("price", 5.into())])));
            assert!(!plan.matches_attributes(&attributes(&[("price", "cheap".into())])));
        }

        #[test]
        fn test_string_with_ordering_operator_is_rejected() {
            let query = cps_path::parse("//books[@title>'abc']").unwrap();
            let err = FragmentQuery::from_cps_path(QueryScope::Anchor(1), &query, None).unwrap_err();
            assert_eq!(
                err,
                CpsError::data_validation(
                    "Only '=' and '!=' operators are allowed for strings",
                    "@title > 'abc'"
                )
            );
        }

        #[test]
        fn test_conditions_fold_left_to_right() {
            // (a='1' or b='1') and c='1'
            let plan = plan("//x[@a='1' or @b='1' and @c='1']");
            let only_a = attributes(&[("a", "1".into())]);
            assert!(!plan.matches_attributes(&only_a));
            let a_and_c = attributes(&[("a", "1".into()), ("c", "1".into())]);
            assert!(plan.matches_attributes(&a_and_c));
        }

        #[test]
        fn test_text_function_matches_leaf_list_elements() {
            let plan = plan("//books/authors[text()='Roald']");
            let leaves = attributes(&[(
                "authors",
                LeafValue::List(vec!["Roald".into(), "Quentin".into()]),
            )]);
            assert!(plan.matches_attributes(&leaves));

            let plan = plan_text_integer();
            let editions = attributes(&[("editions", LeafValue::List(vec![1988.into(), 2000.into()]))]);
            assert!(plan.matches_attributes(&editions));
        }

        fn plan_text_integer() -> FragmentQuery {
            plan("//books/editions[text()=2000]")
        }

        #[test]
        fn test_contains_function() {
            let plan = plan("//books[contains(@title,'Mat')]");
            assert!(plan.matches_attributes(&attributes(&[("title", "Matilda".into())])));
            assert!(!plan.matches_attributes(&attributes(&[("title", "matilda".into())])));
        }
    }

    mod rendering {
        use super::*;

        #[test]
        fn test_sql_for_absolute_path() {
            let sql = plan("/bookstore/categories[@code='1']").to_sql();
            assert!(sql.starts_with("SELECT * FROM fragment WHERE anchor_id = 1"));
            assert!(sql.contains("xpath LIKE '/bookstore/categories'"));
            assert!(sql.contains("xpath NOT LIKE '/bookstore/categories[@%]/%[@%]'"));
            assert!(sql.contains("parent.xpath = '/bookstore'"));
            assert!(sql.contains("attributes->>'code' = '1'"));
        }

        #[test]
        fn test_sql_escapes_quotes_and_wildcards() {
            let sql = plan("//a[@name=\"it's 100%\"]").to_sql();
            assert!(sql.contains("attributes->>'name' = 'it''s 100%'"));

            let sql = plan("//a[contains(@name,'50%')]").to_sql();
            assert!(sql.contains("LIKE '%50\\%%'"));
        }

        #[test]
        fn test_sql_for_dataspace_scope_and_limit() {
            let query = cps_path::parse("//books").unwrap();
            let plan = FragmentQuery::from_cps_path(
                QueryScope::Dataspace {
                    name: "ds".to_string(),
                    anchor_ids: vec![1, 2],
                },
                &query,
                Some(5),
            )
            .unwrap();
            let sql = plan.to_sql();
            assert!(sql.contains("dataspace_id = (SELECT id FROM dataspace WHERE name = 'ds')"));
            assert!(sql.ends_with("LIMIT 5"));
            assert!(plan.scope.includes(2));
            assert!(!plan.scope.includes(3));
        }
    }
}
