//! CPS path parser implementation using nom.
//!
//! The grammar, informally:
//!
//! ```text
//! cpsPath        := ('/' | '//') step ('/' step)*
//! step           := ancestorAxis | textStep | element
//! element        := qname leafConditions? containsCall?
//! leafConditions := '[' condition (('and' | 'or') condition)* ']'
//! condition      := '@' qname op (integer | string)
//! textStep       := qname '[' 'text()' '=' (integer | string) ']'
//! containsCall   := '[' 'contains' '(' '@' qname ',' string ')' ']'
//! ancestorAxis   := 'ancestor::' qname keyPredicate? ('/' qname keyPredicate?)*
//! ```
//!
//! Parsing produces a flat list of steps which [`build_query`] validates and
//! folds into a [`CpsPathQuery`].

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::error::{CpsPathError, CpsPathResult};
use crate::query::{
    quote, BooleanOperator, ComparativeOperator, ConditionValue, ContainsFunctionCondition,
    CpsPathPrefixType, CpsPathQuery, LeafCondition, TextFunctionCondition,
};

/// Parse a CPS path string.
///
/// # Arguments
/// * `input` - The CPS path to parse
///
/// # Returns
/// The compiled query or an error
///
/// # Examples
///
/// ```rust
/// use cps_path::parse;
///
/// // Absolute path to a list element
/// let query = parse("/bookstore/categories[@code='01']").unwrap();
/// assert!(query.is_path_to_list_element());
///
/// // Descendant with leaf conditions
/// let query = parse("//books[@price>15 and @lang='en']").unwrap();
/// assert_eq!(query.leaf_conditions.len(), 2);
///
/// // Ancestor axis
/// let query = parse("//books/ancestor::categories").unwrap();
/// assert!(query.has_ancestor_axis());
/// ```
pub fn parse(input: &str) -> CpsPathResult<CpsPathQuery> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CpsPathError::EmptyPath);
    }
    if !input.starts_with('/') || input.starts_with("///") {
        return Err(CpsPathError::IncorrectPrefix);
    }

    let (prefix_type, body) = match input.strip_prefix("//") {
        Some(rest) => (CpsPathPrefixType::Descendant, rest),
        None => (CpsPathPrefixType::Absolute, &input[1..]),
    };

    match all_consuming(steps)(body) {
        Ok((_, steps)) => build_query(prefix_type, steps),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position = input.len() - e.input.len();
            Err(CpsPathError::PathParsing {
                position,
                message: format!("unexpected input at: '{}'", truncate(e.input, 20)),
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(CpsPathError::PathParsing {
            position: input.len(),
            message: "incomplete cps path".to_string(),
        }),
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}

// ============================================================================
// Raw steps
// ============================================================================

#[derive(Debug, Clone)]
struct Element {
    name: String,
    conditions: Vec<LeafCondition>,
    operators: Vec<BooleanOperator>,
    contains: Option<ContainsFunctionCondition>,
}

#[derive(Debug, Clone)]
enum Step {
    Element(Element),
    Text(TextFunctionCondition),
    Ancestor(Vec<Element>),
}

fn steps(input: &str) -> IResult<&str, Vec<Step>> {
    let (input, first) = step(input)?;
    let (input, rest) = many0(preceded(char('/'), step))(input)?;
    let mut all = Vec::with_capacity(rest.len() + 1);
    all.push(first);
    all.extend(rest);
    Ok((input, all))
}

fn step(input: &str) -> IResult<&str, Step> {
    alt((ancestor_axis, text_step, map(element, Step::Element)))(input)
}

fn element(input: &str) -> IResult<&str, Element> {
    let (input, name) = qname(input)?;
    let (input, conditions) = opt(leaf_conditions)(input)?;
    let (input, contains) = opt(contains_call)(input)?;
    let (conditions, operators) = conditions.unwrap_or_default();
    Ok((
        input,
        Element {
            name,
            conditions,
            operators,
            contains,
        },
    ))
}

fn ancestor_axis(input: &str) -> IResult<&str, Step> {
    map(
        preceded(
            tag("ancestor::"),
            separated_list1(char('/'), ancestor_element),
        ),
        Step::Ancestor,
    )(input)
}

fn ancestor_element(input: &str) -> IResult<&str, Element> {
    let (input, name) = qname(input)?;
    let (input, conditions) = opt(leaf_conditions)(input)?;
    let (conditions, operators) = conditions.unwrap_or_default();
    Ok((
        input,
        Element {
            name,
            conditions,
            operators,
            contains: None,
        },
    ))
}

fn text_step(input: &str) -> IResult<&str, Step> {
    map(
        tuple((
            qname,
            ws,
            char('['),
            ws,
            tag("text()"),
            ws,
            char('='),
            ws,
            condition_value,
            ws,
            char(']'),
        )),
        |(leaf_name, _, _, _, _, _, _, _, value, _, _)| {
            Step::Text(TextFunctionCondition {
                leaf_name,
                value: value.as_text(),
            })
        },
    )(input)
}

fn contains_call(input: &str) -> IResult<&str, ContainsFunctionCondition> {
    map(
        tuple((
            char('['),
            ws,
            tag("contains"),
            ws,
            char('('),
            ws,
            char('@'),
            qname,
            ws,
            char(','),
            ws,
            string_literal,
            ws,
            char(')'),
            ws,
            char(']'),
        )),
        |(_, _, _, _, _, _, _, leaf_name, _, _, _, value, _, _, _, _)| {
            ContainsFunctionCondition { leaf_name, value }
        },
    )(input)
}

// ============================================================================
// Leaf conditions
// ============================================================================

fn leaf_conditions(input: &str) -> IResult<&str, (Vec<LeafCondition>, Vec<BooleanOperator>)> {
    let (input, _) = pair(char('['), ws)(input)?;
    let (input, first) = leaf_condition(input)?;
    let (input, rest) = many0(pair(boolean_operator, leaf_condition))(input)?;
    let (input, _) = pair(ws, char(']'))(input)?;

    let mut conditions = Vec::with_capacity(rest.len() + 1);
    let mut operators = Vec::with_capacity(rest.len());
    conditions.push(first);
    for (operator, condition) in rest {
        operators.push(operator);
        conditions.push(condition);
    }
    Ok((input, (conditions, operators)))
}

/// Parses a `[@k='v' and ...]` key predicate. Used by the xpath utilities.
pub(crate) fn key_predicate(input: &str) -> IResult<&str, Vec<LeafCondition>> {
    let (rest, (conditions, operators)) = leaf_conditions(input)?;
    let all_keys = operators.iter().all(|op| *op == BooleanOperator::And)
        && conditions
            .iter()
            .all(|condition| condition.operator == ComparativeOperator::Equal);
    if all_keys {
        Ok((rest, conditions))
    } else {
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )))
    }
}

fn leaf_condition(input: &str) -> IResult<&str, LeafCondition> {
    map(
        tuple((
            ws,
            char('@'),
            qname,
            ws,
            comparative_operator,
            ws,
            condition_value,
        )),
        |(_, _, name, _, operator, _, value)| LeafCondition {
            name,
            operator,
            value,
        },
    )(input)
}

fn boolean_operator(input: &str) -> IResult<&str, BooleanOperator> {
    delimited(
        ws,
        alt((
            value(BooleanOperator::And, tag("and")),
            value(BooleanOperator::Or, tag("or")),
        )),
        ws,
    )(input)
}

fn comparative_operator(input: &str) -> IResult<&str, ComparativeOperator> {
    alt((
        value(ComparativeOperator::GreaterThanOrEqual, tag(">=")),
        value(ComparativeOperator::LessThanOrEqual, tag("<=")),
        value(ComparativeOperator::NotEqual, tag("!=")),
        value(ComparativeOperator::Equal, tag("=")),
        value(ComparativeOperator::GreaterThan, tag(">")),
        value(ComparativeOperator::LessThan, tag("<")),
    ))(input)
}

fn condition_value(input: &str) -> IResult<&str, ConditionValue> {
    alt((
        map(string_literal, ConditionValue::String),
        map(integer, ConditionValue::Integer),
    ))(input)
}

fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

// ============================================================================
// Lexical helpers
// ============================================================================

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((single_quoted, double_quoted))(input)
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '\'')
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    quoted(input, '"')
}

/// A literal delimited by `delimiter`, where a doubled delimiter stands for itself.
fn quoted(input: &str, delimiter: char) -> IResult<&str, String> {
    let (mut rest, _) = char(delimiter)(input)?;
    let mut text = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
            Some(c) if c == delimiter => {
                let after = chars.as_str();
                if let Some(stripped) = after.strip_prefix(delimiter) {
                    text.push(delimiter);
                    rest = stripped;
                } else {
                    return Ok((after, text));
                }
            }
            Some(c) => {
                text.push(c);
                rest = chars.as_str();
            }
        }
    }
}

/// A name with an optional `module:` prefix. The prefix is dropped.
fn qname(input: &str) -> IResult<&str, String> {
    let (input, first) = name_part(input)?;
    let (input, second) = opt(preceded(char(':'), name_part))(input)?;
    Ok((input, second.unwrap_or(first).to_string()))
}

fn name_part(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'),
    ))(input)
}

fn ws(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

// ============================================================================
// Folding steps into a query
// ============================================================================

fn build_query(prefix_type: CpsPathPrefixType, mut steps: Vec<Step>) -> CpsPathResult<CpsPathQuery> {
    let ancestor = match steps.last() {
        Some(Step::Ancestor(_)) => match steps.pop() {
            Some(Step::Ancestor(elements)) => Some(elements),
            _ => None,
        },
        _ => None,
    };
    let text = match steps.last() {
        Some(Step::Text(_)) => match steps.pop() {
            Some(Step::Text(condition)) => Some(condition),
            _ => None,
        },
        _ => None,
    };

    let mut elements = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            Step::Element(element) => elements.push(element),
            Step::Text(condition) => {
                return Err(CpsPathError::UnsupportedCondition(format!(
                    "text() condition on '{}' must be the last step",
                    condition.leaf_name
                )))
            }
            Step::Ancestor(_) => {
                return Err(CpsPathError::UnsupportedCondition(
                    "ancestor axis must be the last step".to_string(),
                ))
            }
        }
    }

    let Some(last) = elements.pop() else {
        return Err(CpsPathError::UnsupportedCondition(
            "a cps path must contain at least one container".to_string(),
        ));
    };

    let mut rendered_ancestors = Vec::with_capacity(elements.len());
    for element in &elements {
        if let Some(contains) = &element.contains {
            return Err(CpsPathError::UnsupportedCondition(format!(
                "contains() on '{}' is only allowed on the last container",
                contains.leaf_name
            )));
        }
        rendered_ancestors.push(render_key_element(element)?);
    }

    let leading = match prefix_type {
        CpsPathPrefixType::Absolute => "/",
        CpsPathPrefixType::Descendant => "//",
    };

    let normalized_parent_path = if rendered_ancestors.is_empty() {
        String::new()
    } else {
        format!("{leading}{}", rendered_ancestors.join("/"))
    };

    let xpath_prefix = if normalized_parent_path.is_empty() {
        format!("{leading}{}", last.name)
    } else {
        format!("{normalized_parent_path}/{}", last.name)
    };

    let mut normalized_xpath = xpath_prefix.clone();
    if !last.conditions.is_empty() {
        normalized_xpath.push_str(&render_conditions(&last.conditions, &last.operators));
    }
    if let Some(contains) = &last.contains {
        normalized_xpath.push_str(&format!(
            "[contains(@{},{})]",
            contains.leaf_name,
            quote(&contains.value)
        ));
    }
    if let Some(text) = &text {
        normalized_xpath.push_str(&format!(
            "/{}[text()={}]",
            text.leaf_name,
            quote(&text.value)
        ));
    }
    let ancestor_schema_node_identifier = match &ancestor {
        Some(ancestor_elements) => {
            let rendered = ancestor_elements
                .iter()
                .map(render_key_element)
                .collect::<CpsPathResult<Vec<_>>>()?
                .join("/");
            normalized_xpath.push_str("/ancestor::");
            normalized_xpath.push_str(&rendered);
            Some(rendered)
        }
        None => None,
    };

    let descendant_name = match prefix_type {
        CpsPathPrefixType::Descendant => Some(xpath_prefix[2..].to_string()),
        CpsPathPrefixType::Absolute => None,
    };

    let mut container_names: Vec<String> = elements.into_iter().map(|e| e.name).collect();
    container_names.push(last.name);

    Ok(CpsPathQuery {
        prefix_type,
        xpath_prefix,
        normalized_xpath,
        normalized_parent_path,
        descendant_name,
        container_names,
        leaf_conditions: last.conditions,
        boolean_operators: last.operators,
        text_function_condition: text,
        contains_function_condition: last.contains,
        ancestor_schema_node_identifier,
    })
}

/// Renders an intermediate element; its predicate must be a key predicate.
fn render_key_element(element: &Element) -> CpsPathResult<String> {
    if element.conditions.is_empty() {
        return Ok(element.name.clone());
    }
    let keys_only = element
        .operators
        .iter()
        .all(|operator| *operator == BooleanOperator::And)
        && element
            .conditions
            .iter()
            .all(|condition| condition.operator == ComparativeOperator::Equal);
    if !keys_only {
        return Err(CpsPathError::UnsupportedCondition(format!(
            "only key predicates ('=' joined by 'and') are allowed on '{}'",
            element.name
        )));
    }
    Ok(format!(
        "{}{}",
        element.name,
        render_conditions(&element.conditions, &element.operators)
    ))
}

fn render_conditions(conditions: &[LeafCondition], operators: &[BooleanOperator]) -> String {
    let mut rendered = String::from("[");
    for (index, condition) in conditions.iter().enumerate() {
        if index > 0 {
            if let Some(operator) = operators.get(index - 1) {
                rendered.push_str(&format!(" {operator} "));
            }
        }
        rendered.push('@');
        rendered.push_str(&condition.name);
        rendered.push_str(condition.operator.as_str());
        match (&condition.operator, &condition.value) {
            (ComparativeOperator::Equal, value) => rendered.push_str(&quote(&value.as_text())),
            (_, value) => rendered.push_str(&value.to_string()),
        }
    }
    rendered.push(']');
    rendered
}
