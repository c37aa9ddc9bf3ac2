//! Helpers for plain xpaths (as stored on fragments and data nodes).
//!
//! Stored xpaths always look like `/a/b[@k='v']/c`: absolute, no functions,
//! list predicates with normalized quoting. These helpers work on that shape
//! without building a full [`CpsPathQuery`](crate::CpsPathQuery) where a
//! cheap structural split is enough.

use crate::error::{CpsPathError, CpsPathResult};
use crate::parser::{key_predicate, parse};
use crate::query::quote;

/// The xpath of the (virtual) root of every anchor.
pub const ROOT_XPATH: &str = "/";

/// Returns true for `/` (and the empty string), which address the whole anchor.
pub fn is_root_xpath(xpath: &str) -> bool {
    let trimmed = xpath.trim();
    trimmed.is_empty() || trimmed == ROOT_XPATH
}

/// Normalizes a path: quoting of predicates, module prefixes, whitespace.
///
/// ```rust
/// use cps_path::xpath::normalized_xpath;
///
/// let xpath = normalized_xpath("/dmi-registry/cm-handles[@id=\"ch-1\"]").unwrap();
/// assert_eq!(xpath, "/dmi-registry/cm-handles[@id='ch-1']");
/// ```
pub fn normalized_xpath(xpath: &str) -> CpsPathResult<String> {
    if is_root_xpath(xpath) {
        return Ok(ROOT_XPATH.to_string());
    }
    Ok(parse(xpath)?.normalized_xpath)
}

/// Normalized xpath of the parent of the node addressed by `xpath`
/// (empty for a top-level node).
pub fn normalized_parent_xpath(xpath: &str) -> CpsPathResult<String> {
    Ok(parse(xpath)?.normalized_parent_path)
}

/// Container names along a path, predicates removed.
pub fn xpath_node_id_sequence(xpath: &str) -> CpsPathResult<Vec<String>> {
    Ok(parse(xpath)?.container_names)
}

/// Returns true if the path addresses a single list element.
pub fn is_path_to_list_element(xpath: &str) -> CpsPathResult<bool> {
    Ok(parse(xpath)?.is_path_to_list_element())
}

/// Xpath of a child step under `parent`; `keys` turn it into a list element.
///
/// ```rust
/// use cps_path::xpath::child_xpath;
///
/// assert_eq!(child_xpath("/", "bookstore", &[]), "/bookstore");
/// assert_eq!(
///     child_xpath("/dmi-registry", "cm-handles", &[("id", "ch-1")]),
///     "/dmi-registry/cm-handles[@id='ch-1']"
/// );
/// ```
pub fn child_xpath(parent: &str, name: &str, keys: &[(&str, &str)]) -> String {
    let mut xpath = if is_root_xpath(parent) {
        format!("/{name}")
    } else {
        format!("{}/{name}", parent.trim_end_matches('/'))
    };
    if !keys.is_empty() {
        let predicates: Vec<String> = keys
            .iter()
            .map(|(key, value)| format!("@{key}={}", quote(value)))
            .collect();
        xpath.push('[');
        xpath.push_str(&predicates.join(" and "));
        xpath.push(']');
    }
    xpath
}

/// Splits an xpath into its steps, ignoring `/` inside predicates and quotes.
///
/// ```rust
/// use cps_path::xpath::split_xpath_segments;
///
/// let segments = split_xpath_segments("/a/b[@k='x/y']/c");
/// assert_eq!(segments, vec!["a", "b[@k='x/y']", "c"]);
/// ```
pub fn split_xpath_segments(xpath: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;

    for (index, c) in xpath.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' if depth > 0 => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => {
                    if index > start {
                        segments.push(&xpath[start..index]);
                    }
                    start = index + 1;
                }
                _ => {}
            },
        }
    }
    if start < xpath.len() {
        segments.push(&xpath[start..]);
    }
    segments
}

/// The name part of a single step (`b` for `b[@k='v']`).
pub fn segment_name(segment: &str) -> &str {
    match segment.find('[') {
        Some(index) => &segment[..index],
        None => segment,
    }
}

/// Key/value pairs of the predicate on the last step of `xpath`.
///
/// Returns an empty list when the last step has no predicate.
///
/// ```rust
/// use cps_path::xpath::list_element_keys;
///
/// let keys = list_element_keys("/dmi-registry/cm-handles[@id='ch-1']").unwrap();
/// assert_eq!(keys, vec![("id".to_string(), "ch-1".to_string())]);
/// ```
pub fn list_element_keys(xpath: &str) -> CpsPathResult<Vec<(String, String)>> {
    let segments = split_xpath_segments(xpath);
    let Some(last) = segments.last() else {
        return Ok(Vec::new());
    };
    let Some(open) = last.find('[') else {
        return Ok(Vec::new());
    };
    let predicate = &last[open..];
    match key_predicate(predicate) {
        Ok(("", conditions)) => Ok(conditions
            .into_iter()
            .map(|condition| (condition.name, condition.value.as_text()))
            .collect()),
        _ => Err(CpsPathError::PathParsing {
            position: xpath.len() - predicate.len(),
            message: format!("invalid list key predicate: '{predicate}'"),
        }),
    }
}

/// Xpath of the closest strict ancestor of `xpath` matching `ancestor_identifier`.
///
/// The identifier is a `/`-separated chain of step names, optionally with key
/// predicates (which then must match exactly). Steps without a predicate match
/// any list element of that name.
///
/// ```rust
/// use cps_path::xpath::ancestor_xpath;
///
/// let xpath = "/dmi-registry/cm-handles[@id='ch-1']/public-properties[@name='x']";
/// assert_eq!(
///     ancestor_xpath(xpath, "cm-handles").as_deref(),
///     Some("/dmi-registry/cm-handles[@id='ch-1']")
/// );
/// assert_eq!(ancestor_xpath(xpath, "unknown"), None);
/// ```
pub fn ancestor_xpath(xpath: &str, ancestor_identifier: &str) -> Option<String> {
    let segments = split_xpath_segments(xpath);
    let wanted = split_xpath_segments(ancestor_identifier);
    if wanted.is_empty() || segments.len() <= wanted.len() {
        return None;
    }

    // The ancestor must be strict: at least one step remains below it.
    for end in (wanted.len()..segments.len()).rev() {
        let candidate = &segments[end - wanted.len()..end];
        let matches = candidate.iter().zip(wanted.iter()).all(|(actual, expected)| {
            if expected.contains('[') {
                actual == expected
            } else {
                segment_name(actual) == *expected
            }
        });
        if matches {
            return Some(format!("/{}", segments[..end].join("/")));
        }
    }
    None
}
