//! # cps-path
//!
//! Parser for CPS paths, the XPath subset used to address and query data
//! nodes in the CPS data store.
//!
//! This crate provides:
//! - **Parser**: compile a CPS path into a [`CpsPathQuery`]
//! - **Xpath utilities**: split, normalize and inspect plain stored xpaths
//!
//! ## Usage
//!
//! ```rust
//! use cps_path::{parse, CpsPathPrefixType};
//!
//! // Absolute path to a list element
//! let query = parse("/dmi-registry/cm-handles[@id='ch-1']").unwrap();
//! assert_eq!(query.prefix_type, CpsPathPrefixType::Absolute);
//! assert!(query.is_path_to_list_element());
//!
//! // Descendant query with an ancestor axis
//! let query = parse("//public-properties[@name='color' and @value='red']/ancestor::cm-handles").unwrap();
//! assert_eq!(query.ancestor_schema_node_identifier.as_deref(), Some("cm-handles"));
//! ```
//!
//! ## Syntax Quick Reference
//!
//! | Construct | Meaning | Example |
//! |-----------|---------|---------|
//! | `/a/b` | Absolute path | `/bookstore/categories` |
//! | `//b` | Descendant anywhere | `//books` |
//! | `[@k='v']` | Leaf condition | `//books[@lang='en']` |
//! | `and` / `or` | Combine conditions | `//books[@price>10 or @lang='en']` |
//! | `text()` | Leaf value match | `//books/title[text()='Matilda']` |
//! | `contains()` | Substring match | `//books[contains(@title,'Mat')]` |
//! | `ancestor::` | Ancestor axis | `//books/ancestor::categories` |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
mod parser;
mod query;
pub mod xpath;

pub use error::{CpsPathError, CpsPathResult};
pub use parser::parse;
pub use query::{
    BooleanOperator, ComparativeOperator, ConditionValue, ContainsFunctionCondition,
    CpsPathPrefixType, CpsPathQuery, LeafCondition, TextFunctionCondition,
};
pub use query::quote;
