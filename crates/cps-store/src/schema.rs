//! Schema contexts and payload parsing.
//!
//! Full YANG compilation is out of reach here; [`JsonSchemaService`] only
//! learns what turning JSON into data nodes needs: the module names of a
//! schema set and the key leaves of each list. Contexts are cached per
//! `(dataspace, schema set)` in an LRU.

use std::collections::BTreeSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

use cps_path::xpath::child_xpath;
use hashbrown::HashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::admin::{SchemaSet, YangResource};
use crate::config::SchemaCacheConfig;
use crate::data_node::{Attributes, DataNode, LeafValue};
use crate::error::{CpsError, CpsResult};

/// Payload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// JSON.
    #[default]
    Json,
    /// XML.
    Xml,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContentType::Json => "json",
            ContentType::Xml => "xml",
        })
    }
}

impl FromStr for ContentType {
    type Err = CpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "application/json" => Ok(ContentType::Json),
            "xml" | "application/xml" => Ok(ContentType::Xml),
            other => Err(CpsError::data_validation(
                "Unsupported content type",
                format!("'{other}' is neither json nor xml"),
            )),
        }
    }
}

/// What a parser knows about a schema set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    /// Modules of the set.
    pub module_names: BTreeSet<String>,
    /// Key leaves per list name.
    pub list_keys: HashMap<String, Vec<String>>,
}

impl SchemaContext {
    /// Keys of a list, if the schema declares it.
    pub fn keys_of(&self, list_name: &str) -> Option<&[String]> {
        self.list_keys.get(list_name).map(Vec::as_slice)
    }
}

/// Validates and parses payloads against a schema set.
pub trait SchemaService: Send + Sync {
    /// Builds a context from module sources.
    fn build_context(&self, resources: &[YangResource]) -> CpsResult<SchemaContext>;

    /// Parses a payload into data nodes placed under `parent_xpath`.
    fn parse(
        &self,
        content_type: ContentType,
        payload: &str,
        context: &SchemaContext,
        parent_xpath: &str,
    ) -> CpsResult<Vec<DataNode>>;
}

// ============================================================================
// YANG scanning
// ============================================================================

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Open,
    Close,
    End,
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b'}' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b';' => {
                tokens.push(Token::End);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            quote @ (b'"' | b'\'') => {
                let start = i + 1;
                i = start;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                tokens.push(Token::Word(&source[start..i.min(bytes.len())]));
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                let start = i;
                while i < bytes.len()
                    && !bytes[i].is_ascii_whitespace()
                    && !matches!(bytes[i], b'{' | b'}' | b';')
                {
                    i += 1;
                }
                tokens.push(Token::Word(&source[start..i]));
            }
        }
    }
    tokens
}

/// Collects `list <name> { key "<leaves>"; }` declarations.
fn scan_list_keys(source: &str, list_keys: &mut HashMap<String, Vec<String>>) {
    let mut scopes: Vec<Option<String>> = Vec::new();
    let mut statement: Vec<&str> = Vec::new();
    for token in tokenize(source) {
        match token {
            Token::Word(word) => statement.push(word),
            Token::Open => {
                let list = match statement.as_slice() {
                    ["list", name, ..] => Some(name.to_string()),
                    _ => None,
                };
                scopes.push(list);
                statement.clear();
            }
            Token::Close => {
                scopes.pop();
                statement.clear();
            }
            Token::End => {
                if let ["key", keys @ ..] = statement.as_slice() {
                    if let Some(Some(list)) = scopes.last() {
                        let keys = keys
                            .iter()
                            .flat_map(|part| part.split_whitespace())
                            .map(str::to_string)
                            .collect();
                        list_keys.insert(list.clone(), keys);
                    }
                }
                statement.clear();
            }
        }
    }
}

// ============================================================================
// JsonSchemaService
// ============================================================================

/// [`SchemaService`] for JSON payloads.
///
/// # Example
///
/// ```rust
/// use cps_store::{ContentType, JsonSchemaService, SchemaService, YangResource};
///
/// let yang = r#"module stores {
///     container bookstore {
///         list categories { key "code"; leaf code { type string; } }
///     }
/// }"#;
/// let service = JsonSchemaService;
/// let context = service
///     .build_context(&[YangResource::new("stores.yang", yang).unwrap()])
///     .unwrap();
/// let nodes = service
///     .parse(
///         ContentType::Json,
///         r#"{"stores:bookstore": {"categories": [{"code": "1"}]}}"#,
///         &context,
///         "/",
///     )
///     .unwrap();
/// assert_eq!(nodes[0].xpath, "/bookstore");
/// assert_eq!(nodes[0].module_name_prefix.as_deref(), Some("stores"));
/// assert_eq!(nodes[0].child_data_nodes[0].xpath, "/bookstore/categories[@code='1']");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaService;

impl SchemaService for JsonSchemaService {
    fn build_context(&self, resources: &[YangResource]) -> CpsResult<SchemaContext> {
        let mut context = SchemaContext::default();
        for resource in resources {
            context.module_names.insert(resource.module_name.clone());
            scan_list_keys(&resource.content, &mut context.list_keys);
        }
        Ok(context)
    }

    fn parse(
        &self,
        content_type: ContentType,
        payload: &str,
        context: &SchemaContext,
        parent_xpath: &str,
    ) -> CpsResult<Vec<DataNode>> {
        if content_type != ContentType::Json {
            return Err(CpsError::data_validation(
                "Unsupported content type",
                format!("{content_type} payloads cannot be parsed"),
            ));
        }
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            CpsError::data_validation("Failed to parse json data", e.to_string())
        })?;
        let Value::Object(members) = value else {
            return Err(CpsError::data_validation(
                "Failed to parse json data",
                "payload must be a JSON object",
            ));
        };

        let mut nodes = Vec::new();
        for (qualified_name, member) in &members {
            let (module, name) = split_module_prefix(qualified_name);
            if let Some(module) = module {
                if !context.module_names.is_empty() && !context.module_names.contains(module) {
                    return Err(CpsError::data_validation(
                        "Failed to parse json data",
                        format!("unknown module '{module}'"),
                    ));
                }
            }
            match member {
                Value::Object(_) | Value::Array(_) => {
                    let mut parsed = parse_member(name, member, parent_xpath, context)?
                        .ok_or_else(|| top_level_leaf(name))?;
                    for node in &mut parsed {
                        node.module_name_prefix = module.map(str::to_string);
                    }
                    nodes.extend(parsed);
                }
                _ => return Err(top_level_leaf(name)),
            }
        }
        Ok(nodes)
    }
}

fn top_level_leaf(name: &str) -> CpsError {
    CpsError::data_validation(
        "Failed to parse json data",
        format!("'{name}' is a leaf; only containers and lists can be parsed at the top level"),
    )
}

fn split_module_prefix(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((module, local)) => (Some(module), local),
        None => (None, name),
    }
}

/// Parses one member; returns `None` for members that are leaves.
fn parse_member(
    name: &str,
    value: &Value,
    parent_xpath: &str,
    context: &SchemaContext,
) -> CpsResult<Option<Vec<DataNode>>> {
    match value {
        Value::Object(members) => {
            let xpath = child_xpath(parent_xpath, name, &[]);
            Ok(Some(vec![build_node(xpath, members, context)?]))
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let keys = context.keys_of(name).ok_or_else(|| {
                CpsError::data_validation(
                    "Failed to parse json data",
                    format!("'{name}' is not a list known to the schema"),
                )
            })?;
            items
                .iter()
                .filter_map(Value::as_object)
                .map(|members| {
                    let key_values = key_values(name, keys, members)?;
                    let key_refs: Vec<(&str, &str)> = key_values
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect();
                    let xpath = child_xpath(parent_xpath, name, &key_refs);
                    build_node(xpath, members, context)
                })
                .collect::<CpsResult<Vec<_>>>()
                .map(Some)
        }
        _ => Ok(None),
    }
}

fn key_values(
    list_name: &str,
    keys: &[String],
    members: &Map<String, Value>,
) -> CpsResult<Vec<(String, String)>> {
    keys.iter()
        .map(|key| {
            let value = members
                .iter()
                .find(|(name, _)| split_module_prefix(name).1 == key)
                .and_then(|(_, value)| LeafValue::from_json(value))
                .ok_or_else(|| {
                    CpsError::data_validation(
                        "Failed to parse json data",
                        format!("list element of '{list_name}' has no key leaf '{key}'"),
                    )
                })?;
            Ok((key.clone(), value.as_text()))
        })
        .collect()
}

fn build_node(xpath: String, members: &Map<String, Value>, context: &SchemaContext) -> CpsResult<DataNode> {
    let mut leaves = Attributes::new();
    let mut children = Vec::new();
    for (qualified_name, value) in members {
        let name = split_module_prefix(qualified_name).1;
        match parse_member(name, value, &xpath, context)? {
            Some(nodes) => children.extend(nodes),
            None => {
                if let Some(leaf) = LeafValue::from_json(value) {
                    leaves.insert(name.to_string(), leaf);
                }
            }
        }
    }
    Ok(DataNode::builder()
        .with_xpath(xpath)
        .with_leaves(leaves)
        .with_child_data_nodes(children)
        .build())
}

// ============================================================================
// SchemaContextCache
// ============================================================================

/// LRU cache of schema contexts, keyed by `(dataspace, schema set)`.
pub struct SchemaContextCache {
    contexts: Mutex<LruCache<(String, String), Arc<SchemaContext>>>,
    schema_service: Arc<dyn SchemaService>,
}

impl fmt::Debug for SchemaContextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaContextCache")
            .field("len", &self.contexts.lock().len())
            .finish_non_exhaustive()
    }
}

impl SchemaContextCache {
    /// Creates a cache in front of a schema service.
    pub fn new(config: &SchemaCacheConfig, schema_service: Arc<dyn SchemaService>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            contexts: Mutex::new(LruCache::new(capacity)),
            schema_service,
        }
    }

    /// The schema service behind the cache.
    pub fn schema_service(&self) -> &Arc<dyn SchemaService> {
        &self.schema_service
    }

    /// Returns the cached context, building it on a miss.
    pub fn get_or_build(&self, schema_set: &SchemaSet) -> CpsResult<Arc<SchemaContext>> {
        let key = (schema_set.dataspace.clone(), schema_set.name.clone());
        if let Some(context) = self.contexts.lock().get(&key) {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(self.schema_service.build_context(&schema_set.resources)?);
        debug!(dataspace = %key.0, schema_set = %key.1, "built schema context");
        self.contexts.lock().put(key, Arc::clone(&context));
        Ok(context)
    }

    /// Drops the cached context of a schema set.
    pub fn invalidate(&self, dataspace: &str, schema_set: &str) {
        self.contexts
            .lock()
            .pop(&(dataspace.to_string(), schema_set.to_string()));
    }

    /// Number of cached contexts.
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses with the cached context; on a validation failure the context is
    /// rebuilt and the parse retried once.
    pub fn parse_with_retry(
        &self,
        schema_set: &SchemaSet,
        content_type: ContentType,
        payload: &str,
        parent_xpath: &str,
    ) -> CpsResult<Vec<DataNode>> {
        let context = self.get_or_build(schema_set)?;
        match self
            .schema_service
            .parse(content_type, payload, &context, parent_xpath)
        {
            Err(CpsError::DataValidation { message, details }) => {
                warn!(
                    dataspace = %schema_set.dataspace,
                    schema_set = %schema_set.name,
                    %message,
                    %details,
                    "parse failed, retrying with a fresh schema context"
                );
                self.invalidate(&schema_set.dataspace, &schema_set.name);
                let context = self.get_or_build(schema_set)?;
                self.schema_service
                    .parse(content_type, payload, &context, parent_xpath)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const STORES: &str = r#"
        module stores {
            // bookstore
            container bookstore {
                leaf bookstore-name { type string; }
                list categories {
                    key "code";
                    leaf code { type string; }
                    /* books are keyed by title */
                    list books {
                        key title;
                        leaf title { type string; }
                        leaf-list authors { type string; }
                    }
                }
                list premises { key "street number"; }
            }
        }"#;

    fn context() -> SchemaContext {
        JsonSchemaService
            .build_context(&[YangResource::new("stores.yang", STORES).unwrap()])
            .unwrap()
    }

    mod scanning {
        use super::*;

        #[test]
        fn test_list_keys_are_scoped() {
            let context = context();
            assert_eq!(context.keys_of("categories"), Some(&["code".to_string()][..]));
            assert_eq!(context.keys_of("books"), Some(&["title".to_string()][..]));
            assert_eq!(
                context.keys_of("premises"),
                Some(&["street".to_string(), "number".to_string()][..])
            );
            assert!(context.module_names.contains("stores"));
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn test_parse_nested_lists_and_leaf_lists() {
            let json = r#"{"bookstore": {
                "bookstore-name": "Chapters",
                "categories": [{"code": "1", "books": [{"title": "Matilda", "authors": ["Roald"]}]}]
            }}"#;
            let nodes = JsonSchemaService
                .parse(ContentType::Json, json, &context(), "/")
                .unwrap();
            let bookstore = &nodes[0];
            assert_eq!(bookstore.leaf_str("bookstore-name"), Some("Chapters"));
            let book = &bookstore.child_data_nodes[0].child_data_nodes[0];
            assert_eq!(
                book.xpath,
                "/bookstore/categories[@code='1']/books[@title='Matilda']"
            );
            assert_eq!(
                book.leaf("authors"),
                Some(&LeafValue::List(vec![LeafValue::from("Roald")]))
            );
        }

        #[test]
        fn test_parse_under_parent() {
            let nodes = JsonSchemaService
                .parse(
                    ContentType::Json,
                    r#"{"categories": [{"code": "2"}, {"code": "3"}]}"#,
                    &context(),
                    "/bookstore",
                )
                .unwrap();
            assert_eq!(
                nodes.iter().map(|n| n.xpath.as_str()).collect::<Vec<_>>(),
                vec!["/bookstore/categories[@code='2']", "/bookstore/categories[@code='3']"]
            );
        }

        #[test]
        fn test_composite_keys() {
            let nodes = JsonSchemaService
                .parse(
                    ContentType::Json,
                    r#"{"premises": [{"street": "Main", "number": 1}]}"#,
                    &context(),
                    "/bookstore",
                )
                .unwrap();
            assert_eq!(nodes[0].xpath, "/bookstore/premises[@street='Main' and @number='1']");
        }

        #[test]
        fn test_missing_key_is_rejected() {
            let err = JsonSchemaService
                .parse(ContentType::Json, r#"{"categories": [{"name": "x"}]}"#, &context(), "/bookstore")
                .unwrap_err();
            assert!(matches!(err, CpsError::DataValidation { .. }));
        }

        #[test]
        fn test_xml_is_unsupported() {
            let err = JsonSchemaService
                .parse(ContentType::Xml, "<bookstore/>", &context(), "/")
                .unwrap_err();
            match err {
                CpsError::DataValidation { message, .. } => assert_eq!(message, "Unsupported content type"),
                other => panic!("unexpected error {other:?}"),
            }
        }

        #[test]
        fn test_unknown_module_prefix() {
            assert!(JsonSchemaService
                .parse(ContentType::Json, r#"{"other:bookstore": {}}"#, &context(), "/")
                .is_err());
        }

        #[test]
        fn test_content_type_from_str() {
            assert_eq!("JSON".parse::<ContentType>().unwrap(), ContentType::Json);
            assert!("yaml".parse::<ContentType>().is_err());
        }
    }

    mod cache {
        use super::*;

        /// Fails the first parse, counting context builds.
        #[derive(Default)]
        struct FlakyService {
            builds: AtomicUsize,
            parses: AtomicUsize,
        }

        impl SchemaService for FlakyService {
            fn build_context(&self, resources: &[YangResource]) -> CpsResult<SchemaContext> {
                self.builds.fetch_add(1, Ordering::SeqCst);
                JsonSchemaService.build_context(resources)
            }

            fn parse(
                &self,
                content_type: ContentType,
                payload: &str,
                context: &SchemaContext,
                parent_xpath: &str,
            ) -> CpsResult<Vec<DataNode>> {
                if self.parses.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(CpsError::data_validation("stale", "stale context"));
                }
                JsonSchemaService.parse(content_type, payload, context, parent_xpath)
            }
        }

        fn schema_set() -> SchemaSet {
            SchemaSet {
                name: "ss".to_string(),
                dataspace: "ds".to_string(),
                resources: vec![YangResource::new("stores.yang", STORES).unwrap()],
            }
        }

        #[test]
        fn test_context_is_cached() {
            let service = Arc::new(FlakyService::default());
            let cache = SchemaContextCache::new(&SchemaCacheConfig::default(), service.clone());
            cache.get_or_build(&schema_set()).unwrap();
            cache.get_or_build(&schema_set()).unwrap();
            assert_eq!(service.builds.load(Ordering::SeqCst), 1);
            assert_eq!(cache.len(), 1);
        }

        #[test]
        fn test_retry_once_with_rebuilt_context() {
            let service = Arc::new(FlakyService::default());
            let cache = SchemaContextCache::new(&SchemaCacheConfig::default(), service.clone());
            let nodes = cache
                .parse_with_retry(&schema_set(), ContentType::Json, r#"{"bookstore": {}}"#, "/")
                .unwrap();
            assert_eq!(nodes.len(), 1);
            assert_eq!(service.builds.load(Ordering::SeqCst), 2);
            assert_eq!(service.parses.load(Ordering::SeqCst), 2);
        }

        #[test]
        fn test_capacity_evicts_least_recent() {
            let cache = SchemaContextCache::new(
                &SchemaCacheConfig { capacity: 1 },
                Arc::new(JsonSchemaService),
            );
            let mut other = schema_set();
            other.name = "other".to_string();
            cache.get_or_build(&schema_set()).unwrap();
            cache.get_or_build(&other).unwrap();
            assert_eq!(cache.len(), 1);
        }
    }
}
