//! Dataspaces, schema sets and anchors.
//!
//! The admin registry owns the names; fragments live in the shared
//! [`FragmentRepository`]. Deleting an anchor (directly, or through a cascading
//! schema set delete) removes its fragments too.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CpsError, CpsResult};
use crate::fragment::{AnchorId, FragmentRepository};
use crate::validation::CpsValidator;

/// A named isolation boundary for schema sets and anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataspace {
    /// Internal id.
    pub id: u64,
    /// Name.
    pub name: String,
}

/// A module contained in a schema set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReference {
    /// Module name.
    pub module_name: String,
    /// Latest revision date, empty when the module declares none.
    pub revision: String,
}

/// A YANG module source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct YangResource {
    /// File name the module was uploaded as.
    pub file_name: String,
    /// Name from the `module` statement.
    pub module_name: String,
    /// First `revision` date, empty if absent.
    pub revision: String,
    /// Module source.
    pub content: String,
    /// Lowercase hex SHA-256 of the content.
    pub checksum: String,
}

impl YangResource {
    /// Reads the module name and revision from the source.
    ///
    /// ```rust
    /// use cps_store::YangResource;
    ///
    /// let resource = YangResource::new(
    ///     "stores.yang",
    ///     "module stores { revision 2024-01-01; container bookstore {} }",
    /// ).unwrap();
    /// assert_eq!(resource.module_name, "stores");
    /// assert_eq!(resource.revision, "2024-01-01");
    /// assert_eq!(resource.checksum.len(), 64);
    /// ```
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> CpsResult<Self> {
        let file_name = file_name.into();
        let content = content.into();
        let module_name = statement_argument(&content, "module").ok_or_else(|| {
            CpsError::data_validation(
                "Invalid YANG resource",
                format!("{file_name} has no module statement"),
            )
        })?;
        let revision = statement_argument(&content, "revision").unwrap_or_default();
        let checksum = format!("{:x}", Sha256::digest(content.as_bytes()));
        Ok(Self {
            file_name,
            module_name,
            revision,
            content,
            checksum,
        })
    }

    /// Loads every `*.yang` file of a directory, ordered by file name.
    pub fn load_dir(dir: impl AsRef<Path>) -> CpsResult<Vec<Self>> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir)
            .map_err(|e| CpsError::Store(format!("cannot read {}: {e}", dir.display())))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CpsError::Store(format!("cannot read {}: {e}", dir.display())))?
                .path();
            if path.extension().is_some_and(|ext| ext == "yang") {
                paths.push(path);
            }
        }
        paths.sort();
        paths
            .into_iter()
            .map(|path| {
                let content = fs::read_to_string(&path)
                    .map_err(|e| CpsError::Store(format!("cannot read {}: {e}", path.display())))?;
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Self::new(file_name, content)
            })
            .collect()
    }

    /// The module reference of this resource.
    pub fn module_reference(&self) -> ModuleReference {
        ModuleReference {
            module_name: self.module_name.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// Argument of the first `keyword <arg>` statement, quotes and terminators removed.
fn statement_argument(content: &str, keyword: &str) -> Option<String> {
    let mut tokens = content.split(|c: char| c.is_whitespace() || c == '{' || c == ';');
    while let Some(token) = tokens.next() {
        if token == keyword {
            return tokens
                .find(|token| !token.is_empty())
                .map(|arg| arg.trim_matches(|c| c == '"' || c == '\'').to_string());
        }
    }
    None
}

/// A named set of YANG modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSet {
    /// Name.
    pub name: String,
    /// Owning dataspace.
    pub dataspace: String,
    /// Module sources.
    pub resources: Vec<YangResource>,
}

impl SchemaSet {
    /// Modules of the set.
    pub fn modules(&self) -> Vec<ModuleReference> {
        self.resources.iter().map(YangResource::module_reference).collect()
    }

    /// Returns true if the set contains every named module.
    pub fn contains_all_modules<S: AsRef<str>>(&self, module_names: &[S]) -> bool {
        module_names.iter().all(|wanted| {
            self.resources
                .iter()
                .any(|resource| resource.module_name == wanted.as_ref())
        })
    }
}

/// A named root of one fragment tree, bound to a schema set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Internal id.
    pub id: AnchorId,
    /// Name, unique within the dataspace.
    pub name: String,
    /// Owning dataspace.
    pub dataspace_name: String,
    /// Schema set the anchor's data conforms to.
    pub schema_set_name: String,
}

/// Whether deleting a schema set may delete the anchors that use it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeDeleteAllowed {
    /// Anchors using the schema set are deleted with it.
    Allowed,
    /// The delete fails while anchors use the schema set.
    NotAllowed,
}

#[derive(Debug)]
struct DataspaceEntry {
    dataspace: Dataspace,
    schema_sets: BTreeMap<String, SchemaSet>,
    anchors: BTreeMap<String, Anchor>,
}

#[derive(Debug, Default)]
struct AdminRegistry {
    next_dataspace_id: u64,
    next_anchor_id: AnchorId,
    dataspaces: HashMap<String, DataspaceEntry>,
}

impl AdminRegistry {
    fn entry(&self, dataspace: &str) -> CpsResult<&DataspaceEntry> {
        self.dataspaces
            .get(dataspace)
            .ok_or_else(|| CpsError::DataspaceNotFound(dataspace.to_string()))
    }

    fn entry_mut(&mut self, dataspace: &str) -> CpsResult<&mut DataspaceEntry> {
        self.dataspaces
            .get_mut(dataspace)
            .ok_or_else(|| CpsError::DataspaceNotFound(dataspace.to_string()))
    }
}

// ============================================================================
// CpsAdminService
// ============================================================================

/// Manages dataspaces, schema sets and anchors.
pub struct CpsAdminService {
    registry: RwLock<AdminRegistry>,
    fragments: Arc<dyn FragmentRepository>,
}

impl std::fmt::Debug for CpsAdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpsAdminService")
            .field("dataspaces", &self.registry.read().dataspaces.len())
            .finish_non_exhaustive()
    }
}

impl CpsAdminService {
    /// Creates a service over a fragment repository.
    pub fn new(fragments: Arc<dyn FragmentRepository>) -> Self {
        Self {
            registry: RwLock::new(AdminRegistry::default()),
            fragments,
        }
    }

    // ------------------------------------------------------------------------
    // Dataspaces
    // ------------------------------------------------------------------------

    /// Creates a dataspace.
    pub fn create_dataspace(&self, name: &str) -> CpsResult<()> {
        CpsValidator.validate_name(name)?;
        let mut registry = self.registry.write();
        if registry.dataspaces.contains_key(name) {
            return Err(CpsError::AlreadyDefined {
                object_type: "Dataspace".to_string(),
                names: vec![name.to_string()],
            });
        }
        registry.next_dataspace_id += 1;
        let dataspace = Dataspace {
            id: registry.next_dataspace_id,
            name: name.to_string(),
        };
        registry.dataspaces.insert(
            name.to_string(),
            DataspaceEntry {
                dataspace,
                schema_sets: BTreeMap::new(),
                anchors: BTreeMap::new(),
            },
        );
        info!(dataspace = name, "created dataspace");
        Ok(())
    }

    /// Deletes an empty dataspace.
    pub fn delete_dataspace(&self, name: &str) -> CpsResult<()> {
        CpsValidator.validate_name(name)?;
        let mut registry = self.registry.write();
        let entry = registry.entry(name)?;
        if !entry.anchors.is_empty() {
            return Err(CpsError::DataspaceInUse {
                dataspace: name.to_string(),
                details: format!("dataspace contains {} anchor(s)", entry.anchors.len()),
            });
        }
        if !entry.schema_sets.is_empty() {
            return Err(CpsError::DataspaceInUse {
                dataspace: name.to_string(),
                details: format!("dataspace contains {} schema set(s)", entry.schema_sets.len()),
            });
        }
        registry.dataspaces.remove(name);
        info!(dataspace = name, "deleted dataspace");
        Ok(())
    }

    /// Looks up a dataspace.
    pub fn get_dataspace(&self, name: &str) -> CpsResult<Dataspace> {
        CpsValidator.validate_name(name)?;
        Ok(self.registry.read().entry(name)?.dataspace.clone())
    }

    /// All dataspaces, ordered by name.
    pub fn get_all_dataspaces(&self) -> Vec<Dataspace> {
        let registry = self.registry.read();
        let mut dataspaces: Vec<Dataspace> = registry
            .dataspaces
            .values()
            .map(|entry| entry.dataspace.clone())
            .collect();
        dataspaces.sort_by(|a, b| a.name.cmp(&b.name));
        dataspaces
    }

    // ------------------------------------------------------------------------
    // Schema sets
    // ------------------------------------------------------------------------

    /// Creates a schema set from module sources.
    pub fn create_schema_set(
        &self,
        dataspace: &str,
        name: &str,
        resources: Vec<YangResource>,
    ) -> CpsResult<()> {
        CpsValidator.validate_names(&[dataspace, name])?;
        let mut registry = self.registry.write();
        let entry = registry.entry_mut(dataspace)?;
        if entry.schema_sets.contains_key(name) {
            return Err(CpsError::AlreadyDefined {
                object_type: "Schema Set".to_string(),
                names: vec![name.to_string()],
            });
        }
        entry.schema_sets.insert(
            name.to_string(),
            SchemaSet {
                name: name.to_string(),
                dataspace: dataspace.to_string(),
                resources,
            },
        );
        debug!(dataspace, schema_set = name, "created schema set");
        Ok(())
    }

    /// Looks up a schema set.
    pub fn get_schema_set(&self, dataspace: &str, name: &str) -> CpsResult<SchemaSet> {
        CpsValidator.validate_names(&[dataspace, name])?;
        let registry = self.registry.read();
        registry
            .entry(dataspace)?
            .schema_sets
            .get(name)
            .cloned()
            .ok_or_else(|| CpsError::SchemaSetNotFound {
                dataspace: dataspace.to_string(),
                schema_set: name.to_string(),
            })
    }

    /// All schema sets of a dataspace.
    pub fn get_schema_sets(&self, dataspace: &str) -> CpsResult<Vec<SchemaSet>> {
        CpsValidator.validate_name(dataspace)?;
        Ok(self
            .registry
            .read()
            .entry(dataspace)?
            .schema_sets
            .values()
            .cloned()
            .collect())
    }

    /// Deletes a schema set; anchors using it are deleted first when allowed.
    pub fn delete_schema_set(
        &self,
        dataspace: &str,
        name: &str,
        cascade: CascadeDeleteAllowed,
    ) -> CpsResult<()> {
        CpsValidator.validate_names(&[dataspace, name])?;
        let mut registry = self.registry.write();
        let entry = registry.entry_mut(dataspace)?;
        if !entry.schema_sets.contains_key(name) {
            return Err(CpsError::SchemaSetNotFound {
                dataspace: dataspace.to_string(),
                schema_set: name.to_string(),
            });
        }
        let users: Vec<String> = entry
            .anchors
            .values()
            .filter(|anchor| anchor.schema_set_name == name)
            .map(|anchor| anchor.name.clone())
            .collect();
        if !users.is_empty() && cascade == CascadeDeleteAllowed::NotAllowed {
            return Err(CpsError::SchemaSetInUse {
                dataspace: dataspace.to_string(),
                schema_set: name.to_string(),
            });
        }
        for anchor_name in users {
            if let Some(anchor) = entry.anchors.remove(&anchor_name) {
                self.fragments.delete_by_anchor(anchor.id);
            }
        }
        entry.schema_sets.remove(name);
        debug!(dataspace, schema_set = name, "deleted schema set");
        Ok(())
    }

    /// Deletes schema sets with cascade; unknown names are skipped.
    pub fn delete_schema_sets_with_cascade<S: AsRef<str>>(
        &self,
        dataspace: &str,
        names: &[S],
    ) -> CpsResult<()> {
        CpsValidator.validate_name(dataspace)?;
        CpsValidator.validate_names(names)?;
        for name in names {
            match self.delete_schema_set(dataspace, name.as_ref(), CascadeDeleteAllowed::Allowed) {
                Err(CpsError::SchemaSetNotFound { .. }) => {
                    warn!(dataspace, schema_set = name.as_ref(), "schema set not found, skipped");
                }
                other => other?,
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Anchors
    // ------------------------------------------------------------------------

    /// Creates an anchor bound to a schema set.
    pub fn create_anchor(&self, dataspace: &str, schema_set: &str, name: &str) -> CpsResult<Anchor> {
        CpsValidator.validate_names(&[dataspace, schema_set, name])?;
        let mut registry = self.registry.write();
        registry.next_anchor_id += 1;
        let id = registry.next_anchor_id;
        let entry = registry.entry_mut(dataspace)?;
        if !entry.schema_sets.contains_key(schema_set) {
            return Err(CpsError::SchemaSetNotFound {
                dataspace: dataspace.to_string(),
                schema_set: schema_set.to_string(),
            });
        }
        if entry.anchors.contains_key(name) {
            return Err(CpsError::AlreadyDefined {
                object_type: "Anchor".to_string(),
                names: vec![name.to_string()],
            });
        }
        let anchor = Anchor {
            id,
            name: name.to_string(),
            dataspace_name: dataspace.to_string(),
            schema_set_name: schema_set.to_string(),
        };
        entry.anchors.insert(name.to_string(), anchor.clone());
        debug!(dataspace, anchor = name, "created anchor");
        Ok(anchor)
    }

    /// Looks up an anchor.
    pub fn get_anchor(&self, dataspace: &str, name: &str) -> CpsResult<Anchor> {
        CpsValidator.validate_names(&[dataspace, name])?;
        let registry = self.registry.read();
        registry
            .entry(dataspace)?
            .anchors
            .get(name)
            .cloned()
            .ok_or_else(|| CpsError::AnchorNotFound {
                dataspace: dataspace.to_string(),
                anchor: name.to_string(),
            })
    }

    /// All anchors of a dataspace, ordered by name.
    pub fn get_anchors(&self, dataspace: &str) -> CpsResult<Vec<Anchor>> {
        CpsValidator.validate_name(dataspace)?;
        Ok(self
            .registry
            .read()
            .entry(dataspace)?
            .anchors
            .values()
            .cloned()
            .collect())
    }

    /// Anchors bound to any of the named schema sets.
    pub fn get_anchors_by_schema_set_names<S: AsRef<str>>(
        &self,
        dataspace: &str,
        schema_set_names: &[S],
    ) -> CpsResult<Vec<Anchor>> {
        Ok(self
            .get_anchors(dataspace)?
            .into_iter()
            .filter(|anchor| {
                schema_set_names
                    .iter()
                    .any(|name| name.as_ref() == anchor.schema_set_name)
            })
            .collect())
    }

    /// Deletes an anchor and its fragments.
    pub fn delete_anchor(&self, dataspace: &str, name: &str) -> CpsResult<()> {
        CpsValidator.validate_names(&[dataspace, name])?;
        let mut registry = self.registry.write();
        let anchor = registry
            .entry_mut(dataspace)?
            .anchors
            .remove(name)
            .ok_or_else(|| CpsError::AnchorNotFound {
                dataspace: dataspace.to_string(),
                anchor: name.to_string(),
            })?;
        let deleted = self.fragments.delete_by_anchor(anchor.id);
        debug!(dataspace, anchor = name, fragments = deleted, "deleted anchor");
        Ok(())
    }

    /// Deletes anchors; unknown names are skipped.
    pub fn delete_anchors<S: AsRef<str>>(&self, dataspace: &str, names: &[S]) -> CpsResult<()> {
        CpsValidator.validate_name(dataspace)?;
        CpsValidator.validate_names(names)?;
        let mut registry = self.registry.write();
        let entry = registry.entry_mut(dataspace)?;
        for name in names {
            if let Some(anchor) = entry.anchors.remove(name.as_ref()) {
                self.fragments.delete_by_anchor(anchor.id);
            }
        }
        Ok(())
    }

    /// Names of the anchors whose schema set contains all the given modules.
    pub fn query_anchor_names<S: AsRef<str>>(
        &self,
        dataspace: &str,
        module_names: &[S],
    ) -> CpsResult<Vec<String>> {
        CpsValidator.validate_name(dataspace)?;
        let registry = self.registry.read();
        let entry = registry.entry(dataspace)?;
        Ok(entry
            .anchors
            .values()
            .filter(|anchor| {
                entry
                    .schema_sets
                    .get(&anchor.schema_set_name)
                    .is_some_and(|schema_set| schema_set.contains_all_modules(module_names))
            })
            .map(|anchor| anchor.name.clone())
            .collect())
    }

    /// Modules of the schema set an anchor is bound to.
    pub fn get_yang_resources_module_references(
        &self,
        dataspace: &str,
        anchor: &str,
    ) -> CpsResult<Vec<ModuleReference>> {
        let anchor = self.get_anchor(dataspace, anchor)?;
        Ok(self
            .get_schema_set(dataspace, &anchor.schema_set_name)?
            .modules())
    }
}
