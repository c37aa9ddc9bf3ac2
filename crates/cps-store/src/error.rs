//! Error types for the CPS data store.

use cps_path::CpsPathError;
use thiserror::Error;

/// Errors that can occur in the data store and its services.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CpsError {
    /// No dataspace with this name.
    #[error("Dataspace not found: {0}")]
    DataspaceNotFound(String),

    /// No schema set with this name in the dataspace.
    #[error("Schema set not found: {schema_set} in dataspace {dataspace}")]
    SchemaSetNotFound {
        /// Dataspace searched.
        dataspace: String,
        /// Missing schema set.
        schema_set: String,
    },

    /// No anchor with this name in the dataspace.
    #[error("Anchor not found: {anchor} in dataspace {dataspace}")]
    AnchorNotFound {
        /// Dataspace searched.
        dataspace: String,
        /// Missing anchor.
        anchor: String,
    },

    /// A single data node could not be found.
    #[error("DataNode not found: {xpath} (dataspace {dataspace}, anchor {anchor})")]
    DataNodeNotFound {
        /// Dataspace searched.
        dataspace: String,
        /// Anchor searched.
        anchor: String,
        /// Xpath that does not exist.
        xpath: String,
    },

    /// Several data nodes of a batch could not be found.
    #[error("DataNodes not found: {} (dataspace {dataspace}, anchor {anchor})", xpaths.join(", "))]
    DataNodesNotFound {
        /// Dataspace searched.
        dataspace: String,
        /// Anchor searched.
        anchor: String,
        /// Xpaths that do not exist.
        xpaths: Vec<String>,
    },

    /// One or more objects already exist.
    #[error("Already defined {object_type}: {}", names.join(", "))]
    AlreadyDefined {
        /// Kind of object ("data node", "anchor", ...).
        object_type: String,
        /// Names or xpaths of the conflicting objects.
        names: Vec<String>,
    },

    /// Input failed validation.
    #[error("Data validation failed: {message} ({details})")]
    DataValidation {
        /// Short description.
        message: String,
        /// Detail, typically naming the offending value.
        details: String,
    },

    /// A CPS path or xpath failed to parse.
    #[error("CPS path error: {0}")]
    PathParsing(#[from] CpsPathError),

    /// The dataspace still owns anchors or schema sets.
    #[error("Dataspace in use: {dataspace} ({details})")]
    DataspaceInUse {
        /// Dataspace being deleted.
        dataspace: String,
        /// What still references it.
        details: String,
    },

    /// The schema set is still referenced by anchors.
    #[error("Schema set in use: {schema_set} in dataspace {dataspace}")]
    SchemaSetInUse {
        /// Dataspace of the schema set.
        dataspace: String,
        /// Schema set being deleted.
        schema_set: String,
    },

    /// A fragment with children was deleted while the parent constraint is restrictive.
    #[error("Referential integrity violation: fragment {xpath} still has children")]
    ReferentialIntegrity {
        /// Xpath of the fragment that could not be deleted.
        xpath: String,
    },

    /// Error from the underlying fragment table.
    #[error("Store error: {0}")]
    Store(String),
}

/// Coarse classification of [`CpsError`], used by callers that map failures
/// to response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Dataspace, schema set, anchor or data node missing.
    NotFound,
    /// Invalid input, including unparsable paths.
    Validation,
    /// Object already exists.
    AlreadyDefined,
    /// Object still in use, or an integrity violation.
    Conflict,
    /// Anything else.
    Unclassified,
}

impl CpsError {
    /// Creates a [`CpsError::DataValidation`].
    pub fn data_validation(message: impl Into<String>, details: impl Into<String>) -> Self {
        CpsError::DataValidation {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Creates a [`CpsError::AlreadyDefined`] for data nodes.
    pub fn data_nodes_already_defined(xpaths: Vec<String>) -> Self {
        CpsError::AlreadyDefined {
            object_type: "data node".to_string(),
            names: xpaths,
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CpsError::DataspaceNotFound(_)
            | CpsError::SchemaSetNotFound { .. }
            | CpsError::AnchorNotFound { .. }
            | CpsError::DataNodeNotFound { .. }
            | CpsError::DataNodesNotFound { .. } => ErrorKind::NotFound,
            CpsError::DataValidation { .. } | CpsError::PathParsing(_) => ErrorKind::Validation,
            CpsError::AlreadyDefined { .. } => ErrorKind::AlreadyDefined,
            CpsError::DataspaceInUse { .. }
            | CpsError::SchemaSetInUse { .. }
            | CpsError::ReferentialIntegrity { .. } => ErrorKind::Conflict,
            CpsError::Store(_) => ErrorKind::Unclassified,
        }
    }
}

/// Result type for data store operations.
pub type CpsResult<T> = std::result::Result<T, CpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_data_node_not_found() {
        let err = CpsError::DataNodeNotFound {
            dataspace: "ds".to_string(),
            anchor: "a1".to_string(),
            xpath: "/x".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "DataNode not found: /x (dataspace ds, anchor a1)"
        );
    }

    #[test]
    fn test_error_display_already_defined() {
        let err = CpsError::data_nodes_already_defined(vec!["/a".into(), "/b".into()]);
        assert_eq!(err.to_string(), "Already defined data node: /a, /b");
    }

    #[test]
    fn test_error_from_path_error() {
        let err: CpsError = CpsPathError::EmptyPath.into();
        assert!(matches!(err, CpsError::PathParsing(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CpsError::DataspaceNotFound("ds".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CpsError::data_validation("bad", "name").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            CpsError::ReferentialIntegrity { xpath: "/a".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(CpsError::Store("x".into()).kind(), ErrorKind::Unclassified);
    }
}
