//! Error types for the cm-handle inventory.

use cps_path::CpsPathError;
use cps_store::{CpsError, ErrorKind};
use thiserror::Error;

/// Result type for inventory operations.
pub type NcmpResult<T> = Result<T, NcmpError>;

/// Errors that can occur in the inventory, registration and query services.
#[derive(Debug, Error)]
pub enum NcmpError {
    /// Error from the underlying data store.
    #[error(transparent)]
    Cps(#[from] CpsError),

    /// The alternate id is held by another cm-handle.
    #[error("Alternate id {alternate_id} is already associated with another cm-handle (rejected for {cm_handle_id})")]
    AlternateIdAlreadyAssociated {
        /// Cm-handle that proposed the alternate id.
        cm_handle_id: String,
        /// The contested alternate id.
        alternate_id: String,
    },

    /// The DMI plugin names of a registration do not form a valid combination.
    #[error("Invalid DMI plugin registration: {0}")]
    DmiPluginRegistration(String),

    /// The cm-handle is not in the state the operation requires.
    #[error("State mismatch: {0}")]
    StateMismatch(String),

    /// A domain model could not be converted to or from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Text that is not one of NONE, INCOMPLETE or COMPLETE.
    #[error("Invalid trust level: {0}")]
    InvalidTrustLevel(String),
}

impl From<CpsPathError> for NcmpError {
    fn from(error: CpsPathError) -> Self {
        NcmpError::Cps(CpsError::PathParsing(error))
    }
}

impl NcmpError {
    /// Classifies this error; store errors keep their own classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NcmpError::Cps(error) => error.kind(),
            NcmpError::AlternateIdAlreadyAssociated { .. } | NcmpError::StateMismatch(_) => {
                ErrorKind::Conflict
            }
            NcmpError::DmiPluginRegistration(_) | NcmpError::InvalidTrustLevel(_) => {
                ErrorKind::Validation
            }
            NcmpError::Serialization(_) => ErrorKind::Unclassified,
        }
    }

    /// Creates a [`NcmpError::Cps`] holding a data validation failure.
    pub fn data_validation(message: impl Into<String>, details: impl Into<String>) -> Self {
        NcmpError::Cps(CpsError::data_validation(message, details))
    }
}
