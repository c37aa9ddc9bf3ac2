//! Registration requests from DMI plugins and the per-handle responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NcmpError, NcmpResult};
use crate::models::cm_handle::NcmpServiceCmHandle;

/// Handles to move to a new module set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpgradedCmHandles {
    /// Cm-handle ids.
    pub cm_handles: Vec<String>,
    /// Target module set tag.
    pub module_set_tag: String,
}

/// One registration request from a DMI plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DmiPluginRegistration {
    /// Plugin serving both data and models.
    pub dmi_plugin: String,
    /// Plugin serving data.
    pub dmi_data_plugin: String,
    /// Plugin serving models.
    pub dmi_model_plugin: String,
    /// Handles to register.
    pub created_cm_handles: Vec<NcmpServiceCmHandle>,
    /// Handles to update.
    pub updated_cm_handles: Vec<NcmpServiceCmHandle>,
    /// Ids of handles to remove.
    pub removed_cm_handles: Vec<String>,
    /// Handles to upgrade.
    pub upgraded_cm_handles: Option<UpgradedCmHandles>,
}

impl DmiPluginRegistration {
    /// Creates a registration for a combined data and model plugin.
    pub fn for_plugin(dmi_plugin: impl Into<String>) -> Self {
        Self {
            dmi_plugin: dmi_plugin.into(),
            ..Self::default()
        }
    }

    /// Checks the plugin names: either the combined plugin alone, or both the
    /// data and the model plugin.
    pub fn validate(&self) -> NcmpResult<()> {
        let combined = !self.dmi_plugin.trim().is_empty();
        let data = !self.dmi_data_plugin.trim().is_empty();
        let model = !self.dmi_model_plugin.trim().is_empty();
        if combined && (data || model) {
            return Err(NcmpError::DmiPluginRegistration(
                "dmiPlugin cannot be combined with dmiDataPlugin or dmiModelPlugin".to_string(),
            ));
        }
        if !combined && !(data && model) {
            return Err(NcmpError::DmiPluginRegistration(
                "either dmiPlugin or both dmiDataPlugin and dmiModelPlugin are required".to_string(),
            ));
        }
        Ok(())
    }

    /// The plugin serving data requests.
    pub fn dmi_data_service_name(&self) -> &str {
        if self.dmi_plugin.trim().is_empty() {
            self.dmi_data_plugin.trim()
        } else {
            self.dmi_plugin.trim()
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Failure codes reported per cm-handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NcmpResponseStatus {
    /// No cm-handle with this id.
    CmHandlesNotFound,
    /// Anything unclassified.
    UnknownError,
    /// The cm-handle is not READY.
    CmHandlesNotReady,
    /// A cm-handle with this id exists.
    CmHandleAlreadyExist,
    /// The id is not a valid name.
    CmHandleInvalidId,
    /// The alternate id is taken.
    AlternateIdAlreadyAssociated,
}

impl NcmpResponseStatus {
    /// Numeric code.
    pub fn code(&self) -> &'static str {
        match self {
            NcmpResponseStatus::CmHandlesNotFound => "100",
            NcmpResponseStatus::UnknownError => "108",
            NcmpResponseStatus::CmHandlesNotReady => "112",
            NcmpResponseStatus::CmHandleAlreadyExist => "117",
            NcmpResponseStatus::CmHandleInvalidId => "118",
            NcmpResponseStatus::AlternateIdAlreadyAssociated => "119",
        }
    }

    /// Default message.
    pub fn message(&self) -> &'static str {
        match self {
            NcmpResponseStatus::CmHandlesNotFound => "cm handle reference(s) not found",
            NcmpResponseStatus::UnknownError => "unknown error",
            NcmpResponseStatus::CmHandlesNotReady => "cm handle(s) not ready",
            NcmpResponseStatus::CmHandleAlreadyExist => "cm-handle already exists",
            NcmpResponseStatus::CmHandleInvalidId => "cm handle reference has an invalid character(s) in id",
            NcmpResponseStatus::AlternateIdAlreadyAssociated => "alternate id already associated",
        }
    }
}

impl fmt::Display for NcmpResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Outcome for one cm-handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Applied.
    Success,
    /// Not applied; see the status code and error text.
    Failure,
}

/// Result of one cm-handle in one registration category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmHandleRegistrationResponse {
    /// Cm-handle id.
    pub cm_handle_id: String,
    /// Outcome.
    pub status: RegistrationStatus,
    /// Failure code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncmp_response_status: Option<NcmpResponseStatus>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl CmHandleRegistrationResponse {
    /// A success.
    pub fn success(cm_handle_id: impl Into<String>) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            status: RegistrationStatus::Success,
            ncmp_response_status: None,
            error_text: None,
        }
    }

    /// A failure with the status's default message.
    pub fn failure(cm_handle_id: impl Into<String>, status: NcmpResponseStatus) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            status: RegistrationStatus::Failure,
            ncmp_response_status: Some(status),
            error_text: Some(status.message().to_string()),
        }
    }

    /// An unclassified failure carrying the error's message.
    pub fn failure_from_error(cm_handle_id: impl Into<String>, error: &NcmpError) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            status: RegistrationStatus::Failure,
            ncmp_response_status: Some(NcmpResponseStatus::UnknownError),
            error_text: Some(error.to_string()),
        }
    }

    /// Successes for every id.
    pub fn successes<S: AsRef<str>>(cm_handle_ids: &[S]) -> Vec<Self> {
        cm_handle_ids.iter().map(|id| Self::success(id.as_ref())).collect()
    }

    /// Failures with one status for every id.
    pub fn failures<S: AsRef<str>>(cm_handle_ids: &[S], status: NcmpResponseStatus) -> Vec<Self> {
        cm_handle_ids
            .iter()
            .map(|id| Self::failure(id.as_ref(), status))
            .collect()
    }

    /// Unclassified failures for every id.
    pub fn failures_from_error<S: AsRef<str>>(cm_handle_ids: &[S], error: &NcmpError) -> Vec<Self> {
        cm_handle_ids
            .iter()
            .map(|id| Self::failure_from_error(id.as_ref(), error))
            .collect()
    }

    /// Returns true for a success.
    pub fn is_success(&self) -> bool {
        self.status == RegistrationStatus::Success
    }
}

/// Responses of one registration, per category.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmiPluginRegistrationResponse {
    /// Outcomes of `created_cm_handles`.
    pub created_cm_handles: Vec<CmHandleRegistrationResponse>,
    /// Outcomes of `updated_cm_handles`.
    pub updated_cm_handles: Vec<CmHandleRegistrationResponse>,
    /// Outcomes of `removed_cm_handles`.
    pub removed_cm_handles: Vec<CmHandleRegistrationResponse>,
    /// Outcomes of `upgraded_cm_handles`.
    pub upgraded_cm_handles: Vec<CmHandleRegistrationResponse>,
}
