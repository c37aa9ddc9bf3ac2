//! Cm-handle records: the persisted projection and the service-facing view.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use cps_store::DataNode;
use serde::{Deserialize, Serialize};

use crate::error::{NcmpError, NcmpResult};
use crate::models::composite_state::CompositeState;
use crate::models::registration::DmiPluginRegistration;

// ============================================================================
// TrustLevel
// ============================================================================

/// How far a cm-handle or DMI plugin is trusted. Ordered `None < Incomplete < Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustLevel {
    /// Not trusted.
    None,
    /// Partially trusted.
    Incomplete,
    /// Fully trusted.
    Complete,
}

impl TrustLevel {
    /// The effective level of two axes: the lower one.
    ///
    /// ```rust
    /// use cps_ncmp::TrustLevel;
    ///
    /// assert_eq!(TrustLevel::Complete.effective(TrustLevel::Incomplete), TrustLevel::Incomplete);
    /// ```
    pub fn effective(self, other: TrustLevel) -> TrustLevel {
        self.min(other)
    }

    /// The spelling used in queries and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::None => "NONE",
            TrustLevel::Incomplete => "INCOMPLETE",
            TrustLevel::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustLevel {
    type Err = NcmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(TrustLevel::None),
            "INCOMPLETE" => Ok(TrustLevel::Incomplete),
            "COMPLETE" => Ok(TrustLevel::Complete),
            _ => Err(NcmpError::InvalidTrustLevel(s.to_string())),
        }
    }
}

// ============================================================================
// YangModelCmHandle
// ============================================================================

/// A name/value pair of additional or public properties.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Property {
    /// Property name (the list key).
    pub name: String,
    /// Property value.
    #[serde(default)]
    pub value: String,
}

impl Property {
    /// Creates a property.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Which DMI service a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredDmiService {
    /// Data operations.
    Data,
    /// Module (model) operations.
    Model,
}

/// A cm-handle as persisted in the registry, serialized with the registry's
/// field names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct YangModelCmHandle {
    /// Cm-handle id (the list key).
    pub id: String,
    /// Combined DMI plugin.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dmi_service_name: String,
    /// DMI data plugin.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dmi_data_service_name: String,
    /// DMI model plugin.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dmi_model_service_name: String,
    /// Tag of the module set.
    pub module_set_tag: String,
    /// Alternate id, unique across cm-handles when not blank.
    pub alternate_id: String,
    /// Producer of the handle's data; set once.
    pub data_producer_identifier: String,
    /// Lifecycle state; None for a handle that was never persisted.
    #[serde(rename = "state", skip_serializing_if = "Option::is_none")]
    pub composite_state: Option<CompositeState>,
    /// Properties forwarded to the DMI plugin.
    #[serde(rename = "additional-properties", skip_serializing_if = "Vec::is_empty")]
    pub dmi_properties: Vec<Property>,
    /// Properties visible to clients.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub public_properties: Vec<Property>,
}

impl YangModelCmHandle {
    /// Builds the record for a handle being registered through `registration`.
    pub fn from_registration(registration: &DmiPluginRegistration, cm_handle: &NcmpServiceCmHandle) -> Self {
        Self {
            id: cm_handle.cm_handle_id.clone(),
            dmi_service_name: registration.dmi_plugin.trim().to_string(),
            dmi_data_service_name: registration.dmi_data_plugin.trim().to_string(),
            dmi_model_service_name: registration.dmi_model_plugin.trim().to_string(),
            module_set_tag: cm_handle.module_set_tag.trim().to_string(),
            alternate_id: cm_handle.alternate_id.trim().to_string(),
            data_producer_identifier: cm_handle.data_producer_identifier.trim().to_string(),
            composite_state: cm_handle.composite_state.clone(),
            dmi_properties: to_properties(&cm_handle.dmi_properties),
            public_properties: to_properties(&cm_handle.public_properties),
        }
    }

    /// Reads a record from its `cm-handles` list element.
    pub fn from_data_node(node: &DataNode) -> NcmpResult<Self> {
        Ok(serde_json::from_value(node.to_json_value())?)
    }

    /// The plugin serving `service`: the combined plugin when set, otherwise
    /// the dedicated one.
    pub fn resolve_dmi_service_name(&self, service: RequiredDmiService) -> &str {
        if !self.dmi_service_name.trim().is_empty() {
            return &self.dmi_service_name;
        }
        match service {
            RequiredDmiService::Data => &self.dmi_data_service_name,
            RequiredDmiService::Model => &self.dmi_model_service_name,
        }
    }

    /// The current lifecycle state, if any.
    pub fn cm_handle_state(&self) -> Option<crate::models::CmHandleState> {
        self.composite_state.as_ref().map(|state| state.cm_handle_state)
    }

    /// Converts to the service-facing view. Trust levels are left unset.
    pub fn to_ncmp_service_cm_handle(&self) -> NcmpServiceCmHandle {
        NcmpServiceCmHandle {
            cm_handle_id: self.id.clone(),
            dmi_properties: from_properties(&self.dmi_properties),
            public_properties: from_properties(&self.public_properties),
            module_set_tag: self.module_set_tag.clone(),
            alternate_id: self.alternate_id.clone(),
            data_producer_identifier: self.data_producer_identifier.clone(),
            registration_trust_level: None,
            current_trust_level: None,
            composite_state: self.composite_state.clone(),
            dmi_service_name: self.dmi_service_name.clone(),
            dmi_data_service_name: self.dmi_data_service_name.clone(),
            dmi_model_service_name: self.dmi_model_service_name.clone(),
        }
    }
}

fn to_properties(properties: &BTreeMap<String, Option<String>>) -> Vec<Property> {
    properties
        .iter()
        .filter_map(|(name, value)| value.as_ref().map(|value| Property::new(name, value)))
        .collect()
}

fn from_properties(properties: &[Property]) -> BTreeMap<String, Option<String>> {
    properties
        .iter()
        .map(|property| (property.name.clone(), Some(property.value.clone())))
        .collect()
}

// ============================================================================
// NcmpServiceCmHandle
// ============================================================================

/// A cm-handle as received in registrations and returned from queries.
///
/// In an update, a property mapped to `None` is removed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NcmpServiceCmHandle {
    /// Cm-handle id.
    #[serde(rename = "cmHandle")]
    pub cm_handle_id: String,
    /// Additional properties.
    #[serde(rename = "cmHandleProperties")]
    pub dmi_properties: BTreeMap<String, Option<String>>,
    /// Public properties.
    #[serde(rename = "publicCmHandleProperties")]
    pub public_properties: BTreeMap<String, Option<String>>,
    /// Tag of the module set.
    pub module_set_tag: String,
    /// Alternate id.
    pub alternate_id: String,
    /// Producer of the handle's data.
    pub data_producer_identifier: String,
    /// Trust level given at registration.
    #[serde(rename = "trustLevel", skip_serializing_if = "Option::is_none")]
    pub registration_trust_level: Option<TrustLevel>,
    /// Effective trust level, filled in by queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_trust_level: Option<TrustLevel>,
    /// Lifecycle state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_state: Option<CompositeState>,
    /// Combined DMI plugin.
    pub dmi_service_name: String,
    /// DMI data plugin.
    pub dmi_data_service_name: String,
    /// DMI model plugin.
    pub dmi_model_service_name: String,
}

impl NcmpServiceCmHandle {
    /// A handle with only an id.
    pub fn new(cm_handle_id: impl Into<String>) -> Self {
        Self {
            cm_handle_id: cm_handle_id.into(),
            ..Self::default()
        }
    }

    /// Sets the alternate id.
    pub fn with_alternate_id(mut self, alternate_id: impl Into<String>) -> Self {
        self.alternate_id = alternate_id.into();
        self
    }

    /// Sets the module set tag.
    pub fn with_module_set_tag(mut self, tag: impl Into<String>) -> Self {
        self.module_set_tag = tag.into();
        self
    }

    /// Sets the data producer identifier.
    pub fn with_data_producer_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.data_producer_identifier = identifier.into();
        self
    }

    /// Sets the trust level given at registration.
    pub fn with_registration_trust_level(mut self, level: TrustLevel) -> Self {
        self.registration_trust_level = Some(level);
        self
    }

    /// Adds (or, with `None`, marks for removal) an additional property.
    pub fn with_dmi_property(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.dmi_properties.insert(name.into(), value.map(str::to_string));
        self
    }

    /// Adds (or, with `None`, marks for removal) a public property.
    pub fn with_public_property(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.public_properties.insert(name.into(), value.map(str::to_string));
        self
    }

    /// The plugin serving data requests.
    pub fn dmi_data_service(&self) -> &str {
        if self.dmi_service_name.trim().is_empty() {
            &self.dmi_data_service_name
        } else {
            &self.dmi_service_name
        }
    }
}
