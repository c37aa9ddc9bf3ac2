//! Types for the cm-handle query services.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Public properties must all match.
pub const HAS_ALL_PROPERTIES: &str = "hasAllProperties";
/// Module set must contain all named modules.
pub const HAS_ALL_MODULES: &str = "hasAllModules";
/// Handle must be selected by a CPS path.
pub const CM_HANDLE_WITH_CPS_PATH: &str = "cmHandleWithCpsPath";
/// Effective trust level must equal the given level.
pub const CM_HANDLE_WITH_TRUST_LEVEL: &str = "cmHandleWithTrustLevel";
/// DMI (additional) properties must all match.
pub const HAS_ALL_ADDITIONAL_PROPERTIES: &str = "hasAllAdditionalProperties";
/// Handle must be served by the given DMI plugin.
pub const CM_HANDLE_WITH_DMI_PLUGIN: &str = "cmHandleWithDmiPlugin";

/// Conditions accepted by the cm-handle search.
pub const CM_HANDLE_QUERY_CONDITIONS: [&str; 4] = [
    HAS_ALL_PROPERTIES,
    HAS_ALL_MODULES,
    CM_HANDLE_WITH_CPS_PATH,
    CM_HANDLE_WITH_TRUST_LEVEL,
];

/// Conditions accepted by the inventory search.
pub const INVENTORY_QUERY_CONDITIONS: [&str; 4] = [
    HAS_ALL_PROPERTIES,
    HAS_ALL_ADDITIONAL_PROPERTIES,
    CM_HANDLE_WITH_CPS_PATH,
    CM_HANDLE_WITH_DMI_PLUGIN,
];

/// One condition and its parameters; each parameter is a single name/value pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConditionProperties {
    /// One of the condition name constants.
    pub condition_name: String,
    /// Name/value pairs, one per map.
    pub condition_parameters: Vec<BTreeMap<String, String>>,
}

impl ConditionProperties {
    /// Creates a condition from `(name, value)` parameters.
    pub fn new<N, V>(condition_name: &str, parameters: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            condition_name: condition_name.to_string(),
            condition_parameters: parameters
                .into_iter()
                .map(|(name, value)| BTreeMap::from([(name.into(), value.into())]))
                .collect(),
        }
    }
}

/// A cm-handle search request. The conditions are AND-combined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CmHandleQueryServiceParameters {
    /// The conditions; empty selects every cm-handle.
    pub cm_handle_query_parameters: Vec<ConditionProperties>,
}

impl CmHandleQueryServiceParameters {
    /// Creates a request from its conditions.
    pub fn new(conditions: Vec<ConditionProperties>) -> Self {
        Self {
            cm_handle_query_parameters: conditions,
        }
    }

    /// Parameters of the first condition named `condition_name`.
    pub fn conditions(&self, condition_name: &str) -> &[BTreeMap<String, String>] {
        self.cm_handle_query_parameters
            .iter()
            .find(|condition| condition.condition_name == condition_name)
            .map(|condition| condition.condition_parameters.as_slice())
            .unwrap_or_default()
    }

    /// Parameters of `condition_name` merged into one map.
    pub fn property_pairs(&self, condition_name: &str) -> BTreeMap<String, String> {
        self.conditions(condition_name)
            .iter()
            .flat_map(|parameter| parameter.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }
}

/// Outcome of one sub-query.
///
/// `NoFilter` means the condition was not requested and constrains nothing;
/// it is distinct from a requested condition matching no cm-handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// Condition not requested.
    NoFilter,
    /// References selected by the condition.
    Matches(BTreeSet<String>),
}

impl QueryResult {
    /// Intersects two results; `NoFilter` is the identity.
    ///
    /// ```rust
    /// use std::collections::BTreeSet;
    /// use cps_ncmp::QueryResult;
    ///
    /// let a = QueryResult::Matches(BTreeSet::from(["ch-1".to_string(), "ch-2".to_string()]));
    /// let b = QueryResult::Matches(BTreeSet::from(["ch-2".to_string()]));
    /// assert_eq!(a.intersect(b.clone()), b);
    /// assert_eq!(QueryResult::NoFilter.intersect(b.clone()), b);
    /// ```
    pub fn intersect(self, other: QueryResult) -> QueryResult {
        match (self, other) {
            (QueryResult::NoFilter, other) => other,
            (this, QueryResult::NoFilter) => this,
            (QueryResult::Matches(mut this), QueryResult::Matches(other)) => {
                this.retain(|reference| other.contains(reference));
                QueryResult::Matches(this)
            }
        }
    }

    /// Returns true for a requested condition that matched nothing.
    pub fn is_empty_match(&self) -> bool {
        matches!(self, QueryResult::Matches(references) if references.is_empty())
    }
}

impl FromIterator<String> for QueryResult {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        QueryResult::Matches(iter.into_iter().collect())
    }
}
