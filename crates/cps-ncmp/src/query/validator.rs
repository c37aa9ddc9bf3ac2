//! Shape checks for cm-handle query parameters.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{NcmpError, NcmpResult};
use crate::query::types::CmHandleQueryServiceParameters;

const INVALID_QUERY_PARAMETER: &str = "Invalid Query Parameter.";

/// Rejects malformed query parameters with a data validation error.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmHandleQueryParametersValidator;

impl CmHandleQueryParametersValidator {
    /// Checks condition names against `valid_condition_names` and the shape
    /// of every condition parameter.
    pub fn validate_cm_handle_query_parameters(
        &self,
        parameters: &CmHandleQueryServiceParameters,
        valid_condition_names: &[&str],
    ) -> NcmpResult<()> {
        for condition in &parameters.cm_handle_query_parameters {
            if !valid_condition_names.contains(&condition.condition_name.as_str()) {
                return Err(invalid(format!(
                    "Wrong 'conditionName': {} - please supply a valid name.",
                    condition.condition_name
                )));
            }
            if condition.condition_parameters.is_empty() {
                return Err(invalid(
                    "Empty 'conditionsParameters' - please supply a valid condition parameter.",
                ));
            }
            for parameter in &condition.condition_parameters {
                validate_condition_parameter(parameter)?;
            }
        }
        Ok(())
    }

    /// A module condition needs a non-empty `moduleName`.
    pub fn validate_module_name_condition_properties(&self, property: &BTreeMap<String, String>) -> NcmpResult<()> {
        match property.get("moduleName") {
            Some(module_name) if !module_name.is_empty() => Ok(()),
            _ => Err(invalid(
                "Wrong module condition property. - please supply a valid condition property.",
            )),
        }
    }

    /// Checks a CPS path condition.
    ///
    /// Returns `false` for a path into additional properties, which are
    /// private and never queryable this way.
    pub fn validate_cps_path_condition_properties(&self, property: &BTreeMap<String, String>) -> NcmpResult<bool> {
        if property.is_empty() {
            return Ok(true);
        }
        if property.len() > 1 {
            return Err(invalid("Only one condition property is allowed for the CPS path query."));
        }
        let Some(cps_path) = property.get("cpsPath") else {
            return Err(invalid(
                "Wrong CPS path condition property. - expecting \"cpsPath\" as the condition property.",
            ));
        };
        if cps_path.trim().is_empty() {
            return Err(invalid("Wrong CPS path. - please supply a valid CPS path."));
        }
        if cps_path.contains("/additional-properties") {
            debug!(cps_path, "private metadata cannot be queried, nothing to return");
            return Ok(false);
        }
        Ok(true)
    }
}

fn validate_condition_parameter(parameter: &BTreeMap<String, String>) -> NcmpResult<()> {
    if parameter.is_empty() {
        return Err(invalid(
            "Empty 'conditionsParameter' - please supply a valid condition parameter.",
        ));
    }
    if parameter.len() > 1 {
        return Err(invalid(
            "Too many names in one 'conditionsParameter' - please supply one name in one condition parameter.",
        ));
    }
    if parameter.keys().any(|name| name.is_empty()) {
        return Err(invalid("Missing 'conditionsParameterName' - please supply a valid name."));
    }
    Ok(())
}

fn invalid(details: impl Into<String>) -> NcmpError {
    NcmpError::data_validation(INVALID_QUERY_PARAMETER, details)
}
