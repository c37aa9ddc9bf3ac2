//! Name and paging validation.

use crate::error::{CpsError, CpsResult};

const INVALID_CHARACTERS: &str = "!\"#$%&'()*+,./\\:;<=>?@[]^`{|}~";

/// Validates names of dataspaces, schema sets, anchors and cm-handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpsValidator;

impl CpsValidator {
    /// Validates every name; fails on the first invalid one.
    ///
    /// ```rust
    /// use cps_store::CpsValidator;
    ///
    /// assert!(CpsValidator.validate_names(&["my-anchor", "ch_1"]).is_ok());
    /// assert!(CpsValidator.validate_names(&["bad name"]).is_err());
    /// ```
    pub fn validate_names<S: AsRef<str>>(&self, names: &[S]) -> CpsResult<()> {
        names.iter().try_for_each(|name| self.validate_name(name.as_ref()))
    }

    /// Validates a single name.
    pub fn validate_name(&self, name: &str) -> CpsResult<()> {
        if name.trim().is_empty() {
            return Err(CpsError::data_validation(
                "Name or ID Cannot be Empty",
                "name is blank",
            ));
        }
        if let Some(c) = name
            .chars()
            .find(|c| c.is_whitespace() || INVALID_CHARACTERS.contains(*c))
        {
            return Err(CpsError::data_validation(
                format!("{name} is an invalid name or ID"),
                format!("{name} contains an invalid character '{c}'"),
            ));
        }
        Ok(())
    }

    /// Validates paging parameters: both must be non-negative.
    pub fn validate_page(&self, page_index: i64, page_size: i64) -> CpsResult<()> {
        if page_index < 0 || page_size < 0 {
            return Err(CpsError::data_validation(
                "Invalid page parameters",
                format!("page index {page_index} and page size {page_size} must not be negative"),
            ));
        }
        Ok(())
    }
}
