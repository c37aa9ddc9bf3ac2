//! Error types for CPS path parsing.

use thiserror::Error;

/// Errors that can occur while parsing a CPS path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpsPathError {
    /// Syntax error at a specific position in the input.
    #[error("failed to parse cps path at position {position}: {message}")]
    PathParsing {
        /// Position in the input where the error occurred.
        position: usize,
        /// Description of the error.
        message: String,
    },

    /// The path does not start with one or two slashes.
    #[error("CPS path can only start with one or two slashes (/)")]
    IncorrectPrefix,

    /// Empty input provided.
    #[error("empty cps path")]
    EmptyPath,

    /// A condition that is syntactically valid but not supported where it appears.
    #[error("unsupported condition: {0}")]
    UnsupportedCondition(String),
}

/// Result type for CPS path operations.
pub type CpsPathResult<T> = std::result::Result<T, CpsPathError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse_error() {
        let err = CpsPathError::PathParsing {
            position: 4,
            message: "unexpected input at: '['".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to parse cps path at position 4: unexpected input at: '['"
        );
    }

    #[test]
    fn test_error_display_incorrect_prefix() {
        assert_eq!(
            CpsPathError::IncorrectPrefix.to_string(),
            "CPS path can only start with one or two slashes (/)"
        );
    }
}
