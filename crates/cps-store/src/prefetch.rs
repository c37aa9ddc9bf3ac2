//! How many generations of descendants to fetch with a node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CpsError;

/// Depth of descendants to include: `-1` for all, `0` for none, `n` for `n`
/// generations.
///
/// # Example
///
/// ```rust
/// use cps_store::FetchDescendantsOption;
///
/// let option: FetchDescendantsOption = "2".parse().unwrap();
/// assert!(option.has_next());
/// assert_eq!(option.next(), FetchDescendantsOption::DIRECT_CHILDREN_ONLY);
/// assert!(!FetchDescendantsOption::OMIT_DESCENDANTS.has_next());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct FetchDescendantsOption {
    depth: i32,
}

impl FetchDescendantsOption {
    /// Only the node itself.
    pub const OMIT_DESCENDANTS: Self = Self { depth: 0 };
    /// The node and its children.
    pub const DIRECT_CHILDREN_ONLY: Self = Self { depth: 1 };
    /// The node and its whole subtree.
    pub const INCLUDE_ALL_DESCENDANTS: Self = Self { depth: -1 };

    /// Creates an option for a depth; depths below -1 are rejected.
    pub fn new(depth: i32) -> Result<Self, CpsError> {
        if depth < -1 {
            return Err(CpsError::data_validation(
                "Invalid descendants depth",
                format!("depth {depth} must be -1 (all), 0 or a positive number"),
            ));
        }
        Ok(Self { depth })
    }

    /// The depth; -1 means unlimited.
    pub fn depth(&self) -> i32 {
        self.depth
    }

    /// Returns true if at least one more generation is included.
    pub fn has_next(&self) -> bool {
        self.depth != 0
    }

    /// The option to apply one generation further down.
    pub fn next(&self) -> Self {
        match self.depth {
            -1 => *self,
            0 => *self,
            n => Self { depth: n - 1 },
        }
    }

    /// Returns true if `generation` (1 = children) is within range.
    pub fn includes_generation(&self, generation: usize) -> bool {
        self.depth == -1 || generation <= self.depth as usize
    }
}

impl Default for FetchDescendantsOption {
    fn default() -> Self {
        Self::OMIT_DESCENDANTS
    }
}

impl fmt::Display for FetchDescendantsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.depth {
            -1 => f.write_str("all"),
            0 => f.write_str("none"),
            n => write!(f, "{n}"),
        }
    }
}

impl FromStr for FetchDescendantsOption {
    type Err = CpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "0" => Ok(Self::OMIT_DESCENDANTS),
            "all" | "-1" => Ok(Self::INCLUDE_ALL_DESCENDANTS),
            "direct" | "1" => Ok(Self::DIRECT_CHILDREN_ONLY),
            other => other
                .parse::<i32>()
                .map_err(|_| {
                    CpsError::data_validation(
                        "Invalid descendants option",
                        format!("'{s}' is not 'none', 'all', 'direct' or a number"),
                    )
                })
                .and_then(Self::new),
        }
    }
}

impl TryFrom<i32> for FetchDescendantsOption {
    type Error = CpsError;

    fn try_from(depth: i32) -> Result<Self, Self::Error> {
        Self::new(depth)
    }
}

impl From<FetchDescendantsOption> for i32 {
    fn from(option: FetchDescendantsOption) -> Self {
        option.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(FetchDescendantsOption::OMIT_DESCENDANTS.depth(), 0);
        assert_eq!(FetchDescendantsOption::DIRECT_CHILDREN_ONLY.depth(), 1);
        assert_eq!(FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS.depth(), -1);
    }

    #[test]
    fn test_next_counts_down_to_zero() {
        let option = FetchDescendantsOption::new(2).unwrap();
        assert_eq!(option.next().depth(), 1);
        assert_eq!(option.next().next().depth(), 0);
        assert!(!option.next().next().has_next());
        assert_eq!(FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS.next().depth(), -1);
    }

    #[test]
    fn test_includes_generation() {
        let option = FetchDescendantsOption::new(2).unwrap();
        assert!(option.includes_generation(2));
        assert!(!option.includes_generation(3));
        assert!(FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS.includes_generation(1000));
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "".parse::<FetchDescendantsOption>().unwrap(),
            FetchDescendantsOption::OMIT_DESCENDANTS
        );
        assert_eq!(
            "ALL".parse::<FetchDescendantsOption>().unwrap(),
            FetchDescendantsOption::INCLUDE_ALL_DESCENDANTS
        );
        assert_eq!(
            "direct".parse::<FetchDescendantsOption>().unwrap(),
            FetchDescendantsOption::DIRECT_CHILDREN_ONLY
        );
        assert_eq!("5".parse::<FetchDescendantsOption>().unwrap().depth(), 5);
        assert!("-2".parse::<FetchDescendantsOption>().is_err());
        assert!("deep".parse::<FetchDescendantsOption>().is_err());
    }

    #[test]
    fn test_serde_as_integer() {
        let option: FetchDescendantsOption = serde_json::from_str("3").unwrap();
        assert_eq!(option.depth(), 3);
        assert_eq!(serde_json::to_string(&option).unwrap(), "3");
        assert!(serde_json::from_str::<FetchDescendantsOption>("-5").is_err());
    }
}
