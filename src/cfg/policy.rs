use crate::prelude::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Defines which solution of an epoch is emitted
/// when outliers were rejected.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutputPolicy {
    /// Classify the first solution, exclude the outliers, re-commit,
    /// then emit the re-committed solution. When too few observations
    /// remain after exclusion, the first solution is emitted.
    #[default]
    PostFit,

    /// Emit the first solution as soon as it is committed,
    /// then classify and re-commit. The emitted solution
    /// still contains the outliers' contribution, the state carried
    /// to the next epoch does not.
    PreFit,
}

impl std::fmt::Display for OutputPolicy {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::PostFit => write!(fmt, "post-fit"),
            Self::PreFit => write!(fmt, "pre-fit"),
        }
    }
}

impl std::str::FromStr for OutputPolicy {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postfit" | "post-fit" => Ok(Self::PostFit),
            "prefit" | "pre-fit" => Ok(Self::PreFit),
            _ => Err(Error::UnknownOutputPolicy),
        }
    }
}
