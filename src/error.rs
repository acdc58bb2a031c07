use thiserror::Error;

use crate::{estimator::Key, prelude::SV};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Observation record could not be interpreted.
    #[error("malformed observation record (line {0}): {1}")]
    MalformedRecord(usize, String),

    /// The observation stream does not contain a single record.
    #[error("empty observation stream")]
    EmptyStream,

    /// The observation stream could not be read.
    #[error("unreadable observation stream: {0}")]
    UnreadableStream(String),

    /// An epoch must hold one observation at least.
    #[error("epoch {0} has no observation")]
    EmptyEpoch(u32),

    /// Mandatory configuration field is missing or invalid.
    #[error("missing or invalid configuration: {0}")]
    MissingConfiguration(&'static str),

    /// Unknown [OutputPolicy](crate::prelude::OutputPolicy) description.
    #[error("unknown output policy")]
    UnknownOutputPolicy,

    /// Epoch keys must never be revisited once established.
    #[error("epoch key {0} follows key {1}: keys must not decrease")]
    NonIncreasingKey(u32, u32),

    /// A factor refers to a variable that was never inserted
    /// (neither staged nor committed).
    #[error("unknown variable {0}")]
    UnknownVariable(Key),

    /// A factor identifier that is neither staged nor part of
    /// the current epoch.
    #[error("unknown factor #{0}")]
    UnknownFactor(usize),

    /// Attempt to insert a variable twice.
    #[error("variable {0} already exists")]
    DuplicateVariable(Key),

    /// A newly introduced variable must be anchored by a prior
    /// before it gets committed.
    #[error("variable {0} has no prior")]
    MissingPrior(Key),

    /// Factor dimension does not match its variable(s).
    #[error("dimension mismatch on {0}")]
    DimensionMismatch(Key),

    /// A clustering matrix could not be inverted.
    #[error("failed to invert matrix")]
    MatrixInversion,

    /// The information matrix could not be factorized, or the estimation
    /// engine produced non finite values.
    /// This is fatal: relinearizing at the same point would reproduce it.
    #[error("solver diverged (last good epoch key: {last_good_key:?})")]
    SolverDivergence { last_good_key: Option<u32> },

    /// Mixture models must hold at least one component.
    #[error("mixture model cannot be empty")]
    EmptyMixture,

    /// Covariance matrix is not symmetric positive definite.
    #[error("covariance is not positive definite")]
    NonPositiveDefinite,

    /// Residual batch is too small to be clustered.
    #[error("not enough residuals to cluster ({0})")]
    NotEnoughResiduals(usize),

    /// Phase observation referencing a satellite that has no phase arc.
    #[error("no phase arc for {0}")]
    UntrackedSatellite(SV),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::UnreadableStream(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unreadable_stream() {
        let e: Error = std::fs::read_to_string("/non/existing/observations.txt")
            .unwrap_err()
            .into();

        assert!(matches!(e, Error::UnreadableStream(_)));
        assert!(e.to_string().starts_with("unreadable observation stream: "));
        assert_ne!(e, Error::EmptyStream);
    }
}
