#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

// private modules
mod cfg;
mod classifier;
mod clustering;
mod controller;
mod error;
mod estimator;
mod geometry;
mod mixture;
mod observation;
mod output;
mod position;

#[cfg(test)]
mod tests;

// prelude
pub mod prelude {
    pub use crate::cfg::{
        ClusteringOpts, Config, EstimatorOpts, MixtureOpts, OutputOpts, OutputPolicy, Station,
    };
    pub use crate::classifier::{Classification, ResidualClassifier, Verdict};
    pub use crate::clustering::{Cluster, Clustering, DensityEstimator, VariationalDirichletProcess};
    pub use crate::controller::{ArcTracker, ArcUpdate, EpochController, EpochOutcome};
    pub use crate::error::Error;
    pub use crate::estimator::{Estimator, FactorId, Key, NonBiasState, Values};
    pub use crate::geometry::{LineOfSight, ObservationModel, Partials};
    pub use crate::mixture::{
        Divergence, MergeReport, MixtureComponent, MixtureModel, MixtureModelManager, Phase,
        Residual, ResidualBatch,
    };
    pub use crate::observation::{EpochObservations, Observation, ObservationStream};
    pub use crate::output::{OutputLine, RunSummary, Solution};
    pub use crate::position::Position;
    // re-export
    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch, TimeScale};
    pub use nalgebra::{Vector2, Vector3};
}

// pub export
pub use error::Error;
