//! Density estimation of residual batches
use nalgebra::{Matrix2, Vector2};

use crate::error::Error;

mod vdp;
pub use vdp::VariationalDirichletProcess;

/// Weighted Gaussian cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Mixing weight, within [0, 1]
    pub weight: f64,
    /// Mean
    pub mean: Vector2<f64>,
    /// Covariance
    pub covariance: Matrix2<f64>,
}

/// Result of a [DensityEstimator] fit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    /// Index of the [Cluster] each sample was assigned to
    pub assignments: Vec<usize>,
    /// Identified [Cluster]s
    pub clusters: Vec<Cluster>,
}

impl Clustering {
    /// Number of samples assigned to each [Cluster]
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.clusters.len()];
        for assignment in self.assignments.iter() {
            if let Some(count) = counts.get_mut(*assignment) {
                *count += 1;
            }
        }
        counts
    }

    /// Index of the first sample assigned to `cluster`
    pub fn first_member(&self, cluster: usize) -> Option<usize> {
        self.assignments.iter().position(|a| *a == cluster)
    }
}

/// [DensityEstimator] fits a Gaussian mixture to an unlabeled 2D batch.
/// The number of clusters is inferred from the data, implementations
/// must cope with tiny batches and tiny clusters.
pub trait DensityEstimator {
    fn fit(&self, samples: &[Vector2<f64>]) -> Result<Clustering, Error>;
}
