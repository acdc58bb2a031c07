use std::rc::Rc;

use log::{debug, error, info, warn};
use nalgebra::{Matrix2, Vector2};

use crate::{
    cfg::MixtureOpts,
    classifier::Classification,
    clustering::{Clustering, DensityEstimator, VariationalDirichletProcess},
    error::Error,
    mixture::{MixtureComponent, MixtureModel, Residual, ResidualBatch},
};

/// Current [MixtureModelManager] activity
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Residuals are being accumulated
    #[default]
    Accumulating,
    /// The residual batch is being clustered
    Reclustering,
    /// Candidates are being merged into the global model
    Merging,
}

/// Outcome of one merge pass
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MergeReport {
    /// Candidates merged into an existing component
    pub merged: usize,
    /// Candidates appended as new components
    pub appended: usize,
    /// Components evicted to make room
    pub evicted: usize,
    /// Degenerate candidates that were dropped
    pub rejected: usize,
}

/// [MixtureModelManager] owns the global [MixtureModel], accumulates
/// outlier residuals and periodically reclusters them, merging the
/// identified clusters into the global model.
///
/// The model is shared with observation factors as immutable snapshots:
/// a merge replaces the model as a whole, snapshots previously handed out
/// are never modified.
pub struct MixtureModelManager {
    opts: MixtureOpts,
    model: Rc<MixtureModel>,
    batch: ResidualBatch,
    /// Residuals consumed by the latest reclustering
    previous: Vec<Residual>,
    usage: Vec<u64>,
    phase: Phase,
    estimator: Box<dyn DensityEstimator>,
}

impl std::fmt::Debug for MixtureModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MixtureModelManager")
            .field("model", &self.model)
            .field("batch", &self.batch.len())
            .field("usage", &self.usage)
            .field("phase", &self.phase)
            .finish()
    }
}

impl MixtureModelManager {
    /// Builds a new [MixtureModelManager] with single nominal component
    /// and [VariationalDirichletProcess] clustering.
    pub fn new(opts: &MixtureOpts) -> Result<Self, Error> {
        let estimator = VariationalDirichletProcess::new(opts.clustering.clone());
        Self::with_estimator(opts, Box::new(estimator))
    }

    /// Builds a new [MixtureModelManager] using a custom [DensityEstimator].
    pub fn with_estimator(
        opts: &MixtureOpts,
        estimator: Box<dyn DensityEstimator>,
    ) -> Result<Self, Error> {
        let model = MixtureModel::nominal(opts.sigma_range, opts.sigma_phase)?;
        Ok(Self {
            opts: opts.clone(),
            usage: vec![0; model.len()],
            model: Rc::new(model),
            batch: ResidualBatch::malloc(opts.batch_size),
            previous: Vec::new(),
            phase: Phase::default(),
            estimator,
        })
    }

    /// Current global [MixtureModel]
    pub fn model(&self) -> &MixtureModel {
        &self.model
    }

    /// Shares current [MixtureModel]
    pub fn snapshot(&self) -> Rc<MixtureModel> {
        Rc::clone(&self.model)
    }

    /// Pending residuals
    pub fn batch(&self) -> &ResidualBatch {
        &self.batch
    }

    /// Residuals consumed by the latest reclustering
    pub fn previous_batch(&self) -> &[Residual] {
        &self.previous
    }

    fn consume_batch(&mut self) {
        self.previous = self.batch.residuals().to_vec();
        self.batch.clear();
    }

    /// Number of inliers attributed to each component, since last merge
    pub fn usage(&self) -> &[u64] {
        &self.usage
    }

    /// Current [Phase]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Credit one inlier to `component`
    pub fn record_usage(&mut self, component: usize) {
        if let Some(count) = self.usage.get_mut(component) {
            *count += 1;
        }
    }

    /// Append one [Residual] to the pending batch
    pub fn accumulate(&mut self, residual: Residual) {
        self.batch.push(residual);
    }

    /// Absorbs one [Classification]: inliers are credited to their
    /// winning component, outliers join the pending batch.
    pub fn absorb(&mut self, key: u32, classification: &Classification) {
        for verdict in classification.verdicts.iter() {
            if verdict.outlier {
                self.accumulate(Residual {
                    key,
                    sv: verdict.sv,
                    value: verdict.residual,
                });
            } else {
                self.record_usage(verdict.component);
            }
        }
    }

    /// True once the pending batch reached its nominal size
    pub fn should_recluster(&self) -> bool {
        self.batch.len() >= self.opts.batch_size
    }

    /// Fits the pending batch.
    pub fn recluster(&mut self) -> Result<Clustering, Error> {
        self.phase = Phase::Reclustering;
        let values = self.batch.values();
        let clustering = self.estimator.fit(&values)?;
        debug!(
            "reclustered {} residuals: {} clusters",
            values.len(),
            clustering.clusters.len()
        );
        Ok(clustering)
    }

    /// Moment matching of two weighted Gaussians
    fn moment_match(
        weight_a: f64,
        mean_a: &Vector2<f64>,
        cov_a: &Matrix2<f64>,
        weight_b: f64,
        mean_b: &Vector2<f64>,
        cov_b: &Matrix2<f64>,
    ) -> (f64, Vector2<f64>, Matrix2<f64>) {
        let weight = weight_a + weight_b;
        let (wa, wb) = if weight > 0.0 {
            (weight_a / weight, weight_b / weight)
        } else {
            (0.5, 0.5)
        };
        let mean = mean_a * wa + mean_b * wb;
        let (da, db) = (mean_a - mean, mean_b - mean);
        let cov = (cov_a + da * da.transpose()) * wa + (cov_b + db * db.transpose()) * wb;
        (weight, mean, cov)
    }

    /// Merges `clustering` of the pending batch into the global model,
    /// which is then replaced. Usage counters are folded into the
    /// component weights and reset, the batch is cleared.
    pub fn merge(&mut self, clustering: &Clustering) -> MergeReport {
        self.phase = Phase::Merging;

        let mut report = MergeReport::default();
        let floor = self.opts.covariance_floor;

        let mut components = (*self.model).clone().into_inner();
        for (component, usage) in components.iter_mut().zip(self.usage.iter()) {
            component.weight += *usage as f64;
        }

        let counts = clustering.counts();

        for (index, cluster) in clustering.clusters.iter().enumerate() {
            if counts[index] == 0 {
                continue;
            }

            let origin = clustering
                .first_member(index)
                .and_then(|first| self.batch.residuals().get(first));

            let (key, sv) = match origin {
                Some(residual) => (residual.key, Some(residual.sv)),
                None => (0, None),
            };

            let candidate = match MixtureComponent::regularized(
                key,
                sv,
                counts[index] as f64,
                cluster.mean,
                cluster.covariance,
                floor,
            ) {
                Some(candidate) => candidate,
                None => {
                    warn!(
                        "{} - rejected degenerate cluster (mean={})",
                        key, cluster.mean
                    );
                    report.rejected += 1;
                    continue;
                },
            };

            let mut nearest = (0, f64::INFINITY);
            for (i, component) in components.iter().enumerate() {
                let distance = self.opts.divergence.eval(
                    &candidate.mean,
                    &candidate.covariance,
                    &component.mean,
                    &component.covariance,
                );
                if distance < nearest.1 {
                    nearest = (i, distance);
                }
            }

            if nearest.1 < self.opts.merge_threshold {
                let target = &components[nearest.0];
                let (weight, mean, cov) = Self::moment_match(
                    target.weight,
                    &target.mean,
                    &target.covariance,
                    candidate.weight,
                    &candidate.mean,
                    &candidate.covariance,
                );

                match MixtureComponent::regularized(target.key, target.sv, weight, mean, cov, floor)
                {
                    Some(merged) => {
                        debug!(
                            "{} - cluster merged into component #{} (d={:.3E})",
                            key, nearest.0, nearest.1
                        );
                        components[nearest.0] = merged;
                        report.merged += 1;
                    },
                    None => {
                        warn!("{} - merged covariance is degenerate", key);
                        report.rejected += 1;
                    },
                }
            } else {
                if components.len() >= self.opts.max_components {
                    let mut lightest = (0, f64::INFINITY);
                    for (i, component) in components.iter().enumerate() {
                        if component.weight < lightest.1 {
                            lightest = (i, component.weight);
                        }
                    }
                    let evicted = components.remove(lightest.0);
                    debug!(
                        "{} - evicted component created at {} (weight={})",
                        key, evicted.key, evicted.weight
                    );
                    report.evicted += 1;
                }
                debug!("{} - new component (mean={})", key, candidate.mean);
                components.push(candidate);
                report.appended += 1;
            }
        }

        match MixtureModel::new(components) {
            Ok(model) => {
                self.model = Rc::new(model);
            },
            Err(e) => {
                error!("mixture model update failed: {}", e);
            },
        }

        self.usage = vec![0; self.model.len()];
        self.consume_batch();
        self.phase = Phase::Accumulating;

        info!(
            "mixture model updated: {} components (merged={}, appended={}, evicted={}, rejected={})",
            self.model.len(),
            report.merged,
            report.appended,
            report.evicted,
            report.rejected
        );

        report
    }

    /// Runs one reclustering cycle. A clustering failure is not fatal:
    /// the batch is dropped and the current model is preserved.
    pub fn run_cycle(&mut self) -> Option<MergeReport> {
        match self.recluster() {
            Ok(clustering) => Some(self.merge(&clustering)),
            Err(e) => {
                error!("reclustering failed: {}", e);
                self.consume_batch();
                self.phase = Phase::Accumulating;
                None
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        clustering::Cluster,
        prelude::{Constellation, SV},
    };

    struct FixedClusters(Vec<Cluster>);

    impl DensityEstimator for FixedClusters {
        fn fit(&self, samples: &[Vector2<f64>]) -> Result<Clustering, Error> {
            if self.0.is_empty() {
                return Err(Error::NotEnoughResiduals(samples.len()));
            }
            Ok(Clustering {
                assignments: (0..samples.len()).map(|i| i % self.0.len()).collect(),
                clusters: self.0.clone(),
            })
        }
    }

    fn opts(batch_size: usize, max_components: usize) -> MixtureOpts {
        MixtureOpts {
            batch_size,
            max_components,
            ..Default::default()
        }
    }

    fn residual(key: u32, r: f64, p: f64) -> Residual {
        Residual {
            key,
            sv: SV::new(Constellation::GPS, (key % 32) as u8 + 1),
            value: Vector2::new(r, p),
        }
    }

    fn cluster(r: f64, p: f64) -> Cluster {
        Cluster {
            weight: 1.0,
            mean: Vector2::new(r, p),
            covariance: Matrix2::new(4.0, 0.0, 0.0, 0.04),
        }
    }

    #[test]
    fn batch_threshold() {
        let mut manager = MixtureModelManager::new(&opts(10, 20)).unwrap();
        assert_eq!(manager.phase(), Phase::Accumulating);

        for key in 0..9 {
            manager.accumulate(residual(key, 40.0 + key as f64 * 0.1, 4.0));
            assert!(!manager.should_recluster());
        }
        manager.accumulate(residual(9, 40.5, 4.1));
        assert!(manager.should_recluster());

        manager.record_usage(0);
        let report = manager.run_cycle().unwrap();

        assert!(manager.batch().is_empty());
        assert_eq!(manager.previous_batch().len(), 10);
        assert_eq!(manager.phase(), Phase::Accumulating);
        assert!(manager.model().len() <= 20);
        assert!(report.appended + report.merged >= 1);
        assert!(manager.usage().iter().all(|u| *u == 0));
        assert_eq!(manager.usage().len(), manager.model().len());
    }

    #[test]
    fn merge_respects_capacity() {
        let clusters = (0..5)
            .map(|i| cluster(50.0 * (i + 1) as f64, 5.0 * (i + 1) as f64))
            .collect::<Vec<_>>();
        let mut manager =
            MixtureModelManager::with_estimator(&opts(5, 3), Box::new(FixedClusters(clusters)))
                .unwrap();

        for key in 0..5 {
            manager.accumulate(residual(key, 0.0, 0.0));
        }

        let report = manager.run_cycle().unwrap();
        assert_eq!(report.appended, 5);
        assert_eq!(report.evicted, 3);
        assert_eq!(manager.model().len(), 3);

        for component in manager.model().iter() {
            assert!(component.covariance.cholesky().is_some());
            assert!(component.sv.is_some());
        }
    }

    #[test]
    fn close_candidates_merge() {
        let nominal = Cluster {
            weight: 1.0,
            mean: Vector2::new(0.01, 0.0),
            covariance: Matrix2::new(6.25, 0.0, 0.0, 0.0625),
        };
        let mut manager =
            MixtureModelManager::with_estimator(&opts(4, 20), Box::new(FixedClusters(vec![nominal])))
                .unwrap();

        let snapshot = manager.snapshot();

        for key in 0..4 {
            manager.accumulate(residual(key, 0.0, 0.0));
        }
        manager.record_usage(0);
        manager.record_usage(0);

        let report = manager.run_cycle().unwrap();
        assert_eq!(report.merged, 1);
        assert_eq!(manager.model().len(), 1);

        let component = manager.model().get(0).unwrap();
        assert_eq!(component.weight, 6.0);
        assert!(component.sv.is_none());

        // snapshots are never modified
        assert_eq!(snapshot.get(0).unwrap().weight, 0.0);
    }

    #[test]
    fn failed_clustering_preserves_model() {
        let mut manager =
            MixtureModelManager::with_estimator(&opts(2, 20), Box::new(FixedClusters(vec![])))
                .unwrap();
        let model = manager.model().clone();

        manager.accumulate(residual(0, 30.0, 3.0));
        manager.accumulate(residual(1, 30.0, 3.0));

        assert!(manager.run_cycle().is_none());
        assert!(manager.batch().is_empty());
        assert_eq!(manager.model(), &model);
    }

    #[test]
    fn outliers_are_not_credited() {
        use crate::classifier::ResidualClassifier;

        let mut manager = MixtureModelManager::new(&opts(10, 20)).unwrap();
        let sv = SV::new(Constellation::GPS, 3);
        let classification = ResidualClassifier::new(3.0).classify(
            5,
            &[
                (0, sv, Vector2::new(50.0, 0.0)),
                (1, sv, Vector2::new(0.5, 0.01)),
            ],
            manager.model(),
        );

        manager.absorb(5, &classification);

        assert_eq!(manager.usage(), &[1]);
        assert_eq!(manager.batch().len(), 1);
        assert_eq!(manager.batch().residuals()[0].value, Vector2::new(50.0, 0.0));
    }
}
