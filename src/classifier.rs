use log::debug;
use nalgebra::Vector2;

use crate::{estimator::FactorId, mixture::MixtureModel, prelude::SV};

/// Classification of one observation residual
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    /// Observation factor
    pub id: FactorId,
    /// Observed satellite
    pub sv: SV,
    /// (range, phase) residual [m]
    pub residual: Vector2<f64>,
    /// Index of the component that best explains this residual
    pub component: usize,
    /// (range, phase) z-scores, using the winning component
    pub z: (f64, f64),
    /// True if this residual is an outlier
    pub outlier: bool,
}

/// Classification of one epoch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// One [Verdict] per residual, in input order
    pub verdicts: Vec<Verdict>,
    /// Number of inliers attributed to each mixture component
    pub usage: Vec<u64>,
}

impl Classification {
    /// Outlying [Verdict]s
    pub fn outliers(&self) -> impl Iterator<Item = &Verdict> + '_ {
        self.verdicts.iter().filter(|v| v.outlier)
    }

    /// Factors that should be excluded
    pub fn rejected(&self) -> Vec<FactorId> {
        self.outliers().map(|v| v.id).collect()
    }

    /// True if at least one residual is an outlier
    pub fn has_outliers(&self) -> bool {
        self.verdicts.iter().any(|v| v.outlier)
    }

    /// Number of trusted (inlier) residuals
    pub fn trusted(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.outlier).count()
    }
}

/// [ResidualClassifier] runs a z-test of each raw residual, using the
/// variances of the mixture component that explains it best.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualClassifier {
    threshold: f64,
}

impl ResidualClassifier {
    /// Builds a new [ResidualClassifier]. Residuals further than
    /// `threshold` standard deviations, on either axis, are outliers.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Classifies `residuals`, given as (factor, satellite, residual) tuples,
    /// with respect to `model`. This has no side effect.
    pub fn classify(
        &self,
        key: u32,
        residuals: &[(FactorId, SV, Vector2<f64>)],
        model: &MixtureModel,
    ) -> Classification {
        let mut usage = vec![0; model.len()];
        let mut verdicts = Vec::with_capacity(residuals.len());

        for (id, sv, residual) in residuals.iter() {
            let (component, likelihood) = model.best_match(residual);
            let z = match model.get(component) {
                Some(winner) => winner.z_scores(residual),
                None => (f64::INFINITY, f64::INFINITY),
            };

            let outlier = !(z.0.abs() <= self.threshold && z.1.abs() <= self.threshold);

            if outlier {
                debug!(
                    "{} ({}) - outlier residual ({:.3}, {:.3}): z=({:.2}, {:.2}) component #{}",
                    key, sv, residual[0], residual[1], z.0, z.1, component
                );
            } else {
                debug!(
                    "{} ({}) - residual ({:.3}, {:.3}): component #{} (l={:.3E})",
                    key, sv, residual[0], residual[1], component, likelihood
                );
                if let Some(count) = usage.get_mut(component) {
                    *count += 1;
                }
            }

            verdicts.push(Verdict {
                id: *id,
                sv: *sv,
                residual: *residual,
                component,
                z,
                outlier,
            });
        }

        Classification { verdicts, usage }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        mixture::MixtureComponent,
        prelude::{Constellation, SV},
    };
    use nalgebra::Matrix2;
    use rstest::*;

    fn sv(prn: u8) -> SV {
        SV::new(Constellation::GPS, prn)
    }

    #[rstest]
    #[case(Vector2::new(0.0, 0.0), false)]
    #[case(Vector2::new(7.4, 0.1), false)]
    #[case(Vector2::new(7.6, 0.1), true)]
    #[case(Vector2::new(-7.6, 0.1), true)]
    #[case(Vector2::new(0.0, 0.74), false)]
    #[case(Vector2::new(0.0, -0.76), true)]
    #[case(Vector2::new(50.0, 0.0), true)]
    fn nominal_z_test(#[case] residual: Vector2<f64>, #[case] outlier: bool) {
        let model = MixtureModel::nominal(2.5, 0.25).unwrap();
        let classifier = ResidualClassifier::new(3.0);
        let classification = classifier.classify(0, &[(0, sv(1), residual)], &model);
        assert_eq!(classification.verdicts[0].outlier, outlier);
        assert_eq!(classification.has_outliers(), outlier);
        // outliers are not credited to any component
        let credited = if outlier { 0 } else { 1 };
        assert_eq!(classification.usage, vec![credited]);
    }

    #[test]
    fn winner_defines_scores() {
        let nominal = MixtureComponent::isotropic(2.5, 0.25).unwrap();
        let multipath = MixtureComponent::new(
            10,
            Some(sv(5)),
            100.0,
            Vector2::new(40.0, 4.0),
            Matrix2::new(25.0, 0.0, 0.0, 0.25),
        )
        .unwrap();
        let model = MixtureModel::new(vec![nominal, multipath]).unwrap();
        let classifier = ResidualClassifier::new(3.0);

        let residuals = [
            (0, sv(1), Vector2::new(0.5, 0.01)),
            (1, sv(2), Vector2::new(9.0, 0.9)),
            (2, sv(3), Vector2::new(45.0, 4.5)),
            (3, sv(4), Vector2::new(-80.0, 0.0)),
        ];

        let classification = classifier.classify(1, &residuals, &model);
        assert_eq!(classification.verdicts[0].component, 0);
        assert!(!classification.verdicts[0].outlier);

        // beyond nominal noise, within the wide component's variances
        assert_eq!(classification.verdicts[1].component, 1);
        assert!(!classification.verdicts[1].outlier);

        // close to the wide component's mean, still far from zero:
        // z-scores use the raw residual
        let verdict = &classification.verdicts[2];
        assert_eq!(verdict.component, 1);
        assert!((verdict.z.0 - 9.0).abs() < 1.0E-9);
        assert!((verdict.z.1 - 9.0).abs() < 1.0E-9);
        assert!(verdict.outlier);

        assert!(classification.verdicts[3].outlier);
        assert_eq!(classification.rejected(), vec![2, 3]);
        assert_eq!(classification.trusted(), 2);
        assert_eq!(classification.usage, vec![1, 1]);

        // deterministic
        assert_eq!(classification, classifier.classify(1, &residuals, &model));
    }
}
