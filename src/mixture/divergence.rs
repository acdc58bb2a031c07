#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use nalgebra::{Matrix2, Vector2};

/// Similarity measure between two Gaussians, used to decide
/// whether a candidate cluster merges into an existing component.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Divergence {
    /// Bhattacharyya distance
    #[default]
    Bhattacharyya,
    /// Symmetric Kullback-Leibler divergence, KL(a|b) + KL(b|a)
    SymmetricKl,
}

impl Divergence {
    /// Evaluates the distance between N(`mean_a`, `cov_a`) and N(`mean_b`, `cov_b`).
    /// Returns +∞ when a covariance cannot be inverted.
    pub fn eval(
        &self,
        mean_a: &Vector2<f64>,
        cov_a: &Matrix2<f64>,
        mean_b: &Vector2<f64>,
        cov_b: &Matrix2<f64>,
    ) -> f64 {
        let d = mean_a - mean_b;
        match self {
            Self::Bhattacharyya => {
                let cov = (cov_a + cov_b) * 0.5;
                let inv = match cov.try_inverse() {
                    Some(inv) => inv,
                    None => return f64::INFINITY,
                };
                let (det, det_a, det_b) =
                    (cov.determinant(), cov_a.determinant(), cov_b.determinant());
                if det <= 0.0 || det_a <= 0.0 || det_b <= 0.0 {
                    return f64::INFINITY;
                }
                let quad = (d.transpose() * inv * d)[(0, 0)];
                quad / 8.0 + 0.5 * (det / (det_a * det_b).sqrt()).ln()
            },
            Self::SymmetricKl => {
                let (inv_a, inv_b) = match (cov_a.try_inverse(), cov_b.try_inverse()) {
                    (Some(inv_a), Some(inv_b)) => (inv_a, inv_b),
                    _ => return f64::INFINITY,
                };
                let traces = (inv_b * cov_a).trace() + (inv_a * cov_b).trace();
                let quad = (d.transpose() * (inv_a + inv_b) * d)[(0, 0)];
                0.5 * (traces + quad) - 2.0
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::Divergence;
    use nalgebra::{Matrix2, Vector2};

    #[test]
    fn identical_gaussians() {
        let mean = Vector2::new(1.0, -0.5);
        let cov = Matrix2::new(4.0, 0.5, 0.5, 1.0);
        for divergence in [Divergence::Bhattacharyya, Divergence::SymmetricKl] {
            let d = divergence.eval(&mean, &cov, &mean, &cov);
            assert!(d.abs() < 1.0E-12, "{:?}: {}", divergence, d);
        }
    }

    #[test]
    fn separation_increases_distance() {
        let cov = Matrix2::identity();
        let origin = Vector2::zeros();
        for divergence in [Divergence::Bhattacharyya, Divergence::SymmetricKl] {
            let near = divergence.eval(&origin, &cov, &Vector2::new(0.5, 0.0), &cov);
            let far = divergence.eval(&origin, &cov, &Vector2::new(5.0, 0.0), &cov);
            assert!(near > 0.0);
            assert!(far > near);
            // symmetric
            let rev = divergence.eval(&Vector2::new(5.0, 0.0), &cov, &origin, &cov);
            assert!((far - rev).abs() < 1.0E-12);
        }
        // closed forms for unit covariances
        let d = Divergence::Bhattacharyya.eval(&origin, &cov, &Vector2::new(2.0, 0.0), &cov);
        assert!((d - 0.5).abs() < 1.0E-12);
        let d = Divergence::SymmetricKl.eval(&origin, &cov, &Vector2::new(2.0, 0.0), &cov);
        assert!((d - 4.0).abs() < 1.0E-12);
    }
}
