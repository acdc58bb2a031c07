//! Gaussian mixture noise model
use std::f64::consts::PI;

use log::warn;
use nalgebra::{Matrix2, Vector2};

use crate::{error::Error, prelude::SV};

mod batch;
mod divergence;
mod manager;

pub use batch::{Residual, ResidualBatch};
pub use divergence::Divergence;
pub use manager::{MergeReport, MixtureModelManager, Phase};

/// One weighted 2D Gaussian of the (range, phase) residual space.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureComponent {
    /// Epoch key at which this component was created
    pub key: u32,
    /// Satellite that contributed the first sample of this component,
    /// None for components created by configuration.
    pub sv: Option<SV>,
    /// Number of samples this component explains
    pub weight: f64,
    /// Mean (range, phase) [m]
    pub mean: Vector2<f64>,
    /// Symmetric positive definite covariance [m²]
    pub covariance: Matrix2<f64>,
    /// Σ⁻¹
    inverse: Matrix2<f64>,
    /// L⁻¹ where Σ = L Lᵀ
    sqrt_information: Matrix2<f64>,
    /// |Σ|
    determinant: f64,
}

impl MixtureComponent {
    /// Builds a new [MixtureComponent], covariance must be symmetric positive definite.
    pub fn new(
        key: u32,
        sv: Option<SV>,
        weight: f64,
        mean: Vector2<f64>,
        covariance: Matrix2<f64>,
    ) -> Result<Self, Error> {
        let covariance = (covariance + covariance.transpose()) * 0.5;
        let determinant = covariance.determinant();
        if !determinant.is_finite() || determinant <= 0.0 || !mean.iter().all(|m| m.is_finite()) {
            return Err(Error::NonPositiveDefinite);
        }
        let chol = covariance.cholesky().ok_or(Error::NonPositiveDefinite)?;
        let inverse = chol.inverse();
        let sqrt_information = chol
            .l()
            .try_inverse()
            .ok_or(Error::NonPositiveDefinite)?;
        Ok(Self {
            key,
            sv,
            weight,
            mean,
            covariance,
            inverse,
            sqrt_information,
            determinant,
        })
    }

    /// Builds a new [MixtureComponent], loading the covariance diagonal
    /// with growing multiples of `floor` until it becomes positive definite.
    /// Returns None if that did not succeed.
    pub fn regularized(
        key: u32,
        sv: Option<SV>,
        weight: f64,
        mean: Vector2<f64>,
        covariance: Matrix2<f64>,
        floor: f64,
    ) -> Option<Self> {
        if let Ok(component) = Self::new(key, sv, weight, mean, covariance) {
            return Some(component);
        }
        let mut loading = floor.max(f64::EPSILON);
        for _ in 0..8 {
            let loaded = covariance + Matrix2::identity() * loading;
            if let Ok(component) = Self::new(key, sv, weight, mean, loaded) {
                warn!(
                    "degenerate mixture component regularized (+{:.3E} on diagonal)",
                    loading
                );
                return Some(component);
            }
            loading *= 10.0;
        }
        None
    }

    /// Initial zero mean component, with independent range and phase noise.
    pub fn isotropic(sigma_range: f64, sigma_phase: f64) -> Result<Self, Error> {
        Self::new(
            0,
            None,
            0.0,
            Vector2::zeros(),
            Matrix2::new(sigma_range.powi(2), 0.0, 0.0, sigma_phase.powi(2)),
        )
    }

    /// Σ⁻¹
    pub fn inverse(&self) -> &Matrix2<f64> {
        &self.inverse
    }

    /// Whitening matrix L⁻¹, with Σ = L Lᵀ
    pub fn sqrt_information(&self) -> &Matrix2<f64> {
        &self.sqrt_information
    }

    /// Range and phase standard deviations
    pub fn sigmas(&self) -> (f64, f64) {
        (
            self.covariance[(0, 0)].sqrt(),
            self.covariance[(1, 1)].sqrt(),
        )
    }

    /// Quadratic form rᵀ Σ⁻¹ r of a raw `residual`
    pub fn quadratic_form(&self, residual: &Vector2<f64>) -> f64 {
        (residual.transpose() * self.inverse * residual)[(0, 0)]
    }

    fn normalization(&self) -> f64 {
        (2.0 * PI).recip() * self.determinant.powf(-0.5)
    }

    /// Gaussian likelihood of a raw `residual`, tested against
    /// this component's covariance.
    pub fn likelihood(&self, residual: &Vector2<f64>) -> f64 {
        self.normalization() * (-0.5 * self.quadratic_form(residual)).exp()
    }

    /// Gaussian likelihood of `residual` under N(mean, Σ)
    pub fn centered_likelihood(&self, residual: &Vector2<f64>) -> f64 {
        let centered = residual - self.mean;
        self.normalization() * (-0.5 * self.quadratic_form(&centered)).exp()
    }

    /// Independent range and phase z-scores of a raw `residual`
    pub fn z_scores(&self, residual: &Vector2<f64>) -> (f64, f64) {
        let (sigma_r, sigma_p) = self.sigmas();
        (residual[0] / sigma_r, residual[1] / sigma_p)
    }
}

impl std::fmt::Display for MixtureComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let sv = match self.sv {
            Some(sv) => sv.to_string(),
            None => "--".to_string(),
        };
        write!(
            f,
            "{} {} {} {:.6} {:.6} {:.6} {:.6} {:.6}",
            self.key,
            sv,
            self.weight,
            self.mean[0],
            self.mean[1],
            self.covariance[(0, 0)],
            self.covariance[(0, 1)],
            self.covariance[(1, 1)],
        )
    }
}

/// Ordered, never empty, set of [MixtureComponent]s.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureModel {
    components: Vec<MixtureComponent>,
}

impl MixtureModel {
    /// Builds a new [MixtureModel] from at least one [MixtureComponent].
    pub fn new(components: Vec<MixtureComponent>) -> Result<Self, Error> {
        if components.is_empty() {
            return Err(Error::EmptyMixture);
        }
        Ok(Self { components })
    }

    /// Single component model, describing nominal (inlier) noise.
    pub fn nominal(sigma_range: f64, sigma_phase: f64) -> Result<Self, Error> {
        Self::new(vec![MixtureComponent::isotropic(sigma_range, sigma_phase)?])
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Always false: a model holds one component at least.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Iterates the [MixtureComponent]s
    pub fn iter(&self) -> std::slice::Iter<'_, MixtureComponent> {
        self.components.iter()
    }

    /// Returns [MixtureComponent] at `index`
    pub fn get(&self, index: usize) -> Option<&MixtureComponent> {
        self.components.get(index)
    }

    fn argmax<F: Fn(&MixtureComponent) -> f64>(&self, score: F) -> (usize, f64) {
        let mut best = (0, f64::NEG_INFINITY);
        for (index, component) in self.components.iter().enumerate() {
            let value = score(component);
            if value > best.1 {
                best = (index, value);
            }
        }
        best
    }

    /// Returns index and likelihood of the component that best explains
    /// the raw `residual` (outlier classification). Ties go to the earliest component.
    pub fn best_match(&self, residual: &Vector2<f64>) -> (usize, f64) {
        self.argmax(|component| component.likelihood(residual))
    }

    /// Returns index and likelihood of the component whose N(mean, Σ)
    /// best explains `residual` (max-mixture whitening).
    /// Ties go to the earliest component.
    pub fn best_fit(&self, residual: &Vector2<f64>) -> (usize, f64) {
        self.argmax(|component| component.centered_likelihood(residual))
    }

    pub(crate) fn into_inner(self) -> Vec<MixtureComponent> {
        self.components
    }
}

impl std::fmt::Display for MixtureModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for component in self.components.iter() {
            writeln!(f, "{}", component)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn isotropic_component() {
        let comp = MixtureComponent::isotropic(2.5, 0.25).unwrap();
        assert_eq!(comp.sigmas(), (2.5, 0.25));

        let r = Vector2::new(5.0, 0.5);
        assert_eq!(comp.z_scores(&r), (2.0, 2.0));
        assert!((comp.quadratic_form(&r) - 8.0).abs() < 1.0E-9);

        let peak = comp.likelihood(&Vector2::zeros());
        let expected = 1.0 / (2.0 * PI * 2.5 * 0.25);
        assert!((peak - expected).abs() < 1.0E-12);

        // whitening
        let w = comp.sqrt_information() * r;
        assert!((w.norm_squared() - 8.0).abs() < 1.0E-9);
    }

    #[test]
    fn non_positive_definite() {
        let cov = Matrix2::new(1.0, 2.0, 2.0, 1.0);
        assert_eq!(
            MixtureComponent::new(0, None, 1.0, Vector2::zeros(), cov).err(),
            Some(Error::NonPositiveDefinite)
        );

        let singular = Matrix2::new(1.0, 1.0, 1.0, 1.0);
        let comp =
            MixtureComponent::regularized(0, None, 1.0, Vector2::zeros(), singular, 1.0E-6)
                .unwrap();
        assert!(comp.covariance.determinant() > 0.0);

        assert!(MixtureComponent::regularized(
            0,
            None,
            1.0,
            Vector2::zeros(),
            Matrix2::new(-1.0E9, 0.0, 0.0, -1.0E9),
            1.0E-6
        )
        .is_none());
    }

    #[test]
    fn best_match_ties() {
        let comp = MixtureComponent::isotropic(1.0, 1.0).unwrap();
        let model = MixtureModel::new(vec![comp.clone(), comp]).unwrap();
        assert_eq!(model.best_match(&Vector2::new(0.3, 0.1)).0, 0);

        let narrow = MixtureComponent::isotropic(1.0, 1.0).unwrap();
        let wide = MixtureComponent::isotropic(30.0, 3.0).unwrap();
        let model = MixtureModel::new(vec![narrow, wide]).unwrap();
        assert_eq!(model.best_match(&Vector2::new(0.1, 0.0)).0, 0);
        assert_eq!(model.best_match(&Vector2::new(40.0, 4.0)).0, 1);
    }

    #[test]
    fn raw_and_centered_scores() {
        let offset = MixtureComponent::new(
            3,
            None,
            1.0,
            Vector2::new(40.0, 4.0),
            Matrix2::new(25.0, 0.0, 0.0, 0.25),
        )
        .unwrap();

        // classification ignores the mean
        let r = Vector2::new(45.0, 4.5);
        assert_eq!(offset.z_scores(&r), (9.0, 9.0));
        assert!((offset.quadratic_form(&r) - 162.0).abs() < 1.0E-9);

        // whitening selection accounts for it
        let nominal = MixtureComponent::isotropic(2.5, 0.25).unwrap();
        let model = MixtureModel::new(vec![nominal, offset]).unwrap();
        assert_eq!(model.best_fit(&Vector2::new(40.0, 4.0)).0, 1);
        assert_eq!(model.best_fit(&Vector2::new(0.1, 0.0)).0, 0);
        assert!(
            model.get(1).unwrap().centered_likelihood(&Vector2::new(40.0, 4.0))
                > model.get(1).unwrap().likelihood(&Vector2::new(40.0, 4.0))
        );
    }

    #[test]
    fn empty_model() {
        assert_eq!(MixtureModel::new(vec![]).err(), Some(Error::EmptyMixture));
    }
}
