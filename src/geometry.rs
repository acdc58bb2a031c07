//! Satellite to receiver observation model
use nalgebra::SVector;

use crate::{
    observation::Observation,
    position::Position,
    prelude::{Vector2, Vector3},
};

/// Partial derivatives of one observation with respect to the
/// (dx, dy, dz, tropo, clock) state.
pub type Partials = SVector<f64, 5>;

/// [ObservationModel] provides the linear map between a state correction
/// and the range/phase prefit residuals of one satellite.
pub trait ObservationModel {
    /// Geometric range between `sat_ecef` and `reference` [m].
    fn range(&self, sat_ecef: &Vector3<f64>, reference: &Position) -> f64 {
        (sat_ecef - reference.ecef()).norm()
    }

    /// Returns [Partials] of one observation of `sat_ecef`,
    /// linearized at `reference`.
    fn partials(&self, sat_ecef: &Vector3<f64>, reference: &Position) -> Partials;

    /// (range, phase) prefit residuals of `observation`, with respect
    /// to the geometric range of the nominal position.
    fn prefit(&self, observation: &Observation) -> Vector2<f64> {
        let (range, phase) = observation.prefit();
        Vector2::new(range, phase)
    }
}

/// Line of sight [ObservationModel]: position corrections project on the
/// unit line of sight vector (corrections are subtracted from the nominal
/// position), the zenith troposphere delay is mapped to the slant using
/// the Black & Eisner mapping function and the clock bias is expressed in meters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineOfSight {}

impl LineOfSight {
    /// Black & Eisner troposphere mapping function
    pub fn tropo_mapping(elevation_rad: f64) -> f64 {
        1.001_f64 / (0.002001_f64 + elevation_rad.sin().powi(2)).sqrt()
    }
}

impl ObservationModel for LineOfSight {
    fn partials(&self, sat_ecef: &Vector3<f64>, reference: &Position) -> Partials {
        let los = (sat_ecef - reference.ecef()).normalize();
        let elevation = reference.elevation(sat_ecef);
        Partials::new(
            los[0],
            los[1],
            los[2],
            Self::tropo_mapping(elevation),
            1.0,
        )
    }
}
