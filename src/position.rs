//! Receiver position
use crate::prelude::Vector3;
use map_3d::{ecef2geodetic, Ellipsoid};
use nalgebra::Matrix3;

/// Position is used as the nominal receiver point,
/// every state correction is expressed with respect to it.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Position {
    /// ECEF coordinates in meters
    pub(crate) ecef: Vector3<f64>,
    /// Geodetic coordinates in radians
    pub(crate) geodetic: Vector3<f64>,
}

impl Position {
    /// Builds new [Position] from ECEF coordinates expressed in meter.
    pub fn from_ecef(ecef: Vector3<f64>) -> Self {
        let (x, y, z) = (ecef[0], ecef[1], ecef[2]);
        let (lat, lon, h) = ecef2geodetic(x, y, z, Ellipsoid::WGS84);
        Self {
            ecef,
            geodetic: Vector3::new(lat, lon, h),
        }
    }

    /// Returns ECEF coordinates.
    pub fn ecef(&self) -> Vector3<f64> {
        self.ecef
    }

    /// Returns Geodetic coordinates
    /// - latitude [rad]
    /// - longitude [rad]
    /// - altitude above sea levl [m]
    pub fn geodetic(&self) -> Vector3<f64> {
        self.geodetic
    }

    /// Rotation matrix from ECEF to the local (East, North, Up) frame.
    pub(crate) fn ecef_to_enu(&self) -> Matrix3<f64> {
        let (lat, lon) = (self.geodetic[0], self.geodetic[1]);
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        Matrix3::new(
            -sin_lon,
            cos_lon,
            0.0,
            -sin_lat * cos_lon,
            -sin_lat * sin_lon,
            cos_lat,
            cos_lat * cos_lon,
            cos_lat * sin_lon,
            sin_lat,
        )
    }

    /// Local up (ellipsoid normal) unit vector, expressed in ECEF.
    pub(crate) fn up(&self) -> Vector3<f64> {
        let (lat, lon) = (self.geodetic[0], self.geodetic[1]);
        Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }

    /// Expresses `ecef` (meters) as an (East, North, Up) offset from [Self].
    pub fn enu(&self, ecef: &Vector3<f64>) -> Vector3<f64> {
        self.ecef_to_enu() * (ecef - self.ecef)
    }

    /// Elevation angle [rad] of `target` (ECEF meters) as seen from [Self].
    pub fn elevation(&self, target: &Vector3<f64>) -> f64 {
        let los = (target - self.ecef).normalize();
        los.dot(&self.up()).clamp(-1.0, 1.0).asin()
    }
}

#[cfg(test)]
mod test {
    use super::Position;
    use crate::prelude::Vector3;

    #[test]
    fn enu_offsets() {
        // point on the equator, greenwich meridian
        let pos = Position::from_ecef(Vector3::new(6378137.0, 0.0, 0.0));
        assert!(pos.geodetic()[0].abs() < 1.0E-9);
        assert!(pos.geodetic()[1].abs() < 1.0E-9);

        let enu = pos.enu(&Vector3::new(6378138.0, 2.0, 3.0));
        assert!((enu[0] - 2.0).abs() < 1.0E-6, "east: {}", enu[0]);
        assert!((enu[1] - 3.0).abs() < 1.0E-6, "north: {}", enu[1]);
        assert!((enu[2] - 1.0).abs() < 1.0E-6, "up: {}", enu[2]);
    }

    #[test]
    fn elevations() {
        let pos = Position::from_ecef(Vector3::new(6378137.0, 0.0, 0.0));
        let zenith = Vector3::new(6378137.0 + 2.0E7, 0.0, 0.0);
        assert!((pos.elevation(&zenith) - std::f64::consts::FRAC_PI_2).abs() < 1.0E-9);

        let horizon = Vector3::new(6378137.0, 2.0E7, 0.0);
        assert!(pos.elevation(&horizon).abs() < 1.0E-9);
    }
}
