pub use data::Scenario;

mod arcs;
mod config;
mod reclustering;

use log::LevelFilter;
use std::sync::Once;

/// Static station, ECEF [m]
pub const STATION_COORDS_ECEF_M: (f64, f64, f64) = (4027881.0, 306998.0, 4919499.0);

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Debug)
            .init();
    });
}
