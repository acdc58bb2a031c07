#[cfg(feature = "serde")]
use serde::Deserialize;

use crate::{error::Error, mixture::Divergence};

mod policy;
pub use policy::OutputPolicy;

fn default_min_observations() -> usize {
    5
}

fn default_warm_up_epochs() -> usize {
    1200
}

fn default_stop_at_last_key() -> bool {
    true
}

fn default_relinearize_threshold() -> f64 {
    0.01
}

fn default_max_iterations() -> usize {
    10
}

fn default_initial_state_variances() -> [f64; 5] {
    [0.1, 0.1, 0.1, 3.0E6, 1.0E-1]
}

fn default_process_noise_variances() -> [f64; 5] {
    [1.0, 1.0, 1.0, 1.0E3, 1.0E-3]
}

fn default_bias_prior_variance() -> f64 {
    3.0E6
}

fn default_sigma_range() -> f64 {
    2.5
}

fn default_sigma_phase() -> f64 {
    0.25
}

fn default_outlier_threshold() -> f64 {
    3.0
}

fn default_batch_size() -> usize {
    1000
}

fn default_merge_threshold() -> f64 {
    0.05
}

fn default_max_components() -> usize {
    20
}

fn default_covariance_floor() -> f64 {
    1.0E-6
}

fn default_truncation() -> usize {
    12
}

fn default_concentration() -> f64 {
    1.0
}

fn default_vdp_iterations() -> usize {
    200
}

fn default_vdp_tolerance() -> f64 {
    1.0E-6
}

fn default_min_cluster_weight() -> f64 {
    1.0E-3
}

fn default_true() -> bool {
    true
}

/// Station (receiver site) description.
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Station {
    /// Station name, used in logs only
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    /// Nominal receiver position, ECEF [m].
    /// Every state correction is expressed with respect to this point.
    pub nominal_ecef: Option<(f64, f64, f64)>,
}

/// Incremental estimation engine parametrization
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct EstimatorOpts {
    /// Gauss-Newton iterations stop once the update norm is below this value.
    #[cfg_attr(feature = "serde", serde(default = "default_relinearize_threshold"))]
    pub relinearize_threshold: f64,
    /// Maximal number of relinearizations per commit.
    #[cfg_attr(feature = "serde", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// Variances of the prior attached to new states
    /// (dx, dy, dz [m²], tropo [m²], clock [m²]).
    #[cfg_attr(feature = "serde", serde(default = "default_initial_state_variances"))]
    pub initial_state_variances: [f64; 5],
    /// Process noise variances, per second of elapsed time,
    /// used by the Between factors.
    #[cfg_attr(feature = "serde", serde(default = "default_process_noise_variances"))]
    pub process_noise_variances: [f64; 5],
    /// Variance of the prior attached to each new phase arc [m²].
    #[cfg_attr(feature = "serde", serde(default = "default_bias_prior_variance"))]
    pub bias_prior_variance: f64,
}

impl Default for EstimatorOpts {
    fn default() -> Self {
        Self {
            relinearize_threshold: default_relinearize_threshold(),
            max_iterations: default_max_iterations(),
            initial_state_variances: default_initial_state_variances(),
            process_noise_variances: default_process_noise_variances(),
            bias_prior_variance: default_bias_prior_variance(),
        }
    }
}

/// Variational (nonparametric) clustering options
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct ClusteringOpts {
    /// Stick-breaking truncation level (maximal number of clusters).
    #[cfg_attr(feature = "serde", serde(default = "default_truncation"))]
    pub truncation: usize,
    /// Dirichlet process concentration.
    #[cfg_attr(feature = "serde", serde(default = "default_concentration"))]
    pub concentration: f64,
    /// Maximal number of variational iterations.
    #[cfg_attr(feature = "serde", serde(default = "default_vdp_iterations"))]
    pub max_iterations: usize,
    /// Convergence criterion on the responsibilities.
    #[cfg_attr(feature = "serde", serde(default = "default_vdp_tolerance"))]
    pub tolerance: f64,
    /// Clusters with a lower expected weight are discarded.
    #[cfg_attr(feature = "serde", serde(default = "default_min_cluster_weight"))]
    pub min_weight: f64,
}

impl Default for ClusteringOpts {
    fn default() -> Self {
        Self {
            truncation: default_truncation(),
            concentration: default_concentration(),
            max_iterations: default_vdp_iterations(),
            tolerance: default_vdp_tolerance(),
            min_weight: default_min_cluster_weight(),
        }
    }
}

/// Noise mixture model management
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct MixtureOpts {
    /// Standard deviation of the initial component, range axis [m].
    #[cfg_attr(feature = "serde", serde(default = "default_sigma_range"))]
    pub sigma_range: f64,
    /// Standard deviation of the initial component, phase axis [m].
    #[cfg_attr(feature = "serde", serde(default = "default_sigma_phase"))]
    pub sigma_phase: f64,
    /// z-test threshold: residuals beyond this many standard deviations
    /// of their best matching component are outliers.
    #[cfg_attr(feature = "serde", serde(default = "default_outlier_threshold"))]
    pub outlier_threshold: f64,
    /// Number of accumulated residuals that triggers a reclustering.
    #[cfg_attr(feature = "serde", serde(default = "default_batch_size"))]
    pub batch_size: usize,
    /// Candidates closer than this to an existing component are merged into it.
    #[cfg_attr(feature = "serde", serde(default = "default_merge_threshold"))]
    pub merge_threshold: f64,
    /// Maximal number of components of the global model.
    #[cfg_attr(feature = "serde", serde(default = "default_max_components"))]
    pub max_components: usize,
    /// Similarity measure used by the merge step.
    #[cfg_attr(feature = "serde", serde(default))]
    pub divergence: Divergence,
    /// Diagonal loading applied to degenerate covariances.
    #[cfg_attr(feature = "serde", serde(default = "default_covariance_floor"))]
    pub covariance_floor: f64,
    /// Density estimation options.
    #[cfg_attr(feature = "serde", serde(default))]
    pub clustering: ClusteringOpts,
}

impl Default for MixtureOpts {
    fn default() -> Self {
        Self {
            sigma_range: default_sigma_range(),
            sigma_phase: default_sigma_phase(),
            outlier_threshold: default_outlier_threshold(),
            batch_size: default_batch_size(),
            merge_threshold: default_merge_threshold(),
            max_components: default_max_components(),
            divergence: Divergence::default(),
            covariance_floor: default_covariance_floor(),
            clustering: ClusteringOpts::default(),
        }
    }
}

/// Selects the emitted quantities.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct OutputOpts {
    /// Emit corrected ECEF coordinates
    #[cfg_attr(feature = "serde", serde(default))]
    pub ecef: bool,
    /// Emit ENU offset with respect to the nominal position
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub enu: bool,
    /// Emit phase ambiguities
    #[cfg_attr(feature = "serde", serde(default))]
    pub ambiguities: bool,
}

impl Default for OutputOpts {
    fn default() -> Self {
        Self {
            ecef: false,
            enu: true,
            ambiguities: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
pub struct Config {
    /// [Station] description
    #[cfg_attr(feature = "serde", serde(default))]
    pub station: Station,
    /// Epochs with fewer observations are not committed and their
    /// state is carried forward.
    #[cfg_attr(feature = "serde", serde(default = "default_min_observations"))]
    pub min_observations: usize,
    /// Number of leading epochs that receive a fresh state prior,
    /// stabilizing early linearization.
    #[cfg_attr(feature = "serde", serde(default = "default_warm_up_epochs"))]
    pub warm_up_epochs: usize,
    /// Connect consecutive states with a Between factor
    /// (process noise scaled by elapsed time).
    #[cfg_attr(feature = "serde", serde(default))]
    pub between: bool,
    /// Stop processing when the next key equals the last key of the stream.
    #[cfg_attr(feature = "serde", serde(default = "default_stop_at_last_key"))]
    pub stop_at_last_key: bool,
    /// [OutputPolicy]
    #[cfg_attr(feature = "serde", serde(default))]
    pub policy: OutputPolicy,
    /// [EstimatorOpts]
    #[cfg_attr(feature = "serde", serde(default))]
    pub estimator: EstimatorOpts,
    /// [MixtureOpts]
    #[cfg_attr(feature = "serde", serde(default))]
    pub mixture: MixtureOpts,
    /// [OutputOpts]
    #[cfg_attr(feature = "serde", serde(default))]
    pub output: OutputOpts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station: Station::default(),
            min_observations: default_min_observations(),
            warm_up_epochs: default_warm_up_epochs(),
            between: false,
            stop_at_last_key: default_stop_at_last_key(),
            policy: OutputPolicy::default(),
            estimator: EstimatorOpts::default(),
            mixture: MixtureOpts::default(),
            output: OutputOpts::default(),
        }
    }
}

impl Config {
    /// Returns [Config] for a static station located at `nominal_ecef_m`:
    /// every epoch of the warm-up window is tied to a fresh prior,
    /// consecutive states are not connected.
    pub fn static_preset(nominal_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::default();
        s.station.nominal_ecef = Some(nominal_ecef_m);
        s
    }

    /// Returns [Config] for a roaming receiver: consecutive states
    /// are connected by process noise and no warm-up prior is used.
    pub fn kinematic_preset(nominal_ecef_m: (f64, f64, f64)) -> Self {
        let mut s = Self::static_preset(nominal_ecef_m);
        s.between = true;
        s.warm_up_epochs = 0;
        s
    }

    /// Returns nominal position, failing if it was not defined.
    pub fn nominal_ecef(&self) -> Result<(f64, f64, f64), Error> {
        self.station
            .nominal_ecef
            .ok_or(Error::MissingConfiguration("station.nominal_ecef"))
    }

    /// Verifies this [Config] is usable.
    pub fn validate(&self) -> Result<(), Error> {
        let _ = self.nominal_ecef()?;
        if self.min_observations == 0 {
            return Err(Error::MissingConfiguration("min_observations"));
        }
        if self.mixture.max_components == 0 {
            return Err(Error::MissingConfiguration("mixture.max_components"));
        }
        if self.mixture.batch_size == 0 {
            return Err(Error::MissingConfiguration("mixture.batch_size"));
        }
        if !(self.mixture.sigma_range > 0.0 && self.mixture.sigma_phase > 0.0) {
            return Err(Error::MissingConfiguration("mixture.sigma_range/sigma_phase"));
        }
        if self.estimator.initial_state_variances.iter().any(|v| *v <= 0.0)
            || self.estimator.process_noise_variances.iter().any(|v| *v <= 0.0)
            || self.estimator.bias_prior_variance <= 0.0
        {
            return Err(Error::MissingConfiguration("estimator variances"));
        }
        Ok(())
    }
}
