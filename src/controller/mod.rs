//! Epoch by epoch estimation loop
use std::{rc::Rc, time::Instant};

use log::{debug, info, warn};
use nalgebra::{DVector, SVector};

use crate::{
    cfg::{Config, OutputPolicy},
    classifier::{Classification, ResidualClassifier},
    error::Error,
    estimator::{Estimator, FactorId, Key, STATE_DIM},
    geometry::{LineOfSight, ObservationModel},
    mixture::MixtureModelManager,
    observation::{EpochObservations, ObservationStream},
    output::{RunSummary, Solution},
    position::Position,
    prelude::{Epoch, Vector3, SV},
};

mod arc;

pub use arc::{ArcTracker, ArcUpdate};

/// Outcome of one epoch
#[derive(Debug, Clone, PartialEq)]
pub enum EpochOutcome {
    /// Epoch was committed and solved
    Solved(Solution),
    /// Epoch had too few observations to be committed.
    /// The previous estimate is carried forward.
    Skipped {
        /// Epoch key
        key: u32,
        /// Number of observations
        observations: usize,
    },
}

impl EpochOutcome {
    /// Returns [Solution] of a solved epoch
    pub fn solution(&self) -> Option<&Solution> {
        match self {
            Self::Solved(solution) => Some(solution),
            Self::Skipped { .. } => None,
        }
    }
}

/// Observation factor attached during the current epoch
#[derive(Debug, Clone, Copy)]
struct Attached {
    id: FactorId,
    sv: SV,
    arc: u32,
}

/// [EpochController] drives the estimation loop: it builds the factors
/// of each epoch, commits them, classifies the residuals, excludes the
/// outliers and feeds the noise model learning process.
pub struct EpochController<M: ObservationModel = LineOfSight> {
    cfg: Config,
    /// Nominal receiver position
    nominal: Position,
    /// Latest corrected position, used to linearize new observations
    reference: Position,
    model: M,
    estimator: Estimator,
    mixture: MixtureModelManager,
    classifier: ResidualClassifier,
    arcs: ArcTracker,
    /// Latest committed key and its sampling time
    last_committed: Option<(u32, Epoch)>,
    /// Latest processed key (committed or skipped)
    last_key: Option<u32>,
    /// Latest estimate, initial guess of the next state
    carried: SVector<f64, STATE_DIM>,
    warm_up_count: usize,
    summary: RunSummary,
}

impl EpochController<LineOfSight> {
    /// Builds a new [EpochController] using the [LineOfSight] model.
    pub fn new(cfg: Config) -> Result<Self, Error> {
        Self::with_model(cfg, LineOfSight::default())
    }
}

impl<M: ObservationModel> EpochController<M> {
    /// Builds a new [EpochController] using a custom [ObservationModel].
    pub fn with_model(cfg: Config, model: M) -> Result<Self, Error> {
        cfg.validate()?;
        let (x, y, z) = cfg.nominal_ecef()?;
        let nominal = Position::from_ecef(Vector3::new(x, y, z));
        let mixture = MixtureModelManager::new(&cfg.mixture)?;

        info!(
            "{} - nominal position: ({:.3}, {:.3}, {:.3})",
            cfg.station.name, x, y, z
        );

        Ok(Self {
            reference: nominal.clone(),
            nominal,
            model,
            estimator: Estimator::new(&cfg.estimator),
            mixture,
            classifier: ResidualClassifier::new(cfg.mixture.outlier_threshold),
            arcs: ArcTracker::new(),
            last_committed: None,
            last_key: None,
            carried: SVector::zeros(),
            warm_up_count: 0,
            summary: RunSummary::default(),
            cfg,
        })
    }

    /// [Config] in use
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Nominal [Position]
    pub fn nominal(&self) -> &Position {
        &self.nominal
    }

    /// Latest corrected [Position]
    pub fn reference(&self) -> &Position {
        &self.reference
    }

    /// Underlying [Estimator]
    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Underlying [MixtureModelManager]
    pub fn mixture(&self) -> &MixtureModelManager {
        &self.mixture
    }

    /// Phase [ArcTracker]
    pub fn arcs(&self) -> &ArcTracker {
        &self.arcs
    }

    /// [RunSummary] so far
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Processes one epoch.
    pub fn process(&mut self, epoch: &EpochObservations) -> Result<EpochOutcome, Error> {
        let start = Instant::now();
        let key = epoch.key;
        let t = epoch.t().ok_or(Error::EmptyEpoch(key))?;

        if let Some(last) = self.last_key {
            if key <= last {
                return Err(Error::NonIncreasingKey(key, last));
            }
        }

        self.last_key = Some(key);
        self.summary.epochs += 1;

        let x = Key::State(key);

        self.estimator
            .insert(x, DVector::from_column_slice(self.carried.as_slice()))?;

        let snapshot = self.mixture.snapshot();
        let mut attached = Vec::with_capacity(epoch.len());
        let mut new_arcs = 0;

        for ob in epoch.observations.iter() {
            let update = self.arcs.track(ob.sv, ob.arc);
            let bias = Key::Bias(ob.sv, update.arc);

            if update.new {
                if let Some(retired) = update.retired {
                    debug!("{} ({}) - phase arc #{} interrupted", key, ob.sv, retired);
                    self.estimator.retire(&Key::Bias(ob.sv, retired))?;
                }

                let initial = DVector::from_element(1, ob.initial_ambiguity());
                self.estimator.insert(bias, initial.clone())?;
                self.estimator
                    .add_prior(bias, initial, &[self.cfg.estimator.bias_prior_variance])?;

                debug!("{} ({}) - new phase arc #{}", key, ob.sv, update.arc);
                new_arcs += 1;
            }

            let partials = self.model.partials(&ob.sat_ecef, &self.reference);
            let measured = self.model.prefit(ob);

            let id = self.estimator.add_observation(
                x,
                bias,
                partials,
                measured,
                Rc::clone(&snapshot),
            )?;

            attached.push(Attached {
                id,
                sv: ob.sv,
                arc: update.arc,
            });
        }

        if epoch.len() < self.cfg.min_observations {
            // observations and state are dropped, new phase arcs
            // (and their priors) remain staged for the next epoch
            self.estimator.drop_variable(&x)?;
            self.summary.skipped += 1;
            warn!(
                "{} - not enough observations ({}/{}): skipped",
                key,
                epoch.len(),
                self.cfg.min_observations
            );
            return Ok(EpochOutcome::Skipped {
                key,
                observations: epoch.len(),
            });
        }

        if self.cfg.between {
            if let Some((prev, prev_t)) = self.last_committed {
                let dt = (t - prev_t).to_seconds().max(1.0E-3);
                let variances = self
                    .cfg
                    .estimator
                    .process_noise_variances
                    .map(|v| v * dt);
                self.estimator.add_between(
                    Key::State(prev),
                    x,
                    DVector::zeros(STATE_DIM),
                    &variances,
                )?;
            }
        }

        if self.last_committed.is_none() || self.warm_up_count < self.cfg.warm_up_epochs {
            self.estimator.add_prior(
                x,
                DVector::zeros(STATE_DIM),
                &self.cfg.estimator.initial_state_variances,
            )?;
            self.warm_up_count += 1;
        }

        self.estimator.commit(key)?;

        let prefit_solution = match self.cfg.policy {
            OutputPolicy::PreFit => Some(self.solution(key, t, &attached)?),
            OutputPolicy::PostFit => None,
        };

        let residuals = attached
            .iter()
            .map(|a| Ok((a.id, a.sv, self.estimator.residual(a.id)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        let classification = self.classifier.classify(key, &residuals, &snapshot);
        let recommitted = self.exclude_outliers(key, &classification)?;

        let mut solution = match prefit_solution {
            Some(solution) => solution,
            None => self.solution(key, t, &attached)?,
        };

        solution.new_arcs = new_arcs;
        solution.outliers = classification.outliers().count();
        solution.rejected = classification.outliers().map(|v| v.sv).collect();
        solution.recommitted = recommitted;

        // the next epoch is linearized at the final estimate,
        // whatever the output policy
        let state = self
            .estimator
            .estimate()
            .state_vector(&x)
            .ok_or(Error::UnknownVariable(x))?;

        self.carried = state;
        self.reference = Position::from_ecef(
            self.nominal.ecef() - Vector3::new(state[0], state[1], state[2]),
        );

        self.summary.outliers += solution.outliers;
        self.mixture.absorb(key, &classification);

        if self.mixture.should_recluster() {
            info!(
                "{} - reclustering {} residuals",
                key,
                self.mixture.batch().len()
            );
            if self.mixture.run_cycle().is_some() {
                self.summary.reclusterings += 1;
            }
        }

        self.estimator.seal()?;

        self.last_committed = Some((key, t));
        self.summary.commits += 1;

        debug!(
            "{} - {} observations, {} outliers, processed in {:?}",
            key,
            epoch.len(),
            solution.outliers,
            start.elapsed()
        );

        Ok(EpochOutcome::Solved(solution))
    }

    /// Removes outlying observations and solves this epoch again,
    /// as long as enough observations are trusted.
    fn exclude_outliers(
        &mut self,
        key: u32,
        classification: &Classification,
    ) -> Result<bool, Error> {
        if !classification.has_outliers() {
            return Ok(false);
        }

        let trusted = classification.trusted();
        if trusted < self.cfg.min_observations {
            warn!(
                "{} - {} outliers but only {} trusted observations: keeping all",
                key,
                classification.verdicts.len() - trusted,
                trusted
            );
            return Ok(false);
        }

        self.estimator.remove_committed(&classification.rejected())?;
        self.estimator.commit(key)?;
        self.summary.recommits += 1;
        Ok(true)
    }

    fn solution(&self, key: u32, t: Epoch, attached: &[Attached]) -> Result<Solution, Error> {
        let values = self.estimator.estimate();
        let state = values.state(key).ok_or(Error::UnknownVariable(Key::State(key)))?;

        let ecef = self.nominal.ecef() - state.position_correction();
        let enu = self.nominal.enu(&ecef);

        let ambiguities = attached
            .iter()
            .map(|a| {
                values
                    .bias(a.sv, a.arc)
                    .map(|amb| (a.sv, a.arc, amb))
                    .ok_or(Error::UntrackedSatellite(a.sv))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Solution {
            key,
            t,
            state,
            ecef,
            enu,
            ambiguities,
            observations: attached.len(),
            outliers: 0,
            rejected: Vec::new(),
            recommitted: false,
            new_arcs: 0,
        })
    }

    /// True if processing should stop after `epoch`, because the
    /// following key is the end marker of `stream`.
    pub fn reached_end_marker(
        &self,
        epoch: &EpochObservations,
        stream: &ObservationStream,
    ) -> bool {
        self.cfg.stop_at_last_key
            && epoch.next_key.is_some()
            && epoch.next_key == stream.last_key()
    }

    /// Processes `stream`, handing each [EpochOutcome] to `sink`.
    /// Processing stops when the stream is exhausted or, if
    /// [Config::stop_at_last_key] is set, once the following key is the
    /// last key of the stream (end marker).
    pub fn run_with<F: FnMut(&EpochOutcome)>(
        &mut self,
        stream: &ObservationStream,
        mut sink: F,
    ) -> Result<RunSummary, Error> {
        for epoch in stream.epochs() {
            let outcome = self.process(&epoch)?;
            sink(&outcome);

            if self.reached_end_marker(&epoch, stream) {
                info!("{} - end marker reached", epoch.key);
                break;
            }
        }

        info!("{}", self.summary);
        Ok(self.summary)
    }

    /// Processes `stream` and returns all [Solution]s.
    pub fn run(&mut self, stream: &ObservationStream) -> Result<Vec<Solution>, Error> {
        let mut solutions = Vec::with_capacity(stream.len());
        self.run_with(stream, |outcome| {
            if let EpochOutcome::Solved(solution) = outcome {
                solutions.push(solution.clone());
            }
        })?;
        Ok(solutions)
    }
}
