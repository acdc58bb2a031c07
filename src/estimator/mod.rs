//! Incremental estimation engine.
//!
//! Variables and factors are first staged, then committed epoch by epoch.
//! The current epoch is solved by Gauss-Newton on top of a Gaussian prior
//! that summarizes every sealed epoch. Sealing an epoch marginalizes
//! (Schur complement) the solved information onto the variables that remain
//! active: the latest state and the live phase arcs.
use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use log::{debug, error, trace};
use nalgebra::{DMatrix, DVector, SVector, Vector2, Vector3};

use crate::{
    cfg::EstimatorOpts,
    error::Error,
    geometry::Partials,
    mixture::MixtureModel,
    prelude::SV,
};

mod factor;

pub use factor::{
    BetweenFactor, DiagonalNoise, Factor, Linearized, ObservationFactor, PriorFactor,
};

/// Dimension of the [NonBiasState]
pub const STATE_DIM: usize = 5;

/// Factor identifier, unique over the estimator lifetime
pub type FactorId = usize;

/// Variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// [NonBiasState] of one epoch key
    State(u32),
    /// Phase bias of one satellite arc
    Bias(SV, u32),
}

impl Key {
    /// Dimension of this variable
    pub fn dim(&self) -> usize {
        match self {
            Self::State(_) => STATE_DIM,
            Self::Bias(..) => 1,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::State(key) => write!(f, "X({})", key),
            Self::Bias(sv, arc) => write!(f, "B({}:{})", sv, arc),
        }
    }
}

/// Receiver state correction, with respect to the nominal position
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct NonBiasState {
    /// Position correction [m]. Corrected position is nominal - correction.
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Zenith troposphere delay [m]
    pub tropo: f64,
    /// Receiver clock offset [m]
    pub clock: f64,
}

impl NonBiasState {
    /// Builds [NonBiasState] from its vector form
    pub fn from_vector(v: &SVector<f64, STATE_DIM>) -> Self {
        Self {
            dx: v[0],
            dy: v[1],
            dz: v[2],
            tropo: v[3],
            clock: v[4],
        }
    }

    /// Vector form
    pub fn to_vector(&self) -> SVector<f64, STATE_DIM> {
        SVector::<f64, STATE_DIM>::from([self.dx, self.dy, self.dz, self.tropo, self.clock])
    }

    /// Position correction [m]
    pub fn position_correction(&self) -> Vector3<f64> {
        Vector3::new(self.dx, self.dy, self.dz)
    }
}

/// Variable values, indexed by [Key]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    inner: BTreeMap<Key, DVector<f64>>,
}

impl Values {
    pub fn insert(&mut self, key: Key, value: DVector<f64>) {
        self.inner.insert(key, value);
    }

    pub fn get(&self, key: &Key) -> Option<&DVector<f64>> {
        self.inner.get(key)
    }

    fn get_mut(&mut self, key: &Key) -> Option<&mut DVector<f64>> {
        self.inner.get_mut(key)
    }

    fn remove(&mut self, key: &Key) -> Option<DVector<f64>> {
        self.inner.remove(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> + '_ {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &DVector<f64>)> + '_ {
        self.inner.iter()
    }

    /// Value of a [Key::State] variable, in vector form
    pub fn state_vector(&self, key: &Key) -> Option<SVector<f64, STATE_DIM>> {
        let value = self.inner.get(key)?;
        if value.len() != STATE_DIM {
            return None;
        }
        Some(SVector::<f64, STATE_DIM>::from_column_slice(value.as_slice()))
    }

    /// Value of a scalar variable
    pub fn scalar(&self, key: &Key) -> Option<f64> {
        let value = self.inner.get(key)?;
        if value.len() != 1 {
            return None;
        }
        Some(value[0])
    }

    /// [NonBiasState] of epoch `key`
    pub fn state(&self, key: u32) -> Option<NonBiasState> {
        self.state_vector(&Key::State(key))
            .map(|v| NonBiasState::from_vector(&v))
    }

    /// Phase bias of `sv` on `arc`
    pub fn bias(&self, sv: SV, arc: u32) -> Option<f64> {
        self.scalar(&Key::Bias(sv, arc))
    }
}

/// Gaussian summary of all sealed epochs:
/// cost = ½ (x - mean)ᵀ information (x - mean)
#[derive(Debug, Clone)]
struct Marginal {
    keys: Vec<Key>,
    information: DMatrix<f64>,
    mean: DVector<f64>,
}

/// [Estimator] is the incremental state estimation engine.
#[derive(Debug)]
pub struct Estimator {
    opts: EstimatorOpts,
    /// Every variable ever estimated. Variables that left
    /// the active window keep their last estimate.
    values: Values,
    /// Variables of the active window
    active: BTreeSet<Key>,
    /// Active variables to be marginalized at next seal
    retired: BTreeSet<Key>,
    staged_values: Values,
    staged: BTreeMap<FactorId, Factor>,
    /// Factors committed since last seal
    factors: BTreeMap<FactorId, Factor>,
    marginal: Option<Marginal>,
    next_id: FactorId,
    last_good_key: Option<u32>,
}

impl Estimator {
    /// Builds a new (empty) [Estimator]
    pub fn new(opts: &EstimatorOpts) -> Self {
        Self {
            opts: opts.clone(),
            values: Values::default(),
            active: BTreeSet::new(),
            retired: BTreeSet::new(),
            staged_values: Values::default(),
            staged: BTreeMap::new(),
            factors: BTreeMap::new(),
            marginal: None,
            next_id: 0,
            last_good_key: None,
        }
    }

    /// Current estimate of every variable ever committed
    pub fn estimate(&self) -> &Values {
        &self.values
    }

    /// True if `key` belongs to the active window
    pub fn is_active(&self, key: &Key) -> bool {
        self.active.contains(key)
    }

    /// True if `key` is staged (not committed yet)
    pub fn is_staged(&self, key: &Key) -> bool {
        self.staged_values.contains(key)
    }

    /// Number of staged factors
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Number of factors committed since last seal
    pub fn committed_len(&self) -> usize {
        self.factors.len()
    }

    /// Last epoch key that was successfully solved
    pub fn last_good_key(&self) -> Option<u32> {
        self.last_good_key
    }

    fn is_known(&self, key: &Key) -> bool {
        self.active.contains(key) || self.staged_values.contains(key)
    }

    fn stage(&mut self, factor: Factor) -> FactorId {
        let id = self.next_id;
        self.next_id += 1;
        self.staged.insert(id, factor);
        id
    }

    /// Stages a new variable and its initial value
    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Result<(), Error> {
        if self.values.contains(&key) || self.staged_values.contains(&key) {
            return Err(Error::DuplicateVariable(key));
        }
        if value.len() != key.dim() {
            return Err(Error::DimensionMismatch(key));
        }
        self.staged_values.insert(key, value);
        Ok(())
    }

    /// Stages a [PriorFactor] on `key`
    pub fn add_prior(
        &mut self,
        key: Key,
        value: DVector<f64>,
        variances: &[f64],
    ) -> Result<FactorId, Error> {
        if !self.is_known(&key) {
            return Err(Error::UnknownVariable(key));
        }
        if value.len() != key.dim() || variances.len() != key.dim() {
            return Err(Error::DimensionMismatch(key));
        }
        let noise = DiagonalNoise::from_variances(variances)?;
        Ok(self.stage(Factor::Prior(PriorFactor { key, value, noise })))
    }

    /// Stages a [BetweenFactor] expecting `to - from = value`
    pub fn add_between(
        &mut self,
        from: Key,
        to: Key,
        value: DVector<f64>,
        variances: &[f64],
    ) -> Result<FactorId, Error> {
        for key in [from, to] {
            if !self.is_known(&key) {
                return Err(Error::UnknownVariable(key));
            }
        }
        if from.dim() != to.dim() || value.len() != to.dim() || variances.len() != to.dim() {
            return Err(Error::DimensionMismatch(to));
        }
        let noise = DiagonalNoise::from_variances(variances)?;
        Ok(self.stage(Factor::Between(BetweenFactor {
            from,
            to,
            value,
            noise,
        })))
    }

    /// Stages an [ObservationFactor] connecting one state and one phase bias
    pub fn add_observation(
        &mut self,
        state: Key,
        bias: Key,
        partials: Partials,
        measured: Vector2<f64>,
        model: Rc<MixtureModel>,
    ) -> Result<FactorId, Error> {
        for key in [state, bias] {
            if !self.is_known(&key) {
                return Err(Error::UnknownVariable(key));
            }
        }
        if !matches!(state, Key::State(_)) {
            return Err(Error::DimensionMismatch(state));
        }
        if !matches!(bias, Key::Bias(..)) {
            return Err(Error::DimensionMismatch(bias));
        }
        Ok(self.stage(Factor::Observation(ObservationFactor {
            state,
            bias,
            partials,
            measured,
            model,
        })))
    }

    /// Discards staged factors
    pub fn drop_staged(&mut self, ids: &[FactorId]) -> Result<(), Error> {
        if let Some(id) = ids.iter().find(|id| !self.staged.contains_key(id)) {
            return Err(Error::UnknownFactor(*id));
        }
        for id in ids {
            self.staged.remove(id);
        }
        Ok(())
    }

    /// Discards a staged variable and every staged factor connected to it.
    /// Returns identifiers of the discarded factors.
    pub fn drop_variable(&mut self, key: &Key) -> Result<Vec<FactorId>, Error> {
        if self.staged_values.remove(key).is_none() {
            return Err(Error::UnknownVariable(*key));
        }
        let ids = self
            .staged
            .iter()
            .filter_map(|(id, f)| if f.involves(key) { Some(*id) } else { None })
            .collect::<Vec<_>>();
        for id in ids.iter() {
            self.staged.remove(id);
        }
        Ok(ids)
    }

    /// Removes factors committed during the current epoch,
    /// ahead of a new [Self::commit] of that same epoch.
    pub fn remove_committed(&mut self, ids: &[FactorId]) -> Result<(), Error> {
        if let Some(id) = ids.iter().find(|id| !self.factors.contains_key(id)) {
            return Err(Error::UnknownFactor(*id));
        }
        for id in ids {
            self.factors.remove(id);
        }
        Ok(())
    }

    /// Unwhitened (measured minus predicted) residual of an observation
    /// factor, at the current estimate.
    pub fn residual(&self, id: FactorId) -> Result<Vector2<f64>, Error> {
        match self.factors.get(&id).or_else(|| self.staged.get(&id)) {
            Some(Factor::Observation(f)) => f.residual(&self.values),
            _ => Err(Error::UnknownFactor(id)),
        }
    }

    /// Marks an active phase bias as no longer observed. It will be
    /// marginalized at next seal. A retired variable that was never
    /// committed is simply discarded.
    pub fn retire(&mut self, key: &Key) -> Result<(), Error> {
        if self.staged_values.contains(key) {
            self.drop_variable(key)?;
            return Ok(());
        }
        if !self.active.contains(key) {
            return Err(Error::UnknownVariable(*key));
        }
        self.retired.insert(*key);
        Ok(())
    }

    /// Commits every staged variable and factor, then solves.
    /// Committing with an empty stage solves the current epoch again.
    pub fn commit(&mut self, key: u32) -> Result<(), Error> {
        for var in self.staged_values.keys() {
            if matches!(var, Key::Bias(..)) && !self.staged.values().any(|f| f.is_prior_on(var)) {
                return Err(Error::MissingPrior(*var));
            }
        }

        for (var, value) in std::mem::take(&mut self.staged_values).inner.into_iter() {
            self.active.insert(var);
            self.values.insert(var, value);
        }

        let staged = std::mem::take(&mut self.staged);
        debug!("{} - committing {} factors", key, staged.len());
        self.factors.extend(staged);

        self.solve(key)
    }

    fn layout(&self) -> (BTreeMap<Key, usize>, usize) {
        let mut offsets = BTreeMap::new();
        let mut size = 0;
        for key in self.active.iter() {
            offsets.insert(*key, size);
            size += key.dim();
        }
        (offsets, size)
    }

    /// Normal equations of the active window, at the current estimate:
    /// returns (H, g) where H is the Gauss-Newton information
    /// and g the cost gradient.
    fn normal_equations(
        &self,
        offsets: &BTreeMap<Key, usize>,
        size: usize,
    ) -> Result<(DMatrix<f64>, DVector<f64>), Error> {
        let mut h = DMatrix::<f64>::zeros(size, size);
        let mut g = DVector::<f64>::zeros(size);

        if let Some(marginal) = &self.marginal {
            let mut indices = Vec::with_capacity(marginal.mean.len());
            let mut delta = DVector::<f64>::zeros(marginal.mean.len());
            for key in marginal.keys.iter() {
                let offset = *offsets.get(key).ok_or(Error::UnknownVariable(*key))?;
                let value = self.values.get(key).ok_or(Error::UnknownVariable(*key))?;
                for (d, x) in value.iter().enumerate() {
                    let row = indices.len();
                    delta[row] = x - marginal.mean[row];
                    indices.push(offset + d);
                }
            }
            let gradient = &marginal.information * delta;
            for (a, ia) in indices.iter().enumerate() {
                g[*ia] += gradient[a];
                for (b, ib) in indices.iter().enumerate() {
                    h[(*ia, *ib)] += marginal.information[(a, b)];
                }
            }
        }

        for factor in self.factors.values() {
            let linearized = factor.linearize(&self.values)?;
            for (key_a, j_a) in linearized.jacobians.iter() {
                let offset_a = *offsets.get(key_a).ok_or(Error::UnknownVariable(*key_a))?;
                let jte = j_a.transpose() * &linearized.error;
                for (i, v) in jte.iter().enumerate() {
                    g[offset_a + i] += v;
                }
                for (key_b, j_b) in linearized.jacobians.iter() {
                    let offset_b = *offsets.get(key_b).ok_or(Error::UnknownVariable(*key_b))?;
                    let jtj = j_a.transpose() * j_b;
                    for i in 0..jtj.nrows() {
                        for j in 0..jtj.ncols() {
                            h[(offset_a + i, offset_b + j)] += jtj[(i, j)];
                        }
                    }
                }
            }
        }

        Ok((h, g))
    }

    /// Fatal: the system of epoch `key` cannot be solved.
    fn divergence(&self, key: u32) -> Error {
        error!(
            "{} - solver diverged (last good epoch: {:?})",
            key, self.last_good_key
        );
        Error::SolverDivergence {
            last_good_key: self.last_good_key,
        }
    }

    fn solve(&mut self, key: u32) -> Result<(), Error> {
        let (offsets, size) = self.layout();
        if size == 0 {
            return Ok(());
        }

        for iteration in 0..self.opts.max_iterations.max(1) {
            let (h, g) = self.normal_equations(&offsets, size)?;
            let cholesky = h.cholesky().ok_or_else(|| self.divergence(key))?;
            let dx = cholesky.solve(&(-g));

            if dx.iter().any(|v| !v.is_finite()) {
                return Err(self.divergence(key));
            }

            for (var, offset) in offsets.iter() {
                if let Some(value) = self.values.get_mut(var) {
                    for d in 0..value.len() {
                        value[d] += dx[offset + d];
                    }
                }
            }

            let norm = dx.norm();
            trace!("{} - iteration #{}: |dx|={:.3E}", key, iteration, norm);

            if norm < self.opts.relinearize_threshold {
                break;
            }
        }

        self.last_good_key = Some(key);
        Ok(())
    }

    /// Closes the current epoch. The information of the active window is
    /// marginalized onto the latest state and the non retired phase
    /// biases. Sealed factors can no longer be removed.
    pub fn seal(&mut self) -> Result<(), Error> {
        let (offsets, size) = self.layout();
        if size == 0 {
            return Ok(());
        }

        let latest = self
            .active
            .iter()
            .filter_map(|k| match k {
                Key::State(key) => Some(*key),
                _ => None,
            })
            .max();

        let (kept, dropped): (Vec<Key>, Vec<Key>) =
            self.active.iter().copied().partition(|k| match k {
                Key::State(key) => Some(*key) == latest,
                Key::Bias(..) => !self.retired.contains(k),
            });

        let (h, g) = self.normal_equations(&offsets, size)?;

        let index = |keys: &[Key]| -> Vec<usize> {
            keys.iter()
                .flat_map(|k| {
                    let offset = offsets.get(k).copied().unwrap_or_default();
                    offset..offset + k.dim()
                })
                .collect()
        };

        let (ik, im) = (index(&kept), index(&dropped));

        let h_kk = h.select_rows(&ik).select_columns(&ik);
        let g_k = g.select_rows(&ik);

        let (information, gradient) = if im.is_empty() {
            (h_kk, g_k)
        } else {
            let h_km = h.select_rows(&ik).select_columns(&im);
            let h_mm = h.select_rows(&im).select_columns(&im);
            let g_m = g.select_rows(&im);
            let cholesky = h_mm
                .cholesky()
                .ok_or_else(|| Error::SolverDivergence {
                    last_good_key: self.last_good_key,
                })?;
            let information = &h_kk - &h_km * cholesky.solve(&h_km.transpose());
            let gradient = &g_k - &h_km * cholesky.solve(&g_m);
            (information, gradient)
        };

        let information = (&information + information.transpose()) * 0.5;

        let mut mean = DVector::<f64>::zeros(ik.len());
        let mut row = 0;
        for k in kept.iter() {
            if let Some(value) = self.values.get(k) {
                for x in value.iter() {
                    mean[row] = *x;
                    row += 1;
                }
            }
        }

        if gradient.iter().any(|v| *v != 0.0) {
            if let Some(cholesky) = information.clone().cholesky() {
                mean -= cholesky.solve(&gradient);
            }
        }

        debug!(
            "sealed: {} active variables, {} marginalized",
            kept.len(),
            dropped.len()
        );

        for k in dropped.iter() {
            self.active.remove(k);
            self.retired.remove(k);
        }

        self.factors.clear();
        self.marginal = if kept.is_empty() {
            None
        } else {
            Some(Marginal {
                keys: kept,
                information,
                mean,
            })
        };

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::Constellation;

    fn state(values: [f64; 5]) -> DVector<f64> {
        DVector::from_column_slice(&values)
    }

    fn sv(prn: u8) -> SV {
        SV::new(Constellation::GPS, prn)
    }

    /// Seven well spread line of sights, at distinct elevations
    fn partials() -> Vec<Partials> {
        [
            (0.0, 0.0, 1.0),
            (0.8, 0.0, 0.6),
            (-0.7, 0.0, 0.714),
            (0.0, 0.9, 0.436),
            (0.0, -0.5, 0.866),
            (0.6, 0.6, 0.529),
            (-0.4, 0.4, 0.825),
        ]
        .iter()
        .map(|(x, y, z)| {
            let los = Vector3::new(*x, *y, *z).normalize();
            Partials::new(los[0], los[1], los[2], 1.0 / los[2], 1.0)
        })
        .collect()
    }

    fn opts() -> EstimatorOpts {
        EstimatorOpts {
            relinearize_threshold: 1.0E-9,
            ..Default::default()
        }
    }

    #[test]
    fn prior_only() {
        let mut estimator = Estimator::new(&opts());
        estimator.insert(Key::State(1), state([0.0; 5])).unwrap();
        estimator
            .add_prior(Key::State(1), state([1.0, 2.0, 3.0, 4.0, 5.0]), &[1.0E-2; 5])
            .unwrap();
        estimator.commit(1).unwrap();

        let x = estimator.estimate().state(1).unwrap();
        assert!((x.dx - 1.0).abs() < 1.0E-9);
        assert!((x.clock - 5.0).abs() < 1.0E-9);
        assert_eq!(NonBiasState::from_vector(&x.to_vector()), x);
        assert_eq!(estimator.last_good_key(), Some(1));
    }

    #[test]
    fn invalid_operations() {
        let mut estimator = Estimator::new(&opts());
        let x = Key::State(1);
        let b = Key::Bias(sv(1), 0);

        estimator.insert(x, state([0.0; 5])).unwrap();
        assert_eq!(
            estimator.insert(x, state([0.0; 5])),
            Err(Error::DuplicateVariable(x))
        );
        assert_eq!(
            estimator.insert(b, state([0.0; 5])),
            Err(Error::DimensionMismatch(b))
        );
        assert_eq!(
            estimator.add_prior(b, DVector::zeros(1), &[1.0]),
            Err(Error::UnknownVariable(b))
        );
        assert_eq!(estimator.drop_staged(&[42]), Err(Error::UnknownFactor(42)));
        assert_eq!(estimator.remove_committed(&[42]), Err(Error::UnknownFactor(42)));

        // bias without prior
        estimator.insert(b, DVector::zeros(1)).unwrap();
        let model = Rc::new(MixtureModel::nominal(2.5, 0.25).unwrap());
        estimator
            .add_observation(x, b, partials()[0], Vector2::zeros(), model)
            .unwrap();
        assert_eq!(estimator.commit(1), Err(Error::MissingPrior(b)));
    }

    #[test]
    fn least_squares() {
        let truth = [1.5, -0.7, 2.0, 0.3, 12.0];
        let biases = [3.0, -2.0, 10.0, 0.5, -7.5, 1.0, 4.0];
        let truth_v = SVector::<f64, 5>::from(truth);

        let mut estimator = Estimator::new(&opts());
        let model = Rc::new(MixtureModel::nominal(2.5, 0.25).unwrap());

        estimator.insert(Key::State(1), state([0.0; 5])).unwrap();
        estimator
            .add_prior(Key::State(1), state([0.0; 5]), &[1.0E10; 5])
            .unwrap();

        let mut ids = Vec::new();
        for (i, h) in partials().iter().enumerate() {
            let b = Key::Bias(sv(i as u8 + 1), 0);
            estimator.insert(b, DVector::zeros(1)).unwrap();
            estimator.add_prior(b, DVector::zeros(1), &[3.0E6]).unwrap();
            let range = h.dot(&truth_v);
            ids.push(
                estimator
                    .add_observation(
                        Key::State(1),
                        b,
                        *h,
                        Vector2::new(range, range + biases[i]),
                        Rc::clone(&model),
                    )
                    .unwrap(),
            );
        }

        estimator.commit(1).unwrap();

        let x = estimator.estimate().state_vector(&Key::State(1)).unwrap();
        assert!((x - truth_v).norm() < 1.0E-3, "estimate: {}", x);

        for (i, id) in ids.iter().enumerate() {
            let r = estimator.residual(*id).unwrap();
            assert!(r.norm() < 1.0E-3);
            let b = estimator.estimate().bias(sv(i as u8 + 1), 0).unwrap();
            assert!((b - biases[i]).abs() < 1.0E-2);
        }

        // removing one observation, then solving again
        estimator.remove_committed(&ids[6..]).unwrap();
        assert_eq!(estimator.committed_len(), 1 + 7 + 6);
        estimator.commit(1).unwrap();
        let x = estimator.estimate().state_vector(&Key::State(1)).unwrap();
        assert!((x - truth_v).norm() < 1.0E-3);

        assert_eq!(
            estimator.residual(ids[6]),
            Err(Error::UnknownFactor(ids[6]))
        );
    }

    #[test]
    fn sealed_information() {
        let mut estimator = Estimator::new(&opts());
        let b = Key::Bias(sv(1), 0);

        estimator.insert(Key::State(1), state([0.0; 5])).unwrap();
        estimator
            .add_prior(Key::State(1), state([1.0, 1.0, 1.0, 1.0, 1.0]), &[1.0E-4; 5])
            .unwrap();
        estimator.insert(b, DVector::from_element(1, 5.0)).unwrap();
        estimator
            .add_prior(b, DVector::from_element(1, 5.0), &[1.0E-2])
            .unwrap();
        estimator.commit(1).unwrap();
        estimator.seal().unwrap();
        assert_eq!(estimator.committed_len(), 0);

        estimator.insert(Key::State(2), state([0.0; 5])).unwrap();
        estimator
            .add_between(Key::State(1), Key::State(2), state([0.0; 5]), &[1.0E-4; 5])
            .unwrap();
        estimator.commit(2).unwrap();

        // prior information survived sealing
        let x2 = estimator.estimate().state(2).unwrap();
        assert!((x2.dx - 1.0).abs() < 1.0E-3);
        assert!((estimator.estimate().bias(sv(1), 0).unwrap() - 5.0).abs() < 1.0E-6);

        // older state leaves the active window, keeps its estimate
        estimator.seal().unwrap();
        assert!(!estimator.is_active(&Key::State(1)));
        assert!(estimator.is_active(&Key::State(2)));
        assert!(estimator.estimate().state(1).is_some());

        // retired arcs leave the window at next seal
        estimator.retire(&b).unwrap();
        assert!(estimator.is_active(&b));
        estimator.seal().unwrap();
        assert!(!estimator.is_active(&b));
        assert_eq!(estimator.retire(&b), Err(Error::UnknownVariable(b)));
    }

    #[test]
    fn unconstrained_state() {
        let mut estimator = Estimator::new(&opts());
        estimator.insert(Key::State(1), state([0.0; 5])).unwrap();
        estimator
            .add_prior(Key::State(1), state([0.0; 5]), &[1.0; 5])
            .unwrap();
        estimator.commit(1).unwrap();
        estimator.seal().unwrap();
        assert_eq!(estimator.last_good_key(), Some(1));

        // nothing ties X(2) to the window
        estimator.insert(Key::State(2), state([0.0; 5])).unwrap();
        assert_eq!(
            estimator.commit(2),
            Err(Error::SolverDivergence {
                last_good_key: Some(1)
            })
        );
        assert_eq!(estimator.last_good_key(), Some(1));
    }

    #[test]
    fn dropped_variables() {
        let mut estimator = Estimator::new(&opts());
        let x = Key::State(3);
        let b = Key::Bias(sv(2), 0);
        let model = Rc::new(MixtureModel::nominal(2.5, 0.25).unwrap());

        estimator.insert(x, state([0.0; 5])).unwrap();
        estimator.insert(b, DVector::zeros(1)).unwrap();
        let prior = estimator.add_prior(b, DVector::zeros(1), &[3.0E6]).unwrap();
        let obs = estimator
            .add_observation(x, b, partials()[0], Vector2::zeros(), model)
            .unwrap();

        let dropped = estimator.drop_variable(&x).unwrap();
        assert_eq!(dropped, vec![obs]);
        assert!(estimator.is_staged(&b));
        assert_eq!(estimator.staged_len(), 1);
        assert_eq!(estimator.drop_staged(&[prior]), Ok(()));
        assert_eq!(estimator.staged_len(), 0);
    }
}
