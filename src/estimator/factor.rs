use std::rc::Rc;

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};

use crate::{
    error::Error,
    estimator::{Key, Values, STATE_DIM},
    geometry::Partials,
    mixture::MixtureModel,
};

/// Independent Gaussian noise, one standard deviation per dimension
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalNoise {
    sigmas: DVector<f64>,
}

impl DiagonalNoise {
    /// Builds [DiagonalNoise] from strictly positive variances
    pub fn from_variances(variances: &[f64]) -> Result<Self, Error> {
        if variances.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
            return Err(Error::NonPositiveDefinite);
        }
        Ok(Self {
            sigmas: DVector::from_iterator(variances.len(), variances.iter().map(|v| v.sqrt())),
        })
    }

    /// Dimension
    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    fn whiten_vector(&self, v: &DVector<f64>) -> DVector<f64> {
        v.component_div(&self.sigmas)
    }

    fn whiten_matrix(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = m.clone();
        for (i, sigma) in self.sigmas.iter().enumerate() {
            for j in 0..out.ncols() {
                out[(i, j)] /= sigma;
            }
        }
        out
    }
}

/// Whitened linearization of one [Factor]
#[derive(Debug, Clone)]
pub struct Linearized {
    /// Whitened error
    pub error: DVector<f64>,
    /// Whitened Jacobian, per variable
    pub jacobians: Vec<(Key, DMatrix<f64>)>,
}

/// Anchors one variable to a value
#[derive(Debug, Clone)]
pub struct PriorFactor {
    pub key: Key,
    pub value: DVector<f64>,
    pub noise: DiagonalNoise,
}

/// Relative constraint between two states
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    pub from: Key,
    pub to: Key,
    /// Expected `to - from` difference
    pub value: DVector<f64>,
    pub noise: DiagonalNoise,
}

/// Range and phase observation of one satellite. The noise model is
/// a max-mixture: the component whose N(mean, Σ) best explains the current
/// residual defines the whitening.
#[derive(Debug, Clone)]
pub struct ObservationFactor {
    pub state: Key,
    pub bias: Key,
    /// Partial derivatives of the observation
    pub partials: Partials,
    /// Measured (range, phase) prefit residuals [m]
    pub measured: Vector2<f64>,
    /// Snapshot of the noise model in use when this factor was created
    pub model: Rc<MixtureModel>,
}

impl ObservationFactor {
    /// Predicted (range, phase) correction at `values`
    pub fn predict(&self, values: &Values) -> Result<Vector2<f64>, Error> {
        let state = values
            .state_vector(&self.state)
            .ok_or(Error::UnknownVariable(self.state))?;
        let bias = values
            .scalar(&self.bias)
            .ok_or(Error::UnknownVariable(self.bias))?;
        let range = self.partials.dot(&state);
        Ok(Vector2::new(range, range + bias))
    }

    /// Measured minus predicted, at `values`
    pub fn residual(&self, values: &Values) -> Result<Vector2<f64>, Error> {
        Ok(self.measured - self.predict(values)?)
    }

    fn linearize(&self, values: &Values) -> Result<Linearized, Error> {
        let residual = self.residual(values)?;
        let (index, _) = self.model.best_fit(&residual);
        let component = self.model.get(index).ok_or(Error::EmptyMixture)?;
        let whitening: &Matrix2<f64> = component.sqrt_information();

        let error = whitening * (component.mean - residual);

        let mut j_state = DMatrix::<f64>::zeros(2, STATE_DIM);
        for i in 0..STATE_DIM {
            j_state[(0, i)] = self.partials[i];
            j_state[(1, i)] = self.partials[i];
        }
        let j_bias = DMatrix::<f64>::from_column_slice(2, 1, &[0.0, 1.0]);

        let w = DMatrix::<f64>::from_iterator(2, 2, whitening.iter().copied());

        Ok(Linearized {
            error: DVector::from_column_slice(error.as_slice()),
            jacobians: vec![(self.state, &w * j_state), (self.bias, &w * j_bias)],
        })
    }
}

/// Estimation [Factor]s
#[derive(Debug, Clone)]
pub enum Factor {
    Prior(PriorFactor),
    Between(BetweenFactor),
    Observation(ObservationFactor),
}

impl Factor {
    /// Variables this [Factor] connects
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Self::Prior(f) => vec![f.key],
            Self::Between(f) => vec![f.from, f.to],
            Self::Observation(f) => vec![f.state, f.bias],
        }
    }

    /// True if this [Factor] connects `key`
    pub fn involves(&self, key: &Key) -> bool {
        self.keys().contains(key)
    }

    /// True if this is a [PriorFactor] on `key`
    pub fn is_prior_on(&self, key: &Key) -> bool {
        matches!(self, Self::Prior(f) if f.key == *key)
    }

    /// Whitened linearization at `values`
    pub fn linearize(&self, values: &Values) -> Result<Linearized, Error> {
        match self {
            Self::Prior(f) => {
                let x = values.get(&f.key).ok_or(Error::UnknownVariable(f.key))?;
                let dim = x.len();
                Ok(Linearized {
                    error: f.noise.whiten_vector(&(x - &f.value)),
                    jacobians: vec![(f.key, f.noise.whiten_matrix(&DMatrix::identity(dim, dim)))],
                })
            },
            Self::Between(f) => {
                let from = values.get(&f.from).ok_or(Error::UnknownVariable(f.from))?;
                let to = values.get(&f.to).ok_or(Error::UnknownVariable(f.to))?;
                let dim = from.len();
                let identity = DMatrix::<f64>::identity(dim, dim);
                Ok(Linearized {
                    error: f.noise.whiten_vector(&(to - from - &f.value)),
                    jacobians: vec![
                        (f.from, f.noise.whiten_matrix(&(-&identity))),
                        (f.to, f.noise.whiten_matrix(&identity)),
                    ],
                })
            },
            Self::Observation(f) => f.linearize(values),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::{Constellation, SV};

    #[test]
    fn whitened_observation() {
        let mut values = Values::default();
        let sv = SV::new(Constellation::GPS, 1);
        values.insert(Key::State(1), DVector::from_column_slice(&[1.0, 0.0, 0.0, 0.0, 2.0]));
        values.insert(Key::Bias(sv, 0), DVector::from_element(1, 10.0));

        let model = Rc::new(MixtureModel::nominal(2.0, 0.5).unwrap());
        let factor = ObservationFactor {
            state: Key::State(1),
            bias: Key::Bias(sv, 0),
            partials: Partials::new(1.0, 0.0, 0.0, 1.0, 1.0),
            measured: Vector2::new(7.0, 13.5),
            model,
        };

        // predicted: range 3, phase 13
        assert_eq!(factor.predict(&values).unwrap(), Vector2::new(3.0, 13.0));
        assert_eq!(factor.residual(&values).unwrap(), Vector2::new(4.0, 0.5));

        let lin = factor.linearize(&values).unwrap();
        assert!((lin.error[0] + 2.0).abs() < 1.0E-12);
        assert!((lin.error[1] + 1.0).abs() < 1.0E-12);
        assert_eq!(lin.jacobians[0].1[(0, 0)], 0.5);
        assert_eq!(lin.jacobians[0].1[(1, 4)], 2.0);
        assert_eq!(lin.jacobians[1].1[(0, 0)], 0.0);
        assert_eq!(lin.jacobians[1].1[(1, 0)], 2.0);
    }

    #[test]
    fn invalid_noise() {
        assert_eq!(
            DiagonalNoise::from_variances(&[1.0, 0.0]).err(),
            Some(Error::NonPositiveDefinite)
        );
        assert_eq!(DiagonalNoise::from_variances(&[1.0, 4.0]).unwrap().dim(), 2);
    }
}
