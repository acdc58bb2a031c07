//! Truncated variational Dirichlet process Gaussian mixture
use std::f64::consts::{LN_2, PI};

use itertools::Itertools;
use log::{debug, trace};
use nalgebra::{DMatrix, Matrix2, Vector2};
use statrs::function::gamma::digamma;

use crate::{
    cfg::ClusteringOpts,
    clustering::{Cluster, Clustering, DensityEstimator},
    error::Error,
};

/// Dimension of the residual space
const DIM: f64 = 2.0;

/// Normal-Wishart prior shared by all clusters
#[derive(Debug, Clone)]
struct Prior {
    mean: Vector2<f64>,
    beta: f64,
    w_inv: Matrix2<f64>,
    nu: f64,
}

impl Prior {
    /// Weakly informative prior centered on the batch: the expected
    /// precision of a cluster equals the inverse of the batch covariance.
    fn from_samples(samples: &[Vector2<f64>]) -> Self {
        let n = samples.len() as f64;
        let mean = samples.iter().fold(Vector2::zeros(), |acc, x| acc + x) / n;
        let mut cov = samples.iter().fold(Matrix2::zeros(), |acc, x| {
            let d = x - mean;
            acc + d * d.transpose()
        }) / n;

        if cov.determinant() <= 1.0E-12 || cov.cholesky().is_none() {
            cov = Matrix2::from_diagonal(&Vector2::new(
                cov[(0, 0)].max(1.0E-6),
                cov[(1, 1)].max(1.0E-6),
            ));
        }

        let nu = DIM + 1.0;
        Self {
            mean,
            beta: 0.1,
            w_inv: cov * nu,
            nu,
        }
    }
}

/// Variational posterior of one cluster
#[derive(Debug, Clone)]
struct Posterior {
    n: f64,
    beta: f64,
    mean: Vector2<f64>,
    w: Matrix2<f64>,
    w_inv: Matrix2<f64>,
    nu: f64,
}

impl Posterior {
    fn update(
        prior: &Prior,
        resp: &DMatrix<f64>,
        k: usize,
        samples: &[Vector2<f64>],
    ) -> Result<Self, Error> {
        let n = resp.column(k).sum();

        let (x_bar, s) = if n > 1.0E-12 {
            let x_bar = samples
                .iter()
                .enumerate()
                .fold(Vector2::zeros(), |acc, (i, x)| acc + x * resp[(i, k)])
                / n;
            let s = samples
                .iter()
                .enumerate()
                .fold(Matrix2::zeros(), |acc, (i, x)| {
                    let d = x - x_bar;
                    acc + d * d.transpose() * resp[(i, k)]
                })
                / n;
            (x_bar, s)
        } else {
            (prior.mean, Matrix2::zeros())
        };

        let beta = prior.beta + n;
        let mean = (prior.mean * prior.beta + x_bar * n) / beta;

        let dm = x_bar - prior.mean;
        let w_inv = prior.w_inv + s * n + dm * dm.transpose() * (prior.beta * n / beta);
        let w = w_inv.try_inverse().ok_or(Error::MatrixInversion)?;

        Ok(Self {
            n,
            beta,
            mean,
            w,
            w_inv,
            nu: prior.nu + n,
        })
    }

    /// E[ln |Λ|]
    fn expected_log_det(&self) -> f64 {
        digamma(self.nu / 2.0) + digamma((self.nu - 1.0) / 2.0) + DIM * LN_2 + self.w.determinant().ln()
    }

    /// E[(x - μ)ᵀ Λ (x - μ)]
    fn expected_quad(&self, x: &Vector2<f64>) -> f64 {
        let d = x - self.mean;
        DIM / self.beta + self.nu * (d.transpose() * self.w * d)[(0, 0)]
    }
}

/// [VariationalDirichletProcess] fits a Gaussian mixture with an unknown
/// number of components, using the truncated stick-breaking representation
/// of a Dirichlet process and Normal-Wishart cluster priors.
/// Initialization is deterministic (maximin seeding), so the fit of a given
/// batch is always the same.
#[derive(Debug, Clone, Default)]
pub struct VariationalDirichletProcess {
    opts: ClusteringOpts,
}

impl VariationalDirichletProcess {
    /// Builds a new [VariationalDirichletProcess]
    pub fn new(opts: ClusteringOpts) -> Self {
        Self { opts }
    }

    /// Maximin seeding: first seed is the sample furthest from the prior mean,
    /// every next seed is the sample furthest from all existing seeds.
    fn seeds(samples: &[Vector2<f64>], prior: &Prior, k: usize) -> Vec<usize> {
        let metric = (prior.w_inv / prior.nu)
            .try_inverse()
            .unwrap_or_else(Matrix2::identity);
        let dist = |a: &Vector2<f64>, b: &Vector2<f64>| {
            let d = a - b;
            (d.transpose() * metric * d)[(0, 0)]
        };

        let mut seeds = Vec::with_capacity(k);
        let mut nearest = samples
            .iter()
            .map(|x| dist(x, &prior.mean))
            .collect::<Vec<_>>();

        while seeds.len() < k {
            let next = nearest
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, d)| {
                    if *d > best.1 {
                        (i, *d)
                    } else {
                        best
                    }
                })
                .0;
            seeds.push(next);
            for (i, x) in samples.iter().enumerate() {
                let d = dist(x, &samples[next]);
                if seeds.len() == 1 || d < nearest[i] {
                    nearest[i] = d;
                }
            }
        }
        seeds
    }

    /// Hard assignment to the nearest seed
    fn initial_responsibilities(samples: &[Vector2<f64>], seeds: &[usize]) -> DMatrix<f64> {
        let mut resp = DMatrix::<f64>::zeros(samples.len(), seeds.len());
        for (i, x) in samples.iter().enumerate() {
            let k = seeds
                .iter()
                .map(|s| (x - samples[*s]).norm_squared())
                .position_min_by(|a, b| a.total_cmp(b))
                .unwrap_or(0);
            resp[(i, k)] = 1.0;
        }
        resp
    }

    /// Expected log weights E[ln π_k] from the stick-breaking posterior
    fn expected_log_weights(&self, posteriors: &[Posterior]) -> Vec<f64> {
        let size = posteriors.len();
        let mut out = Vec::with_capacity(size);
        let mut tail = posteriors.iter().map(|p| p.n).sum::<f64>();
        let mut acc = 0.0;
        for (k, p) in posteriors.iter().enumerate() {
            tail -= p.n;
            if k == size - 1 {
                out.push(acc);
            } else {
                let (g1, g2) = (1.0 + p.n, self.opts.concentration + tail.max(0.0));
                let psi = digamma(g1 + g2);
                out.push(digamma(g1) - psi + acc);
                acc += digamma(g2) - psi;
            }
        }
        out
    }

    /// Expected weights E[π_k]
    fn expected_weights(&self, posteriors: &[Posterior]) -> Vec<f64> {
        let size = posteriors.len();
        let mut out = Vec::with_capacity(size);
        let mut tail = posteriors.iter().map(|p| p.n).sum::<f64>();
        let mut remaining = 1.0;
        for (k, p) in posteriors.iter().enumerate() {
            tail -= p.n;
            let v = if k == size - 1 {
                1.0
            } else {
                let (g1, g2) = (1.0 + p.n, self.opts.concentration + tail.max(0.0));
                g1 / (g1 + g2)
            };
            out.push(remaining * v);
            remaining *= 1.0 - v;
        }
        out
    }

    fn m_step(
        prior: &Prior,
        resp: &mut DMatrix<f64>,
        samples: &[Vector2<f64>],
    ) -> Result<Vec<Posterior>, Error> {
        let posteriors = (0..resp.ncols())
            .map(|k| Posterior::update(prior, resp, k, samples))
            .collect::<Result<Vec<_>, _>>()?;

        // larger clusters first: the stick-breaking prior favors early sticks
        let order = (0..posteriors.len())
            .sorted_by(|a, b| posteriors[*b].n.total_cmp(&posteriors[*a].n))
            .collect::<Vec<_>>();

        let permuted = DMatrix::from_fn(resp.nrows(), resp.ncols(), |i, k| resp[(i, order[k])]);
        *resp = permuted;

        Ok(order.into_iter().map(|k| posteriors[k].clone()).collect())
    }

    fn e_step(
        &self,
        posteriors: &[Posterior],
        samples: &[Vector2<f64>],
    ) -> DMatrix<f64> {
        let log_weights = self.expected_log_weights(posteriors);
        let log_dets = posteriors
            .iter()
            .map(|p| p.expected_log_det())
            .collect::<Vec<_>>();

        let mut resp = DMatrix::<f64>::zeros(samples.len(), posteriors.len());
        for (i, x) in samples.iter().enumerate() {
            let mut max = f64::NEG_INFINITY;
            for (k, p) in posteriors.iter().enumerate() {
                let log_rho = log_weights[k] + 0.5 * log_dets[k]
                    - (2.0 * PI).ln()
                    - 0.5 * p.expected_quad(x);
                resp[(i, k)] = log_rho;
                max = max.max(log_rho);
            }
            let mut sum = 0.0;
            for k in 0..posteriors.len() {
                let rho = (resp[(i, k)] - max).exp();
                resp[(i, k)] = rho;
                sum += rho;
            }
            for k in 0..posteriors.len() {
                resp[(i, k)] /= sum;
            }
        }
        resp
    }
}

impl DensityEstimator for VariationalDirichletProcess {
    fn fit(&self, samples: &[Vector2<f64>]) -> Result<Clustering, Error> {
        if samples.is_empty() {
            return Err(Error::NotEnoughResiduals(0));
        }

        let prior = Prior::from_samples(samples);
        let truncation = self.opts.truncation.clamp(1, samples.len());

        let seeds = Self::seeds(samples, &prior, truncation);
        let mut resp = Self::initial_responsibilities(samples, &seeds);

        let mut iterations = 0;
        for _ in 0..self.opts.max_iterations {
            iterations += 1;
            let posteriors = Self::m_step(&prior, &mut resp, samples)?;
            let updated = self.e_step(&posteriors, samples);

            let delta = (&updated - &resp).amax();
            resp = updated;

            trace!("vdp iteration #{}: delta={:.3E}", iterations, delta);
            if !delta.is_finite() {
                return Err(Error::MatrixInversion);
            }
            if delta < self.opts.tolerance {
                break;
            }
        }

        let posteriors = Self::m_step(&prior, &mut resp, samples)?;
        let weights = self.expected_weights(&posteriors);

        let argmax = (0..samples.len())
            .map(|i| {
                resp.row(i)
                    .iter()
                    .position_max_by(|a, b| a.total_cmp(b))
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();

        let mut kept = (0..posteriors.len())
            .filter(|k| weights[*k] >= self.opts.min_weight && argmax.contains(k))
            .collect::<Vec<_>>();

        if kept.is_empty() {
            // posteriors are sorted: first one is the most populated
            kept.push(0);
        }

        let assignments = (0..samples.len())
            .map(|i| {
                kept.iter()
                    .position_max_by(|a, b| resp[(i, **a)].total_cmp(&resp[(i, **b)]))
                    .unwrap_or(0)
            })
            .collect::<Vec<_>>();

        let total = kept.iter().map(|k| weights[*k]).sum::<f64>();

        let clusters = kept
            .iter()
            .map(|k| {
                let p = &posteriors[*k];
                Cluster {
                    weight: weights[*k] / total,
                    mean: p.mean,
                    covariance: p.w_inv / p.nu,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "vdp: {} samples, {} clusters ({} iterations)",
            samples.len(),
            clusters.len(),
            iterations
        );

        Ok(Clustering {
            assignments,
            clusters,
        })
    }
}
