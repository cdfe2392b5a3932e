//! Fitted Gaussian mixtures over box vectors `[x, y, w, h]`.
//!
//! Mixtures arrive pre-fitted from the evidence store; this module only
//! evaluates log-densities and draws samples. Parameters are validated and
//! the covariance Cholesky factors computed once, at deserialization.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::normalize::log_sum_exp;
use crate::core::errors::{Result, RqsError};

/// Dimensionality of a box vector.
pub const DIM: usize = 4;

type Vector = [f64; DIM];
type Matrix = [[f64; DIM]; DIM];

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Serialized mixture parameters as written by the fitting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    /// Component weights; normalized at construction.
    pub weights: Vec<f64>,
    /// Component means as `[x, y, w, h]`.
    pub means: Vec<Vector>,
    /// Full covariance per component; must be positive definite.
    pub covariances: Vec<Matrix>,
}

#[derive(Debug, Clone, PartialEq)]
struct Component {
    log_weight: f64,
    mean: Vector,
    /// Lower-triangular Cholesky factor of the covariance.
    chol: Matrix,
    /// `-0.5 * (d ln 2π + ln |Σ|)`.
    log_norm: f64,
}

/// A validated full-covariance Gaussian mixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MixtureParams", into = "MixtureParams")]
pub struct GaussianMixture {
    params: MixtureParams,
    components: Vec<Component>,
    selector: Vec<f64>,
}

impl TryFrom<MixtureParams> for GaussianMixture {
    type Error = RqsError;

    fn try_from(params: MixtureParams) -> Result<Self> {
        Self::new(params)
    }
}

impl From<GaussianMixture> for MixtureParams {
    fn from(value: GaussianMixture) -> Self {
        value.params
    }
}

impl GaussianMixture {
    /// Validate parameters and factor every covariance once.
    pub fn new(params: MixtureParams) -> Result<Self> {
        let k = params.weights.len();
        if k == 0 {
            return Err(RqsError::store("mixture", "no components"));
        }
        if params.means.len() != k || params.covariances.len() != k {
            return Err(RqsError::store(
                "mixture",
                format!(
                    "{k} weights but {} means and {} covariances",
                    params.means.len(),
                    params.covariances.len()
                ),
            ));
        }
        if params.weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(RqsError::store("mixture", "weights must be positive"));
        }
        let total: f64 = params.weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(RqsError::store(
                "mixture",
                format!("weights sum to {total}, expected 1"),
            ));
        }

        let mut components = Vec::with_capacity(k);
        for ((weight, mean), cov) in params
            .weights
            .iter()
            .zip(&params.means)
            .zip(&params.covariances)
        {
            let chol = cholesky(cov)?;
            let log_det: f64 = (0..DIM).map(|i| 2.0 * chol[i][i].ln()).sum();
            components.push(Component {
                log_weight: weight.ln(),
                mean: *mean,
                chol,
                log_norm: -0.5 * (DIM as f64).mul_add(LN_2PI, log_det),
            });
        }

        let selector = params.weights.clone();
        Ok(Self {
            params,
            components,
            selector,
        })
    }

    /// Single-component mixture with a diagonal covariance.
    pub fn isotropic(mean: Vector, variance: f64) -> Result<Self> {
        let mut cov = [[0.0; DIM]; DIM];
        for (i, row) in cov.iter_mut().enumerate() {
            row[i] = variance;
        }
        Self::new(MixtureParams {
            weights: vec![1.0],
            means: vec![mean],
            covariances: vec![cov],
        })
    }

    /// Log-density of one point under the mixture.
    #[must_use]
    pub fn log_density(&self, x: &Vector) -> f64 {
        let per_component: Vec<f64> = self
            .components
            .iter()
            .map(|c| c.log_weight + c.log_norm - 0.5 * mahalanobis_sq(&c.chol, &c.mean, x))
            .collect();
        log_sum_exp(&per_component)
    }

    /// Most likely point among the component means.
    #[must_use]
    pub fn mode_estimate(&self) -> Vector {
        let densities: Vec<f64> = self
            .components
            .iter()
            .map(|c| self.log_density(&c.mean))
            .collect();
        let best = super::normalize::argmax(&densities).unwrap_or(0);
        self.components[best].mean
    }

    /// Log-density of each point, in order.
    #[must_use]
    pub fn log_density_batch(&self, xs: &[Vector]) -> Vec<f64> {
        xs.iter().map(|x| self.log_density(x)).collect()
    }

    /// Draw `n` points.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Vector> {
        // Weights were validated positive at construction.
        let picker = WeightedIndex::new(&self.selector).ok();
        (0..n)
            .map(|_| {
                let idx = picker.as_ref().map_or(0, |p| p.sample(rng));
                let c = &self.components[idx];
                let z: Vector = std::array::from_fn(|_| rng.sample(StandardNormal));
                let mut out = c.mean;
                for (i, slot) in out.iter_mut().enumerate() {
                    for (j, zj) in z.iter().enumerate().take(i + 1) {
                        *slot += c.chol[i][j] * zj;
                    }
                }
                out
            })
            .collect()
    }
}

fn cholesky(cov: &Matrix) -> Result<Matrix> {
    for i in 0..DIM {
        for j in 0..i {
            if (cov[i][j] - cov[j][i]).abs() > 1e-9 * (1.0 + cov[i][j].abs()) {
                return Err(RqsError::store("mixture", "covariance is not symmetric"));
            }
        }
    }
    let mut l = [[0.0; DIM]; DIM];
    for i in 0..DIM {
        for j in 0..=i {
            let partial: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let diag = cov[i][i] - partial;
                if !(diag.is_finite() && diag > 0.0) {
                    return Err(RqsError::store(
                        "mixture",
                        "covariance is not positive definite",
                    ));
                }
                l[i][j] = diag.sqrt();
            } else {
                l[i][j] = (cov[i][j] - partial) / l[j][j];
            }
        }
    }
    Ok(l)
}

/// `|L⁻¹ (x − μ)|²` by forward substitution.
fn mahalanobis_sq(chol: &Matrix, mean: &Vector, x: &Vector) -> f64 {
    let mut y = [0.0; DIM];
    for i in 0..DIM {
        let partial: f64 = (0..i).map(|k| chol[i][k] * y[k]).sum();
        y[i] = (x[i] - mean[i] - partial) / chol[i][i];
    }
    y.iter().map(|v| v * v).sum()
}
