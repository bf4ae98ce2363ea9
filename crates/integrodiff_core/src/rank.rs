//! Minimal linear recurrence among successive kernel derivatives.
//!
//! The basis [f, f', ..., f^(n-1)] grows one column at a time. At each order
//! the next derivative is regressed on the basis; the search stops at the first
//! order whose derivative adds no numerical rank, keeping that regression as
//! the recurrence. Near-degenerate samples can stop the search early: the rule
//! is a heuristic, not a certificate of minimality.
//!
//! Columns are central differences, so the recurrence found here is the one
//! among differences; `companion::derivative_recurrence` maps it back.

use crate::error::{RealizationError, RealizationResult};
use crate::sampler::{DerivativeSet, Sampler};
use crate::traits::Kernel;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Numerical rank policy for the recurrence search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankPolicy {
    /// Largest recurrence order accepted.
    pub max_rank: usize,
    /// Singular values below `rank_tolerance * sigma_max` of the
    /// column-normalized regression count as zero.
    pub rank_tolerance: f64,
    /// Multiplier on the finite-difference roundoff estimate of each column.
    /// Singular values under the combined estimate count as zero, and a
    /// column under its own estimate is a vanished derivative.
    pub noise_factor: f64,
}

impl Default for RankPolicy {
    fn default() -> Self {
        Self {
            max_rank: 8,
            rank_tolerance: 1e-8,
            noise_factor: 100.0,
        }
    }
}

/// Delta^n f ~ sum_k coefficients[k] * Delta^k f, k < n = rank, where Delta^k
/// is the k-th central difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankFit {
    pub rank: usize,
    pub coefficients: DVector<f64>,
    /// Singular values of the normalized regression that ended the search.
    pub singular_values: Vec<f64>,
}

pub struct RankFinder<'s, 'k, K: Kernel> {
    sampler: &'s Sampler<'k, K>,
    policy: RankPolicy,
}

impl<'s, 'k, K: Kernel> RankFinder<'s, 'k, K> {
    pub fn new(sampler: &'s Sampler<'k, K>, policy: RankPolicy) -> Self {
        Self { sampler, policy }
    }

    pub fn find(&self) -> RealizationResult<RankFit> {
        let mut tower = self.sampler.tower();
        self.find_in(&mut tower)
    }

    /// Runs the search, sampling into `tower` the orders it needs.
    pub fn find_in(&self, tower: &mut DerivativeSet) -> RealizationResult<RankFit> {
        let scale = self.sampler.fill(tower, 0)?.amax();
        if scale == 0.0 {
            return Err(RealizationError::IllConditioned {
                order: 0,
                reason: "kernel vanishes at every sample time".to_string(),
            });
        }

        let mut norms = vec![tower.columns[&0].norm()];
        // Squared roundoff of each normalized column in the basis.
        let mut noise = vec![(self.roundoff(0, scale) / norms[0]).powi(2)];

        for order in 1..=self.policy.max_rank {
            let candidate = self.sampler.fill(tower, order)?.clone();
            let norm = candidate.norm();
            if !norm.is_finite() {
                return Err(RealizationError::IllConditioned {
                    order,
                    reason: "derivative overflowed".to_string(),
                });
            }

            let floor = self.policy.noise_factor * self.roundoff(order, scale);
            if norm <= floor {
                debug!("order {order}: derivative norm {norm:e} below roundoff floor {floor:e}");
                self.check_polynomial(tower, order, scale)?;
                return Ok(RankFit {
                    rank: order,
                    coefficients: DVector::zeros(order),
                    singular_values: Vec::new(),
                });
            }

            let basis = normalized_basis(tower, &norms);
            let unit = &candidate / norm;
            let augmented = append_column(&basis, &unit);
            let singular_values = augmented.singular_values();

            let candidate_noise = (self.roundoff(order, scale) / norm).powi(2);
            let total_noise = noise.iter().sum::<f64>() + candidate_noise;
            let cutoff = (self.policy.rank_tolerance * singular_values.max())
                .max(self.policy.noise_factor * total_noise.sqrt());
            let numerical_rank = singular_values.iter().filter(|&&s| s > cutoff).count();
            trace!(
                "order {order}: singular values {:?}, cutoff {cutoff:e}",
                singular_values.as_slice()
            );

            if numerical_rank == order + 1 {
                debug!("order {order}: derivative adds rank, basis grows to {}", order + 1);
                if order == self.policy.max_rank {
                    break;
                }
                norms.push(norm);
                noise.push(candidate_noise);
                continue;
            }

            let coefficients = self.regress(&basis, &norms, &unit, norm, cutoff)?;
            debug!("order {order}: recurrence found, rank {order}");
            return Ok(RankFit {
                rank: order,
                coefficients,
                singular_values: singular_values.iter().copied().collect(),
            });
        }

        Err(RealizationError::NonConvergence {
            max_rank: self.policy.max_rank,
        })
    }

    /// Least squares on the normalized basis, mapped back to raw columns.
    fn regress(
        &self,
        basis: &DMatrix<f64>,
        norms: &[f64],
        unit: &DVector<f64>,
        norm: f64,
        cutoff: f64,
    ) -> RealizationResult<DVector<f64>> {
        let order = norms.len();
        let svd = basis.clone().svd(true, true);
        let scaled = svd
            .solve(unit, cutoff)
            .map_err(|reason| RealizationError::IllConditioned {
                order,
                reason: reason.to_string(),
            })?;

        let coefficients = DVector::from_iterator(
            order,
            scaled.iter().zip(norms).map(|(x, s)| x * norm / s),
        );
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(RealizationError::IllConditioned {
                order,
                reason: "non-finite recurrence coefficients".to_string(),
            });
        }
        Ok(coefficients)
    }

    /// A vanished order-n difference makes f a polynomial of degree n - 1, so
    /// the order n - 1 column must be constant up to its own roundoff.
    fn check_polynomial(
        &self,
        tower: &DerivativeSet,
        order: usize,
        scale: f64,
    ) -> RealizationResult<()> {
        let previous = &tower.columns[&(order - 1)];
        let mean = previous.mean();
        let spread = previous
            .iter()
            .map(|v| (v - mean).abs())
            .fold(0.0, f64::max);
        let samples = tower.samples() as f64;
        let allowed = self.policy.noise_factor * self.roundoff(order - 1, scale) / samples.sqrt();
        if spread > allowed {
            return Err(RealizationError::IllConditioned {
                order,
                reason: format!(
                    "derivative fell below roundoff but order {} still varies by {spread:e}",
                    order - 1
                ),
            });
        }
        Ok(())
    }

    /// Roundoff norm bound of the order-k central difference: each of the N
    /// samples sums 2^k weighted values of size at most `scale`, over h^k.
    fn roundoff(&self, order: usize, scale: f64) -> f64 {
        let samples = self.sampler.times().len() as f64;
        f64::EPSILON * 2f64.powi(order as i32) * scale * samples.sqrt()
            / self.sampler.step().powi(order as i32)
    }
}

fn normalized_basis(tower: &DerivativeSet, norms: &[f64]) -> DMatrix<f64> {
    let scaled: Vec<DVector<f64>> = norms
        .iter()
        .enumerate()
        .map(|(order, norm)| &tower.columns[&order] / *norm)
        .collect();
    DMatrix::from_columns(&scaled)
}

fn append_column(basis: &DMatrix<f64>, column: &DVector<f64>) -> DMatrix<f64> {
    let n = basis.ncols();
    let mut augmented = basis.clone().insert_column(n, 0.0);
    augmented.set_column(n, column);
    augmented
}
