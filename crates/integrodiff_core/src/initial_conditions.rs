//! Onset derivatives and the basis change that places the kernel's input on a
//! single state coordinate.
//!
//! With y = [f, f', ..., f^(n-1)] obeying dy/dt = A y and y(0) = X0, the
//! change z = P y gives dz/dt = (P A Q) z with Q = P^-1. Q is chosen so that
//! z(0) is a multiple of a unit vector and z_0 = f in both branches.

use crate::companion::{companion_matrix, root_radius};
use crate::differentiate::differentiate_onset;
use crate::error::{RealizationError, RealizationResult};
use crate::traits::Kernel;
use nalgebra::{DMatrix, DVector, RowDVector};
use serde::{Deserialize, Serialize};

/// Which coordinate the kernel's input drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Branch {
    /// f(0) == 0: input enters the last coordinate with unit weight.
    Continuous,
    /// f(0) != 0: input enters the first coordinate with weight f(0).
    Discontinuous,
}

impl Branch {
    /// Exact comparison: f(0) = 1e-300 is already discontinuous.
    pub fn select(initial: &DVector<f64>) -> Self {
        if initial[0] == 0.0 {
            Branch::Continuous
        } else {
            Branch::Discontinuous
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisTransform {
    pub p: DMatrix<f64>,
    pub q: DMatrix<f64>,
}

/// Transformed system M = P A Q with its input coordinate and weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSystem {
    pub matrix: DMatrix<f64>,
    pub nvar: usize,
    pub weight: f64,
    pub branch: Branch,
    pub transform: BasisTransform,
}

/// X0[k] = d^k f / dt^k at 0+, for k < n, from forward differences at the
/// origin. X0[0] is f(0) itself.
///
/// With y = [f, ..., f^(n-1)] and dy/dt = A y, the forward difference of
/// order k at 0 is e_0^T ((e^(A h) - I) / h)^k X0. Solving those n equations
/// removes the stencil's bias for every kernel the recurrence describes.
pub fn initial_derivatives(
    kernel: &impl Kernel,
    companion: &DMatrix<f64>,
    step: f64,
) -> RealizationResult<DVector<f64>> {
    let n = companion.nrows();
    let mut forward = Vec::with_capacity(n);
    for k in 0..n {
        forward.push(differentiate_onset(kernel, 0.0, k, step)?);
    }
    if n < 2 {
        return Ok(DVector::from_vec(forward));
    }

    // Time in units of 1 / scale keeps e^(A h) well scaled.
    let coefficients = companion.row(n - 1).transpose();
    let scale = root_radius(&coefficients).max(1.0 / step);
    let scaled = companion_matrix(&DVector::from_iterator(
        n,
        coefficients
            .iter()
            .enumerate()
            .map(|(k, c)| c / scale.powi((n - k) as i32)),
    ));
    let span = scale * step;
    let difference = ((scaled * span).exp() - DMatrix::identity(n, n)) / span;

    let mut rows = DMatrix::zeros(n, n);
    let mut row = RowDVector::zeros(n);
    row[0] = 1.0;
    for k in 0..n {
        rows.set_row(k, &row);
        row = &row * &difference;
    }

    // Row 0 pins X0[0] = f(0); solve the rest in scaled units.
    let target: Vec<f64> = forward
        .iter()
        .enumerate()
        .map(|(k, y)| y / scale.powi(k as i32))
        .collect();
    let lower = rows.view((1, 1), (n - 1, n - 1)).into_owned();
    let rhs = DVector::from_iterator(
        n - 1,
        (1..n).map(|k| target[k] - rows[(k, 0)] * target[0]),
    );
    let solved = lower
        .lu()
        .solve(&rhs)
        .filter(|x| x.iter().all(|v| v.is_finite()))
        .ok_or(RealizationError::SingularMatrix { order: n })?;

    let mut initial = DVector::zeros(n);
    initial[0] = forward[0];
    for k in 1..n {
        initial[k] = solved[k - 1] * scale.powi(k as i32);
    }
    Ok(initial)
}

/// Picks the branch from X0 and builds M, nvar and w.
pub fn resolve(
    companion: &DMatrix<f64>,
    initial: &DVector<f64>,
    pivot_tolerance: f64,
) -> RealizationResult<ResolvedSystem> {
    let n = initial.len();
    let branch = Branch::select(initial);
    let (transform, nvar, weight) = match branch {
        Branch::Continuous => (continuous_transform(initial, pivot_tolerance)?, n - 1, 1.0),
        Branch::Discontinuous => (discontinuous_transform(initial)?, 0, initial[0]),
    };
    let matrix = &transform.p * companion * &transform.q;
    Ok(ResolvedSystem {
        matrix,
        nvar,
        weight,
        branch,
        transform,
    })
}

/// Q = I with last column X0; P from the closed form for that structure.
fn continuous_transform(
    initial: &DVector<f64>,
    pivot_tolerance: f64,
) -> RealizationResult<BasisTransform> {
    let n = initial.len();
    let last = n - 1;
    let pivot = initial[last];
    if !pivot.is_finite() || pivot == 0.0 || pivot.abs() <= pivot_tolerance * initial.amax() {
        return Err(RealizationError::SingularPivot {
            index: last,
            value: pivot,
        });
    }

    let mut q = DMatrix::identity(n, n);
    q.set_column(last, initial);

    let mut p = DMatrix::identity(n, n);
    for i in 0..last {
        p[(i, last)] = -initial[i] / pivot;
    }
    p[(last, last)] = 1.0 / pivot;

    Ok(BasisTransform { p, q })
}

/// Q = I with first column X0; P = Q^-1.
fn discontinuous_transform(initial: &DVector<f64>) -> RealizationResult<BasisTransform> {
    let n = initial.len();
    let mut q = DMatrix::identity(n, n);
    q.set_column(0, initial);
    let p = q
        .clone()
        .try_inverse()
        .filter(|p| p.iter().all(|v| v.is_finite()))
        .ok_or(RealizationError::SingularMatrix { order: n })?;
    Ok(BasisTransform { p, q })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_identity(m: &DMatrix<f64>, tol: f64) {
        let n = m.nrows();
        let diff = m - DMatrix::<f64>::identity(n, n);
        assert!(diff.amax() < tol, "not identity: {m}");
    }

    #[test]
    fn branch_uses_exact_zero() {
        assert_eq!(Branch::select(&DVector::from_vec(vec![0.0, 1.0])), Branch::Continuous);
        assert_eq!(
            Branch::select(&DVector::from_vec(vec![1e-300, 1.0])),
            Branch::Discontinuous
        );
    }

    #[test]
    fn continuous_transform_inverts_exactly() {
        let initial = DVector::from_vec(vec![0.0, 2.0, -3.0, 4.0]);
        let transform = continuous_transform(&initial, 1e-10).expect("transform");
        assert_identity(&(&transform.p * &transform.q), 1e-14);
        assert_identity(&(&transform.q * &transform.p), 1e-14);
    }

    #[test]
    fn continuous_transform_rejects_zero_pivot() {
        let initial = DVector::from_vec(vec![0.0, 1.0, 0.0]);
        let err = continuous_transform(&initial, 1e-10).expect_err("zero pivot");
        assert_eq!(err, RealizationError::SingularPivot { index: 2, value: 0.0 });

        let tiny = DVector::from_vec(vec![0.0, 1.0, 1e-14]);
        assert!(continuous_transform(&tiny, 1e-10).is_err());
    }

    #[test]
    fn discontinuous_transform_inverts() {
        let initial = DVector::from_vec(vec![2.0, -200.0, 2e4]);
        let transform = discontinuous_transform(&initial).expect("transform");
        assert_identity(&(&transform.p * &transform.q), 1e-10);
    }

    #[test]
    fn resolve_alpha_kernel_tower() {
        // f = t e^{-t}: X0 = [0, 1], f'' = -f - 2 f'
        let a = companion_matrix(&DVector::from_vec(vec![-1.0, -2.0]));
        let initial = DVector::from_vec(vec![0.0, 1.0]);
        let resolved = resolve(&a, &initial, 1e-10).expect("resolved");
        assert_eq!(resolved.branch, Branch::Continuous);
        assert_eq!(resolved.nvar, 1);
        assert_eq!(resolved.weight, 1.0);
        // Q = I here, so M = A.
        assert_eq!(resolved.matrix, a);
    }

    #[test]
    fn resolve_first_order_discontinuous() {
        let a = companion_matrix(&DVector::from_vec(vec![-100.0]));
        let initial = DVector::from_vec(vec![3.0]);
        let resolved = resolve(&a, &initial, 1e-10).expect("resolved");
        assert_eq!(resolved.branch, Branch::Discontinuous);
        assert_eq!(resolved.nvar, 0);
        assert_eq!(resolved.weight, 3.0);
        assert!((resolved.matrix[(0, 0)] + 100.0).abs() < 1e-12);
    }

    #[test]
    fn onset_derivatives_of_exponential() {
        let kernel = |t: f64| 2.0 * (-t / 0.01).exp();
        let a = companion_matrix(&DVector::from_vec(vec![-100.0]));
        let x0 = initial_derivatives(&kernel, &a, 5e-4).expect("x0");
        assert_eq!(x0.as_slice(), &[2.0]);
    }

    #[test]
    fn onset_derivatives_are_exact_for_the_recurrence() {
        // f = 2 e^{-100 t} - e^{-200 t}: X0 = [1, 0, -2e4]
        let kernel = |t: f64| 2.0 * (-100.0 * t).exp() - (-200.0 * t).exp();
        let a = companion_matrix(&DVector::from_vec(vec![-2e4, -300.0]));
        let x0 = initial_derivatives(&kernel, &a, 5e-4).expect("x0");
        assert_eq!(x0[0], 1.0);
        assert!(x0[1].abs() < 1e-9, "{x0}");

        // f = (t / tau)^2 e^{-t / tau}: X0 = [0, 0, 2 / tau^2]
        let tau = 0.01;
        let kernel = move |t: f64| (t / tau).powi(2) * (-t / tau).exp();
        let a = companion_matrix(&DVector::from_vec(vec![-1e6, -3e4, -300.0]));
        let x0 = initial_derivatives(&kernel, &a, 5e-4).expect("x0");
        assert_eq!(x0[0], 0.0);
        assert!(x0[1].abs() < 1e-7, "{x0}");
        assert!((x0[2] - 2e4).abs() < 1e-7 * 2e4, "{x0}");
    }

    #[test]
    fn onset_derivatives_of_a_polynomial() {
        let kernel = |t: f64| 1.0 + 3.0 * t - 40.0 * t * t;
        let a = companion_matrix(&DVector::zeros(3));
        let x0 = initial_derivatives(&kernel, &a, 1e-3).expect("x0");
        assert_eq!(x0[0], 1.0);
        assert!((x0[1] - 3.0).abs() < 1e-9, "{x0}");
        assert!((x0[2] + 80.0).abs() < 1e-6, "{x0}");
    }
}
