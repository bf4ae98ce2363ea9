//! Companion realization of a recurrence, and the map from the recurrence
//! among central differences to the one among derivatives.

use crate::error::{RealizationError, RealizationResult};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// Controllable canonical form of the recurrence
/// d^n f = sum_k coefficients[k] d^k f.
///
/// Ones on the superdiagonal shift each derivative into the next; the last
/// row feeds back the recurrence. Started from the derivative tower of f at
/// the origin, dx/dt = A x reproduces that tower.
pub fn companion_matrix(coefficients: &DVector<f64>) -> DMatrix<f64> {
    let n = coefficients.len();
    let mut a = DMatrix::zeros(n, n);
    for i in 0..n.saturating_sub(1) {
        a[(i, i + 1)] = 1.0;
    }
    if n > 0 {
        a.set_row(n - 1, &coefficients.transpose());
    }
    a
}

/// max_k |c_k|^(1 / (n - k)): the size of the recurrence's roots.
pub fn root_radius(coefficients: &DVector<f64>) -> f64 {
    let n = coefficients.len();
    coefficients
        .iter()
        .enumerate()
        .map(|(k, c)| c.abs().powf(1.0 / (n - k) as f64))
        .fold(0.0, f64::max)
}

/// Turns the recurrence among central differences of step h into the one
/// among derivatives.
///
/// On e^(lambda t) the difference acts as mu = 2 sinh(lambda h / 2) / h, so
/// each root mu of the difference recurrence maps back to
/// lambda = 2 asinh(mu h / 2) / h. Oscillations must stay below 1 / (2h) Hz.
pub fn derivative_recurrence(
    coefficients: &DVector<f64>,
    step: f64,
) -> RealizationResult<DVector<f64>> {
    let n = coefficients.len();
    let radius = root_radius(coefficients);
    if radius == 0.0 {
        return Ok(coefficients.clone());
    }

    let scaled = DVector::from_iterator(
        n,
        coefficients
            .iter()
            .enumerate()
            .map(|(k, c)| c / radius.powi((n - k) as i32)),
    );
    let roots = companion_matrix(&scaled).complex_eigenvalues();

    // Monic characteristic polynomial, highest degree first.
    let mut polynomial = vec![Complex::new(1.0, 0.0)];
    for &root in roots.iter() {
        let mu = root * radius;
        let lambda = (mu * (0.5 * step)).asinh() * (2.0 / step);
        if !(lambda.re.is_finite() && lambda.im.is_finite()) {
            return Err(RealizationError::IllConditioned {
                order: n,
                reason: format!("difference root {mu} has no derivative counterpart"),
            });
        }
        polynomial.push(Complex::new(0.0, 0.0));
        for i in (1..polynomial.len()).rev() {
            polynomial[i] = polynomial[i] - lambda * polynomial[i - 1];
        }
    }

    // s^n = sum_k c_k s^k
    Ok(DVector::from_iterator(
        n,
        (0..n).map(|k| -polynomial[n - k].re),
    ))
}
