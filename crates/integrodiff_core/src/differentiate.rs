//! Finite-difference derivatives of a kernel.
//!
//! Both stencils are fixed linear combinations of shifted kernel values, so
//! they commute with time shifts: a kernel satisfying a linear recurrence among
//! its derivatives satisfies the same-order recurrence among its differences.

use crate::error::{RealizationError, RealizationResult};
use crate::traits::Kernel;

/// Evaluates the kernel, rejecting NaN and infinities.
pub fn evaluate(kernel: &impl Kernel, t: f64) -> RealizationResult<f64> {
    let value = kernel.eval(t);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(RealizationError::DegenerateKernel { time: t, value })
    }
}

/// Central k-th difference with step h:
/// h^-k * sum_j (-1)^j C(k, j) f(t + (k/2 - j) h).
///
/// Samples on both sides of `t`; use [`differentiate_onset`] at the origin.
pub fn differentiate(
    kernel: &impl Kernel,
    t: f64,
    order: usize,
    step: f64,
) -> RealizationResult<f64> {
    if order == 0 {
        return evaluate(kernel, t);
    }
    let half = order as f64 / 2.0;
    let mut sum = 0.0;
    for j in 0..=order {
        let weight = signed_binomial(order, j);
        sum += weight * evaluate(kernel, t + (half - j as f64) * step)?;
    }
    Ok(sum / step.powi(order as i32))
}

/// One-sided k-th forward difference h^-k * Delta^k f(t), using only points
/// at or after `t`.
///
/// Like the central stencil it is shift invariant: on e^(lambda t) it
/// multiplies by ((e^(lambda h) - 1) / h)^k, which lets the caller undo its
/// bias exactly once the recurrence is known.
pub fn differentiate_onset(
    kernel: &impl Kernel,
    t: f64,
    order: usize,
    step: f64,
) -> RealizationResult<f64> {
    let mut sum = 0.0;
    for j in 0..=order {
        // (-1)^(k - j) C(k, j)
        let weight = signed_binomial(order, order - j);
        sum += weight * evaluate(kernel, t + j as f64 * step)?;
    }
    Ok(sum / step.powi(order as i32))
}

/// (-1)^k C(n, k).
fn signed_binomial(n: usize, k: usize) -> f64 {
    let magnitude = binomial(n, k);
    if k % 2 == 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Binomial coefficient C(n, k) as a float.
pub fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut value = 1.0;
    for i in 0..k {
        value = value * (n - i) as f64 / (i + 1) as f64;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binomial_matches_pascal_triangle() {
        assert_eq!(binomial(0, 0), 1.0);
        assert_eq!(binomial(4, 2), 6.0);
        assert_eq!(binomial(5, 1), 5.0);
        assert_eq!(binomial(6, 3), 20.0);
        assert_eq!(binomial(3, 4), 0.0);
    }

    #[test]
    fn central_difference_of_cubic_is_exact_to_third_order() {
        let cubic = |t: f64| t * t * t;
        let step = 1e-2;
        let first = differentiate(&cubic, 0.5, 1, step).expect("first derivative");
        let second = differentiate(&cubic, 0.5, 2, step).expect("second derivative");
        let third = differentiate(&cubic, 0.5, 3, step).expect("third derivative");
        // Central first difference of t^3 carries an h^2/4 term.
        assert!((first - (0.75 + step * step / 4.0)).abs() < 1e-9);
        assert!((second - 3.0).abs() < 1e-8);
        assert!((third - 6.0).abs() < 1e-6);
    }

    #[test]
    fn central_difference_tracks_exponential_tower() {
        let tau = 0.01;
        let kernel = move |t: f64| (-t / tau).exp();
        let step = 5e-5;
        for order in 0..4 {
            let value = differentiate(&kernel, 0.003, order, step).expect("derivative");
            let exact = (-1.0 / tau).powi(order as i32) * (-0.003 / tau).exp();
            assert!(
                ((value - exact) / exact).abs() < 1e-4,
                "order {order}: {value} vs {exact}"
            );
        }
    }

    #[test]
    fn onset_difference_never_samples_before_origin() {
        let kernel = |t: f64| if t < 0.0 { f64::NAN } else { (-t).exp() };
        let value = differentiate_onset(&kernel, 0.0, 2, 1e-3).expect("one-sided derivative");
        // (1 - e^-h)^2 / h^2 = 1 - h + O(h^2)
        assert!((value - 1.0).abs() < 2e-3);
        assert!(differentiate(&kernel, 0.0, 2, 1e-3).is_err());
    }

    #[test]
    fn onset_difference_scales_exponentials_exactly() {
        let lambda = -100.0;
        let step = 5e-4;
        let kernel = move |t: f64| (lambda * t).exp();
        let factor = (lambda * step).exp_m1() / step;
        for order in 0..4 {
            let value = differentiate_onset(&kernel, 0.0, order, step).expect("forward difference");
            let exact = factor.powi(order as i32);
            assert!(
                ((value - exact) / exact).abs() < 1e-8,
                "order {order}: {value} vs {exact}"
            );
        }
    }

    #[test]
    fn central_difference_scales_exponentials_exactly() {
        let lambda = -100.0;
        let step = 5e-4;
        let kernel = move |t: f64| (lambda * t).exp();
        let factor = 2.0 * (0.5 * lambda * step).sinh() / step;
        for order in 1..5 {
            let value = differentiate(&kernel, 0.01, order, step).expect("central difference");
            let exact = factor.powi(order as i32) * (lambda * 0.01).exp();
            assert!(
                ((value - exact) / exact).abs() < 1e-8,
                "order {order}: {value} vs {exact}"
            );
        }
    }

    #[test]
    fn non_finite_values_are_degenerate() {
        let kernel = |t: f64| 1.0 / t;
        let err = evaluate(&kernel, 0.0).expect_err("division by zero");
        assert!(matches!(err, RealizationError::DegenerateKernel { .. }));
    }
}
