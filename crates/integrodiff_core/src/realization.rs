//! Kernel → state-space realization.
//!
//! `realize` chains the four stages: sample the derivative tower, find the
//! minimal recurrence, build its companion matrix, and move to the basis in
//! which the kernel's input drives a single coordinate. The result satisfies
//!
//! x(0) = w e_nvar,  dx/dt = M x  =>  x_0(t) = f(t).

use crate::companion::{companion_matrix, derivative_recurrence};
use crate::error::{RealizationError, RealizationResult};
use crate::initial_conditions::{initial_derivatives, resolve, BasisTransform, Branch};
use crate::rank::{RankFinder, RankPolicy};
use crate::sampler::{Sampler, SeededUniform};
use crate::solvers::{Tsit5, RK4};
use crate::traits::{DynamicalSystem, Kernel, SampleStrategy, Steppable};
use log::debug;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RealizationSettings {
    /// Sampling window T; samples fall in [0, T).
    pub horizon: f64,
    /// Number of sample times N.
    pub samples: usize,
    pub max_rank: usize,
    pub rank_tolerance: f64,
    /// Finite-difference step as a fraction of the horizon. Oscillations
    /// faster than 1 / (2 h) Hz cannot be resolved.
    pub relative_step: f64,
    /// Multiplier on the per-column roundoff estimate.
    pub noise_factor: f64,
    /// Continuous-branch pivot threshold relative to max |X0|.
    pub pivot_tolerance: f64,
    pub seed: u64,
}

impl Default for RealizationSettings {
    fn default() -> Self {
        let policy = RankPolicy::default();
        Self {
            horizon: 0.02,
            samples: 20,
            max_rank: policy.max_rank,
            rank_tolerance: policy.rank_tolerance,
            relative_step: 2.5e-2,
            noise_factor: policy.noise_factor,
            pivot_tolerance: 1e-10,
            seed: 0x1D1F_0005,
        }
    }
}

impl RealizationSettings {
    pub fn new(horizon: f64, samples: usize, max_rank: usize) -> Self {
        Self {
            horizon,
            samples,
            max_rank,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> RealizationResult<()> {
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            return Err(invalid("horizon must be positive and finite"));
        }
        if self.max_rank == 0 {
            return Err(invalid("max_rank must be greater than zero"));
        }
        if self.samples <= self.max_rank {
            return Err(invalid(&format!(
                "samples ({}) must exceed max_rank ({})",
                self.samples, self.max_rank
            )));
        }
        if !(self.rank_tolerance > 0.0 && self.rank_tolerance < 1.0) {
            return Err(invalid("rank_tolerance must lie in (0, 1)"));
        }
        if !(self.relative_step > 0.0 && self.relative_step < 1.0) {
            return Err(invalid("relative_step must lie in (0, 1)"));
        }
        if !(self.noise_factor >= 0.0 && self.noise_factor.is_finite()) {
            return Err(invalid("noise_factor must be non-negative and finite"));
        }
        if !(self.pivot_tolerance >= 0.0) {
            return Err(invalid("pivot_tolerance must be non-negative"));
        }
        Ok(())
    }

    pub fn step(&self) -> f64 {
        self.horizon * self.relative_step
    }

    pub fn rank_policy(&self) -> RankPolicy {
        RankPolicy {
            max_rank: self.max_rank,
            rank_tolerance: self.rank_tolerance,
            noise_factor: self.noise_factor,
        }
    }
}

fn invalid(message: &str) -> RealizationError {
    RealizationError::InvalidSettings(message.to_string())
}

/// Minimal-order differential form of a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    /// M = P A Q.
    pub matrix: DMatrix<f64>,
    /// Coordinate receiving the kernel's input.
    pub nvar: usize,
    /// Input weight; x(0) = weight * e_nvar.
    pub weight: f64,
    pub rank: usize,
    pub branch: Branch,
    pub companion: DMatrix<f64>,
    /// d^n f = sum_k coefficients[k] d^k f.
    pub coefficients: DVector<f64>,
    pub initial_derivatives: DVector<f64>,
    pub transform: BasisTransform,
}

/// Realizes `kernel` with samples drawn from the settings' seed.
pub fn realize(
    kernel: &impl Kernel,
    settings: &RealizationSettings,
) -> RealizationResult<Realization> {
    let mut strategy = SeededUniform::new(settings.seed);
    realize_with(kernel, settings, &mut strategy)
}

/// Realizes `kernel` with caller-supplied sample times.
pub fn realize_with(
    kernel: &impl Kernel,
    settings: &RealizationSettings,
    strategy: &mut impl SampleStrategy,
) -> RealizationResult<Realization> {
    settings.validate()?;
    let step = settings.step();

    let sampler = Sampler::draw(kernel, strategy, settings.horizon, settings.samples, step);
    let fit = RankFinder::new(&sampler, settings.rank_policy()).find()?;
    let coefficients = derivative_recurrence(&fit.coefficients, step)?;
    let companion = companion_matrix(&coefficients);

    let initial = initial_derivatives(kernel, &companion, step)?;
    let resolved = resolve(&companion, &initial, settings.pivot_tolerance)?;
    debug!(
        "realized rank {} on the {:?} branch (nvar = {}, w = {})",
        fit.rank, resolved.branch, resolved.nvar, resolved.weight
    );

    Ok(Realization {
        matrix: resolved.matrix,
        nvar: resolved.nvar,
        weight: resolved.weight,
        rank: fit.rank,
        branch: resolved.branch,
        companion,
        coefficients,
        initial_derivatives: initial,
        transform: resolved.transform,
    })
}

/// dx/dt = M x.
pub struct LinearFlow<'a> {
    matrix: &'a DMatrix<f64>,
}

impl<'a> LinearFlow<'a> {
    pub fn new(matrix: &'a DMatrix<f64>) -> Self {
        Self { matrix }
    }
}

impl DynamicalSystem<f64> for LinearFlow<'_> {
    fn dimension(&self) -> usize {
        self.matrix.nrows()
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.matrix.nrows();
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..n {
                sum += self.matrix[(i, j)] * x[j];
            }
            out[i] = sum;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperKind {
    Rk4,
    Tsit5,
}

impl Realization {
    /// The order of the differential system, i.e. the matrix dimension.
    pub fn order(&self) -> usize {
        self.rank
    }

    pub fn initial_state(&self) -> Vec<f64> {
        let mut state = vec![0.0; self.rank];
        state[self.nvar] = self.weight;
        state
    }

    pub fn eigenvalues(&self) -> Vec<Complex<f64>> {
        self.matrix.complex_eigenvalues().iter().copied().collect()
    }

    /// Integrates from the initial state with fixed steps of at most `dt`
    /// and reports x_0 at each of `times`, which must be finite,
    /// non-negative and non-decreasing.
    pub fn simulate(
        &self,
        times: &[f64],
        dt: f64,
        stepper: StepperKind,
    ) -> RealizationResult<Vec<f64>> {
        match stepper {
            StepperKind::Rk4 => self.simulate_with(&mut RK4::new(self.rank), times, dt),
            StepperKind::Tsit5 => self.simulate_with(&mut Tsit5::new(self.rank), times, dt),
        }
    }

    pub fn simulate_with(
        &self,
        stepper: &mut impl Steppable<f64>,
        times: &[f64],
        dt: f64,
    ) -> RealizationResult<Vec<f64>> {
        check_schedule(times, dt)?;
        let system = LinearFlow::new(&self.matrix);
        let mut state = self.initial_state();
        let mut t = 0.0;
        let mut out = Vec::with_capacity(times.len());
        for &target in times {
            while target - t > 1e-12 * dt {
                let h = dt.min(target - t);
                stepper.step(&system, &mut t, &mut state, h);
            }
            out.push(state[0]);
        }
        Ok(out)
    }

    /// max |x_0(t) - f(t)| / max |f(t)| over `times`.
    pub fn reconstruction_error(
        &self,
        kernel: &impl Kernel,
        times: &[f64],
        dt: f64,
    ) -> RealizationResult<f64> {
        let simulated = self.simulate(times, dt, StepperKind::Rk4)?;
        let mut peak = 0.0f64;
        let mut worst = 0.0f64;
        for (&t, &x) in times.iter().zip(&simulated) {
            let f = kernel.eval(t);
            peak = peak.max(f.abs());
            worst = worst.max((x - f).abs());
        }
        Ok(if peak > 0.0 { worst / peak } else { worst })
    }
}

fn check_schedule(times: &[f64], dt: f64) -> RealizationResult<()> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(invalid(&format!("dt must be positive and finite, got {dt}")));
    }
    let mut previous = 0.0;
    for &t in times {
        if !(t.is_finite() && t >= previous) {
            return Err(invalid(&format!(
                "times must be finite, non-negative and non-decreasing, got {t} after {previous}"
            )));
        }
        previous = t;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAU: f64 = 0.01;

    #[test]
    fn default_settings_validate() {
        RealizationSettings::default()
            .validate()
            .expect("defaults are valid");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cases = [
            RealizationSettings {
                horizon: 0.0,
                ..RealizationSettings::default()
            },
            RealizationSettings {
                max_rank: 0,
                ..RealizationSettings::default()
            },
            RealizationSettings::new(0.02, 4, 4),
            RealizationSettings {
                rank_tolerance: 0.0,
                ..RealizationSettings::default()
            },
            RealizationSettings {
                relative_step: 1.5,
                ..RealizationSettings::default()
            },
            RealizationSettings {
                noise_factor: -1.0,
                ..RealizationSettings::default()
            },
        ];
        for settings in cases {
            let err = settings.validate().expect_err("invalid settings");
            assert!(matches!(err, RealizationError::InvalidSettings(_)));
        }
    }

    #[test]
    fn exponential_realizes_as_first_order_decay() {
        let kernel = |t: f64| (-t / TAU).exp();
        let realization = realize(&kernel, &RealizationSettings::default()).expect("realize");
        assert_eq!(realization.rank, 1);
        assert_eq!(realization.nvar, 0);
        assert_eq!(realization.weight, 1.0);
        assert_eq!(realization.branch, Branch::Discontinuous);
        assert!((realization.matrix[(0, 0)] * TAU + 1.0).abs() < 1e-6);
    }

    #[test]
    fn alpha_kernel_realizes_on_continuous_branch() {
        let kernel = |t: f64| t * (-t / TAU).exp();
        let realization = realize(&kernel, &RealizationSettings::default()).expect("realize");
        assert_eq!(realization.rank, 2);
        assert_eq!(realization.nvar, 1);
        assert_eq!(realization.weight, 1.0);
        assert_eq!(realization.branch, Branch::Continuous);
        for lambda in realization.eigenvalues() {
            assert!((lambda.re + 1.0 / TAU).abs() < 1e-2, "eigenvalue {lambda}");
            assert!(lambda.im.abs() < 1e-2);
        }
    }

    #[test]
    fn initial_state_places_weight_on_nvar() {
        let kernel = |t: f64| 3.0 * (-t / TAU).exp();
        let realization = realize(&kernel, &RealizationSettings::default()).expect("realize");
        assert_eq!(realization.initial_state(), vec![3.0]);
    }

    #[test]
    fn linear_flow_applies_matrix() {
        let m = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, -2.0, -3.0]);
        let flow = LinearFlow::new(&m);
        let mut out = [0.0; 2];
        flow.apply(0.0, &[1.0, 2.0], &mut out);
        assert_eq!(flow.dimension(), 2);
        assert_eq!(out, [2.0, -8.0]);
    }

    #[test]
    fn simulation_hits_requested_times() {
        let kernel = |t: f64| (-t / TAU).exp();
        let realization = realize(&kernel, &RealizationSettings::default()).expect("realize");
        let times = [0.0, 0.0013, 0.005, 0.02];
        for stepper in [StepperKind::Rk4, StepperKind::Tsit5] {
            let values = realization
                .simulate(&times, 1e-4, stepper)
                .expect("valid schedule");
            assert_eq!(values.len(), times.len());
            assert_eq!(values[0], 1.0);
            for (&t, &x) in times.iter().zip(&values) {
                assert!((x - kernel(t)).abs() < 1e-4, "{stepper:?} at {t}: {x}");
            }
        }
    }

    #[test]
    fn simulation_rejects_bad_steps() {
        let kernel = |t: f64| (-t / TAU).exp();
        let realization = realize(&kernel, &RealizationSettings::default()).expect("realize");
        let times = [0.0, 0.01];
        for dt in [0.0, -1e-4, f64::NAN, f64::INFINITY] {
            let err = realization
                .simulate(&times, dt, StepperKind::Rk4)
                .expect_err("dt must be positive");
            assert!(matches!(err, RealizationError::InvalidSettings(_)), "dt {dt}");
        }
        for times in [vec![0.01, 0.005], vec![-0.001, 0.01], vec![0.0, f64::NAN]] {
            let err = realization
                .simulate(&times, 1e-4, StepperKind::Tsit5)
                .expect_err("times must be sorted and non-negative");
            assert!(matches!(err, RealizationError::InvalidSettings(_)), "{times:?}");
        }
        assert!(realization.reconstruction_error(&kernel, &times, 0.0).is_err());
    }
}
