//! Sample-time strategies and the derivative sampler.

use crate::differentiate::differentiate;
use crate::error::RealizationResult;
use crate::traits::{Kernel, SampleStrategy};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Uniform random times from a seeded generator.
pub struct SeededUniform {
    rng: StdRng,
}

impl SeededUniform {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl SampleStrategy for SeededUniform {
    fn sample_times(&mut self, horizon: f64, count: usize) -> Vec<f64> {
        (0..count)
            .map(|_| self.rng.gen::<f64>() * horizon)
            .collect()
    }
}

/// Base-2 van der Corput sequence, skipping the leading zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct VanDerCorput;

impl VanDerCorput {
    fn radical_inverse(mut index: u64) -> f64 {
        let mut value = 0.0;
        let mut scale = 0.5;
        while index > 0 {
            if index & 1 == 1 {
                value += scale;
            }
            index >>= 1;
            scale *= 0.5;
        }
        value
    }
}

impl SampleStrategy for VanDerCorput {
    fn sample_times(&mut self, horizon: f64, count: usize) -> Vec<f64> {
        (1..=count as u64)
            .map(|i| Self::radical_inverse(i) * horizon)
            .collect()
    }
}

/// Derivative columns at shared sample times, keyed by order. Order 0 is f.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivativeSet {
    pub times: Vec<f64>,
    pub columns: BTreeMap<usize, DVector<f64>>,
}

impl DerivativeSet {
    pub fn new(times: Vec<f64>) -> Self {
        Self {
            times,
            columns: BTreeMap::new(),
        }
    }

    pub fn column(&self, order: usize) -> Option<&DVector<f64>> {
        self.columns.get(&order)
    }

    pub fn insert(&mut self, order: usize, column: DVector<f64>) {
        self.columns.insert(order, column);
    }

    /// Number of sample times per column.
    pub fn samples(&self) -> usize {
        self.times.len()
    }

    pub fn highest_order(&self) -> Option<usize> {
        self.columns.keys().next_back().copied()
    }
}

/// Evaluates a kernel and its derivatives at a fixed set of sample times.
pub struct Sampler<'a, K: Kernel> {
    kernel: &'a K,
    times: Vec<f64>,
    step: f64,
}

impl<'a, K: Kernel> Sampler<'a, K> {
    pub fn new(kernel: &'a K, times: Vec<f64>, step: f64) -> Self {
        Self {
            kernel,
            times,
            step,
        }
    }

    /// Draws `count` times in `[0, horizon)` from `strategy`.
    pub fn draw(
        kernel: &'a K,
        strategy: &mut impl SampleStrategy,
        horizon: f64,
        count: usize,
        step: f64,
    ) -> Self {
        let times = strategy.sample_times(horizon, count);
        Self::new(kernel, times, step)
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// An empty tower over this sampler's times.
    pub fn tower(&self) -> DerivativeSet {
        DerivativeSet::new(self.times.clone())
    }

    /// The `order`-th central difference of the kernel at every sample time.
    pub fn derivative(&self, order: usize) -> RealizationResult<DVector<f64>> {
        let mut values = Vec::with_capacity(self.times.len());
        for &t in &self.times {
            values.push(differentiate(self.kernel, t, order, self.step)?);
        }
        Ok(DVector::from_vec(values))
    }

    /// Column `order` of `tower`, sampled on first use.
    pub fn fill<'t>(
        &self,
        tower: &'t mut DerivativeSet,
        order: usize,
    ) -> RealizationResult<&'t DVector<f64>> {
        if tower.column(order).is_none() {
            let column = self.derivative(order)?;
            tower.insert(order, column);
        }
        Ok(&tower.columns[&order])
    }
}
