use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in the evaluators and steppers.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A kernel f(t) given in integral (convolution) form.
///
/// Kernels are pure: evaluating the same time twice must give the same value.
/// Any `Fn(f64) -> f64` closure is a kernel.
pub trait Kernel {
    fn eval(&self, t: f64) -> f64;
}

impl<F> Kernel for F
where
    F: Fn(f64) -> f64,
{
    fn eval(&self, t: f64) -> f64 {
        self(t)
    }
}

/// Produces the sample times at which a kernel and its derivatives are evaluated.
pub trait SampleStrategy {
    /// Returns `count` times in `[0, horizon)`.
    fn sample_times(&mut self, horizon: f64, count: usize) -> Vec<f64>;
}

/// Represents a continuous-time dynamical system dx/dt = F(t, x).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
