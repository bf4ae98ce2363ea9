//! The `integrodiff_core` crate converts a kernel given in integral
//! (convolution) form into an equivalent minimal-order linear differential
//! system, so a convolution can be replaced by integrating dx/dt = M x.
//!
//! Key components:
//! - **Sampler / RankFinder**: finite-difference derivative tower at sample times and the
//!   minimal linear recurrence among its orders.
//! - **Companion / InitialConditions**: controllable canonical form and the basis change that
//!   routes the kernel's input onto one coordinate.
//! - **Realization**: the `realize` driver, settings, and RK4/Tsit5 simulation of the result.
//! - **Expression / Format**: `name(t) = expr` front-end bound against an explicit
//!   environment, and rendering of the resulting equations.
pub mod companion;
pub mod differentiate;
pub mod error;
pub mod expression;
pub mod format;
pub mod initial_conditions;
pub mod rank;
pub mod realization;
pub mod sampler;
pub mod solvers;
pub mod traits;

pub use error::{RealizationError, RealizationResult};
pub use expression::{Environment, ExpressionError, ExpressionKernel, KernelDefinition};
pub use format::{format_equations, EquationStyle};
pub use initial_conditions::Branch;
pub use realization::{realize, realize_with, Realization, RealizationSettings, StepperKind};
pub use traits::{Kernel, SampleStrategy};
