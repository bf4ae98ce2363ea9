//! Native helpers behind the kernel bindings, free of `JsValue` so they can be
//! unit tested off-wasm.

use anyhow::{bail, Context, Result};
use integrodiff_core::{
    format_equations, realize, Branch, EquationStyle, Environment, KernelDefinition, Realization,
    RealizationSettings,
};
use serde::Serialize;

pub(crate) fn build_environment(param_names: &[String], params: &[f64]) -> Result<Environment> {
    if param_names.len() != params.len() {
        bail!(
            "Parameter count mismatch: {} names, {} values.",
            param_names.len(),
            params.len()
        );
    }
    let mut environment = Environment::with_time_units();
    for (name, &value) in param_names.iter().zip(params) {
        environment.insert(name, value);
    }
    Ok(environment)
}

pub(crate) fn build_realization(
    definition: &str,
    environment: &Environment,
    settings: &RealizationSettings,
) -> Result<(KernelDefinition, Realization)> {
    let definition = KernelDefinition::parse(definition, environment)
        .context("Failed to parse kernel definition.")?;
    let realization = realize(&definition.kernel, settings)
        .with_context(|| format!("Failed to realize kernel `{}`.", definition.name))?;
    Ok((definition, realization))
}

/// Serialized view of a realization for the JS side.
#[derive(Debug, Serialize)]
pub(crate) struct RealizationSummary {
    pub name: String,
    pub rank: usize,
    pub nvar: usize,
    pub weight: f64,
    pub branch: Branch,
    /// Row-major M.
    pub matrix: Vec<f64>,
    pub equations: String,
}

impl RealizationSummary {
    pub(crate) fn new(name: &str, realization: &Realization, style: &EquationStyle) -> Self {
        Self {
            name: name.to_string(),
            rank: realization.rank,
            nvar: realization.nvar,
            weight: realization.weight,
            branch: realization.branch,
            matrix: row_major(realization),
            equations: format_equations(realization, style),
        }
    }
}

pub(crate) fn row_major(realization: &Realization) -> Vec<f64> {
    realization.matrix.transpose().iter().copied().collect()
}
