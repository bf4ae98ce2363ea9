//! Text rendering of a realization as a set of differential equations.

use crate::realization::Realization;
use serde::{Deserialize, Serialize};

/// Naming for the rendered equations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquationStyle {
    /// Name of the kernel; also the name of state coordinate 0.
    pub name: String,
    /// Unit tag appended to every equation.
    pub unit: String,
    /// Appended to every auxiliary state name to keep them unique.
    pub suffix: String,
}

impl EquationStyle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: "1".to_string(),
            suffix: String::new(),
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    /// The kernel name followed by x, y, z (or x0, x1, ... from order 5 on).
    pub fn state_names(&self, order: usize) -> Vec<String> {
        let mut names = Vec::with_capacity(order);
        if order == 0 {
            return names;
        }
        names.push(self.name.clone());
        for i in 0..order - 1 {
            let base = if order < 5 {
                ["x", "y", "z"][i].to_string()
            } else {
                format!("x{i}")
            };
            names.push(format!("{base}{}", self.suffix));
        }
        names
    }
}

/// One `dname/dt = ... : unit` line per state, then `name_in = <input state>`.
pub fn format_equations(realization: &Realization, style: &EquationStyle) -> String {
    let names = style.state_names(realization.rank);
    let mut lines = Vec::with_capacity(names.len() + 1);
    for (i, name) in names.iter().enumerate() {
        let row: Vec<f64> = realization.matrix.row(i).iter().copied().collect();
        lines.push(format!(
            "d{name}/dt = {} : {}",
            linear_combination(&row, &names),
            style.unit
        ));
    }
    if let Some(input) = names.get(realization.nvar) {
        lines.push(format!("{}_in = {input}", style.name));
    }
    lines.join("\n")
}

fn linear_combination(coefficients: &[f64], names: &[String]) -> String {
    let mut out = String::new();
    for (&c, name) in coefficients.iter().zip(names) {
        if c == 0.0 {
            continue;
        }
        let magnitude = c.abs();
        let term = if magnitude == 1.0 {
            name.clone()
        } else if !(1e-3..1e6).contains(&magnitude) {
            format!("{magnitude:e}*{name}")
        } else {
            format!("{magnitude}*{name}")
        };
        match (out.is_empty(), c < 0.0) {
            (true, false) => out.push_str(&term),
            (true, true) => {
                out.push('-');
                out.push_str(&term);
            }
            (false, false) => {
                out.push_str(" + ");
                out.push_str(&term);
            }
            (false, true) => {
                out.push_str(" - ");
                out.push_str(&term);
            }
        }
    }
    if out.is_empty() {
        out.push('0');
    }
    out
}
