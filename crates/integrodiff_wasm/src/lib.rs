use integrodiff_core::{EquationStyle, Realization, RealizationSettings, StepperKind};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

mod kernel;

use kernel::{build_environment, build_realization, row_major, RealizationSummary};

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn parse_settings(settings: JsValue) -> Result<RealizationSettings, JsValue> {
    if settings.is_undefined() || settings.is_null() {
        return Ok(RealizationSettings::default());
    }
    from_value(settings).map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))
}

/// One-shot conversion: `name(t) = expr` to `{ name, rank, nvar, weight, branch, matrix, equations }`.
#[wasm_bindgen]
pub fn integral_to_differential(
    definition: &str,
    param_names: Vec<String>,
    params: Vec<f64>,
    settings: JsValue,
    unit: &str,
    suffix: &str,
) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let realization = WasmRealization::new(definition, param_names, params, settings)?;
    let summary = RealizationSummary::new(
        &realization.name,
        &realization.realization,
        &EquationStyle::new(&realization.name)
            .with_unit(unit)
            .with_suffix(suffix),
    );
    to_value(&summary).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub struct WasmRealization {
    name: String,
    realization: Realization,
}

#[wasm_bindgen]
impl WasmRealization {
    #[wasm_bindgen(constructor)]
    pub fn new(
        definition: &str,
        param_names: Vec<String>,
        params: Vec<f64>,
        settings: JsValue,
    ) -> Result<WasmRealization, JsValue> {
        console_error_panic_hook::set_once();

        let settings = parse_settings(settings)?;
        let environment = build_environment(&param_names, &params).map_err(js_error)?;
        let (definition, realization) =
            build_realization(definition, &environment, &settings).map_err(|e| js_error(format!("{e:#}")))?;

        Ok(WasmRealization {
            name: definition.name,
            realization,
        })
    }

    pub fn rank(&self) -> usize {
        self.realization.rank
    }

    pub fn nvar(&self) -> usize {
        self.realization.nvar
    }

    pub fn weight(&self) -> f64 {
        self.realization.weight
    }

    /// Row-major M.
    pub fn matrix(&self) -> Vec<f64> {
        row_major(&self.realization)
    }

    pub fn initial_state(&self) -> Vec<f64> {
        self.realization.initial_state()
    }

    pub fn equations(&self, unit: &str, suffix: &str) -> String {
        let style = EquationStyle::new(&self.name)
            .with_unit(unit)
            .with_suffix(suffix);
        integrodiff_core::format_equations(&self.realization, &style)
    }

    /// x_0 at each of `times` (non-decreasing), integrated with steps of at most `dt`.
    pub fn simulate(&self, times: Vec<f64>, dt: f64, solver_name: &str) -> Result<Vec<f64>, JsValue> {
        let stepper = match solver_name {
            "rk4" => StepperKind::Rk4,
            "tsit5" => StepperKind::Tsit5,
            _ => return Err(JsValue::from_str("Unknown solver")),
        };
        self.realization
            .simulate(&times, dt, stepper)
            .map_err(js_error)
    }

    pub fn summary(&self) -> Result<JsValue, JsValue> {
        let summary = RealizationSummary::new(
            &self.name,
            &self.realization,
            &EquationStyle::new(&self.name),
        );
        to_value(&summary).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
