//! Built-in scenes.

use crate::config::{SimulationParams, Viewport};
use crate::coords::CoordinateSystem;
use crate::domain::DomainTransform;
use crate::error::{FlowError, Result};
use crate::field::{ColorMode, FieldRequest};
use crate::integrators::Integrator;

/// Notebook cells, a field request and matching parameters.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub cells: Vec<&'static str>,
    pub request: FieldRequest,
    pub params: SimulationParams,
}

pub const NAMES: [&str; 5] = [
    "polar-limit-cycle",
    "lorenz",
    "van-der-pol",
    "notebook-expansion",
    "tanh-sink",
];

pub fn by_name(name: &str) -> Result<Preset> {
    match name {
        "polar-limit-cycle" => polar_limit_cycle(),
        "lorenz" => Ok(lorenz()),
        "van-der-pol" => Ok(van_der_pol()),
        "notebook-expansion" => Ok(notebook_expansion()),
        "tanh-sink" => Ok(tanh_sink()),
        _ => Err(FlowError::application(format!("unknown preset `{name}`"))),
    }
}

pub fn all() -> Result<Vec<Preset>> {
    NAMES.iter().map(|name| by_name(name)).collect()
}

/// `ṙ = r(1 - r)`, `θ̇ = 1`: every orbit winds onto the unit circle.
pub fn polar_limit_cycle() -> Result<Preset> {
    Ok(Preset {
        name: "polar-limit-cycle",
        cells: Vec::new(),
        request: FieldRequest::new(&["r*(1 - r)", "1"]).with_coordinates(CoordinateSystem::polar()?),
        params: SimulationParams::default()
            .with_viewport(Viewport::centered(2.0))
            .with_step(0.01),
    })
}

pub fn lorenz() -> Preset {
    Preset {
        name: "lorenz",
        cells: Vec::new(),
        request: FieldRequest::new(&["10*(y - x)", "x*(28 - z) - y", "x*y - (8/3)*z"])
            .with_integrator(Integrator::Rk4),
        params: SimulationParams::default()
            .with_viewport(Viewport::centered(30.0))
            .with_step(0.005),
    }
}

pub fn van_der_pol() -> Preset {
    Preset {
        name: "van-der-pol",
        cells: vec!["mu = 1.5"],
        request: FieldRequest::new(&["y", "mu*(1 - x^2)*y - x"])
            .with_integrator(Integrator::Heun)
            .with_color(ColorMode::Angle),
        params: SimulationParams::default()
            .with_viewport(Viewport::centered(4.0))
            .with_step(0.01),
    }
}

/// A user function that simplifies to one: particles drift diagonally.
pub fn notebook_expansion() -> Preset {
    Preset {
        name: "notebook-expansion",
        cells: vec!["g(u) = sin(u)^2 + cos(u)^2"],
        request: FieldRequest::new(&["g(x)", "g(y)"]),
        params: SimulationParams::default(),
    }
}

/// A linear sink integrated in `tanh`-compressed space.
pub fn tanh_sink() -> Preset {
    Preset {
        name: "tanh-sink",
        cells: Vec::new(),
        request: FieldRequest::new(&["-x", "-y"])
            .with_transform(DomainTransform::Tanh)
            .with_integrator(Integrator::Rk4)
            .with_color(ColorMode::Expression("sqrt(x^2 + y^2)/4".to_string())),
        params: SimulationParams::default()
            .with_transform_params([2.0, 0.0, 0.0, 0.0])
            .with_step(0.05),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_resolve() {
        let presets = all().unwrap();
        assert_eq!(presets.len(), NAMES.len());
        for preset in presets {
            assert_eq!(by_name(preset.name).unwrap().name, preset.name);
        }
        assert_eq!(by_name("missing").unwrap_err().kind(), "workflow-application-failure");
    }
}
