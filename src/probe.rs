//! CPU reference of the compiled velocity and particle update.
//!
//! Mirrors `velocity`, `integrate` and the respawn rules in f64 so scenes can
//! be checked without a device, and samples the field to estimate the
//! `u_max_velocity` used by the speed coloring.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{SimulationParams, Viewport};
use crate::coords::ResolvedChart;
use crate::domain::{DomainMirror, DomainTransform};
use crate::error::Result;
use crate::expr::{Evaluator, Expr, FunctionTable, Positional};
use crate::integrators::Integrator;
use crate::math::norm;
use crate::particles::{ParticleState, escaped, lottery, next_age, respawn_position, stuck};

/// The native field pulled back through the chart and the domain transform.
#[derive(Debug, Clone)]
pub struct FieldEvaluator {
    labels: Vec<String>,
    field: Vec<Expr>,
    functions: FunctionTable,
    chart: ResolvedChart,
    transform: DomainTransform,
}

impl FieldEvaluator {
    pub fn new(
        labels: Vec<String>,
        field: Vec<Expr>,
        functions: FunctionTable,
        chart: ResolvedChart,
        transform: DomainTransform,
    ) -> Self {
        Self {
            labels,
            field,
            functions,
            chart,
            transform,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.field.len()
    }

    pub fn transform(&self) -> &DomainTransform {
        &self.transform
    }

    /// `field_velocity`: the field at native coordinates `q`.
    pub fn native(&self, q: &[f64]) -> Result<Vec<f64>> {
        let scope = Positional {
            names: &self.labels,
            values: q,
        };
        let evaluator = Evaluator::with_functions(&self.functions);
        self.field
            .iter()
            .map(|component| evaluator.eval(component, &scope))
            .collect()
    }

    /// `cartesian_velocity` at the Cartesian point `x`.
    pub fn cartesian(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.chart.cartesian_velocity(x, |q| self.native(q))
    }

    pub fn stepper(&self, integrator: Integrator, params: [f32; 4]) -> Result<ReferenceStepper<'_>> {
        Ok(ReferenceStepper {
            evaluator: self,
            integrator,
            mirror: self.transform.mirror(params.map(f64::from))?,
        })
    }
}

/// `x' = T⁻¹(integrate(T(x), h))` with the wrapped velocity.
pub struct ReferenceStepper<'a> {
    evaluator: &'a FieldEvaluator,
    integrator: Integrator,
    mirror: DomainMirror,
}

impl ReferenceStepper<'_> {
    /// `velocity(y)` in the transformed domain.
    pub fn velocity(&self, y: &[f64]) -> Result<Vec<f64>> {
        if self.evaluator.transform.is_identity() {
            return self.evaluator.cartesian(y);
        }
        let x = self.mirror.inverse(y)?;
        let v = self.evaluator.cartesian(&x)?;
        self.mirror.jt_apply(&x, &v)
    }

    pub fn step(&self, x: &[f64], h: f64) -> Result<Vec<f64>> {
        let y = self.mirror.forward(x)?;
        let next = self.integrator.step(&y, h, &|y: &[f64]| self.velocity(y))?;
        self.mirror.inverse(&next)
    }
}

/// Whole-population CPU run with the update shader's respawn and aging.
pub struct ReferenceSimulation<'a> {
    stepper: ReferenceStepper<'a>,
    params: SimulationParams,
    positions: Vec<Vec<f64>>,
    ages: Vec<f32>,
    rng: StdRng,
}

impl<'a> ReferenceSimulation<'a> {
    pub fn new(
        evaluator: &'a FieldEvaluator,
        integrator: Integrator,
        params: SimulationParams,
        seed: u64,
    ) -> Result<Self> {
        let stepper = evaluator.stepper(integrator, params.transform_params)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let state = ParticleState::new(params.particle_count, evaluator.dimensions());
        let positions = state.seed(&params.viewport, &mut rng);
        let ages = vec![0.0; positions.len()];
        Ok(Self {
            stepper,
            params,
            positions,
            ages,
            rng,
        })
    }

    pub fn positions(&self) -> &[Vec<f64>] {
        &self.positions
    }

    pub fn ages(&self) -> &[f32] {
        &self.ages
    }

    /// Advance every particle one step. Respawns on the drop lottery, on
    /// escape and on low activity.
    pub fn tick(&mut self) {
        let h = self.params.step as f64;
        let dims = self.stepper.evaluator.dimensions();
        for idx in 0..self.positions.len() {
            let next = self
                .stepper
                .step(&self.positions[idx], h)
                .unwrap_or_else(|_| vec![f64::NAN; dims]);
            let speed = self
                .stepper
                .evaluator
                .cartesian(&next)
                .map_or(f64::NAN, |v| norm(&v));
            let drop = lottery(&mut self.rng, self.params.drop_rate);
            let respawn = drop
                || escaped(&next, &self.params.viewport)
                || stuck(
                    speed,
                    self.params.drop_low_velocity,
                    self.params.velocity_threshold,
                );
            if respawn {
                self.positions[idx] = respawn_position(dims, &self.params.viewport, &mut self.rng);
                self.ages[idx] = 0.0;
            } else {
                self.positions[idx] = next;
                self.ages[idx] = next_age(self.ages[idx]);
            }
        }
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityStats {
    pub max: f64,
    pub mean: f64,
    /// Finite samples that contributed.
    pub samples: usize,
}

/// Sample the Cartesian speed on a `samples × samples` grid over the
/// viewport, higher dimensions at zero.
pub fn velocity_stats(evaluator: &FieldEvaluator, viewport: &Viewport, samples: usize) -> VelocityStats {
    let samples = samples.max(2);
    let dims = evaluator.dimensions();
    let mut max: f64 = 0.0;
    let mut total = 0.0;
    let mut count = 0;
    for i in 0..samples {
        for j in 0..samples {
            let t = [
                i as f64 / (samples - 1) as f64,
                j as f64 / (samples - 1) as f64,
            ];
            let point: Vec<f64> = (0..dims)
                .map(|dim| match dim {
                    0 | 1 => {
                        let (lo, hi) = viewport.range(dim);
                        lo as f64 + (hi as f64 - lo as f64) * t[dim]
                    }
                    _ => 0.0,
                })
                .collect();
            let Ok(velocity) = evaluator.cartesian(&point) else {
                continue;
            };
            let speed = norm(&velocity);
            if speed.is_finite() {
                max = max.max(speed);
                total += speed;
                count += 1;
            }
        }
    }
    VelocityStats {
        max,
        mean: if count > 0 { total / count as f64 } else { 0.0 },
        samples: count,
    }
}
