//! The field equation workflow.
//!
//! `prepare` validates, expands, lowers and assembles without touching the
//! device. `commit` compiles, links and swaps. Only a fully successful commit
//! of the newest ticket changes what is live.

use std::time::Duration;

use bevy::log::{debug, info};

use crate::config::{DrawMode, EncodingStrategy, MAX_DIMENSIONS, MAX_IMPLICIT_DIMENSIONS, SimulationParams};
use crate::coords::{CoordinateSystem, cartesian_variables};
use crate::domain::DomainTransform;
use crate::error::{FlowError, IndexedError, Result};
use crate::gpu::{GpuDevice, ParticleDriver};
use crate::integrators::Integrator;
use crate::jacobian::JacobianEngine;
use crate::notebook::Notebook;
use crate::probe::FieldEvaluator;
use crate::shader::{
    DrawOptions, Gradient, ProgramSet, ScreenMapper, ShaderInputs, draw_program, update_program,
};

use super::{ColorMode, FieldEquations};

/// Everything that selects the compiled programs.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRequest {
    pub expressions: Vec<String>,
    /// `None` means Cartesian in as many dimensions as there are expressions.
    pub coordinates: Option<CoordinateSystem>,
    pub transform: DomainTransform,
    pub integrator: Integrator,
    pub color: ColorMode,
    pub mapper: ScreenMapper,
    pub gradient: Gradient,
}

impl FieldRequest {
    pub fn new<S: AsRef<str>>(expressions: &[S]) -> Self {
        Self {
            expressions: expressions.iter().map(|s| s.as_ref().to_string()).collect(),
            coordinates: None,
            transform: DomainTransform::Identity,
            integrator: Integrator::default(),
            color: ColorMode::default(),
            mapper: ScreenMapper::default(),
            gradient: Gradient::default(),
        }
    }

    pub fn with_coordinates(mut self, coordinates: CoordinateSystem) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_transform(mut self, transform: DomainTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_color(mut self, color: ColorMode) -> Self {
        self.color = color;
        self
    }

    pub fn with_mapper(mut self, mapper: ScreenMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.expressions.len()
    }
}

/// How validation failures are surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    /// The whole batch is rejected with one entry per expression.
    Interactive,
    /// The first failure is returned as is.
    Automated,
}

/// Assembled programs waiting for compile and swap.
#[derive(Debug, Clone)]
pub struct PendingCompile {
    pub ticket: u64,
    pub programs: ProgramSet,
    pub request: FieldRequest,
    /// CPU mirror of the assembled velocity.
    pub evaluator: FieldEvaluator,
}

#[derive(Debug, Clone)]
pub struct FieldWorkflow {
    generation: u64,
    last_errors: Vec<IndexedError>,
    jacobian: JacobianEngine,
}

impl FieldWorkflow {
    pub fn new(inversion_threshold: usize) -> Self {
        Self {
            generation: 0,
            last_errors: Vec::new(),
            jacobian: JacobianEngine::new(inversion_threshold),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Per-expression outcome of the last failed validation; empty after a success.
    pub fn last_errors(&self) -> &[IndexedError] {
        &self.last_errors
    }

    pub fn jacobian_mut(&mut self) -> &mut JacobianEngine {
        &mut self.jacobian
    }

    /// Validate, expand, lower and assemble. Issues a new ticket, which makes
    /// every earlier pending compile stale.
    pub fn prepare(
        &mut self,
        notebook: &mut Notebook,
        request: &FieldRequest,
        encoding: EncodingStrategy,
        draw_mode: DrawMode,
        mode: WorkflowMode,
    ) -> Result<PendingCompile> {
        let n = request.dimensions();
        if n == 0 || n > MAX_DIMENSIONS {
            return Err(FlowError::application(format!(
                "expected 1 to {MAX_DIMENSIONS} expressions, got {n}"
            )));
        }
        let coordinates = request
            .coordinates
            .clone()
            .unwrap_or_else(|| CoordinateSystem::cartesian(n));
        if coordinates.dimensions() != n {
            return Err(FlowError::application(format!(
                "{} has {} dimension(s) but {n} expression(s) were given",
                coordinates.name,
                coordinates.dimensions()
            )));
        }
        if request.integrator.is_implicit() && n > MAX_IMPLICIT_DIMENSIONS {
            return Err(FlowError::application(format!(
                "{} supports at most {MAX_IMPLICIT_DIMENSIONS} dimensions",
                request.integrator
            )));
        }

        let vars = cartesian_variables(n);
        let field = match FieldEquations::new(&coordinates.labels, &vars)
            .generate(notebook, &request.expressions)
        {
            Ok(field) => field,
            Err(errors) => return Err(self.reject(errors, mode)),
        };
        self.last_errors.clear();

        let functions = notebook.functions().clone();
        let chart = coordinates.resolve(notebook)?;
        let newton = match request.integrator.newton_coefficient() {
            Some(coefficient) => {
                let jacobian = if chart.is_identity() && request.transform.is_identity() {
                    Some(self.jacobian.field_jacobian(notebook, &field.expanded, &vars))
                } else {
                    None
                };
                Some(self.jacobian.newton_solve(notebook, jacobian.as_deref(), coefficient)?)
            }
            None => None,
        };

        let color = request.color.glsl(&vars, &functions)?;
        let inputs = ShaderInputs {
            vars: &vars,
            field: &field.lowered,
            functions: &functions,
            chart: &chart,
            transform: &request.transform,
            integrator: request.integrator,
            newton: newton.as_ref(),
            encoding,
        };
        let update = update_program(&inputs)?;
        let draw = draw_program(
            &inputs,
            &DrawOptions {
                color: &color,
                gradient: &request.gradient,
                mapper: request.mapper,
                mode: draw_mode,
            },
        )?;

        self.generation += 1;
        Ok(PendingCompile {
            ticket: self.generation,
            programs: ProgramSet {
                update,
                draw,
                dimensions: n,
            },
            request: request.clone(),
            evaluator: FieldEvaluator::new(
                coordinates.labels.clone(),
                field.expanded,
                functions,
                chart,
                request.transform.clone(),
            ),
        })
    }

    fn reject(&mut self, errors: Vec<IndexedError>, mode: WorkflowMode) -> FlowError {
        self.last_errors = errors.clone();
        match mode {
            WorkflowMode::Interactive => FlowError::WorkflowValidation { errors },
            WorkflowMode::Automated => errors
                .into_iter()
                .find_map(|entry| entry.error)
                .unwrap_or_else(|| FlowError::application("validation failed")),
        }
    }

    /// Compile, link and swap. Returns `Ok(false)` when a newer ticket has
    /// been issued since `pending` was prepared; nothing changes then.
    pub fn commit<D: GpuDevice>(
        &mut self,
        driver: &mut ParticleDriver<D>,
        pending: &PendingCompile,
        params: &SimulationParams,
        budget: Option<Duration>,
    ) -> Result<bool> {
        if pending.ticket != self.generation {
            debug!(
                "discarding stale compile {} (current {})",
                pending.ticket, self.generation
            );
            return Ok(false);
        }
        let compiled = driver.compile_set(&pending.programs, budget)?;
        if let Err(error) = driver.swap_in(compiled, params) {
            driver.discard(compiled);
            return Err(error);
        }
        info!(
            "compiled {}D field with {} ({} transform)",
            pending.programs.dimensions,
            pending.request.integrator,
            pending.request.transform.name()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::SymbolicCas;
    use crate::gpu::HeadlessDevice;

    fn setup() -> (Notebook, FieldWorkflow, ParticleDriver<HeadlessDevice>) {
        (
            Notebook::new(Box::new(SymbolicCas::separating())),
            FieldWorkflow::new(2000),
            ParticleDriver::new(HeadlessDevice::new(), EncodingStrategy::Float).with_seed(5),
        )
    }

    #[test]
    fn test_interactive_rejects_whole_batch() {
        let (mut nb, mut workflow, _) = setup();
        let request = FieldRequest::new(&["x", "q(x)", "z"]);
        let err = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Interactive)
            .unwrap_err();
        let FlowError::WorkflowValidation { errors } = err else {
            panic!("expected a validation failure");
        };
        assert_eq!(errors.len(), 3);
        assert_eq!(workflow.last_errors().len(), 3);
        assert_eq!(workflow.generation(), 0);

        let err = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Automated)
            .unwrap_err();
        assert_eq!(err.kind(), "unresolved-identifier");
    }

    #[test]
    fn test_stale_ticket_is_discarded() {
        let (mut nb, mut workflow, mut driver) = setup();
        let params = SimulationParams::default().with_particle_count(16);
        let request = FieldRequest::new(&["-x", "-y"]);
        let first = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Interactive)
            .unwrap();
        let second = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Interactive)
            .unwrap();
        assert!(!workflow.commit(&mut driver, &first, &params, None).unwrap());
        assert!(driver.live().is_none());
        assert!(workflow.commit(&mut driver, &second, &params, None).unwrap());
        assert!(driver.live().is_some());
    }

    #[test]
    fn test_dimension_limits() {
        let (mut nb, mut workflow, _) = setup();
        let request = FieldRequest::new(&["x", "y", "z", "w", "u"]).with_integrator(Integrator::BackwardEuler);
        let err = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Interactive)
            .unwrap_err();
        assert_eq!(err.kind(), "workflow-application-failure");
        let polar = FieldRequest::new(&["1", "1", "1"]).with_coordinates(CoordinateSystem::polar().unwrap());
        assert!(workflow
            .prepare(&mut nb, &polar, EncodingStrategy::Float, DrawMode::Points, WorkflowMode::Interactive)
            .is_err());
    }

    #[test]
    fn test_implicit_field_compiles() {
        let (mut nb, mut workflow, mut driver) = setup();
        let request = FieldRequest::new(&["-y - x", "x - y"]).with_integrator(Integrator::Trapezoidal);
        let pending = workflow
            .prepare(&mut nb, &request, EncodingStrategy::Packed, DrawMode::Trails, WorkflowMode::Automated)
            .unwrap();
        assert!(pending.programs.update.fragment.contains("State newton_delta(State nz, State ng, float h)"));
        let params = SimulationParams::default().with_particle_count(4);
        assert!(workflow.commit(&mut driver, &pending, &params, None).unwrap());
    }
}
