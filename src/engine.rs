//! The caller-facing engine.
//!
//! Owns the notebook (and through it the CAS), the workflow and the particle
//! driver. Every change that affects the programs goes through the workflow;
//! a failed change leaves the live programs, their uniforms and the active
//! request untouched.

use std::time::Duration;

use bevy::log::{info, warn};
use bevy::prelude::*;

use crate::cas::create_engine;
use crate::config::{EngineConfig, SimulationParams, VELOCITY_PROBE_SAMPLES, Viewport};
use crate::coords::CoordinateSystem;
use crate::domain::DomainTransform;
use crate::error::{IndexedError, Result};
use crate::field::{ColorMode, FieldRequest, FieldWorkflow, WorkflowMode};
use crate::gpu::{GpuDevice, ParticleDriver};
use crate::integrators::Integrator;
use crate::notebook::{CellId, CellKind, Notebook, Store};
use crate::presets::Preset;
use crate::probe::{FieldEvaluator, velocity_stats};

#[derive(Resource)]
pub struct Engine<D: GpuDevice> {
    config: EngineConfig,
    params: SimulationParams,
    notebook: Notebook,
    workflow: FieldWorkflow,
    driver: ParticleDriver<D>,
    /// The request behind the live programs, or the draft when nothing has
    /// been compiled yet.
    request: FieldRequest,
    evaluator: Option<FieldEvaluator>,
    max_velocity: f32,
}

impl<D: GpuDevice> Engine<D> {
    pub fn new(device: D, config: EngineConfig, params: SimulationParams) -> Self {
        let mut notebook = Notebook::new(create_engine(config.cas_backend));
        let mut workflow = FieldWorkflow::new(config.inversion_node_threshold);
        if config.warm_up_check {
            workflow.jacobian_mut().self_check(&mut notebook);
        }
        Self {
            driver: ParticleDriver::new(device, config.encoding),
            config,
            params,
            notebook,
            workflow,
            request: FieldRequest::new::<&str>(&[]),
            evaluator: None,
            max_velocity: 1.0,
        }
    }

    /// Reseed the particle RNG deterministically.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.driver = self.driver.with_seed(seed);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Replace the simulation parameters. A new particle count reallocates
    /// and reseeds the textures.
    pub fn set_params(&mut self, params: SimulationParams) -> Result<()> {
        let reseed = params.particle_count != self.params.particle_count;
        let viewport_changed = params.viewport != self.params.viewport;
        self.params = params;
        if reseed {
            if let Some(state) = self.driver.state() {
                let dims = state.dimensions();
                self.driver.allocate(dims, &self.params)?;
            }
        }
        if viewport_changed {
            self.probe_velocity();
        }
        Ok(())
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn notebook_mut(&mut self) -> &mut Notebook {
        &mut self.notebook
    }

    pub fn driver(&self) -> &ParticleDriver<D> {
        &self.driver
    }

    pub fn device(&self) -> &D {
        self.driver.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.driver.device_mut()
    }

    /// The request behind the live programs.
    pub fn request(&self) -> &FieldRequest {
        &self.request
    }

    pub fn evaluator(&self) -> Option<&FieldEvaluator> {
        self.evaluator.as_ref()
    }

    pub fn max_velocity(&self) -> f32 {
        self.max_velocity
    }

    pub fn is_compiled(&self) -> bool {
        self.driver.live().is_some()
    }

    /// Per-expression errors of the last rejected batch.
    pub fn last_errors(&self) -> &[IndexedError] {
        self.workflow.last_errors()
    }

    // Cells. Each mutation recompiles the active field, since user functions
    // are part of the programs.

    pub fn add_cell(&mut self, kind: CellKind, input: &str) -> Result<CellId> {
        let id = self.notebook.add_cell(kind, input);
        self.refresh()?;
        Ok(id)
    }

    pub fn delete_cell(&mut self, id: &CellId) -> Result<()> {
        self.notebook.delete_cell(id)?;
        self.refresh()
    }

    pub fn move_cell(&mut self, id: &CellId, index: usize) -> Result<()> {
        self.notebook.move_cell(id, index)?;
        self.refresh()
    }

    pub fn edit_cell(&mut self, id: &CellId, input: &str) -> Result<()> {
        self.notebook.edit_cell(id, input)?;
        self.refresh()
    }

    pub fn evaluate_cell(&mut self, id: &CellId) -> Result<()> {
        self.notebook.evaluate_cell(id)?;
        self.refresh()
    }

    // Field selection. Each setter is atomic: on failure the previous
    // request stays active.

    pub fn set_expressions<S: AsRef<str>>(&mut self, expressions: &[S]) -> Result<()> {
        let mut candidate = self.request.clone();
        candidate.expressions = expressions.iter().map(|s| s.as_ref().to_string()).collect();
        self.apply(candidate, WorkflowMode::Interactive)
    }

    pub fn set_coordinate_system(&mut self, coordinates: CoordinateSystem) -> Result<()> {
        let candidate = self.request.clone().with_coordinates(coordinates);
        self.apply(candidate, WorkflowMode::Interactive)
    }

    pub fn set_domain_transform(&mut self, transform: DomainTransform) -> Result<()> {
        let candidate = self.request.clone().with_transform(transform);
        self.apply(candidate, WorkflowMode::Interactive)
    }

    pub fn set_integrator(&mut self, integrator: Integrator) -> Result<()> {
        let candidate = self.request.clone().with_integrator(integrator);
        self.apply(candidate, WorkflowMode::Interactive)
    }

    pub fn set_color_mode(&mut self, color: ColorMode) -> Result<()> {
        let candidate = self.request.clone().with_color(color);
        self.apply(candidate, WorkflowMode::Interactive)
    }

    /// Replace the whole request at once.
    pub fn set_field(&mut self, request: FieldRequest) -> Result<()> {
        self.apply(request, WorkflowMode::Interactive)
    }

    /// Recompile the active request.
    pub fn recompile(&mut self) -> Result<()> {
        self.apply(self.request.clone(), WorkflowMode::Interactive)
    }

    fn refresh(&mut self) -> Result<()> {
        if self.request.expressions.is_empty() {
            return Ok(());
        }
        self.recompile()
    }

    fn apply(&mut self, candidate: FieldRequest, mode: WorkflowMode) -> Result<()> {
        if candidate.expressions.is_empty() {
            self.request = candidate;
            return Ok(());
        }
        let pending = self.workflow.prepare(
            &mut self.notebook,
            &candidate,
            self.config.encoding,
            self.config.draw_mode,
            mode,
        )?;
        let budget = self.config.link_budget_ms.map(Duration::from_millis);
        if self
            .workflow
            .commit(&mut self.driver, &pending, &self.params, budget)?
        {
            self.request = candidate;
            self.evaluator = Some(pending.evaluator);
            self.probe_velocity();
        }
        Ok(())
    }

    fn probe_velocity(&mut self) {
        if let Some(evaluator) = &self.evaluator {
            let stats = velocity_stats(evaluator, &self.params.viewport, VELOCITY_PROBE_SAMPLES);
            self.max_velocity = if stats.max > 0.0 { stats.max as f32 } else { 1.0 };
        }
    }

    /// One update dispatch. Returns false when nothing is compiled.
    pub fn tick(
        &mut self,
        step: f32,
        seed: f32,
        viewport: Viewport,
        transform_params: Option<[f32; 4]>,
    ) -> bool {
        self.params.step = step;
        if let Some(transform_params) = transform_params {
            self.params.transform_params = transform_params;
        }
        if viewport != self.params.viewport {
            self.params.viewport = viewport;
            self.probe_velocity();
        }
        self.driver.tick(&self.params, seed, self.max_velocity)
    }

    pub fn draw(&mut self) -> bool {
        self.driver
            .draw(&self.params, self.config.draw_mode, self.max_velocity)
    }

    /// Replace the notebook and field with a built-in scene. Uses the
    /// automated entry point: the first failure is returned.
    pub fn load_preset(&mut self, preset: &Preset) -> Result<()> {
        let existing: Vec<CellId> = self.notebook.cells().map(|(id, _)| id.clone()).collect();
        for id in &existing {
            self.notebook.delete_cell(id)?;
        }
        for input in &preset.cells {
            let id = self.notebook.add_cell(CellKind::Code, *input);
            self.notebook.evaluate_cell(&id)?;
        }
        self.params = preset.params.clone();
        self.apply(preset.request.clone(), WorkflowMode::Automated)?;
        info!("loaded preset {}", preset.name);
        Ok(())
    }

    pub fn save_notebook(&self, store: &mut dyn Store, key: &str) -> Result<()> {
        self.notebook.save(store, key)
    }

    /// Load a saved notebook and recompile against it. Returns false when
    /// nothing was stored under `key`.
    pub fn load_notebook(&mut self, store: &dyn Store, key: &str) -> Result<bool> {
        if !self.notebook.load(store, key)? {
            return Ok(false);
        }
        for (id, error) in self.notebook.evaluate_all() {
            warn!("cell {} failed after load: {}", id, error);
        }
        self.refresh()?;
        Ok(true)
    }
}
