//! Compile the Lorenz scene against the headless device, dispatch a few
//! frames, and trace the attractor on the CPU reference.

use flowlab::gpu::DeviceCommand;
use flowlab::probe::ReferenceSimulation;
use flowlab::{Engine, EngineConfig, HeadlessDevice, SimulationParams, presets};

fn main() -> flowlab::Result<()> {
    let preset = presets::lorenz();
    let mut engine = Engine::new(HeadlessDevice::new(), EngineConfig::default(), SimulationParams::default())
        .with_seed(42);
    engine.load_preset(&preset)?;

    for frame in 0..60 {
        let viewport = engine.params().viewport;
        engine.tick(0.005, frame as f32 * 0.618, viewport, None);
        engine.draw();
    }
    let updates = engine
        .device()
        .commands()
        .iter()
        .filter(|c| matches!(c, DeviceCommand::Update { .. }))
        .count();
    println!("dispatched {updates} update pass(es), max speed {:.2}", engine.max_velocity());

    let Some(evaluator) = engine.evaluator() else {
        println!("nothing compiled");
        return Ok(());
    };
    let params = preset.params.clone().with_particle_count(400).with_drop_rate(0.0);
    let mut sim = ReferenceSimulation::new(evaluator, preset.request.integrator, params, 7)?;
    sim.run(2000);
    let (left, right): (Vec<_>, Vec<_>) = sim.positions().iter().partition(|p| p[0] < 0.0);
    let mean_z = sim.positions().iter().map(|p| p[2]).sum::<f64>() / sim.positions().len() as f64;
    println!(
        "lobes: {} left, {} right, mean z {:.1}",
        left.len(),
        right.len(),
        mean_z
    );
    Ok(())
}
