// Simple custom benchmarking without criterion
use std::time::Instant;

use flowlab::cas::SymbolicCas;
use flowlab::coords::{CoordinateSystem, cartesian_variables};
use flowlab::expr::parse;
use flowlab::field::{FieldRequest, FieldWorkflow, WorkflowMode};
use flowlab::jacobian::JacobianEngine;
use flowlab::{DomainTransform, DrawMode, EncodingStrategy, Integrator, Notebook};

fn time_it<F: FnMut()>(name: &str, iterations: usize, mut f: F) {
    // Warmup
    for _ in 0..5 {
        f();
    }

    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    let elapsed = start.elapsed();

    let avg_ms = elapsed.as_secs_f64() * 1000.0 / iterations as f64;
    println!("{}: {:.3}ms avg ({} iterations)", name, avg_ms, iterations);
}

const LORENZ: [&str; 3] = ["10*(y - x)", "x*(28 - z) - y", "x*y - (8/3)*z"];

fn notebook() -> Notebook {
    Notebook::new(Box::new(SymbolicCas::separating()))
}

fn main() {
    println!("\n=== flowlab pipeline benchmarks ===\n");

    println!("--- Parsing ---");
    for source in ["x*(28 - z) - y", "sin(x)^2 + cos(y)^3*exp(-x*y) - atan2(y, x)/(1 + z^5)"] {
        time_it(&format!("parse ({} chars)", source.len()), 2000, || {
            let _ = parse(source);
        });
    }

    println!("\n--- Jacobians ---");
    let vars = cartesian_variables(3);
    let field: Vec<_> = LORENZ.iter().filter_map(|s| parse(s).ok()).collect();
    let mut nb = notebook();
    let mut engine = JacobianEngine::new(2000);
    time_it("field_jacobian (lorenz)", 200, || {
        nb.clear_cache();
        let _ = engine.field_jacobian(&mut nb, &field, &vars);
    });
    let jacobian = engine.field_jacobian(&mut nb, &field, &vars);
    time_it("newton_solve 3x3 (lorenz)", 50, || {
        nb.clear_cache();
        let _ = engine.newton_solve(&mut nb, Some(&jacobian), 1.0);
    });
    if let Ok(spherical) = CoordinateSystem::spherical() {
        time_it("resolve (spherical)", 50, || {
            nb.clear_cache();
            let _ = spherical.resolve(&mut nb);
        });
    }

    println!("\n--- Shader assembly ---");
    let cases = [
        ("lorenz rk4", FieldRequest::new(&LORENZ).with_integrator(Integrator::Rk4)),
        (
            "lorenz backward-euler",
            FieldRequest::new(&LORENZ).with_integrator(Integrator::BackwardEuler),
        ),
        (
            "tanh sink cash-karp",
            FieldRequest::new(&["-x", "-y"])
                .with_transform(DomainTransform::Tanh)
                .with_integrator(Integrator::CashKarp),
        ),
    ]
    .into_iter()
    .chain(CoordinateSystem::polar().ok().map(|polar| {
        (
            "polar euler",
            FieldRequest::new(&["r*(1 - r)", "1"]).with_coordinates(polar),
        )
    }));
    for (name, request) in cases {
        let mut nb = notebook();
        let mut workflow = FieldWorkflow::new(2000);
        time_it(&format!("prepare ({name})"), 50, || {
            let _ = workflow.prepare(
                &mut nb,
                &request,
                EncodingStrategy::Float,
                DrawMode::Points,
                WorkflowMode::Automated,
            );
        });
    }
}
