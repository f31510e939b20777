use std::time::Duration;

use flowlab::cas::SymbolicCas;
use flowlab::expr::{Lowerer, eval, parse, rewrite_atan2};
use flowlab::notebook::{MemoryStore, Store};
use flowlab::{
    CellKind, CoordinateSystem, Engine, EngineConfig, HeadlessDevice, Integrator, Notebook,
    SimulationParams, Viewport,
};

fn engine_on(device: HeadlessDevice, config: EngineConfig) -> Engine<HeadlessDevice> {
    Engine::new(
        device,
        config.without_warm_up_check(),
        SimulationParams::default().with_particle_count(25),
    )
    .with_seed(3)
}

#[test]
fn lowering_matches_direct_evaluation() {
    let sources = [
        "10*(y - x)",
        "x*(28 - z) - y",
        "sin(x)^2 + cos(y)^3 - z^4",
        "exp(-x*x/2)/sqrt(2*pi) + log(1 + y^2)",
        "x^7 - 3*y^-2 + abs(z)^1.5",
        "tanh(x) * (1 - y/(2 + z^2))",
        "x^65",
        "x^-67 + z",
        "y^66",
    ];
    for source in sources {
        let expr = parse(source).unwrap();
        let lowered = Lowerer::new()
            .bind_identity(&["x", "y", "z"])
            .lower(&expr)
            .unwrap();
        let reparsed = parse(&lowered).unwrap();
        for i in 0..12 {
            for j in 0..12 {
                let point = [
                    ("x", -3.0 + 0.53 * i as f64),
                    ("y", 0.25 + 0.41 * j as f64),
                    ("z", 2.0 - 0.37 * (i + j) as f64 / 2.0),
                ];
                let direct = eval(&expr, &point).unwrap();
                let lowered_value = eval(&reparsed, &point).unwrap();
                let scale = direct.abs().max(1.0);
                assert!(
                    (direct - lowered_value).abs() <= 1e-9 * scale,
                    "{source} at {point:?}: {direct} vs {lowered_value}"
                );
            }
        }
    }
}

#[test]
fn atan2_rewrite_keeps_partial_derivatives() {
    let mut nb = Notebook::new(Box::new(SymbolicCas::separating()));
    let cases = [("atan2(y, x)", "atan(y/x)"), ("atan2(x*y, 1 + x^2)", "atan(x*y/(1 + x^2))")];
    for (two_arg, one_arg) in cases {
        let rewritten = rewrite_atan2(&parse(two_arg).unwrap());
        let direct = parse(one_arg).unwrap();
        for var in ["x", "y"] {
            let a = nb.differentiate(&rewritten, var).unwrap();
            let b = nb.differentiate(&direct, var).unwrap();
            for point in [[0.7, 1.3], [2.0, -0.4], [1.1, 0.1]] {
                let scope = [("x", point[0]), ("y", point[1])];
                let (va, vb) = (eval(&a, &scope).unwrap(), eval(&b, &scope).unwrap());
                assert!((va - vb).abs() < 1e-12, "∂{two_arg}/∂{var}: {va} vs {vb}");
            }
        }
    }
    // ∂atan2(y, x)/∂x = -y/(x² + y²)
    let dx = nb
        .differentiate(&rewrite_atan2(&parse("atan2(y, x)").unwrap()), "x")
        .unwrap();
    let value = eval(&dx, &[("x", 0.7), ("y", 1.3)]).unwrap();
    assert!((value + 1.3 / (0.49 + 1.69)).abs() < 1e-12);
}

#[test]
fn ensure_context_is_idempotent() {
    for mut nb in [
        Notebook::new(Box::new(SymbolicCas::separating())),
        Notebook::new(Box::new(SymbolicCas::volatile())),
    ] {
        let g = nb.add_cell(CellKind::Code, "g(u) = u^2 + 1");
        let k = nb.add_cell(CellKind::Code, "k = g(2)");
        nb.evaluate_cell(&g).unwrap();
        nb.evaluate_cell(&k).unwrap();
        nb.clear_cache();
        nb.ensure_context();
        let once = nb.installed_names();
        let replays = nb.replay_count();
        nb.ensure_context();
        assert_eq!(nb.installed_names(), once);
        assert_eq!(nb.replay_count(), replays);
        assert!(!nb.is_dirty());
    }
}

#[test]
fn cells_are_the_only_source_of_definitions() {
    for mut nb in [
        Notebook::new(Box::new(SymbolicCas::separating())),
        Notebook::new(Box::new(SymbolicCas::volatile())),
    ] {
        let g = nb.add_cell(CellKind::Code, "g(u) = u^2");
        let k = nb.add_cell(CellKind::Code, "k = 2");
        nb.evaluate_cell(&g).unwrap();
        nb.evaluate_cell(&k).unwrap();
        let sum = parse("g(k) + k").unwrap();
        assert_eq!(nb.evaluate(&sum).unwrap().to_string(), "6");

        nb.edit_cell(&k, "k = 2 +").unwrap();
        assert!(nb.evaluate_cell(&k).is_err());
        assert!(nb.evaluate(&sum).unwrap().to_string().contains('k'));
        assert_eq!(nb.installed_names(), vec!["g(u) = u^2".to_string()]);

        nb.delete_cell(&g).unwrap();
        let err = nb.evaluate(&sum).unwrap_err();
        assert_eq!(err.kind(), "unresolved-identifier");
        assert!(nb.installed_names().is_empty());
        let derivative = nb.differentiate(&parse("g(x)").unwrap(), "x");
        assert!(derivative.is_err() || derivative.unwrap().to_string() != "2*x");
    }
}

#[test]
fn deleting_a_used_function_keeps_the_live_field() {
    let mut engine = engine_on(HeadlessDevice::new(), EngineConfig::default());
    let id = engine.add_cell(CellKind::Code, "g(u) = -u").unwrap();
    engine.evaluate_cell(&id).unwrap();
    engine.set_expressions(&["g(x)", "g(y)"]).unwrap();
    let live = engine.driver().live();
    assert!(live.is_some());

    assert!(engine.delete_cell(&id).is_err());
    assert_eq!(engine.driver().live(), live);
    let err = engine
        .notebook_mut()
        .evaluate(&parse("g(1)").unwrap())
        .unwrap_err();
    assert_eq!(err.kind(), "unresolved-identifier");
}

#[test]
fn rejected_changes_have_no_observable_effect() {
    let mut engine = engine_on(HeadlessDevice::new(), EngineConfig::default());
    engine.set_expressions(&["-y", "x"]).unwrap();
    assert!(engine.tick(0.01, 0.4, Viewport::default(), None));
    let live = engine.driver().live();
    let programs = engine.device().program_count();
    let request = engine.request().clone();
    let update = live.unwrap().update;
    let uniforms: Vec<_> = ["u_h", "u_min", "u_max", "u_rand_seed", "u_max_velocity"]
        .iter()
        .map(|name| engine.device().uniform(update, name))
        .collect();

    // Validation, dimension and compile failures.
    assert!(engine.set_expressions(&["-y", ""]).is_err());
    assert!(engine.set_coordinate_system(CoordinateSystem::spherical().unwrap()).is_err());
    engine.device_mut().fail_next_compile("out of registers");
    let err = engine.set_integrator(Integrator::Rk4).unwrap_err();
    assert_eq!(err.kind(), "shader-compile-failure");

    assert_eq!(engine.driver().live(), live);
    assert_eq!(engine.device().program_count(), programs);
    assert_eq!(engine.request(), &request);
    for (name, before) in ["u_h", "u_min", "u_max", "u_rand_seed", "u_max_velocity"]
        .iter()
        .zip(uniforms)
    {
        assert_eq!(engine.device().uniform(update, name), before, "{name}");
    }
}

#[test]
fn link_budget_aborts_swap() {
    let device = HeadlessDevice::new().with_link_delay(Duration::from_millis(20));
    let mut engine = engine_on(device, EngineConfig::default().with_link_budget_ms(1));
    let err = engine.set_expressions(&["-x"]).unwrap_err();
    assert_eq!(err.kind(), "shader-link-failure");
    assert!(!engine.is_compiled());
    assert_eq!(engine.device().program_count(), 0);
}

#[test]
fn first_order_step_contracts_by_one_minus_h() {
    let engine = {
        let mut engine = engine_on(HeadlessDevice::new(), EngineConfig::default());
        engine.set_expressions(&["-x", "-y", "-z"]).unwrap();
        engine
    };
    let field = engine.evaluator().unwrap();
    let stepper = field.stepper(Integrator::Euler, [1.0, 1.0, 0.0, 0.0]).unwrap();
    for h in [0.001, 0.01, 0.1] {
        let mut point = vec![3.0, -1.5, 0.25];
        for _ in 0..50 {
            let next = stepper.step(&point, h).unwrap();
            for (a, b) in next.iter().zip(&point) {
                assert!((a - (1.0 - h) * b).abs() <= 1e-12 * b.abs().max(1.0));
            }
            point = next;
        }
        assert!(point.iter().all(|c| c.abs() < 3.0));
    }
}

#[test]
fn notebook_round_trips_through_store() {
    let mut engine = engine_on(HeadlessDevice::new(), EngineConfig::default());
    let id = engine.add_cell(CellKind::Code, "sigma = 10").unwrap();
    engine.evaluate_cell(&id).unwrap();
    engine.set_expressions(&["sigma*(y - x)", "-y"]).unwrap();

    let mut store = MemoryStore::new();
    engine.save_notebook(&mut store, "session").unwrap();

    let mut other = engine_on(HeadlessDevice::new(), EngineConfig::default());
    assert!(!other.load_notebook(&store, "missing").unwrap());
    assert!(other.load_notebook(&store, "session").unwrap());
    other.set_expressions(&["sigma*(y - x)", "-y"]).unwrap();
    assert!(other.is_compiled());

    store
        .save("future", r#"{"version": 2, "cells": []}"#)
        .unwrap();
    let err = other.load_notebook(&store, "future").unwrap_err();
    assert_eq!(err.kind(), "unsupported-version");
}
