use std::thread;
use std::time::Duration;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use flowlab::{Engine, FlowFieldPlugin, HeadlessDevice, presets};

const FRAMES: usize = 240;

fn main() {
    let preset = std::env::args()
        .nth(1)
        .and_then(|name| presets::NAMES.iter().copied().find(|known| *known == name))
        .unwrap_or("lorenz");

    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default()))
        .add_plugins(FlowFieldPlugin::with_preset(preset));
    app.finish();
    app.cleanup();

    for _ in 0..FRAMES {
        app.update();
        thread::sleep(Duration::from_millis(16));
    }

    let engine = app.world().resource::<Engine<HeadlessDevice>>();
    match engine.driver().state() {
        Some(state) => info!(
            "{}: {} particle(s) in {} dimension(s), {} update(s), max speed {:.3}",
            preset,
            state.capacity(),
            state.dimensions(),
            state.epoch(),
            engine.max_velocity()
        ),
        None => warn!("{}: nothing compiled", preset),
    }
}
