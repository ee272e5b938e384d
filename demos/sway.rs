//! Sway demo: stabilize a simulated stage while a companion thread
//! injects a slow sinusoidal force bias, rocking the element side to
//! side along one line.
//!
//! Run with `cargo run --example sway`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ferrostat::rig::SimFrame;
use ferrostat::{Controller, ControllerCtx, LineDispatcher, SimRig, StageConfig};

const SWAY_FREQ_HZ: f64 = 0.5;
const SWAY_AMP: f64 = 40.0;

fn main() -> Result<(), String> {
    let mut ctx = ControllerCtx::default();
    ctx.dt_ns = 10_000_000; // 100 Hz is plenty for a demo
    ctx.op_name = "sway_demo".to_string();

    let mut controller = Controller::new(ctx);
    StageConfig::default().install(&mut controller);
    controller.set_rig(Box::new(SimRig::steady(SimFrame {
        s1: 750,
        s2: 750,
        t1: Some(50.0),
        t2: Some(20.0),
    })));
    controller.add_dispatcher(Box::new(LineDispatcher::standard(
        controller.mode_handle(),
    )));

    // Companion thread plays the host's role, swaying the force bias
    // in opposite directions on the two axes
    let running = Arc::new(AtomicBool::new(true));
    let force_tx = controller.force_sender();
    let sway_running = running.clone();
    let sway = thread::spawn(move || {
        let mut t = 0.0_f64;
        while sway_running.load(Ordering::Relaxed) {
            let bias = SWAY_AMP * (2.0 * std::f64::consts::PI * SWAY_FREQ_HZ * t).sin();
            let _ = force_tx.try_send((bias as i32, -bias as i32));
            t += 0.02;
            thread::sleep(Duration::from_millis(20));
        }
    });

    // Two full sway periods
    let result = controller.run(running.clone(), Some(400));
    running.store(false, Ordering::Relaxed);
    sway.join().map_err(|_| "Sway thread panicked".to_string())?;
    result
}
