//! Dual-task demo: the control loop runs flat-out on the main thread,
//! paced only by simulated sensor latency, while a comms thread emits
//! telemetry lines and logs every channel to CSV at the comm period.
//!
//! Run with `cargo run --example dual_task`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ferrostat::rig::SimFrame;
use ferrostat::{
    Controller, ControllerCtx, CsvDispatcher, LineDispatcher, SimRig, StageConfig,
};

fn main() -> Result<(), String> {
    let mut ctx = ControllerCtx::default();
    ctx.comm_period_ns = 20_000_000; // 50 Hz telemetry
    ctx.op_name = "dual_task_demo".to_string();

    let mut controller = Controller::new(ctx);
    StageConfig::default().install(&mut controller);

    let mut rig = SimRig::steady(SimFrame {
        s1: 750,
        s2: 750,
        t1: Some(50.0),
        t2: Some(20.0),
    });
    rig.read_delay_us = 100; // Three sensor reads per cycle, ~3 kHz loop
    controller.set_rig(Box::new(rig));

    controller.add_dispatcher(Box::new(
        LineDispatcher::standard(controller.mode_handle()).with_diagnostics(),
    ));
    controller.add_dispatcher(Box::new(CsvDispatcher::new()));

    let snapshot = controller.snapshot_cell();
    let running = Arc::new(AtomicBool::new(true));
    controller.run_split(running, Some(10_000))?;

    let last = snapshot.load();
    println!(
        "Ran {} control cycles; final position ({:.1}, {:.1}), forces ({:.2}, {:.2})",
        last.cycle, last.x, last.y, last.fx, last.fy
    );
    Ok(())
}
