//! Control loop and host link for a planar magnetic levitation stage.
//!
//! A floating element is held above a planar array of four electromagnets.
//! Two oblique-mounted proximity channels are fused into estimated distances
//! by a fitted polynomial surface, the error against the calibrated targets is
//! rotated into the cardinal actuation axes, and a per-axis PID with filtered
//! derivative produces restoring forces that are mapped onto differential
//! coil drives. The whole pipeline runs once per control cycle at kilohertz
//! rates, while a line-oriented host link carries force commands and
//! position/calibration telemetry at a much lower cadence.

pub mod calc;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod link;
pub mod rig;

pub(crate) mod logging;

pub use calc::{Calc, Orchestrator};
pub use config::StageConfig;
pub use controller::{Controller, ControllerCtx};
pub use dispatcher::{CsvDispatcher, Dispatcher, LineDispatcher, ModeHandle};
pub use rig::{Rig, SimRig};
