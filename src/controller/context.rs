//! Information about the current run that is shared with the
//! controller's appendages.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run context consumed by calcs, dispatchers, and the rig during init.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ControllerCtx {
    /// Control cycle period in nanoseconds.
    /// Used as the nominal integration step for the axis controllers;
    /// elapsed wall-clock time is deliberately not measured into the
    /// control law.
    pub dt_ns: u32,

    /// Pacing period for the comms thread in the dual-task model, in
    /// nanoseconds. The single-loop model dispatches every cycle and
    /// ignores this.
    pub comm_period_ns: u32,

    /// Inclusive band of raw proximity counts considered physically valid.
    /// A reading outside this band zeroes all coil drives for that cycle;
    /// control resumes automatically once readings return to range.
    pub valid_band: (u16, u16),

    /// When set, an inbound force command older than this many milliseconds
    /// decays to zero. When `None`, the last command persists indefinitely.
    pub stale_cmd_timeout_ms: Option<u64>,

    /// A name for this run, used for the log file and any file-backed
    /// dispatcher outputs, so it must be filename-compatible.
    pub op_name: String,

    /// Directory for file inputs and outputs.
    pub op_dir: PathBuf,
}

impl Default for ControllerCtx {
    fn default() -> Self {
        // Current time with seconds as op name, working directory as op dir.
        // Characters invalid in Windows filenames are stripped from the name.
        let op_name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            dt_ns: 500_000,          // 2 kHz
            comm_period_ns: 5_000_000, // 200 Hz
            valid_band: (10, 2000),
            stale_cmd_timeout_ms: None,
            op_name,
            op_dir: std::fs::canonicalize("./").unwrap_or_default(),
        }
    }
}

impl ControllerCtx {
    /// Nominal cycle period in seconds.
    pub fn dt_s(&self) -> f64 {
        (self.dt_ns as f64) / 1e9
    }
}
