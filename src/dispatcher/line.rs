//! Line-oriented telemetry stream for the host link.
//!
//! In normal operation, emits one `POS:<x>,<y>` line per consumed row with
//! the normalized position, followed by a diagnostic line of loop
//! internals. In calibration mode, emits raw smoothed sensor counts paired
//! with range-sensor ground truth as bare CSV for offline surface fitting.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::Dispatcher;
use crate::controller::ControllerCtx;

/// Shared flag selecting between normal and calibration telemetry.
/// Cloned between the dispatcher and whatever handles host commands.
#[derive(Clone, Debug, Default)]
pub struct ModeHandle(Arc<AtomicBool>);

impl ModeHandle {
    pub fn calibration(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set_calibration(&self, on: bool) {
        self.0.store(on, Ordering::Relaxed);
    }
}

#[derive(Serialize, Deserialize)]
pub struct LineDispatcher {
    /// Fields holding the normalized position
    pos_fields: [String; 2],

    /// Label and field for each entry of the diagnostic line.
    /// Empty disables the line.
    diag_fields: Vec<(String, String)>,

    /// Fields streamed as bare CSV in calibration mode
    cal_fields: Vec<String>,

    #[serde(skip)]
    sink: Option<Box<dyn Write + Send>>,

    #[serde(skip)]
    mode: ModeHandle,

    #[serde(skip)]
    last_mode: bool,

    #[serde(skip)]
    pos_indices: [usize; 2],

    #[serde(skip)]
    diag_indices: Vec<usize>,

    #[serde(skip)]
    cal_indices: Vec<usize>,
}

impl LineDispatcher {
    /// Dispatcher wired for the standard stage calc graph, writing to stdout.
    /// Each row emits the position line followed by per-axis error and
    /// output terms.
    pub fn standard(mode: ModeHandle) -> Self {
        Self {
            pos_fields: ["pos_nx.y".to_string(), "pos_ny.y".to_string()],
            diag_fields: vec![
                ("Ex".to_string(), "pid_x.err".to_string()),
                ("Ey".to_string(), "pid_y.err".to_string()),
                ("Sx".to_string(), "pid_x.y".to_string()),
                ("Sy".to_string(), "pid_y.y".to_string()),
            ],
            cal_fields: vec![
                "cal_s1.y".to_string(),
                "cal_s2.y".to_string(),
                "rig.t1s".to_string(),
                "rig.t2s".to_string(),
            ],
            sink: None,
            mode,
            last_mode: false,
            pos_indices: [0, 0],
            diag_indices: Vec::new(),
            cal_indices: Vec::new(),
        }
    }

    /// Extend the diagnostic line with per-axis integral state
    pub fn with_diagnostics(mut self) -> Self {
        self.diag_fields.push(("Ix".to_string(), "pid_x.integral".to_string()));
        self.diag_fields.push(("Iy".to_string(), "pid_y.integral".to_string()));
        self
    }

    /// Redirect output away from stdout
    pub fn with_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn write_line(&mut self, line: &str) -> Result<(), String> {
        let res = match &mut self.sink {
            Some(sink) => writeln!(sink, "{line}").and_then(|_| sink.flush()),
            None => {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{line}")
            }
        };
        res.map_err(|e| e.to_string())
    }
}

fn resolve(names: &[String], field: &str) -> Result<usize, String> {
    names
        .iter()
        .position(|n| n == field)
        .ok_or_else(|| format!("Telemetry field `{field}` is not dispatched"))
}

#[typetag::serde]
impl Dispatcher for LineDispatcher {
    fn init(&mut self, _ctx: &ControllerCtx, names: &[String]) -> Result<(), String> {
        self.pos_indices = [
            resolve(names, &self.pos_fields[0])?,
            resolve(names, &self.pos_fields[1])?,
        ];
        self.diag_indices = self
            .diag_fields
            .iter()
            .map(|(_, field)| resolve(names, field))
            .collect::<Result<_, _>>()?;
        self.cal_indices = self
            .cal_fields
            .iter()
            .map(|field| resolve(names, field))
            .collect::<Result<_, _>>()?;
        self.last_mode = self.mode.calibration();
        Ok(())
    }

    fn consume(
        &mut self,
        _time: SystemTime,
        _timestamp_ns: i64,
        values: &[f64],
    ) -> Result<(), String> {
        let calibration = self.mode.calibration();

        // Acknowledge mode changes in-band so the host can sync its parser
        if calibration != self.last_mode {
            self.last_mode = calibration;
            let ack = if calibration {
                "MODE: CALIBRATION ACTIVE"
            } else {
                "MODE: STABILIZATION ACTIVE"
            };
            self.write_line(ack)?;
        }

        if calibration {
            let row = self
                .cal_indices
                .iter()
                .map(|&i| format!("{:.2}", values[i]))
                .collect::<Vec<String>>()
                .join(",");
            self.write_line(&row)?;
        } else {
            let x = values[self.pos_indices[0]].round() as i64;
            let y = values[self.pos_indices[1]].round() as i64;
            self.write_line(&format!("POS:{x},{y}"))?;

            if !self.diag_fields.is_empty() {
                let diag = self
                    .diag_fields
                    .iter()
                    .zip(self.diag_indices.iter())
                    .map(|((label, _), &i)| format!("{label}:{:.2}", values[i]))
                    .collect::<Vec<String>>()
                    .join(" ");
                self.write_line(&diag)?;
            }
        }

        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(sink) = &mut self.sink {
            let _ = sink.flush();
        }
    }
}
