//! Trace-driven simulated rig for development and tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{RangeChannel, RangeReadError, RawSample, Rig};
use crate::controller::{ControllerCtx, MagnetDrives};

/// One cycle of simulated sensor readings.
/// `None` range values represent a failed ranging attempt.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct SimFrame {
    pub s1: u16,
    pub s2: u16,
    pub t1: Option<f64>,
    pub t2: Option<f64>,
}

/// Shared record of every drive command the controller issued.
pub type DriveLog = Arc<Mutex<Vec<MagnetDrives>>>;

/// A rig that replays a canned trace of sensor readings and records
/// the drive commands it receives.
///
/// The trace cursor advances when drives are applied, once per control
/// cycle, and holds the final frame when the trace runs out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct SimRig {
    trace: Vec<SimFrame>,

    /// Artificial per-read sensor latency, for exercising loop overrun
    /// behavior without hardware
    pub read_delay_us: u64,

    #[serde(skip)]
    cursor: usize,

    #[serde(skip)]
    drive_log: DriveLog,
}

impl SimRig {
    pub fn new(trace: Vec<SimFrame>) -> Self {
        Self {
            trace,
            read_delay_us: 0,
            cursor: 0,
            drive_log: DriveLog::default(),
        }
    }

    /// A trace holding a single frame forever
    pub fn steady(frame: SimFrame) -> Self {
        Self::new(vec![frame])
    }

    /// Handle for inspecting issued drive commands, valid across
    /// serialization of the controller only if taken after deserialization.
    pub fn drive_log(&self) -> DriveLog {
        self.drive_log.clone()
    }

    fn frame(&self) -> SimFrame {
        match self.trace.get(self.cursor) {
            Some(f) => *f,
            None => self.trace.last().copied().unwrap_or_default(),
        }
    }

    fn simulate_latency(&self) {
        if self.read_delay_us > 0 {
            std::thread::sleep(Duration::from_micros(self.read_delay_us));
        }
    }
}

#[typetag::serde]
impl Rig for SimRig {
    fn init(&mut self, _ctx: &ControllerCtx) -> Result<(), String> {
        if self.trace.is_empty() {
            return Err("Simulated rig requires at least one trace frame".to_string());
        }
        self.cursor = 0;
        match self.drive_log.lock() {
            Ok(mut log) => log.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        Ok(())
    }

    fn read_proximity(&mut self) -> RawSample {
        self.simulate_latency();
        let f = self.frame();
        RawSample { s1: f.s1, s2: f.s2 }
    }

    fn read_range(&mut self, channel: RangeChannel) -> Result<f64, RangeReadError> {
        self.simulate_latency();
        let f = self.frame();
        let val = match channel {
            RangeChannel::T1 => f.t1,
            RangeChannel::T2 => f.t2,
        };
        val.ok_or(RangeReadError { status: 4 })
    }

    fn set_drives(&mut self, drives: &MagnetDrives) {
        match self.drive_log.lock() {
            Ok(mut log) => log.push(*drives),
            Err(poisoned) => poisoned.into_inner().push(*drives),
        }

        // Drives mark the end of a cycle's hardware interaction
        if self.cursor + 1 < self.trace.len() {
            self.cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_advances_on_drives_and_holds_last_frame() {
        let mut rig = SimRig::new(vec![
            SimFrame {
                s1: 100,
                s2: 200,
                t1: Some(50.0),
                t2: Some(60.0),
            },
            SimFrame {
                s1: 110,
                s2: 210,
                t1: Some(51.0),
                t2: Some(61.0),
            },
        ]);
        rig.init(&ControllerCtx::default()).unwrap();

        assert_eq!(rig.read_proximity().s1, 100);
        rig.set_drives(&MagnetDrives::OFF);
        assert_eq!(rig.read_proximity().s1, 110);

        // Holds the last frame once exhausted
        rig.set_drives(&MagnetDrives::OFF);
        rig.set_drives(&MagnetDrives::OFF);
        assert_eq!(rig.read_proximity().s1, 110);
    }

    #[test]
    fn missing_range_reading_is_an_error() {
        let mut rig = SimRig::steady(SimFrame {
            s1: 500,
            s2: 500,
            t1: None,
            t2: Some(49.0),
        });
        rig.init(&ControllerCtx::default()).unwrap();

        assert!(rig.read_range(RangeChannel::T1).is_err());
        assert_eq!(rig.read_range(RangeChannel::T2), Ok(49.0));
    }

    #[test]
    fn drive_log_records_commands() {
        let mut rig = SimRig::steady(SimFrame::default());
        let log = rig.drive_log();
        rig.init(&ControllerCtx::default()).unwrap();

        rig.set_drives(&MagnetDrives::OFF);
        rig.set_drives(&MagnetDrives::OFF);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn empty_trace_fails_init() {
        let mut rig = SimRig::new(Vec::new());
        assert!(rig.init(&ControllerCtx::default()).is_err());
    }
}
