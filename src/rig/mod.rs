//! Hardware interface to the levitation rig's sensors and magnets.

use std::fmt;

use crate::controller::{ControllerCtx, MagnetDrives};

mod sim;
pub use sim::{DriveLog, SimFrame, SimRig};

/// One raw reading of the two analog proximity sensors, in ADC counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    pub s1: u16,
    pub s2: u16,
}

/// The two time-of-flight range sensors used for calibration ground truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeChannel {
    T1,
    T2,
}

/// A range sensor returned an invalid ranging status for this reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeReadError {
    /// Device-reported ranging status code
    pub status: u8,
}

impl fmt::Display for RangeReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range read failed with status {}", self.status)
    }
}

impl std::error::Error for RangeReadError {}

/// Sensing and actuation hardware for one levitation stage.
///
/// Range reads are fallible per-sample; the controller substitutes its
/// latest smoothed value when a read fails.
#[typetag::serde(tag = "type")]
pub trait Rig: Send + fmt::Debug {
    /// Bring up sensors and drivers, with magnets de-energized
    fn init(&mut self, ctx: &ControllerCtx) -> Result<(), String>;

    /// Read both proximity sensors
    fn read_proximity(&mut self) -> RawSample;

    /// Read one range sensor distance in millimeters, before offset correction
    fn read_range(&mut self, channel: RangeChannel) -> Result<f64, RangeReadError>;

    /// Apply drive levels to all four magnets
    fn set_drives(&mut self, drives: &MagnetDrives);

    /// De-energize and release hardware
    fn terminate(&mut self) {
        self.set_drives(&MagnetDrives::OFF);
    }
}
