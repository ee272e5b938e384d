//! Mapping from signed per-axis force commands to unipolar coil drive levels.

use serde::{Deserialize, Serialize};

/// Full-scale drive level for a single coil direction.
pub const MAX_DRIVE: f64 = 255.0;

/// Drive levels for one electromagnet's two winding directions.
/// At most one of the two is nonzero.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct CoilDrive {
    pub forward: f64,
    pub reverse: f64,
}

impl CoilDrive {
    /// Both directions de-energized
    pub const OFF: Self = Self {
        forward: 0.0,
        reverse: 0.0,
    };

    /// Split a signed drive command into the two winding directions,
    /// clamping magnitude to full scale.
    pub fn from_signed(cmd: f64) -> Self {
        let magnitude = cmd.abs().min(MAX_DRIVE);
        if cmd >= 0.0 {
            Self {
                forward: magnitude,
                reverse: 0.0,
            }
        } else {
            Self {
                forward: 0.0,
                reverse: magnitude,
            }
        }
    }
}

/// Sign applied to each magnet's drive for a positive force command on its
/// axis. These depend on winding direction and mounting orientation, so
/// they are determined empirically per rig.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct AxisPolarity {
    pub front: f64,
    pub back: f64,
    pub left: f64,
    pub right: f64,
}

impl Default for AxisPolarity {
    fn default() -> Self {
        Self {
            front: -1.0,
            back: 1.0,
            left: 1.0,
            right: -1.0,
        }
    }
}

/// Drive state for the full set of four magnets.
/// The front/back pair actuates the y-axis and the left/right pair
/// actuates the x-axis.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct MagnetDrives {
    pub front: CoilDrive,
    pub back: CoilDrive,
    pub left: CoilDrive,
    pub right: CoilDrive,
}

impl MagnetDrives {
    /// All magnets de-energized
    pub const OFF: Self = Self {
        front: CoilDrive::OFF,
        back: CoilDrive::OFF,
        left: CoilDrive::OFF,
        right: CoilDrive::OFF,
    };

    /// Map signed per-axis force commands onto the four magnets.
    /// Paired magnets receive equal-magnitude, opposite-polarity commands
    /// so that they pull and push together.
    pub fn from_forces(fx: f64, fy: f64, polarity: &AxisPolarity) -> Self {
        Self {
            front: CoilDrive::from_signed(polarity.front * fy),
            back: CoilDrive::from_signed(polarity.back * fy),
            left: CoilDrive::from_signed(polarity.left * fx),
            right: CoilDrive::from_signed(polarity.right * fx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_drive_splits_and_clamps() {
        assert_eq!(
            CoilDrive::from_signed(100.0),
            CoilDrive {
                forward: 100.0,
                reverse: 0.0
            }
        );
        assert_eq!(
            CoilDrive::from_signed(-100.0),
            CoilDrive {
                forward: 0.0,
                reverse: 100.0
            }
        );
        assert_eq!(CoilDrive::from_signed(1e6).forward, MAX_DRIVE);
        assert_eq!(CoilDrive::from_signed(-1e6).reverse, MAX_DRIVE);
        assert_eq!(CoilDrive::from_signed(0.0), CoilDrive::OFF);
    }

    #[test]
    fn at_most_one_direction_energized() {
        for cmd in [-300.0, -1.0, -1e-12, 0.0, 1e-12, 1.0, 300.0] {
            let d = CoilDrive::from_signed(cmd);
            assert!(d.forward == 0.0 || d.reverse == 0.0);
            assert!(d.forward >= 0.0 && d.reverse >= 0.0);
        }
    }

    #[test]
    fn paired_magnets_oppose() {
        let p = AxisPolarity::default();
        let d = MagnetDrives::from_forces(40.0, 60.0, &p);

        // +y: front reverse-wound, back forward-wound
        assert_eq!(d.front.reverse, 60.0);
        assert_eq!(d.front.forward, 0.0);
        assert_eq!(d.back.forward, 60.0);
        assert_eq!(d.back.reverse, 0.0);

        // +x: left forward-wound, right reverse-wound
        assert_eq!(d.left.forward, 40.0);
        assert_eq!(d.right.reverse, 40.0);
    }

    #[test]
    fn negative_forces_flip_every_coil() {
        let p = AxisPolarity::default();
        let pos = MagnetDrives::from_forces(40.0, 60.0, &p);
        let neg = MagnetDrives::from_forces(-40.0, -60.0, &p);

        assert_eq!(pos.front.forward, neg.front.reverse);
        assert_eq!(pos.back.forward, neg.back.reverse);
        assert_eq!(pos.left.forward, neg.left.reverse);
        assert_eq!(pos.right.forward, neg.right.reverse);
    }

    #[test]
    fn zero_forces_are_off() {
        let d = MagnetDrives::from_forces(0.0, 0.0, &AxisPolarity::default());
        assert_eq!(d, MagnetDrives::OFF);
    }
}
