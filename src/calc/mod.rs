//! Calculations that are run at each cycle during operation.
//!
//! `Calc` objects are registered with the `Orchestrator` and serialized with
//! the controller. Each calc is a function consuming any number of inputs and
//! producing any number of outputs, with optional persistent internal state.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

mod orchestrator;
pub use orchestrator::{Orchestrator, RIG_NODE};

// Specific calc implementations

mod constant;
mod ewma;
mod fusion;
mod pid;
mod rescale;
mod rotate;

pub use constant::Constant;
pub use ewma::Ewma;
pub use fusion::Poly2Surface;
pub use pid::Pid;
pub use rescale::Rescale;
pub use rotate::{uv_to_xy, xy_to_uv, RotateOblique};

use crate::controller::ControllerCtx;

// Type aliases for clarification purposes, since
// there will be a lot of strings and usize ints
pub type FieldName = String;

pub type CalcName = String;
pub type CalcInputName = String;
pub type CalcOutputName = String;

pub type SrcIndex = usize;
pub type DstIndex = usize;

/// A calculation that takes some inputs and produces some outputs
/// at each timestep, and may have some persistent internal state.
#[typetag::serde(tag = "type")]
pub trait Calc: Send + Sync {
    /// Reset internal state and register calc tape indices
    fn init(
        &mut self,
        ctx: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String>;

    /// Clear state to reset for another run
    fn terminate(&mut self);

    /// Run calcs for a cycle
    fn eval(&mut self, tape: &mut [f64]);

    /// Map from input field names (like `u`, without prefix) to the state name
    /// that the input should draw from (like `fuse_u.y`, with prefix)
    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName>;

    /// Change a value in the input map
    fn update_input_map(&mut self, field: &str, source: &str) -> Result<(), String>;

    /// Get flag for whether to mark outputs for dispatch
    fn get_save_outputs(&self) -> bool;

    /// Set flag for whether to mark outputs for dispatch
    fn set_save_outputs(&mut self, save_outputs: bool);

    //
    // These are needed to maintain strict ordering for indexed evaluation

    /// List of input field names in the order that they will be consumed
    fn get_input_names(&self) -> Vec<CalcInputName>;

    /// List of output field names in the order that they will be written out
    fn get_output_names(&self) -> Vec<CalcOutputName>;
}

/// Build the save-outputs accessor pair for a calc with a `save_outputs` field
#[macro_export]
macro_rules! calc_save_outputs {
    () => {
        /// Get flag for whether to mark outputs for dispatch
        fn get_save_outputs(&self) -> bool {
            self.save_outputs
        }

        /// Set flag for whether to mark outputs for dispatch
        fn set_save_outputs(&mut self, save_outputs: bool) {
            self.save_outputs = save_outputs;
        }
    };
}

/// Build function for getting calc input field names
#[macro_export]
macro_rules! calc_input_names {
    ($( $field:ident ),*) => {
        /// List of input field names in the order that they will be consumed
        fn get_input_names(&self) -> Vec<CalcInputName> {
            #[allow(unused_mut)]
            let mut names = vec![];
            $({
                names.push(stringify!($field).to_owned());
            })*

            names
        }
    }
}

/// Build function for getting calc output field names
#[macro_export]
macro_rules! calc_output_names {
    ($( $field:ident ),*) => {
        /// List of output field names in the order that they will be written out
        fn get_output_names(&self) -> Vec<CalcOutputName> {
            #[allow(unused_mut)]
            let mut names = vec![];
            $({
                names.push(stringify!($field).to_owned());
            })*

            names
        }
    }
}
