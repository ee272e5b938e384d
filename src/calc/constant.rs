//! A calc that produces a constant value

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// Simplest calc that does anything at all.
/// Used for the calibrated target distances, among other things.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Constant {
    // User inputs
    y: f64,
    save_outputs: bool,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    output_index: usize,
}

impl Constant {
    pub fn new(y: f64, save_outputs: bool) -> Self {
        // Default index causes an error on the first call if not initialized properly
        let output_index = usize::MAX;

        Self {
            y,
            save_outputs,
            output_index,
        }
    }
}

#[typetag::serde]
impl Calc for Constant {
    fn init(
        &mut self,
        _: &ControllerCtx,
        _: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        self.output_index = output_range
            .clone()
            .next()
            .ok_or_else(|| "Constant calc missing output index".to_string())?;
        Ok(())
    }

    fn terminate(&mut self) {
        self.output_index = usize::MAX;
    }

    fn eval(&mut self, tape: &mut [f64]) {
        tape[self.output_index] = self.y;
    }

    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName> {
        BTreeMap::new()
    }

    fn update_input_map(&mut self, field: &str, _: &str) -> Result<(), String> {
        Err(format!("Unrecognized field {field}"))
    }

    calc_save_outputs!();
    calc_input_names!();
    calc_output_names!(y);
}
