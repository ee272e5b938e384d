//! Exponentially weighted moving average.

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// One-pole exponential smoother: `y = alpha * x + (1 - alpha) * y_prev`.
///
/// Used with a slow time constant to condition the calibration stream for
/// offline curve fitting. The first sample passes through unmodified to
/// avoid a long crawl up from zero at the start of a capture.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Ewma {
    // User inputs
    input_name: String,
    alpha: f64,
    save_outputs: bool,

    // Internal state
    #[serde(skip)]
    value: f64,

    #[serde(skip)]
    initialized: bool,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    input_index: usize,

    #[serde(skip)]
    output_index: usize,
}

impl Ewma {
    pub fn new(input_name: String, alpha: f64, save_outputs: bool) -> Self {
        Self {
            input_name,
            alpha,
            save_outputs,
            value: 0.0,
            initialized: false,
            input_index: usize::MAX,
            output_index: usize::MAX,
        }
    }
}

#[typetag::serde]
impl Calc for Ewma {
    fn init(
        &mut self,
        _: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("Smoothing alpha of {} is outside (0, 1]", self.alpha));
        }
        self.input_index = input_indices
            .first()
            .copied()
            .ok_or_else(|| "Ewma calc missing input index".to_string())?;
        self.output_index = output_range
            .clone()
            .next()
            .ok_or_else(|| "Ewma calc missing output index".to_string())?;
        self.value = 0.0;
        self.initialized = false;
        Ok(())
    }

    fn terminate(&mut self) {
        self.value = 0.0;
        self.initialized = false;
        self.input_index = usize::MAX;
        self.output_index = usize::MAX;
    }

    fn eval(&mut self, tape: &mut [f64]) {
        let x = tape[self.input_index];
        if !self.initialized {
            self.value = x;
            self.initialized = true;
        } else {
            self.value = self.alpha * x + (1.0 - self.alpha) * self.value;
        }
        tape[self.output_index] = self.value;
    }

    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName> {
        let mut map = BTreeMap::new();
        map.insert("x".to_owned(), self.input_name.clone());
        map
    }

    fn update_input_map(&mut self, field: &str, source: &str) -> Result<(), String> {
        if field == "x" {
            self.input_name = source.to_owned();
            Ok(())
        } else {
            Err(format!("Unrecognized field {field}"))
        }
    }

    calc_save_outputs!();
    calc_input_names!(x);
    calc_output_names!(y);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig_ewma(alpha: f64) -> (Ewma, Vec<f64>) {
        let mut e = Ewma::new("rig.s1".into(), alpha, false);
        e.init(&ControllerCtx::default(), vec![0], 1..2).unwrap();
        (e, vec![0.0; 2])
    }

    #[test]
    fn first_sample_passes_through() {
        let (mut e, mut tape) = rig_ewma(0.05);
        tape[0] = 812.0;
        e.eval(&mut tape);
        assert_eq!(tape[1], 812.0);
    }

    #[test]
    fn converges_to_constant_input() {
        let (mut e, mut tape) = rig_ewma(0.05);
        tape[0] = 100.0;
        e.eval(&mut tape);
        tape[0] = 200.0;
        for _ in 0..2000 {
            e.eval(&mut tape);
        }
        assert!((tape[1] - 200.0).abs() < 1e-6);
    }

    #[test]
    fn step_response_is_one_pole() {
        let (mut e, mut tape) = rig_ewma(0.25);
        tape[0] = 0.0;
        e.eval(&mut tape);
        tape[0] = 1.0;
        e.eval(&mut tape);
        assert!((tape[1] - 0.25).abs() < 1e-12);
        e.eval(&mut tape);
        assert!((tape[1] - (0.25 + 0.75 * 0.25)).abs() < 1e-12);
    }
}
