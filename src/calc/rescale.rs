//! Clamped linear interpolation between two spans.

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// Map an input span linearly onto an output span, clamping exactly at the
/// output bounds. Used to normalize each raw proximity channel onto the
/// [-100, 100] range carried by the host position broadcast.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Rescale {
    // User inputs
    input_name: String,
    in_min: f64,
    in_max: f64,
    out_min: f64,
    out_max: f64,
    save_outputs: bool,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    input_index: usize,

    #[serde(skip)]
    output_index: usize,
}

impl Rescale {
    pub fn new(
        input_name: String,
        in_span: (f64, f64),
        out_span: (f64, f64),
        save_outputs: bool,
    ) -> Self {
        Self {
            input_name,
            in_min: in_span.0,
            in_max: in_span.1,
            out_min: out_span.0,
            out_max: out_span.1,
            save_outputs,
            input_index: usize::MAX,
            output_index: usize::MAX,
        }
    }

    fn map(&self, x: f64) -> f64 {
        let frac = (x - self.in_min) / (self.in_max - self.in_min);
        let y = self.out_min + frac * (self.out_max - self.out_min);
        y.clamp(self.out_min.min(self.out_max), self.out_min.max(self.out_max))
    }
}

#[typetag::serde]
impl Calc for Rescale {
    fn init(
        &mut self,
        _: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        if self.in_min == self.in_max {
            return Err("Rescale input span must be nonzero".to_string());
        }
        self.input_index = input_indices
            .first()
            .copied()
            .ok_or_else(|| "Rescale calc missing input index".to_string())?;
        self.output_index = output_range
            .clone()
            .next()
            .ok_or_else(|| "Rescale calc missing output index".to_string())?;
        Ok(())
    }

    fn terminate(&mut self) {
        self.input_index = usize::MAX;
        self.output_index = usize::MAX;
    }

    fn eval(&mut self, tape: &mut [f64]) {
        tape[self.output_index] = self.map(tape[self.input_index]);
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

    #[test]
    fn maps_span_endpoints_and_center() {
        let r = Rescale::new("rig.s1".into(), (50.0, 1450.0), (-100.0, 100.0), false);
        assert_eq!(r.map(50.0), -100.0);
        assert_eq!(r.map(1450.0), 100.0);
        assert_eq!(r.map(750.0), 0.0);
    }

    #[test]
    fn clamps_exactly_at_bounds() {
        let r = Rescale::new("rig.s1".into(), (50.0, 1450.0), (-100.0, 100.0), false);
        assert_eq!(r.map(0.0), -100.0);
        assert_eq!(r.map(10_000.0), 100.0);
    }

    #[test]
    fn handles_inverted_output_span() {
        let r = Rescale::new("x".into(), (0.0, 1.0), (100.0, -100.0), false);
        assert_eq!(r.map(0.0), 100.0);
        assert_eq!(r.map(1.0), -100.0);
        assert_eq!(r.map(2.0), -100.0);
    }
}
