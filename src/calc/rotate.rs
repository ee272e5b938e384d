//! Fixed 45-degree rotation between the oblique sensing axes and the
//! cardinal actuation axes.
//!
//! The proximity channels are physically mounted on diagonal axes
//! (U toward NW, V toward SW) while the magnets sit on the cardinals
//! (X toward E, Y toward N). Rotating the error vector here lets the
//! axis controllers always operate in orthogonal actuation space.

use std::f64::consts::FRAC_1_SQRT_2;

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// Rotate an oblique (u, v) pair into the cardinal (x, y) frame.
pub fn uv_to_xy(u: f64, v: f64) -> (f64, f64) {
    let c = FRAC_1_SQRT_2;
    (-u * c - v * c, u * c - v * c)
}

/// Inverse of [`uv_to_xy`].
pub fn xy_to_uv(x: f64, y: f64) -> (f64, f64) {
    let c = FRAC_1_SQRT_2;
    ((y - x) * c, -(x + y) * c)
}

/// Stateless calc applying [`uv_to_xy`] to a pair of tape fields.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct RotateOblique {
    // User inputs
    u_name: String,
    v_name: String,
    save_outputs: bool,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    input_indices: Vec<usize>,

    #[serde(skip)]
    output_range: Range<usize>,
}

impl RotateOblique {
    pub fn new(u_name: String, v_name: String, save_outputs: bool) -> Self {
        Self {
            u_name,
            v_name,
            save_outputs,
            input_indices: vec![],
            output_range: usize::MAX..usize::MAX,
        }
    }
}

#[typetag::serde]
impl Calc for RotateOblique {
    fn init(
        &mut self,
        _: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        if input_indices.len() != 2 {
            return Err("RotateOblique requires exactly two inputs".to_string());
        }
        if output_range.len() != 2 {
            return Err("RotateOblique requires exactly two outputs".to_string());
        }
        self.input_indices = input_indices;
        self.output_range = output_range;
        Ok(())
    }

    fn terminate(&mut self) {
        self.input_indices.clear();
        self.output_range = usize::MAX..usize::MAX;
    }

    fn eval(&mut self, tape: &mut [f64]) {
        let u = tape[self.input_indices[0]];
        let v = tape[self.input_indices[1]];
        let (x, y) = uv_to_xy(u, v);
        tape[self.output_range.start] = x;
        tape[self.output_range.start + 1] = y;
    }

    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName> {
        let mut map = BTreeMap::new();
        map.insert("u".to_owned(), self.u_name.clone());
        map.insert("v".to_owned(), self.v_name.clone());
        map
    }

    fn update_input_map(&mut self, field: &str, source: &str) -> Result<(), String> {
        match field {
            "u" => self.u_name = source.to_owned(),
            "v" => self.v_name = source.to_owned(),
            _ => return Err(format!("Unrecognized field {field}")),
        }

        Ok(())
    }

    calc_save_outputs!();
    calc_input_names!(u, v);
    calc_output_names!(x, y);
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    #[test]
    fn unit_vector_images_are_orthogonal() {
        let (x1, y1) = uv_to_xy(1.0, 0.0);
        let (x2, y2) = uv_to_xy(0.0, 1.0);
        assert!((x1 * x2 + y1 * y2).abs() < TOL);
        // Rotation preserves length
        assert!((x1.hypot(y1) - 1.0).abs() < TOL);
        assert!((x2.hypot(y2) - 1.0).abs() < TOL);
    }

    #[test]
    fn inverse_recovers_original() {
        for &(u, v) in &[(0.0, 0.0), (1.0, 0.0), (-2.5, 3.75), (48.6, 49.0)] {
            let (x, y) = uv_to_xy(u, v);
            let (u2, v2) = xy_to_uv(x, y);
            assert!((u - u2).abs() < TOL, "{u} vs {u2}");
            assert!((v - v2).abs() < TOL, "{v} vs {v2}");
        }
    }

    #[test]
    fn known_image() {
        let c = FRAC_1_SQRT_2;
        let (x, y) = uv_to_xy(1.0, 0.0);
        assert_eq!((x, y), (-c, c));
    }
}
