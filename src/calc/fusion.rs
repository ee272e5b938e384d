//! Bivariate second-degree polynomial sensor fusion surface.

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// Number of coefficients in a full second-degree bivariate polynomial.
pub const POLY2_N_COEFFS: usize = 6;

/// Fused distance estimate from a pair of raw proximity readings:
///
/// `t = c0 + c1*s1 + c2*s2 + c3*s1^2 + c4*s1*s2 + c5*s2^2`
///
/// Coefficients are fitted offline from a calibration stream capture and
/// treated as opaque versioned configuration, with an attached note that
/// should include traceability info like the fit date and source capture.
///
/// Pure and total: readings outside the sensor's physical range simply
/// extrapolate. Range validation is the caller's concern.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Poly2Surface {
    // User inputs
    s1_name: String,
    s2_name: String,
    coefficients: Vec<f64>,
    note: String,
    save_outputs: bool,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    input_indices: Vec<usize>,

    #[serde(skip)]
    output_index: usize,
}

impl Poly2Surface {
    pub fn new(
        s1_name: String,
        s2_name: String,
        coefficients: Vec<f64>,
        note: String,
        save_outputs: bool,
    ) -> Self {
        Self {
            s1_name,
            s2_name,
            coefficients,
            note,
            save_outputs,
            input_indices: vec![],
            output_index: usize::MAX,
        }
    }

    /// Evaluate the surface at a point.
    pub fn eval_at(&self, s1: f64, s2: f64) -> f64 {
        let c = &self.coefficients;
        c[0] + c[1] * s1 + c[2] * s2 + c[3] * s1 * s1 + c[4] * s1 * s2 + c[5] * s2 * s2
    }
}

#[typetag::serde]
impl Calc for Poly2Surface {
    fn init(
        &mut self,
        _: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        if self.coefficients.len() != POLY2_N_COEFFS {
            return Err(format!(
                "Poly2Surface requires {POLY2_N_COEFFS} coefficients, got {}",
                self.coefficients.len()
            ));
        }
        if input_indices.len() != 2 {
            return Err("Poly2Surface requires exactly two inputs".to_string());
        }
        self.input_indices = input_indices;
        self.output_index = output_range
            .clone()
            .next()
            .ok_or_else(|| "Poly2Surface calc missing output index".to_string())?;
        Ok(())
    }

    fn terminate(&mut self) {
        self.input_indices.clear();
        self.output_index = usize::MAX;
    }

    fn eval(&mut self, tape: &mut [f64]) {
        let s1 = tape[self.input_indices[0]];
        let s2 = tape[self.input_indices[1]];
        tape[self.output_index] = self.eval_at(s1, s2);
    }

    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName> {
        let mut map = BTreeMap::new();
        map.insert("s1".to_owned(), self.s1_name.clone());
        map.insert("s2".to_owned(), self.s2_name.clone());
        map
    }

    fn update_input_map(&mut self, field: &str, source: &str) -> Result<(), String> {
        match field {
            "s1" => self.s1_name = source.to_owned(),
            "s2" => self.s2_name = source.to_owned(),
            _ => return Err(format!("Unrecognized field {field}")),
        }

        Ok(())
    }

    calc_save_outputs!();
    calc_input_names!(s1, s2);
    calc_output_names!(y);
}
