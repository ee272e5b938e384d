//! Per-axis PID controller with saturated integral and low-pass
//! filtered derivative.

use super::*;
use crate::{calc_input_names, calc_output_names, calc_save_outputs};

/// A PID controller with hard integral saturation for anti-windup and a
/// one-pole low-pass filter on the derivative term to damp sensor noise.
///
/// Per cycle, with `err = measurement - setpoint`:
///
/// 1. `integral = clamp(integral + err * dt, -max_integral, +max_integral)`
/// 2. `raw_d = err - last_err`
/// 3. `filt_d = alpha * raw_d + (1 - alpha) * last_filt_d`
/// 4. `y = kp * err + ki * integral + kd * filt_d`
///
/// `dt` is the nominal cycle period from the run context, not a measured
/// elapsed time. The raw derivative is a per-cycle difference rather than a
/// rate, so `kd` absorbs the cycle frequency. Outputs are not clamped here;
/// saturation to the coil range happens in the actuation mapper.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct Pid {
    // User inputs
    measurement_name: String,
    setpoint_name: String,
    kp: f64,
    ki: f64,
    kd: f64,
    max_integral: f64,
    /// Derivative filter pole, in (0, 1]. 1.0 disables filtering.
    deriv_alpha: f64,
    save_outputs: bool,

    // Internal state
    err: f64,
    integral: f64,
    filt_deriv: f64,

    // Values provided by calc orchestrator during init
    #[serde(skip)]
    dt_s: f64,

    #[serde(skip)]
    input_indices: Vec<usize>,

    #[serde(skip)]
    output_range: Range<usize>,
}

impl Pid {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        measurement_name: String,
        setpoint_name: String,
        kp: f64,
        ki: f64,
        kd: f64,
        max_integral: f64,
        deriv_alpha: f64,
        save_outputs: bool,
    ) -> Self {
        Self {
            measurement_name,
            setpoint_name,
            kp,
            ki,
            kd,
            max_integral,
            deriv_alpha,
            save_outputs,

            err: 0.0,
            integral: 0.0,
            filt_deriv: 0.0,

            dt_s: 1.0,
            input_indices: vec![],
            output_range: usize::MAX..usize::MAX,
        }
    }
}

#[typetag::serde]
impl Calc for Pid {
    /// Reset internal state and register calc tape indices
    fn init(
        &mut self,
        ctx: &ControllerCtx,
        input_indices: Vec<usize>,
        output_range: Range<usize>,
    ) -> Result<(), String> {
        if ctx.dt_ns == 0 {
            return Err("dt_ns must be > 0".to_string());
        }
        if !(self.deriv_alpha > 0.0 && self.deriv_alpha <= 1.0) {
            return Err(format!(
                "Derivative filter alpha of {} is outside (0, 1]",
                self.deriv_alpha
            ));
        }
        if input_indices.len() != 2 {
            return Err("Pid requires exactly two inputs".to_string());
        }
        if output_range.len() != 3 {
            return Err("Pid requires exactly three outputs".to_string());
        }

        self.dt_s = ctx.dt_s();
        self.input_indices = input_indices;
        self.output_range = output_range;

        self.err = 0.0;
        self.integral = 0.0;
        self.filt_deriv = 0.0;
        Ok(())
    }

    fn terminate(&mut self) {
        self.err = 0.0;
        self.integral = 0.0;
        self.filt_deriv = 0.0;
        self.dt_s = 1.0;
        self.input_indices.clear();
        self.output_range = usize::MAX..usize::MAX;
    }

    /// Run calcs for a cycle
    fn eval(&mut self, tape: &mut [f64]) {
        // Consume latest error estimate
        let meas = tape[self.input_indices[0]];
        let setpoint = tape[self.input_indices[1]];
        let new_err = meas - setpoint;

        // Anti-windup saturation
        self.integral = (self.integral + new_err * self.dt_s)
            .clamp(-self.max_integral, self.max_integral);

        // One-pole low-pass on the cycle-to-cycle difference
        let raw_d = new_err - self.err;
        self.filt_deriv = self.deriv_alpha * raw_d + (1.0 - self.deriv_alpha) * self.filt_deriv;
        self.err = new_err;

        let y = self.kp * self.err + self.ki * self.integral + self.kd * self.filt_deriv;

        let i0 = self.output_range.start;
        tape[i0] = y;
        tape[i0 + 1] = self.err;
        tape[i0 + 2] = self.integral;
    }

    fn get_input_map(&self) -> BTreeMap<CalcInputName, FieldName> {
        let mut map = BTreeMap::new();
        map.insert("measurement".to_owned(), self.measurement_name.clone());
        map.insert("setpoint".to_owned(), self.setpoint_name.clone());
        map
    }

    fn update_input_map(&mut self, field: &str, source: &str) -> Result<(), String> {
        match field {
            "measurement" => self.measurement_name = source.to_owned(),
            "setpoint" => self.setpoint_name = source.to_owned(),
            _ => return Err(format!("Unrecognized field {field}")),
        }

        Ok(())
    }

    calc_save_outputs!();
    calc_input_names!(measurement, setpoint);
    calc_output_names!(y, err, integral);
}
