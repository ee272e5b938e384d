//! Per-cycle evaluation of the calc graph over a flat value tape.

use std::collections::HashSet;
use std::{collections::BTreeMap, ops::Range};

use serde::{Deserialize, Serialize};

use super::{Calc, CalcName, DstIndex, FieldName, SrcIndex};
use crate::controller::ControllerCtx;

/// Reserved node name for the rig's sensing and actuation channels.
pub const RIG_NODE: &str = "rig";

/// Internal state of calc orchestrator
#[derive(Default)]
struct OrchestratorState {
    /// Values of every input and output field for calcs and the rig.
    calc_tape: Vec<f64>,

    /// Calc names in the order that they are evaluated at each cycle
    eval_order: Vec<CalcName>,

    /// Names of states to dispatch
    dispatch_names: Vec<FieldName>,

    /// Calc tape indices of states to dispatch
    dispatch_indices: Vec<usize>,

    /// Contiguous slice where the rig's sensing channels
    /// (proximity counts, smoothed range distances) are stored
    rig_output_slice: Range<usize>,

    /// Contiguous slice where the rig's actuation channels
    /// (per-axis force commands) are stored
    rig_input_slice: Range<usize>,

    /// Where to get values to write to the rig's actuation channels,
    /// and where to put them.
    rig_input_source_indices: Vec<(DstIndex, SrcIndex)>,

    /// Full field name to tape index
    field_index_map: BTreeMap<FieldName, usize>,
}

/// Calculations that are run at each cycle during operation.
/// Because the results are needed for actuation on the same cycle,
/// they are run synchronously and must complete before the next cycle.
///
/// During init, the orchestrator determines the correct order in which to
/// evaluate the calcs so that their inputs are updated properly, or panics
/// if no such ordering is possible.
///
/// The method used for evaluating the calcs borrows from algorithmic
/// differentiation by flattening the calc expression graph into a serial
/// "tape" of values with an established evaluation order. During init, each
/// calc is provided with the indices of the tape where its inputs and outputs
/// will be placed. During evaluation, each calc is responsible for using
/// those indices to read its inputs and write its outputs.
#[derive(Serialize, Deserialize, Default)]
pub struct Orchestrator {
    calcs: BTreeMap<CalcName, Box<dyn Calc>>,
    rig_input_sources: BTreeMap<FieldName, FieldName>,

    #[serde(skip)]
    state: OrchestratorState,
}

impl Orchestrator {
    /// Synchronize calc state using the latest rig sensing channels
    /// by running each calc in the order determined during init.
    ///
    /// # Panics
    /// * If eval() is called before init()
    /// * If evaluation of individual calcs panics
    pub fn eval(&mut self) {
        // Evaluate calcs in order
        for name in self.state.eval_order.iter() {
            self.calcs
                .get_mut(name)
                .unwrap()
                .eval(&mut self.state.calc_tape);
        }

        // Populate the rig's actuation channels
        for (dst_index, src_index) in self.state.rig_input_source_indices.iter().copied() {
            self.state.calc_tape[dst_index] = self.state.calc_tape[src_index];
        }
    }

    /// Write the latest sensing channel values onto the tape,
    /// once per cycle before `eval`.
    pub fn write_rig_outputs(&mut self, vals: &[f64]) {
        let range = self.state.rig_output_slice.clone();
        self.state.calc_tape[range]
            .iter_mut()
            .zip(vals)
            .for_each(|(old, new)| *old = *new);
    }

    /// Provide the latest actuation channel values (outputs of calcs)
    /// in their declared order.
    pub fn provide_rig_inputs(&self, mut f: impl FnMut(&mut dyn Iterator<Item = f64>)) {
        let range = self.state.rig_input_slice.clone();
        let mut vals = range.map(|i| self.state.calc_tape[i]);

        f(&mut vals);
    }

    /// Provide latest values of fields marked for dispatch
    pub fn provide_dispatch_values(&self, mut f: impl FnMut(&mut dyn Iterator<Item = f64>)) {
        let inds = self.state.dispatch_indices.iter();
        let mut vals = inds.map(|&i| self.state.calc_tape[i]);

        f(&mut vals);
    }

    /// Get names of fields marked to dispatch
    pub fn dispatch_names(&self) -> Vec<String> {
        self.state.dispatch_names.clone()
    }

    /// Tape index of a fully qualified field name, if it exists.
    /// Only valid after init.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.state.field_index_map.get(name).copied()
    }

    /// Current tape value at an index from `field_index`.
    pub fn value(&self, index: usize) -> f64 {
        self.state.calc_tape[index]
    }

    /// Add a calc
    ///
    /// # Panics
    /// * If a calc with this name already exists
    pub fn add_calc(&mut self, name: &str, calc: Box<dyn Calc>) {
        let name = name.to_owned();
        if self.calcs.contains_key(&name) {
            panic!("A calc named `{name}` already exists.");
        }
        self.calcs.insert(name, calc);
    }

    /// Read-only access to calc nodes
    pub fn calcs(&self) -> &BTreeMap<String, Box<dyn Calc>> {
        &self.calcs
    }

    /// Set a rig actuation channel (like `rig.fx`) to draw from a source field
    pub fn set_rig_input_source(&mut self, input_field: &str, source_field: &str) {
        self.rig_input_sources
            .insert(input_field.to_owned(), source_field.to_owned());
    }

    /// Determine the order to evaluate the calcs by traversing the calc graph.
    ///
    /// # Panics
    /// * If the graph contains a dependency cycle
    pub fn eval_order(&self) -> Vec<CalcName> {
        let mut eval_order: Vec<CalcName> = Vec::with_capacity(self.calcs.len());

        // The node name is always the first element of the field name,
        // and any other `.` is not for our usage
        fn node_name(field_name: &str) -> CalcName {
            field_name.split('.').collect::<Vec<&str>>()[0].to_owned()
        }

        // Collate parent _calcs_ of each calc, not including the rig
        let mut calc_node_parents = BTreeMap::new();
        for (name, calc) in self.calcs.iter() {
            let mut calc_parents = Vec::new();

            for field_name in calc.get_input_map().values() {
                let node = node_name(field_name);
                if self.calcs.contains_key(&node) {
                    calc_parents.push(node);
                }
            }
            calc_node_parents.insert(name.clone(), calc_parents);
        }

        // Traverse the calcs, developing the evaluation order
        let mut evaluated = BTreeMap::new();
        for name in self.calcs.keys().cloned() {
            evaluated.insert(name, false);
        }

        //   While there are any calcs that have not been evaluated,
        //   evaluate any that are ready.
        while evaluated.values().any(|x| !x) {
            let mut any_new_evaluated = false;
            let mut eval_group = Vec::new();
            for name in self.calcs.keys().cloned() {
                if !evaluated[&name] {
                    // Ready when no parent remains unevaluated
                    // (also true for calcs with no parents at all)
                    let all_parents_ready = !calc_node_parents[&name]
                        .iter()
                        .any(|parent| !evaluated[parent]);

                    if all_parents_ready {
                        eval_order.push(name.clone());
                        eval_group.push(name.clone());
                        any_new_evaluated = true;
                    }
                }
            }

            // Mark evaluated after finishing the group so that groups with
            // sequential dependencies are not flattened
            for name in &eval_group {
                evaluated.insert(name.clone(), true);
            }

            // If there are no calcs that can be evaluated, but some are left
            // that have not been evaluated yet, at least one calc depends on
            // itself.
            if !any_new_evaluated {
                panic!("Calc graph contains cyclic dependencies");
            }
        }

        eval_order
    }

    /// Set up the calc tape and (re-)initialize individual calcs.
    ///
    /// The tape is laid out as rig actuation channels, then rig sensing
    /// channels, then calc outputs in evaluation order.
    pub fn init(
        &mut self,
        ctx: &ControllerCtx,
        rig_output_fields: &[&str],
        rig_input_fields: &[&str],
    ) -> Result<(), String> {
        let mut dispatch_names: Vec<FieldName> = Vec::new();
        let mut dispatch_indices: Vec<usize> = Vec::new();

        // Check names for collisions and formatting
        let calc_names = self.calcs.keys().cloned().collect::<Vec<CalcName>>();
        if calc_names.iter().any(|x| x.contains('.')) {
            return Err("Calc names must not contain `.` characters".to_string());
        }
        if calc_names.iter().any(|x| x == RIG_NODE) {
            return Err(format!("Calc names must not shadow the `{RIG_NODE}` node"));
        }
        if HashSet::<&String>::from_iter(calc_names.iter()).len() != calc_names.len() {
            return Err("Calc names must be unique".to_string());
        }

        // Determine order to evaluate calcs
        let eval_order = self.eval_order();

        // Build the field and dispatch index maps using the calc order
        let mut fields_order: Vec<FieldName> = Vec::new();
        let mut field_index_map = BTreeMap::new();

        //    Rig actuation channels
        let rig_input_slice = 0..rig_input_fields.len();
        for field in rig_input_fields.iter().map(|f| format!("{RIG_NODE}.{f}")) {
            let i = fields_order.len();
            fields_order.push(field.clone());
            field_index_map.insert(field.clone(), i);
            dispatch_names.push(field);
            dispatch_indices.push(i);
        }

        //    Rig sensing channels
        let start = fields_order.len();
        let rig_output_slice = start..start + rig_output_fields.len();
        for field in rig_output_fields.iter().map(|f| format!("{RIG_NODE}.{f}")) {
            let i = fields_order.len();
            fields_order.push(field.clone());
            field_index_map.insert(field.clone(), i);
            dispatch_names.push(field);
            dispatch_indices.push(i);
        }

        //    Calcs, in eval order
        for calc_name in &eval_order {
            let calc = self.calcs.get_mut(calc_name).unwrap();
            let input_map = calc.get_input_map();
            let save_outputs = calc.get_save_outputs();
            let input_names = calc.get_input_names();
            let output_names = calc.get_output_names();

            // Find input indices from the part of the map built so far
            let mut input_indices = Vec::new();
            for input_name in &input_names {
                let src_field = &input_map[input_name];
                let src_index = *field_index_map
                    .get(src_field)
                    .ok_or_else(|| format!("Did not find field index for {src_field}"))?;
                input_indices.push(src_index);
            }

            // Set output range and order
            let start = fields_order.len();
            let output_range = start..start + output_names.len();
            for (k, output_name) in output_names.iter().enumerate() {
                let i = start + k;
                let output_field = format!("{calc_name}.{output_name}");
                fields_order.push(output_field.clone());
                field_index_map.insert(output_field.clone(), i);

                // Mark fields for dispatch
                if save_outputs {
                    dispatch_names.push(output_field);
                    dispatch_indices.push(i);
                }
            }

            // Initialize this calc
            calc.init(ctx, input_indices, output_range)?;
        }

        // Find the indices of fields that will be copied to the rig's
        // actuation channels after each eval
        let mut rig_input_source_indices = Vec::new();
        for (rig_input_field, src_field) in &self.rig_input_sources {
            let dst_index = *field_index_map
                .get(rig_input_field)
                .ok_or_else(|| format!("Unknown rig input field {rig_input_field}"))?;
            let src_index = *field_index_map
                .get(src_field)
                .ok_or_else(|| format!("Unknown rig input source {src_field}"))?;
            rig_input_source_indices.push((dst_index, src_index));
        }

        // Initialize the calc tape
        let calc_tape: Vec<f64> = vec![0.0_f64; fields_order.len()];

        // Take new internal state
        self.state = OrchestratorState {
            calc_tape,
            eval_order,
            dispatch_names,
            dispatch_indices,
            rig_output_slice,
            rig_input_slice,
            rig_input_source_indices,
            field_index_map,
        };

        Ok(())
    }

    /// Clear state to reset for another run
    pub fn terminate(&mut self) {
        self.state = OrchestratorState::default();
        self.calcs.values_mut().for_each(|c| c.terminate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::{Constant, Rescale};

    const SRC: [&str; 2] = ["s1", "s2"];
    const SINK: [&str; 1] = ["fx"];

    #[test]
    fn chained_calcs_evaluate_in_dependency_order() {
        let mut orch = Orchestrator::default();
        // `a_scaled` sorts before its parent `z_base`, so naive
        // alphabetical evaluation would read a stale input
        orch.add_calc(
            "a_scaled",
            Box::new(Rescale::new("z_base.y".into(), (0.0, 1.0), (0.0, 10.0), true)),
        );
        orch.add_calc("z_base", Box::new(Constant::new(0.5, true)));

        orch.init(&ControllerCtx::default(), &SRC, &SINK).unwrap();
        orch.eval();

        let i = orch.field_index("a_scaled.y").unwrap();
        assert_eq!(orch.value(i), 5.0);
    }

    #[test]
    fn rig_input_source_is_copied_after_eval() {
        let mut orch = Orchestrator::default();
        orch.add_calc("force", Box::new(Constant::new(-3.25, false)));
        orch.set_rig_input_source("rig.fx", "force.y");

        orch.init(&ControllerCtx::default(), &SRC, &SINK).unwrap();
        orch.eval();

        let mut got = Vec::new();
        orch.provide_rig_inputs(|vals| got.extend(vals));
        assert_eq!(got, vec![-3.25]);
    }

    #[test]
    fn sensing_channels_flow_into_calcs() {
        let mut orch = Orchestrator::default();
        orch.add_calc(
            "norm",
            Box::new(Rescale::new("rig.s1".into(), (50.0, 1450.0), (-100.0, 100.0), true)),
        );
        orch.init(&ControllerCtx::default(), &SRC, &SINK).unwrap();

        orch.write_rig_outputs(&[750.0, 0.0]);
        orch.eval();

        let i = orch.field_index("norm.y").unwrap();
        assert_eq!(orch.value(i), 0.0);
    }

    #[test]
    fn unknown_input_field_is_an_error() {
        let mut orch = Orchestrator::default();
        orch.add_calc(
            "norm",
            Box::new(Rescale::new("rig.nope".into(), (0.0, 1.0), (0.0, 1.0), false)),
        );
        assert!(orch.init(&ControllerCtx::default(), &SRC, &SINK).is_err());
    }

    #[test]
    #[should_panic(expected = "cyclic")]
    fn dependency_cycle_panics() {
        let mut orch = Orchestrator::default();
        orch.add_calc(
            "a",
            Box::new(Rescale::new("b.y".into(), (0.0, 1.0), (0.0, 1.0), false)),
        );
        orch.add_calc(
            "b",
            Box::new(Rescale::new("a.y".into(), (0.0, 1.0), (0.0, 1.0), false)),
        );
        orch.eval_order();
    }

    #[test]
    fn dispatch_includes_rig_channels_and_saved_outputs() {
        let mut orch = Orchestrator::default();
        orch.add_calc("saved", Box::new(Constant::new(1.0, true)));
        orch.add_calc("unsaved", Box::new(Constant::new(2.0, false)));
        orch.init(&ControllerCtx::default(), &SRC, &SINK).unwrap();

        let names = orch.dispatch_names();
        assert!(names.contains(&"rig.fx".to_string()));
        assert!(names.contains(&"rig.s1".to_string()));
        assert!(names.contains(&"saved.y".to_string()));
        assert!(!names.contains(&"unsaved.y".to_string()));
    }
}
