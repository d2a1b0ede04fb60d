use serde::{Deserialize, Serialize};
use super::{ensure_finite, flag, shifted_time, sweep_points, total_points, Column, PreparedRun, VariantDetails};
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::instrument::{paths, BufferSpec};
use crate::drivers::sweep::ForwardBackwardSplit;
use crate::drivers::MeasurementError;
pub const PRIMARY_BUFFER: &str = paths::DRAIN_CURRENT_BUFFER;
pub const BUFFERS: &[BufferSpec] = &[
    BufferSpec::new("time_abs", paths::ANODE_TIMESTAMPS),
    BufferSpec::new("anode_voltage_set", paths::ANODE_VOLTAGE_SET),
    BufferSpec::new("anode_voltage_read", paths::ANODE_VOLTAGE),
    BufferSpec::new("anode_current", paths::ANODE_CURRENT),
    BufferSpec::new("cathode_current_buffer", paths::CATHODE_CURRENT),
];
pub const PRIORITY_KEYS: &[&str] = &["anode_current", "anode_voltage_read", "anode_voltage_set"];
/// Anode voltage sweep of a two-terminal diode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiodeParams {
    pub vanode_start: f64,
    pub vanode_stop: f64,
    pub vanode_step: f64,
    pub ilimit_anode: f64,
    pub ilimit_cathode: f64,
    pub anode_nplc: f64,
    pub cathode_nplc: f64,
    pub settling_delay_s: f64,
    pub enable_backward: bool,
}
impl Default for DiodeParams {
    fn default() -> Self {
        Self {
            vanode_start: 0.0,
            vanode_stop: 3.0,
            vanode_step: 0.1,
            ilimit_anode: 0.1,
            ilimit_cathode: 0.1,
            anode_nplc: 1.0,
            cathode_nplc: 1.0,
            settling_delay_s: 0.1,
            enable_backward: true,
        }
    }
}
impl DiodeParams {
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        ensure_finite(&[
            ("Vanode_start", self.vanode_start),
            ("Vanode_stop", self.vanode_stop),
            ("Vanode_step", self.vanode_step),
            ("settling_delay", self.settling_delay_s),
        ])?;
        let points = sweep_points("Vanode", self.vanode_start, self.vanode_stop, self.vanode_step)?;
        let mut run = PreparedRun {
            expected_forward: points,
            expected_total: total_points("Vanode", &[points, if self.enable_backward { 2 } else { 1 }])?,
            ..PreparedRun::default()
        };
        run.param("Vanode_start", self.vanode_start);
        run.param("Vanode_stop", self.vanode_stop);
        run.param("Vanode_step", self.vanode_step);
        run.param("IlimitAnode", self.ilimit_anode);
        run.param("IlimitCathode", self.ilimit_cathode);
        run.param("Anode_nplc", self.anode_nplc);
        run.param("Cathode_nplc", self.cathode_nplc);
        run.param("enable_backward", flag(self.enable_backward));
        run.param("settling_delay", self.settling_delay_s);
        run.note("Vanode_start (set)", self.vanode_start);
        run.note("Vanode_stop (set)", self.vanode_stop);
        run.note("Vanode_step (set)", self.vanode_step);
        run.note("Enable Backward", self.enable_backward);
        run.note("Settling Delay (s)", self.settling_delay_s);
        run.note("Num Points Fwd Expected", points);
        Ok(run)
    }
    /// Relative time, plotting voltage and the forward/backward split.
    pub fn process(&self, dataset: &mut ConsistentDataset, prepared: &PreparedRun) -> Result<VariantDetails, MeasurementError> {
        let time = shifted_time(dataset, "time_abs", |real| real.iter().copied().reduce(f64::min));
        dataset.insert("Time", time)?;
        let voltage_key = if dataset.has_data("anode_voltage_read") {
            "anode_voltage_read"
        } else {
            "anode_voltage_set"
        };
        let split_backward = self.enable_backward && !dataset.is_empty();
        let split = ForwardBackwardSplit::from_dataset(dataset, split_backward, prepared.expected_forward);
        let backward_plotted = split.has_backward(voltage_key);
        Ok(VariantDetails::Diode {
            split,
            voltage_key,
            backward_plotted,
        })
    }
}
/// The cathode column is written only when that buffer returned readings.
pub fn columns(dataset: &ConsistentDataset) -> Vec<Column> {
    let mut columns = vec![
        Column::new("Time", "Time(s)"),
        Column::new("anode_voltage_set", "VAnode_set(V)"),
        Column::new("anode_voltage_read", "VAnode_read(V)"),
        Column::new("anode_current", "IAnode(A)"),
    ];
    if dataset.has_data("cathode_current_buffer") {
        columns.push(Column::new("cathode_current_buffer", "ICathode_buffer(A)"));
    }
    columns
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::buffer::Sample;
    fn samples(values: &[f64]) -> Vec<Sample> {
        values.iter().map(|&v| Some(v)).collect()
    }
    #[test]
    fn default_sweep_expects_both_directions() {
        let run = DiodeParams::default().prepare().unwrap();
        assert_eq!(run.expected_forward, 31);
        assert_eq!(run.expected_total, 62);
        assert_eq!(run.script_params["enable_backward"], "1");
        assert_eq!(run.script_params["IlimitCathode"], "0.1");
    }
    #[test]
    fn zero_step_needs_equal_bounds() {
        let params = DiodeParams {
            vanode_step: 0.0,
            ..Default::default()
        };
        assert!(params.prepare().is_err());
    }
    #[test]
    fn huge_anode_range_is_a_validation_error() {
        let params = DiodeParams {
            vanode_stop: 1e20,
            vanode_step: 1.0,
            ..Default::default()
        };
        let err = params.prepare().unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ValidationError);
    }
    #[test]
    fn time_is_relative_to_earliest_reading() {
        let params = DiodeParams {
            vanode_start: 0.0,
            vanode_stop: 1.0,
            vanode_step: 0.5,
            ..Default::default()
        };
        let run = params.prepare().unwrap();
        let mut data = ConsistentDataset::empty(6);
        data.insert("time_abs", vec![None, Some(10.5), Some(11.0), Some(11.5), Some(12.0), Some(12.5)]).unwrap();
        data.insert("anode_voltage_read", vec![None; 6]).unwrap();
        data.insert("anode_voltage_set", samples(&[0.0, 0.5, 1.0, 1.0, 0.5, 0.0])).unwrap();
        let details = params.process(&mut data, &run).unwrap();
        let time = vec![None, Some(0.0), Some(0.5), Some(1.0), Some(1.5), Some(2.0)];
        assert_eq!(data.get("Time").unwrap(), time.as_slice());
        match details {
            VariantDetails::Diode { voltage_key, backward_plotted, split } => {
                assert_eq!(voltage_key, "anode_voltage_set");
                assert!(backward_plotted);
                assert_eq!(split.backward("anode_voltage_set"), samples(&[1.0, 0.5, 0.0]).as_slice());
            }
            other => panic!("unexpected details {other:?}"),
        }
    }
    #[test]
    fn cathode_column_only_with_data() {
        let mut data = ConsistentDataset::empty(2);
        data.insert("cathode_current_buffer", vec![None, None]).unwrap();
        assert_eq!(columns(&data).len(), 4);
        data.insert("cathode_current_buffer", vec![Some(-1e-6), None]).unwrap();
        let cols = columns(&data);
        assert_eq!(cols.last().unwrap().header, "ICathode_buffer(A)");
    }
}
