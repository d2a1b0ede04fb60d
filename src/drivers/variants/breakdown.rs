use serde::{Deserialize, Serialize};
use super::{density_columns, directed_sweep_points, ensure_finite, Column, PreparedRun, VariantDetails};
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::extract::nan_mean;
use crate::drivers::instrument::{paths, BufferSpec};
use crate::drivers::MeasurementError;
pub const PRIMARY_BUFFER: &str = paths::DRAIN_CURRENT_BUFFER;
pub const BUFFERS: &[BufferSpec] = &[
    BufferSpec::new("Time_gate", paths::GATE_TIMESTAMPS),
    BufferSpec::new("Vg_read", paths::GATE_VOLTAGE),
    BufferSpec::new("Vd_read", paths::DRAIN_VOLTAGE),
    BufferSpec::new("Id", paths::DRAIN_CURRENT),
    BufferSpec::new("Ig", paths::GATE_CURRENT),
    BufferSpec::new("Is_buffer", paths::SOURCE_CURRENT),
];
pub const PRIORITY_KEYS: &[&str] = &["Id", "Vd_read"];
/// High-voltage drain sweep with the gate held off.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakdownParams {
    pub vg: f64,
    pub vd_start: f64,
    pub vd_stop: f64,
    pub vd_step: f64,
    pub ilimit_drain: f64,
    pub ilimit_gate: f64,
    pub drain_nplc: f64,
    pub gate_nplc: f64,
    pub settling_delay_s: f64,
}
impl Default for BreakdownParams {
    fn default() -> Self {
        Self {
            vg: -1.0,
            vd_start: 0.0,
            vd_stop: 100.0,
            vd_step: 1.0,
            ilimit_drain: 0.01,
            ilimit_gate: 0.001,
            drain_nplc: 1.0,
            gate_nplc: 1.0,
            settling_delay_s: 0.1,
        }
    }
}
impl BreakdownParams {
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        ensure_finite(&[
            ("Vg", self.vg),
            ("Vd_start", self.vd_start),
            ("Vd_stop", self.vd_stop),
            ("Vd_step", self.vd_step),
            ("settling_delay", self.settling_delay_s),
        ])?;
        let points = directed_sweep_points("Vd", self.vd_start, self.vd_stop, self.vd_step)?;
        let mut run = PreparedRun {
            expected_total: points,
            ..PreparedRun::default()
        };
        run.param("IlimitDrain", self.ilimit_drain);
        run.param("IlimitGate", self.ilimit_gate);
        run.param("Drain_nplc", self.drain_nplc);
        run.param("Gate_nplc", self.gate_nplc);
        run.param("Vg", self.vg);
        run.param("Vd_start", self.vd_start);
        run.param("Vd_stop", self.vd_stop);
        run.param("Vd_step", self.vd_step);
        run.param("settling_delay", self.settling_delay_s);
        run.note("Vg_set", self.vg);
        run.note("Vd_start (set)", self.vd_start);
        run.note("Vd_stop (set)", self.vd_stop);
        run.note("Vd_step (set)", self.vd_step);
        run.note("Settling Delay (s)", self.settling_delay_s);
        run.note("Num Vd points expected", points);
        Ok(run)
    }
    /// Gate bias column from the measured gate voltage, else the set level.
    pub fn process(&self, dataset: &mut ConsistentDataset) -> Result<VariantDetails, MeasurementError> {
        let vg_final = if dataset.has_data("Vg_read") {
            dataset.channel_or_missing("Vg_read")
        } else {
            vec![Some(self.vg); dataset.len()]
        };
        dataset.insert("Vg_final", vg_final)?;
        let time = dataset.channel_or_missing("Time_gate");
        dataset.insert("Time", time)?;
        let mean_gate_bias = nan_mean(&dataset.to_array("Vg_final"));
        Ok(VariantDetails::Breakdown {
            mean_gate_bias,
            title_gate_bias: mean_gate_bias.unwrap_or(self.vg),
        })
    }
}
pub fn columns(unit: &str) -> Vec<Column> {
    let mut columns = vec![
        Column::new("Time", "Time(s)"),
        Column::new("Vg_final", "Vg_actual(V)"),
        Column::new("Vd_read", "Vd_read(V)"),
        Column::new("Id", "Id(A)"),
        Column::new("Ig", "Ig(A)"),
        Column::new("Is", "Is(A)"),
    ];
    columns.extend(density_columns(unit));
    columns
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_sweep_has_101_points() {
        let run = BreakdownParams::default().prepare().unwrap();
        assert_eq!(run.expected_total, 101);
        assert_eq!(run.script_params["Vg"], "-1");
    }
    #[test]
    fn zero_step_is_rejected_before_anything_else() {
        let params = BreakdownParams {
            vd_step: 0.0,
            ..Default::default()
        };
        assert!(params.prepare().is_err());
    }
    #[test]
    fn huge_drain_range_is_a_validation_error() {
        let params = BreakdownParams {
            vd_stop: 1e20,
            ..Default::default()
        };
        let err = params.prepare().unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ValidationError);
    }
    #[test]
    fn gate_bias_falls_back_to_set_level() {
        let params = BreakdownParams::default();
        let mut data = ConsistentDataset::empty(3);
        data.insert("Vg_read", vec![None; 3]).unwrap();
        let details = params.process(&mut data).unwrap();
        assert_eq!(data.get("Vg_final").unwrap(), &[Some(-1.0); 3]);
        assert_eq!(data.get("Time").unwrap(), &[None::<f64>; 3]);
        match details {
            VariantDetails::Breakdown { mean_gate_bias, title_gate_bias } => {
                assert_eq!(mean_gate_bias, Some(-1.0));
                assert_eq!(title_gate_bias, -1.0);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }
    #[test]
    fn measured_gate_bias_is_averaged() {
        let mut data = ConsistentDataset::empty(3);
        data.insert("Vg_read", vec![Some(-0.9), None, Some(-1.1)]).unwrap();
        let details = BreakdownParams::default().process(&mut data).unwrap();
        assert_eq!(data.get("Vg_final").unwrap()[1], None);
        let notes = details.notes();
        assert_eq!(notes, vec![("Avg Vg_read (V)".to_string(), "-1.000".to_string())]);
    }
}
