use serde::{Deserialize, Serialize};
use super::{bias_axis, density_columns, ensure_finite, flag, linspace, sweep_points, total_points, Column, PreparedRun, VariantDetails};
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::extract::{extract_transfer, DerivedMetrics, TransferInput};
use crate::drivers::instrument::{paths, BufferSpec};
use crate::drivers::sweep::ForwardBackwardSplit;
use crate::drivers::MeasurementError;
use crate::recorder::format_sci;
pub const PRIMARY_BUFFER: &str = paths::GATE_VOLTAGE_BUFFER;
pub const BUFFERS: &[BufferSpec] = &[
    BufferSpec::new("Time", paths::GATE_TIMESTAMPS),
    BufferSpec::new("Vg_read", paths::GATE_VOLTAGE),
    BufferSpec::new("Vg_source", paths::GATE_VOLTAGE_SOURCE),
    BufferSpec::new("Vd_read", paths::DRAIN_VOLTAGE),
    BufferSpec::new("Id", paths::DRAIN_CURRENT),
    BufferSpec::new("Ig", paths::GATE_CURRENT),
    BufferSpec::new("Is_buffer", paths::SOURCE_CURRENT),
];
pub const PRIORITY_KEYS: &[&str] = &["Id", "Vg_read", "Vg_source"];
/// Gate sweep at fixed drain bias, optionally swept back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateTransferParams {
    pub vg_start: f64,
    pub vg_stop: f64,
    pub vg_step: f64,
    pub vd: f64,
    pub ilimit_drain: f64,
    pub ilimit_gate: f64,
    pub drain_nplc: f64,
    pub gate_nplc: f64,
    pub settling_delay_s: f64,
    pub enable_backward: bool,
}
impl Default for GateTransferParams {
    fn default() -> Self {
        Self {
            vg_start: -1.0,
            vg_stop: 2.0,
            vg_step: 0.1,
            vd: 1.0,
            ilimit_drain: 0.1,
            ilimit_gate: 0.01,
            drain_nplc: 1.0,
            gate_nplc: 1.0,
            settling_delay_s: 0.1,
            enable_backward: true,
        }
    }
}
impl GateTransferParams {
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        ensure_finite(&[
            ("Vg_start", self.vg_start),
            ("Vg_stop", self.vg_stop),
            ("Vg_step", self.vg_step),
            ("Vd", self.vd),
            ("settling_delay", self.settling_delay_s),
        ])?;
        let points = sweep_points("Vg", self.vg_start, self.vg_stop, self.vg_step)?;
        let mut run = PreparedRun {
            expected_forward: points,
            expected_total: total_points("Vg", &[points, if self.enable_backward { 2 } else { 1 }])?,
            ..PreparedRun::default()
        };
        run.param("IlimitDrain", self.ilimit_drain);
        run.param("IlimitGate", self.ilimit_gate);
        run.param("Drain_nplc", self.drain_nplc);
        run.param("Gate_nplc", self.gate_nplc);
        run.param("Vd", self.vd);
        run.param("Vg_start", self.vg_start);
        run.param("Vg_stop", self.vg_stop);
        run.param("step", self.vg_step);
        run.param("enable_backward", flag(self.enable_backward));
        run.param("settling_delay", self.settling_delay_s);
        run.note("Vd_bias (set)", format!("{:.3}", self.vd));
        run.note("Vg_start (set)", self.vg_start);
        run.note("Vg_stop (set)", self.vg_stop);
        run.note("Vg_step (set)", self.vg_step);
        run.note("Enable Backward", self.enable_backward);
        run.note("Settling Delay (s)", self.settling_delay_s);
        run.note("Num Points Fwd Expected", points);
        Ok(run)
    }
    /// Bias axis, forward/backward split and forward-sweep extraction.
    pub fn process(&self, dataset: &mut ConsistentDataset, prepared: &PreparedRun) -> Result<VariantDetails, MeasurementError> {
        let points = prepared.expected_forward;
        let vg = bias_axis(dataset, &["Vg_read", "Vg_source"], || {
            let forward = linspace(self.vg_start, self.vg_stop, points.max(1));
            if self.enable_backward {
                forward.iter().chain(forward.iter().rev()).copied().collect()
            } else {
                forward
            }
        });
        dataset.insert("Vg_actual", vg)?;
        let split = ForwardBackwardSplit::from_dataset(dataset, self.enable_backward, points);
        let extraction = extract_transfer(TransferInput {
            vg: split.forward("Vg_actual"),
            id: split.forward("Id"),
            time: split.forward("Time"),
            vd_read: split.forward("Vd_read"),
            nominal_vd: self.vd,
        });
        dataset.insert_fitted("gm", &extraction.gm);
        dataset.insert_fitted("SS", &extraction.ss);
        let backward_plotted = self.enable_backward && split.has_backward("Vg_actual");
        Ok(VariantDetails::GateTransfer {
            split,
            metrics: extraction.metrics,
            backward_plotted,
        })
    }
}
pub fn columns(unit: &str) -> Vec<Column> {
    let mut columns = vec![
        Column::new("Time", "Time(s)"),
        Column::new("Vg_actual", "Vg_actual(V)"),
        Column::new("Id", "IDrain(A)"),
        Column::new("Ig", "IGate(A)"),
        Column::new("Is", "ISource(A)"),
        Column::new("Vd_read", "VDrain_read(V)"),
        Column::new("gm", "gm(S)"),
        Column::new("SS", "SS(mV/dec)"),
    ];
    columns.extend(density_columns(unit));
    columns
}
/// Header comments for every metric that could be extracted.
pub fn metric_notes(m: &DerivedMetrics) -> Vec<(String, String)> {
    let mut notes = Vec::new();
    let mut push = |key: &str, value: String| notes.push((key.to_string(), value));
    if let Some(v) = m.vth {
        push("Vth_fwd (V)", format!("{v:.4}"));
    }
    if let Some(v) = m.min_ss {
        push("SS_min_fwd (mV/dec)", format!("{v:.2}"));
    }
    if let Some(v) = m.max_gm {
        push("Max_gm_fwd (S)", format_sci(v, 4));
    }
    if let Some(v) = m.vg_at_max_gm {
        push("Vg_at_Max_gm_fwd (V)", format!("{v:.4}"));
    }
    if let Some(v) = m.ion {
        push("Ion_fwd (A)", format_sci(v, 4));
    }
    if let Some(v) = m.ioff {
        push("Ioff_fwd (A)", format_sci(v, 4));
    }
    if let Some(v) = m.ion_ioff_ratio {
        push("Ion_Ioff_Ratio_fwd", format_sci(v, 4));
    }
    if m.avg_sweep_rate != 0.0 {
        push("Avg_Sweep_Rate_Fwd (V/s)", format!("{:.3}", m.avg_sweep_rate));
    }
    if let Some(v) = m.avg_drain_bias {
        push("Avg_Drain_Bias_Fwd (V)", format!("{v:.3}"));
    }
    notes
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::buffer::Sample;
    #[test]
    fn backward_sweep_doubles_expected_points() {
        let run = GateTransferParams::default().prepare().unwrap();
        assert_eq!(run.expected_forward, 31);
        assert_eq!(run.expected_total, 62);
        assert_eq!(run.script_params["enable_backward"], "1");
        assert_eq!(run.script_params["step"], "0.1");
        assert_eq!(run.script_params["Vg_start"], "-1");
    }
    #[test]
    fn zero_step_over_a_range_is_rejected() {
        let params = GateTransferParams {
            vg_step: 0.0,
            ..Default::default()
        };
        assert!(params.prepare().is_err());
        let params = GateTransferParams {
            vg_start: 0.5,
            vg_stop: 0.5,
            vg_step: 0.0,
            enable_backward: false,
            ..Default::default()
        };
        assert_eq!(params.prepare().unwrap().expected_total, 1);
    }
    #[test]
    fn huge_gate_range_is_a_validation_error() {
        let params = GateTransferParams {
            vg_start: 0.0,
            vg_stop: 1e20,
            vg_step: 1.0,
            enable_backward: false,
            ..Default::default()
        };
        let err = params.prepare().unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ValidationError);
        let params = GateTransferParams {
            vg_start: 0.0,
            vg_stop: 6e6,
            vg_step: 1.0,
            enable_backward: true,
            ..Default::default()
        };
        assert!(params.prepare().is_err());
    }
    #[test]
    fn generated_axis_mirrors_for_backward_sweep() {
        let params = GateTransferParams {
            vg_start: 0.0,
            vg_stop: 1.0,
            vg_step: 0.5,
            ..Default::default()
        };
        let run = params.prepare().unwrap();
        let mut data = ConsistentDataset::empty(6);
        data.insert("Id", vec![Some(1e-9); 6]).unwrap();
        data.insert("Vg_read", vec![None; 6]).unwrap();
        let details = params.process(&mut data, &run).unwrap();
        let vg: Vec<Sample> = [0.0, 0.5, 1.0, 1.0, 0.5, 0.0].iter().map(|&v| Some(v)).collect();
        assert_eq!(data.get("Vg_actual").unwrap(), vg.as_slice());
        assert_eq!(data.get("gm").unwrap().len(), 6);
        match details {
            VariantDetails::GateTransfer { split, backward_plotted, .. } => {
                assert!(backward_plotted);
                assert_eq!(split.forward("Id").len(), 3);
                assert_eq!(split.backward("Id").len(), 3);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }
    #[test]
    fn metric_notes_skip_undefined_values() {
        let metrics = DerivedMetrics {
            vth: Some(0.5),
            ion: Some(1e-3),
            avg_drain_bias: Some(1.0),
            ..Default::default()
        };
        let notes = metric_notes(&metrics);
        let keys: Vec<&str> = notes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Vth_fwd (V)", "Ion_fwd (A)", "Avg_Drain_Bias_Fwd (V)"]);
        assert_eq!(notes[1].1, "1.0000e-03");
    }
}
