use serde::{Deserialize, Serialize};
use super::{bias_axis, density_columns, directed_sweep_points, ensure_finite, linspace, total_points, Column, PreparedRun, VariantDetails, MAX_EXPECTED_POINTS};
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::instrument::{paths, BufferSpec};
use crate::drivers::MeasurementError;
pub const PRIMARY_BUFFER: &str = paths::DRAIN_CURRENT_BUFFER;
pub const BUFFERS: &[BufferSpec] = &[
    BufferSpec::new("Time_gate", paths::GATE_TIMESTAMPS),
    BufferSpec::new("Vg_source", paths::GATE_VOLTAGE_SOURCE),
    BufferSpec::new("Vg_read", paths::GATE_VOLTAGE),
    BufferSpec::new("Vd_read", paths::DRAIN_VOLTAGE),
    BufferSpec::new("Id", paths::DRAIN_CURRENT),
    BufferSpec::new("Ig", paths::GATE_CURRENT),
    BufferSpec::new("Is_buffer", paths::SOURCE_CURRENT),
];
pub const PRIORITY_KEYS: &[&str] = &["Id", "Vd_read", "Vg_source", "Vg_read"];
/// Family of drain sweeps, one per gate level.
///
/// The gate axis is given as a number of segments between start and stop,
/// the drain axis as a step in volts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputParams {
    pub vg_start: f64,
    pub vg_stop: f64,
    pub vg_segments: i64,
    pub vd_start: f64,
    pub vd_stop: f64,
    pub vd_step: f64,
    pub ilimit_drain: f64,
    pub ilimit_gate: f64,
    pub drain_nplc: f64,
    pub gate_nplc: f64,
    pub settling_delay_s: f64,
}
impl Default for OutputParams {
    fn default() -> Self {
        Self {
            vg_start: -1.0,
            vg_stop: 2.0,
            vg_segments: 3,
            vd_start: 0.0,
            vd_stop: 5.0,
            vd_step: 0.2,
            ilimit_drain: 0.1,
            ilimit_gate: 0.01,
            drain_nplc: 1.0,
            gate_nplc: 1.0,
            settling_delay_s: 0.1,
        }
    }
}
impl OutputParams {
    /// Gate levels measured, after validating the segment count.
    fn gate_points(&self) -> Result<usize, MeasurementError> {
        if self.vg_start != self.vg_stop {
            if self.vg_segments <= 0 {
                return Err(MeasurementError::validation(format!(
                    "Vg segments ({}) must be > 0 when Vg_start ({}) != Vg_stop ({})",
                    self.vg_segments, self.vg_start, self.vg_stop
                )));
            }
            usize::try_from(self.vg_segments)
                .ok()
                .and_then(|segments| segments.checked_add(1))
                .filter(|&points| points <= MAX_EXPECTED_POINTS)
                .ok_or_else(|| {
                    MeasurementError::validation(format!(
                        "Vg segments ({}) exceed {MAX_EXPECTED_POINTS} points",
                        self.vg_segments
                    ))
                })
        } else if self.vg_segments != 0 {
            Err(MeasurementError::validation(format!(
                "Vg segments ({}) must be 0 for a single gate level ({} V)",
                self.vg_segments, self.vg_start
            )))
        } else {
            Ok(1)
        }
    }
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        ensure_finite(&[
            ("Vg_start", self.vg_start),
            ("Vg_stop", self.vg_stop),
            ("Vd_start", self.vd_start),
            ("Vd_stop", self.vd_stop),
            ("Vd_step", self.vd_step),
            ("settling_delay", self.settling_delay_s),
        ])?;
        let vg_points = self.gate_points()?;
        let vd_points = directed_sweep_points("Vd", self.vd_start, self.vd_stop, self.vd_step)?;
        let gate_step = if vg_points > 1 {
            (self.vg_stop - self.vg_start) / self.vg_segments as f64
        } else {
            0.0
        };
        let mut run = PreparedRun {
            expected_total: total_points("Vg x Vd", &[vg_points, vd_points])?,
            ..PreparedRun::default()
        };
        run.param("IlimitDrain", self.ilimit_drain);
        run.param("IlimitGate", self.ilimit_gate);
        run.param("Drain_nplc", self.drain_nplc);
        run.param("Gate_nplc", self.gate_nplc);
        run.param("Vg_start", self.vg_start);
        run.param("Vg_stop", self.vg_stop);
        run.param("sg", gate_step);
        run.param("Vg_step", self.vg_segments);
        run.param("Vd_start", self.vd_start);
        run.param("Vd_stop", self.vd_stop);
        run.param("Vd_step", self.vd_step);
        run.param("N_st", vd_points);
        run.param("settling_delay", self.settling_delay_s);
        run.note("Vg_start (set)", self.vg_start);
        run.note("Vg_stop (set)", self.vg_stop);
        run.note("Vg_segments (set)", self.vg_segments);
        run.note("Vd_start (set)", self.vd_start);
        run.note("Vd_stop (set)", self.vd_stop);
        run.note("Vd_step (set)", self.vd_step);
        run.note("Settling Delay (s)", self.settling_delay_s);
        run.note("Num Vg points expected", vg_points);
        run.note("Num Vd points per Vg expected", vd_points);
        Ok(run)
    }
    pub fn process(&self, dataset: &mut ConsistentDataset) -> Result<VariantDetails, MeasurementError> {
        let vg_points = self.gate_points()?;
        let vd_points = directed_sweep_points("Vd", self.vd_start, self.vd_stop, self.vd_step)?;
        let vg = bias_axis(dataset, &["Vg_source", "Vg_read"], || {
            linspace(self.vg_start, self.vg_stop, vg_points)
                .into_iter()
                .flat_map(|level| std::iter::repeat(level).take(vd_points))
                .collect()
        });
        dataset.insert("Vg_actual", vg)?;
        let time = dataset.channel_or_missing("Time_gate");
        dataset.insert("Time", time)?;
        Ok(VariantDetails::Output { vd_step: self.vd_step })
    }
}
pub fn columns(unit: &str) -> Vec<Column> {
    let mut columns = vec![
        Column::new("Time", "Time(s)"),
        Column::new("Vg_actual", "Vg_actual(V)"),
        Column::new("Vd_read", "VDrain_read(V)"),
        Column::new("Id", "IDrain(A)"),
        Column::new("Ig", "IGate(A)"),
        Column::new("Is", "ISource(A)"),
    ];
    columns.extend(density_columns(unit));
    columns
}
