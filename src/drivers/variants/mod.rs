//! Per-measurement behaviour behind one tagged enum.
//!
//! Each variant module provides the same small set of stage functions
//! (`prepare`, buffer layout, `process`, `columns`); `MeasurementParams`
//! dispatches to them.
pub mod breakdown;
pub mod diode;
pub mod gate_transfer;
pub mod output;
pub mod stress;
use std::fmt;
use log::warn;
use serde::{Deserialize, Serialize};
use crate::drivers::buffer::{fit_to_length, ConsistentDataset, Sample};
use crate::drivers::extract::DerivedMetrics;
use crate::drivers::instrument::BufferSpec;
use crate::drivers::script::ScriptParams;
use crate::drivers::sweep::ForwardBackwardSplit;
use crate::drivers::MeasurementError;
pub use breakdown::BreakdownParams;
pub use diode::DiodeParams;
pub use gate_transfer::GateTransferParams;
pub use output::OutputParams;
pub use stress::{StressParams, StressSetPoints};
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum MeasurementKind {
    GateTransfer,
    Output,
    Breakdown,
    Diode,
    Stress,
}
impl MeasurementKind {
    /// Used in generated file names.
    pub fn short_name(&self) -> &'static str {
        match self {
            MeasurementKind::GateTransfer => "GateTransfer",
            MeasurementKind::Output => "Output",
            MeasurementKind::Breakdown => "Breakdown",
            MeasurementKind::Diode => "Diode",
            MeasurementKind::Stress => "Stress",
        }
    }
    pub fn display_name(&self) -> &'static str {
        match self {
            MeasurementKind::GateTransfer => "Gate Transfer",
            MeasurementKind::Output => "Output Characteristics",
            MeasurementKind::Breakdown => "Breakdown",
            MeasurementKind::Diode => "Diode",
            MeasurementKind::Stress => "Stress",
        }
    }
    pub fn plot_suffix(&self) -> &'static str {
        match self {
            MeasurementKind::Breakdown => "_linear_log.png",
            MeasurementKind::Stress => "_stress.png",
            _ => ".png",
        }
    }
    /// Script file looked up in the script directory when no explicit path is set.
    pub fn default_script(&self) -> &'static str {
        match self {
            MeasurementKind::GateTransfer => "GateSweep.tsp",
            MeasurementKind::Output => "IDVD.tsp",
            MeasurementKind::Breakdown => "BV.tsp",
            MeasurementKind::Diode => "diode.tsp",
            MeasurementKind::Stress => "Stress.tsp",
        }
    }
    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            MeasurementKind::Diode => 30_000,
            MeasurementKind::Stress => 3_600_000,
            _ => 3_000_000,
        }
    }
}
impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MeasurementParams {
    GateTransfer(GateTransferParams),
    Output(OutputParams),
    Breakdown(BreakdownParams),
    Diode(DiodeParams),
    Stress(StressParams),
}
/// Result of parameter preparation, consumed by every later stage.
#[derive(Clone, Debug, Default)]
pub struct PreparedRun {
    pub script_params: ScriptParams,
    /// Readings the script is expected to leave in the primary buffer.
    pub expected_total: usize,
    /// Points of one forward sweep, `0` when the variant does not split.
    pub expected_forward: usize,
    /// Set points and expected counts for the CSV header.
    pub notes: Vec<(String, String)>,
}
impl PreparedRun {
    fn param(&mut self, key: &str, value: impl ToString) {
        self.script_params.insert(key.to_string(), value.to_string());
    }
    fn note(&mut self, key: &str, value: impl ToString) {
        self.notes.push((key.to_string(), value.to_string()));
    }
}
/// One CSV column: the dataset channel and its header label with unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub key: &'static str,
    pub header: String,
}
impl Column {
    fn new(key: &'static str, header: impl Into<String>) -> Self {
        Self {
            key,
            header: header.into(),
        }
    }
}
/// Columns shared by the transistor variants: Jd, Jg and Js in `unit`.
fn density_columns(unit: &str) -> Vec<Column> {
    vec![
        Column::new("Jd", format!("Jd({unit})")),
        Column::new("Jg", format!("Jg({unit})")),
        Column::new("Js", format!("Js({unit})")),
    ]
}
/// What variant-specific processing produced besides the dataset columns.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "variant")]
pub enum VariantDetails {
    GateTransfer {
        split: ForwardBackwardSplit,
        metrics: DerivedMetrics,
        backward_plotted: bool,
    },
    Output {
        vd_step: f64,
    },
    Breakdown {
        mean_gate_bias: Option<f64>,
        title_gate_bias: f64,
    },
    Diode {
        split: ForwardBackwardSplit,
        voltage_key: &'static str,
        backward_plotted: bool,
    },
    Stress {
        set_points: StressSetPoints,
    },
}
impl VariantDetails {
    /// CSV comments derived from processing results.
    pub fn notes(&self) -> Vec<(String, String)> {
        match self {
            VariantDetails::GateTransfer { metrics, .. } => gate_transfer::metric_notes(metrics),
            VariantDetails::Breakdown {
                mean_gate_bias: Some(mean),
                ..
            } => vec![("Avg Vg_read (V)".to_string(), format!("{mean:.3}"))],
            _ => Vec::new(),
        }
    }
    pub fn metrics(&self) -> Option<&DerivedMetrics> {
        match self {
            VariantDetails::GateTransfer { metrics, .. } => Some(metrics),
            _ => None,
        }
    }
}
impl MeasurementParams {
    pub fn kind(&self) -> MeasurementKind {
        match self {
            MeasurementParams::GateTransfer(_) => MeasurementKind::GateTransfer,
            MeasurementParams::Output(_) => MeasurementKind::Output,
            MeasurementParams::Breakdown(_) => MeasurementKind::Breakdown,
            MeasurementParams::Diode(_) => MeasurementKind::Diode,
            MeasurementParams::Stress(_) => MeasurementKind::Stress,
        }
    }
    pub fn defaults(kind: MeasurementKind) -> Self {
        match kind {
            MeasurementKind::GateTransfer => MeasurementParams::GateTransfer(Default::default()),
            MeasurementKind::Output => MeasurementParams::Output(Default::default()),
            MeasurementKind::Breakdown => MeasurementParams::Breakdown(Default::default()),
            MeasurementKind::Diode => MeasurementParams::Diode(Default::default()),
            MeasurementKind::Stress => MeasurementParams::Stress(Default::default()),
        }
    }
    /// Validates the sweep and derives script parameters and expected counts.
    ///
    /// Runs before any instrument traffic.
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        match self {
            MeasurementParams::GateTransfer(p) => p.prepare(),
            MeasurementParams::Output(p) => p.prepare(),
            MeasurementParams::Breakdown(p) => p.prepare(),
            MeasurementParams::Diode(p) => p.prepare(),
            MeasurementParams::Stress(p) => p.prepare(),
        }
    }
    /// Buffer whose `.n` tells how many readings the script produced.
    pub fn primary_buffer(&self) -> &'static str {
        match self {
            MeasurementParams::GateTransfer(_) => gate_transfer::PRIMARY_BUFFER,
            MeasurementParams::Output(_) => output::PRIMARY_BUFFER,
            MeasurementParams::Breakdown(_) => breakdown::PRIMARY_BUFFER,
            MeasurementParams::Diode(_) => diode::PRIMARY_BUFFER,
            MeasurementParams::Stress(_) => stress::PRIMARY_BUFFER,
        }
    }
    pub fn buffer_specs(&self) -> &'static [BufferSpec] {
        match self {
            MeasurementParams::GateTransfer(_) => gate_transfer::BUFFERS,
            MeasurementParams::Output(_) => output::BUFFERS,
            MeasurementParams::Breakdown(_) => breakdown::BUFFERS,
            MeasurementParams::Diode(_) => diode::BUFFERS,
            MeasurementParams::Stress(_) => stress::BUFFERS,
        }
    }
    pub fn priority_keys(&self) -> &'static [&'static str] {
        match self {
            MeasurementParams::GateTransfer(_) => gate_transfer::PRIORITY_KEYS,
            MeasurementParams::Output(_) => output::PRIORITY_KEYS,
            MeasurementParams::Breakdown(_) => breakdown::PRIORITY_KEYS,
            MeasurementParams::Diode(_) => diode::PRIORITY_KEYS,
            MeasurementParams::Stress(_) => stress::PRIORITY_KEYS,
        }
    }
    pub fn process(
        &self,
        dataset: &mut ConsistentDataset,
        prepared: &PreparedRun,
    ) -> Result<VariantDetails, MeasurementError> {
        match self {
            MeasurementParams::GateTransfer(p) => p.process(dataset, prepared),
            MeasurementParams::Output(p) => p.process(dataset),
            MeasurementParams::Breakdown(p) => p.process(dataset),
            MeasurementParams::Diode(p) => p.process(dataset, prepared),
            MeasurementParams::Stress(p) => p.process(dataset),
        }
    }
    pub fn columns(&self, dataset: &ConsistentDataset, unit: &str, density_defined: bool) -> Vec<Column> {
        match self {
            MeasurementParams::GateTransfer(_) => gate_transfer::columns(unit),
            MeasurementParams::Output(_) => output::columns(unit),
            MeasurementParams::Breakdown(_) => breakdown::columns(unit),
            MeasurementParams::Diode(_) => diode::columns(dataset),
            MeasurementParams::Stress(_) => stress::columns(unit, density_defined),
        }
    }
}
/// Rejects NaN and infinite parameters by name.
fn ensure_finite(values: &[(&str, f64)]) -> Result<(), MeasurementError> {
    for (name, value) in values {
        if !value.is_finite() {
            return Err(MeasurementError::validation(format!("{name} must be a finite number, got {value}")));
        }
    }
    Ok(())
}
/// Points of a sweep given by a step magnitude; direction comes from start/stop.
fn sweep_points(name: &str, start: f64, stop: f64, step: f64) -> Result<usize, MeasurementError> {
    if step == 0.0 {
        if start != stop {
            return Err(MeasurementError::validation(format!(
                "{name} step cannot be zero when {name}_start ({start}) != {name}_stop ({stop})"
            )));
        }
        return Ok(1);
    }
    let intervals = ((stop - start).abs() / step.abs()).round_ties_even();
    bounded_count(name, intervals)?
        .checked_add(1)
        .ok_or_else(|| too_many_points(name))
}
/// Upper bound on the readings one run may expect.
pub const MAX_EXPECTED_POINTS: usize = 10_000_000;
fn too_many_points(name: &str) -> MeasurementError {
    MeasurementError::validation(format!(
        "{name} sweep would need more than {MAX_EXPECTED_POINTS} points"
    ))
}
/// A non-negative whole count computed in floating point, rejected when it
/// does not fit below `MAX_EXPECTED_POINTS`.
fn bounded_count(name: &str, count: f64) -> Result<usize, MeasurementError> {
    if !count.is_finite() || count < 0.0 || count >= MAX_EXPECTED_POINTS as f64 {
        return Err(too_many_points(name));
    }
    Ok(count as usize)
}
/// Product of per-axis point counts, bounded like a single axis.
fn total_points(name: &str, factors: &[usize]) -> Result<usize, MeasurementError> {
    factors
        .iter()
        .try_fold(1usize, |total, &n| total.checked_mul(n))
        .filter(|&total| total <= MAX_EXPECTED_POINTS)
        .ok_or_else(|| too_many_points(name))
}
/// Points of a sweep whose step sign must agree with the scan direction.
fn directed_sweep_points(name: &str, start: f64, stop: f64, step: f64) -> Result<usize, MeasurementError> {
    if step != 0.0 && ((stop > start && step < 0.0) || (stop < start && step > 0.0)) {
        return Err(MeasurementError::validation(format!(
            "{name} step ({step} V) does not match the scan direction ({start} V to {stop} V)"
        )));
    }
    sweep_points(name, start, stop, step)
}
/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}
/// Measured bias axis when one of `candidates` holds data, otherwise the
/// ideal sweep fitted to the dataset length.
fn bias_axis(dataset: &ConsistentDataset, candidates: &[&str], ideal: impl FnOnce() -> Vec<f64>) -> Vec<Sample> {
    if let Some(key) = candidates.iter().find(|key| dataset.has_data(key)) {
        return dataset.channel_or_missing(key);
    }
    if dataset.is_empty() {
        return Vec::new();
    }
    warn!("no measured bias among {candidates:?}, using the programmed sweep");
    let ideal: Vec<Sample> = ideal().into_iter().map(Some).collect();
    fit_to_length(&ideal, dataset.len())
}
/// `channel` shifted so that `origin` of its real samples becomes zero.
fn shifted_time(dataset: &ConsistentDataset, channel: &str, origin: impl FnOnce(&[f64]) -> Option<f64>) -> Vec<Sample> {
    let values = dataset.channel_or_missing(channel);
    let real: Vec<f64> = values.iter().flatten().copied().collect();
    match origin(&real) {
        Some(t0) => values.iter().map(|t| t.map(|t| t - t0)).collect(),
        None => vec![None; dataset.len()],
    }
}
fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn sweep_points_rounds_to_nearest_and_counts_both_ends() {
        assert_eq!(sweep_points("Vg", -1.0, 2.0, 0.1).unwrap(), 31);
        assert_eq!(sweep_points("Vg", 2.0, -1.0, 0.1).unwrap(), 31);
        assert_eq!(sweep_points("Vg", 1.0, 1.0, 0.0).unwrap(), 1);
        assert!(sweep_points("Vg", 0.0, 1.0, 0.0).is_err());
    }
    #[test]
    fn oversized_sweeps_are_rejected_instead_of_overflowing() {
        let err = sweep_points("Vg", 0.0, 1e20, 1.0).unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ValidationError);
        assert!(sweep_points("Vg", -f64::MAX, f64::MAX, 1e-300).is_err());
        assert!(total_points("Output", &[MAX_EXPECTED_POINTS, 2]).is_err());
        assert!(total_points("Output", &[usize::MAX, usize::MAX]).is_err());
        assert_eq!(total_points("Output", &[4, 26]).unwrap(), 104);
        assert!(bounded_count("stress", f64::INFINITY).is_err());
    }
    #[test]
    fn zero_step_with_distinct_bounds_is_a_validation_error() {
        let err = directed_sweep_points("Vd", 0.0, 5.0, 0.0).unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ValidationError);
    }
    #[test]
    fn step_sign_must_follow_direction() {
        assert!(directed_sweep_points("Vd", 0.0, 5.0, -0.5).is_err());
        assert!(directed_sweep_points("Vd", 5.0, 0.0, 0.5).is_err());
        assert_eq!(directed_sweep_points("Vd", 5.0, 0.0, -0.5).unwrap(), 11);
    }
    #[test]
    fn linspace_hits_both_ends() {
        let v = linspace(-1.0, 2.0, 4);
        assert_eq!(v, vec![-1.0, 0.0, 1.0, 2.0]);
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
    #[test]
    fn bias_axis_prefers_measured_channel() {
        let mut data = ConsistentDataset::empty(3);
        data.insert("Vg_read", vec![None, None, None]).unwrap();
        data.insert("Vg_source", vec![Some(0.0), Some(0.5), None]).unwrap();
        let axis = bias_axis(&data, &["Vg_read", "Vg_source"], || vec![9.0; 3]);
        assert_eq!(axis, vec![Some(0.0), Some(0.5), None]);
    }
    #[test]
    fn bias_axis_pads_generated_sweep() {
        let data = ConsistentDataset::empty(4);
        let axis = bias_axis(&data, &["Vg_read"], || vec![1.0, 2.0]);
        assert_eq!(axis, vec![Some(1.0), Some(2.0), None, None]);
    }
    #[test]
    fn kinds_carry_file_conventions() {
        assert_eq!(MeasurementKind::Breakdown.plot_suffix(), "_linear_log.png");
        assert_eq!(MeasurementKind::Stress.plot_suffix(), "_stress.png");
        assert_eq!(MeasurementKind::Output.default_script(), "IDVD.tsp");
        let params = MeasurementParams::defaults(MeasurementKind::Diode);
        assert_eq!(params.kind(), MeasurementKind::Diode);
    }
}
