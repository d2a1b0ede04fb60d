use serde::{Deserialize, Serialize};
use super::{bounded_count, density_columns, ensure_finite, shifted_time, Column, PreparedRun, VariantDetails, MAX_EXPECTED_POINTS};
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::instrument::{paths, BufferSpec};
use crate::drivers::MeasurementError;
pub const PRIMARY_BUFFER: &str = paths::DRAIN_TIMESTAMPS;
pub const BUFFERS: &[BufferSpec] = &[
    BufferSpec::new("Timestamp", paths::DRAIN_TIMESTAMPS),
    BufferSpec::new("Vd_read", paths::DRAIN_VOLTAGE),
    BufferSpec::new("Id", paths::DRAIN_CURRENT),
    BufferSpec::new("Vg_read", paths::GATE_VOLTAGE),
    BufferSpec::new("Ig", paths::GATE_CURRENT),
    BufferSpec::new("Vs_read", paths::SOURCE_VOLTAGE),
    BufferSpec::new("Is_buffer", paths::SOURCE_CURRENT),
];
pub const PRIORITY_KEYS: &[&str] = &["Timestamp", "Id", "Vd_read"];
/// Constant bias held on all three terminals while sampling periodically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressParams {
    pub vd: f64,
    pub vg: f64,
    pub vs: f64,
    pub duration_s: f64,
    pub measure_interval_s: f64,
    pub initial_settling_delay_s: f64,
    pub ilimit_drain: f64,
    pub ilimit_gate: f64,
    pub ilimit_source: f64,
    pub drain_nplc: f64,
    pub gate_nplc: f64,
    pub source_nplc: f64,
}
impl Default for StressParams {
    fn default() -> Self {
        Self {
            vd: 5.0,
            vg: 2.0,
            vs: 0.0,
            duration_s: 60.0,
            measure_interval_s: 1.0,
            initial_settling_delay_s: 0.1,
            ilimit_drain: 0.1,
            ilimit_gate: 0.01,
            ilimit_source: 0.1,
            drain_nplc: 1.0,
            gate_nplc: 1.0,
            source_nplc: 1.0,
        }
    }
}
/// Programmed biases reported alongside the stress data.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StressSetPoints {
    pub vd: f64,
    pub vg: f64,
    pub vs: f64,
    pub duration: f64,
}
impl StressParams {
    /// Samples taken at `t = 0, i, 2i, ...` plus one at the end when the
    /// duration is not a whole number of intervals.
    pub fn expected_points(&self) -> Result<usize, MeasurementError> {
        let (duration, interval) = (self.duration_s, self.measure_interval_s);
        if duration == 0.0 {
            return Ok(1);
        }
        if interval > duration {
            return Ok(2);
        }
        let partial = usize::from(duration % interval != 0.0);
        bounded_count("stress", (duration / interval).floor())?
            .checked_add(1 + partial)
            .filter(|&points| points <= MAX_EXPECTED_POINTS)
            .ok_or_else(|| {
                MeasurementError::validation(format!(
                    "stress of {duration} s every {interval} s exceeds {MAX_EXPECTED_POINTS} points"
                ))
            })
    }
    pub fn prepare(&self) -> Result<PreparedRun, MeasurementError> {
        ensure_finite(&[
            ("VD_stress", self.vd),
            ("VG_stress", self.vg),
            ("VS_stress", self.vs),
            ("stress_duration", self.duration_s),
            ("stress_measure_interval", self.measure_interval_s),
            ("initial_settling_delay", self.initial_settling_delay_s),
        ])?;
        if self.duration_s < 0.0 {
            return Err(MeasurementError::validation(format!(
                "stress duration ({} s) cannot be negative",
                self.duration_s
            )));
        }
        if self.duration_s > 0.0 && self.measure_interval_s <= 0.0 {
            return Err(MeasurementError::validation(format!(
                "measure interval ({} s) must be > 0 for a stress duration of {} s",
                self.measure_interval_s, self.duration_s
            )));
        }
        if self.initial_settling_delay_s < 0.0 {
            return Err(MeasurementError::validation(format!(
                "initial settling delay ({} s) cannot be negative",
                self.initial_settling_delay_s
            )));
        }
        let points = self.expected_points()?;
        let interval = if self.measure_interval_s > 0.0 {
            self.measure_interval_s
        } else {
            self.duration_s
        };
        let mut run = PreparedRun {
            expected_total: points,
            ..PreparedRun::default()
        };
        run.param("VD_stress_val", self.vd);
        run.param("VG_stress_val", self.vg);
        run.param("VS_stress_val", self.vs);
        run.param("stress_duration_val", self.duration_s);
        run.param("stress_measure_interval_val", interval);
        run.param("initial_settling_delay", self.initial_settling_delay_s);
        run.param("IlimitDrain_stress", self.ilimit_drain);
        run.param("IlimitGate_stress", self.ilimit_gate);
        run.param("IlimitSource_stress", self.ilimit_source);
        run.param("Drain_nplc_stress", self.drain_nplc);
        run.param("Gate_nplc_stress", self.gate_nplc);
        run.param("Source_nplc_stress", self.source_nplc);
        run.note("VD_stress_val (set, V)", self.vd);
        run.note("VG_stress_val (set, V)", self.vg);
        run.note("VS_stress_val (set, V)", self.vs);
        run.note("Stress Duration (set, s)", self.duration_s);
        run.note("Stress Measure Interval (set, s)", self.measure_interval_s);
        run.note("Initial Settling Delay (set, s)", self.initial_settling_delay_s);
        run.note("Expected Stress Data Points", points);
        run.note("IlimitDrain_stress (set, A)", self.ilimit_drain);
        run.note("IlimitGate_stress (set, A)", self.ilimit_gate);
        run.note("IlimitSource_stress (set, A)", self.ilimit_source);
        run.note("Drain_nplc_stress (set)", self.drain_nplc);
        run.note("Gate_nplc_stress (set)", self.gate_nplc);
        run.note("Source_nplc_stress (set)", self.source_nplc);
        Ok(run)
    }
    pub fn process(&self, dataset: &mut ConsistentDataset) -> Result<VariantDetails, MeasurementError> {
        let time = shifted_time(dataset, "Timestamp", |real| real.first().copied());
        dataset.insert("Time", time)?;
        Ok(VariantDetails::Stress {
            set_points: StressSetPoints {
                vd: self.vd,
                vg: self.vg,
                vs: self.vs,
                duration: self.duration_s,
            },
        })
    }
}
/// Density columns only appear when the coefficient is defined.
pub fn columns(unit: &str, density_defined: bool) -> Vec<Column> {
    let mut columns = vec![
        Column::new("Time", "Time(s)"),
        Column::new("Vd_read", "Vd_read(V)"),
        Column::new("Id", "Id(A)"),
        Column::new("Vg_read", "Vg_read(V)"),
        Column::new("Ig", "Ig(A)"),
        Column::new("Vs_read", "Vs_read(V)"),
        Column::new("Is", "Is(A)"),
    ];
    if density_defined {
        columns.extend(density_columns(unit));
    }
    columns
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ErrorKind;
    fn with_timing(duration_s: f64, measure_interval_s: f64) -> StressParams {
        StressParams {
            duration_s,
            measure_interval_s,
            ..Default::default()
        }
    }
    #[test]
    fn expected_points_cover_partial_intervals() {
        assert_eq!(with_timing(60.0, 1.0).expected_points().unwrap(), 61);
        assert_eq!(with_timing(10.0, 3.0).expected_points().unwrap(), 5);
        assert_eq!(with_timing(0.0, 1.0).expected_points().unwrap(), 1);
        assert_eq!(with_timing(2.0, 5.0).expected_points().unwrap(), 2);
    }
    #[test]
    fn endless_sampling_is_a_validation_error() {
        let err = with_timing(1e20, 1e-3).prepare().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(with_timing(f64::MAX, f64::MIN_POSITIVE).prepare().is_err());
    }
    #[test]
    fn timing_validation() {
        let err = with_timing(-1.0, 1.0).prepare().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(with_timing(10.0, 0.0).prepare().is_err());
        let run = with_timing(0.0, 0.0).prepare().unwrap();
        assert_eq!(run.expected_total, 1);
        assert_eq!(run.script_params["stress_measure_interval_val"], "0");
        let params = StressParams {
            initial_settling_delay_s: -0.1,
            ..Default::default()
        };
        assert!(params.prepare().is_err());
    }
    #[test]
    fn time_starts_at_first_timestamp() {
        let mut data = ConsistentDataset::empty(4);
        data.insert("Timestamp", vec![None, Some(3.0), Some(2.5), Some(4.0)]).unwrap();
        StressParams::default().process(&mut data).unwrap();
        assert_eq!(data.get("Time").unwrap(), &[None, Some(0.0), Some(-0.5), Some(1.0)]);
    }
    #[test]
    fn density_columns_follow_coefficient() {
        assert_eq!(columns("A/mm", false).len(), 7);
        let cols = columns("A/mm", true);
        assert_eq!(cols.len(), 10);
        assert_eq!(cols[7].header, "Jd(A/mm)");
    }
}
