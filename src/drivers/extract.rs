//! Figures of merit for a forward gate sweep.
//!
//! Everything here works on the forward segment only. Metrics that cannot be
//! computed from the available samples come back as `None` rather than as an
//! error.
use log::debug;
use ndarray::Array1;
use serde::Serialize;
use crate::drivers::buffer::{from_array, to_array, Sample};
/// `|Id|` floor applied before taking the logarithm.
pub const LOG_CURRENT_FLOOR: f64 = 1e-14;
/// Slopes of `log10|Id|` below this are treated as flat.
pub const MIN_LOG_SLOPE: f64 = 1e-9;
/// Currents at or below this are noise and never qualify as Ioff.
pub const IOFF_NOISE_FLOOR: f64 = 1e-13;
/// Ioff must exceed this for the on/off ratio to be reported.
pub const RATIO_IOFF_FLOOR: f64 = 1e-14;
/// The off region ends this far below Vth.
pub const OFF_REGION_MARGIN_V: f64 = 0.5;
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub vth: Option<f64>,
    pub min_ss: Option<f64>,
    pub min_ss_index: Option<usize>,
    pub max_gm: Option<f64>,
    pub vg_at_max_gm: Option<f64>,
    pub ion: Option<f64>,
    pub ioff: Option<f64>,
    pub ion_ioff_ratio: Option<f64>,
    /// Mean dVg/dt in V/s, `0.0` when fewer than two timed points exist.
    pub avg_sweep_rate: f64,
    pub avg_drain_bias: Option<f64>,
}
/// Forward-segment inputs of one transfer extraction.
#[derive(Clone, Copy, Debug)]
pub struct TransferInput<'a> {
    pub vg: &'a [Sample],
    pub id: &'a [Sample],
    pub time: &'a [Sample],
    pub vd_read: &'a [Sample],
    pub nominal_vd: f64,
}
/// Metrics plus the forward-length gm and SS curves (empty when not computed).
#[derive(Clone, Debug, Default)]
pub struct TransferExtraction {
    pub metrics: DerivedMetrics,
    pub gm: Vec<Sample>,
    pub ss: Vec<Sample>,
}
/// Numerical derivative of `f` with respect to the sample coordinates `x`.
///
/// Interior points use the second-order difference for non-uniform spacing,
/// the two end points one-sided first-order differences. Fewer than two
/// points yield NaN.
pub fn gradient(f: &Array1<f64>, x: &Array1<f64>) -> Array1<f64> {
    let n = f.len();
    if n < 2 || x.len() != n {
        return Array1::from_elem(n, f64::NAN);
    }
    let mut out = Array1::zeros(n);
    out[0] = (f[1] - f[0]) / (x[1] - x[0]);
    out[n - 1] = (f[n - 1] - f[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        out[i] = (hs * hs * f[i + 1] + (hd * hd - hs * hs) * f[i] - hd * hd * f[i - 1])
            / (hs * hd * (hd + hs));
    }
    out
}
/// Index and value of the largest non-NaN element; the first one on ties.
pub fn nan_argmax(values: &Array1<f64>) -> Option<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}
pub fn nan_mean(values: &Array1<f64>) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}
/// Indices at which both arrays hold a real sample.
fn valid_indices(a: &Array1<f64>, b: &Array1<f64>) -> Vec<usize> {
    a.iter()
        .zip(b.iter())
        .enumerate()
        .filter(|(_, (x, y))| !x.is_nan() && !y.is_nan())
        .map(|(i, _)| i)
        .collect()
}
fn select(values: &Array1<f64>, indices: &[usize]) -> Array1<f64> {
    indices.iter().map(|&i| values[i]).collect()
}
fn scatter(subset: &Array1<f64>, indices: &[usize], len: usize) -> Array1<f64> {
    let mut full = Array1::from_elem(len, f64::NAN);
    for (value, &i) in subset.iter().zip(indices) {
        full[i] = *value;
    }
    full
}
/// Subthreshold swing in mV/decade for every valid point.
fn subthreshold_swing(id_valid: &Array1<f64>, vg_valid: &Array1<f64>) -> Array1<f64> {
    let log_id = id_valid.mapv(|i| i.abs().max(LOG_CURRENT_FLOOR).log10());
    gradient(&log_id, vg_valid).mapv(|slope| {
        if slope.abs() > MIN_LOG_SLOPE {
            1000.0 / slope
        } else {
            f64::NAN
        }
    })
}
/// Ion, Ioff and their ratio over the valid points of a forward sweep.
///
/// With a known `vth` Ioff is looked for below `vth - 0.5 V` first and falls
/// back to every point above the noise floor.
pub fn on_off_currents(vg_valid: &[f64], id_valid: &[f64], vth: Option<f64>) -> (Option<f64>, Option<f64>, Option<f64>) {
    let ion = id_valid
        .iter()
        .map(|i| i.abs())
        .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.max(v))));
    let min_abs = |region: &dyn Fn(f64) -> bool| {
        vg_valid
            .iter()
            .zip(id_valid)
            .filter(|(vg, id)| id.abs() > IOFF_NOISE_FLOOR && region(**vg))
            .map(|(_, id)| id.abs())
            .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.min(v))))
    };
    let unrestricted = min_abs(&|_: f64| true);
    let ioff = match vth {
        Some(vth) => min_abs(&|vg: f64| vg < vth - OFF_REGION_MARGIN_V).or(unrestricted),
        None => unrestricted,
    };
    let ratio = match (ion, ioff) {
        (Some(on), Some(off)) if off > RATIO_IOFF_FLOOR => Some(on / off),
        _ => None,
    };
    (ion, ioff, ratio)
}
/// Runs the full extraction over one forward segment.
pub fn extract_transfer(input: TransferInput<'_>) -> TransferExtraction {
    let mut out = TransferExtraction {
        metrics: DerivedMetrics {
            avg_drain_bias: (!input.nominal_vd.is_nan()).then_some(input.nominal_vd),
            ..DerivedMetrics::default()
        },
        ..TransferExtraction::default()
    };
    let vg = to_array(input.vg);
    let id = to_array(input.id);
    let n = vg.len();
    if n > 1 && id.len() == n {
        let valid = valid_indices(&vg, &id);
        let vg_valid = select(&vg, &valid);
        let id_valid = select(&id, &valid);
        debug!("transfer extraction: {} of {n} forward points valid", valid.len());
        if valid.len() > 1 {
            let gm = scatter(&gradient(&id_valid, &vg_valid), &valid, n);
            if let Some((idx, max_gm)) = nan_argmax(&gm) {
                out.metrics.max_gm = Some(max_gm);
                out.metrics.vg_at_max_gm = Some(vg[idx]);
                if max_gm > 0.0 && max_gm.is_finite() {
                    out.metrics.vth = Some(vg[idx] - id[idx] / max_gm);
                }
            }
            let ss_valid = subthreshold_swing(&id_valid, &vg_valid);
            let min_ss = ss_valid
                .iter()
                .copied()
                .filter(|&ss| ss > 0.0)
                .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.min(v))));
            if let Some(min_ss) = min_ss {
                out.metrics.min_ss = Some(min_ss);
                out.metrics.min_ss_index = ss_valid
                    .iter()
                    .position(|&ss| ss == min_ss)
                    .map(|pos| valid[pos]);
            }
            out.gm = from_array(&gm);
            out.ss = from_array(&scatter(&ss_valid, &valid, n));
        }
        if !valid.is_empty() {
            let (ion, ioff, ratio) = on_off_currents(
                vg_valid.as_slice().unwrap_or(&[]),
                id_valid.as_slice().unwrap_or(&[]),
                out.metrics.vth,
            );
            out.metrics.ion = ion;
            out.metrics.ioff = ioff;
            out.metrics.ion_ioff_ratio = ratio;
        }
    }
    out.metrics.avg_sweep_rate = average_sweep_rate(&vg, &to_array(input.time));
    let vd = to_array(input.vd_read);
    if let Some(mean) = nan_mean(&vd) {
        out.metrics.avg_drain_bias = Some(mean);
    }
    out
}
/// Mean dVg/dt over points where both the bias and the timestamp are real.
pub fn average_sweep_rate(vg: &Array1<f64>, time: &Array1<f64>) -> f64 {
    if vg.len() < 2 || time.len() != vg.len() {
        return 0.0;
    }
    let valid = valid_indices(time, vg);
    if valid.len() < 2 {
        return 0.0;
    }
    let rate = gradient(&select(vg, &valid), &select(time, &valid));
    nan_mean(&rate).unwrap_or(0.0)
}
