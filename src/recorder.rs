// src/recorder.rs
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use log::info;
use crate::config::DeviceGeometry;
use crate::drivers::buffer::ConsistentDataset;
use crate::drivers::variants::{Column, MeasurementKind};
use crate::drivers::MeasurementError;
/// Mantissa digits after the point for CSV values (9 significant digits).
pub const CSV_DIGITS: usize = 8;
/// Scientific notation with a signed, at least two-digit exponent
/// (`1.0000e-03`). Missing values print as `nan`.
pub fn format_sci(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let raw = format!("{value:.digits$e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}
/// File name base: trimmed, inner spaces replaced by underscores.
pub fn clean_base(base: &str) -> String {
    base.trim().replace(' ', "_")
}
/// Where one run writes its CSV and where its plot belongs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub base_name: String,
    pub csv: PathBuf,
    pub plot: PathBuf,
}
impl OutputPaths {
    pub fn generate(dir: &Path, base: &str, kind: MeasurementKind, timestamp: &str) -> Self {
        let base = clean_base(base);
        let base_name = if base.is_empty() {
            format!("{}_{timestamp}", kind.short_name())
        } else {
            format!("{base}_{}_{timestamp}", kind.short_name())
        };
        Self {
            dir: dir.to_path_buf(),
            csv: dir.join(format!("{base_name}.csv")),
            plot: dir.join(format!("{base_name}{}", kind.plot_suffix())),
            base_name,
        }
    }
}
pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
/// Comments every CSV starts with.
pub fn base_comments(
    kind: MeasurementKind,
    timestamp: &str,
    device: &DeviceGeometry,
    paths: &OutputPaths,
    density_unit: &str,
) -> Vec<(String, String)> {
    vec![
        ("Measurement Type".into(), kind.display_name().into()),
        ("Timestamp".into(), timestamp.into()),
        ("Device Type".into(), device.device_type.as_str().into()),
        ("Channel Width (um)".into(), device.channel_width_um.to_string()),
        ("Area (um^2)".into(), device.area_um2.to_string()),
        ("Output File (CSV)".into(), file_name(&paths.csv)),
        ("Output File (PNG)".into(), file_name(&paths.plot)),
        ("JD Unit Plot".into(), density_unit.into()),
    ]
}
fn persist_error(path: &Path, source: io::Error) -> MeasurementError {
    MeasurementError::Persist {
        path: path.to_path_buf(),
        source,
    }
}
/// Writes `# key: value` comments, the header and one row per sample index.
///
/// Creates the parent directory when needed. An empty dataset still yields
/// the comments and the header.
pub fn write_csv(
    path: &Path,
    comments: &[(String, String)],
    columns: &[Column],
    dataset: &ConsistentDataset,
) -> Result<(), MeasurementError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| persist_error(dir, e))?;
    }
    let file = File::create(path).map_err(|e| persist_error(path, e))?;
    let mut out = BufWriter::new(file);
    for (key, value) in comments {
        writeln!(out, "# {key}: {value}").map_err(|e| persist_error(path, e))?;
    }
    let channels: Vec<Vec<Option<f64>>> = columns
        .iter()
        .map(|column| dataset.channel_or_missing(column.key))
        .collect();
    {
        let mut writer = csv::Writer::from_writer(&mut out);
        writer
            .write_record(columns.iter().map(|c| c.header.as_str()))
            .map_err(|e| persist_error(path, e.into()))?;
        for row in 0..dataset.len() {
            let record = channels
                .iter()
                .map(|values| format_sci(values[row].unwrap_or(f64::NAN), CSV_DIGITS));
            writer
                .write_record(record)
                .map_err(|e| persist_error(path, e.into()))?;
        }
        writer.flush().map_err(|e| persist_error(path, e))?;
    }
    out.flush().map_err(|e| persist_error(path, e))?;
    info!("💾 saved {} rows to {}", dataset.len(), path.display());
    Ok(())
}
