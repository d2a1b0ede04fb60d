// src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use crate::drivers::density::DeviceType;
use crate::drivers::instrument::InstrumentSettings;
use crate::drivers::variants::{MeasurementKind, MeasurementParams};
pub const SCRIPT_DIR_ENV: &str = "DEVCHAR_SCRIPT_DIR";
pub const SCRIPT_DIR_NAME: &str = "tsp_scripts";
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceGeometry {
    pub device_type: DeviceType,
    pub channel_width_um: f64,
    pub area_um2: f64,
}
impl Default for DeviceGeometry {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Lateral,
            channel_width_um: 100.0,
            area_um2: 10_000.0,
        }
    }
}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    /// User supplied file name base, may be empty.
    pub file_name: String,
}
impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("measurements"),
            file_name: String::new(),
        }
    }
}
/// Everything one measurement run needs, read from a JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub measurement: MeasurementParams,
    #[serde(default)]
    pub device: DeviceGeometry,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub instrument: InstrumentSettings,
    /// Overrides the script looked up in the script directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
}
impl RunConfig {
    pub fn defaults(kind: MeasurementKind) -> Self {
        Self {
            measurement: MeasurementParams::defaults(kind),
            device: DeviceGeometry::default(),
            output: OutputSettings::default(),
            instrument: InstrumentSettings {
                timeout_ms: kind.default_timeout_ms(),
                ..InstrumentSettings::default()
            },
            script_path: None,
        }
    }
    pub fn kind(&self) -> MeasurementKind {
        self.measurement.kind()
    }
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid run configuration")
    }
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading run configuration {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }
    /// Script to upload: the explicit path, else the kind's default file in `script_dir`.
    pub fn script_path(&self, settings: &Settings) -> PathBuf {
        self.script_path
            .clone()
            .unwrap_or_else(|| settings.script_dir.join(self.kind().default_script()))
    }
}
/// Process-wide settings resolved once at start-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub script_dir: PathBuf,
}
impl Settings {
    /// CLI flag, then `DEVCHAR_SCRIPT_DIR`, then `tsp_scripts` next to the
    /// executable, then `tsp_scripts` in the working directory.
    pub fn resolve(cli_script_dir: Option<PathBuf>) -> Self {
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve_from(cli_script_dir, env::var_os(SCRIPT_DIR_ENV).map(PathBuf::from), exe_dir, cwd)
    }
    fn resolve_from(
        cli: Option<PathBuf>,
        env_dir: Option<PathBuf>,
        exe_dir: Option<PathBuf>,
        cwd: PathBuf,
    ) -> Self {
        let script_dir = cli
            .or(env_dir)
            .or_else(|| {
                exe_dir
                    .map(|dir| dir.join(SCRIPT_DIR_NAME))
                    .filter(|dir| dir.is_dir())
            })
            .unwrap_or_else(|| cwd.join(SCRIPT_DIR_NAME));
        debug!("script directory: {}", script_dir.display());
        Self { script_dir }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::variants::StressParams;
    #[test]
    fn minimal_json_fills_defaults() {
        let cfg = RunConfig::from_json(r#"{"measurement": {"kind": "Stress", "duration_s": 5.0}}"#).unwrap();
        match &cfg.measurement {
            MeasurementParams::Stress(p) => {
                assert_eq!(p.duration_s, 5.0);
                assert_eq!(p.measure_interval_s, StressParams::default().measure_interval_s);
            }
            other => panic!("unexpected params {other:?}"),
        }
        assert_eq!(cfg.output.dir, PathBuf::from("measurements"));
        assert_eq!(cfg.device.device_type, DeviceType::Lateral);
        assert!(cfg.script_path.is_none());
    }
    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = RunConfig::defaults(MeasurementKind::Diode);
        assert_eq!(cfg.instrument.timeout_ms, 30_000);
        let text = serde_json::to_string_pretty(&cfg).unwrap();
        assert_eq!(RunConfig::from_json(&text).unwrap(), cfg);
    }
    #[test]
    fn unknown_kind_is_rejected() {
        assert!(RunConfig::from_json(r#"{"measurement": {"kind": "Hall"}}"#).is_err());
    }
    #[test]
    fn script_dir_resolution_order() {
        let cwd = PathBuf::from("/work");
        let s = Settings::resolve_from(Some("/cli".into()), Some("/env".into()), None, cwd.clone());
        assert_eq!(s.script_dir, PathBuf::from("/cli"));
        let s = Settings::resolve_from(None, Some("/env".into()), None, cwd.clone());
        assert_eq!(s.script_dir, PathBuf::from("/env"));
        let exe = tempfile::tempdir().unwrap();
        fs::create_dir(exe.path().join(SCRIPT_DIR_NAME)).unwrap();
        let s = Settings::resolve_from(None, None, Some(exe.path().to_path_buf()), cwd.clone());
        assert_eq!(s.script_dir, exe.path().join(SCRIPT_DIR_NAME));
        let s = Settings::resolve_from(None, None, Some("/nonexistent".into()), cwd);
        assert_eq!(s.script_dir, PathBuf::from("/work/tsp_scripts"));
    }
    #[test]
    fn explicit_script_path_wins() {
        let settings = Settings { script_dir: "/scripts".into() };
        let mut cfg = RunConfig::defaults(MeasurementKind::GateTransfer);
        assert_eq!(cfg.script_path(&settings), PathBuf::from("/scripts/GateSweep.tsp"));
        cfg.script_path = Some("/tmp/custom.tsp".into());
        assert_eq!(cfg.script_path(&settings), PathBuf::from("/tmp/custom.tsp"));
    }
}
