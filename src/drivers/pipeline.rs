//! One measurement run from parameters to CSV and plot package.
//!
//! Stages run strictly in order; the first failure aborts the run and is
//! reported with the stage it happened in. The instrument session lives only
//! across the acquisition stages and is dropped on every path.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use chrono::Local;
use log::{error, info, warn};
use serde::Serialize;
use crate::config::{RunConfig, Settings};
use crate::drivers::buffer::{consistent_length, normalize, ConsistentDataset, RawBufferSet};
use crate::drivers::density::{apply_current_densities, density_coefficient, derive_source_current};
use crate::drivers::extract::DerivedMetrics;
use crate::drivers::instrument::{query_buffer_count, read_buffers, Connector, Instrument};
use crate::drivers::script::{load_template, render, upload_and_run};
use crate::drivers::variants::{MeasurementKind, MeasurementParams, PreparedRun, VariantDetails};
use crate::drivers::{ErrorKind, MeasurementError};
use crate::recorder::{base_comments, run_timestamp, write_csv, OutputPaths};
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    ParamPrepare,
    ScriptLoad,
    Connect,
    ScriptUpload,
    BufferCountQuery,
    BufferRead,
    Reconcile,
    CommonDerive,
    VariantDerive,
    Persist,
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ParamPrepare => "parameter preparation",
            Stage::ScriptLoad => "script load",
            Stage::Connect => "instrument connection",
            Stage::ScriptUpload => "script upload",
            Stage::BufferCountQuery => "buffer count query",
            Stage::BufferRead => "buffer read",
            Stage::Reconcile => "buffer reconciliation",
            Stage::CommonDerive => "source current and density",
            Stage::VariantDerive => "variant processing",
            Stage::Persist => "csv persistence",
        };
        f.write_str(name)
    }
}
/// First failure of a run and where it happened.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub error: MeasurementError,
}
impl RunFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
    /// Stage name followed by the error source chain.
    pub fn trace(&self) -> Vec<String> {
        let mut trace = vec![format!("stage: {}", self.stage)];
        let mut source: Option<&dyn StdError> = Some(&self.error);
        while let Some(err) = source {
            trace.push(err.to_string());
            source = err.source();
        }
        trace
    }
}
fn at(stage: Stage) -> impl FnOnce(MeasurementError) -> RunFailure {
    move |error| RunFailure { stage, error }
}
/// Everything a renderer needs to draw the finished run.
#[derive(Clone, Debug, Serialize)]
pub struct PlotPackage {
    pub kind: MeasurementKind,
    pub dataset: Arc<ConsistentDataset>,
    pub details: VariantDetails,
    pub density_unit: &'static str,
    pub csv_path: PathBuf,
    pub plot_path: PathBuf,
}
impl PlotPackage {
    pub fn metrics(&self) -> Option<&DerivedMetrics> {
        self.details.metrics()
    }
}
/// Structured result handed back across the run boundary.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status")]
pub enum RunOutcome {
    #[serde(rename = "success_data_ready")]
    Success(PlotPackage),
    #[serde(rename = "error")]
    Error {
        kind: ErrorKind,
        message: String,
        trace: Vec<String>,
    },
}
impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success(_))
    }
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RunOutcome::Error { kind, .. } => Some(*kind),
            RunOutcome::Success(_) => None,
        }
    }
}
impl From<RunFailure> for RunOutcome {
    fn from(failure: RunFailure) -> Self {
        RunOutcome::Error {
            kind: failure.kind(),
            message: failure.to_string(),
            trace: failure.trace(),
        }
    }
}
/// Runs one measurement. Never panics on instrument or file errors; they come
/// back as `RunOutcome::Error`.
pub fn run_measurement(connector: &dyn Connector, settings: &Settings, config: &RunConfig) -> RunOutcome {
    let timestamp = run_timestamp(Local::now());
    match execute(connector, settings, config, &timestamp) {
        Ok(package) => {
            info!("✅ {} finished, data in {}", config.kind(), package.csv_path.display());
            RunOutcome::Success(package)
        }
        Err(failure) => {
            error!("❌ {} aborted: {failure}", config.kind());
            failure.into()
        }
    }
}
fn execute(
    connector: &dyn Connector,
    settings: &Settings,
    config: &RunConfig,
    timestamp: &str,
) -> Result<PlotPackage, RunFailure> {
    let params = &config.measurement;
    let kind = params.kind();
    info!("[{kind}] {}", Stage::ParamPrepare);
    let prepared = params.prepare().map_err(at(Stage::ParamPrepare))?;
    info!("[{kind}] expecting {} readings", prepared.expected_total);
    let script_path = config.script_path(settings);
    info!("[{kind}] {} from {}", Stage::ScriptLoad, script_path.display());
    let template = load_template(&script_path).map_err(at(Stage::ScriptLoad))?;
    let script = render(&template, &prepared.script_params);
    let raw = {
        info!("[{kind}] {} to {}", Stage::Connect, config.instrument.address);
        let mut inst = connector
            .connect(&config.instrument)
            .map_err(at(Stage::Connect))?;
        acquire(inst.as_mut(), params, &prepared, &script)?
    };
    info!("[{kind}] {}", Stage::Reconcile);
    let len = consistent_length(&raw, params.priority_keys(), raw.retrieved_counts());
    if len == 0 {
        warn!("[{kind}] no readings retrieved, writing an empty dataset");
    }
    let mut dataset = normalize(&raw, len);
    info!("[{kind}] {}", Stage::CommonDerive);
    derive_source_current(&mut dataset).map_err(at(Stage::CommonDerive))?;
    let device = &config.device;
    let density_unit =
        apply_current_densities(&mut dataset, device.device_type, device.channel_width_um, device.area_um2);
    let density_defined =
        density_coefficient(device.device_type, device.channel_width_um, device.area_um2).0.is_defined();
    info!("[{kind}] {}", Stage::VariantDerive);
    let details = params
        .process(&mut dataset, &prepared)
        .map_err(at(Stage::VariantDerive))?;
    info!("[{kind}] {}", Stage::Persist);
    let paths = OutputPaths::generate(&config.output.dir, &config.output.file_name, kind, timestamp);
    let mut comments = base_comments(kind, timestamp, device, &paths, density_unit);
    comments.extend(prepared.notes.iter().cloned());
    comments.extend(details.notes());
    let columns = params.columns(&dataset, density_unit, density_defined);
    write_csv(&paths.csv, &comments, &columns, &dataset).map_err(at(Stage::Persist))?;
    Ok(PlotPackage {
        kind,
        dataset: Arc::new(dataset),
        details,
        density_unit,
        csv_path: paths.csv,
        plot_path: paths.plot,
    })
}
/// Upload, count query and buffer read against an open session.
fn acquire(
    inst: &mut dyn Instrument,
    params: &MeasurementParams,
    prepared: &PreparedRun,
    script: &str,
) -> Result<RawBufferSet, RunFailure> {
    upload_and_run(inst, script).map_err(at(Stage::ScriptUpload))?;
    let count = query_buffer_count(inst, params.primary_buffer(), prepared.expected_total)
        .map_err(at(Stage::BufferCountQuery))?;
    info!("{} readings reported in {}", count, params.primary_buffer());
    read_buffers(inst, params.buffer_specs(), count).map_err(at(Stage::BufferRead))
}
