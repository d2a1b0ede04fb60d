// src/engine.rs
use crate::config::{RunConfig, Settings};
use crate::drivers::instrument::{Connector, HardwareConnector};
use crate::drivers::pipeline::{run_measurement, RunOutcome};
use crate::recorder::{clean_base, run_timestamp};
use crate::simulation::SimulationConnector;
use crate::types::*;
use chrono::Local;
use log::info;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

/// File name base of the gate transfer that follows a stress run.
pub fn post_stress_base(stress_base: &str, timestamp: &str) -> String {
    let base = clean_base(stress_base);
    if base.is_empty() {
        format!("post_stress_GT_{timestamp}")
    } else {
        format!("{base}_post_stress_GT")
    }
}

/// Stress first, then a gate transfer named after it. Stops after a failed
/// stress run. Returns the number of measurements that were started.
pub fn run_stress_sequence(
    connector: &dyn Connector,
    settings: &Settings,
    stress: &RunConfig,
    transfer: &RunConfig,
    mut report: impl FnMut(EngineMessage),
) -> usize {
    report(EngineMessage::Started(stress.kind()));
    let outcome = run_measurement(connector, settings, stress);
    let stress_ok = outcome.is_success();
    report(EngineMessage::Finished(Box::new(outcome)));
    if !stress_ok {
        report(EngineMessage::Log("⚠️ Stress failed, post-stress transfer skipped".to_owned()));
        return 1;
    }
    let mut transfer = transfer.clone();
    transfer.output.file_name = post_stress_base(&stress.output.file_name, &run_timestamp(Local::now()));
    report(EngineMessage::Log(format!("▶ Post-stress transfer as {}", transfer.output.file_name)));
    report(EngineMessage::Started(transfer.kind()));
    let outcome = run_measurement(connector, settings, &transfer);
    report(EngineMessage::Finished(Box::new(outcome)));
    2
}

pub fn spawn_thread(
    tx: Sender<EngineMessage>,
    rx_cmd: Receiver<EngineCommand>,
    mode: ConnectionMode,
    settings: Settings,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let connector: Box<dyn Connector> = match mode {
            ConnectionMode::Simulation => Box::new(SimulationConnector::default()),
            ConnectionMode::Hardware => Box::new(HardwareConnector),
        };
        tx.send(EngineMessage::Log(format!("⚙️ Measurement engine ready ({mode:?})"))).ok();
        // 一次只跑一个测量，仪器是独占资源
        while let Ok(cmd) = rx_cmd.recv() {
            match cmd {
                EngineCommand::Run(config) => {
                    tx.send(EngineMessage::Started(config.kind())).ok();
                    let outcome = run_measurement(connector.as_ref(), &settings, &config);
                    tx.send(EngineMessage::Finished(Box::new(outcome))).ok();
                }
                EngineCommand::StressSequence { stress, transfer } => {
                    let done = run_stress_sequence(connector.as_ref(), &settings, &stress, &transfer, |msg| {
                        tx.send(msg).ok();
                    });
                    tx.send(EngineMessage::SequenceDone(done)).ok();
                }
                EngineCommand::Shutdown => break,
            }
        }
        info!("measurement engine stopped");
    })
}

/// Last outcome carried by a batch of engine messages.
pub fn last_outcome(messages: &[EngineMessage]) -> Option<&RunOutcome> {
    messages.iter().rev().find_map(|msg| match msg {
        EngineMessage::Finished(outcome) => Some(outcome.as_ref()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::variants::{GateTransferParams, MeasurementKind, MeasurementParams, StressParams};
    use crate::drivers::ErrorKind;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::Duration;

    fn configs(dir: &Path, stress: StressParams) -> (RunConfig, RunConfig) {
        let mut s = RunConfig::defaults(MeasurementKind::Stress);
        s.measurement = MeasurementParams::Stress(stress);
        s.output.dir = dir.join("out");
        s.output.file_name = "chip 3".into();
        let mut t = RunConfig::defaults(MeasurementKind::GateTransfer);
        t.measurement = MeasurementParams::GateTransfer(GateTransferParams {
            vg_start: 0.0,
            vg_stop: 1.0,
            vg_step: 0.25,
            ..Default::default()
        });
        t.output.dir = dir.join("out");
        (s, t)
    }

    fn scripts(dir: &Path) -> Settings {
        fs::write(dir.join("Stress.tsp"), "VD_stress_val = {{VD_stress_val}}\nVG_stress_val = {{VG_stress_val}}\nstress_duration_val = {{stress_duration_val}}\nstress_measure_interval_val = {{stress_measure_interval_val}}").unwrap();
        fs::write(dir.join("GateSweep.tsp"), "Vd = {{Vd}}\nVg_start = {{Vg_start}}\nVg_stop = {{Vg_stop}}\nstep = {{step}}\nenable_backward = {{enable_backward}}").unwrap();
        Settings { script_dir: dir.to_path_buf() }
    }

    #[test]
    fn post_stress_name_follows_stress_base() {
        assert_eq!(post_stress_base(" chip 3 ", "20240101_000000"), "chip_3_post_stress_GT");
        assert_eq!(post_stress_base("", "20240101_000000"), "post_stress_GT_20240101_000000");
    }

    #[test]
    fn sequence_runs_transfer_after_successful_stress() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripts(dir.path());
        let stress = StressParams { duration_s: 4.0, measure_interval_s: 1.0, ..Default::default() };
        let (s, t) = configs(dir.path(), stress);
        let mut messages = Vec::new();
        let done = run_stress_sequence(&SimulationConnector::default(), &settings, &s, &t, |m| messages.push(m));
        assert_eq!(done, 2);
        let outcomes: Vec<&RunOutcome> = messages
            .iter()
            .filter_map(|m| match m {
                EngineMessage::Finished(o) => Some(o.as_ref()),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.is_success()));
        match last_outcome(&messages) {
            Some(RunOutcome::Success(package)) => {
                let name = package.csv_path.file_name().unwrap().to_string_lossy().into_owned();
                assert!(name.starts_with("chip_3_post_stress_GT_GateTransfer_"), "{name}");
                assert_eq!(package.dataset.len(), 10);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn sequence_stops_when_stress_fails() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripts(dir.path());
        let stress = StressParams { duration_s: -1.0, ..Default::default() };
        let (s, t) = configs(dir.path(), stress);
        let mut messages = Vec::new();
        let done = run_stress_sequence(&SimulationConnector::default(), &settings, &s, &t, |m| messages.push(m));
        assert_eq!(done, 1);
        assert_eq!(last_outcome(&messages).and_then(RunOutcome::error_kind), Some(ErrorKind::ValidationError));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn worker_thread_answers_run_commands() {
        let dir = tempfile::tempdir().unwrap();
        let settings = scripts(dir.path());
        let (_, t) = configs(dir.path(), StressParams::default());
        let (tx, rx) = mpsc::channel();
        let (tx_cmd, rx_cmd) = mpsc::channel();
        let handle = spawn_thread(tx, rx_cmd, ConnectionMode::Simulation, settings);
        tx_cmd.send(EngineCommand::Run(Box::new(t))).unwrap();
        let mut messages = Vec::new();
        while last_outcome(&messages).is_none() {
            messages.push(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        }
        assert!(last_outcome(&messages).unwrap().is_success());
        tx_cmd.send(EngineCommand::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
