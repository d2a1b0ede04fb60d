// src/main.rs
mod config;
mod drivers;
mod engine;
mod recorder;
mod simulation;
mod types;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use config::{RunConfig, Settings};
use drivers::pipeline::RunOutcome;
use drivers::variants::MeasurementKind;
use types::{ConnectionMode, EngineCommand, EngineMessage};
// 前端轮询后台消息的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);
#[derive(Parser, Debug)]
#[command(name = "devchar", version, about = "Source-measure sweep automation and device parameter extraction")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}
#[derive(Args, Debug)]
struct EngineArgs {
    /// Answer with a synthetic device instead of opening the instrument
    #[arg(long)]
    simulate: bool,
    /// Directory holding the measurement scripts
    #[arg(long, value_name = "DIR")]
    script_dir: Option<PathBuf>,
}
#[derive(Subcommand, Debug)]
enum Command {
    /// Run one measurement described by a JSON file
    Run {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Stress run followed by a gate transfer on the same device
    StressSequence {
        #[arg(long, value_name = "FILE")]
        stress: PathBuf,
        #[arg(long, value_name = "FILE")]
        transfer: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Print the default configuration of a measurement kind
    Defaults {
        #[arg(value_enum)]
        kind: MeasurementKind,
    },
}
fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();
    let (command, engine) = match cli.command {
        Command::Defaults { kind } => {
            let text = serde_json::to_string_pretty(&RunConfig::defaults(kind))?;
            println!("{text}");
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run { config, engine } => (EngineCommand::Run(Box::new(RunConfig::load(&config)?)), engine),
        Command::StressSequence { stress, transfer, engine } => {
            let stress = RunConfig::load(&stress)?;
            let transfer = RunConfig::load(&transfer)?;
            if stress.kind() != MeasurementKind::Stress || transfer.kind() != MeasurementKind::GateTransfer {
                anyhow::bail!("stress-sequence needs a Stress config and a GateTransfer config");
            }
            (
                EngineCommand::StressSequence {
                    stress: Box::new(stress),
                    transfer: Box::new(transfer),
                },
                engine,
            )
        }
    };
    let settings = Settings::resolve(engine.script_dir);
    let mode = if engine.simulate {
        ConnectionMode::Simulation
    } else {
        ConnectionMode::Hardware
    };
    let sequence = matches!(command, EngineCommand::StressSequence { .. });
    let (tx, rx) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let handle = engine::spawn_thread(tx, rx_cmd, mode, settings);
    tx_cmd.send(command).context("measurement engine is not running")?;
    let mut failures = 0;
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(EngineMessage::Log(line)) => info!("{line}"),
            Ok(EngineMessage::Started(kind)) => info!("▶ {kind} started"),
            Ok(EngineMessage::Finished(outcome)) => {
                match outcome.as_ref() {
                    RunOutcome::Success(package) => {
                        if let Some(m) = package.metrics() {
                            info!("Vth {:?} V, SS_min {:?} mV/dec, Ion/Ioff {:?}", m.vth, m.min_ss, m.ion_ioff_ratio);
                        }
                    }
                    RunOutcome::Error { .. } => failures += 1,
                }
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                if !sequence {
                    break;
                }
            }
            Ok(EngineMessage::SequenceDone(count)) => {
                info!("sequence finished after {count} measurement(s)");
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("measurement engine stopped unexpectedly");
                failures += 1;
                break;
            }
        }
    }
    tx_cmd.send(EngineCommand::Shutdown).ok();
    if handle.join().is_err() {
        warn!("measurement engine panicked");
    }
    Ok(if failures == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
