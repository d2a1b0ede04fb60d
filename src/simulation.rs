// src/simulation.rs
// 模拟仪器：不接硬件也能把整条流程跑通
use std::collections::HashMap;
use log::{debug, info};
use rand::Rng;
use crate::drivers::instrument::{paths, Connector, Instrument, InstrumentSettings};
use crate::drivers::MeasurementError;

/// Square-law transistor plus an exponential diode, seen through noisy readings.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticDevice {
    pub vth: f64,
    pub k: f64,
    pub gate_leakage: f64,
    pub diode_is: f64,
    pub noise: f64,
}
impl Default for SyntheticDevice {
    fn default() -> Self {
        Self {
            vth: 0.5,
            k: 1e-3,
            gate_leakage: 1e-12,
            diode_is: 1e-12,
            noise: 0.01,
        }
    }
}
impl SyntheticDevice {
    fn drain_current(&self, vg: f64, vd: f64) -> f64 {
        let overdrive = vg - self.vth;
        if overdrive <= 0.0 {
            return 1e-12 * (overdrive * 10.0).exp() * vd.signum();
        }
        if vd < overdrive {
            self.k * (overdrive - vd / 2.0) * vd
        } else {
            self.k / 2.0 * overdrive * overdrive
        }
    }
    fn diode_current(&self, va: f64) -> f64 {
        self.diode_is * ((va / 0.05).min(200.0).exp() - 1.0)
    }
}
/// Points the uploaded script would produce, read back from its parameters.
#[derive(Clone, Debug, Default)]
struct Programme {
    buffers: HashMap<&'static str, Vec<f64>>,
}
fn param(script: &str, key: &str) -> Option<f64> {
    script.lines().find_map(|line| {
        let (name, value) = line.split_once('=')?;
        let name = name.trim();
        let name = name.strip_prefix("local ").unwrap_or(name).trim();
        (name == key).then(|| value.trim().parse().ok()).flatten()
    })
}
fn sweep(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step == 0.0 || start == stop {
        return vec![start];
    }
    let n = ((stop - start).abs() / step.abs()).round() as usize + 1;
    let step = (stop - start).signum() * step.abs();
    (0..n).map(|i| start + step * i as f64).collect()
}
impl Programme {
    /// Builds synthetic buffers from the `key = value` lines of the uploaded script.
    fn from_script(script: &str, device: &SyntheticDevice, rng: &mut impl Rng) -> Self {
        let mut noisy = |v: f64| v * (1.0 + device.noise * rng.gen_range(-1.0..1.0));
        let mut buffers: HashMap<&'static str, Vec<f64>> = HashMap::new();
        if let (Some(start), Some(stop), Some(step)) = (param(script, "Vanode_start"), param(script, "Vanode_stop"), param(script, "Vanode_step")) {
            let mut va = sweep(start, stop, step);
            if param(script, "enable_backward") == Some(1.0) {
                let back: Vec<f64> = va.iter().rev().copied().collect();
                va.extend(back);
            }
            let ia: Vec<f64> = va.iter().map(|&v| noisy(device.diode_current(v))).collect();
            buffers.insert(paths::ANODE_TIMESTAMPS, (0..va.len()).map(|i| 100.0 + i as f64 * 0.05).collect());
            buffers.insert(paths::ANODE_VOLTAGE, va.clone());
            buffers.insert(paths::CATHODE_CURRENT, ia.iter().map(|i| -i).collect());
            buffers.insert(paths::ANODE_VOLTAGE_SET, va);
            buffers.insert(paths::ANODE_CURRENT, ia);
            return Self { buffers };
        }
        let (vg, vd): (Vec<f64>, Vec<f64>) = if let Some(duration) = param(script, "stress_duration_val") {
            let interval = param(script, "stress_measure_interval_val").unwrap_or(1.0).max(f64::EPSILON);
            let n = (duration / interval).floor() as usize + 1;
            let vg = param(script, "VG_stress_val").unwrap_or(0.0);
            let vd = param(script, "VD_stress_val").unwrap_or(0.0);
            (vec![vg; n], vec![vd; n])
        } else if let (Some(start), Some(stop), Some(step)) = (param(script, "Vd_start"), param(script, "Vd_stop"), param(script, "Vd_step")) {
            let vd_axis = sweep(start, stop, step);
            let levels = match (param(script, "Vg_start"), param(script, "Vg_stop"), param(script, "Vg_step")) {
                (Some(a), Some(b), Some(segments)) if segments > 0.0 => {
                    let n = segments as usize + 1;
                    (0..n).map(|i| a + (b - a) * i as f64 / segments).collect()
                }
                (Some(a), _, _) => vec![a],
                _ => vec![param(script, "Vg").unwrap_or(0.0)],
            };
            levels
                .iter()
                .flat_map(|&g| vd_axis.iter().map(move |&d| (g, d)))
                .unzip()
        } else {
            let start = param(script, "Vg_start").unwrap_or(-1.0);
            let stop = param(script, "Vg_stop").unwrap_or(2.0);
            let mut vg = sweep(start, stop, param(script, "step").unwrap_or(0.1));
            if param(script, "enable_backward") == Some(1.0) {
                let back: Vec<f64> = vg.iter().rev().copied().collect();
                vg.extend(back);
            }
            let vd = param(script, "Vd").unwrap_or(1.0);
            let n = vg.len();
            (vg, vec![vd; n])
        };
        let id: Vec<f64> = vg
            .iter()
            .zip(&vd)
            .map(|(&g, &d)| noisy(device.drain_current(g, d)))
            .collect();
        let ig: Vec<f64> = vg.iter().map(|&g| noisy(device.gate_leakage * g)).collect();
        let time: Vec<f64> = (0..vg.len()).map(|i| 10.0 + i as f64 * 0.02).collect();
        buffers.insert(paths::DRAIN_TIMESTAMPS, time.clone());
        buffers.insert(paths::GATE_TIMESTAMPS, time);
        buffers.insert(paths::GATE_VOLTAGE_SOURCE, vg.clone());
        buffers.insert(paths::GATE_VOLTAGE, vg);
        buffers.insert(paths::DRAIN_VOLTAGE, vd);
        buffers.insert(paths::SOURCE_CURRENT, id.iter().zip(&ig).map(|(d, g)| -(d + g)).collect());
        buffers.insert(paths::SOURCE_VOLTAGE, vec![0.0; id.len()]);
        buffers.insert(paths::DRAIN_CURRENT, id);
        buffers.insert(paths::GATE_CURRENT, ig);
        Self { buffers }
    }
    fn count(&self, buffer: &str) -> Option<usize> {
        self.buffers
            .iter()
            .find(|(path, _)| path.starts_with(buffer))
            .map(|(_, values)| values.len())
    }
}
/// Answers the script, count and `printbuffer` commands of a real session.
pub struct SimulatedInstrument {
    device: SyntheticDevice,
    in_script: bool,
    script: String,
    programme: Programme,
}
impl SimulatedInstrument {
    pub fn new(device: SyntheticDevice) -> Self {
        Self {
            device,
            in_script: false,
            script: String::new(),
            programme: Programme::default(),
        }
    }
}
impl Instrument for SimulatedInstrument {
    fn write(&mut self, command: &str) -> Result<(), MeasurementError> {
        match command {
            "loadscript" => {
                self.in_script = true;
                self.script.clear();
            }
            "endscript" => self.in_script = false,
            "script.run()" => {
                self.programme = Programme::from_script(&self.script, &self.device, &mut rand::thread_rng());
                debug!("simulated script produced {} buffers", self.programme.buffers.len());
            }
            body if self.in_script => {
                self.script.push_str(body);
                self.script.push('\n');
            }
            _ => {}
        }
        Ok(())
    }
    fn query(&mut self, command: &str) -> Result<String, MeasurementError> {
        if let Some(buffer) = command.strip_prefix("print(").and_then(|c| c.strip_suffix(".n)")) {
            return Ok(self
                .programme
                .count(buffer)
                .map(|n| n.to_string())
                .unwrap_or_else(|| "nil".to_string()));
        }
        if let Some(args) = command.strip_prefix("printbuffer(").and_then(|c| c.strip_suffix(')')) {
            let mut parts = args.splitn(3, ',').map(str::trim);
            let count: usize = parts.nth(1).and_then(|n| n.parse().ok()).unwrap_or(0);
            let path = parts.next().unwrap_or("");
            let values = self.programme.buffers.get(path).map(Vec::as_slice).unwrap_or(&[]);
            let reply: Vec<String> = values.iter().take(count).map(|v| format!("{v:e}")).collect();
            return Ok(reply.join(", "));
        }
        Ok(String::new())
    }
}
/// Connector that always succeeds with a fresh simulated instrument.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulationConnector {
    pub device: SyntheticDevice,
}
impl Connector for SimulationConnector {
    fn connect(&self, settings: &InstrumentSettings) -> Result<Box<dyn Instrument>, MeasurementError> {
        info!("🧪 simulated instrument in place of {}", settings.address);
        Ok(Box::new(SimulatedInstrument::new(self.device)))
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::instrument::{buffer_query_command, parse_buffer_response, query_buffer_count};
    use crate::drivers::script::upload_and_run;
    fn quiet() -> SyntheticDevice {
        SyntheticDevice {
            noise: 0.0,
            ..Default::default()
        }
    }
    #[test]
    fn gate_sweep_script_fills_buffers() {
        let mut inst = SimulatedInstrument::new(quiet());
        upload_and_run(&mut inst, "Vd = 1\nVg_start = 0\nVg_stop = 1\nstep = 0.5\nenable_backward = 1").unwrap();
        let n = query_buffer_count(&mut inst, paths::GATE_VOLTAGE_BUFFER, 99).unwrap();
        assert_eq!(n, 6);
        let raw = inst.query(&buffer_query_command(paths::GATE_VOLTAGE, n)).unwrap();
        let vg = parse_buffer_response(paths::GATE_VOLTAGE, &raw).unwrap();
        assert_eq!(vg, vec![0.0, 0.5, 1.0, 1.0, 0.5, 0.0]);
        let raw = inst.query(&buffer_query_command(paths::DRAIN_CURRENT, n)).unwrap();
        let id = parse_buffer_response(paths::DRAIN_CURRENT, &raw).unwrap();
        assert!(id[2] > id[1]);
    }
    #[test]
    fn unknown_buffers_report_nil_and_empty() {
        let mut inst = SimulatedInstrument::new(quiet());
        assert_eq!(inst.query("print(smua.nvbuffer1.n)").unwrap(), "nil");
        assert_eq!(inst.query("printbuffer(1, 3, smua.nvbuffer1.readings)").unwrap(), "");
    }
    #[test]
    fn stress_script_samples_every_interval() {
        let mut inst = SimulatedInstrument::new(quiet());
        upload_and_run(&mut inst, "VD_stress_val = 5\nVG_stress_val = 2\nstress_duration_val = 10\nstress_measure_interval_val = 2").unwrap();
        assert_eq!(inst.query("print(smua.nvbuffer1.timestamps.n)").unwrap(), "6");
    }
}
