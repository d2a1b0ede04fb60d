use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::drivers::buffer::RawBufferSet;
use crate::drivers::MeasurementError;
/// Instrument-side buffer paths used by the sweep scripts.
pub mod paths {
    pub const DRAIN_CURRENT_BUFFER: &str = "smua.nvbuffer1";
    pub const DRAIN_VOLTAGE_BUFFER: &str = "smua.nvbuffer2";
    pub const GATE_CURRENT_BUFFER: &str = "node[2].smua.nvbuffer1";
    pub const GATE_VOLTAGE_BUFFER: &str = "node[2].smua.nvbuffer2";
    pub const DRAIN_CURRENT: &str = "smua.nvbuffer1.readings";
    pub const DRAIN_VOLTAGE: &str = "smua.nvbuffer2.readings";
    pub const DRAIN_TIMESTAMPS: &str = "smua.nvbuffer1.timestamps";
    pub const GATE_TIMESTAMPS: &str = "node[2].smua.nvbuffer1.timestamps";
    pub const GATE_CURRENT: &str = "node[2].smua.nvbuffer1.readings";
    pub const GATE_VOLTAGE: &str = "node[2].smua.nvbuffer2.readings";
    pub const GATE_VOLTAGE_SOURCE: &str = "node[2].smua.nvbuffer2.sourcevalues";
    pub const SOURCE_CURRENT: &str = "node[2].smub.nvbuffer1.readings";
    pub const SOURCE_VOLTAGE: &str = "node[2].smub.nvbuffer2.readings";
    pub const ANODE_TIMESTAMPS: &str = "smua.nvbuffer1.timestamps";
    pub const ANODE_VOLTAGE_SET: &str = "smua.nvbuffer2.sourcevalues";
    pub const ANODE_VOLTAGE: &str = "smua.nvbuffer2.readings";
    pub const ANODE_CURRENT: &str = "smua.nvbuffer1.readings";
    pub const CATHODE_CURRENT: &str = "node[2].smua.nvbuffer1.readings";
}
/// Line-oriented command channel to a source-measure instrument.
pub trait Instrument {
    fn write(&mut self, command: &str) -> Result<(), MeasurementError>;
    fn query(&mut self, command: &str) -> Result<String, MeasurementError>;
}
/// Where the instrument lives and how long a single exchange may take.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// `tcp://host:port`, `serial://PORT@BAUD` or a bare serial port name.
    pub address: String,
    pub timeout_ms: u64,
}
impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            address: "tcp://192.168.0.2:5025".to_string(),
            timeout_ms: 3_000_000,
        }
    }
}
impl InstrumentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstrumentAddress {
    Serial { port: String, baud_rate: u32 },
    Tcp(String),
}
impl InstrumentAddress {
    pub fn parse(address: &str) -> Result<Self, MeasurementError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(MeasurementError::Connection("empty instrument address".into()));
        }
        if let Some(host) = address.strip_prefix("tcp://") {
            return Ok(InstrumentAddress::Tcp(host.to_string()));
        }
        let serial = address.strip_prefix("serial://").unwrap_or(address);
        match serial.split_once('@') {
            Some((port, baud)) => {
                let baud_rate = baud.parse().map_err(|_| {
                    MeasurementError::Connection(format!("invalid baud rate {baud:?} in {address:?}"))
                })?;
                Ok(InstrumentAddress::Serial {
                    port: port.to_string(),
                    baud_rate,
                })
            }
            None => Ok(InstrumentAddress::Serial {
                port: serial.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            }),
        }
    }
}
/// Something that can hand out an exclusive instrument session.
pub trait Connector {
    fn connect(&self, settings: &InstrumentSettings) -> Result<Box<dyn Instrument>, MeasurementError>;
}
impl<F> Connector for F
where
    F: Fn(&InstrumentSettings) -> Result<Box<dyn Instrument>, MeasurementError>,
{
    fn connect(&self, settings: &InstrumentSettings) -> Result<Box<dyn Instrument>, MeasurementError> {
        self(settings)
    }
}
/// Opens real serial or TCP sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct HardwareConnector;
impl Connector for HardwareConnector {
    fn connect(&self, settings: &InstrumentSettings) -> Result<Box<dyn Instrument>, MeasurementError> {
        let timeout = settings.timeout();
        match InstrumentAddress::parse(&settings.address)? {
            InstrumentAddress::Serial { port, baud_rate } => {
                let stream = serialport::new(port.as_str(), baud_rate)
                    .timeout(timeout)
                    .open()
                    .map_err(|e| MeasurementError::Connection(format!("{port}: {e}")))?;
                info!("opened serial instrument {port} at {baud_rate} baud");
                Ok(Box::new(LineInstrument::new(port, stream)))
            }
            InstrumentAddress::Tcp(host) => {
                let addr = host
                    .to_socket_addrs()
                    .map_err(|e| MeasurementError::Connection(format!("{host}: {e}")))?
                    .next()
                    .ok_or_else(|| MeasurementError::Connection(format!("{host}: no address")))?;
                let stream = TcpStream::connect_timeout(&addr, timeout)
                    .map_err(|e| MeasurementError::Connection(format!("{host}: {e}")))?;
                stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| stream.set_write_timeout(Some(timeout)))
                    .map_err(|e| MeasurementError::Connection(format!("{host}: {e}")))?;
                info!("opened tcp instrument {host}");
                Ok(Box::new(LineInstrument::new(host, stream)))
            }
        }
    }
}
/// Newline-terminated commands over any byte stream.
///
/// The session is released when the value is dropped.
pub struct LineInstrument<T: Read + Write> {
    name: String,
    stream: BufReader<T>,
}
impl<T: Read + Write> LineInstrument<T> {
    pub fn new(name: impl Into<String>, stream: T) -> Self {
        Self {
            name: name.into(),
            stream: BufReader::new(stream),
        }
    }
}
/// First line of a command, shortened for error messages.
fn command_label(command: &str) -> String {
    let first = command.lines().next().unwrap_or("");
    if first.len() > 60 || command.contains('\n') {
        let cut: String = first.chars().take(60).collect();
        format!("{cut}...")
    } else {
        first.to_string()
    }
}
fn transport(command: &str, source: io::Error) -> MeasurementError {
    MeasurementError::Transport {
        command: command_label(command),
        source,
    }
}
impl<T: Read + Write> Instrument for LineInstrument<T> {
    fn write(&mut self, command: &str) -> Result<(), MeasurementError> {
        let out = self.stream.get_mut();
        out.write_all(command.as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush())
            .map_err(|e| transport(command, e))
    }
    fn query(&mut self, command: &str) -> Result<String, MeasurementError> {
        self.write(command)?;
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .map_err(|e| transport(command, e))?;
        if read == 0 {
            return Err(transport(
                command,
                io::Error::new(io::ErrorKind::UnexpectedEof, "instrument closed the connection"),
            ));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
impl<T: Read + Write> Drop for LineInstrument<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stream.get_mut().flush() {
            warn!("flushing {} on release failed: {e}", self.name);
        }
        info!("released instrument {}", self.name);
    }
}
pub fn count_query_command(buffer: &str) -> String {
    format!("print({buffer}.n)")
}
pub fn buffer_query_command(path: &str, count: usize) -> String {
    format!("printbuffer(1, {count}, {path})")
}
/// Asks the instrument how many readings `buffer` holds.
///
/// `nil`, an unparseable reply or a non-positive count fall back to `expected`.
/// Transport failures propagate.
pub fn query_buffer_count(
    inst: &mut dyn Instrument,
    buffer: &str,
    expected: usize,
) -> Result<usize, MeasurementError> {
    let reply = inst.query(&count_query_command(buffer))?;
    let reply = reply.trim();
    if reply.eq_ignore_ascii_case("nil") {
        warn!("{buffer}.n is nil, using expected count {expected}");
        return Ok(expected);
    }
    match reply.parse::<f64>() {
        Ok(n) if n >= 1.0 => Ok(n as usize),
        Ok(n) => {
            warn!("{buffer}.n reported {n}, using expected count {expected}");
            Ok(expected)
        }
        Err(_) => {
            warn!("{buffer}.n reply {reply:?} is not a number, using expected count {expected}");
            Ok(expected)
        }
    }
}
/// Parses a comma separated reading list. Empty tokens are skipped, anything
/// else that is not a number fails the whole buffer.
pub fn parse_buffer_response(buffer: &str, raw: &str) -> Result<Vec<f64>, MeasurementError> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f64>().map_err(|_| MeasurementError::MalformedBuffer {
                buffer: buffer.to_string(),
                index,
                token: token.to_string(),
            })
        })
        .collect()
}
/// One logical channel and the instrument buffer it is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSpec {
    pub key: &'static str,
    pub path: &'static str,
}
impl BufferSpec {
    pub const fn new(key: &'static str, path: &'static str) -> Self {
        Self { key, path }
    }
}
/// Reads every buffer in `specs`, `count` readings each.
pub fn read_buffers(
    inst: &mut dyn Instrument,
    specs: &[BufferSpec],
    count: usize,
) -> Result<RawBufferSet, MeasurementError> {
    let mut set = RawBufferSet::new();
    for spec in specs {
        let raw = inst.query(&buffer_query_command(spec.path, count))?;
        if raw.trim().is_empty() {
            debug!("{} ({}): empty reply", spec.key, spec.path);
            set.insert_missing(spec.key);
            continue;
        }
        let values = parse_buffer_response(spec.path, &raw)?;
        debug!("{} ({}): {} readings", spec.key, spec.path, values.len());
        set.insert(spec.key, values);
    }
    Ok(set)
}
/// In-memory instrument answering exact commands with canned replies.
#[cfg(test)]
pub struct ScriptedInstrument {
    responses: std::collections::HashMap<String, String>,
    transcript: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}
#[cfg(test)]
impl ScriptedInstrument {
    pub fn new() -> Self {
        Self {
            responses: Default::default(),
            transcript: Default::default(),
        }
    }
    pub fn respond(mut self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.responses.insert(command.into(), reply.into());
        self
    }
    /// Every command sent, writes and queries alike, in order.
    pub fn transcript(&self) -> std::sync::Arc<std::sync::Mutex<Vec<String>>> {
        self.transcript.clone()
    }
}
#[cfg(test)]
impl Instrument for ScriptedInstrument {
    fn write(&mut self, command: &str) -> Result<(), MeasurementError> {
        self.transcript.lock().unwrap().push(command.to_string());
        Ok(())
    }
    fn query(&mut self, command: &str) -> Result<String, MeasurementError> {
        self.transcript.lock().unwrap().push(command.to_string());
        self.responses.get(command).cloned().ok_or_else(|| {
            transport(command, io::Error::new(io::ErrorKind::TimedOut, "no reply"))
        })
    }
}
