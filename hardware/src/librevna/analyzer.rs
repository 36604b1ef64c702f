//! High-level LibreVNA driver with typed spectrum analyzer operations.
//!
//! [`LibreVna`] wraps a [`ScpiDevice`] and exposes one method per instrument
//! setting. Setters follow the GUI's best-effort configuration model:
//!
//! 1. convert the human-friendly value to wire units (MHz → Hz, kHz → Hz),
//! 2. send the command,
//! 3. query the same setting back and compare with what was requested.
//!
//! A setter returns `Ok(true)` when the echo matches and `Ok(false)` (with a
//! logged warning) when it does not. Transport failures are still errors.
//!
//! # Example
//!
//! ```no_run
//! use spectrum_hardware::librevna::{Detector, DeviceMode, LibreVna, Window};
//!
//! let mut vna = LibreVna::connect("localhost", 19542)?;
//! vna.set_mode(DeviceMode::SpectrumAnalyzer)?;
//! vna.set_start_mhz(1.0)?;
//! vna.set_stop_mhz(100.0)?;
//! vna.set_rbw_khz(50.0)?;
//! vna.set_window(Window::Kaiser)?;
//! vna.set_detector(Detector::Average)?;
//!
//! let trace = vna.trace(1)?;
//! println!("{} bins, first at {} Hz", trace.len(), trace[0].frequency);
//! # Ok::<(), spectrum_hardware::librevna::ScpiError>(())
//! ```

mod settings;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

pub use settings::{Detector, DeviceMode, Lenient, Port, ReferenceInput, TraceType, Window};

use super::scpi::{parse_bool, parse_f64, parse_i64, ScpiDevice, ScpiError, ScpiResult};
use super::trace::{parse_sa_trace, PowerSample};
use crate::sa_interface::SpectrumAnalyzer;

/// Pause between a setting command and its verification query.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

/// Allowed tracking generator output and normalization levels, dBm.
const TRACKING_LEVEL_RANGE: (f64, f64) = (-40.0, 0.0);

/// Instrument temperatures reported by `:DEV:INF:TEMP?`, °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperatures {
    pub source: f64,
    pub lo: f64,
    pub cpu: f64,
}

impl Temperatures {
    /// Parse the `source/LO/CPU` response.
    pub fn parse(response: &str) -> ScpiResult<Self> {
        let parts: Vec<&str> = response.trim().split('/').collect();
        if parts.len() != 3 {
            return Err(ScpiError::InvalidResponse(format!(
                "expected source/LO/CPU temperatures, got {response:?}"
            )));
        }
        Ok(Self {
            source: parse_f64(parts[0])?,
            lo: parse_f64(parts[1])?,
            cpu: parse_f64(parts[2])?,
        })
    }
}

/// Identification and limits of the attached instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub firmware: String,
    pub hardware_revision: String,
    pub temperatures: Temperatures,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    pub max_points: i64,
    pub min_power_dbm: f64,
    pub max_power_dbm: f64,
    pub min_rbw_hz: f64,
    pub max_rbw_hz: f64,
    pub max_harmonic_hz: f64,
}

/// LibreVNA driver speaking to the LibreVNA-GUI.
pub struct LibreVna<T = TcpStream> {
    device: ScpiDevice<T>,
    settle: Duration,
}

impl LibreVna<TcpStream> {
    /// Connect to the GUI's SCPI server.
    ///
    /// # Errors
    ///
    /// [`ScpiError::ConnectionFailed`] if the GUI is not running or its TCP
    /// server is disabled.
    pub fn connect(host: &str, port: u16) -> ScpiResult<Self> {
        Ok(Self::new(ScpiDevice::connect(host, port)?))
    }
}

impl<T: Read + Write> LibreVna<T> {
    pub fn new(device: ScpiDevice<T>) -> Self {
        Self {
            device,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Set the pause between a setting command and its verification query.
    pub fn set_settle_time(&mut self, settle: Duration) {
        self.settle = settle;
    }

    pub fn device(&mut self) -> &mut ScpiDevice<T> {
        &mut self.device
    }

    pub fn into_device(self) -> ScpiDevice<T> {
        self.device
    }

    /// Send `command`, wait, query `readback` and check it with `accept`.
    fn set_verified(
        &mut self,
        what: &str,
        command: &str,
        readback: &str,
        accept: impl FnOnce(&str) -> bool,
    ) -> ScpiResult<bool> {
        self.device.cmd(command)?;
        self.settle();
        let echo = self.device.query(readback)?;
        if accept(&echo) {
            info!("{} set to {}", what, echo);
            Ok(true)
        } else {
            warn!("Failed to set {}: requested {:?}, instrument reports {:?}", what, command, echo);
            Ok(false)
        }
    }

    /// Numeric setter in Hz, verified against the echoed value.
    fn set_hz(&mut self, what: &str, header: &str, hz: f64) -> ScpiResult<bool> {
        let hz = hz.round();
        self.set_verified(what, &format!("{header} {hz}"), &format!("{header}?"), |echo| {
            parse_f64(echo).is_ok_and(|v| same_value(v, hz))
        })
    }

    fn set_bool(&mut self, what: &str, header: &str, enabled: bool) -> ScpiResult<bool> {
        let value = if enabled { "TRUE" } else { "FALSE" };
        self.set_verified(what, &format!("{header} {value}"), &format!("{header}?"), |echo| {
            parse_bool(echo).is_ok_and(|v| v == enabled)
        })
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }

    fn query_f64(&mut self, query: &str) -> ScpiResult<f64> {
        parse_f64(&self.device.query(query)?)
    }

    fn query_bool(&mut self, query: &str) -> ScpiResult<bool> {
        parse_bool(&self.device.query(query)?)
    }

    // ==================== Device ====================

    /// Identification string of the GUI.
    pub fn idn(&mut self) -> ScpiResult<String> {
        self.device.query("*IDN?")
    }

    /// Operation-complete query.
    pub fn opc(&mut self) -> ScpiResult<bool> {
        self.query_bool("*OPC?")
    }

    /// Serial numbers of instruments visible to the GUI.
    ///
    /// The GUI answers with one serial per line and ends the list with a line
    /// that is empty or reads `ERROR`.
    pub fn list_devices(&mut self) -> ScpiResult<Vec<String>> {
        let mut devices = Vec::new();
        let mut line = self.device.query(":DEV:LIST?")?;
        while !line.is_empty() && line != "ERROR" {
            devices.extend(line.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
            line = match self.device.read_response() {
                Ok(line) => line,
                Err(ScpiError::Timeout { .. }) => break,
                Err(e) => return Err(e),
            };
        }
        Ok(devices)
    }

    /// Attach the GUI to an instrument (any instrument if `serial` is `None`).
    ///
    /// Returns the serial of the connected instrument.
    ///
    /// # Errors
    ///
    /// [`ScpiError::DeviceNotConnected`] if the GUI reports no connection.
    pub fn connect_device(&mut self, serial: Option<&str>) -> ScpiResult<String> {
        self.device.cmd(&format!(":DEV:CONN {}", serial.unwrap_or("")).trim_end())?;
        self.settle();
        let connected = self.device.query(":DEV:CONN?")?;
        if connected.is_empty() || connected == "Not connected" {
            return Err(ScpiError::DeviceNotConnected);
        }
        info!("Connected to {}", connected);
        Ok(connected)
    }

    pub fn disconnect_device(&mut self) -> ScpiResult<()> {
        self.device.cmd(":DEV:DISC")
    }

    pub fn set_mode(&mut self, mode: DeviceMode) -> ScpiResult<bool> {
        let ok = self.set_verified(
            "device mode",
            &format!(":DEV:MODE {mode}"),
            ":DEV:MODE?",
            |echo| echo.parse::<DeviceMode>().is_ok_and(|m| m == mode),
        )?;
        if ok {
            info!("Device mode: {}", mode.description());
        }
        Ok(ok)
    }

    pub fn mode(&mut self) -> ScpiResult<DeviceMode> {
        let response = self.device.query(":DEV:MODE?")?;
        response
            .parse()
            .map_err(|_| ScpiError::InvalidResponse(format!("unknown device mode {response:?}")))
    }

    /// Save the GUI setup to `dir/filename`.
    pub fn save_setup(&mut self, dir: &Path, filename: &str) -> ScpiResult<()> {
        if !dir.is_dir() {
            return Err(ScpiError::InvalidArgument(format!(
                "setup directory {} does not exist",
                dir.display()
            )));
        }
        self.device
            .cmd(&format!(":DEV:SETUP:SAVE {}", dir.join(filename).display()))?;
        self.settle();
        Ok(())
    }

    /// Load a GUI setup file. Returns whether the GUI accepted it.
    pub fn load_setup(&mut self, file: &Path) -> ScpiResult<bool> {
        if !file.is_file() {
            return Err(ScpiError::InvalidArgument(format!(
                "setup file {} does not exist",
                file.display()
            )));
        }
        self.query_bool(&format!(":DEV:SETUP:LOAD? {}", file.display()))
    }

    /// Reference output frequency in MHz (0 disables the output).
    pub fn set_reference_output_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        self.set_verified(
            "reference output",
            &format!(":DEV:REF:OUT {mhz}"),
            ":DEV:REF:OUT?",
            |echo| parse_f64(echo).is_ok_and(|v| same_value(v, mhz)),
        )
    }

    pub fn reference_output_mhz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":DEV:REF:OUT?")
    }

    pub fn set_reference_input(&mut self, input: ReferenceInput) -> ScpiResult<bool> {
        self.set_verified(
            "reference input",
            &format!(":DEV:REF:IN {input}"),
            ":DEV:REF:IN?",
            |echo| echo.parse::<ReferenceInput>().is_ok(),
        )
    }

    pub fn reference_input(&mut self) -> ScpiResult<String> {
        self.device.query(":DEV:REF:IN?")
    }

    /// Whether any PLL is unlocked.
    pub fn pll_unlocked(&mut self) -> ScpiResult<bool> {
        self.query_bool(":DEV:STA:UNLO?")
    }

    pub fn adc_overload(&mut self) -> ScpiResult<bool> {
        self.query_bool(":DEV:STA:ADCOVER?")
    }

    /// Whether the source output is unleveled.
    pub fn unleveled(&mut self) -> ScpiResult<bool> {
        self.query_bool(":DEV:STA:UNLEV?")
    }

    pub fn temperatures(&mut self) -> ScpiResult<Temperatures> {
        Temperatures::parse(&self.device.query(":DEV:INF:TEMP?")?)
    }

    pub fn lo_temperature(&mut self) -> ScpiResult<f64> {
        Ok(self.temperatures()?.lo)
    }

    pub fn cpu_temperature(&mut self) -> ScpiResult<f64> {
        Ok(self.temperatures()?.cpu)
    }

    /// Collect firmware, hardware and limit information.
    pub fn info(&mut self) -> ScpiResult<DeviceInfo> {
        Ok(DeviceInfo {
            firmware: self.device.query(":DEV:INF:FWREV?")?,
            hardware_revision: self.device.query(":DEV:INF:HWREV?")?,
            temperatures: self.temperatures()?,
            min_frequency_hz: self.query_f64(":DEV:INF:LIM:MINF?")?,
            max_frequency_hz: self.query_f64(":DEV:INF:LIM:MAXF?")?,
            max_points: parse_i64(&self.device.query(":DEV:INF:LIM:MAXP?")?)?,
            min_power_dbm: self.query_f64(":DEV:INF:LIM:MINPOW?")?,
            max_power_dbm: self.query_f64(":DEV:INF:LIM:MAXPOW?")?,
            min_rbw_hz: self.query_f64(":DEV:INF:LIM:MINRBW?")?,
            max_rbw_hz: self.query_f64(":DEV:INF:LIM:MAXRBW?")?,
            max_harmonic_hz: self.query_f64(":DEV:INF:LIM:MAXHARM?")?,
        })
    }

    // ==================== SA Frequency ====================

    pub fn set_span_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        self.set_hz("span", ":SA:FREQ:SPAN", mhz * 1e6)
    }

    pub fn span_hz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:FREQ:SPAN?")
    }

    pub fn set_start_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        self.set_hz("start frequency", ":SA:FREQ:START", mhz * 1e6)
    }

    pub fn start_hz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:FREQ:START?")
    }

    pub fn set_center_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        self.set_hz("center frequency", ":SA:FREQ:CENT", mhz * 1e6)
    }

    pub fn center_hz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:FREQ:CENT?")
    }

    pub fn set_stop_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        self.set_hz("stop frequency", ":SA:FREQ:STOP", mhz * 1e6)
    }

    pub fn stop_hz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:FREQ:STOP?")
    }

    /// Sweep the instrument's full frequency range.
    pub fn set_full_span(&mut self) -> ScpiResult<()> {
        self.device.cmd(":SA:FREQ:FULL")
    }

    /// Zero span at the current center frequency.
    pub fn set_zero_span(&mut self) -> ScpiResult<()> {
        self.device.cmd(":SA:FREQ:ZERO")
    }

    // ==================== SA Acquisition ====================

    /// Resolution bandwidth in kHz.
    pub fn set_rbw_khz(&mut self, khz: f64) -> ScpiResult<bool> {
        self.set_hz("resolution bandwidth", ":SA:ACQ:RBW", khz * 1e3)
    }

    pub fn rbw_hz(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:ACQ:RBW?")
    }

    pub fn set_window(&mut self, window: Window) -> ScpiResult<bool> {
        self.set_verified(
            "window",
            &format!(":SA:ACQ:WIND {window}"),
            ":SA:ACQ:WIND?",
            |echo| echo == window.to_string(),
        )
    }

    pub fn window(&mut self) -> ScpiResult<String> {
        self.device.query(":SA:ACQ:WIND?")
    }

    pub fn set_detector(&mut self, detector: Detector) -> ScpiResult<bool> {
        self.set_verified(
            "detector",
            &format!(":SA:ACQ:DET {detector}"),
            ":SA:ACQ:DET?",
            |echo| echo == detector.to_string(),
        )
    }

    pub fn detector(&mut self) -> ScpiResult<String> {
        self.device.query(":SA:ACQ:DET?")
    }

    /// Number of sweeps combined into one reported trace.
    pub fn set_average_count(&mut self, count: u32) -> ScpiResult<bool> {
        self.set_verified(
            "average count",
            &format!(":SA:ACQ:AVG {count}"),
            ":SA:ACQ:AVG?",
            |echo| parse_i64(echo).is_ok_and(|v| v == i64::from(count)),
        )
    }

    pub fn average_count(&mut self) -> ScpiResult<u32> {
        self.query_count(":SA:ACQ:AVG?")
    }

    /// Re-send the average count, which clears the instrument's averaging
    /// accumulator. Mismatches are logged at debug level only.
    pub fn restart_averaging(&mut self, count: u32) -> ScpiResult<bool> {
        self.device.cmd(&format!(":SA:ACQ:AVG {count}"))?;
        self.settle();
        let echo = self.device.query(":SA:ACQ:AVG?")?;
        let ok = parse_i64(&echo).is_ok_and(|v| v == i64::from(count));
        if !ok {
            debug!("Averaging restart echoed {:?}, expected {}", echo, count);
        }
        Ok(ok)
    }

    /// Sweeps accumulated so far in the current averaging cycle.
    pub fn current_average(&mut self) -> ScpiResult<u32> {
        self.query_count(":SA:ACQ:AVGLEV?")
    }

    pub fn averaging_done(&mut self) -> ScpiResult<bool> {
        self.query_bool(":SA:ACQ:FIN?")
    }

    /// Limit check result: `Some(true)` on PASS, `Some(false)` on FAIL, `None`
    /// when no limit is active.
    pub fn limit_passed(&mut self) -> ScpiResult<Option<bool>> {
        Ok(match self.device.query(":SA:ACQ:LIM?")?.as_str() {
            "PASS" => Some(true),
            "FAIL" => Some(false),
            _ => None,
        })
    }

    pub fn set_single_sweep(&mut self, enabled: bool) -> ScpiResult<bool> {
        self.set_bool("single sweep", ":SA:ACQ:SINGLE", enabled)
    }

    pub fn single_sweep(&mut self) -> ScpiResult<bool> {
        self.query_bool(":SA:ACQ:SINGLE?")
    }

    /// Signal identification (image rejection). Required for clean captures.
    pub fn set_signal_id(&mut self, enabled: bool) -> ScpiResult<bool> {
        self.set_bool("signal identification", ":SA:ACQ:SIG", enabled)
    }

    pub fn signal_id(&mut self) -> ScpiResult<bool> {
        self.query_bool(":SA:ACQ:SIG?")
    }

    fn query_count(&mut self, query: &str) -> ScpiResult<u32> {
        let value = parse_i64(&self.device.query(query)?)?;
        u32::try_from(value)
            .map_err(|_| ScpiError::InvalidResponse(format!("count out of range: {value}")))
    }

    // ==================== SA Tracking Generator ====================

    pub fn set_tracking(&mut self, enabled: bool) -> ScpiResult<bool> {
        self.set_bool("tracking generator", ":SA:TRACK:EN", enabled)
    }

    pub fn tracking(&mut self) -> ScpiResult<bool> {
        self.query_bool(":SA:TRACK:EN?")
    }

    /// Port driven by the tracking generator (1 or 2).
    pub fn set_tracking_port(&mut self, port: u8) -> ScpiResult<bool> {
        let port = Port::try_from(port)?;
        self.set_verified(
            "tracking port",
            &format!(":SA:TRACK:PORT {}", port.number()),
            ":SA:TRACK:PORT?",
            |echo| parse_i64(echo).is_ok_and(|v| v == i64::from(port.number())),
        )
    }

    pub fn tracking_port(&mut self) -> ScpiResult<Port> {
        let value = parse_i64(&self.device.query(":SA:TRACK:PORT?")?)?;
        u8::try_from(value)
            .map_err(|_| ScpiError::InvalidResponse(format!("invalid port {value}")))
            .and_then(Port::try_from)
    }

    /// Tracking generator output level in dBm, within [-40, 0].
    pub fn set_tracking_level(&mut self, dbm: f64) -> ScpiResult<bool> {
        check_tracking_level("output level", dbm)?;
        self.set_verified(
            "tracking level",
            &format!(":SA:TRACK:LVL {dbm}"),
            ":SA:TRACK:LVL?",
            |echo| parse_f64(echo).is_ok_and(|v| same_value(v, dbm)),
        )
    }

    pub fn tracking_level(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:TRACK:LVL?")
    }

    /// Tracking generator frequency offset in Hz.
    pub fn set_tracking_offset(&mut self, offset_hz: i64) -> ScpiResult<bool> {
        self.set_verified(
            "tracking offset",
            &format!(":SA:TRACK:OFF {offset_hz}"),
            ":SA:TRACK:OFF?",
            |echo| parse_i64(echo).is_ok_and(|v| v == offset_hz),
        )
    }

    pub fn tracking_offset(&mut self) -> ScpiResult<i64> {
        parse_i64(&self.device.query(":SA:TRACK:OFF?")?)
    }

    pub fn set_tracking_normalize(&mut self, enabled: bool) -> ScpiResult<bool> {
        self.set_bool("tracking normalization", ":SA:TRACK:NORM:EN", enabled)
    }

    pub fn tracking_normalize(&mut self) -> ScpiResult<bool> {
        self.query_bool(":SA:TRACK:NORM:EN?")
    }

    /// Take a normalization measurement with the current tracking settings.
    pub fn measure_normalization(&mut self) -> ScpiResult<()> {
        self.device.cmd(":SA:TRACK:NORM:MEAS")
    }

    /// Normalization reference level in dBm, within [-40, 0].
    pub fn set_normalization_reference(&mut self, dbm: f64) -> ScpiResult<bool> {
        check_tracking_level("normalization reference level", dbm)?;
        self.set_verified(
            "normalization reference",
            &format!(":SA:TRACK:NORM:LVL {dbm}"),
            ":SA:TRACK:NORM:LVL?",
            |echo| parse_f64(echo).is_ok_and(|v| same_value(v, dbm)),
        )
    }

    pub fn normalization_reference(&mut self) -> ScpiResult<f64> {
        self.query_f64(":SA:TRACK:NORM:LVL?")
    }

    // ==================== SA Traces ====================

    /// Names of all traces defined in the GUI.
    pub fn trace_names(&mut self) -> ScpiResult<Vec<String>> {
        let response = self.device.query(":SA:TRAC:LIST?")?;
        Ok(response
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Current trace of an instrument port (1 or 2).
    ///
    /// # Errors
    ///
    /// [`ScpiError::InvalidArgument`] for any other port, before any request is
    /// sent. [`ScpiError::MalformedTrace`] if the data does not come in pairs.
    pub fn trace(&mut self, port: u8) -> ScpiResult<Vec<PowerSample>> {
        let port = Port::try_from(port)?;
        self.port_trace(port)
    }

    pub fn port_trace(&mut self, port: Port) -> ScpiResult<Vec<PowerSample>> {
        let data = self
            .device
            .query(&format!(":SA:TRAC:DATA? {}", port.trace_name()))?;
        parse_sa_trace(&data)
    }

    /// Power of a named trace at a frequency given in kHz.
    pub fn power_at(&mut self, trace: &str, khz: f64) -> ScpiResult<f64> {
        self.query_f64(&format!(":SA:TRAC:AT? {} {}", trace, khz * 1e3))
    }

    pub fn rename_trace(&mut self, trace: &str, new_name: &str) -> ScpiResult<()> {
        self.device
            .cmd(&format!(":SA:TRAC:RENAME {trace} {new_name}"))
    }

    pub fn pause_trace(&mut self, trace: &str) -> ScpiResult<()> {
        self.device.cmd(&format!(":SA:TRAC:PAUSE {trace}"))
    }

    pub fn resume_trace(&mut self, trace: &str) -> ScpiResult<()> {
        self.device.cmd(&format!(":SA:TRAC:RESUME {trace}"))
    }

    pub fn is_trace_paused(&mut self, trace: &str) -> ScpiResult<bool> {
        self.query_bool(&format!(":SA:TRAC:PAUSED? {trace}"))
    }

    /// Assign a named trace to an instrument port (1 or 2).
    pub fn set_trace_port(&mut self, trace: &str, port: u8) -> ScpiResult<()> {
        let port = Port::try_from(port)?;
        self.device
            .cmd(&format!(":SA:TRAC:PARAM {} {}", trace, port.trace_name()))
    }

    pub fn trace_port(&mut self, trace: &str) -> ScpiResult<String> {
        self.device.query(&format!(":SA:TRAC:PARAM? {trace}"))
    }

    pub fn set_trace_type(&mut self, trace: &str, trace_type: TraceType) -> ScpiResult<()> {
        self.device
            .cmd(&format!(":SA:TRAC:TYPE {trace} {trace_type}"))
    }

    pub fn trace_type(&mut self, trace: &str) -> ScpiResult<TraceType> {
        let response = self.device.query(&format!(":SA:TRAC:TYPE? {trace}"))?;
        response
            .parse()
            .map_err(|_| ScpiError::InvalidResponse(format!("unknown trace type {response:?}")))
    }
}

impl<T: Read + Write> SpectrumAnalyzer for LibreVna<T> {
    fn set_mode(&mut self, mode: DeviceMode) -> ScpiResult<bool> {
        LibreVna::set_mode(self, mode)
    }

    fn set_start_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        LibreVna::set_start_mhz(self, mhz)
    }

    fn set_stop_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
        LibreVna::set_stop_mhz(self, mhz)
    }

    fn set_rbw_khz(&mut self, khz: f64) -> ScpiResult<bool> {
        LibreVna::set_rbw_khz(self, khz)
    }

    fn set_window(&mut self, window: Window) -> ScpiResult<bool> {
        LibreVna::set_window(self, window)
    }

    fn set_detector(&mut self, detector: Detector) -> ScpiResult<bool> {
        LibreVna::set_detector(self, detector)
    }

    fn set_average_count(&mut self, count: u32) -> ScpiResult<bool> {
        LibreVna::set_average_count(self, count)
    }

    fn set_signal_id(&mut self, enabled: bool) -> ScpiResult<bool> {
        LibreVna::set_signal_id(self, enabled)
    }

    fn current_average(&mut self) -> ScpiResult<u32> {
        LibreVna::current_average(self)
    }

    fn port_trace(&mut self, port: Port) -> ScpiResult<Vec<PowerSample>> {
        LibreVna::port_trace(self, port)
    }

    fn temperatures(&mut self) -> ScpiResult<Temperatures> {
        LibreVna::temperatures(self)
    }

    fn restart_averaging(&mut self, count: u32) -> ScpiResult<bool> {
        LibreVna::restart_averaging(self, count)
    }

    fn discard_pending(&mut self) {
        let stale = self.device.discard_pending();
        if !stale.is_empty() {
            debug!("Discarded {} stale bytes", stale.len());
        }
    }
}

fn check_tracking_level(what: &str, dbm: f64) -> ScpiResult<()> {
    let (min, max) = TRACKING_LEVEL_RANGE;
    if !(min..=max).contains(&dbm) {
        return Err(ScpiError::InvalidArgument(format!(
            "{what} {dbm} dBm outside [{min}, {max}] dBm"
        )));
    }
    Ok(())
}

/// Compare an echoed value with the requested one, allowing for float formatting.
fn same_value(echo: f64, requested: f64) -> bool {
    (echo - requested).abs() <= 1e-9 * requested.abs().max(1.0)
}
