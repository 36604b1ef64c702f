//! Spectrum analyzer interface trait for acquisition workflows.

use crate::librevna::{Detector, DeviceMode, Port, PowerSample, ScpiResult, Temperatures, Window};

/// Interface for spectrum analyzer control
///
/// Abstracts the instrument for testability of the acquisition loop. Setters
/// return `Ok(false)` when the instrument did not take the requested value.
pub trait SpectrumAnalyzer {
    fn set_mode(&mut self, mode: DeviceMode) -> ScpiResult<bool>;

    /// Sweep start frequency in MHz
    fn set_start_mhz(&mut self, mhz: f64) -> ScpiResult<bool>;

    /// Sweep stop frequency in MHz
    fn set_stop_mhz(&mut self, mhz: f64) -> ScpiResult<bool>;

    /// Resolution bandwidth in kHz
    fn set_rbw_khz(&mut self, khz: f64) -> ScpiResult<bool>;

    fn set_window(&mut self, window: Window) -> ScpiResult<bool>;

    fn set_detector(&mut self, detector: Detector) -> ScpiResult<bool>;

    fn set_average_count(&mut self, count: u32) -> ScpiResult<bool>;

    fn set_signal_id(&mut self, enabled: bool) -> ScpiResult<bool>;

    /// Sweeps accumulated in the current averaging cycle
    fn current_average(&mut self) -> ScpiResult<u32>;

    fn port_trace(&mut self, port: Port) -> ScpiResult<Vec<PowerSample>>;

    fn temperatures(&mut self) -> ScpiResult<Temperatures>;

    /// Clear the averaging accumulator and start a new cycle of `count` sweeps
    fn restart_averaging(&mut self, count: u32) -> ScpiResult<bool>;

    /// Drop unread response bytes after a timed-out exchange
    fn discard_pending(&mut self) {}
}
