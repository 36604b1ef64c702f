//! Continuous spectrum capture with rotating storage units.
//!
//! The [`AcquisitionLoop`] pushes an [`AcquisitionConfig`] to a
//! [`SpectrumAnalyzer`], then polls the instrument's averaging counter. Every
//! completed averaging cycle becomes one [`CaptureBlock`] (both ports, a
//! timestamp and LO/CPU temperatures) written into the active [`StorageUnit`].
//! A unit holds `blocks_per_unit` blocks; when it fills, it is finalized and a
//! new one is opened.
//!
//! State flow:
//!
//! ```text
//! Idle -> Configuring -> WaitingFirstAverage -> Capturing -> Rotating -> Capturing -> ...
//! ```
//!
//! Averaging is restarted only after a block has been written and flushed, so a
//! sample cannot be lost to an instrument-side reset racing the host-side read.

pub mod archive;
pub mod config;
pub mod storage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use archive::{locate_files, CaptureArchive};
pub use config::{AcquisitionConfig, ConfigError};
pub use storage::{
    CaptureBlock, CaptureMetadata, JsonStorage, StorageBackend, StorageError, StorageResult,
    StorageUnit,
};

use crate::librevna::{split_power_samples, DeviceMode, Port, PowerSample, ScpiError};
use crate::sa_interface::SpectrumAnalyzer;

/// Longest uninterrupted sleep between stop-flag checks
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Instrument error: {0}")]
    Instrument(#[from] ScpiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gave up after {0} consecutive timeouts")]
    TooManyTimeouts(u32),
}

/// Acquisition loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    /// Pushing settings to the instrument
    Configuring,
    /// Waiting for the first sweep to establish the frequency axis
    WaitingFirstAverage,
    /// Polling for averaging completion; `block` is the next index to write
    Capturing { block: usize },
    /// The active unit is full and will be replaced
    Rotating,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionSummary {
    pub blocks: usize,
    pub units: usize,
    pub timeouts: u32,
    pub discarded_cycles: u32,
    pub mismatched_settings: u32,
}

/// Drives a spectrum analyzer through repeated averaging cycles.
pub struct AcquisitionLoop<A: SpectrumAnalyzer, S: StorageBackend> {
    analyzer: A,
    storage: S,
    config: AcquisitionConfig,
    state: AcquisitionState,
    mode_set: bool,
    /// Frequency axis from the most recent port 1 trace
    frequencies: Vec<f64>,
    unit: Option<StorageUnit>,
    /// A stored block is waiting for the averaging accumulator to be reset
    restart_pending: bool,
    consecutive_timeouts: u32,
    summary: AcquisitionSummary,
}

impl<A: SpectrumAnalyzer, S: StorageBackend> AcquisitionLoop<A, S> {
    pub fn new(analyzer: A, storage: S, config: AcquisitionConfig) -> Result<Self, AcquisitionError> {
        config.validate()?;
        Ok(Self {
            analyzer,
            storage,
            config,
            state: AcquisitionState::Idle,
            mode_set: false,
            frequencies: Vec::new(),
            unit: None,
            restart_pending: false,
            consecutive_timeouts: 0,
            summary: AcquisitionSummary::default(),
        })
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn summary(&self) -> &AcquisitionSummary {
        &self.summary
    }

    /// The unit currently receiving blocks, if any.
    pub fn active_unit(&self) -> Option<&StorageUnit> {
        self.unit.as_ref()
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_parts(self) -> (A, S) {
        (self.analyzer, self.storage)
    }

    /// Run until `stop` is set or a fatal error occurs.
    ///
    /// The stop flag is checked between exchanges, never in the middle of one,
    /// so the connection stays in step with the GUI. The active unit is
    /// finalized on the way out in both cases.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<AcquisitionSummary, AcquisitionError> {
        while !stop.load(Ordering::SeqCst) {
            match self.step() {
                Ok(wait) => {
                    self.consecutive_timeouts = 0;
                    sleep_unless_stopped(wait, stop);
                }
                Err(e) => {
                    if let Err(fatal) = self.recover(e) {
                        error!("Acquisition stopped: {}", fatal);
                        if let Err(e) = self.finalize_active() {
                            error!("Failed to finalize storage unit: {}", e);
                        }
                        return Err(fatal);
                    }
                }
            }
        }

        info!("Stop requested");
        self.finalize_active()?;
        info!(
            "Acquisition finished: {} blocks in {} units",
            self.summary.blocks, self.summary.units
        );
        Ok(self.summary.clone())
    }

    /// Perform one state transition and return how long to wait before the next.
    pub fn step(&mut self) -> Result<Duration, AcquisitionError> {
        match self.state {
            AcquisitionState::Idle => {
                info!("Starting acquisition, configuring instrument");
                self.state = AcquisitionState::Configuring;
                Ok(Duration::ZERO)
            }
            AcquisitionState::Configuring => self.configure(),
            AcquisitionState::WaitingFirstAverage => self.wait_first_average(),
            AcquisitionState::Capturing { block } => self.poll_capture(block),
            AcquisitionState::Rotating => {
                self.rotate()?;
                Ok(Duration::ZERO)
            }
        }
    }

    /// Finalize the active unit, if any.
    pub fn finalize_active(&mut self) -> Result<(), StorageError> {
        if let Some(unit) = self.unit.take() {
            self.storage.finalize(unit)?;
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<Duration, AcquisitionError> {
        if !self.mode_set {
            if !self.analyzer.set_mode(DeviceMode::SpectrumAnalyzer)? {
                warn!("Instrument did not switch to spectrum analyzer mode, retrying");
                return Ok(self.config.mode_retry_interval);
            }
            self.mode_set = true;
        }

        let c = &self.config;
        let results = [
            self.analyzer.set_start_mhz(c.start_mhz)?,
            self.analyzer.set_stop_mhz(c.stop_mhz)?,
            self.analyzer.set_rbw_khz(c.rbw_khz)?,
            self.analyzer.set_window(c.window)?,
            self.analyzer.set_detector(c.detector)?,
            self.analyzer.set_average_count(c.average_count)?,
            self.analyzer.set_signal_id(c.signal_id)?,
        ];
        let mismatched = results.iter().filter(|ok| !**ok).count() as u32;
        if mismatched > 0 {
            warn!("{} settings were not accepted by the instrument", mismatched);
        }
        self.summary.mismatched_settings += mismatched;

        info!("Waiting for first averaging cycle");
        self.state = AcquisitionState::WaitingFirstAverage;
        Ok(Duration::ZERO)
    }

    fn wait_first_average(&mut self) -> Result<Duration, AcquisitionError> {
        let current = self.analyzer.current_average()?;
        if current < 1 {
            debug!("No sweep completed yet");
            return Ok(self.config.poll_interval);
        }

        let port1 = self.analyzer.port_trace(Port::One)?;
        let (frequencies, _) = split_power_samples(&port1);
        info!("Frequency axis has {} bins", frequencies.len());
        self.frequencies = frequencies;
        self.unit = Some(self.create_unit()?);
        self.state = AcquisitionState::Capturing { block: 0 };

        if current >= self.config.average_count {
            self.record_block(0, port1)?;
            return Ok(self.config.poll_interval);
        }
        Ok(Duration::ZERO)
    }

    fn poll_capture(&mut self, block: usize) -> Result<Duration, AcquisitionError> {
        if self.restart_pending {
            self.restart_averaging()?;
            return Ok(self.config.poll_interval);
        }

        let current = self.analyzer.current_average()?;
        if current < self.config.average_count {
            debug!("Averaging {}/{}", current, self.config.average_count);
            return Ok(self.config.poll_interval);
        }

        let port1 = self.analyzer.port_trace(Port::One)?;
        self.record_block(block, port1)?;
        Ok(self.config.poll_interval)
    }

    /// Complete a capture from an already-fetched port 1 trace, then restart averaging.
    fn record_block(
        &mut self,
        mut block: usize,
        port1: Vec<PowerSample>,
    ) -> Result<(), AcquisitionError> {
        let port2 = self.analyzer.port_trace(Port::Two)?;
        let timestamp = Utc::now();
        let temperatures = self.analyzer.temperatures()?;

        let (frequencies, port1) = split_power_samples(&port1);
        let (_, port2) = split_power_samples(&port2);
        if port1.len() != port2.len() {
            return Err(ScpiError::InvalidResponse(format!(
                "port traces differ in length: {} vs {}",
                port1.len(),
                port2.len()
            ))
            .into());
        }

        let axis_changed = frequencies.len() != self.frequencies.len();
        self.frequencies = frequencies;

        let mut unit = match self.unit.take() {
            Some(unit) if !axis_changed => unit,
            previous => {
                if let Some(previous) = previous {
                    info!(
                        "Frequency axis changed to {} bins, starting a new unit",
                        self.frequencies.len()
                    );
                    self.storage.finalize(previous)?;
                }
                block = 0;
                self.create_unit()?
            }
        };

        let capture = CaptureBlock {
            timestamp,
            port1,
            port2,
            lo_temperature: temperatures.lo,
            cpu_temperature: temperatures.cpu,
        };
        let written = unit
            .write_block(block, &capture)
            .and_then(|_| self.storage.flush(&unit));
        let name = unit.name().to_string();
        let capacity = unit.capacity();
        self.unit = Some(unit);
        written?;

        self.summary.blocks += 1;
        info!("Captured block {} of {} in {}", block + 1, capacity, name);

        // The block is stored; from here on only the restart may be retried.
        let next = block + 1;
        self.state = if next >= capacity {
            AcquisitionState::Rotating
        } else {
            AcquisitionState::Capturing { block: next }
        };
        self.restart_pending = true;
        self.restart_averaging()
    }

    /// Reset the instrument's averaging accumulator for the next cycle.
    ///
    /// Stays pending until the exchange succeeds, so a failed restart is
    /// repeated on the next capture step before any new block is recorded.
    fn restart_averaging(&mut self) -> Result<(), AcquisitionError> {
        if !self.analyzer.restart_averaging(self.config.average_count)? {
            warn!("Averaging restart was not confirmed by the instrument");
        }
        self.restart_pending = false;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), AcquisitionError> {
        self.finalize_active()?;
        self.unit = Some(self.create_unit()?);
        self.state = AcquisitionState::Capturing { block: 0 };
        Ok(())
    }

    fn create_unit(&mut self) -> Result<StorageUnit, StorageError> {
        let unit = self.storage.create(
            self.config.blocks_per_unit,
            self.frequencies.clone(),
            CaptureMetadata::from_config(&self.config),
        )?;
        self.summary.units += 1;
        Ok(unit)
    }

    /// Decide whether a failed step can be retried.
    fn recover(&mut self, err: AcquisitionError) -> Result<(), AcquisitionError> {
        match err {
            AcquisitionError::Instrument(ScpiError::Timeout { waited }) => {
                self.consecutive_timeouts += 1;
                self.summary.timeouts += 1;
                if self.consecutive_timeouts > self.config.max_consecutive_timeouts {
                    return Err(AcquisitionError::TooManyTimeouts(self.consecutive_timeouts));
                }
                warn!(
                    "No response within {:?} ({} in a row), retrying",
                    waited, self.consecutive_timeouts
                );
                self.analyzer.discard_pending();
                Ok(())
            }
            AcquisitionError::Instrument(e) if !e.is_fatal() && self.restart_pending => {
                warn!("Averaging restart failed, retrying: {}", e);
                Ok(())
            }
            AcquisitionError::Instrument(e) if !e.is_fatal() => {
                warn!("Discarding averaging cycle: {}", e);
                self.summary.discarded_cycles += 1;
                if matches!(self.state, AcquisitionState::Capturing { .. }) {
                    match self.analyzer.restart_averaging(self.config.average_count) {
                        Ok(_) => {}
                        Err(e) if !e.is_fatal() => warn!("Averaging restart failed: {}", e),
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(())
            }
            fatal => Err(fatal),
        }
    }
}

fn sleep_unless_stopped(wait: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + wait;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(STOP_CHECK_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::librevna::{Detector, ScpiResult, Temperatures, Window};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Analyzer that replays scripted average counts and records every call.
    ///
    /// Once the average script runs out it raises `stop` so `run` terminates.
    struct MockAnalyzer {
        calls: Vec<String>,
        averages: VecDeque<ScpiResult<u32>>,
        traces: VecDeque<ScpiResult<Vec<PowerSample>>>,
        modes: VecDeque<bool>,
        restarts: VecDeque<ScpiResult<bool>>,
        /// Port 1 level for each successive port 1 fetch
        port1_levels: VecDeque<f64>,
        bins: usize,
        stop: Arc<AtomicBool>,
    }

    impl MockAnalyzer {
        fn new(averages: impl IntoIterator<Item = u32>) -> Self {
            Self {
                calls: Vec::new(),
                averages: averages.into_iter().map(Ok).collect(),
                traces: VecDeque::new(),
                modes: VecDeque::new(),
                restarts: VecDeque::new(),
                port1_levels: VecDeque::new(),
                bins: 4,
                stop: Arc::new(AtomicBool::new(false)),
            }
        }

        fn count(&self, call: &str) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }
    }

    impl SpectrumAnalyzer for MockAnalyzer {
        fn set_mode(&mut self, mode: DeviceMode) -> ScpiResult<bool> {
            self.calls.push(format!("mode {mode}"));
            Ok(self.modes.pop_front().unwrap_or(true))
        }

        fn set_start_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
            self.calls.push(format!("start {mhz}"));
            Ok(true)
        }

        fn set_stop_mhz(&mut self, mhz: f64) -> ScpiResult<bool> {
            self.calls.push(format!("stop {mhz}"));
            Ok(true)
        }

        fn set_rbw_khz(&mut self, khz: f64) -> ScpiResult<bool> {
            self.calls.push(format!("rbw {khz}"));
            Ok(true)
        }

        fn set_window(&mut self, window: Window) -> ScpiResult<bool> {
            self.calls.push(format!("window {window}"));
            Ok(true)
        }

        fn set_detector(&mut self, detector: Detector) -> ScpiResult<bool> {
            self.calls.push(format!("detector {detector}"));
            // Pretend the instrument refuses the detector.
            Ok(false)
        }

        fn set_average_count(&mut self, count: u32) -> ScpiResult<bool> {
            self.calls.push(format!("avg {count}"));
            Ok(true)
        }

        fn set_signal_id(&mut self, enabled: bool) -> ScpiResult<bool> {
            self.calls.push(format!("signal_id {enabled}"));
            Ok(true)
        }

        fn current_average(&mut self) -> ScpiResult<u32> {
            self.calls.push("poll".to_string());
            match self.averages.pop_front() {
                Some(result) => result,
                None => {
                    self.stop.store(true, Ordering::SeqCst);
                    Ok(0)
                }
            }
        }

        fn port_trace(&mut self, port: Port) -> ScpiResult<Vec<PowerSample>> {
            self.calls.push(format!("trace {}", port.trace_name()));
            if let Some(scripted) = self.traces.pop_front() {
                return scripted;
            }
            let level = match port {
                Port::One => self.port1_levels.pop_front().unwrap_or(-81.0),
                Port::Two => -82.0,
            };
            Ok((0..self.bins)
                .map(|i| PowerSample {
                    frequency: 1e6 * (i + 1) as f64,
                    dbm: level,
                })
                .collect())
        }

        fn temperatures(&mut self) -> ScpiResult<Temperatures> {
            self.calls.push("temperatures".to_string());
            Ok(Temperatures {
                source: 30.0,
                lo: 40.0,
                cpu: 50.0,
            })
        }

        fn restart_averaging(&mut self, count: u32) -> ScpiResult<bool> {
            self.calls.push(format!("restart {count}"));
            self.restarts.pop_front().unwrap_or(Ok(true))
        }

        fn discard_pending(&mut self) {
            self.calls.push("discard".to_string());
        }
    }

    /// Keeps units in memory and records what happened to them.
    #[derive(Default)]
    struct MemoryStorage {
        created: usize,
        flushes: usize,
        finalized: Vec<StorageUnit>,
        fail_create: bool,
    }

    impl StorageBackend for MemoryStorage {
        fn create(
            &mut self,
            capacity: usize,
            frequencies: Vec<f64>,
            metadata: CaptureMetadata,
        ) -> StorageResult<StorageUnit> {
            if self.fail_create {
                return Err(StorageError::Io {
                    path: "out".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.created += 1;
            Ok(StorageUnit::new(
                format!("unit{}", self.created),
                capacity,
                frequencies,
                metadata,
            ))
        }

        fn flush(&mut self, _unit: &StorageUnit) -> StorageResult<()> {
            self.flushes += 1;
            Ok(())
        }

        fn finalize(&mut self, mut unit: StorageUnit) -> StorageResult<()> {
            unit.close();
            self.finalized.push(unit);
            Ok(())
        }
    }

    fn test_config(target: u32, capacity: usize) -> AcquisitionConfig {
        AcquisitionConfig {
            average_count: target,
            blocks_per_unit: capacity,
            poll_interval: Duration::ZERO,
            mode_retry_interval: Duration::ZERO,
            max_consecutive_timeouts: 2,
            ..Default::default()
        }
    }

    fn make_loop(
        analyzer: MockAnalyzer,
        target: u32,
        capacity: usize,
    ) -> AcquisitionLoop<MockAnalyzer, MemoryStorage> {
        AcquisitionLoop::new(analyzer, MemoryStorage::default(), test_config(target, capacity))
            .unwrap()
    }

    fn step_until(
        acq: &mut AcquisitionLoop<MockAnalyzer, MemoryStorage>,
        state: AcquisitionState,
    ) {
        for _ in 0..100 {
            if acq.state() == state {
                return;
            }
            acq.step().unwrap();
        }
        panic!("never reached {state:?}, stuck in {:?}", acq.state());
    }

    #[test]
    fn test_configuration_pushed_once() {
        let mut acq = make_loop(MockAnalyzer::new([]), 1, 3);
        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);

        assert_eq!(
            acq.analyzer().calls,
            vec![
                "mode SA",
                "start 1",
                "stop 100",
                "rbw 50",
                "window KAISER",
                "detector AVERAGE",
                "avg 1",
                "signal_id true",
            ]
        );
        assert_eq!(acq.summary().mismatched_settings, 1);
    }

    #[test]
    fn test_mode_retried_until_accepted() {
        let mut analyzer = MockAnalyzer::new([]);
        analyzer.modes = VecDeque::from(vec![false, false, true]);
        let mut acq = make_loop(analyzer, 1, 3);

        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);
        assert_eq!(acq.analyzer().count("mode SA"), 3);
        assert_eq!(acq.analyzer().count("start 1"), 1);
    }

    #[test]
    fn test_first_complete_cycle_captures_block_zero() {
        let mut acq = make_loop(MockAnalyzer::new([1, 0]), 1, 3);
        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);
        acq.analyzer.calls.clear();

        acq.step().unwrap();
        assert_eq!(acq.state(), AcquisitionState::Capturing { block: 1 });
        let unit = acq.active_unit().unwrap();
        assert_eq!(unit.len(), 1);
        assert_eq!(unit.bins(), 4);
        assert_eq!(unit.port_dbm(Port::One)[[0, 0]], -81.0);
        assert_eq!(unit.port_dbm(Port::Two)[[0, 3]], -82.0);
        assert_eq!(unit.lo_temperatures(), &[40.0]);
        assert_eq!(unit.cpu_temperatures(), &[50.0]);

        acq.step().unwrap();
        assert_eq!(
            acq.analyzer().calls,
            vec![
                "poll",
                "trace PORT1",
                "trace PORT2",
                "temperatures",
                "restart 1",
                "poll",
            ]
        );
        assert_eq!(acq.storage().flushes, 1);
    }

    #[test]
    fn test_waits_for_target_average() {
        let mut acq = make_loop(MockAnalyzer::new([0, 1, 2, 3]), 3, 3);
        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);

        assert_eq!(acq.step().unwrap(), Duration::ZERO);
        assert_eq!(acq.state(), AcquisitionState::WaitingFirstAverage);

        // First sweep establishes the axis but the cycle is not complete yet.
        acq.step().unwrap();
        assert_eq!(acq.state(), AcquisitionState::Capturing { block: 0 });
        assert!(acq.active_unit().unwrap().is_empty());

        acq.step().unwrap();
        assert!(acq.active_unit().unwrap().is_empty());
        assert_eq!(acq.analyzer().count("restart 3"), 0);

        acq.step().unwrap();
        assert_eq!(acq.active_unit().unwrap().len(), 1);
        assert_eq!(acq.analyzer().count("restart 3"), 1);
    }

    #[test]
    fn test_rotation_after_capacity() {
        let mut acq = make_loop(MockAnalyzer::new([1; 4]), 1, 3);
        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);

        for _ in 0..3 {
            acq.step().unwrap();
        }
        assert_eq!(acq.state(), AcquisitionState::Rotating);
        assert!(acq.storage().finalized.is_empty());

        acq.step().unwrap();
        assert_eq!(acq.state(), AcquisitionState::Capturing { block: 0 });
        assert_eq!(acq.storage().finalized.len(), 1);
        assert_eq!(acq.storage().finalized[0].len(), 3);
        assert!(acq.storage().finalized[0].is_closed());

        acq.step().unwrap();
        let unit = acq.active_unit().unwrap();
        assert_eq!(unit.name(), "unit2");
        assert_eq!(unit.len(), 1);
        assert_eq!(acq.state(), AcquisitionState::Capturing { block: 1 });
        assert_eq!(acq.summary().blocks, 4);
        assert_eq!(acq.summary().units, 2);
    }

    #[test]
    fn test_stop_finalizes_active_unit() {
        let mut acq = make_loop(MockAnalyzer::new([1, 1]), 1, 3);
        step_until(&mut acq, AcquisitionState::WaitingFirstAverage);
        acq.step().unwrap();

        let summary = acq.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(summary.blocks, 1);
        assert!(acq.active_unit().is_none());
        assert_eq!(acq.storage().finalized.len(), 1);
        assert_eq!(acq.storage().finalized[0].len(), 1);
    }

    #[test]
    fn test_run_until_script_exhausted() {
        let analyzer = MockAnalyzer::new([1; 7]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);

        let summary = acq.run(&stop).unwrap();
        assert_eq!(summary.blocks, 7);
        assert_eq!(summary.units, 3);

        let finalized = &acq.storage().finalized;
        let lens: Vec<usize> = finalized.iter().map(|u| u.len()).collect();
        assert_eq!(lens, vec![3, 3, 1]);
    }

    #[test]
    fn test_timeouts_retried_then_fatal() {
        let timeout = || {
            Err(ScpiError::Timeout {
                waited: Duration::from_secs(1),
            })
        };

        let mut analyzer = MockAnalyzer::new([]);
        analyzer.averages = VecDeque::from(vec![Ok(1), timeout(), Ok(1)]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);
        let summary = acq.run(&stop).unwrap();
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.blocks, 2);
        assert_eq!(acq.analyzer().count("discard"), 1);

        let mut analyzer = MockAnalyzer::new([]);
        analyzer.averages = VecDeque::from(vec![Ok(1), timeout(), timeout(), timeout()]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);
        let err = acq.run(&stop).unwrap_err();
        assert!(matches!(err, AcquisitionError::TooManyTimeouts(3)));
        assert_eq!(acq.storage().finalized.len(), 1);
        assert_eq!(acq.storage().finalized[0].len(), 1);
    }

    #[test]
    fn test_failed_restart_keeps_stored_block() {
        let mut analyzer = MockAnalyzer::new([1, 1, 1]);
        analyzer.restarts = VecDeque::from(vec![Err(ScpiError::Timeout {
            waited: Duration::from_secs(1),
        })]);
        analyzer.port1_levels = VecDeque::from(vec![-71.0, -72.0, -73.0]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);

        let summary = acq.run(&stop).unwrap();
        assert_eq!(summary.blocks, 3);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.discarded_cycles, 0);

        let first = &acq.storage().finalized[0];
        assert_eq!(first.len(), 3);
        let port1 = first.port_dbm(Port::One);
        assert_eq!(port1.column(0).to_vec(), vec![-71.0, -72.0, -73.0]);

        // Only the restart is repeated; no extra trace fetch in between
        let calls = &acq.analyzer().calls;
        let failed = calls.iter().position(|c| c == "restart 1").unwrap();
        assert_eq!(calls[failed + 1], "discard");
        assert_eq!(calls[failed + 2], "restart 1");
        assert_eq!(calls[failed + 3], "poll");
        assert_eq!(acq.analyzer().count("trace PORT1"), 3);
    }

    #[test]
    fn test_malformed_trace_discards_cycle() {
        let mut analyzer = MockAnalyzer::new([]);
        analyzer.averages = VecDeque::from(vec![Ok(1), Ok(1), Ok(1)]);
        analyzer.traces = VecDeque::from(vec![
            // axis fetch doubles as the first port 1 capture
            Ok(vec![PowerSample {
                frequency: 1e6,
                dbm: -70.0,
            }]),
            Ok(vec![PowerSample {
                frequency: 1e6,
                dbm: -71.0,
            }]),
            Err(ScpiError::MalformedTrace { count: 3, arity: 2 }),
        ]);
        analyzer.bins = 1;
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);

        let summary = acq.run(&stop).unwrap();
        assert_eq!(summary.discarded_cycles, 1);
        assert_eq!(summary.blocks, 2);
        // one restart per captured block plus one for the discarded cycle
        assert_eq!(acq.analyzer().count("restart 1"), 3);
        let unit = &acq.storage().finalized[0];
        assert_eq!(unit.len(), 2);
        assert_eq!(unit.port_dbm(Port::One)[[0, 0]], -70.0);
        assert_eq!(unit.port_dbm(Port::Two)[[0, 0]], -71.0);
    }

    #[test]
    fn test_protocol_error_is_fatal_and_finalizes() {
        let mut analyzer = MockAnalyzer::new([]);
        analyzer.averages = VecDeque::from(vec![
            Ok(1),
            Err(ScpiError::Protocol {
                response: "ERROR".to_string(),
            }),
        ]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);

        let err = acq.run(&stop).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Instrument(ScpiError::Protocol { .. })
        ));
        assert_eq!(acq.storage().finalized.len(), 1);
    }

    #[test]
    fn test_storage_create_failure_is_fatal() {
        let analyzer = MockAnalyzer::new([1, 1]);
        let stop = analyzer.stop.clone();
        let storage = MemoryStorage {
            fail_create: true,
            ..Default::default()
        };
        let mut acq = AcquisitionLoop::new(analyzer, storage, test_config(1, 3)).unwrap();

        let err = acq.run(&stop).unwrap_err();
        assert!(matches!(err, AcquisitionError::Storage(StorageError::Io { .. })));
        assert_eq!(acq.analyzer().count("restart 1"), 0);
    }

    #[test]
    fn test_axis_change_starts_new_unit() {
        let mut analyzer = MockAnalyzer::new([1, 1]);
        analyzer.traces = VecDeque::from(vec![
            Ok(vec![PowerSample {
                frequency: 1e6,
                dbm: -70.0,
            }]),
            Ok(vec![PowerSample {
                frequency: 1e6,
                dbm: -70.0,
            }]),
        ]);
        let stop = analyzer.stop.clone();
        let mut acq = make_loop(analyzer, 1, 3);

        acq.run(&stop).unwrap();
        let finalized = &acq.storage().finalized;
        assert_eq!(finalized.len(), 2);
        assert_eq!(finalized[0].bins(), 1);
        assert_eq!(finalized[1].bins(), 4);
        assert_eq!(finalized[1].len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AcquisitionConfig {
            blocks_per_unit: 0,
            ..Default::default()
        };
        let result = AcquisitionLoop::new(MockAnalyzer::new([]), MemoryStorage::default(), config);
        assert!(matches!(result, Err(AcquisitionError::Config(_))));
    }
}
