//! Storage units for captured spectra.
//!
//! A [`StorageUnit`] holds a run of capture blocks that share one frequency axis
//! and one set of instrument settings. Units are created, flushed after every
//! append and finalized through a [`StorageBackend`]; [`JsonStorage`] persists
//! each unit as one JSON file in an output directory.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use ndarray::{s, Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::acquisition::config::AcquisitionConfig;
use crate::librevna::{Detector, Port, Window};

/// Ports stored per block
pub const PORT_COUNT: usize = 2;

/// File name prefix for storage units
pub const UNIT_PREFIX: &str = "spc_";

/// File extension for storage units
pub const UNIT_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Block has {actual} bins but the unit frequency axis has {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Storage unit {0} is finalized")]
    Closed(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Instrument settings shared by every block of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub start_hz: f64,
    pub stop_hz: f64,
    pub rbw_hz: f64,
    pub window: Window,
    pub detector: Detector,
    pub average_count: u32,
}

impl CaptureMetadata {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            start_hz: config.start_mhz * 1e6,
            stop_hz: config.stop_mhz * 1e6,
            rbw_hz: config.rbw_khz * 1e3,
            window: config.window,
            detector: config.detector,
            average_count: config.average_count,
        }
    }

    pub fn span_hz(&self) -> f64 {
        self.stop_hz - self.start_hz
    }
}

/// One averaged spectrum snapshot of both ports.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBlock {
    pub timestamp: DateTime<Utc>,
    /// Port 1 power per bin in dBm
    pub port1: Vec<f64>,
    /// Port 2 power per bin in dBm
    pub port2: Vec<f64>,
    pub lo_temperature: f64,
    pub cpu_temperature: f64,
}

/// A rotating container of capture blocks.
///
/// Power is held as a `blocks x bins x ports` array whose first axis starts at
/// the requested capacity and grows when a block lands past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageUnit {
    name: String,
    capacity: usize,
    metadata: CaptureMetadata,
    frequency: Array1<f64>,
    dbm: Array3<f64>,
    timestamp: Vec<Option<DateTime<Utc>>>,
    lo_temperature: Vec<f64>,
    cpu_temperature: Vec<f64>,
    blocks: usize,
    #[serde(skip)]
    closed: bool,
}

impl StorageUnit {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        frequencies: Vec<f64>,
        metadata: CaptureMetadata,
    ) -> Self {
        let bins = frequencies.len();
        Self {
            name: name.into(),
            capacity,
            metadata,
            frequency: Array1::from(frequencies),
            dbm: Array3::zeros((capacity, bins, PORT_COUNT)),
            timestamp: vec![None; capacity],
            lo_temperature: vec![0.0; capacity],
            cpu_temperature: vec![0.0; capacity],
            blocks: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block count the unit was sized for
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows currently allocated, at least `capacity`
    pub fn allocated(&self) -> usize {
        self.dbm.shape()[0]
    }

    /// Number of blocks written, one past the highest written index
    pub fn len(&self) -> usize {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    pub fn is_full(&self) -> bool {
        self.blocks >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    pub fn frequencies(&self) -> &Array1<f64> {
        &self.frequency
    }

    pub fn bins(&self) -> usize {
        self.frequency.len()
    }

    /// Store `block` at `index`, growing the unit if `index` is past its allocation.
    pub fn write_block(&mut self, index: usize, block: &CaptureBlock) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed(self.name.clone()));
        }
        let bins = self.bins();
        for trace in [&block.port1, &block.port2] {
            if trace.len() != bins {
                return Err(StorageError::ShapeMismatch {
                    expected: bins,
                    actual: trace.len(),
                });
            }
        }

        if index >= self.allocated() {
            self.grow(index + 1);
        }

        for (port, trace) in [&block.port1, &block.port2].into_iter().enumerate() {
            self.dbm
                .slice_mut(s![index, .., port])
                .assign(&Array1::from(trace.clone()));
        }
        self.timestamp[index] = Some(block.timestamp);
        self.lo_temperature[index] = block.lo_temperature;
        self.cpu_temperature[index] = block.cpu_temperature;
        self.blocks = self.blocks.max(index + 1);
        Ok(())
    }

    /// Append `block` after the last written one.
    pub fn push(&mut self, block: &CaptureBlock) -> StorageResult<()> {
        self.write_block(self.blocks, block)
    }

    fn grow(&mut self, rows: usize) {
        let old = self.allocated();
        debug!("Growing storage unit {} from {} to {} blocks", self.name, old, rows);

        let mut dbm = Array3::zeros((rows, self.bins(), PORT_COUNT));
        dbm.slice_mut(s![..old, .., ..]).assign(&self.dbm);
        self.dbm = dbm;
        self.timestamp.resize(rows, None);
        self.lo_temperature.resize(rows, 0.0);
        self.cpu_temperature.resize(rows, 0.0);
    }

    /// Written power for one port as a `blocks x bins` array.
    pub fn port_dbm(&self, port: Port) -> Array2<f64> {
        let column = usize::from(port.number() - 1);
        self.dbm.slice(s![..self.blocks, .., column]).to_owned()
    }

    pub fn timestamps(&self) -> &[Option<DateTime<Utc>>] {
        &self.timestamp[..self.blocks]
    }

    pub fn lo_temperatures(&self) -> &[f64] {
        &self.lo_temperature[..self.blocks]
    }

    pub fn cpu_temperatures(&self) -> &[f64] {
        &self.cpu_temperature[..self.blocks]
    }

    /// Mark the unit as finalized. Later writes fail with [`StorageError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Read a unit previously written by [`JsonStorage`].
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        let mut unit: Self = serde_json::from_str(&content)?;
        unit.closed = true;
        Ok(unit)
    }
}

/// Persistence collaborator for the acquisition loop.
pub trait StorageBackend {
    /// Open a new unit. Failure here halts acquisition.
    fn create(
        &mut self,
        capacity: usize,
        frequencies: Vec<f64>,
        metadata: CaptureMetadata,
    ) -> StorageResult<StorageUnit>;

    /// Persist the current contents of `unit` after an append.
    fn flush(&mut self, unit: &StorageUnit) -> StorageResult<()>;

    /// Close `unit` and persist it for the last time.
    fn finalize(&mut self, unit: StorageUnit) -> StorageResult<()>;
}

/// Stores each unit as `spc_YYYYMMDD-HHMMSS.json` in one directory.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    dir: PathBuf,
}

impl JsonStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `unit`
    pub fn path_of(&self, unit: &StorageUnit) -> PathBuf {
        self.dir.join(unit.name())
    }

    /// Create a fresh file for a new unit, suffixing the name when a unit was
    /// already started within the same second.
    fn create_file(&self) -> StorageResult<(String, std::fs::File)> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StorageError::io(&self.dir, e))?;

        let stem = format!("{UNIT_PREFIX}{}", Local::now().format("%Y%m%d-%H%M%S"));
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{stem}.{UNIT_EXTENSION}")
            } else {
                format!("{stem}_{attempt}.{UNIT_EXTENSION}")
            };
            let path = self.dir.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((name, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
    }

    fn write(&self, unit: &StorageUnit) -> StorageResult<()> {
        let path = self.path_of(unit);
        let json = serde_json::to_vec(unit)?;
        replace_file(&path, |file| file.write_all(&json))
    }
}

/// Replace `path` with the contents `fill` writes.
///
/// The data goes to a sibling temporary file that is synced and then renamed
/// over `path`, so a failure part way leaves the previous contents in place.
fn replace_file<F>(path: &Path, fill: F) -> StorageResult<()>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    fill(staged.as_file_mut())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| StorageError::io(staged.path(), e))?;
    staged
        .persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

impl StorageBackend for JsonStorage {
    fn create(
        &mut self,
        capacity: usize,
        frequencies: Vec<f64>,
        metadata: CaptureMetadata,
    ) -> StorageResult<StorageUnit> {
        let (name, mut file) = self.create_file()?;
        let unit = StorageUnit::new(name, capacity, frequencies, metadata);

        let path = self.path_of(&unit);
        let json = serde_json::to_vec(&unit)?;
        file.write_all(&json)
            .map_err(|e| StorageError::io(&path, e))?;

        info!("Creating storage unit {}", path.display());
        Ok(unit)
    }

    fn flush(&mut self, unit: &StorageUnit) -> StorageResult<()> {
        if unit.is_closed() {
            return Err(StorageError::Closed(unit.name().to_string()));
        }
        self.write(unit)
    }

    fn finalize(&mut self, mut unit: StorageUnit) -> StorageResult<()> {
        unit.close();
        self.write(&unit)?;
        info!(
            "Finalized storage unit {} with {} blocks",
            self.path_of(&unit).display(),
            unit.len()
        );
        Ok(())
    }
}
