//! Reading captured storage units back for analysis.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{concatenate, Array1, Array2, Axis};
use tracing::warn;

use super::storage::{CaptureMetadata, StorageError, StorageResult, StorageUnit, UNIT_EXTENSION};
use crate::librevna::Port;

/// List storage unit files in `dir`, sorted by name (and so by creation time).
pub fn locate_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(UNIT_EXTENSION)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// One port's captures from a sequence of storage units, joined along time.
#[derive(Debug, Clone)]
pub struct CaptureArchive {
    pub port: Port,
    /// Settings of the first unit read
    pub metadata: CaptureMetadata,
    pub frequency: Array1<f64>,
    /// `blocks x bins` power in dBm
    pub dbm: Array2<f64>,
    pub timestamp: Vec<Option<DateTime<Utc>>>,
    pub lo_temperature: Vec<f64>,
    pub cpu_temperature: Vec<f64>,
    /// Files that could not be read or did not match the first unit's axis
    pub skipped: Vec<PathBuf>,
}

impl CaptureArchive {
    /// Load `port` from every file in `files`.
    ///
    /// Unreadable files and files with a different bin count than the first
    /// readable one are logged and skipped. Returns `None` when nothing could
    /// be read.
    pub fn load(files: &[PathBuf], port: Port) -> Option<Self> {
        let mut archive: Option<Self> = None;
        let mut skipped = Vec::new();

        for file in files {
            let unit = match StorageUnit::load(file) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    skipped.push(file.clone());
                    continue;
                }
            };

            match archive.as_mut() {
                None => {
                    archive = Some(Self {
                        port,
                        metadata: unit.metadata().clone(),
                        frequency: unit.frequencies().clone(),
                        dbm: unit.port_dbm(port),
                        timestamp: unit.timestamps().to_vec(),
                        lo_temperature: unit.lo_temperatures().to_vec(),
                        cpu_temperature: unit.cpu_temperatures().to_vec(),
                        skipped: Vec::new(),
                    });
                }
                Some(existing) => {
                    if unit.bins() != existing.bins() {
                        warn!(
                            "Skipping {}: {} bins, expected {}",
                            file.display(),
                            unit.bins(),
                            existing.bins()
                        );
                        skipped.push(file.clone());
                        continue;
                    }
                    existing.append(&unit);
                }
            }
        }

        archive.map(|mut a| {
            a.skipped = skipped;
            a
        })
    }

    /// Load every storage unit found in `dir`.
    pub fn load_dir(dir: &Path, port: Port) -> StorageResult<Option<Self>> {
        let files = locate_files(dir)?;
        Ok(Self::load(&files, port))
    }

    fn append(&mut self, unit: &StorageUnit) {
        let dbm = unit.port_dbm(self.port);
        // Bin counts were checked by the caller, so shapes agree on axis 1.
        if let Ok(joined) = concatenate(Axis(0), &[self.dbm.view(), dbm.view()]) {
            self.dbm = joined;
            self.timestamp.extend_from_slice(unit.timestamps());
            self.lo_temperature.extend_from_slice(unit.lo_temperatures());
            self.cpu_temperature.extend_from_slice(unit.cpu_temperatures());
        }
    }

    pub fn blocks(&self) -> usize {
        self.dbm.nrows()
    }

    pub fn bins(&self) -> usize {
        self.frequency.len()
    }

    /// Power averaged over all blocks, one value per bin.
    pub fn mean_spectrum(&self) -> Option<Array1<f64>> {
        self.dbm.mean_axis(Axis(0))
    }

    /// Hours elapsed since the first block, per block.
    pub fn elapsed_hours(&self) -> Vec<Option<f64>> {
        let first = self.timestamp.iter().flatten().next().copied();
        self.timestamp
            .iter()
            .map(|ts| match (first, ts) {
                (Some(first), Some(ts)) => {
                    Some((*ts - first).num_milliseconds() as f64 / 3_600_000.0)
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::config::AcquisitionConfig;
    use crate::acquisition::storage::{CaptureBlock, JsonStorage, StorageBackend};
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn write_unit(storage: &mut JsonStorage, bins: usize, levels: &[f64]) -> PathBuf {
        let meta = CaptureMetadata::from_config(&AcquisitionConfig::default());
        let freqs: Vec<f64> = (0..bins).map(|i| 1e6 * (i + 1) as f64).collect();
        let mut unit = storage.create(levels.len(), freqs, meta).unwrap();
        let start = Utc::now();
        for (i, &level) in levels.iter().enumerate() {
            unit.push(&CaptureBlock {
                timestamp: start + Duration::minutes(30 * i as i64),
                port1: vec![level; bins],
                port2: vec![level * 2.0; bins],
                lo_temperature: 40.0,
                cpu_temperature: 50.0,
            })
            .unwrap();
        }
        let path = storage.path_of(&unit);
        storage.finalize(unit).unwrap();
        path
    }

    #[test]
    fn test_locate_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spc_b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("spc_a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = locate_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["spc_a.json", "spc_b.json"]);
    }

    #[test]
    fn test_missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_concatenates_units_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path());
        let first = write_unit(&mut storage, 4, &[-80.0, -70.0]);
        let second = write_unit(&mut storage, 4, &[-60.0]);

        let archive = CaptureArchive::load(&[first, second], Port::One).unwrap();
        assert_eq!(archive.blocks(), 3);
        assert_eq!(archive.bins(), 4);
        assert_relative_eq!(archive.dbm[[2, 0]], -60.0);
        assert_eq!(archive.timestamp.len(), 3);
        assert!(archive.skipped.is_empty());

        let mean = archive.mean_spectrum().unwrap();
        assert_relative_eq!(mean[0], -70.0);
    }

    #[test]
    fn test_port_two_selected() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path());
        let file = write_unit(&mut storage, 2, &[-40.0]);

        let archive = CaptureArchive::load(&[file], Port::Two).unwrap();
        assert_relative_eq!(archive.dbm[[0, 1]], -80.0);
    }

    #[test]
    fn test_bad_and_mismatched_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path());
        let good = write_unit(&mut storage, 3, &[-50.0]);
        let other_axis = write_unit(&mut storage, 5, &[-50.0]);
        let corrupt = dir.path().join("spc_corrupt.json");
        std::fs::write(&corrupt, "not json").unwrap();

        let archive =
            CaptureArchive::load(&[good, corrupt.clone(), other_axis.clone()], Port::One).unwrap();
        assert_eq!(archive.blocks(), 1);
        assert_eq!(archive.skipped, vec![corrupt, other_axis]);
    }

    #[test]
    fn test_elapsed_hours() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path());
        let file = write_unit(&mut storage, 1, &[-1.0, -2.0, -3.0]);

        let archive = CaptureArchive::load(&[file], Port::One).unwrap();
        let hours: Vec<f64> = archive.elapsed_hours().into_iter().flatten().collect();
        assert_eq!(hours.len(), 3);
        assert_relative_eq!(hours[0], 0.0);
        assert_relative_eq!(hours[2], 1.0);
    }

    #[test]
    fn test_nothing_readable() {
        assert!(CaptureArchive::load(&[], Port::One).is_none());
    }
}
