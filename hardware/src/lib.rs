//! LibreVNA spectrum analyzer control and continuous spectrum capture.
//!
//! The instrument is driven through the LibreVNA-GUI, which exposes a
//! line-oriented SCPI server on a local TCP port. This crate provides:
//!
//! - `librevna` - buffered stream reader, command/query dispatcher, trace
//!   parsers and the typed [`LibreVna`] facade
//! - `sa_interface` - the [`SpectrumAnalyzer`] trait the capture loop is written against
//! - `acquisition` - configuration, the capture state machine and rotating
//!   storage units, plus an archive reader for captured files
//! - `gui` - launching the GUI process before connecting
//!
//! # Features
//!
//! - `hardware-tests` - tests that need a running LibreVNA-GUI with an instrument attached

pub mod acquisition;
pub mod gui;
pub mod librevna;
pub mod sa_interface;

pub use acquisition::{AcquisitionConfig, AcquisitionError, AcquisitionLoop, AcquisitionState};
pub use librevna::{LibreVna, ScpiDevice, ScpiError, ScpiResult};
pub use sa_interface::SpectrumAnalyzer;
