//! LibreVNA driver via the LibreVNA-GUI SCPI server.
mod analyzer;
#[cfg(test)]
pub(crate) mod mock;
mod scpi;
mod stream;
mod trace;

pub use analyzer::{
    DeviceInfo, Detector, DeviceMode, Lenient, LibreVna, Port, ReferenceInput, Temperatures,
    TraceType, Window, DEFAULT_SETTLE,
};
pub use scpi::{
    parse_bool, parse_f64, parse_i64, ScpiDevice, ScpiError, ScpiResult, DEFAULT_HOST,
    DEFAULT_PORT,
};
pub use stream::{StreamReader, DEFAULT_READ_TIMEOUT};
pub use trace::{
    parse_sa_trace, parse_vna_trace, split_power_samples, ComplexSample, PowerSample,
};
