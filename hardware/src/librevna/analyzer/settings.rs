//! Typed instrument settings for the spectrum analyzer.
//!
//! Each enum is closed over the values the GUI accepts. String input from users
//! is parsed leniently through [`Window::from_input`] and friends: unknown text
//! resolves to the setting's documented default and is reported as
//! [`Lenient::Unrecognized`] so callers can log or reject it.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::librevna::scpi::ScpiError;

/// Result of parsing user input permissively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lenient<T> {
    Recognized(T),
    /// Input that matched nothing; `fallback` is what will be used instead.
    Unrecognized { input: String, fallback: T },
}

impl<T: Copy> Lenient<T> {
    /// The value to send to the instrument.
    pub fn value(&self) -> T {
        match self {
            Lenient::Recognized(v) => *v,
            Lenient::Unrecognized { fallback, .. } => *fallback,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Lenient::Recognized(_))
    }
}

fn lenient<T>(input: &str, fallback: T) -> Lenient<T>
where
    T: std::str::FromStr,
{
    match input.trim().parse() {
        Ok(v) => Lenient::Recognized(v),
        Err(_) => Lenient::Unrecognized {
            input: input.to_string(),
            fallback,
        },
    }
}

/// FFT window applied by the spectrum analyzer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Window {
    #[strum(to_string = "KAISER")]
    Kaiser,
    #[strum(to_string = "HANN", serialize = "HANNING")]
    Hann,
    #[strum(to_string = "FLATTOP")]
    FlatTop,
    /// Rectangular (no window). Default for unrecognized input.
    #[default]
    #[strum(to_string = "NONE")]
    None,
}

impl Window {
    pub fn from_input(input: &str) -> Lenient<Self> {
        lenient(input, Self::default())
    }
}

/// Detector mode used to reduce each frequency bin to one value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Detector {
    #[strum(to_string = "+PEAK", serialize = "PEAK+")]
    #[serde(rename = "+PEAK")]
    PositivePeak,
    #[strum(to_string = "-PEAK", serialize = "PEAK-")]
    #[serde(rename = "-PEAK")]
    NegativePeak,
    /// Default for unrecognized input.
    #[default]
    #[strum(to_string = "NORMAL")]
    #[serde(rename = "NORMAL")]
    Normal,
    #[strum(to_string = "SAMPLE")]
    #[serde(rename = "SAMPLE")]
    Sample,
    #[strum(to_string = "AVERAGE", serialize = "AVG")]
    #[serde(rename = "AVERAGE")]
    Average,
}

impl Detector {
    pub fn from_input(input: &str) -> Lenient<Self> {
        lenient(input, Self::default())
    }
}

/// Operating mode of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum DeviceMode {
    #[strum(to_string = "VNA")]
    Vna,
    #[strum(to_string = "GEN", serialize = "SG")]
    Generator,
    #[strum(to_string = "SA")]
    SpectrumAnalyzer,
}

impl DeviceMode {
    /// Human-readable mode name.
    pub fn description(self) -> &'static str {
        match self {
            DeviceMode::Vna => "Vector Network Analyzer",
            DeviceMode::Generator => "Signal Generator",
            DeviceMode::SpectrumAnalyzer => "Spectrum Analyzer",
        }
    }
}

/// Source of the 10 MHz reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, AsRefStr, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum ReferenceInput {
    #[default]
    #[strum(to_string = "INT")]
    Internal,
    #[strum(to_string = "EXT")]
    External,
    #[strum(to_string = "AUTO")]
    Auto,
}

/// How a trace combines successive sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString, EnumIter)]
#[strum(ascii_case_insensitive)]
pub enum TraceType {
    #[strum(to_string = "OVERWRITE")]
    Overwrite,
    #[strum(to_string = "MAXHOLD")]
    MaxHold,
    #[strum(to_string = "MINHOLD")]
    MinHold,
}

/// Instrument RF port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Serialize, Deserialize)]
pub enum Port {
    One,
    Two,
}

impl Port {
    pub fn number(self) -> u8 {
        match self {
            Port::One => 1,
            Port::Two => 2,
        }
    }

    /// Wire name used by trace queries (`PORT1`, `PORT2`).
    pub fn trace_name(self) -> &'static str {
        match self {
            Port::One => "PORT1",
            Port::Two => "PORT2",
        }
    }
}

impl TryFrom<u8> for Port {
    type Error = ScpiError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Port::One),
            2 => Ok(Port::Two),
            other => Err(ScpiError::InvalidArgument(format!(
                "port must be 1 or 2, got {other}"
            ))),
        }
    }
}
