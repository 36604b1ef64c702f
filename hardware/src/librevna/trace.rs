//! Parsers for the GUI's bracketed trace data responses.
//!
//! Trace queries return one flat, comma-separated list wrapped in brackets. The
//! grouping is implied by the query:
//!
//! - VNA traces are triples `[f0,re0,im0,f1,re1,im1,...]`
//! - Spectrum analyzer traces are pairs `[f0,dBm0,f1,dBm1,...]`

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::scpi::{ScpiError, ScpiResult};

/// One spectrum analyzer sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Frequency in Hz
    pub frequency: f64,
    /// Measured power in dBm
    pub dbm: f64,
}

/// One VNA sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexSample {
    /// Frequency in Hz
    pub frequency: f64,
    pub value: Complex64,
}

/// Parse VNA trace data into (frequency, complex) samples.
///
/// # Errors
///
/// [`ScpiError::MalformedTrace`] if the value count is not a multiple of three,
/// [`ScpiError::InvalidResponse`] if a value is not a number.
///
/// # Example
///
/// ```
/// use spectrum_hardware::librevna::parse_vna_trace;
///
/// let samples = parse_vna_trace("[1000000,0.5,-0.25]").unwrap();
/// assert_eq!(samples[0].frequency, 1e6);
/// assert_eq!(samples[0].value.im, -0.25);
/// ```
pub fn parse_vna_trace(data: &str) -> ScpiResult<Vec<ComplexSample>> {
    let values = split_values(data, 3)?;
    Ok(values
        .chunks_exact(3)
        .map(|v| ComplexSample {
            frequency: v[0],
            value: Complex64::new(v[1], v[2]),
        })
        .collect())
}

/// Parse spectrum analyzer trace data into (frequency, dBm) samples.
///
/// # Errors
///
/// [`ScpiError::MalformedTrace`] if the value count is odd,
/// [`ScpiError::InvalidResponse`] if a value is not a number.
pub fn parse_sa_trace(data: &str) -> ScpiResult<Vec<PowerSample>> {
    let values = split_values(data, 2)?;
    Ok(values
        .chunks_exact(2)
        .map(|v| PowerSample {
            frequency: v[0],
            dbm: v[1],
        })
        .collect())
}

/// Strip brackets, split on commas and check the count against `arity`.
fn split_values(data: &str, arity: usize) -> ScpiResult<Vec<f64>> {
    let stripped: String = data.chars().filter(|&c| c != '[' && c != ']').collect();
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return Ok(Vec::new());
    }

    let fields: Vec<&str> = stripped.split(',').collect();
    if fields.len() % arity != 0 {
        return Err(ScpiError::MalformedTrace {
            count: fields.len(),
            arity,
        });
    }

    fields
        .iter()
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                ScpiError::InvalidResponse(format!("invalid number in trace data: {field:?}"))
            })
        })
        .collect()
}

/// Split samples into separate frequency and power vectors.
pub fn split_power_samples(samples: &[PowerSample]) -> (Vec<f64>, Vec<f64>) {
    samples.iter().map(|s| (s.frequency, s.dbm)).unzip()
}
