use std::path::PathBuf;
use thiserror::Error;

/// Configuration-time misuse. Everything else (short blocks, empty spectra,
/// mismatched frames) is recovered locally by the analyzer and detectors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("FFT size {0} is not a power of two (supported: 64..=8192)")]
    InvalidFftSize(usize),

    #[error("decibel range is empty: min {min} dB must be below max {max} dB")]
    InvalidDecibelRange { min: f32, max: f32 },

    #[error("{name} band {low}-{high} Hz is empty")]
    EmptyBand { name: &'static str, low: f32, high: f32 },

    #[error("failed to read config {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
