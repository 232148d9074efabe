use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audio::onset::OnsetAlgorithm;
use crate::audio::window::WindowKind;
use crate::error::ConfigError;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MIN_FFT_SIZE: usize = 64;
pub const MAX_FFT_SIZE: usize = 8192;

/// Top-level options for one visualizer session.
///
/// Every field has a default, so a partial JSON file (or none at all) is
/// valid. Call [`VisualizerConfig::validated`] before handing the config to
/// the analyzer or detector: numeric options are clamped into range there and
/// the few structural problems are reported as [`ConfigError`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub analysis: AnalysisConfig,
    pub beat: BeatConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    #[serde(alias = "buffer_size")]
    pub fft_size: usize,
    pub window_function: WindowKind,
    pub smoothing_factor: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub mel_filters: usize,
    pub rolloff_percent: f32,
}

/// Frequency range in Hz, `low` inclusive and `high` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandRange {
    pub low: f32,
    pub high: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub algorithm: OnsetAlgorithm,
    pub energy_threshold: f32,
    /// Milliseconds.
    pub min_time_between_beats: f64,
    pub history_size: usize,
    pub min_history: usize,
    pub band_alpha: f32,
    pub beat_decay: f32,
    pub max_intensity: f32,
    pub energy_bins: usize,
    pub low_band: BandRange,
    pub mid_band: BandRange,
    pub high_band: BandRange,
    pub flux_threshold: f32,
    pub hfc_history: usize,
    pub hfc_ratio: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub target_fps: u32,
    pub idle_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            fft_size: 1024,
            window_function: WindowKind::Hann,
            smoothing_factor: 0.8,
            // Relative to a bin magnitude of 1.0; a full-scale Hann-windowed
            // sine at 1024 points peaks near +48 dB.
            min_decibels: -60.0,
            max_decibels: 60.0,
            mel_filters: 26,
            rolloff_percent: 0.85,
        }
    }
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            algorithm: OnsetAlgorithm::Energy,
            energy_threshold: 1.3,
            min_time_between_beats: 100.0,
            history_size: 100,
            min_history: 10,
            band_alpha: 0.05,
            beat_decay: 0.95,
            max_intensity: 5.0,
            energy_bins: 256,
            low_band: BandRange { low: 20.0, high: 250.0 },
            mid_band: BandRange { low: 250.0, high: 4000.0 },
            high_band: BandRange { low: 4000.0, high: 20000.0 },
            flux_threshold: 0.1,
            hfc_history: 50,
            hfc_ratio: 1.5,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            idle_timeout_ms: 500,
            channel_capacity: 32,
        }
    }
}

impl VisualizerConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        let analysis = self.analysis.validated()?;
        let beat = self.beat.validated(analysis.nyquist())?;
        Ok(Self {
            analysis,
            beat,
            render: self.render.validated(),
        })
    }
}

impl AnalysisConfig {
    pub fn validated(self) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sample_rate = self.sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        if sample_rate != self.sample_rate {
            warn!("sample_rate {} clamped to {}", self.sample_rate, sample_rate);
        }

        if !self.fft_size.is_power_of_two() {
            return Err(ConfigError::InvalidFftSize(self.fft_size));
        }
        let fft_size = self.fft_size.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);
        if fft_size != self.fft_size {
            warn!("fft_size {} clamped to {}", self.fft_size, fft_size);
        }

        let min_decibels = finite_or("min_decibels", self.min_decibels, defaults.min_decibels);
        let max_decibels = finite_or("max_decibels", self.max_decibels, defaults.max_decibels);
        if min_decibels >= max_decibels {
            return Err(ConfigError::InvalidDecibelRange {
                min: min_decibels,
                max: max_decibels,
            });
        }

        Ok(Self {
            sample_rate,
            fft_size,
            window_function: self.window_function,
            smoothing_factor: clamp_f32(
                "smoothing_factor",
                self.smoothing_factor,
                0.0,
                1.0,
                defaults.smoothing_factor,
            ),
            min_decibels,
            max_decibels,
            mel_filters: clamp_usize("mel_filters", self.mel_filters, 1, 128),
            rolloff_percent: clamp_f32(
                "rolloff_percent",
                self.rolloff_percent,
                0.5,
                0.99,
                defaults.rolloff_percent,
            ),
        })
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Width of one FFT bin in Hz.
    pub fn bin_width(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }
}

impl BeatConfig {
    pub fn validated(self, nyquist: f32) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let history_size = clamp_usize("history_size", self.history_size, 10, 1000);

        let min_time_between_beats = if self.min_time_between_beats.is_finite() {
            self.min_time_between_beats.clamp(50.0, 1000.0)
        } else {
            defaults.min_time_between_beats
        };
        if min_time_between_beats != self.min_time_between_beats {
            warn!(
                "min_time_between_beats {} clamped to {}",
                self.min_time_between_beats,
                min_time_between_beats
            );
        }

        Ok(Self {
            algorithm: self.algorithm,
            energy_threshold: clamp_f32(
                "energy_threshold",
                self.energy_threshold,
                0.1,
                3.0,
                defaults.energy_threshold,
            ),
            min_time_between_beats,
            history_size,
            min_history: clamp_usize("min_history", self.min_history, 1, history_size),
            band_alpha: clamp_f32("band_alpha", self.band_alpha, 0.001, 1.0, defaults.band_alpha),
            beat_decay: clamp_f32("beat_decay", self.beat_decay, 0.0, 1.0, defaults.beat_decay),
            max_intensity: clamp_f32(
                "max_intensity",
                self.max_intensity,
                0.1,
                100.0,
                defaults.max_intensity,
            ),
            energy_bins: clamp_usize("energy_bins", self.energy_bins, 1, MAX_FFT_SIZE / 2),
            low_band: validate_band("low", self.low_band, nyquist)?,
            mid_band: validate_band("mid", self.mid_band, nyquist)?,
            high_band: validate_band("high", self.high_band, nyquist)?,
            flux_threshold: clamp_f32(
                "flux_threshold",
                self.flux_threshold,
                0.0,
                10.0,
                defaults.flux_threshold,
            ),
            hfc_history: clamp_usize("hfc_history", self.hfc_history, 1, 1000),
            hfc_ratio: clamp_f32("hfc_ratio", self.hfc_ratio, 1.0, 10.0, defaults.hfc_ratio),
        })
    }
}

impl RenderConfig {
    pub fn validated(self) -> Self {
        let target_fps = self.target_fps.clamp(1, 240);
        if target_fps != self.target_fps {
            warn!("target_fps {} clamped to {}", self.target_fps, target_fps);
        }
        let idle_timeout_ms = self.idle_timeout_ms.min(60_000);
        if idle_timeout_ms != self.idle_timeout_ms {
            warn!("idle_timeout_ms {} clamped to {}", self.idle_timeout_ms, idle_timeout_ms);
        }
        Self {
            target_fps,
            idle_timeout_ms,
            channel_capacity: clamp_usize("channel_capacity", self.channel_capacity, 1, 1024),
        }
    }
}

/// Read a JSON config file and validate it.
pub fn load_config(path: &Path) -> Result<VisualizerConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: VisualizerConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validated()
}

fn validate_band(name: &'static str, band: BandRange, nyquist: f32) -> Result<BandRange, ConfigError> {
    if !(band.low < band.high) {
        return Err(ConfigError::EmptyBand {
            name,
            low: band.low,
            high: band.high,
        });
    }
    let low = band.low.clamp(0.0, nyquist);
    let high = if band.high.is_finite() { band.high.clamp(0.0, nyquist) } else { nyquist };
    if low >= high {
        warn!(
            "{} band {}-{} Hz lies above Nyquist ({} Hz) and will read as silent",
            name,
            band.low,
            band.high,
            nyquist
        );
    } else if low != band.low || high != band.high {
        debug!("{} band {}-{} Hz clamped to {}-{} Hz", name, band.low, band.high, low, high);
    }
    Ok(BandRange { low, high })
}

fn finite_or(name: &str, value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!("{} is not finite, using {}", name, fallback);
        fallback
    }
}

fn clamp_f32(name: &str, value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    let clamped = finite_or(name, value, fallback).clamp(min, max);
    if clamped != value && value.is_finite() {
        warn!("{} {} clamped to {}", name, value, clamped);
    }
    clamped
}

fn clamp_usize(name: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{} {} clamped to {}", name, value, clamped);
    }
    clamped
}
