use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::onset::{HighFrequencyContentDetector, OnsetAlgorithm, OnsetDetector, SpectralFluxDetector};
use super::{bin_range, mean_square_normalized};
use crate::config::{AnalysisConfig, BandRange, BeatConfig};
use crate::error::ConfigError;

/// Absorbs float rounding in the threshold test so a perfectly steady
/// signal never registers as a beat.
const THRESHOLD_TOLERANCE: f64 = 1e-9;

/// Running statistics for one frequency band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergyState {
    pub current: f32,
    /// Exponential moving average of `current`.
    pub average: f32,
    /// Exponential moving average of the squared deviation from `average`.
    pub variance: f32,
}

impl BandEnergyState {
    fn update(&mut self, current: f32, alpha: f32) {
        self.current = current;
        self.average = (1.0 - alpha) * self.average + alpha * current;
        self.variance = (1.0 - alpha) * self.variance + alpha * (current - self.average).powi(2);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBands {
    pub low: BandEnergyState,
    pub mid: BandEnergyState,
    pub high: BandEnergyState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub detected: bool,
    pub intensity: f32,
    /// `intensity` relative to the strongest beat seen so far, 0-1.
    pub normalized_intensity: f32,
    pub bands: EnergyBands,
    /// Milliseconds, as passed by the caller.
    pub timestamp: f64,
    pub energy: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectorStatus {
    pub history_len: usize,
    pub average_energy: f32,
    pub energy_variance: f32,
    pub beat_intensity: f32,
    pub max_beat_intensity: f32,
    pub last_beat_time: f64,
    pub bands: EnergyBands,
}

/// Energy-based beat detector with an adaptive threshold.
///
/// Each call pushes the mean squared energy of the lowest `energy_bins` bins
/// into a bounded history and reports a beat when the energy clears
/// `mean + stddev * energy_threshold` of that history. Per-band (low, mid,
/// high) averages are tracked alongside for the presentation layer.
///
/// The spectral-flux and high-frequency-content alternatives live on the
/// same object for convenience but keep their own state.
pub struct BeatDetector {
    config: BeatConfig,
    bin_width: f32,
    energy_history: VecDeque<f32>,
    bands: EnergyBands,
    beat_intensity: f32,
    max_beat_intensity: f32,
    last_beat_time: f64,
    flux: SpectralFluxDetector,
    hfc: HighFrequencyContentDetector,
}

impl BeatDetector {
    pub fn new(config: BeatConfig, analysis: &AnalysisConfig) -> Result<Self, ConfigError> {
        let analysis = analysis.clone().validated()?;
        let config = config.validated(analysis.nyquist())?;

        debug!(
            "Beat detector: threshold {:.2}, min gap {} ms, history {}",
            config.energy_threshold,
            config.min_time_between_beats,
            config.history_size
        );

        Ok(Self {
            bin_width: analysis.bin_width(),
            energy_history: VecDeque::with_capacity(config.history_size),
            bands: EnergyBands::default(),
            beat_intensity: 0.0,
            max_beat_intensity: 0.0,
            last_beat_time: 0.0,
            flux: SpectralFluxDetector::new(&config),
            hfc: HighFrequencyContentDetector::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    /// Run the energy detector over one frame of 0-255 frequency data.
    pub fn detect_beat(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        if frequency_data.is_empty() {
            self.beat_intensity *= self.config.beat_decay;
            return self.event(false, timestamp, 0.0);
        }

        self.update_bands(frequency_data);

        let energy_bins = self.config.energy_bins.min(frequency_data.len());
        let energy = mean_square_normalized(&frequency_data[..energy_bins]);

        self.energy_history.push_back(energy);
        while self.energy_history.len() > self.config.history_size {
            self.energy_history.pop_front();
        }

        let (mean, variance) = self.history_stats();
        if self.check_beat_conditions(energy, mean, variance, timestamp) {
            let intensity = if mean > 0.0 {
                ((energy as f64 / mean - 1.0) as f32).clamp(0.0, self.config.max_intensity)
            } else {
                0.0
            };
            self.last_beat_time = timestamp;
            self.beat_intensity = intensity;
            self.max_beat_intensity = self.max_beat_intensity.max(intensity);

            trace!("Beat at {:.0} ms: energy {:.4}, intensity {:.2}", timestamp, energy, intensity);
            self.event(true, timestamp, energy)
        } else {
            self.beat_intensity *= self.config.beat_decay;
            self.event(false, timestamp, energy)
        }
    }

    /// Spectral-flux onset detection; independent of the energy history.
    pub fn detect_spectral_flux(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        self.flux.detect(frequency_data, timestamp)
    }

    /// High-frequency-content onset detection; independent of the energy history.
    pub fn detect_hfc(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        self.hfc.detect(frequency_data, timestamp)
    }

    pub fn get_status(&self) -> DetectorStatus {
        let (mean, variance) = self.history_stats();
        DetectorStatus {
            history_len: self.energy_history.len(),
            average_energy: mean as f32,
            energy_variance: variance as f32,
            beat_intensity: self.beat_intensity,
            max_beat_intensity: self.max_beat_intensity,
            last_beat_time: self.last_beat_time,
            bands: self.bands,
        }
    }

    /// Clear all history, band statistics and beat bookkeeping.
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.bands = EnergyBands::default();
        self.beat_intensity = 0.0;
        self.max_beat_intensity = 0.0;
        self.last_beat_time = 0.0;
        self.flux.reset();
        self.hfc.reset();
    }

    fn check_beat_conditions(&self, energy: f32, mean: f64, variance: f64, timestamp: f64) -> bool {
        if timestamp - self.last_beat_time < self.config.min_time_between_beats {
            return false;
        }
        if self.energy_history.len() < self.config.min_history {
            return false;
        }
        let threshold = mean + variance.sqrt() * self.config.energy_threshold as f64;
        energy as f64 > threshold + THRESHOLD_TOLERANCE
    }

    fn update_bands(&mut self, frequency_data: &[f32]) {
        let alpha = self.config.band_alpha;
        let band_energy = |band: BandRange| {
            let range = bin_range(band.low, band.high, self.bin_width, frequency_data.len());
            mean_square_normalized(&frequency_data[range])
        };

        let low = band_energy(self.config.low_band);
        let mid = band_energy(self.config.mid_band);
        let high = band_energy(self.config.high_band);

        self.bands.low.update(low, alpha);
        self.bands.mid.update(mid, alpha);
        self.bands.high.update(high, alpha);
    }

    /// Population mean and variance of the energy history.
    fn history_stats(&self) -> (f64, f64) {
        if self.energy_history.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.energy_history.len() as f64;
        let mean = self.energy_history.iter().map(|&e| e as f64).sum::<f64>() / n;
        let variance = self
            .energy_history
            .iter()
            .map(|&e| (e as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean, variance)
    }

    fn event(&self, detected: bool, timestamp: f64, energy: f32) -> BeatEvent {
        let normalized_intensity = if self.max_beat_intensity > 0.0 {
            (self.beat_intensity / self.max_beat_intensity).clamp(0.0, 1.0)
        } else {
            0.0
        };
        BeatEvent {
            detected,
            intensity: self.beat_intensity,
            normalized_intensity,
            bands: self.bands,
            timestamp,
            energy,
        }
    }
}

impl OnsetDetector for BeatDetector {
    fn detect(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        self.detect_beat(frequency_data, timestamp)
    }

    fn reset(&mut self) {
        BeatDetector::reset(self);
    }

    fn algorithm(&self) -> OnsetAlgorithm {
        OnsetAlgorithm::Energy
    }
}
