use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::beat_detector::{BeatDetector, BeatEvent};
use crate::config::{AnalysisConfig, BeatConfig};
use crate::error::ConfigError;

/// Common interface over the onset strategies so the render loop can swap
/// them without caring which history each one keeps.
pub trait OnsetDetector {
    /// Inspect one frame of 0-255 frequency data taken at `timestamp` ms.
    fn detect(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent;

    fn reset(&mut self);

    fn algorithm(&self) -> OnsetAlgorithm;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetAlgorithm {
    #[default]
    Energy,
    #[serde(alias = "flux")]
    SpectralFlux,
    #[serde(alias = "hfc")]
    HighFrequencyContent,
}

impl OnsetAlgorithm {
    pub fn build(
        self,
        beat: &BeatConfig,
        analysis: &AnalysisConfig,
    ) -> Result<Box<dyn OnsetDetector + Send>, ConfigError> {
        let detector: Box<dyn OnsetDetector + Send> = match self {
            Self::Energy => Box::new(BeatDetector::new(beat.clone(), analysis)?),
            Self::SpectralFlux => Box::new(SpectralFluxDetector::new(beat)),
            Self::HighFrequencyContent => Box::new(HighFrequencyContentDetector::new(beat)),
        };
        info!("Onset detector: {}", self);
        Ok(detector)
    }
}

impl std::fmt::Display for OnsetAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Energy => "energy",
            Self::SpectralFlux => "spectral flux",
            Self::HighFrequencyContent => "high-frequency content",
        })
    }
}

impl std::str::FromStr for OnsetAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "energy" => Ok(Self::Energy),
            "spectral_flux" | "flux" => Ok(Self::SpectralFlux),
            "high_frequency_content" | "hfc" => Ok(Self::HighFrequencyContent),
            other => Err(format!("unknown onset algorithm '{}'", other)),
        }
    }
}

fn onset_event(detected: bool, strength: f32, peak: f32, timestamp: f64) -> BeatEvent {
    BeatEvent {
        detected,
        intensity: strength,
        normalized_intensity: if peak > 0.0 { (strength / peak).clamp(0.0, 1.0) } else { 0.0 },
        timestamp,
        energy: strength,
        ..BeatEvent::default()
    }
}

/// Onsets from the positive frame-to-frame change of the spectrum.
pub struct SpectralFluxDetector {
    threshold: f32,
    previous: Option<Vec<f32>>,
    peak_flux: f32,
}

impl SpectralFluxDetector {
    pub fn new(config: &BeatConfig) -> Self {
        Self {
            threshold: config.flux_threshold,
            previous: None,
            peak_flux: 0.0,
        }
    }

    /// Mean positive increase of normalized amplitude since `previous`, or
    /// `None` when the frames are not comparable.
    pub fn flux(previous: &[f32], current: &[f32]) -> Option<f32> {
        if current.is_empty() || previous.len() != current.len() {
            return None;
        }
        let rising: f32 = current
            .iter()
            .zip(previous)
            .map(|(&cur, &prev)| ((cur - prev) / 255.0).max(0.0))
            .sum();
        Some(rising / current.len() as f32)
    }
}

impl OnsetDetector for SpectralFluxDetector {
    fn detect(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        if frequency_data.is_empty() {
            return onset_event(false, 0.0, self.peak_flux, timestamp);
        }

        let flux = self
            .previous
            .as_deref()
            .and_then(|previous| Self::flux(previous, frequency_data));

        let len = frequency_data.len();
        if let Some(previous) = self.previous.as_mut().filter(|p| p.len() == len) {
            previous.copy_from_slice(frequency_data);
        } else {
            self.previous = Some(frequency_data.to_vec());
        }

        match flux {
            Some(flux) => {
                self.peak_flux = self.peak_flux.max(flux);
                onset_event(flux > self.threshold, flux, self.peak_flux, timestamp)
            }
            None => {
                debug!("Spectral flux skipped: no comparable previous frame");
                onset_event(false, 0.0, self.peak_flux, timestamp)
            }
        }
    }

    fn reset(&mut self) {
        self.previous = None;
        self.peak_flux = 0.0;
    }

    fn algorithm(&self) -> OnsetAlgorithm {
        OnsetAlgorithm::SpectralFlux
    }
}

/// Onsets from bin-index weighted energy, which favours percussive highs.
pub struct HighFrequencyContentDetector {
    ratio: f32,
    capacity: usize,
    history: VecDeque<f32>,
    peak_hfc: f32,
}

impl HighFrequencyContentDetector {
    pub fn new(config: &BeatConfig) -> Self {
        Self {
            ratio: config.hfc_ratio,
            capacity: config.hfc_history.max(1),
            history: VecDeque::with_capacity(config.hfc_history.max(1)),
            peak_hfc: 0.0,
        }
    }

    pub fn hfc(frequency_data: &[f32]) -> f32 {
        frequency_data
            .iter()
            .enumerate()
            .map(|(bin, &v)| (v / 255.0).powi(2) * bin as f32)
            .sum()
    }

    fn average(&self) -> Option<f32> {
        if self.history.is_empty() {
            None
        } else {
            Some(self.history.iter().sum::<f32>() / self.history.len() as f32)
        }
    }
}

impl OnsetDetector for HighFrequencyContentDetector {
    fn detect(&mut self, frequency_data: &[f32], timestamp: f64) -> BeatEvent {
        if frequency_data.is_empty() {
            return onset_event(false, 0.0, self.peak_hfc, timestamp);
        }

        let hfc = Self::hfc(frequency_data);
        let detected = self.average().is_some_and(|average| hfc > average * self.ratio);

        self.history.push_back(hfc);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.peak_hfc = self.peak_hfc.max(hfc);

        onset_event(detected, hfc, self.peak_hfc, timestamp)
    }

    fn reset(&mut self) {
        self.history.clear();
        self.peak_hfc = 0.0;
    }

    fn algorithm(&self) -> OnsetAlgorithm {
        OnsetAlgorithm::HighFrequencyContent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flux_needs_a_previous_frame() {
        let mut detector = SpectralFluxDetector::new(&BeatConfig::default());
        assert!(!detector.detect(&vec![255.0; 64], 0.0).detected);
        // Length mismatch: compared against nothing, then remembered.
        assert!(!detector.detect(&vec![0.0; 32], 16.0).detected);
        assert!(detector.detect(&vec![255.0; 32], 32.0).detected);
    }

    #[test]
    fn test_flux_ignores_falling_bins() {
        assert_eq!(SpectralFluxDetector::flux(&[255.0, 255.0], &[0.0, 0.0]), Some(0.0));
        let rising = SpectralFluxDetector::flux(&[0.0, 255.0], &[255.0, 0.0]).unwrap();
        assert!((rising - 0.5).abs() < 1e-6);
        assert_eq!(SpectralFluxDetector::flux(&[1.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_flux_threshold() {
        let mut detector = SpectralFluxDetector::new(&BeatConfig::default());
        detector.detect(&vec![100.0; 100], 0.0);
        // 0.08 mean rise, below 0.1
        let quiet = detector.detect(&vec![120.4; 100], 16.0);
        assert!(!quiet.detected);
        let loud = detector.detect(&vec![200.0; 100], 32.0);
        assert!(loud.detected);
        assert_eq!(loud.normalized_intensity, 1.0);
    }

    #[test]
    fn test_hfc_weights_high_bins() {
        let mut low = vec![0.0; 100];
        low[1] = 255.0;
        let mut high = vec![0.0; 100];
        high[90] = 255.0;
        assert!(HighFrequencyContentDetector::hfc(&high) > HighFrequencyContentDetector::hfc(&low));
        assert_eq!(HighFrequencyContentDetector::hfc(&[255.0]), 0.0);
    }

    #[test]
    fn test_hfc_against_rolling_average() {
        let mut detector = HighFrequencyContentDetector::new(&BeatConfig::default());
        let steady = vec![50.0; 128];
        assert!(!detector.detect(&steady, 0.0).detected);
        for i in 1..60 {
            assert!(!detector.detect(&steady, i as f64 * 16.0).detected);
        }
        assert_eq!(detector.history.len(), 50);

        let burst = vec![120.0; 128];
        assert!(detector.detect(&burst, 1000.0).detected);
    }

    #[test]
    fn test_reset_and_algorithm_tags() {
        let config = BeatConfig::default();
        let mut hfc = HighFrequencyContentDetector::new(&config);
        hfc.detect(&[10.0; 8], 0.0);
        hfc.reset();
        assert!(hfc.history.is_empty());
        assert_eq!(hfc.algorithm(), OnsetAlgorithm::HighFrequencyContent);
        assert_eq!(SpectralFluxDetector::new(&config).algorithm(), OnsetAlgorithm::SpectralFlux);
    }

    #[test]
    fn test_build_from_config() {
        let analysis = AnalysisConfig::default();
        for algorithm in [
            OnsetAlgorithm::Energy,
            OnsetAlgorithm::SpectralFlux,
            OnsetAlgorithm::HighFrequencyContent,
        ] {
            let detector = algorithm.build(&BeatConfig::default(), &analysis).unwrap();
            assert_eq!(detector.algorithm(), algorithm);
        }
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        assert_eq!(
            serde_json::from_str::<OnsetAlgorithm>("\"hfc\"").unwrap(),
            OnsetAlgorithm::HighFrequencyContent
        );
        assert!(serde_json::from_str::<OnsetAlgorithm>("\"autocorrelation\"").is_err());
        assert_eq!("Flux".parse::<OnsetAlgorithm>(), Ok(OnsetAlgorithm::SpectralFlux));
        assert!("autocorrelation".parse::<OnsetAlgorithm>().is_err());
    }
}
