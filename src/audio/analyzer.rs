use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::fft::SpectralTransform;
use super::mel::MelFilterBank;
use super::window;
use super::{bin_range, mean_square_normalized};
use crate::config::AnalysisConfig;
use crate::error::ConfigError;

/// Per-call spectrum data. Every array except `mel_energies` has
/// `fft_size / 2` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSnapshot {
    pub magnitude: Vec<f32>,
    pub phase: Vec<f32>,
    pub power: Vec<f32>,
    pub smoothed_magnitude: Vec<f32>,
    /// Smoothed magnitude in decibels, mapped linearly onto 0-255.
    pub decibel: Vec<f32>,
    pub mel_energies: Vec<f32>,
}

impl SpectrumSnapshot {
    pub fn zeroed(bins: usize, mel_filters: usize) -> Self {
        Self {
            magnitude: vec![0.0; bins],
            phase: vec![0.0; bins],
            power: vec![0.0; bins],
            smoothed_magnitude: vec![0.0; bins],
            decibel: vec![0.0; bins],
            mel_energies: vec![0.0; mel_filters],
        }
    }
}

/// Average decibel value (0-255) in seven perceptual bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    pub sub_bass: f32,
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub presence: f32,
    pub brilliance: f32,
}

impl BandEnergies {
    /// Band names with their Hz boundaries, low inclusive.
    pub const RANGES: [(&'static str, f32, f32); 7] = [
        ("sub_bass", 20.0, 60.0),
        ("bass", 60.0, 250.0),
        ("low_mid", 250.0, 500.0),
        ("mid", 500.0, 2000.0),
        ("high_mid", 2000.0, 4000.0),
        ("presence", 4000.0, 6000.0),
        ("brilliance", 6000.0, 20000.0),
    ];

    pub fn from_decibels(decibels: &[f32], bin_width: f32) -> Self {
        let mut values = [0.0f32; 7];
        for (value, &(_, low, high)) in values.iter_mut().zip(Self::RANGES.iter()) {
            let range = bin_range(low, high, bin_width, decibels.len());
            if !range.is_empty() {
                let count = range.len() as f32;
                *value = decibels[range].iter().sum::<f32>() / count;
            }
        }

        let [sub_bass, bass, low_mid, mid, high_mid, presence, brilliance] = values;
        Self {
            sub_bass,
            bass,
            low_mid,
            mid,
            high_mid,
            presence,
            brilliance,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> {
        let values = [
            self.sub_bass,
            self.bass,
            self.low_mid,
            self.mid,
            self.high_mid,
            self.presence,
            self.brilliance,
        ];
        Self::RANGES.into_iter().zip(values).map(|((name, _, _), value)| (name, value))
    }
}

/// Descriptive features derived from the decibel spectrum. Frequencies in Hz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyFeatures {
    pub dominant_frequency: f32,
    pub spectral_centroid: f32,
    pub spectral_rolloff: f32,
    pub spectral_spread: f32,
    pub band_energies: BandEnergies,
    /// Mean of squared normalized decibel values, 0-1.
    pub total_energy: f32,
}

impl FrequencyFeatures {
    pub fn from_decibels(decibels: &[f32], bin_width: f32, rolloff_percent: f32) -> Self {
        let total_weight: f32 = decibels.iter().sum();
        if total_weight <= 0.0 {
            return Self::default();
        }

        let frequency = |bin: usize| bin as f32 * bin_width;

        let dominant_frequency = decibels
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, &v)| v > 0.0)
            .fold(None, |best: Option<(usize, f32)>, (bin, &v)| match best {
                Some((_, best_v)) if best_v >= v => best,
                _ => Some((bin, v)),
            })
            .map_or(0.0, |(bin, _)| frequency(bin));

        let spectral_centroid = decibels
            .iter()
            .enumerate()
            .map(|(bin, &v)| frequency(bin) * v)
            .sum::<f32>()
            / total_weight;

        let spectral_spread = (decibels
            .iter()
            .enumerate()
            .map(|(bin, &v)| (frequency(bin) - spectral_centroid).powi(2) * v)
            .sum::<f32>()
            / total_weight)
            .sqrt();

        let threshold = total_weight * rolloff_percent;
        let mut cumulative = 0.0;
        let mut spectral_rolloff = frequency(decibels.len().saturating_sub(1));
        for (bin, &v) in decibels.iter().enumerate() {
            cumulative += v;
            if cumulative >= threshold {
                spectral_rolloff = frequency(bin);
                break;
            }
        }

        Self {
            dominant_frequency,
            spectral_centroid,
            spectral_rolloff,
            spectral_spread,
            band_energies: BandEnergies::from_decibels(decibels, bin_width),
            total_energy: mean_square_normalized(decibels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub snapshot: SpectrumSnapshot,
    pub features: FrequencyFeatures,
}

/// Map a linear magnitude onto 0-255 through a clamped decibel range.
pub fn normalize_decibels(magnitude: f32, min_db: f32, max_db: f32) -> f32 {
    let db = if magnitude > 0.0 {
        20.0 * magnitude.log10()
    } else {
        min_db
    };
    let db = db.clamp(min_db, max_db);
    (db - min_db) / (max_db - min_db) * 255.0
}

/// Windowed FFT analysis of fixed-size blocks with per-bin smoothing.
///
/// Owns the smoothing memory for one session; it carries over between
/// calls to [`analyze`](Self::analyze) and is only cleared by
/// [`reset`](Self::reset) or a reconfiguration that changes the bin count.
pub struct SpectralAnalyzer {
    config: AnalysisConfig,
    window: Vec<f32>,
    transform: SpectralTransform,
    mel_bank: MelFilterBank,
    frame: Vec<f32>,
    smoothed: Vec<f32>,
    short_blocks: u64,
}

impl SpectralAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        let fft_size = config.fft_size;

        info!(
            "Spectral analyzer: {} Hz, FFT {}, {} window, {} mel filters",
            config.sample_rate,
            fft_size,
            config.window_function,
            config.mel_filters
        );

        Ok(Self {
            window: window::generate(config.window_function, fft_size),
            transform: SpectralTransform::new(fft_size)?,
            mel_bank: MelFilterBank::new(config.mel_filters, fft_size, config.sample_rate),
            frame: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
            short_blocks: 0,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Apply a new configuration, rebuilding only what changed.
    ///
    /// On error the previous configuration stays in effect.
    pub fn configure(&mut self, config: AnalysisConfig) -> Result<(), ConfigError> {
        let config = config.validated()?;
        let old = &self.config;

        let size_changed = config.fft_size != old.fft_size;
        if size_changed {
            self.transform = SpectralTransform::new(config.fft_size)?;
            self.frame = vec![0.0; config.fft_size];
            self.smoothed = vec![0.0; config.fft_size / 2];
        }
        if size_changed || config.window_function != old.window_function {
            self.window = window::generate(config.window_function, config.fft_size);
        }
        if size_changed
            || config.sample_rate != old.sample_rate
            || config.mel_filters != old.mel_filters
        {
            self.mel_bank = MelFilterBank::new(config.mel_filters, config.fft_size, config.sample_rate);
        }

        debug!("Spectral analyzer reconfigured: {:?}", config);
        self.config = config;
        Ok(())
    }

    /// Forget the smoothing memory.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    /// The result returned for blocks that cannot be analyzed.
    pub fn empty_analysis(&self) -> Analysis {
        Analysis {
            snapshot: SpectrumSnapshot::zeroed(self.config.fft_size / 2, self.mel_bank.len()),
            features: FrequencyFeatures::default(),
        }
    }

    pub fn analyze(&mut self, block: &[f32]) -> Analysis {
        let fft_size = self.config.fft_size;
        if block.len() < fft_size {
            self.short_blocks += 1;
            if self.short_blocks == 1 {
                warn!(
                    "Audio block of {} samples is shorter than FFT size {}; returning silence",
                    block.len(),
                    fft_size
                );
            } else {
                debug!("Short audio block #{} ({} samples)", self.short_blocks, block.len());
            }
            return self.empty_analysis();
        }

        for ((slot, &sample), &weight) in self.frame.iter_mut().zip(block).zip(&self.window) {
            *slot = sample * weight;
        }

        let half = fft_size / 2;
        let mut magnitude = Vec::with_capacity(half);
        let mut phase = Vec::with_capacity(half);
        let mut power = Vec::with_capacity(half);

        let spectrum = self.transform.transform(&self.frame);
        for bin in &spectrum[..half] {
            let m = bin.norm();
            magnitude.push(m);
            phase.push(bin.im.atan2(bin.re));
            power.push(m * m);
        }

        let smoothing = self.config.smoothing_factor;
        for (previous, &m) in self.smoothed.iter_mut().zip(&magnitude) {
            *previous = smoothing * *previous + (1.0 - smoothing) * m;
        }

        let (min_db, max_db) = (self.config.min_decibels, self.config.max_decibels);
        let decibel: Vec<f32> = self
            .smoothed
            .iter()
            .map(|&m| normalize_decibels(m, min_db, max_db))
            .collect();

        let features = FrequencyFeatures::from_decibels(
            &decibel,
            self.config.bin_width(),
            self.config.rolloff_percent,
        );

        Analysis {
            snapshot: SpectrumSnapshot {
                magnitude,
                phase,
                power,
                smoothed_magnitude: self.smoothed.clone(),
                mel_energies: self.mel_bank.apply(&self.smoothed),
                decibel,
            },
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WindowKind;
    use std::f32::consts::PI;

    fn sine(frequency: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * frequency * n as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn analyzer() -> SpectralAnalyzer {
        SpectralAnalyzer::new(AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn test_silence_sits_on_the_floor() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze(&[0.0; 1024]);

        assert_eq!(result.snapshot.decibel.len(), 512);
        assert!(result.snapshot.decibel.iter().all(|&v| v == 0.0));
        assert_eq!(result.snapshot.mel_energies.len(), 26);
        assert_eq!(result.features, FrequencyFeatures::default());
    }

    #[test]
    fn test_short_block_returns_empty_result() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze(&[0.5; 100]);
        assert_eq!(result, analyzer.empty_analysis());

        let result = analyzer.analyze(&[]);
        assert_eq!(result.snapshot.magnitude.len(), 512);
    }

    #[test]
    fn test_short_block_leaves_smoothing_untouched() {
        let mut analyzer = analyzer();
        let tone = sine(1000.0, 0.5, 44100, 1024);
        let first = analyzer.analyze(&tone);
        analyzer.analyze(&tone[..10]);
        let second = analyzer.analyze(&tone);

        // Two real calls: 0.2 then 0.36 of the raw magnitude.
        let bin = 23;
        let raw = first.snapshot.magnitude[bin];
        assert!((first.snapshot.smoothed_magnitude[bin] - 0.2 * raw).abs() < 1e-5);
        assert!((second.snapshot.smoothed_magnitude[bin] - 0.36 * raw).abs() < 1e-5);
    }

    #[test]
    fn test_dominant_frequency_of_sine() {
        let config = AnalysisConfig::default();
        let bin_width = config.bin_width();
        let mut analyzer = analyzer();

        for frequency in [440.0, 1000.0, 5512.5, 12000.0] {
            analyzer.reset();
            let result = analyzer.analyze(&sine(frequency, 0.5, 44100, 1024));
            let found = result.features.dominant_frequency;
            assert!(
                (found - frequency).abs() <= bin_width,
                "expected ~{frequency} Hz, found {found} Hz"
            );
        }
    }

    #[test]
    fn test_longer_block_uses_first_fft_size_samples() {
        let mut a = analyzer();
        let mut b = analyzer();
        let mut block = sine(2000.0, 0.3, 44100, 1024);
        let exact = a.analyze(&block);
        block.extend(std::iter::repeat(0.9).take(500));
        let long = b.analyze(&block);
        assert_eq!(exact, long);
    }

    #[test]
    fn test_magnitude_is_raw_bin_norm() {
        let mut analyzer = analyzer();
        let block = sine(1000.0, 0.5, 44100, 1024);
        let result = analyzer.analyze(&block);

        let window = window::generate(WindowKind::Hann, 1024);
        let windowed: Vec<f32> = block.iter().zip(&window).map(|(s, w)| s * w).collect();
        let mut transform = SpectralTransform::new(1024).unwrap();
        let spectrum = transform.transform(&windowed);

        for k in 0..512 {
            let expected = spectrum[k].norm();
            let found = result.snapshot.magnitude[k];
            assert!(
                (found - expected).abs() <= 1e-4 * expected.max(1.0),
                "bin {k}: expected {expected}, found {found}"
            );
        }
        // A 0.5 amplitude sine under a Hann window peaks near N/8.
        assert!(result.snapshot.magnitude[23] > 100.0);
    }

    #[test]
    fn test_power_and_phase_follow_magnitude() {
        let mut analyzer = analyzer();
        let result = analyzer.analyze(&sine(3000.0, 0.8, 44100, 1024));
        let snapshot = &result.snapshot;
        for i in 0..512 {
            let power = snapshot.magnitude[i].powi(2);
            assert!((snapshot.power[i] - power).abs() <= 1e-6 * power.max(1.0));
            assert!(snapshot.phase[i].abs() <= PI + 1e-6);
        }
    }

    #[test]
    fn test_decibel_normalization_is_monotonic() {
        let mut previous = normalize_decibels(0.0, -100.0, 0.0);
        assert_eq!(previous, 0.0);
        let mut magnitude = 1e-7;
        while magnitude < 10.0 {
            let current = normalize_decibels(magnitude, -100.0, 0.0);
            assert!(current >= previous);
            assert!((0.0..=255.0).contains(&current));
            previous = current;
            magnitude *= 1.5;
        }
        assert_eq!(normalize_decibels(2.0, -100.0, 0.0), 255.0);
    }

    #[test]
    fn test_features_of_flat_spectrum() {
        let bin_width = 10.0;
        let decibels = vec![100.0; 101];
        let features = FrequencyFeatures::from_decibels(&decibels, bin_width, 0.85);

        assert!((features.spectral_centroid - 500.0).abs() < 1e-2);
        // Cumulative weight reaches 85% at bin 85 (86 of 101 bins).
        assert!((features.spectral_rolloff - 850.0).abs() < 1e-3);
        // Std dev of 0..=100 spaced by 10 Hz.
        let expected_spread = bin_width * ((101.0f32 * 101.0 - 1.0) / 12.0).sqrt();
        assert!((features.spectral_spread - expected_spread).abs() < 0.1);
        assert_eq!(features.dominant_frequency, 10.0);
    }

    #[test]
    fn test_band_energies_average_their_bins() {
        let bin_width = 44100.0 / 1024.0;
        let mut decibels = vec![0.0; 512];
        // Bins 2..=5 cover 60-250 Hz.
        for v in &mut decibels[2..6] {
            *v = 200.0;
        }
        let bands = BandEnergies::from_decibels(&decibels, bin_width);
        assert_eq!(bands.bass, 200.0);
        assert_eq!(bands.sub_bass, 0.0);
        assert_eq!(bands.iter().count(), 7);
        assert_eq!(bands.iter().nth(1), Some(("bass", 200.0)));
    }

    #[test]
    fn test_configure_rebuilds_and_validates() {
        let mut analyzer = analyzer();
        analyzer.analyze(&sine(1000.0, 0.5, 44100, 1024));

        let mut config = AnalysisConfig::default();
        config.fft_size = 2048;
        config.window_function = WindowKind::Blackman;
        config.mel_filters = 40;
        analyzer.configure(config).unwrap();

        let result = analyzer.analyze(&[0.0; 2048]);
        assert_eq!(result.snapshot.decibel.len(), 1024);
        assert_eq!(result.snapshot.mel_energies.len(), 40);
        assert!(result.snapshot.smoothed_magnitude.iter().all(|&v| v == 0.0));

        let mut bad = analyzer.config().clone();
        bad.fft_size = 3000;
        assert!(matches!(analyzer.configure(bad), Err(ConfigError::InvalidFftSize(3000))));
        assert_eq!(analyzer.config().fft_size, 2048);
    }

    #[test]
    fn test_new_rejects_invalid_size() {
        let mut config = AnalysisConfig::default();
        config.fft_size = 768;
        assert!(SpectralAnalyzer::new(config).is_err());
    }
}
