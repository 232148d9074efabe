pub mod analyzer;
pub mod beat_detector;
pub mod fft;
pub mod mel;
pub mod onset;
pub mod processor;
pub mod sources;
pub mod window;

pub use analyzer::{Analysis, BandEnergies, FrequencyFeatures, SpectralAnalyzer, SpectrumSnapshot};
pub use beat_detector::{BandEnergyState, BeatEvent, BeatDetector, DetectorStatus, EnergyBands};
pub use fft::SpectralTransform;
pub use mel::MelFilterBank;
pub use onset::{HighFrequencyContentDetector, OnsetAlgorithm, OnsetDetector, SpectralFluxDetector};
pub use processor::{AudioInput, AudioProcessor};
pub use window::WindowKind;

use std::ops::Range;

/// Bins whose center frequency lies in `[low_hz, high_hz)`, limited to `len`.
pub(crate) fn bin_range(low_hz: f32, high_hz: f32, bin_width: f32, len: usize) -> Range<usize> {
    if bin_width <= 0.0 || low_hz >= high_hz {
        return 0..0;
    }
    let start = ((low_hz / bin_width).ceil() as usize).min(len);
    let end = ((high_hz / bin_width).ceil() as usize).min(len);
    start..end.max(start)
}

/// Mean of squared `value / 255` over a slice of 0-255 decibel data.
pub(crate) fn mean_square_normalized(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&v| (v / 255.0).powi(2)).sum::<f32>() / data.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_range() {
        let width = 44100.0 / 1024.0;
        // Bin 0 is DC and sits below 20 Hz.
        assert_eq!(bin_range(20.0, 60.0, width, 512), 1..2);
        assert_eq!(bin_range(4000.0, 20000.0, width, 512), 93..465);
        assert_eq!(bin_range(10000.0, 30000.0, width, 512), 233..512);
        assert_eq!(bin_range(30000.0, 40000.0, width, 512), 512..512);
        assert_eq!(bin_range(100.0, 50.0, width, 512), 0..0);
    }

    #[test]
    fn test_mean_square_normalized() {
        assert_eq!(mean_square_normalized(&[]), 0.0);
        assert!((mean_square_normalized(&[255.0, 0.0]) - 0.5).abs() < 1e-6);
    }
}
