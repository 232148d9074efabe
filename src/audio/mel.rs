pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

/// One triangular filter, stored sparsely from its first non-zero bin.
#[derive(Debug, Clone)]
struct MelFilter {
    start: usize,
    weights: Vec<f32>,
}

/// Triangular filters equally spaced on the mel scale from 0 Hz to Nyquist.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    filters: Vec<MelFilter>,
    num_bins: usize,
}

impl MelFilterBank {
    pub fn new(num_filters: usize, fft_size: usize, sample_rate: u32) -> Self {
        let num_bins = fft_size / 2;
        let nyquist = sample_rate as f32 / 2.0;
        let high_mel = hz_to_mel(nyquist);
        let last_bin = num_bins.saturating_sub(1) as f32;

        // Fractional bin positions of the num_filters + 2 edge points.
        let edges: Vec<f32> = (0..num_filters + 2)
            .map(|i| {
                let mel = high_mel * i as f32 / (num_filters + 1) as f32;
                (mel_to_hz(mel) * fft_size as f32 / sample_rate as f32).min(last_bin)
            })
            .collect();

        let filters = edges
            .windows(3)
            .map(|edge| Self::triangle(edge[0], edge[1], edge[2], num_bins))
            .collect();

        Self { filters, num_bins }
    }

    fn triangle(left: f32, center: f32, right: f32, num_bins: usize) -> MelFilter {
        let start = left.ceil() as usize;
        let end = (right.floor() as usize).min(num_bins.saturating_sub(1));

        let mut weights: Vec<f32> = (start..=end)
            .map(|k| {
                let k = k as f32;
                if k <= center {
                    if center > left { (k - left) / (center - left) } else { 1.0 }
                } else if right > center {
                    (right - k) / (right - center)
                } else {
                    0.0
                }
            })
            .collect();

        // Low filters can be narrower than one bin; give them the nearest bin.
        if weights.iter().all(|&w| w <= 0.0) {
            let nearest = (center.round() as usize).min(num_bins.saturating_sub(1));
            return MelFilter { start: nearest, weights: vec![1.0] };
        }
        weights.iter_mut().for_each(|w| *w = w.max(0.0));

        MelFilter { start, weights }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Weighted sum of `spectrum` under each filter.
    pub fn apply(&self, spectrum: &[f32]) -> Vec<f32> {
        debug_assert_eq!(spectrum.len(), self.num_bins);
        self.filters
            .iter()
            .map(|filter| {
                spectrum
                    .iter()
                    .skip(filter.start)
                    .zip(&filter.weights)
                    .map(|(value, weight)| value * weight)
                    .sum()
            })
            .collect()
    }
}
