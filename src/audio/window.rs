use log::warn;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Weighting curve applied to a block before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

impl WindowKind {
    /// Parse a window name. Unknown names fall back to `Rectangular`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Self::Hann,
            "hamming" => Self::Hamming,
            "blackman" => Self::Blackman,
            "rectangular" | "rect" | "none" => Self::Rectangular,
            other => {
                warn!("Unknown window function '{}', using rectangular", other);
                Self::Rectangular
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hann => "hanning",
            Self::Hamming => "hamming",
            Self::Blackman => "blackman",
            Self::Rectangular => "rectangular",
        }
    }

    /// Coefficient at position `i` of a window of `size` samples.
    fn coefficient(&self, i: usize, size: usize) -> f32 {
        if size < 2 {
            return 1.0;
        }
        let phase = 2.0 * PI * i as f32 / (size - 1) as f32;
        let value = match self {
            Self::Hann => 0.5 * (1.0 - phase.cos()),
            Self::Hamming => 0.54 - 0.46 * phase.cos(),
            Self::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
            Self::Rectangular => 1.0,
        };
        // Blackman dips a hair below zero at the edges in f32.
        value.clamp(0.0, 1.0)
    }
}

impl From<String> for WindowKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<WindowKind> for String {
    fn from(kind: WindowKind) -> Self {
        kind.name().to_string()
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub fn generate(kind: WindowKind, size: usize) -> Vec<f32> {
    (0..size).map(|i| kind.coefficient(i, size)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WindowKind; 4] = [
        WindowKind::Hann,
        WindowKind::Hamming,
        WindowKind::Blackman,
        WindowKind::Rectangular,
    ];

    #[test]
    fn test_length_and_range() {
        for kind in ALL {
            for size in [1, 2, 64, 1024] {
                let window = generate(kind, size);
                assert_eq!(window.len(), size, "{kind} size {size}");
                assert!(window.iter().all(|&w| (0.0..=1.0).contains(&w)), "{kind} out of range");
            }
        }
    }

    #[test]
    fn test_rectangular_is_all_ones() {
        assert!(generate(WindowKind::Rectangular, 512).iter().all(|&w| w == 1.0));
    }

    #[test]
    fn test_hann_shape() {
        let window = generate(WindowKind::Hann, 1025);
        assert!(window[0].abs() < 1e-6);
        assert!((window[512] - 1.0).abs() < 1e-6);
        assert!(window[1024].abs() < 1e-6);
    }

    #[test]
    fn test_hamming_endpoints() {
        let window = generate(WindowKind::Hamming, 256);
        assert!((window[0] - 0.08).abs() < 1e-5);
        assert!((window[255] - 0.08).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_name_is_rectangular() {
        assert_eq!(WindowKind::from_name("hanning"), WindowKind::Hann);
        assert_eq!(WindowKind::from_name("HANN"), WindowKind::Hann);
        assert_eq!(WindowKind::from_name("kaiser"), WindowKind::Rectangular);
        let kind: WindowKind = serde_json::from_str("\"triangle\"").unwrap();
        assert_eq!(kind, WindowKind::Rectangular);
    }

    #[test]
    fn test_empty_window() {
        assert!(generate(WindowKind::Blackman, 0).is_empty());
    }
}
