use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::ConfigError;

/// Forward FFT of real-valued blocks with a fixed power-of-two size.
///
/// The plan and buffers are allocated once; `transform` itself does not
/// allocate.
pub struct SpectralTransform {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralTransform {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size < 2 || !size.is_power_of_two() {
            return Err(ConfigError::InvalidFftSize(size));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            size,
            fft,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform `block`, zero-padding it on the right to `size`.
    ///
    /// Callers must not pass more than `size` samples.
    pub fn transform(&mut self, block: &[f32]) -> &[Complex<f32>] {
        debug_assert!(block.len() <= self.size, "block longer than FFT size");

        for (slot, &sample) in self.buffer.iter_mut().zip(block) {
            *slot = Complex::new(sample, 0.0);
        }
        for slot in self.buffer.iter_mut().skip(block.len()) {
            *slot = Complex::new(0.0, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer
    }
}
