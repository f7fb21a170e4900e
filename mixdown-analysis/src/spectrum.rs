//! FFT-based spectrum analysis for analyser taps

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Floor used when converting silent bins to decibels
pub const MIN_DECIBELS: f32 = -100.0;

/// Smoothed magnitude spectrum over a fixed FFT window
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    smoothing: f32,
    /// Smoothed linear magnitude per bin (fft_size / 2 bins)
    previous_magnitudes: Vec<f32>,
    /// Pre-allocated FFT buffer to avoid allocation in analyze()
    fft_buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create a new analyzer for a power-of-two `fft_size`
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Pre-compute Blackman window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        Self {
            fft_size,
            fft,
            window,
            smoothing: smoothing.clamp(0.0, 1.0),
            previous_magnitudes: vec![0.0; fft_size / 2],
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// FFT window length
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frequency bins produced
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Time smoothing constant (0.0 - 1.0)
    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Set time smoothing constant (clamped to 0.0 - 1.0)
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    /// Analyze the most recent `fft_size` mono samples and write decibel
    /// magnitudes into `out` (up to `bin_count()` values).
    pub fn analyze(&mut self, samples: &[f32], out: &mut [f32]) {
        let sample_count = samples.len().min(self.fft_size);
        for (i, &sample) in samples.iter().enumerate().take(sample_count) {
            let windowed = sample * self.window.get(i).copied().unwrap_or(0.0);
            self.fft_buffer[i] = Complex::new(windowed, 0.0);
        }
        // Zero pad the rest
        for buf in self.fft_buffer.iter_mut().skip(sample_count) {
            *buf = Complex::new(0.0, 0.0);
        }

        self.fft.process(&mut self.fft_buffer);

        let scale = 1.0 / self.fft_size as f32;
        for (bin, (prev, out)) in self
            .previous_magnitudes
            .iter_mut()
            .zip(out.iter_mut())
            .enumerate()
        {
            let magnitude = self.fft_buffer[bin].norm() * scale;
            *prev = *prev * self.smoothing + magnitude * (1.0 - self.smoothing);
            *out = to_decibels(*prev);
        }
    }

    /// Clear smoothing history
    pub fn reset(&mut self) {
        self.previous_magnitudes.fill(0.0);
    }

    /// Get the peak level from samples (0.0 - 1.0)
    pub fn peak_level(samples: &[f32]) -> f32 {
        samples
            .iter()
            .map(|s| s.abs())
            .fold(0.0f32, f32::max)
            .min(1.0)
    }
}

/// Convert a linear magnitude to decibels, floored at [`MIN_DECIBELS`]
pub fn to_decibels(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return MIN_DECIBELS;
    }
    (20.0 * magnitude.log10()).max(MIN_DECIBELS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_is_floor() {
        let mut analyzer = SpectrumAnalyzer::new(256, 0.0);
        let mut out = vec![0.0; analyzer.bin_count()];
        analyzer.analyze(&[0.0; 256], &mut out);
        assert!(out.iter().all(|&db| db == MIN_DECIBELS));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let size = 512;
        let mut analyzer = SpectrumAnalyzer::new(size, 0.0);
        // Bin 32 of a 512-point FFT
        let samples: Vec<f32> = (0..size)
            .map(|i| (2.0 * PI * 32.0 * i as f32 / size as f32).sin())
            .collect();
        let mut out = vec![0.0; analyzer.bin_count()];
        analyzer.analyze(&samples, &mut out);

        let loudest = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(loudest, 32);
    }

    #[test]
    fn test_smoothing_slows_decay() {
        let size = 256;
        let mut analyzer = SpectrumAnalyzer::new(size, 0.9);
        let tone: Vec<f32> = (0..size)
            .map(|i| (2.0 * PI * 8.0 * i as f32 / size as f32).sin())
            .collect();
        let mut out = vec![0.0; analyzer.bin_count()];
        analyzer.analyze(&tone, &mut out);
        analyzer.analyze(&vec![0.0; size], &mut out);

        // History keeps the bin above the floor after the tone is gone
        assert!(out[8] > MIN_DECIBELS);
    }

    #[test]
    fn test_peak_level() {
        assert_eq!(SpectrumAnalyzer::peak_level(&[0.1, -0.5, 0.3]), 0.5);
        assert_eq!(SpectrumAnalyzer::peak_level(&[2.0]), 1.0);
    }
}
