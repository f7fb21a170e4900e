//! Analyser tap - non-destructive observation point in a signal chain
//!
//! A tap keeps a circular history of the most recent mono-downmixed
//! samples that passed through it. Readers copy the history out into
//! buffers they own, so the render side never allocates.

use crate::spectrum::SpectrumAnalyzer;
use thiserror::Error;

/// Smallest accepted analysis window
pub const MIN_FFT_SIZE: usize = 32;
/// Largest accepted analysis window
pub const MAX_FFT_SIZE: usize = 32768;

/// Errors raised when configuring a tap
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("fft size {0} must be a power of two between {MIN_FFT_SIZE} and {MAX_FFT_SIZE}")]
    InvalidFftSize(usize),
    #[error("smoothing {0} must be within 0.0 - 1.0")]
    InvalidSmoothing(f32),
}

/// Analysis window and smoothing for a tap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyserConfig {
    /// Window size in samples (power of two)
    pub fft_size: usize,
    /// Spectrum time smoothing (0.0 - 1.0)
    pub smoothing: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing: 0.8,
        }
    }
}

impl AnalyserConfig {
    /// Check the window size and smoothing ranges
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.fft_size.is_power_of_two()
            || self.fft_size < MIN_FFT_SIZE
            || self.fft_size > MAX_FFT_SIZE
        {
            return Err(AnalysisError::InvalidFftSize(self.fft_size));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(AnalysisError::InvalidSmoothing(self.smoothing));
        }
        Ok(())
    }

    /// Number of frequency bins a tap with this config produces
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// Circular sample history plus spectrum state for one tap
pub struct AnalyserTap {
    config: AnalyserConfig,
    history: Vec<f32>,
    write_pos: usize,
    spectrum: SpectrumAnalyzer,
    /// Scratch for the time-ordered window fed to the FFT
    ordered: Vec<f32>,
}

impl AnalyserTap {
    /// Create a tap from a validated config
    pub fn new(config: AnalyserConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            config,
            history: vec![0.0; config.fft_size],
            write_pos: 0,
            spectrum: SpectrumAnalyzer::new(config.fft_size, config.smoothing),
            ordered: vec![0.0; config.fft_size],
        })
    }

    /// Current configuration
    pub fn config(&self) -> AnalyserConfig {
        self.config
    }

    /// Replace the configuration, clearing history if the window changes
    pub fn reconfigure(&mut self, config: AnalyserConfig) -> Result<(), AnalysisError> {
        config.validate()?;
        if config.fft_size != self.config.fft_size {
            self.history = vec![0.0; config.fft_size];
            self.ordered = vec![0.0; config.fft_size];
            self.write_pos = 0;
            self.spectrum = SpectrumAnalyzer::new(config.fft_size, config.smoothing);
        } else {
            self.spectrum.set_smoothing(config.smoothing);
        }
        self.config = config;
        Ok(())
    }

    /// Record a block of interleaved stereo frames (downmixed to mono)
    pub fn push_frames(&mut self, interleaved: &[f32]) {
        let len = self.history.len();
        for frame in interleaved.chunks_exact(2) {
            self.history[self.write_pos] = (frame[0] + frame[1]) * 0.5;
            self.write_pos = (self.write_pos + 1) % len;
        }
    }

    /// Copy the window, oldest sample first, into `out`
    pub fn copy_float(&self, out: &mut [f32]) {
        let len = self.history.len();
        for (i, slot) in out.iter_mut().take(len).enumerate() {
            *slot = self.history[(self.write_pos + i) % len];
        }
    }

    /// Copy the window as unsigned bytes (128 = silence) into `out`
    pub fn copy_byte(&self, out: &mut [u8]) {
        let len = self.history.len();
        for (i, slot) in out.iter_mut().take(len).enumerate() {
            let sample = self.history[(self.write_pos + i) % len];
            *slot = (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8;
        }
    }

    /// Compute smoothed decibel magnitudes into `out`
    pub fn frequency_data(&mut self, out: &mut [f32]) {
        let len = self.history.len();
        for i in 0..len {
            self.ordered[i] = self.history[(self.write_pos + i) % len];
        }
        self.spectrum.analyze(&self.ordered, out);
    }

    /// Current peak level of the window (0.0 - 1.0)
    pub fn peak_level(&self) -> f32 {
        SpectrumAnalyzer::peak_level(&self.history)
    }
}
