//! Signal analysis for mixdown
//!
//! Provides the analyser taps that clips insert before and after their
//! gain/pan stages, and the FFT spectrum they expose.

mod spectrum;
mod tap;

pub use spectrum::{to_decibels, SpectrumAnalyzer, MIN_DECIBELS};
pub use tap::{AnalyserConfig, AnalyserTap, AnalysisError, MAX_FFT_SIZE, MIN_FFT_SIZE};
