//! Decoded sample data a clip plays from

use crate::clock::format_mm_ss;
use crate::error::{EngineError, EngineResult};

/// Planar, immutable decoded audio
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleData {
    /// Build from planar channel data of equal length
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> EngineResult<Self> {
        if channels.is_empty() {
            return Err(EngineError::invalid("channel data", "at least one channel is required"));
        }
        if sample_rate == 0 {
            return Err(EngineError::invalid("sample rate", "must be greater than zero"));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(EngineError::invalid("channel data", "channels differ in length"));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Build from interleaved samples
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> EngineResult<Self> {
        if channel_count == 0 {
            return Err(EngineError::invalid("channel count", "must be greater than zero"));
        }
        let frames = samples.len() / channel_count;
        let channels = (0..channel_count)
            .map(|ch| {
                (0..frames)
                    .map(|f| samples[f * channel_count + ch])
                    .collect()
            })
            .collect();
        Self::new(channels, sample_rate)
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames
    pub fn length(&self) -> usize {
        self.channels[0].len()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.length() as f64 / self.sample_rate as f64
    }

    pub fn formatted_duration(&self) -> String {
        format_mm_ss(self.duration())
    }

    /// Size of the decoded f32 data in bytes
    pub fn byte_length(&self) -> usize {
        self.length() * self.channels.len() * std::mem::size_of::<f32>()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Stereo frame at `index` (mono is duplicated, extra channels ignored)
    #[inline]
    pub fn stereo_frame(&self, index: usize) -> (f32, f32) {
        let left = self.channels[0][index];
        let right = self.channels.get(1).map_or(left, |c| c[index]);
        (left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_properties() {
        let data = SampleData::new(vec![vec![0.0; 88200]], 44100).unwrap();
        assert_eq!(data.number_of_channels(), 1);
        assert_eq!(data.duration(), 2.0);
        assert_eq!(data.formatted_duration(), "00:02");
        assert_eq!(data.byte_length(), 88200 * 4);
    }

    #[test]
    fn test_from_interleaved() {
        let data = SampleData::from_interleaved(&[1.0, -1.0, 0.5, -0.5], 2, 8000).unwrap();
        assert_eq!(data.length(), 2);
        assert_eq!(data.channel(0), Some(&[1.0, 0.5][..]));
        assert_eq!(data.stereo_frame(1), (0.5, -0.5));
    }

    #[test]
    fn test_mono_duplicates_to_stereo() {
        let data = SampleData::new(vec![vec![0.25]], 8000).unwrap();
        assert_eq!(data.stereo_frame(0), (0.25, 0.25));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(SampleData::new(vec![], 8000).is_err());
        assert!(SampleData::new(vec![vec![0.0]], 0).is_err());
        assert!(SampleData::new(vec![vec![0.0], vec![0.0, 0.0]], 8000).is_err());
    }
}
