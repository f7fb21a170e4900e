//! Soft clipper - tames peaks above a threshold with a smooth knee

use super::{StageError, StageInstance};

/// Soft clipping stage with input drive
pub struct SoftClip {
    /// Input gain applied before clipping (> 0.0)
    drive: f32,
    /// Level where the knee starts (0.0 - 1.0 exclusive)
    clip_level: f32,
}

impl Default for SoftClip {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftClip {
    pub const KIND: &'static str = "soft-clip";

    pub fn new() -> Self {
        Self {
            drive: 1.0,
            clip_level: 0.75,
        }
    }

    pub fn drive(&self) -> f32 {
        self.drive
    }

    pub fn clip_level(&self) -> f32 {
        self.clip_level
    }

    /// Clip one sample
    #[inline(always)]
    fn clip(&self, x: f32) -> f32 {
        let level = self.clip_level;
        let x = x * self.drive;
        if x > level {
            let over = (x - level) / (1.0 - level);
            level + (x - level) / (1.0 + over * over)
        } else if x < -level {
            let over = (x + level) / (1.0 - level);
            -level + (x + level) / (1.0 + over * over)
        } else {
            x
        }
    }
}

impl StageInstance for SoftClip {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), StageError> {
        match name {
            "drive" if value > 0.0 && value.is_finite() => self.drive = value,
            "clip_level" if value > 0.0 && value < 1.0 => self.clip_level = value,
            "drive" | "clip_level" => {
                return Err(StageError::OutOfRange {
                    name: name.to_string(),
                    value,
                })
            }
            _ => {
                return Err(StageError::UnknownParameter {
                    kind: Self::KIND,
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    fn process(&mut self, block: &mut [f32], _sample_rate: u32) {
        for sample in block.iter_mut() {
            *sample = self.clip(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_is_transparent() {
        let mut clip = SoftClip::new();
        let mut block = [0.5, -0.5, 0.1, 0.0];
        clip.process(&mut block, 48000);
        assert_eq!(block, [0.5, -0.5, 0.1, 0.0]);
    }

    #[test]
    fn test_peaks_are_reduced_symmetrically() {
        let mut clip = SoftClip::new();
        let mut block = [2.0, -2.0];
        clip.process(&mut block, 48000);
        assert!(block[0] < 2.0 && block[0] > 0.75);
        assert_eq!(block[0], -block[1]);
    }

    #[test]
    fn test_parameter_validation() {
        let mut clip = SoftClip::new();
        assert!(clip.set_parameter("drive", 2.0).is_ok());
        assert_eq!(clip.drive(), 2.0);
        assert!(matches!(
            clip.set_parameter("clip_level", 1.0),
            Err(StageError::OutOfRange { .. })
        ));
        assert_eq!(clip.clip_level(), 0.75);
        assert!(matches!(
            clip.set_parameter("mix", 0.5),
            Err(StageError::UnknownParameter { .. })
        ));
    }
}
