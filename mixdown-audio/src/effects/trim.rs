//! Trim - plain gain stage

use super::{StageError, StageInstance};

pub struct Trim {
    gain: f32,
}

impl Trim {
    pub const KIND: &'static str = "trim";

    pub fn new() -> Self {
        Self { gain: 1.0 }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Default for Trim {
    fn default() -> Self {
        Self::new()
    }
}

impl StageInstance for Trim {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), StageError> {
        match name {
            "gain" if value.is_finite() && value >= 0.0 => {
                self.gain = value;
                Ok(())
            }
            "gain" => Err(StageError::OutOfRange {
                name: name.to_string(),
                value,
            }),
            _ => Err(StageError::UnknownParameter {
                kind: Self::KIND,
                name: name.to_string(),
            }),
        }
    }

    fn process(&mut self, block: &mut [f32], _sample_rate: u32) {
        block.iter_mut().for_each(|s| *s *= self.gain);
    }
}
