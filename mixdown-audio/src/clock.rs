//! Bus clock - time base shared by everything under one master

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic time source in seconds
pub trait BusClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock derived from the number of frames rendered so far
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Frames rendered since creation
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl BusClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Format seconds as `mm:ss` (minutes are not wrapped at the hour)
pub fn format_mm_ss(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}
