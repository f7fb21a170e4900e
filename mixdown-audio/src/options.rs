//! Engine and channel options

/// Default engine sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// What the diagnostics sink forwards, and whether errors abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebuggerOptions {
    pub show_info: bool,
    pub show_warnings: bool,
    pub show_errors: bool,
    /// Turn every reported error into a panic (development only)
    pub break_on_error: bool,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            show_info: true,
            show_warnings: true,
            show_errors: true,
            break_on_error: false,
        }
    }
}

/// Options for one master bus and its render context
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Render sample rate in Hz
    pub sample_rate: u32,
    /// Maximum channels attached to one master
    pub max_channels: usize,
    pub debugger: DebuggerOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_channels: 128,
            debugger: DebuggerOptions::default(),
        }
    }
}

/// Per-channel options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub label: Option<String>,
    /// Maximum clips attached to the channel
    pub max_audio_clips: usize,
    /// Maximum stages in the effect chain
    pub max_effects: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            label: None,
            max_audio_clips: 8,
            max_effects: 8,
        }
    }
}

impl ChannelOptions {
    /// Default options with a label
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }
}
