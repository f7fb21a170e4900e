//! Audio routing and playback-voice engine for mixdown
//!
//! This crate provides the mixing hierarchy and its signal graph:
//! - Master: root bus with its own render context and bus clock
//! - Channel: mixing bus with an ordered effect chain, gain and pan
//! - EffectStage: opaque processor created by a DSP module
//! - AudioClip: playable source with a voice pool, gain/pan and analyser taps
//! - Graph: pull-rendered node graph over interleaved stereo blocks

mod channel;
mod clip;
mod clock;
mod context;
mod diagnostics;
mod effect;
pub mod effects;
mod error;
mod events;
mod graph;
mod ids;
mod master;
mod options;
mod sample;
mod ticker;
mod voice;

pub use channel::Channel;
pub use clip::{AudioClip, TapPosition};
pub use clock::{format_mm_ss, BusClock, FrameClock};
pub use context::{Context, Renderer};
pub use diagnostics::{Diagnostics, DiagnosticsSink, TracingSink};
pub use effect::EffectStage;
pub use effects::{
    BuiltinModule, DspModule, ModuleHandle, ModuleLoadError, ModuleRegistry, StageError,
    StageInstance, StageParams,
};
pub use error::{EngineError, EngineResult};
pub use events::{ClipEvent, ClipEventKind, ListenerHandle, ProgressEvent};
pub use graph::{Graph, NodeId, NodeRole, VoiceEnded};
pub use ids::{ChannelId, ClipId, EffectId, MasterId, VoiceId};
pub use master::Master;
pub use options::{ChannelOptions, DebuggerOptions, EngineOptions, DEFAULT_SAMPLE_RATE};
pub use sample::SampleData;
pub use ticker::{ProgressTicker, PROGRESS_INTERVAL};
pub use voice::{Voice, VoicePool, DEFAULT_MAX_VOICES};

pub use mixdown_analysis::{AnalyserConfig, AnalysisError};
