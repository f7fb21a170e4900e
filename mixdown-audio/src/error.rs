//! Engine error taxonomy

use crate::effects::StageError;
use mixdown_analysis::AnalysisError;
use thiserror::Error;

/// Errors returned by engine operations
///
/// None of these are fatal: a failed call leaves the object unchanged
/// and usable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0} is already attached")]
    AlreadyAttached(String),
    #[error("{0} is not attached")]
    NotAttached(String),
    #[error("{0} is not attached to a master, so it has no live bus")]
    ChannelNotLive(String),
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("voice pool is full ({max_voices} active), play request dropped")]
    VoiceAdmissionRejected { max_voices: usize },
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("{what} limit of {limit} reached")]
    LimitReached { what: &'static str, limit: usize },
    #[error("effect stage: {0}")]
    Stage(#[from] StageError),
    #[error("analyser: {0}")]
    Analysis(#[from] AnalysisError),
}

impl EngineError {
    /// Whether this is a policy outcome rather than a caller mistake
    pub fn is_policy(&self) -> bool {
        matches!(self, EngineError::VoiceAdmissionRejected { .. })
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
