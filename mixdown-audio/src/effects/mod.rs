//! Effect stage contract and DSP module collaborators
//!
//! The engine never inspects what a stage computes. It only decides when
//! a stage instance is created, wired into a channel chain and released.

mod builtin;
mod soft_clip;
mod trim;

pub use builtin::BuiltinModule;
pub use soft_clip::SoftClip;
pub use trim::Trim;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Named numeric parameters handed to a stage
pub type StageParams = BTreeMap<String, f32>;

/// Errors raised by DSP modules and their stage instances
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("module '{module}' has no stage kind '{kind}'")]
    UnknownKind { module: String, kind: String },
    #[error("stage '{kind}' has no parameter '{name}'")]
    UnknownParameter { kind: &'static str, name: String },
    #[error("parameter '{name}' out of range: {value}")]
    OutOfRange { name: String, value: f32 },
}

/// Errors raised when resolving a module by path
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModuleLoadError {
    #[error("no DSP module registered at '{0}'")]
    NotFound(String),
}

/// Trait for live effect processing units
pub trait StageInstance: Send {
    /// Stage kind name
    fn kind(&self) -> &'static str;

    /// Set a parameter by name
    fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), StageError>;

    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, block: &mut [f32], sample_rate: u32);

    /// Free anything held outside the instance; called when the stage leaves the graph
    fn release(&mut self) {}
}

/// A loaded DSP module that can instantiate stages
pub trait DspModule: Send + Sync {
    fn name(&self) -> &str;

    /// Stage kinds this module can create
    fn kinds(&self) -> &[&'static str];

    /// Create a stage, applying `init_params` before it processes anything
    fn create_stage(
        &self,
        kind: &str,
        init_params: &StageParams,
    ) -> Result<Box<dyn StageInstance>, StageError>;
}

/// Handle to a loaded module
pub type ModuleHandle = Arc<dyn DspModule>;

/// Modules addressable by path
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleHandle>,
}

impl ModuleRegistry {
    /// Path under which [`BuiltinModule`] is registered
    pub const BUILTIN_PATH: &'static str = "builtin";

    /// Registry holding only the builtin module
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Self::BUILTIN_PATH, Arc::new(BuiltinModule));
        registry
    }

    pub fn empty() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Make a module loadable at `path`, replacing any previous one
    pub fn register(&mut self, path: impl Into<String>, module: ModuleHandle) {
        self.modules.insert(path.into(), module);
    }

    pub fn load_module(&self, path: &str) -> Result<ModuleHandle, ModuleLoadError> {
        self.modules
            .get(path)
            .cloned()
            .ok_or_else(|| ModuleLoadError::NotFound(path.to_string()))
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply every parameter to a fresh instance
pub(crate) fn apply_params(
    stage: &mut dyn StageInstance,
    params: &StageParams,
) -> Result<(), StageError> {
    for (name, value) in params {
        stage.set_parameter(name, *value)?;
    }
    Ok(())
}
