//! Module shipping the stages compiled into the engine

use super::{apply_params, DspModule, SoftClip, StageError, StageInstance, StageParams, Trim};

/// In-process DSP module with `soft-clip` and `trim` stages
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinModule;

impl DspModule for BuiltinModule {
    fn name(&self) -> &str {
        "builtin"
    }

    fn kinds(&self) -> &[&'static str] {
        &[SoftClip::KIND, Trim::KIND]
    }

    fn create_stage(
        &self,
        kind: &str,
        init_params: &StageParams,
    ) -> Result<Box<dyn StageInstance>, StageError> {
        let mut stage: Box<dyn StageInstance> = match kind {
            SoftClip::KIND => Box::new(SoftClip::new()),
            Trim::KIND => Box::new(Trim::new()),
            _ => {
                return Err(StageError::UnknownKind {
                    module: self.name().to_string(),
                    kind: kind.to_string(),
                })
            }
        };
        apply_params(stage.as_mut(), init_params)?;
        Ok(stage)
    }
}
