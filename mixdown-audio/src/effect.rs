//! Effect stage - one link in a channel's effect chain
//!
//! Each stage owns a processor created by its DSP module plus an output
//! gain. Parameters set while detached are buffered and applied when the
//! processor is created.

use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::effects::{ModuleHandle, StageError, StageParams};
use crate::error::{EngineError, EngineResult};
use crate::graph::NodeId;
use crate::ids::{ChannelId, EffectId};
use parking_lot::Mutex;
use std::sync::Arc;

struct EffectLive {
    context: Context,
    processor: NodeId,
    gain: NodeId,
}

struct EffectState {
    label: Option<String>,
    params: StageParams,
    volume: f32,
    channel: Option<ChannelId>,
    live: Option<EffectLive>,
    /// Sink used while not live; after a release, the last context's
    diagnostics: Diagnostics,
}

struct EffectShared {
    id: EffectId,
    kind: String,
    module: ModuleHandle,
    state: Mutex<EffectState>,
}

/// Handle to one effect stage; clones share the stage
#[derive(Clone)]
pub struct EffectStage {
    shared: Arc<EffectShared>,
}

impl EffectStage {
    /// Stage of `kind` from `module`; fails if the module cannot create it
    pub fn new(module: ModuleHandle, kind: impl Into<String>) -> EngineResult<Self> {
        Self::with_diagnostics(module, kind, Diagnostics::default())
    }

    /// Like [`EffectStage::new`], reporting to `diagnostics` until live
    pub fn with_diagnostics(
        module: ModuleHandle,
        kind: impl Into<String>,
        diagnostics: Diagnostics,
    ) -> EngineResult<Self> {
        let kind = kind.into();
        if !module.kinds().iter().any(|k| *k == kind.as_str()) {
            let error = StageError::UnknownKind {
                module: module.name().to_string(),
                kind,
            };
            return Err(diagnostics.report(error.into(), &[]));
        }
        Ok(Self {
            shared: Arc::new(EffectShared {
                id: EffectId::next(),
                kind,
                module,
                state: Mutex::new(EffectState {
                    label: None,
                    params: StageParams::new(),
                    volume: 1.0,
                    channel: None,
                    live: None,
                    diagnostics,
                }),
            }),
        })
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.shared.state.lock().label = Some(label.into());
        self
    }

    pub fn id(&self) -> EffectId {
        self.shared.id
    }

    pub fn kind(&self) -> &str {
        &self.shared.kind
    }

    pub fn module_name(&self) -> String {
        self.shared.module.name().to_string()
    }

    pub fn label(&self) -> Option<String> {
        self.shared.state.lock().label.clone()
    }

    pub fn set_label(&self, label: Option<String>) {
        self.shared.state.lock().label = label;
    }

    /// Whether the stage belongs to a channel
    pub fn is_attached(&self) -> bool {
        self.shared.state.lock().channel.is_some()
    }

    pub fn is_live(&self) -> bool {
        self.shared.state.lock().live.is_some()
    }

    fn diagnostics(state: &EffectState) -> &Diagnostics {
        state
            .live
            .as_ref()
            .map_or(&state.diagnostics, |l| l.context.diagnostics())
    }

    /// Set a processor parameter. Applied immediately when live, otherwise
    /// kept until the processor is created.
    pub fn set_parameter(&self, name: &str, value: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if let Some(live) = &state.live {
            let result = live
                .context
                .graph()
                .set_stage_parameter(live.processor, name, value);
            if let Some(Err(error)) = result {
                return Err(Self::diagnostics(&state).report(error.into(), &[]));
            }
        }
        state.params.insert(name.to_string(), value);
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.shared.state.lock().params.get(name).copied()
    }

    pub fn parameters(&self) -> StageParams {
        self.shared.state.lock().params.clone()
    }

    /// Set the stage's output gain
    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = &state.live else {
            return Err(Self::diagnostics(&state).report(
                EngineError::ResourceUnavailable(format!("output gain of {}", self.id())),
                &["Add the effect to a live channel before setting its volume."],
            ));
        };
        if !volume.is_finite() {
            return Err(Self::diagnostics(&state)
                .report(EngineError::invalid("volume", "must be finite"), &[]));
        }
        live.context.graph().set_gain(live.gain, volume);
        state.volume = volume;
        Ok(())
    }

    /// Live output gain
    pub fn volume(&self) -> Option<f32> {
        let state = self.shared.state.lock();
        let live = state.live.as_ref()?;
        let gain = live.context.graph().gain(live.gain);
        gain
    }

    pub(crate) fn bind(&self, channel: ChannelId) {
        self.shared.state.lock().channel = Some(channel);
    }

    /// Create the processor and output gain in `context`.
    /// Returns the stage's (input, output) nodes.
    pub(crate) fn initialize_on_attachment(
        &self,
        context: &Context,
    ) -> EngineResult<(NodeId, NodeId)> {
        let mut state = self.shared.state.lock();
        if let Some(live) = &state.live {
            if live.context.same_as(context) {
                return Ok((live.processor, live.gain));
            }
        }
        Self::release(&mut state);

        let stage = self
            .shared
            .module
            .create_stage(&self.shared.kind, &state.params)?;
        let mut graph = context.graph();
        let processor = graph.add_stage(stage);
        let gain = graph.add_gain(state.volume);
        graph.connect(processor, gain);
        drop(graph);

        state.live = Some(EffectLive {
            context: context.clone(),
            processor,
            gain,
        });
        state.diagnostics = context.diagnostics().clone();
        tracing::debug!(effect = %self.id(), kind = %self.shared.kind, "effect stage initialised");
        Ok((processor, gain))
    }

    /// (input, output) nodes while live
    pub(crate) fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        let state = self.shared.state.lock();
        state.live.as_ref().map(|l| (l.processor, l.gain))
    }

    /// Free the processor and gain; membership is kept
    pub(crate) fn release_live(&self) {
        Self::release(&mut self.shared.state.lock());
    }

    fn release(state: &mut EffectState) {
        if let Some(live) = state.live.take() {
            let mut graph = live.context.graph();
            graph.remove(live.processor);
            graph.remove(live.gain);
        }
    }

    /// Leave the channel entirely
    pub(crate) fn unbind(&self) {
        let mut state = self.shared.state.lock();
        Self::release(&mut state);
        state.channel = None;
    }
}

impl PartialEq for EffectStage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for EffectStage {}

impl std::fmt::Debug for EffectStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectStage")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tests::RecordingSink;
    use crate::effects::{BuiltinModule, SoftClip, Trim};
    use crate::graph::{NodeRole, VoiceSource};
    use crate::ids::VoiceId;
    use crate::options::DebuggerOptions;
    use crate::sample::SampleData;
    use crossbeam_channel::unbounded;

    fn trim() -> EffectStage {
        EffectStage::new(Arc::new(BuiltinModule), Trim::KIND).unwrap()
    }

    #[test]
    fn test_unknown_kind() {
        let result = EffectStage::new(Arc::new(BuiltinModule), "chorus");
        assert!(matches!(
            result,
            Err(EngineError::Stage(StageError::UnknownKind { .. }))
        ));
    }

    #[test]
    fn test_parameters_buffer_until_live() {
        let effect = trim();
        effect.set_parameter("gain", 0.5).unwrap();
        assert_eq!(effect.parameter("gain"), Some(0.5));

        let context = Context::new(100, Diagnostics::default());
        let (input, output) = effect.initialize_on_attachment(&context).unwrap();
        let out = context.destination();
        let (tx, _rx) = unbounded();
        {
            let mut graph = context.graph();
            assert_eq!(graph.role(input), Some(NodeRole::Stage));
            assert_eq!(graph.role(output), Some(NodeRole::Gain));
            let data = Arc::new(SampleData::new(vec![vec![1.0; 100]], 100).unwrap());
            let voice = graph.add_voice(VoiceSource::new(VoiceId::next(), data, 0.0, 0.0, false, tx));
            graph.connect(voice, input);
            graph.connect(output, out);
        }
        let mut block = [0.0f32; 4];
        context.render(&mut block);
        assert!(block.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_injected_diagnostics() {
        let sink = Arc::new(RecordingSink::default());
        let diagnostics = Diagnostics::with_sink(sink.clone(), DebuggerOptions::default());
        let unknown =
            EffectStage::with_diagnostics(Arc::new(BuiltinModule), "chorus", diagnostics.clone());
        assert!(unknown.is_err());

        let effect =
            EffectStage::with_diagnostics(Arc::new(BuiltinModule), Trim::KIND, diagnostics).unwrap();
        assert!(effect.set_volume(0.5).is_err());
        let entries = sink.entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(level, _)| *level == "error"));
    }

    #[test]
    fn test_live_parameter_errors() {
        let effect = EffectStage::new(Arc::new(BuiltinModule), SoftClip::KIND).unwrap();
        let context = Context::new(100, Diagnostics::default());
        effect.initialize_on_attachment(&context).unwrap();
        assert!(effect.set_parameter("drive", 2.0).is_ok());
        assert!(matches!(
            effect.set_parameter("feedback", 0.1),
            Err(EngineError::Stage(StageError::UnknownParameter { .. }))
        ));
        assert_eq!(effect.parameter("feedback"), None);
    }

    #[test]
    fn test_bad_buffered_parameter_fails_initialisation() {
        let effect = trim();
        effect.set_parameter("gain", -1.0).unwrap();
        let context = Context::new(100, Diagnostics::default());
        assert!(effect.initialize_on_attachment(&context).is_err());
        assert!(!effect.is_live());
        assert_eq!(context.graph().node_count(), 1);
    }

    #[test]
    fn test_volume_requires_live_stage() {
        let effect = trim();
        assert!(matches!(
            effect.set_volume(0.5),
            Err(EngineError::ResourceUnavailable(_))
        ));
        let context = Context::new(100, Diagnostics::default());
        effect.initialize_on_attachment(&context).unwrap();
        effect.set_volume(0.5).unwrap();
        assert_eq!(effect.volume(), Some(0.5));
    }

    #[test]
    fn test_release_frees_nodes() {
        let effect = trim().with_label("pre-gain");
        let context = Context::new(100, Diagnostics::default());
        effect.bind(ChannelId::next());
        effect.initialize_on_attachment(&context).unwrap();
        assert_eq!(context.graph().node_count(), 3);

        effect.release_live();
        assert!(effect.is_attached());
        assert_eq!(context.graph().node_count(), 1);

        effect.unbind();
        assert!(!effect.is_attached());
        assert_eq!(effect.label().as_deref(), Some("pre-gain"));
    }
}
