//! Channel - mixing bus holding clips and an ordered effect chain
//!
//! ```text
//! clips -> input -> effect 1 -> ... -> effect n -> pan -> gain -> master
//! ```

use crate::clip::{AudioClip, BusPort};
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::effect::EffectStage;
use crate::error::{EngineError, EngineResult};
use crate::graph::NodeId;
use crate::ids::{ChannelId, MasterId};
use crate::options::ChannelOptions;
use parking_lot::Mutex;
use std::sync::Arc;

struct ChannelLive {
    master: MasterId,
    context: Context,
    input: NodeId,
    pan: NodeId,
    gain: NodeId,
}

struct ChannelState {
    options: ChannelOptions,
    volume: f32,
    pan: f32,
    clips: Vec<AudioClip>,
    effects: Vec<EffectStage>,
    live: Option<ChannelLive>,
    /// Sink used while detached; after a detach, the last master's
    diagnostics: Diagnostics,
}

struct ChannelShared {
    id: ChannelId,
    state: Mutex<ChannelState>,
}

/// Handle to a mixing channel; clones share the channel
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(ChannelOptions::default())
    }
}

impl Channel {
    pub fn new(options: ChannelOptions) -> Self {
        Self::with_diagnostics(options, Diagnostics::default())
    }

    /// Channel reporting to `diagnostics` until it joins a master
    pub fn with_diagnostics(options: ChannelOptions, diagnostics: Diagnostics) -> Self {
        Self {
            shared: Arc::new(ChannelShared {
                id: ChannelId::next(),
                state: Mutex::new(ChannelState {
                    options,
                    volume: 1.0,
                    pan: 0.0,
                    clips: Vec::new(),
                    effects: Vec::new(),
                    live: None,
                    diagnostics,
                }),
            }),
        }
    }

    /// Channel with default limits and a label
    pub fn labeled(label: impl Into<String>) -> Self {
        Self::new(ChannelOptions::labeled(label))
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn label(&self) -> Option<String> {
        self.shared.state.lock().options.label.clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.shared.state.lock().options.label = Some(label.into());
    }

    pub fn clear_label(&self) {
        self.shared.state.lock().options.label = None;
    }

    pub fn options(&self) -> ChannelOptions {
        self.shared.state.lock().options.clone()
    }

    /// Whether the channel is attached to a master
    pub fn is_live(&self) -> bool {
        self.shared.state.lock().live.is_some()
    }

    pub fn master_id(&self) -> Option<MasterId> {
        self.shared.state.lock().live.as_ref().map(|l| l.master)
    }

    /// Bus time of the owning master
    pub fn current_time(&self) -> Option<f64> {
        let state = self.shared.state.lock();
        state.live.as_ref().map(|l| l.context.current_time())
    }

    fn report(&self, state: &ChannelState, error: EngineError, details: &[&str]) -> EngineError {
        let diagnostics = state
            .live
            .as_ref()
            .map_or(&state.diagnostics, |l| l.context.diagnostics());
        diagnostics.report(error, details)
    }

    fn not_live(&self, state: &ChannelState) -> EngineError {
        self.report(
            state,
            EngineError::ChannelNotLive(self.describe(state)),
            &["Call Master::attach_channel first."],
        )
    }

    fn describe(&self, state: &ChannelState) -> String {
        match &state.options.label {
            Some(label) => format!("{} ({label})", self.id()),
            None => self.id().to_string(),
        }
    }

    fn port(&self, live: &ChannelLive) -> BusPort {
        BusPort {
            channel: self.id(),
            context: live.context.clone(),
            entry: live.input,
        }
    }

    // ---- clips ----

    /// Take ownership of `clip`; it goes live at once if the channel is live
    pub fn attach_audio_clip(&self, clip: &AudioClip) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if clip.has_attached_to_channel() {
            return Err(self.report(
                &state,
                EngineError::AlreadyAttached(clip.id().to_string()),
                &["Detach the clip from its current channel first."],
            ));
        }
        if state.clips.len() >= state.options.max_audio_clips {
            let limit = state.options.max_audio_clips;
            return Err(self.report(
                &state,
                EngineError::LimitReached {
                    what: "audio clips per channel",
                    limit,
                },
                &[],
            ));
        }

        clip.bind(self.id());
        if let Some(live) = &state.live {
            if let Err(error) = clip.initialize_on_attaching(&self.port(live)) {
                clip.unbind();
                return Err(self.report(&state, error, &[]));
            }
        }
        state.clips.push(clip.clone());
        tracing::debug!(channel = %self.id(), clip = %clip.id(), "clip attached");
        Ok(())
    }

    /// Stop `clip`, release its live stages and remove it
    pub fn detach_audio_clip(&self, clip: &AudioClip) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(index) = state.clips.iter().position(|c| c == clip) else {
            return Err(self.report(
                &state,
                EngineError::NotAttached(clip.id().to_string()),
                &[&format!("The clip is not attached to {}.", self.id())],
            ));
        };
        let clip = state.clips.remove(index);
        clip.unbind();
        tracing::debug!(channel = %self.id(), clip = %clip.id(), "clip detached");
        Ok(())
    }

    pub fn audio_clips(&self) -> Vec<AudioClip> {
        self.shared.state.lock().clips.clone()
    }

    // ---- effects ----

    /// Append `effect` to the end of the chain
    pub fn add_effect(&self, effect: &EffectStage) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = &state.live else {
            return Err(self.not_live(&state));
        };
        if effect.is_attached() {
            return Err(self.report(
                &state,
                EngineError::AlreadyAttached(effect.id().to_string()),
                &["Remove the effect from its current channel first."],
            ));
        }
        if state.effects.len() >= state.options.max_effects {
            let limit = state.options.max_effects;
            return Err(self.report(
                &state,
                EngineError::LimitReached {
                    what: "effects per channel",
                    limit,
                },
                &[],
            ));
        }

        let context = live.context.clone();
        effect.bind(self.id());
        if let Err(error) = effect.initialize_on_attachment(&context) {
            effect.unbind();
            return Err(self.report(&state, error, &[]));
        }
        state.effects.push(effect.clone());
        self.rebuild_chain(&state);
        Ok(())
    }

    /// Remove `effect` from the chain and release it
    pub fn remove_effect(&self, effect: &EffectStage) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if state.live.is_none() {
            return Err(self.not_live(&state));
        }
        let Some(index) = state.effects.iter().position(|e| e == effect) else {
            return Err(self.report(
                &state,
                EngineError::NotAttached(effect.id().to_string()),
                &[&format!("The effect is not part of {}.", self.id())],
            ));
        };
        let effect = state.effects.remove(index);
        effect.unbind();
        self.rebuild_chain(&state);
        Ok(())
    }

    /// Effects in processing order
    pub fn effects(&self) -> Vec<EffectStage> {
        self.shared.state.lock().effects.clone()
    }

    /// Rewire input -> live effects -> pan. Effects without live stages
    /// are bypassed.
    fn rebuild_chain(&self, state: &ChannelState) {
        let Some(live) = &state.live else {
            return;
        };
        let stages: Vec<(NodeId, NodeId)> =
            state.effects.iter().filter_map(EffectStage::endpoints).collect();

        let mut graph = live.context.graph();
        graph.disconnect(live.input);
        for &(_, output) in &stages {
            graph.disconnect(output);
        }
        let mut previous = live.input;
        for &(input, output) in &stages {
            graph.connect(previous, input);
            previous = output;
        }
        graph.connect(previous, live.pan);
    }

    // ---- gain / pan ----

    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = &state.live else {
            return Err(self.not_live(&state));
        };
        if !volume.is_finite() {
            return Err(self.report(&state, EngineError::invalid("volume", "must be finite"), &[]));
        }
        live.context.graph().set_gain(live.gain, volume);
        state.volume = volume;
        Ok(())
    }

    /// Set pan in [-1, 1]; other values are rejected and leave pan unchanged
    pub fn set_pan_level(&self, pan: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = &state.live else {
            return Err(self.not_live(&state));
        };
        if !(-1.0..=1.0).contains(&pan) {
            return Err(self.report(
                &state,
                EngineError::invalid("pan", format!("{pan} is outside [-1, 1]")),
                &[],
            ));
        }
        live.context.graph().set_pan(live.pan, pan);
        state.pan = pan;
        Ok(())
    }

    pub fn volume(&self) -> Option<f32> {
        let state = self.shared.state.lock();
        let live = state.live.as_ref()?;
        let gain = live.context.graph().gain(live.gain);
        gain
    }

    pub fn pan_level(&self) -> Option<f32> {
        let state = self.shared.state.lock();
        let live = state.live.as_ref()?;
        let pan = live.context.graph().pan(live.pan);
        pan
    }

    /// Deliver pending events for every clip
    pub fn pump(&self) {
        let clips = self.audio_clips();
        for clip in &clips {
            clip.pump();
        }
    }

    // ---- master attachment ----

    /// Allocate the bus stages in `context`, feeding `destination`, then
    /// bring member effects and clips live
    pub(crate) fn initialize_on_master_attachment(
        &self,
        master: MasterId,
        context: &Context,
        destination: NodeId,
    ) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if state.live.is_some() {
            return Err(self.report(
                &state,
                EngineError::AlreadyAttached(self.describe(&state)),
                &["Detach the channel from its master first."],
            ));
        }

        let live = {
            let mut graph = context.graph();
            let input = graph.add_gain(1.0);
            let pan = graph.add_panner(state.pan);
            let gain = graph.add_gain(state.volume);
            graph.connect(input, pan);
            graph.connect(pan, gain);
            graph.connect(gain, destination);
            ChannelLive {
                master,
                context: context.clone(),
                input,
                pan,
                gain,
            }
        };

        for effect in &state.effects {
            if let Err(error) = effect.initialize_on_attachment(context) {
                context.diagnostics().warn(
                    &format!("{} could not be initialised: {error}", effect.id()),
                    &["The effect is bypassed until it is removed and added again."],
                );
            }
        }
        let port = self.port(&live);
        for clip in &state.clips {
            if let Err(error) = clip.initialize_on_attaching(&port) {
                context.diagnostics().warn(
                    &format!("{} could not be initialised: {error}", clip.id()),
                    &[],
                );
            }
        }

        state.live = Some(live);
        state.diagnostics = context.diagnostics().clone();
        self.rebuild_chain(&state);
        tracing::debug!(channel = %self.id(), master = %master, "channel live");
        Ok(())
    }

    /// Release the bus and every member's live stages; members are kept
    pub(crate) fn release_live(&self) {
        let mut state = self.shared.state.lock();
        for clip in &state.clips {
            clip.release_live();
        }
        for effect in &state.effects {
            effect.release_live();
        }
        if let Some(live) = state.live.take() {
            let mut graph = live.context.graph();
            graph.remove(live.input);
            graph.remove(live.pan);
            graph.remove(live.gain);
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Channel {}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("label", &self.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tests::RecordingSink;
    use crate::effects::{BuiltinModule, Trim};
    use crate::options::DebuggerOptions;
    use crate::sample::SampleData;

    fn live_channel(options: ChannelOptions) -> (Channel, Context) {
        let context = Context::new(1000, Diagnostics::default());
        let channel = Channel::new(options);
        channel
            .initialize_on_master_attachment(MasterId::next(), &context, context.destination())
            .unwrap();
        (channel, context)
    }

    fn clip() -> AudioClip {
        AudioClip::new(SampleData::new(vec![vec![0.5; 100]], 1000).unwrap())
    }

    fn trim() -> EffectStage {
        EffectStage::new(Arc::new(BuiltinModule), Trim::KIND).unwrap()
    }

    #[test]
    fn test_labels() {
        let channel = Channel::labeled("drums");
        assert_eq!(channel.label().as_deref(), Some("drums"));
        channel.set_label("bass");
        assert_eq!(channel.label().as_deref(), Some("bass"));
        channel.clear_label();
        assert_eq!(channel.label(), None);
    }

    #[test]
    fn test_clip_attachment_symmetry() {
        let channel = Channel::default();
        let clip = clip();
        assert!(matches!(
            channel.detach_audio_clip(&clip),
            Err(EngineError::NotAttached(_))
        ));
        channel.attach_audio_clip(&clip).unwrap();
        assert!(clip.has_attached_to_channel());
        assert!(matches!(
            channel.attach_audio_clip(&clip),
            Err(EngineError::AlreadyAttached(_))
        ));
        channel.detach_audio_clip(&clip).unwrap();
        assert!(!clip.has_attached_to_channel());
        assert!(channel.audio_clips().is_empty());
    }

    #[test]
    fn test_clip_belongs_to_one_channel() {
        let a = Channel::default();
        let b = Channel::default();
        let clip = clip();
        a.attach_audio_clip(&clip).unwrap();
        assert!(b.attach_audio_clip(&clip).is_err());
        assert_eq!(clip.channel_id(), Some(a.id()));
    }

    #[test]
    fn test_clip_limit() {
        let channel = Channel::new(ChannelOptions {
            max_audio_clips: 1,
            ..ChannelOptions::default()
        });
        channel.attach_audio_clip(&clip()).unwrap();
        assert!(matches!(
            channel.attach_audio_clip(&clip()),
            Err(EngineError::LimitReached { limit: 1, .. })
        ));
    }

    #[test]
    fn test_effects_need_live_channel() {
        let channel = Channel::default();
        let effect = trim();
        assert!(matches!(
            channel.add_effect(&effect),
            Err(EngineError::ChannelNotLive(_))
        ));
        assert!(matches!(
            channel.remove_effect(&effect),
            Err(EngineError::ChannelNotLive(_))
        ));
        assert!(!effect.is_attached());
    }

    #[test]
    fn test_effect_chain_order() {
        let (channel, context) = live_channel(ChannelOptions::default());
        let first = trim();
        let second = trim();
        channel.add_effect(&first).unwrap();
        channel.add_effect(&second).unwrap();
        assert_eq!(channel.effects(), vec![first.clone(), second.clone()]);

        let (_, first_out) = first.endpoints().unwrap();
        let (second_in, _) = second.endpoints().unwrap();
        assert!(context.graph().outputs(first_out).contains(&second_in));

        channel.remove_effect(&first).unwrap();
        assert_eq!(channel.effects(), vec![second.clone()]);
        assert!(!first.is_attached());
        assert!(first.endpoints().is_none());
        assert!(matches!(
            channel.remove_effect(&first),
            Err(EngineError::NotAttached(_))
        ));
    }

    #[test]
    fn test_effect_processes_channel_signal() {
        let (channel, context) = live_channel(ChannelOptions::default());
        let clip = clip();
        channel.attach_audio_clip(&clip).unwrap();
        let effect = trim();
        effect.set_parameter("gain", 0.5).unwrap();
        channel.add_effect(&effect).unwrap();

        clip.play().unwrap();
        let mut block = [0.0f32; 8];
        context.render(&mut block);
        assert!(block.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_injected_diagnostics_while_detached() {
        let sink = Arc::new(RecordingSink::default());
        let channel = Channel::with_diagnostics(
            ChannelOptions::labeled("fx"),
            Diagnostics::with_sink(sink.clone(), DebuggerOptions::default()),
        );
        assert!(channel.add_effect(&trim()).is_err());
        assert!(channel.set_volume(0.5).is_err());
        let entries = sink.entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(level, _)| *level == "error"));
        assert!(entries[0].1.contains("fx"));
    }

    #[test]
    fn test_pan_validation() {
        let channel = Channel::default();
        assert!(matches!(
            channel.set_pan_level(0.5),
            Err(EngineError::ChannelNotLive(_))
        ));
        let (channel, _context) = live_channel(ChannelOptions::default());
        channel.set_pan_level(-0.5).unwrap();
        assert!(channel.set_pan_level(1.5).is_err());
        assert_eq!(channel.pan_level(), Some(-0.5));
        channel.set_volume(0.8).unwrap();
        assert_eq!(channel.volume(), Some(0.8));
    }

    #[test]
    fn test_release_keeps_members() {
        let (channel, context) = live_channel(ChannelOptions::default());
        let clip = clip();
        let effect = trim();
        channel.attach_audio_clip(&clip).unwrap();
        channel.add_effect(&effect).unwrap();
        clip.play().unwrap();

        channel.release_live();
        assert_eq!(context.graph().node_count(), 1);
        assert!(!channel.is_live());
        assert!(!clip.is_playing());
        assert!(clip.has_attached_to_channel());
        assert!(effect.is_attached());

        channel
            .initialize_on_master_attachment(MasterId::next(), &context, context.destination())
            .unwrap();
        assert!(clip.is_live());
        assert!(effect.endpoints().is_some());
    }
}
