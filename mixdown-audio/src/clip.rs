//! Audio clip - playable source with a voice pool, gain/pan and analyser taps
//!
//! A clip's signal path is rebuilt whenever a tap is toggled:
//!
//! ```text
//! voices -> [pre tap] -> gain -> pan -> [post tap] -> channel entry
//! ```
//!
//! Voice completion is reported asynchronously by the render side and
//! applied on the next control-thread call; progress and end events are
//! delivered from [`AudioClip::pump`].

use crate::clock::format_mm_ss;
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, EngineResult};
use crate::events::{ClipEvent, ClipEventKind, EventRegistry, ListenerHandle, ProgressEvent};
use crate::graph::{NodeId, VoiceEnded, VoiceSource};
use crate::ids::{ChannelId, ClipId, VoiceId};
use crate::sample::SampleData;
use crate::ticker::ProgressTicker;
use crate::voice::{Voice, VoicePool, DEFAULT_MAX_VOICES};
use crossbeam_channel::{unbounded, Receiver, Sender};
use mixdown_analysis::{AnalyserConfig, AnalyserTap};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::sync::Arc;

/// Analyser tap position relative to the clip's gain/pan stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapPosition {
    /// Observes voices before gain and pan
    Pre,
    /// Observes the signal after pan, before the channel
    Post,
}

impl TapPosition {
    fn index(self) -> usize {
        match self {
            TapPosition::Pre => 0,
            TapPosition::Post => 1,
        }
    }
}

/// Where a clip feeds into its channel
#[derive(Clone)]
pub(crate) struct BusPort {
    pub(crate) channel: ChannelId,
    pub(crate) context: Context,
    pub(crate) entry: NodeId,
}

struct TapSlot {
    enabled: bool,
    config: AnalyserConfig,
    node: Option<NodeId>,
    /// Reusable output buffers, refreshed in place on each read
    float: Vec<f32>,
    bytes: Vec<u8>,
    spectrum: Vec<f32>,
}

impl TapSlot {
    fn new() -> Self {
        let config = AnalyserConfig::default();
        Self {
            enabled: false,
            config,
            node: None,
            float: vec![0.0; config.fft_size],
            bytes: vec![128; config.fft_size],
            spectrum: vec![0.0; config.bin_count()],
        }
    }

    fn resize(&mut self) {
        self.float.resize(self.config.fft_size, 0.0);
        self.bytes.resize(self.config.fft_size, 128);
        self.spectrum.resize(self.config.bin_count(), 0.0);
    }
}

struct ClipLive {
    context: Context,
    gain: NodeId,
    pan: NodeId,
    destination: NodeId,
}

struct ClipState {
    gain: f32,
    pan: f32,
    looping: bool,
    pool: VoicePool,
    playing: bool,
    /// Bus time of the most recent start
    start_time: f64,
    /// Source position at the most recent start
    offset_at_start: f64,
    ticker: ProgressTicker,
    taps: [TapSlot; 2],
    channel: Option<ChannelId>,
    live: Option<ClipLive>,
    /// Events waiting for the next pump
    pending: Vec<ClipEvent>,
    /// Sink used while not live; after a detach, the last master's
    diagnostics: Diagnostics,
}

struct ClipShared {
    id: ClipId,
    data: Arc<SampleData>,
    state: Mutex<ClipState>,
    events: Mutex<EventRegistry>,
    ended_tx: Sender<VoiceEnded>,
    ended_rx: Receiver<VoiceEnded>,
}

/// Playable sound bound to decoded sample data
///
/// Cloning yields another handle to the same clip.
#[derive(Clone)]
pub struct AudioClip {
    shared: Arc<ClipShared>,
}

impl AudioClip {
    /// Create a detached clip
    pub fn new(data: impl Into<Arc<SampleData>>) -> Self {
        Self::with_diagnostics(data, Diagnostics::default())
    }

    /// Create a detached clip reporting to `diagnostics` until attached
    pub fn with_diagnostics(data: impl Into<Arc<SampleData>>, diagnostics: Diagnostics) -> Self {
        let (ended_tx, ended_rx) = unbounded();
        Self {
            shared: Arc::new(ClipShared {
                id: ClipId::next(),
                data: data.into(),
                state: Mutex::new(ClipState {
                    gain: 1.0,
                    pan: 0.0,
                    looping: false,
                    pool: VoicePool::new(DEFAULT_MAX_VOICES),
                    playing: false,
                    start_time: 0.0,
                    offset_at_start: 0.0,
                    ticker: ProgressTicker::default(),
                    taps: [TapSlot::new(), TapSlot::new()],
                    channel: None,
                    live: None,
                    pending: Vec::new(),
                    diagnostics,
                }),
                events: Mutex::new(EventRegistry::new()),
                ended_tx,
                ended_rx,
            }),
        }
    }

    pub fn id(&self) -> ClipId {
        self.shared.id
    }

    pub fn data(&self) -> &Arc<SampleData> {
        &self.shared.data
    }

    /// Whether the clip belongs to a channel
    pub fn has_attached_to_channel(&self) -> bool {
        self.shared.state.lock().channel.is_some()
    }

    /// Whether the clip has live stages in a master's graph
    pub fn is_live(&self) -> bool {
        self.shared.state.lock().live.is_some()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.shared.state.lock().channel
    }

    fn diagnostics(state: &ClipState) -> &Diagnostics {
        state
            .live
            .as_ref()
            .map_or(&state.diagnostics, |l| l.context.diagnostics())
    }

    fn report(&self, state: &ClipState, error: EngineError, details: &[&str]) -> EngineError {
        Self::diagnostics(state).report(error, details)
    }

    fn not_live(&self, state: &ClipState, action: &str) -> EngineError {
        if state.channel.is_none() {
            self.report(
                state,
                EngineError::NotAttached(self.id().to_string()),
                &[&format!("Call Channel::attach_audio_clip before trying to {action}.")],
            )
        } else {
            self.report(
                state,
                EngineError::ChannelNotLive(format!("channel of {}", self.id())),
                &["Attach the clip's channel to a master first."],
            )
        }
    }

    // ---- playback ----

    /// Start a voice now, from the beginning of the source
    pub fn play(&self) -> EngineResult<VoiceId> {
        self.play_at(None, 0.0)
    }

    /// Start a voice at bus time `timestamp` (default: now), `offset`
    /// seconds into the source.
    ///
    /// When the pool already holds `max_voices` voices the request is
    /// dropped and [`EngineError::VoiceAdmissionRejected`] is returned.
    pub fn play_at(&self, timestamp: Option<f64>, offset: f64) -> EngineResult<VoiceId> {
        let mut state = self.shared.state.lock();
        self.apply_completions(&mut state);

        let Some(live) = state.live.as_ref() else {
            return Err(self.not_live(&state, "play it"));
        };
        if !offset.is_finite() || offset < 0.0 {
            return Err(self.report(
                &state,
                EngineError::invalid("offset", format!("{offset} is not a non-negative number")),
                &[],
            ));
        }
        if timestamp.is_some_and(|t| !t.is_finite()) {
            return Err(self.report(
                &state,
                EngineError::invalid("timestamp", "must be finite"),
                &[],
            ));
        }
        if state.pool.is_full() {
            let error = EngineError::VoiceAdmissionRejected {
                max_voices: state.pool.max_voices(),
            };
            Self::diagnostics(&state).log(&error.to_string(), &[]);
            return Err(error);
        }

        let context = live.context.clone();
        let entry = Self::entry_node(&state).unwrap_or(live.gain);
        let now = context.current_time();
        let id = VoiceId::next();
        let source = VoiceSource::new(
            id,
            self.shared.data.clone(),
            timestamp.unwrap_or(now),
            offset,
            state.looping,
            self.shared.ended_tx.clone(),
        );

        let mut graph = context.graph();
        let node = graph.add_voice(source);
        graph.connect(node, entry);
        let voice = Voice {
            id,
            node,
            started_at: now,
        };
        if let Err(voice) = state.pool.admit(voice) {
            graph.remove(voice.node);
            return Err(EngineError::VoiceAdmissionRejected {
                max_voices: state.pool.max_voices(),
            });
        }
        drop(graph);

        state.start_time = now;
        state.offset_at_start = offset;
        state.playing = true;
        state.ticker.start(now);
        Ok(id)
    }

    /// Stop and disconnect every voice
    pub fn stop(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if state.channel.is_none() {
            return Err(self.report(
                &state,
                EngineError::NotAttached(self.id().to_string()),
                &["Call Channel::attach_audio_clip before stopping this clip."],
            ));
        }
        Self::stop_voices(&mut state);
        // Completions for voices that are already gone
        while self.shared.ended_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn stop_voices(state: &mut ClipState) {
        let voices = state.pool.drain();
        if let Some(live) = &state.live {
            let mut graph = live.context.graph();
            for voice in voices {
                graph.remove(voice.node);
            }
        }
        state.playing = false;
        state.ticker.cancel();
    }

    /// Apply completion notifications from the render side
    fn apply_completions(&self, state: &mut ClipState) {
        while let Ok(ended) = self.shared.ended_rx.try_recv() {
            let Some((index, voice)) = state.pool.remove(ended.voice) else {
                continue;
            };
            if let Some(live) = &state.live {
                live.context.graph().remove(voice.node);
            }
            // A single-voice pool tracks its oldest voice; larger pools
            // count as playing while any voice remains.
            let stops = if state.pool.max_voices() <= 1 {
                index == 0
            } else {
                state.pool.is_empty()
            };
            if stops && state.playing {
                state.playing = false;
                state.ticker.cancel();
                state.pending.push(ClipEvent::Ended { voice: ended.voice });
            }
        }
    }

    /// Apply pending completions, emit a progress tick if due and deliver events
    pub fn pump(&self) {
        let events = {
            let mut state = self.shared.state.lock();
            self.apply_completions(&mut state);

            if state.playing {
                if let Some(now) = state.live.as_ref().map(|l| l.context.current_time()) {
                    if state.ticker.poll(now) {
                        let current = state.offset_at_start + (now - state.start_time);
                        let event = ClipEvent::Progress(ProgressEvent {
                            current,
                            start_time: state.start_time,
                            offset: state.offset_at_start,
                            bus_timestamp: now,
                            formatted: format_mm_ss(current),
                        });
                        state.pending.push(event);
                    }
                }
            }
            std::mem::take(&mut state.pending)
        };

        for event in events {
            let callbacks = self.shared.events.lock().take_callbacks(event.kind());
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        let mut state = self.shared.state.lock();
        self.apply_completions(&mut state);
        state.playing
    }

    /// Source position in seconds; 0 when stopped or detached
    pub fn current_playback_time(&self) -> f64 {
        let mut state = self.shared.state.lock();
        self.apply_completions(&mut state);
        match (&state.live, state.playing) {
            (Some(live), true) => {
                state.offset_at_start + (live.context.current_time() - state.start_time)
            }
            _ => 0.0,
        }
    }

    /// Bus time of the most recent start
    pub fn start_time(&self) -> f64 {
        self.shared.state.lock().start_time
    }

    pub fn voice_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        self.apply_completions(&mut state);
        state.pool.len()
    }

    /// Active voices, oldest first
    pub fn active_voices(&self) -> Vec<VoiceId> {
        let mut state = self.shared.state.lock();
        self.apply_completions(&mut state);
        state.pool.iter().map(|v| v.id).collect()
    }

    pub fn max_voices(&self) -> usize {
        self.shared.state.lock().pool.max_voices()
    }

    /// Change how many voices may play at once
    pub fn set_max_voices(&self, max_voices: usize) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if max_voices == 0 {
            return Err(self.report(
                &state,
                EngineError::invalid("max voices", "must be at least 1"),
                &[],
            ));
        }
        if max_voices != DEFAULT_MAX_VOICES {
            Self::diagnostics(&state).warn(
                &format!("{} now allows {max_voices} simultaneous voices", self.id()),
                &[
                    "Progress events track a single playhead: the most recent start.",
                    "With more than one voice, playback counts as stopped only once every voice has ended.",
                ],
            );
        }
        state.pool.set_max_voices(max_voices);
        Ok(())
    }

    /// Set the loop flag (default `true`) for future and in-flight voices.
    /// Returns the new flag.
    pub fn set_loop(&self, enable: Option<bool>) -> bool {
        let mut state = self.shared.state.lock();
        let looping = enable.unwrap_or(true);
        state.looping = looping;
        if let Some(live) = &state.live {
            let mut graph = live.context.graph();
            for voice in state.pool.iter() {
                graph.set_voice_loop(voice.node, looping);
            }
        }
        looping
    }

    pub fn is_looping(&self) -> bool {
        self.shared.state.lock().looping
    }

    // ---- gain / pan ----

    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = state.live.as_ref() else {
            return Err(self.report(
                &state,
                EngineError::ResourceUnavailable(format!("gain stage of {}", self.id())),
                &["Attach the clip to a live channel before setting the volume."],
            ));
        };
        if !volume.is_finite() {
            return Err(self.report(&state, EngineError::invalid("volume", "must be finite"), &[]));
        }
        live.context.graph().set_gain(live.gain, volume);
        state.gain = volume;
        Ok(())
    }

    /// Set pan in [-1, 1]; other values are rejected and leave pan unchanged
    pub fn set_pan_level(&self, pan: f32) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let Some(live) = state.live.as_ref() else {
            return Err(self.report(
                &state,
                EngineError::ResourceUnavailable(format!("pan stage of {}", self.id())),
                &["Attach the clip to a live channel before setting the pan level."],
            ));
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

    /// Live gain value
    pub fn volume(&self) -> Option<f32> {
        let state = self.shared.state.lock();
        let live = state.live.as_ref()?;
        let gain = live.context.graph().gain(live.gain);
        gain
    }

    /// Live pan value
    pub fn pan_level(&self) -> Option<f32> {
        let state = self.shared.state.lock();
        let live = state.live.as_ref()?;
        let pan = live.context.graph().pan(live.pan);
        pan
    }

    // ---- routing ----

    fn entry_node(state: &ClipState) -> Option<NodeId> {
        let live = state.live.as_ref()?;
        let pre = &state.taps[TapPosition::Pre.index()];
        Some(match pre.node {
            Some(node) if pre.enabled => node,
            _ => live.gain,
        })
    }

    /// Recompute the clip's connections from the current tap flags
    pub fn rebuild_routing(&self) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        self.rebuild(&mut state)
    }

    fn rebuild(&self, state: &mut ClipState) -> EngineResult<()> {
        if state.live.is_none() {
            return Err(self.report(
                state,
                EngineError::ResourceUnavailable(format!("gain/pan stages of {}", self.id())),
                &["The clip must be attached to a live channel before its routing can be rebuilt."],
            ));
        }
        let ClipState {
            live, taps, pool, ..
        } = state;
        let Some(live) = live.as_ref() else {
            return Ok(());
        };
        let mut graph = live.context.graph();

        for slot in taps.iter_mut() {
            if slot.enabled && slot.node.is_none() {
                let tap = AnalyserTap::new(slot.config)?;
                slot.node = Some(graph.add_analyser(tap));
            }
        }

        let [pre, post] = taps;
        for node in [pre.node, post.node]
            .into_iter()
            .flatten()
            .chain([live.gain, live.pan])
        {
            graph.disconnect(node);
        }
        for voice in pool.iter() {
            graph.disconnect(voice.node);
        }

        let entry = match pre.node.filter(|_| pre.enabled) {
            Some(node) => {
                graph.connect(node, live.gain);
                node
            }
            None => live.gain,
        };
        graph.connect(live.gain, live.pan);
        match post.node.filter(|_| post.enabled) {
            Some(node) => {
                graph.connect(live.pan, node);
                graph.connect(node, live.destination);
            }
            None => {
                graph.connect(live.pan, live.destination);
            }
        }
        for voice in pool.iter() {
            graph.connect(voice.node, entry);
        }
        Ok(())
    }

    /// Enable or disable a tap. While detached only the flag changes;
    /// the tap is built on attachment.
    pub fn set_tap_enabled(&self, tap: TapPosition, enabled: bool) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        state.taps[tap.index()].enabled = enabled;
        if state.live.is_some() {
            self.rebuild(&mut state)
        } else {
            Ok(())
        }
    }

    pub fn enable_tap(&self, tap: TapPosition) -> EngineResult<()> {
        self.set_tap_enabled(tap, true)
    }

    pub fn disable_tap(&self, tap: TapPosition) -> EngineResult<()> {
        self.set_tap_enabled(tap, false)
    }

    pub fn is_tap_enabled(&self, tap: TapPosition) -> bool {
        self.shared.state.lock().taps[tap.index()].enabled
    }

    /// Change a tap's window size and smoothing
    pub fn configure_tap(&self, tap: TapPosition, config: AnalyserConfig) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if let Err(error) = config.validate() {
            return Err(self.report(&state, error.into(), &[]));
        }
        let ClipState { live, taps, .. } = &mut *state;
        let slot = &mut taps[tap.index()];
        if let (Some(live), Some(node)) = (live.as_ref(), slot.node) {
            if let Some(analyser) = live.context.graph().analyser_mut(node) {
                analyser.reconfigure(config)?;
            }
        }
        slot.config = config;
        slot.resize();
        Ok(())
    }

    pub fn tap_config(&self, tap: TapPosition) -> AnalyserConfig {
        self.shared.state.lock().taps[tap.index()].config
    }

    /// Lock the clip and refresh one tap's buffer in place.
    /// The returned guard keeps the clip locked; drop it before calling
    /// other clip methods.
    fn read_tap<T: ?Sized>(
        &self,
        tap: TapPosition,
        refresh: impl FnOnce(&mut AnalyserTap, &mut TapSlot),
        select: impl FnOnce(&mut TapSlot) -> &mut T,
    ) -> Option<MappedMutexGuard<'_, T>> {
        let mut state = self.shared.state.lock();
        {
            let ClipState { live, taps, .. } = &mut *state;
            let slot = &mut taps[tap.index()];
            let node = slot.node?;
            let live = live.as_ref()?;
            let mut graph = live.context.graph();
            let analyser = graph.analyser_mut(node)?;
            refresh(analyser, slot);
        }
        Some(MutexGuard::map(state, |s| select(&mut s.taps[tap.index()])))
    }

    /// Time-domain window of a tap; `None` if the tap has never been live
    /// since the clip was last attached
    pub fn waveform_float_data(&self, tap: TapPosition) -> Option<MappedMutexGuard<'_, [f32]>> {
        self.read_tap(
            tap,
            |analyser, slot| analyser.copy_float(&mut slot.float),
            |slot| slot.float.as_mut_slice(),
        )
    }

    /// Time-domain window as bytes (128 = silence)
    pub fn waveform_byte_data(&self, tap: TapPosition) -> Option<MappedMutexGuard<'_, [u8]>> {
        self.read_tap(
            tap,
            |analyser, slot| analyser.copy_byte(&mut slot.bytes),
            |slot| slot.bytes.as_mut_slice(),
        )
    }

    /// Smoothed magnitude spectrum in decibels
    pub fn frequency_data(&self, tap: TapPosition) -> Option<MappedMutexGuard<'_, [f32]>> {
        self.read_tap(
            tap,
            |analyser, slot| analyser.frequency_data(&mut slot.spectrum),
            |slot| slot.spectrum.as_mut_slice(),
        )
    }

    // ---- attachment ----

    pub(crate) fn bind(&self, channel: ChannelId) {
        self.shared.state.lock().channel = Some(channel);
    }

    /// Allocate gain/pan stages and wire them into `port`
    pub(crate) fn initialize_on_attaching(&self, port: &BusPort) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if state.live.is_some() {
            Self::release(&mut state);
        }
        let (gain, pan) = {
            let mut graph = port.context.graph();
            (graph.add_gain(state.gain), graph.add_panner(state.pan))
        };
        state.live = Some(ClipLive {
            context: port.context.clone(),
            gain,
            pan,
            destination: port.entry,
        });
        state.diagnostics = port.context.diagnostics().clone();
        state.channel = Some(port.channel);
        self.rebuild(&mut state)
    }

    /// Stop everything and drop all live stages; membership is kept
    pub(crate) fn release_live(&self) {
        let mut state = self.shared.state.lock();
        Self::release(&mut state);
        state.pending.clear();
        while self.shared.ended_rx.try_recv().is_ok() {}
    }

    fn release(state: &mut ClipState) {
        Self::stop_voices(state);
        let Some(live) = state.live.take() else {
            return;
        };
        let mut graph = live.context.graph();
        for slot in state.taps.iter_mut() {
            if let Some(node) = slot.node.take() {
                graph.remove(node);
            }
        }
        graph.remove(live.gain);
        graph.remove(live.pan);
    }

    /// Leave the channel entirely
    pub(crate) fn unbind(&self) {
        self.release_live();
        self.shared.state.lock().channel = None;
    }

    // ---- events ----

    pub fn add_event_listener(
        &self,
        kind: ClipEventKind,
        listener: impl Fn(&ClipEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.events.lock().add(kind, Arc::new(listener))
    }

    /// Listen for a single event
    pub fn once(
        &self,
        kind: ClipEventKind,
        listener: impl Fn(&ClipEvent) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.shared.events.lock().once(kind, Arc::new(listener))
    }

    pub fn remove_event_listener(&self, handle: ListenerHandle) -> bool {
        self.shared.events.lock().remove(handle)
    }

    /// Remove all listeners, or only those for `kind`
    pub fn clear_event_listeners(&self, kind: Option<ClipEventKind>) {
        self.shared.events.lock().clear(kind);
    }

    pub fn listener_count(&self, kind: ClipEventKind) -> usize {
        self.shared.events.lock().listener_count(kind)
    }

    // ---- derived properties ----

    pub fn duration(&self) -> f64 {
        self.shared.data.duration()
    }

    pub fn formatted_duration(&self) -> String {
        self.shared.data.formatted_duration()
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.data.sample_rate()
    }

    pub fn number_of_channels(&self) -> usize {
        self.shared.data.number_of_channels()
    }

    pub fn byte_length(&self) -> usize {
        self.shared.data.byte_length()
    }
}

impl PartialEq for AudioClip {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for AudioClip {}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("id", &self.shared.id)
            .field("duration", &self.duration())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::tests::RecordingSink;
    use crate::graph::NodeRole;
    use crate::options::DebuggerOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RATE: u32 = 1000;

    /// Mono clip of `frames` frames at 1 kHz, so one frame is one millisecond
    fn clip(frames: usize) -> AudioClip {
        AudioClip::new(SampleData::new(vec![vec![0.5; frames]], RATE).unwrap())
    }

    fn attach(clip: &AudioClip) -> (Context, BusPort) {
        let context = Context::new(RATE, Diagnostics::default());
        let port = BusPort {
            channel: ChannelId::next(),
            context: context.clone(),
            entry: context.destination(),
        };
        clip.bind(port.channel);
        clip.initialize_on_attaching(&port).unwrap();
        (context, port)
    }

    fn render(context: &Context, frames: usize) {
        let mut block = vec![0.0f32; 2 * frames];
        context.render(&mut block);
    }

    #[test]
    fn test_play_requires_attachment() {
        let clip = clip(1000);
        assert!(matches!(clip.play(), Err(EngineError::NotAttached(_))));
        assert!(matches!(clip.stop(), Err(EngineError::NotAttached(_))));
        assert!(!clip.is_playing());
    }

    #[test]
    fn test_bound_but_not_live() {
        let clip = clip(1000);
        clip.bind(ChannelId::next());
        assert!(matches!(clip.play(), Err(EngineError::ChannelNotLive(_))));
    }

    #[test]
    fn test_admission_drops_extra_plays() {
        let clip = clip(1000);
        let _ctx = attach(&clip);
        clip.set_max_voices(3).unwrap();
        for _ in 0..3 {
            clip.play().unwrap();
        }
        assert!(matches!(
            clip.play(),
            Err(EngineError::VoiceAdmissionRejected { max_voices: 3 })
        ));
        assert_eq!(clip.voice_count(), 3);
    }

    #[test]
    fn test_stop_clears_pool_and_graph() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        let before = context.graph().node_count();
        clip.play().unwrap();
        assert_eq!(context.graph().node_count(), before + 1);

        clip.stop().unwrap();
        assert!(!clip.is_playing());
        assert_eq!(clip.voice_count(), 0);
        assert_eq!(context.graph().node_count(), before);
        assert_eq!(clip.current_playback_time(), 0.0);
    }

    #[test]
    fn test_natural_completion_clears_playing() {
        let clip = clip(100);
        let (context, _) = attach(&clip);
        clip.play().unwrap();
        render(&context, 50);
        assert!(clip.is_playing());
        render(&context, 60);
        assert!(!clip.is_playing());
        assert_eq!(clip.voice_count(), 0);
    }

    #[test]
    fn test_stop_after_completion_is_harmless() {
        let clip = clip(100);
        let (context, _) = attach(&clip);
        clip.play().unwrap();
        render(&context, 200);
        clip.stop().unwrap();
        clip.stop().unwrap();
        assert_eq!(clip.voice_count(), 0);
        // A fresh play is admitted again
        assert!(clip.play().is_ok());
    }

    #[test]
    fn test_multi_voice_pool_plays_until_empty() {
        let clip = clip(100);
        let (context, _) = attach(&clip);
        clip.set_max_voices(2).unwrap();
        clip.play().unwrap();
        render(&context, 50);
        clip.play().unwrap();
        render(&context, 70);
        // First voice ended, second still running
        assert_eq!(clip.voice_count(), 1);
        assert!(clip.is_playing());
        render(&context, 50);
        assert!(!clip.is_playing());
    }

    #[test]
    fn test_playback_time_tracks_clock() {
        let clip = clip(2000);
        let (context, _) = attach(&clip);
        clip.play_at(None, 0.5).unwrap();
        assert_eq!(clip.current_playback_time(), 0.5);
        render(&context, 250);
        let first = clip.current_playback_time();
        render(&context, 250);
        let second = clip.current_playback_time();
        assert!((first - 0.75).abs() < 1e-9);
        assert!(second >= first);
    }

    #[test]
    fn test_rejects_bad_offset() {
        let clip = clip(1000);
        let _ctx = attach(&clip);
        assert!(matches!(
            clip.play_at(None, -1.0),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert_eq!(clip.voice_count(), 0);
    }

    #[test]
    fn test_pan_validation() {
        let clip = clip(1000);
        let _ctx = attach(&clip);
        clip.set_pan_level(0.25).unwrap();
        assert!(matches!(
            clip.set_pan_level(1.5),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert!(clip.set_pan_level(-2.0).is_err());
        assert_eq!(clip.pan_level(), Some(0.25));
        for pan in [0.0, 1.0, -1.0] {
            assert!(clip.set_pan_level(pan).is_ok());
        }
    }

    #[test]
    fn test_volume_requires_live_stages() {
        let clip = clip(1000);
        assert!(matches!(
            clip.set_volume(0.5),
            Err(EngineError::ResourceUnavailable(_))
        ));
        assert_eq!(clip.volume(), None);
        let _ctx = attach(&clip);
        clip.set_volume(0.5).unwrap();
        assert_eq!(clip.volume(), Some(0.5));
    }

    #[test]
    fn test_loop_applies_to_in_flight_voices() {
        let clip = clip(100);
        let (context, _) = attach(&clip);
        clip.play().unwrap();
        assert!(clip.set_loop(None));
        render(&context, 350);
        assert!(clip.is_playing());
        assert!(!clip.set_loop(Some(false)));
        render(&context, 200);
        assert!(!clip.is_playing());
    }

    #[test]
    fn test_routing_without_taps() {
        let clip = clip(1000);
        let (context, port) = attach(&clip);
        clip.play().unwrap();
        let graph = context.graph();
        let edges = graph.edges();
        // voice -> gain -> pan -> destination
        assert_eq!(edges.len(), 3);
        let into_destination: Vec<_> = edges.iter().filter(|(_, to)| *to == port.entry).collect();
        assert_eq!(into_destination.len(), 1);
        assert_eq!(graph.role(into_destination[0].0), Some(NodeRole::Panner));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        clip.enable_tap(TapPosition::Pre).unwrap();
        clip.enable_tap(TapPosition::Post).unwrap();
        clip.play().unwrap();

        clip.rebuild_routing().unwrap();
        let first = context.graph().edges();
        clip.rebuild_routing().unwrap();
        assert_eq!(context.graph().edges(), first);
        // voice -> pre -> gain -> pan -> post -> destination
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_rebuild_requires_live_stages() {
        let clip = clip(1000);
        assert!(matches!(
            clip.rebuild_routing(),
            Err(EngineError::ResourceUnavailable(_))
        ));
    }

    #[test]
    fn test_taps_observe_signal() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        assert!(clip.waveform_float_data(TapPosition::Pre).is_none());

        clip.configure_tap(
            TapPosition::Post,
            AnalyserConfig {
                fft_size: 64,
                smoothing: 0.0,
            },
        )
        .unwrap();
        clip.enable_tap(TapPosition::Post).unwrap();
        clip.set_volume(0.5).unwrap();
        clip.play().unwrap();
        render(&context, 100);

        {
            let data = clip.waveform_float_data(TapPosition::Post).unwrap();
            assert_eq!(data.len(), 64);
            assert!(data.iter().all(|&s| (s - 0.25).abs() < 1e-6));
        }
        {
            let bytes = clip.waveform_byte_data(TapPosition::Post).unwrap();
            assert!(bytes.iter().all(|&b| b == 160));
        }
        assert_eq!(clip.frequency_data(TapPosition::Post).unwrap().len(), 32);
    }

    #[test]
    fn test_tap_flag_survives_detached_toggle() {
        let clip = clip(1000);
        clip.enable_tap(TapPosition::Pre).unwrap();
        assert!(clip.is_tap_enabled(TapPosition::Pre));
        assert!(clip.waveform_float_data(TapPosition::Pre).is_none());
        let _ctx = attach(&clip);
        assert!(clip.waveform_float_data(TapPosition::Pre).is_some());
    }

    #[test]
    fn test_release_removes_all_nodes() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        clip.enable_tap(TapPosition::Post).unwrap();
        clip.play().unwrap();
        clip.unbind();
        assert_eq!(context.graph().node_count(), 1);
        assert!(!clip.has_attached_to_channel());
        assert!(clip.waveform_float_data(TapPosition::Post).is_none());
    }

    #[test]
    fn test_progress_events_on_cadence() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        let progress = Arc::new(AtomicUsize::new(0));
        let seen = progress.clone();
        clip.add_event_listener(ClipEventKind::Progress, move |event| {
            if let ClipEvent::Progress(p) = event {
                assert!(p.current >= 0.0);
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        clip.play().unwrap();
        clip.pump();
        assert_eq!(progress.load(Ordering::SeqCst), 0);
        for _ in 0..5 {
            render(&context, 21);
            clip.pump();
        }
        assert_eq!(progress.load(Ordering::SeqCst), 5);

        clip.stop().unwrap();
        render(&context, 100);
        clip.pump();
        assert_eq!(progress.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_ended_event() {
        let clip = clip(50);
        let (context, _) = attach(&clip);
        let ended = Arc::new(AtomicUsize::new(0));
        let seen = ended.clone();
        clip.once(ClipEventKind::Ended, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        clip.play().unwrap();
        render(&context, 100);
        clip.pump();
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_call_back_into_clip() {
        let clip = clip(50);
        let (context, _) = attach(&clip);
        let inner = clip.clone();
        clip.add_event_listener(ClipEventKind::Ended, move |_| {
            assert!(!inner.is_playing());
        });
        clip.play().unwrap();
        render(&context, 100);
        clip.pump();
    }

    #[test]
    fn test_max_voices_warning_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let clip = AudioClip::with_diagnostics(
            SampleData::new(vec![vec![0.5; 100]], RATE).unwrap(),
            Diagnostics::with_sink(sink.clone(), DebuggerOptions::default()),
        );
        clip.set_max_voices(1).unwrap();
        assert!(sink.entries.lock().is_empty());
        clip.set_max_voices(4).unwrap();
        assert_eq!(clip.max_voices(), 4);
        let entries = sink.entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "warn");
        assert!(entries[0].1.contains("4 simultaneous voices"));
    }

    #[test]
    fn test_progress_reports_formatted_position() {
        let clip = clip(70_000);
        let (context, _) = attach(&clip);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        clip.add_event_listener(ClipEventKind::Progress, move |event| {
            if let ClipEvent::Progress(p) = event {
                sink.lock().push((p.offset, p.formatted.clone()));
            }
        });

        clip.play_at(None, 65.0).unwrap();
        render(&context, 21);
        clip.pump();
        assert_eq!(*seen.lock(), vec![(65.0, "01:05".to_string())]);
    }

    #[test]
    fn test_detach_cancels_progress() {
        let clip = clip(1000);
        let (context, _) = attach(&clip);
        let progress = Arc::new(AtomicUsize::new(0));
        let seen = progress.clone();
        clip.add_event_listener(ClipEventKind::Progress, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        clip.play().unwrap();
        render(&context, 21);
        clip.pump();
        assert_eq!(progress.load(Ordering::SeqCst), 1);

        clip.release_live();
        render(&context, 100);
        clip.pump();
        assert_eq!(progress.load(Ordering::SeqCst), 1);

        // Reattaching does not resume the old playhead
        let (context, _) = attach(&clip);
        render(&context, 100);
        clip.pump();
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        assert!(!clip.is_playing());
    }

    #[test]
    fn test_detach_drops_queued_events() {
        let clip = clip(50);
        let (context, _) = attach(&clip);
        let ended = Arc::new(AtomicUsize::new(0));
        let seen = ended.clone();
        clip.add_event_listener(ClipEventKind::Ended, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        clip.play().unwrap();
        render(&context, 100);
        // Completion applied, Ended queued but not yet delivered
        assert!(!clip.is_playing());

        clip.release_live();
        let _ctx = attach(&clip);
        clip.pump();
        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_count() {
        let clip = clip(50);
        let handle = clip.add_event_listener(ClipEventKind::Progress, |_| {});
        clip.once(ClipEventKind::Ended, |_| {});
        assert_eq!(clip.listener_count(ClipEventKind::Progress), 1);
        assert!(clip.remove_event_listener(handle));
        assert_eq!(clip.listener_count(ClipEventKind::Progress), 0);
        clip.clear_event_listeners(None);
        assert_eq!(clip.listener_count(ClipEventKind::Ended), 0);
    }

    #[test]
    fn test_derived_properties() {
        let clip = clip(2000);
        assert_eq!(clip.duration(), 2.0);
        assert_eq!(clip.formatted_duration(), "00:02");
        assert_eq!(clip.sample_rate(), RATE);
        assert_eq!(clip.number_of_channels(), 1);
        assert_eq!(clip.byte_length(), 2000 * 4);
    }
}
