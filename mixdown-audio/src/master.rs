//! Master - root bus that channels sum into
//!
//! Each master owns its own render context: graph, bus clock and
//! diagnostics. Rendering pulls from the output node.

use crate::channel::Channel;
use crate::context::{Context, Renderer};
use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, EngineResult};
use crate::graph::NodeId;
use crate::ids::MasterId;
use crate::options::EngineOptions;
use parking_lot::Mutex;
use std::sync::Arc;

struct MasterInner {
    id: MasterId,
    options: EngineOptions,
    context: Context,
    gain: NodeId,
    channels: Mutex<Vec<Channel>>,
}

/// Root mixing bus; clones share the bus
#[derive(Clone)]
pub struct Master {
    inner: Arc<MasterInner>,
}

impl Default for Master {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl Master {
    /// Master reporting through [`crate::TracingSink`] with `options.debugger`
    pub fn new(options: EngineOptions) -> Self {
        let diagnostics = Diagnostics::new(options.debugger);
        Self::with_diagnostics(options, diagnostics)
    }

    pub fn with_diagnostics(options: EngineOptions, diagnostics: Diagnostics) -> Self {
        let context = Context::new(options.sample_rate, diagnostics);
        let gain = {
            let mut graph = context.graph();
            let gain = graph.add_gain(1.0);
            let output = graph.output();
            graph.connect(gain, output);
            gain
        };
        let id = MasterId::next();
        tracing::debug!(master = %id, sample_rate = options.sample_rate, "master created");
        Self {
            inner: Arc::new(MasterInner {
                id,
                options,
                context,
                gain,
                channels: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> MasterId {
        self.inner.id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.context.sample_rate()
    }

    /// Bus time in seconds
    pub fn current_time(&self) -> f64 {
        self.inner.context.current_time()
    }

    fn report(&self, error: EngineError, details: &[&str]) -> EngineError {
        self.inner.context.diagnostics().report(error, details)
    }

    /// Bring `channel` live on this bus
    pub fn attach_channel(&self, channel: &Channel) -> EngineResult<()> {
        let mut channels = self.inner.channels.lock();
        if channels.contains(channel) || channel.is_live() {
            return Err(self.report(
                EngineError::AlreadyAttached(channel.id().to_string()),
                &["A channel can only be attached to one master at a time."],
            ));
        }
        if channels.len() >= self.inner.options.max_channels {
            return Err(self.report(
                EngineError::LimitReached {
                    what: "channels per master",
                    limit: self.inner.options.max_channels,
                },
                &[],
            ));
        }
        channel.initialize_on_master_attachment(self.id(), &self.inner.context, self.inner.gain)?;
        channels.push(channel.clone());
        Ok(())
    }

    /// Release `channel`'s live stages, and those of its clips and effects
    pub fn detach_channel(&self, channel: &Channel) -> EngineResult<()> {
        let mut channels = self.inner.channels.lock();
        let Some(index) = channels.iter().position(|c| c == channel) else {
            return Err(self.report(
                EngineError::NotAttached(channel.id().to_string()),
                &[&format!("The channel is not attached to {}.", self.id())],
            ));
        };
        let channel = channels.remove(index);
        channel.release_live();
        tracing::debug!(master = %self.id(), channel = %channel.id(), "channel detached");
        Ok(())
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.inner.channels.lock().clone()
    }

    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        if !volume.is_finite() {
            return Err(self.report(EngineError::invalid("volume", "must be finite"), &[]));
        }
        self.inner.context.graph().set_gain(self.inner.gain, volume);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.inner
            .context
            .graph()
            .gain(self.inner.gain)
            .unwrap_or(1.0)
    }

    /// Render interleaved stereo into `out`, advancing the bus clock
    pub fn render(&self, out: &mut [f32]) {
        self.inner.context.render(out);
    }

    /// `Send` handle for an audio thread
    pub fn renderer(&self) -> Renderer {
        Renderer::new(self.inner.context.clone())
    }

    /// Deliver pending clip events on every channel
    pub fn pump(&self) {
        let channels = self.channels();
        for channel in &channels {
            channel.pump();
        }
    }
}

impl Drop for MasterInner {
    /// Channels outlive the bus: release their live stages so they can join
    /// another master
    fn drop(&mut self) {
        for channel in self.channels.get_mut().drain(..) {
            channel.release_live();
        }
        tracing::debug!(master = %self.id, "master dropped");
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context)
            .finish()
    }
}
