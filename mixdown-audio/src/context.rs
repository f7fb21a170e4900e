//! Render context - graph, bus clock and diagnostics behind one master

use crate::clock::{BusClock, FrameClock};
use crate::diagnostics::Diagnostics;
use crate::graph::{Graph, NodeId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

struct ContextInner {
    sample_rate: u32,
    clock: FrameClock,
    graph: Mutex<Graph>,
    diagnostics: Diagnostics,
}

/// Shared handle to one master's processing context
///
/// Everything attached beneath a master lives in that master's context,
/// so their nodes share one graph and one bus clock.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(sample_rate: u32, diagnostics: Diagnostics) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                sample_rate,
                clock: FrameClock::new(sample_rate),
                graph: Mutex::new(Graph::new()),
                diagnostics,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Bus time in seconds
    pub fn current_time(&self) -> f64 {
        self.inner.clock.now()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.inner.clock
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    /// Terminal output node
    pub fn destination(&self) -> NodeId {
        self.inner.graph.lock().output()
    }

    /// Lock the graph. Do not hold the guard across calls into clips,
    /// channels or effects.
    pub fn graph(&self) -> MutexGuard<'_, Graph> {
        self.inner.graph.lock()
    }

    /// Whether both handles point at the same context
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Render interleaved stereo into `out` and advance the bus clock
    pub fn render(&self, out: &mut [f32]) {
        let start = self.current_time();
        self.inner
            .graph
            .lock()
            .render(out, start, self.inner.sample_rate);
        self.inner.clock.advance((out.len() / 2) as u64);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("sample_rate", &self.inner.sample_rate)
            .field("time", &self.current_time())
            .finish()
    }
}

/// `Send` handle for driving a context from an audio thread
#[derive(Clone)]
pub struct Renderer {
    context: Context,
}

impl Renderer {
    pub(crate) fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn sample_rate(&self) -> u32 {
        self.context.sample_rate()
    }

    /// Render interleaved stereo into `out`
    pub fn render(&self, out: &mut [f32]) {
        self.context.render(out);
    }
}
