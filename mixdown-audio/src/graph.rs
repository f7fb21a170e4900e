//! Signal graph - nodes, directed connections and block rendering
//!
//! Every node renders into one interleaved stereo block per render call.
//! Inputs are summed before a node processes, so a node with several
//! incoming connections acts as a bus. Nodes are visited in topological
//! order; connections that would close a cycle are refused.

use crate::effects::{StageError, StageInstance};
use crate::ids::VoiceId;
use crate::sample::SampleData;
use crossbeam_channel::Sender;
use mixdown_analysis::AnalyserTap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

/// Handle to a node inside one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Notification a voice sends once it plays past its last frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEnded {
    pub voice: VoiceId,
}

/// Broad node category, for inspecting topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Gain,
    Panner,
    Analyser,
    Stage,
    Voice,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceStatus {
    Playing,
    Ended,
}

/// One playback instance of a sample buffer
pub(crate) struct VoiceSource {
    id: VoiceId,
    data: Arc<SampleData>,
    /// Bus time at which output begins
    start_at: f64,
    /// Read position in source frames
    cursor: f64,
    /// Source frames advanced per output frame
    step: f64,
    looping: bool,
    status: VoiceStatus,
    on_end: Sender<VoiceEnded>,
}

impl VoiceSource {
    pub(crate) fn new(
        id: VoiceId,
        data: Arc<SampleData>,
        start_at: f64,
        offset_secs: f64,
        looping: bool,
        on_end: Sender<VoiceEnded>,
    ) -> Self {
        let cursor = offset_secs.max(0.0) * data.sample_rate() as f64;
        Self {
            id,
            data,
            start_at,
            cursor,
            step: 1.0,
            looping,
            status: VoiceStatus::Playing,
            on_end,
        }
    }

    fn finish(&mut self) {
        if self.status == VoiceStatus::Playing {
            self.status = VoiceStatus::Ended;
            // The owning clip may already be gone
            let _ = self.on_end.send(VoiceEnded { voice: self.id });
        }
    }

    fn render(&mut self, block: &mut [f32], block_start: f64, sample_rate: u32) {
        if self.status == VoiceStatus::Ended {
            return;
        }
        let len = self.data.length();
        if len == 0 {
            self.finish();
            return;
        }
        self.step = self.data.sample_rate() as f64 / sample_rate as f64;
        let frame_secs = 1.0 / sample_rate as f64;

        for (i, frame) in block.chunks_exact_mut(2).enumerate() {
            if block_start + i as f64 * frame_secs < self.start_at {
                continue;
            }
            if self.cursor >= len as f64 {
                if self.looping {
                    self.cursor %= len as f64;
                } else {
                    self.finish();
                    return;
                }
            }

            // Linear interpolation between neighbouring frames
            let index = self.cursor as usize;
            let frac = (self.cursor - index as f64) as f32;
            let (l0, r0) = self.data.stereo_frame(index);
            let next = if index + 1 < len {
                Some(index + 1)
            } else if self.looping {
                Some(0)
            } else {
                None
            };
            let (l1, r1) = next.map_or((l0, r0), |n| self.data.stereo_frame(n));
            frame[0] += l0 + (l1 - l0) * frac;
            frame[1] += r0 + (r1 - r0) * frac;

            self.cursor += self.step;
        }

        if !self.looping && self.cursor >= len as f64 {
            self.finish();
        }
    }
}

enum NodeKind {
    Gain(f32),
    Panner(f32),
    Analyser(Box<AnalyserTap>),
    Stage(Box<dyn StageInstance>),
    Voice(Box<VoiceSource>),
    Output,
}

impl NodeKind {
    fn role(&self) -> NodeRole {
        match self {
            NodeKind::Gain(_) => NodeRole::Gain,
            NodeKind::Panner(_) => NodeRole::Panner,
            NodeKind::Analyser(_) => NodeRole::Analyser,
            NodeKind::Stage(_) => NodeRole::Stage,
            NodeKind::Voice(_) => NodeRole::Voice,
            NodeKind::Output => NodeRole::Output,
        }
    }
}

struct Node {
    kind: NodeKind,
    outputs: Vec<NodeId>,
}

/// Directed audio graph with a single terminal output node
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u64,
    output: NodeId,
    /// Render scratch, one block per node, reused across renders
    buffers: HashMap<NodeId, Vec<f32>>,
    order: Vec<NodeId>,
    /// Nodes with at least one incoming connection
    fed: HashSet<NodeId>,
    order_dirty: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            output: NodeId(0),
            buffers: HashMap::new(),
            order: Vec::new(),
            fed: HashSet::new(),
            order_dirty: true,
        };
        graph.output = graph.insert(NodeKind::Output);
        graph
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                kind,
                outputs: Vec::new(),
            },
        );
        self.order_dirty = true;
        id
    }

    /// Terminal output sink
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn add_gain(&mut self, value: f32) -> NodeId {
        self.insert(NodeKind::Gain(value))
    }

    pub fn add_panner(&mut self, pan: f32) -> NodeId {
        self.insert(NodeKind::Panner(pan))
    }

    pub fn add_analyser(&mut self, tap: AnalyserTap) -> NodeId {
        self.insert(NodeKind::Analyser(Box::new(tap)))
    }

    pub fn add_stage(&mut self, stage: Box<dyn StageInstance>) -> NodeId {
        self.insert(NodeKind::Stage(stage))
    }

    pub(crate) fn add_voice(&mut self, voice: VoiceSource) -> NodeId {
        self.insert(NodeKind::Voice(Box::new(voice)))
    }

    /// Remove a node and every connection into or out of it.
    /// Stage instances are released. The output node cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.output {
            return false;
        }
        let Some(mut node) = self.nodes.remove(&id) else {
            return false;
        };
        if let NodeKind::Stage(stage) = &mut node.kind {
            stage.release();
        }
        for other in self.nodes.values_mut() {
            other.outputs.retain(|&o| o != id);
        }
        self.buffers.remove(&id);
        self.order_dirty = true;
        true
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn role(&self, id: NodeId) -> Option<NodeRole> {
        self.nodes.get(&id).map(|n| n.kind.role())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Connect `from` into `to`. Duplicate connections are ignored.
    /// Returns false if either node is missing or the edge would form a cycle.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        if from == to || !self.nodes.contains_key(&to) || !self.nodes.contains_key(&from) {
            return false;
        }
        if self.reaches(to, from) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&from) {
            if !node.outputs.contains(&to) {
                node.outputs.push(to);
                self.order_dirty = true;
            }
        }
        true
    }

    /// Drop every outgoing connection of `id`
    pub fn disconnect(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if !node.outputs.is_empty() {
                node.outputs.clear();
                self.order_dirty = true;
            }
        }
    }

    /// Outgoing connections of `id`
    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |n| n.outputs.as_slice())
    }

    /// All connections, sorted, for comparing topologies
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .flat_map(|(&from, node)| node.outputs.iter().map(move |&to| (from, to)))
            .collect();
        edges.sort();
        edges
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            stack.extend(self.outputs(id).iter().copied());
        }
        false
    }

    pub fn set_gain(&mut self, id: NodeId, value: f32) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Gain(gain)) => {
                *gain = value;
                true
            }
            _ => false,
        }
    }

    pub fn gain(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::Gain(gain)) => Some(*gain),
            _ => None,
        }
    }

    pub fn set_pan(&mut self, id: NodeId, pan: f32) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Panner(value)) => {
                *value = pan;
                true
            }
            _ => false,
        }
    }

    pub fn pan(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::Panner(pan)) => Some(*pan),
            _ => None,
        }
    }

    /// Change the loop flag of an in-flight voice
    pub fn set_voice_loop(&mut self, id: NodeId, looping: bool) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Voice(voice)) => {
                voice.looping = looping;
                true
            }
            _ => false,
        }
    }

    pub fn analyser(&self, id: NodeId) -> Option<&AnalyserTap> {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::Analyser(tap)) => Some(tap),
            _ => None,
        }
    }

    pub fn analyser_mut(&mut self, id: NodeId) -> Option<&mut AnalyserTap> {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Analyser(tap)) => Some(tap),
            _ => None,
        }
    }

    /// Forward a parameter to a stage node; `None` if `id` is not a stage
    pub fn set_stage_parameter(
        &mut self,
        id: NodeId,
        name: &str,
        value: f32,
    ) -> Option<Result<(), StageError>> {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Stage(stage)) => Some(stage.set_parameter(name, value)),
            _ => None,
        }
    }

    fn rebuild_order(&mut self) {
        let mut indegree: HashMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for node in self.nodes.values() {
            for out in &node.outputs {
                if let Some(count) = indegree.get_mut(out) {
                    *count += 1;
                }
            }
        }

        self.fed = indegree
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&id, _)| id)
            .collect();

        let mut ready: VecDeque<NodeId> = indegree
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        // Deterministic order among independent nodes
        ready.make_contiguous().sort();

        self.order.clear();
        while let Some(id) = ready.pop_front() {
            self.order.push(id);
            for out in self.outputs(id).to_vec() {
                if let Some(count) = indegree.get_mut(&out) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(out);
                    }
                }
            }
        }
        self.order_dirty = false;
    }

    /// Render one block of interleaved stereo into `out`.
    ///
    /// `block_start` is the bus time of the first frame.
    pub fn render(&mut self, out: &mut [f32], block_start: f64, sample_rate: u32) {
        if self.order_dirty {
            self.rebuild_order();
        }
        let len = out.len() - out.len() % 2;

        for id in &self.order {
            let buffer = self.buffers.entry(*id).or_default();
            buffer.clear();
            buffer.resize(len, 0.0);
        }

        for index in 0..self.order.len() {
            let id = self.order[index];
            let Some(mut buffer) = self.buffers.remove(&id) else {
                continue;
            };
            let Some(node) = self.nodes.get_mut(&id) else {
                self.buffers.insert(id, buffer);
                continue;
            };

            match &mut node.kind {
                NodeKind::Gain(gain) => {
                    let gain = *gain;
                    buffer.iter_mut().for_each(|s| *s *= gain);
                }
                NodeKind::Panner(pan) => apply_pan(&mut buffer, *pan),
                // An unwired tap keeps its last window
                NodeKind::Analyser(tap) if self.fed.contains(&id) => tap.push_frames(&buffer),
                NodeKind::Analyser(_) => {}
                NodeKind::Stage(stage) => stage.process(&mut buffer, sample_rate),
                NodeKind::Voice(voice) => voice.render(&mut buffer, block_start, sample_rate),
                NodeKind::Output => {}
            }

            for out_id in &node.outputs {
                if let Some(target) = self.buffers.get_mut(out_id) {
                    for (t, s) in target.iter_mut().zip(buffer.iter()) {
                        *t += *s;
                    }
                }
            }
            self.buffers.insert(id, buffer);
        }

        match self.buffers.get(&self.output) {
            Some(mixed) => out[..len].copy_from_slice(mixed),
            None => out[..len].fill(0.0),
        }
        out[len..].fill(0.0);
    }
}

/// Equal-power stereo panning of an interleaved block
fn apply_pan(block: &mut [f32], pan: f32) {
    if pan == 0.0 {
        return;
    }
    let pan = pan.clamp(-1.0, 1.0);
    let x = if pan <= 0.0 { pan + 1.0 } else { pan };
    let gain_l = (x * FRAC_PI_2).cos();
    let gain_r = (x * FRAC_PI_2).sin();

    for frame in block.chunks_exact_mut(2) {
        let (l, r) = (frame[0], frame[1]);
        if pan <= 0.0 {
            frame[0] = l + r * gain_l;
            frame[1] = r * gain_r;
        } else {
            frame[0] = l * gain_l;
            frame[1] = r + l * gain_r;
        }
    }
}
