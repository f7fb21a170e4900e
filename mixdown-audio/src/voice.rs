//! Voice pool - bounded set of playing instances for one clip

use crate::graph::NodeId;
use crate::ids::VoiceId;

/// Default pool capacity
pub const DEFAULT_MAX_VOICES: usize = 1;

/// One playing instance, wired into the graph as `node`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub id: VoiceId,
    pub node: NodeId,
    /// Bus time the voice was admitted
    pub started_at: f64,
}

/// Ordered voices, oldest first
#[derive(Debug)]
pub struct VoicePool {
    voices: Vec<Voice>,
    max_voices: usize,
}

impl Default for VoicePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VOICES)
    }
}

impl VoicePool {
    pub fn new(max_voices: usize) -> Self {
        Self {
            voices: Vec::with_capacity(max_voices),
            max_voices,
        }
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Change capacity. Voices above a lowered capacity keep playing;
    /// admission resumes once the pool drains below it.
    pub fn set_max_voices(&mut self, max_voices: usize) {
        self.max_voices = max_voices;
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.voices.len() >= self.max_voices
    }

    /// Admit a voice, handing it back if the pool is full
    pub fn admit(&mut self, voice: Voice) -> Result<(), Voice> {
        if self.is_full() {
            return Err(voice);
        }
        self.voices.push(voice);
        Ok(())
    }

    /// Remove a voice by id, returning its former index.
    /// Unknown ids are ignored, so repeated removal is harmless.
    pub fn remove(&mut self, id: VoiceId) -> Option<(usize, Voice)> {
        let index = self.voices.iter().position(|v| v.id == id)?;
        Some((index, self.voices.remove(index)))
    }

    /// Take every voice out of the pool
    pub fn drain(&mut self) -> Vec<Voice> {
        self.voices.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn oldest(&self) -> Option<&Voice> {
        self.voices.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn voice(graph: &mut Graph) -> Voice {
        Voice {
            id: VoiceId::next(),
            node: graph.add_gain(1.0),
            started_at: 0.0,
        }
    }

    #[test]
    fn test_admission_bound() {
        let mut graph = Graph::new();
        let mut pool = VoicePool::new(2);
        assert!(pool.admit(voice(&mut graph)).is_ok());
        assert!(pool.admit(voice(&mut graph)).is_ok());
        assert!(pool.admit(voice(&mut graph)).is_err());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut graph = Graph::new();
        let mut pool = VoicePool::new(2);
        let first = voice(&mut graph);
        let second = voice(&mut graph);
        pool.admit(first).unwrap();
        pool.admit(second).unwrap();

        assert_eq!(pool.remove(second.id), Some((1, second)));
        assert_eq!(pool.remove(second.id), None);
        assert_eq!(pool.oldest(), Some(&first));
    }

    #[test]
    fn test_lowered_capacity_keeps_voices() {
        let mut graph = Graph::new();
        let mut pool = VoicePool::new(3);
        for _ in 0..3 {
            pool.admit(voice(&mut graph)).unwrap();
        }
        pool.set_max_voices(1);
        assert_eq!(pool.len(), 3);
        assert!(pool.is_full());
        assert_eq!(pool.drain().len(), 3);
        assert!(!pool.is_full());
    }
}
