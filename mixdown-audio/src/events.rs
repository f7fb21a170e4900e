//! Clip events and the typed listener registry

use crate::ids::VoiceId;
use std::collections::HashMap;
use std::sync::Arc;

/// Periodic playhead report while a clip plays
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Source position in seconds
    pub current: f64,
    /// Bus time of the most recent start
    pub start_time: f64,
    /// Source offset the playback started from
    pub offset: f64,
    /// Bus time when the event was produced
    pub bus_timestamp: f64,
    /// `current` as mm:ss
    pub formatted: String,
}

/// Events emitted by an audio clip
#[derive(Debug, Clone, PartialEq)]
pub enum ClipEvent {
    Progress(ProgressEvent),
    /// Playback stopped because the tracked voice reached its end
    Ended { voice: VoiceId },
}

/// Discriminant used to subscribe to one kind of [`ClipEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipEventKind {
    Progress,
    Ended,
}

impl ClipEvent {
    pub fn kind(&self) -> ClipEventKind {
        match self {
            ClipEvent::Progress(_) => ClipEventKind::Progress,
            ClipEvent::Ended { .. } => ClipEventKind::Ended,
        }
    }
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

pub type Listener = Arc<dyn Fn(&ClipEvent) + Send + Sync>;

struct Registration {
    handle: ListenerHandle,
    callback: Listener,
    once: bool,
}

/// Listeners per event kind, in registration order
#[derive(Default)]
pub struct EventRegistry {
    listeners: HashMap<ClipEventKind, Vec<Registration>>,
    next_handle: u64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, kind: ClipEventKind, callback: Listener, once: bool) -> ListenerHandle {
        self.next_handle += 1;
        let handle = ListenerHandle(self.next_handle);
        self.listeners.entry(kind).or_default().push(Registration {
            handle,
            callback,
            once,
        });
        handle
    }

    pub fn add(&mut self, kind: ClipEventKind, callback: Listener) -> ListenerHandle {
        self.register(kind, callback, false)
    }

    /// Register a listener that unsubscribes itself after one event
    pub fn once(&mut self, kind: ClipEventKind, callback: Listener) -> ListenerHandle {
        self.register(kind, callback, true)
    }

    /// Remove a listener; false if the handle is unknown
    pub fn remove(&mut self, handle: ListenerHandle) -> bool {
        for registrations in self.listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.handle == handle) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove all listeners, or only those for `kind`
    pub fn clear(&mut self, kind: Option<ClipEventKind>) {
        match kind {
            Some(kind) => {
                self.listeners.remove(&kind);
            }
            None => self.listeners.clear(),
        }
    }

    pub fn listener_count(&self, kind: ClipEventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Collect the callbacks for `kind`, dropping once-listeners.
    /// Callers invoke the result after releasing any locks.
    pub fn take_callbacks(&mut self, kind: ClipEventKind) -> Vec<Listener> {
        let Some(registrations) = self.listeners.get_mut(&kind) else {
            return Vec::new();
        };
        let callbacks = registrations.iter().map(|r| r.callback.clone()).collect();
        registrations.retain(|r| !r.once);
        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let listener: Listener = Arc::new(move |_: &ClipEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    fn ended() -> ClipEvent {
        ClipEvent::Ended {
            voice: VoiceId::next(),
        }
    }

    fn dispatch(registry: &mut EventRegistry, event: &ClipEvent) {
        for callback in registry.take_callbacks(event.kind()) {
            callback(event);
        }
    }

    #[test]
    fn test_add_and_remove() {
        let mut registry = EventRegistry::new();
        let (count, listener) = counter();
        let handle = registry.add(ClipEventKind::Ended, listener);

        dispatch(&mut registry, &ended());
        assert!(registry.remove(handle));
        assert!(!registry.remove(handle));
        dispatch(&mut registry, &ended());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_fires_once() {
        let mut registry = EventRegistry::new();
        let (count, listener) = counter();
        registry.once(ClipEventKind::Ended, listener);

        dispatch(&mut registry, &ended());
        dispatch(&mut registry, &ended());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(ClipEventKind::Ended), 0);
    }

    #[test]
    fn test_kinds_are_separate() {
        let mut registry = EventRegistry::new();
        let (count, listener) = counter();
        registry.add(ClipEventKind::Progress, listener);
        dispatch(&mut registry, &ended());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_one_kind() {
        let mut registry = EventRegistry::new();
        let (_, a) = counter();
        let (_, b) = counter();
        registry.add(ClipEventKind::Progress, a);
        registry.add(ClipEventKind::Ended, b);

        registry.clear(Some(ClipEventKind::Progress));
        assert_eq!(registry.listener_count(ClipEventKind::Progress), 0);
        assert_eq!(registry.listener_count(ClipEventKind::Ended), 1);

        registry.clear(None);
        assert_eq!(registry.listener_count(ClipEventKind::Ended), 0);
    }
}
