//! Process-unique identities for engine entities

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn next() -> Self {
                Self(next_id())
            }

            /// Raw numeric value
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a master bus
    MasterId,
    "master"
);
entity_id!(
    /// Identity of a channel
    ChannelId,
    "channel"
);
entity_id!(
    /// Identity of an audio clip
    ClipId,
    "clip"
);
entity_id!(
    /// Identity of an effect stage
    EffectId,
    "effect"
);
entity_id!(
    /// Identity of one playing voice
    VoiceId,
    "voice"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ClipId::next();
        let b = ClipId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn test_display() {
        let id = ChannelId(7);
        assert_eq!(id.to_string(), "channel#7");
    }
}
