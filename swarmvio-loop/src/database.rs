//! Keyframe database (spec §4.5 "Holds a database of past keyframes by
//! `frame_id`").

use std::collections::HashMap;

use swarmvio_types::{AgentId, FrameId, VisualImageDescArray};

/// Identifies one keyframe globally across agents. `frame_id` alone is
/// only unique within the agent that produced it, so retrieval and the
/// matched-frame wait both key on the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyframeKey {
    pub drone_id: AgentId,
    pub frame_id: FrameId,
}

impl KeyframeKey {
    pub fn of(desc: &VisualImageDescArray) -> Self {
        KeyframeKey {
            drone_id: desc.drone_id,
            frame_id: desc.frame_id,
        }
    }
}

/// Past keyframes, local and remote, retained for retrieval and as PnP
/// anchors (spec §4.5, §4.7).
#[derive(Debug, Default)]
pub struct KeyframeDatabase {
    by_key: HashMap<KeyframeKey, VisualImageDescArray>,
    order: Vec<KeyframeKey>,
}

impl KeyframeDatabase {
    pub fn new() -> Self {
        KeyframeDatabase::default()
    }

    pub fn insert(&mut self, desc: VisualImageDescArray) {
        let key = KeyframeKey::of(&desc);
        if !self.by_key.contains_key(&key) {
            self.order.push(key);
        }
        self.by_key.insert(key, desc);
    }

    pub fn get(&self, key: KeyframeKey) -> Option<&VisualImageDescArray> {
        self.by_key.get(&key)
    }

    pub fn contains(&self, key: KeyframeKey) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Keyframes in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &VisualImageDescArray> {
        self.order.iter().filter_map(move |k| self.by_key.get(k))
    }
}
