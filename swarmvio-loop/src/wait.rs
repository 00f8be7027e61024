//! Matched-frame wait policy (spec §4.5 "Matched-frame wait", §9 design
//! note): a remote keyframe may reference a local frame that has not yet
//! reached the detector's database. Rather than spawning a thread per
//! waiting frame, pending frames sit in a bounded map and are resolved
//! whenever a new local frame is admitted, or dropped once their 1 s
//! budget expires (spec §7 "Protocol anomaly ... drop silently").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use swarmvio_types::VisualImageDescArray;

use crate::database::KeyframeKey;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

struct Pending {
    desc: VisualImageDescArray,
    deadline: Instant,
}

/// Tracks remote keyframes waiting on a local match, polled at whatever
/// cadence the owning thread ticks (spec §5: "polled with a 1 ms sleep
/// when empty").
pub struct MatchedFrameWaiter {
    pending: HashMap<KeyframeKey, Pending>,
    timeout: Duration,
}

impl Default for MatchedFrameWaiter {
    fn default() -> Self {
        MatchedFrameWaiter::new(DEFAULT_TIMEOUT)
    }
}

impl MatchedFrameWaiter {
    pub fn new(timeout: Duration) -> Self {
        MatchedFrameWaiter {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Registers `desc` as waiting on `matched_key` to be admitted locally.
    pub fn wait_for(&mut self, matched_key: KeyframeKey, desc: VisualImageDescArray) {
        self.pending.insert(
            matched_key,
            Pending {
                desc,
                deadline: Instant::now() + self.timeout,
            },
        );
    }

    /// Call whenever a keyframe keyed by `key` is admitted to the database.
    /// Returns the deferred remote descriptor for re-processing, if any was
    /// waiting on exactly this match.
    pub fn on_admitted(&mut self, key: KeyframeKey) -> Option<VisualImageDescArray> {
        self.pending.remove(&key).map(|p| p.desc)
    }

    /// Drops pending frames whose wait budget has expired without a match.
    pub fn expire(&mut self, now: Instant) {
        self.pending.retain(|_, p| p.deadline > now);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
