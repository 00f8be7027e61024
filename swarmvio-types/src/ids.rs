use serde::{Deserialize, Serialize};

/// Stable integer identifying one agent in the swarm (spec §3 "Agent").
/// Up to ~8 agents per swarm in practice; nothing here enforces that bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

/// Monotonic-within-agent frame identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn next(self) -> FrameId {
        FrameId(self.0 + 1)
    }
}

/// Landmark identifier, unique within the agent that created it. Carried
/// across agents as `(agent_id, local_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LandmarkId {
    pub agent_id: AgentId,
    pub local_id: u64,
}

impl LandmarkId {
    pub fn new(agent_id: AgentId, local_id: u64) -> Self {
        LandmarkId { agent_id, local_id }
    }
}
