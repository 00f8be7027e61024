//! Lazy-broadcast and force-landmarks policy (spec §6 "Lazy broadcast",
//! "Force landmarks"). Discover mode is the supplemented bootstrap case:
//! a peer heard of but with no PGO pose yet cannot be proximity-checked,
//! so full landmark payloads are force-broadcast to it unconditionally
//! until its first fused pose arrives.

use std::collections::{HashMap, HashSet};

use nalgebra::Vector3;
use swarmvio_types::{AgentId, NetworkConfig, VisualImageDescArray};

/// Default radius (metres) within which a peer with a known PGO pose
/// counts as "nearby" for the force-landmarks rule. Spec §6 names the
/// rule but not a number; kept as a parameter rather than a hardcoded
/// constant so a deployment can tune it.
pub const DEFAULT_NEARBY_DIST: f64 = 50.0;

/// Tracks which peers this agent has heard of, and which of those have a
/// PGO-fused pose yet.
#[derive(Debug, Default)]
pub struct PeerTracker {
    known: HashSet<AgentId>,
    poses: HashMap<AgentId, Vector3<f64>>,
}

impl PeerTracker {
    pub fn new() -> Self {
        PeerTracker::default()
    }

    /// Marks `id` as known, e.g. on receiving any message from it.
    pub fn mark_heard(&mut self, id: AgentId) {
        self.known.insert(id);
    }

    /// Ingests the PGO optimizer's fused-pose list (spec §6 inputs).
    pub fn update_pgo_poses(&mut self, poses: &[(AgentId, Vector3<f64>)]) {
        for &(id, pos) in poses {
            self.known.insert(id);
            self.poses.insert(id, pos);
        }
    }

    /// A peer is in discover mode once heard of but before its first PGO
    /// pose arrives.
    pub fn any_discover_mode_peer(&self) -> bool {
        self.known.iter().any(|id| !self.poses.contains_key(id))
    }

    pub fn any_nearby_peer(&self, self_position: Vector3<f64>, nearby_dist: f64) -> bool {
        self.poses.values().any(|p| (p - self_position).norm() <= nearby_dist)
    }
}

/// Decides what to broadcast for a freshly-produced keyframe descriptor,
/// or `None` to suppress the broadcast entirely (spec §6 "Lazy
/// broadcast": non-keyframes are suppressed unless a peer is bootstrapping
/// in discover mode; "Force landmarks": a nearby or discover-mode peer
/// gets the full per-landmark payload, otherwise descriptor-only).
pub fn decide_broadcast(
    desc: &VisualImageDescArray,
    cfg: &NetworkConfig,
    peers: &PeerTracker,
    self_position: Vector3<f64>,
    nearby_dist: f64,
) -> Option<VisualImageDescArray> {
    if !cfg.lazy_broadcast_keyframe {
        return Some(desc.clone());
    }

    let discover = peers.any_discover_mode_peer();
    if !desc.is_keyframe && !discover {
        return None;
    }

    if discover || peers.any_nearby_peer(self_position, nearby_dist) {
        Some(desc.clone())
    } else {
        let mut lazy = desc.clone();
        lazy.make_lazy();
        Some(lazy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmvio_geom::Pose;
    use swarmvio_types::FrameId;

    fn desc(is_keyframe: bool) -> VisualImageDescArray {
        VisualImageDescArray {
            frame_id: FrameId(1),
            drone_id: AgentId(0),
            reference_frame_id: FrameId(1),
            stamp: 0.0,
            pose_drone: Pose::identity(),
            sld_win_status: vec![],
            cameras: vec![swarmvio_types::CameraImageDesc {
                camera_id: 0,
                extrinsic: Pose::identity(),
                global_descriptor: vec![],
                landmarks: vec![swarmvio_types::LandmarkObservation {
                    frame_id: FrameId(1),
                    camera_id: 0,
                    bearing: Vector3::new(0.0, 0.0, 1.0),
                    pixel_velocity: nalgebra::Vector2::zeros(),
                    td_at_observation: 0.0,
                    depth: None,
                }],
            }],
            is_keyframe,
            is_lazy_frame: false,
            matched_frame: None,
            matched_drone: None,
            send_to_backend: true,
        }
    }

    fn lazy_cfg() -> NetworkConfig {
        let mut cfg = NetworkConfig::default();
        cfg.lazy_broadcast_keyframe = true;
        cfg
    }

    #[test]
    fn non_keyframe_is_suppressed_with_no_known_peers() {
        let peers = PeerTracker::new();
        let out = decide_broadcast(&desc(false), &lazy_cfg(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST);
        assert!(out.is_none());
    }

    #[test]
    fn keyframe_is_broadcast_lazily_with_no_known_peers() {
        let peers = PeerTracker::new();
        let out = decide_broadcast(&desc(true), &lazy_cfg(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST).unwrap();
        assert!(out.is_lazy_frame);
        assert!(out.cameras[0].landmarks.is_empty());
    }

    #[test]
    fn discover_mode_peer_forces_full_payload_even_on_non_keyframe() {
        let mut peers = PeerTracker::new();
        peers.mark_heard(AgentId(1));
        let out = decide_broadcast(&desc(false), &lazy_cfg(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST).unwrap();
        assert!(!out.is_lazy_frame);
        assert_eq!(out.cameras[0].landmarks.len(), 1);
    }

    #[test]
    fn nearby_fused_peer_forces_full_payload() {
        let mut peers = PeerTracker::new();
        peers.update_pgo_poses(&[(AgentId(1), Vector3::new(1.0, 0.0, 0.0))]);
        let out = decide_broadcast(&desc(true), &lazy_cfg(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST).unwrap();
        assert!(!out.is_lazy_frame);
    }

    #[test]
    fn distant_fused_peer_still_gets_lazy_broadcast() {
        let mut peers = PeerTracker::new();
        peers.update_pgo_poses(&[(AgentId(1), Vector3::new(1000.0, 0.0, 0.0))]);
        let out = decide_broadcast(&desc(true), &lazy_cfg(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST).unwrap();
        assert!(out.is_lazy_frame);
    }

    #[test]
    fn lazy_broadcast_disabled_always_sends_full() {
        let peers = PeerTracker::new();
        let out = decide_broadcast(&desc(false), &NetworkConfig::default(), &peers, Vector3::zeros(), DEFAULT_NEARBY_DIST).unwrap();
        assert!(!out.is_lazy_frame);
    }
}
