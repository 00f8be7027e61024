//! Wire messages carried by the swarm broadcast transport (spec §4.6).

use serde::{Deserialize, Serialize};
use swarmvio_types::{LoopEdge, VisualImageDescArray};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SwarmMessage {
    Desc(VisualImageDescArray),
    Edge(LoopEdge),
}

impl SwarmMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmvio_geom::Pose;
    use swarmvio_types::{AgentId, FrameId};

    fn sample_desc() -> VisualImageDescArray {
        VisualImageDescArray {
            frame_id: FrameId(1),
            drone_id: AgentId(0),
            reference_frame_id: FrameId(1),
            stamp: 1.0,
            pose_drone: Pose::identity(),
            sld_win_status: vec![FrameId(1)],
            cameras: vec![],
            is_keyframe: true,
            is_lazy_frame: false,
            matched_frame: None,
            matched_drone: None,
            send_to_backend: true,
        }
    }

    #[test]
    fn desc_round_trips_through_bytes() {
        let msg = SwarmMessage::Desc(sample_desc());
        let bytes = msg.to_bytes().unwrap();
        let back = SwarmMessage::from_bytes(&bytes).unwrap();
        match back {
            SwarmMessage::Desc(d) => assert_eq!(d.frame_id, FrameId(1)),
            SwarmMessage::Edge(_) => panic!("expected Desc"),
        }
    }

    #[test]
    fn edge_round_trips_through_bytes() {
        let edge = LoopEdge {
            frame_a: FrameId(1),
            frame_b: FrameId(2),
            relative_pose: Pose::identity(),
            covariance: nalgebra::Matrix6::identity(),
            inliers: 20,
        };
        let msg = SwarmMessage::Edge(edge);
        let bytes = msg.to_bytes().unwrap();
        let back = SwarmMessage::from_bytes(&bytes).unwrap();
        match back {
            SwarmMessage::Edge(e) => assert_eq!(e.frame_a, FrameId(1)),
            SwarmMessage::Desc(_) => panic!("expected Edge"),
        }
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(SwarmMessage::from_bytes(b"not json").is_err());
    }
}
